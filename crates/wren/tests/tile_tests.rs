// Tile tests: forward patterns, gradient properties, both backends

use proptest::prelude::*;
use wren::prelude::*;

fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() < tol
}

fn assert_vec_approx(got: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(
        got.len(),
        expected.len(),
        "length mismatch: {} vs {}",
        got.len(),
        expected.len()
    );
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!(
            approx_eq(*g, *e, tol),
            "index {}: got {} expected {} (tol {})",
            i,
            g,
            e,
            tol
        );
    }
}

#[test]
fn test_tile_1d_repeats_and_grad() -> wren::Result<()> {
    for device in [Device::Host, Device::Accelerator] {
        let g = Graph::new();
        let x = g.variable(Array::from_vec(vec![0.0f32, 1.0, 2.0], 3, device)?);
        let y = F::tile(&x, 2)?;
        assert_eq!(y.array()?.device(), device);
        assert_eq!(y.array()?.to_vec::<f32>()?, vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);

        y.backward()?;
        assert_eq!(x.grad().unwrap().to_vec::<f32>()?, vec![2.0, 2.0, 2.0]);
    }
    Ok(())
}

#[test]
fn test_tile_2d_pattern_and_grad() -> wren::Result<()> {
    for device in [Device::Host, Device::Accelerator] {
        let g = Graph::new();
        let x = g.variable(Array::from_vec(vec![0.0f32, 1.0, 2.0, 3.0], (2, 2), device)?);
        let y = F::tile(&x, [2, 2])?;
        let out = y.array()?;
        assert_eq!(out.dims(), &[4, 4]);
        assert_eq!(
            out.to_vec::<f32>()?,
            vec![
                0.0, 1.0, 0.0, 1.0, //
                2.0, 3.0, 2.0, 3.0, //
                0.0, 1.0, 0.0, 1.0, //
                2.0, 3.0, 2.0, 3.0,
            ]
        );

        y.backward()?;
        let gx = x.grad().unwrap();
        assert_eq!(gx.dims(), &[2, 2]);
        assert_eq!(gx.to_vec::<f32>()?, vec![4.0; 4]);
    }
    Ok(())
}

#[test]
fn test_tile_negative_reps_creates_nothing() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(Array::ones(3, DType::F32, Device::Host)?);
    let err = F::tile(&x, [1, -2]).unwrap_err();
    assert!(matches!(err, Error::UnsupportedConfiguration { .. }));
    assert!(g.is_empty());
    Ok(())
}

#[test]
fn test_tile_weighted_seed() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(Array::from_f64_slice(&[1.0, 2.0], 2, DType::F64, Device::Host)?);
    let y = F::tile(&x, [3, 1])?;
    let seed = Array::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (3, 2), DType::F64, Device::Host)?;
    g.backward(&y, Some(seed))?;
    assert_vec_approx(&x.grad().unwrap().to_f64_vec(), &[9.0, 12.0], 1e-12);
    Ok(())
}

fn arb_case() -> impl Strategy<Value = (Vec<usize>, Vec<i64>)> {
    (
        prop::collection::vec(1usize..4, 0..4),
        prop::collection::vec(0i64..4, 0..4),
    )
}

fn values(shape: &[usize], offset: f64) -> Vec<f64> {
    let n: usize = shape.iter().product();
    (0..n).map(|i| (i as f64 * 0.37 + offset).sin()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_tile_grad_is_product_of_reps((shape, reps) in arb_case()) {
        let g = Graph::new();
        let x = g.variable(
            Array::from_f64_slice(&values(&shape, 0.0), shape.clone(), DType::F64, Device::Host).unwrap(),
        );
        let y = F::tile(&x, reps.clone()).unwrap();
        y.backward().unwrap();

        let expected = reps.iter().product::<i64>() as f64;
        let gx = x.grad().unwrap();
        prop_assert_eq!(gx.dims(), shape.as_slice());
        for v in gx.to_f64_vec() {
            prop_assert!(approx_eq(v, expected, 1e-9));
        }
    }

    #[test]
    fn prop_tile_is_linear(
        (shape, reps) in arb_case(),
        a in -3.0f64..3.0,
        b in -3.0f64..3.0,
    ) {
        let u = Array::from_f64_slice(&values(&shape, 0.0), shape.clone(), DType::F64, Device::Host).unwrap();
        let v = Array::from_f64_slice(&values(&shape, 1.3), shape.clone(), DType::F64, Device::Host).unwrap();

        let g = Graph::new();
        let combined = g.variable(u.affine(a, 0.0).unwrap().add(&v.affine(b, 0.0).unwrap()).unwrap());
        let lhs = F::tile(&combined, reps.clone()).unwrap().array().unwrap();

        let tu = F::tile(&g.variable(u), reps.clone()).unwrap().array().unwrap();
        let tv = F::tile(&g.variable(v), reps).unwrap().array().unwrap();
        let rhs = tu.affine(a, 0.0).unwrap().add(&tv.affine(b, 0.0).unwrap()).unwrap();

        prop_assert_eq!(lhs.dims(), rhs.dims());
        prop_assert!(lhs.max_abs_diff(&rhs).unwrap() < 1e-9);
    }

    #[test]
    fn prop_tile_backends_agree((shape, reps) in arb_case()) {
        let data = values(&shape, 0.5);
        let mut outs = Vec::new();
        for device in [Device::Host, Device::Accelerator] {
            let g = Graph::new();
            let x = g.variable(Array::from_f64_slice(&data, shape.clone(), DType::F64, device).unwrap());
            let y = F::tile(&x, reps.clone()).unwrap();
            y.backward().unwrap();
            outs.push((y.array().unwrap().to_f64_vec(), x.grad().unwrap().to_f64_vec()));
        }
        prop_assert_eq!(&outs[0], &outs[1]);
    }
}
