// Engine tests: recording, accumulation, traversal order, error taxonomy

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

fn host(data: &[f64], shape: impl Into<Shape>) -> wren::Result<Array> {
    Array::from_f64_slice(data, shape, DType::F64, Device::Host)
}

// Accumulation

#[test]
fn test_fan_out_matches_numerical_grad() -> wren::Result<()> {
    let data = [0.3, -1.2, 2.0, 0.7];
    let g = Graph::new();
    let x = g.variable(host(&data, 4)?);

    // x feeds three consumers: both operands of Mul and Exp.
    let y = F::add(&F::mul(&x, &x)?, &F::exp(&x)?)?;
    y.backward()?;

    let numeric = numerical_grad(
        |xs| Ok(vec![xs[0].mul(&xs[0])?.add(&xs[0].exp()?)?]),
        &[host(&data, 4)?],
        &[Array::ones(4, DType::F64, Device::Host)?],
        1e-5,
    )?;
    assert_vec_approx(
        &x.grad().unwrap().to_f64_vec(),
        &numeric[0].to_f64_vec(),
        1e-6,
    );
    Ok(())
}

#[test]
fn test_diamond_waits_for_all_consumers() -> wren::Result<()> {
    // x -> a = 2x -> (b = a², c = exp(a)) -> d = b + c
    let g = Graph::new();
    let x = g.variable(host(&[0.5], 1)?);
    let a = F::mul_constant(&x, 2.0)?;
    let d = F::add(&F::square(&a)?, &F::exp(&a)?)?;
    d.backward()?;

    let expected = 2.0 * (2.0 * 1.0 + 1f64.exp());
    assert!(approx_eq(x.grad().unwrap().to_f64_vec()[0], expected, 1e-12));
    assert!(approx_eq(a.grad().unwrap().to_f64_vec()[0], expected / 2.0, 1e-12));
    Ok(())
}

#[test]
fn test_absent_grad_differs_from_zero_grad() -> wren::Result<()> {
    let g = Graph::new();
    let a = g.variable(host(&[1.0, 2.0], 2)?);
    let b = g.variable(host(&[3.0, 4.0], 2)?);
    let y = F::mul_constant(&a, 0.0)?;
    y.backward()?;

    assert_eq!(a.grad().unwrap().to_f64_vec(), vec![0.0, 0.0]);
    assert!(b.grad().is_none());
    Ok(())
}

#[test]
fn test_label_input_gets_no_grad() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(host(&[0.1, 0.2], (1, 2))?);
    let t = g.variable(Array::from_vec(vec![0i32], 1, Device::Host)?);
    let w = g.variable(host(&[0.5, -0.5, 1.0, 0.0], (2, 2))?);
    let sampler = WalkerAlias::with_seed(&[1.0, 1.0], 0)?;
    let loss = wren::nn::negative_sampling(&x, &t, &w, sampler, 1, Reduction::Sum)?;
    loss.backward()?;

    assert!(t.grad().is_none());
    assert!(x.grad().is_some());
    assert!(w.grad().is_some());
    Ok(())
}

#[test]
fn test_grads_accumulate_across_backward_calls() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(host(&[1.0, 2.0], 2)?);
    F::mul_constant(&x, 3.0)?.backward()?;
    F::mul_constant(&x, 4.0)?.backward()?;
    assert_eq!(x.grad().unwrap().to_f64_vec(), vec![7.0, 7.0]);

    x.cleargrad();
    assert!(x.grad().is_none());
    Ok(())
}

// Multi-output nodes

#[test]
fn test_unused_output_is_zero_filled() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(host(&[1.0, 2.0, 3.0, 4.0], 4)?);
    let parts = F::split_axis(&x, F::Split::Sections(2), 0)?;
    let y = F::mul_constant(&parts[0], 5.0)?;
    y.backward()?;

    assert_eq!(x.grad().unwrap().to_f64_vec(), vec![5.0, 5.0, 0.0, 0.0]);
    assert!(parts[1].grad().is_none());
    Ok(())
}

#[test]
fn test_both_outputs_feed_one_consumer() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(host(&[1.0, 2.0, 3.0, 4.0], (2, 2))?);
    let parts = F::split_axis(&x, F::Split::Indices(vec![1]), 0)?;
    let y = F::mul(&parts[0], &parts[1])?;
    y.backward()?;

    // d(x0 * x1)/dx0 = x1 and vice versa.
    assert_eq!(x.grad().unwrap().to_f64_vec(), vec![3.0, 4.0, 1.0, 2.0]);
    Ok(())
}

// Configuration

#[test]
fn test_retain_grad_off_skips_intermediates() -> wren::Result<()> {
    let g = Graph::with_config(GraphConfig::default().with_retain_grad(false));
    let x = g.variable(host(&[2.0], 1)?);
    let h = F::square(&x)?;
    let y = F::mul_constant(&h, 3.0)?;
    y.backward()?;

    assert!(h.grad().is_none());
    assert_eq!(x.grad().unwrap().to_f64_vec(), vec![12.0]);
    Ok(())
}

#[test]
fn test_type_check_can_be_disabled() -> wren::Result<()> {
    let t = Array::from_vec(vec![1i32, -2], 2, Device::Host)?;

    let checked = Graph::new();
    let err = F::neg(&checked.variable(t.clone())).unwrap_err();
    assert!(matches!(err, Error::ContractViolation { .. }));

    let unchecked = Graph::with_config(GraphConfig::default().with_type_check(false));
    let y = F::neg(&unchecked.variable(t))?;
    assert_eq!(y.array()?.to_vec::<i32>()?, vec![-1, 2]);
    Ok(())
}

// Errors

#[test]
fn test_backward_twice_is_an_integrity_error() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(host(&[1.0], 1)?);
    let y = F::square(&x)?;
    y.backward()?;
    assert!(g.is_empty());

    let err = y.backward().unwrap_err();
    assert!(matches!(err, Error::GraphIntegrity(_)));
    Ok(())
}

#[test]
fn test_cleared_graph_refuses_backward() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(host(&[1.0], 1)?);
    let y = F::exp(&x)?;
    assert_eq!(g.len(), 1);
    g.clear();
    assert!(matches!(y.backward(), Err(Error::GraphIntegrity(_))));
    assert_eq!(y.array()?.to_f64_vec(), vec![1f64.exp()]);
    Ok(())
}

#[test]
fn test_mixed_placement_is_a_backend_mismatch() -> wren::Result<()> {
    let g = Graph::new();
    let a = g.variable(host(&[1.0, 2.0], 2)?);
    let b = g.variable(Array::from_f64_slice(&[1.0, 2.0], 2, DType::F64, Device::Accelerator)?);
    let err = F::add(&a, &b).unwrap_err();
    assert!(matches!(
        err,
        Error::BackendMismatch {
            expected: Device::Host,
            got: Device::Accelerator,
            ..
        }
    ));
    assert_eq!(g.node_count(), 0);
    Ok(())
}

#[test]
fn test_contract_violation_records_nothing() -> wren::Result<()> {
    let g = Graph::new();
    let a = g.variable(host(&[1.0, 2.0], 2)?);
    let b = g.variable(host(&[1.0, 2.0, 3.0], 3)?);
    match F::mul(&a, &b) {
        Err(Error::ContractViolation {
            function,
            expectation,
            ..
        }) => {
            assert_eq!(function, "Mul");
            assert_eq!(expectation, "in_types[0].shape == in_types[1].shape");
        }
        other => panic!("expected a contract violation, got {other:?}"),
    }
    assert_eq!(g.node_count(), 0);
    Ok(())
}

#[test]
fn test_foreign_input_is_an_integrity_error() -> wren::Result<()> {
    let g1 = Graph::new();
    let g2 = Graph::new();
    let a = g1.variable(host(&[1.0], 1)?);
    let b = g2.variable(host(&[2.0], 1)?);
    let err = g1.apply_one(Box::new(F::Add), &[&a, &b]).unwrap_err();
    assert!(matches!(err, Error::GraphIntegrity(_)));
    assert!(g1.is_empty());
    Ok(())
}

#[test]
fn test_uninitialized_input_then_bound() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.uninit_variable();
    assert!(matches!(F::square(&x), Err(Error::ContractViolation { .. })));

    x.set_data(host(&[3.0], 1)?);
    F::square(&x)?.backward()?;
    assert_eq!(x.grad().unwrap().to_f64_vec(), vec![6.0]);
    Ok(())
}

#[test]
fn test_seed_must_match_output() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(host(&[1.0, 2.0], 2)?);
    let y = F::square(&x)?;

    let wrong_shape = host(&[1.0, 2.0, 3.0], 3)?;
    assert!(matches!(
        g.backward(&y, Some(wrong_shape)),
        Err(Error::ContractViolation { .. })
    ));
    let wrong_device = Array::ones(2, DType::F64, Device::Accelerator)?;
    assert!(matches!(
        g.backward(&y, Some(wrong_device)),
        Err(Error::BackendMismatch { .. })
    ));

    // Nothing was consumed by the rejected calls.
    g.backward(&y, Some(host(&[1.0, 0.5], 2)?))?;
    assert_eq!(x.grad().unwrap().to_f64_vec(), vec![2.0, 2.0]);
    Ok(())
}

#[test]
fn test_backward_on_leaf_is_a_noop() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(host(&[1.0], 1)?);
    x.backward()?;
    assert!(x.grad().is_none());
    Ok(())
}

/// Claims one input but returns two gradients.
struct BadArity;

impl Function for BadArity {
    fn label(&self) -> &'static str {
        "BadArity"
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> wren::Result<Vec<Array>> {
        Ok(vec![inputs[0].clone()])
    }

    fn backward(
        &mut self,
        _: &Dispatch,
        _: &[Array],
        gy: &[Array],
    ) -> wren::Result<Vec<Option<Array>>> {
        Ok(vec![Some(gy[0].clone()), None])
    }
}

/// Returns a gradient of the wrong shape.
struct BadShape;

impl Function for BadShape {
    fn label(&self) -> &'static str {
        "BadShape"
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> wren::Result<Vec<Array>> {
        Ok(vec![inputs[0].clone()])
    }

    fn backward(
        &mut self,
        _: &Dispatch,
        _: &[Array],
        gy: &[Array],
    ) -> wren::Result<Vec<Option<Array>>> {
        Ok(vec![Some(gy[0].sum_all()?)])
    }
}

#[test]
fn test_backward_result_is_validated() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(host(&[1.0, 2.0], 2)?);

    let y = g.apply_one(Box::new(BadArity), &[&x])?;
    assert!(matches!(y.backward(), Err(Error::GraphIntegrity(_))));

    let y = g.apply_one(Box::new(BadShape), &[&x])?;
    assert!(matches!(y.backward(), Err(Error::ContractViolation { .. })));
    assert!(x.grad().is_none());
    Ok(())
}

// Introspection

#[test]
fn test_node_info_reports_rank_and_inputs() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(host(&[1.0], 1)?);
    let h = F::exp(&x)?;
    let y = F::mul(&h, &x)?;

    let info = g.node_info(y.creator().unwrap()).unwrap();
    assert_eq!(info.label, "Mul");
    assert_eq!(info.rank, 2);
    assert_eq!(info.inputs, vec![h.id(), x.id()]);
    assert_eq!(info.outputs, 1);
    assert_eq!(g.node_count(), 2);

    y.backward()?;
    assert!(g.node_info(y.creator().unwrap()).is_none());
    assert_eq!(g.node_count(), 2);
    Ok(())
}

#[test]
fn test_accelerator_graph_matches_host() -> wren::Result<()> {
    let data = [0.25, -0.5, 1.5, 2.0, -1.0, 0.125];
    let mut results = Vec::new();
    for device in [Device::Host, Device::Accelerator] {
        let g = Graph::with_config(GraphConfig::default().with_device(device));
        let x = g.variable(Array::from_f64_slice(&data, (2, 3), DType::F64, device)?);
        let y = F::sum(&F::square(&F::roll(&x, 1, Some(1))?)?, Some(&[0]), false)?;
        let z = F::tile(&y, [2])?;
        z.backward()?;
        results.push((z.array()?.to_f64_vec(), x.grad().unwrap().to_f64_vec()));
    }
    assert_eq!(results[0], results[1]);
    Ok(())
}

// Lifetime

#[test]
fn test_reset_between_forward_and_backward() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(host(&[3.0], 1)?);
    let w = g.variable(host(&[0.5], 1)?);
    let y = F::mul(&F::mul(&x, &x)?, &w)?;

    x.set_data(host(&[5.0], 1)?);
    w.set_data(host(&[-1.0], 1)?);
    y.backward()?;
    // d(x^2 w)/dx = 2xw and d/dw = x^2, at the values forward saw.
    assert_vec_approx(&x.grad().unwrap().to_f64_vec(), &[3.0], 1e-12);
    assert_vec_approx(&w.grad().unwrap().to_f64_vec(), &[9.0], 1e-12);
    Ok(())
}

#[test]
fn test_set_data_with_new_shape_drops_gradient() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(host(&[1.0, 2.0], 2)?);
    F::square(&x)?.backward()?;
    assert!(x.grad().is_some());

    x.set_data(host(&[1.0, 2.0, 3.0], 3)?);
    assert_eq!(x.shape().unwrap().dims(), &[3]);
    assert!(x.grad().is_none());
    Ok(())
}

#[test]
fn test_forward_loop_without_backward_stays_bounded() -> wren::Result<()> {
    let g = Graph::new();
    let w = g.variable(host(&[1.5, -0.5], 2)?);
    for _ in 0..500 {
        let y = F::sum(&F::mul(&w, &w)?, None, false)?;
        assert_eq!(y.array()?.to_scalar()?, 2.5);
    }
    assert_eq!(g.node_count(), 1000);
    assert_eq!(g.len(), 0);
    assert!(g.slot_count() <= 128, "slots: {}", g.slot_count());

    // The parameter is still usable on the same graph.
    F::sum(&F::mul(&w, &w)?, None, false)?.backward()?;
    assert_vec_approx(&w.grad().unwrap().to_f64_vec(), &[3.0, -1.0], 1e-12);
    Ok(())
}

#[test]
fn test_apply_one_with_multi_output_records_nothing() -> wren::Result<()> {
    let g = Graph::new();
    let x = g.variable(host(&[1.0, 2.0, 3.0, 4.0], 4)?);
    let split = F::SplitAxis::new(F::Split::Sections(2), 0);
    assert!(g.apply_one(Box::new(split), &[&x]).is_err());
    assert!(g.is_empty());
    assert_eq!(g.node_count(), 0);
    Ok(())
}
