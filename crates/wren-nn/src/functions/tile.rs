// Tile: repeat an array along every axis
//
// Shapes are aligned the way NumPy's `tile` aligns them: whichever of the
// input shape and the repeat counts is shorter is left-padded with 1s.
//
//   x: [2, 2], reps (2, 2)  →  y: [4, 4]
//   x: [3],    reps (2, 1)  →  y: [2, 3]
//   x: [2, 3], reps 2       →  y: [2, 6]
//
// Backward views gy as interleaved (rep, size) axes, e.g. y: [4, 4] with
// x: [2, 2] and reps (2, 2) becomes [2, 2, 2, 2], and sums over the rep
// axes 0, 2, 4, ... The summed gradient is then reshaped to x's own shape,
// dropping the padding.

use wren_core::{Array, Dispatch, Error, Expect, Function, InTypes, Result, Shape, Variable};

use super::call;

/// Repeat counts for [`Tile`]. A single count becomes a 1-tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reps(Vec<i64>);

impl Reps {
    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }
}

impl From<i64> for Reps {
    fn from(n: i64) -> Self {
        Reps(vec![n])
    }
}

impl From<i32> for Reps {
    fn from(n: i32) -> Self {
        Reps(vec![n as i64])
    }
}

impl From<usize> for Reps {
    fn from(n: usize) -> Self {
        Reps(vec![n as i64])
    }
}

impl<const N: usize> From<[i64; N]> for Reps {
    fn from(reps: [i64; N]) -> Self {
        Reps(reps.to_vec())
    }
}

impl<const N: usize> From<[i32; N]> for Reps {
    fn from(reps: [i32; N]) -> Self {
        Reps(reps.iter().map(|&r| r as i64).collect())
    }
}

impl<const N: usize> From<[usize; N]> for Reps {
    fn from(reps: [usize; N]) -> Self {
        Reps(reps.iter().map(|&r| r as i64).collect())
    }
}

impl From<Vec<i64>> for Reps {
    fn from(reps: Vec<i64>) -> Self {
        Reps(reps)
    }
}

impl From<&[i64]> for Reps {
    fn from(reps: &[i64]) -> Self {
        Reps(reps.to_vec())
    }
}

/// Construct an array by repeating the input `reps` times.
#[derive(Debug, Clone)]
pub struct Tile {
    reps: Vec<usize>,
}

impl Tile {
    /// Fails with `UnsupportedConfiguration` if any count is negative.
    pub fn new(reps: impl Into<Reps>) -> Result<Self> {
        let reps = reps.into();
        let reps = reps
            .as_slice()
            .iter()
            .map(|&r| {
                usize::try_from(r).map_err(|_| {
                    Error::unsupported("Tile", format!("reps must be non-negative, got {}", r))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Tile { reps })
    }

    pub fn reps(&self) -> &[usize] {
        &self.reps
    }
}

impl Function for Tile {
    fn label(&self) -> &'static str {
        "Tile"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        in_types.expect(&[Expect::size(1)])
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        Ok(vec![inputs[0].tile(&self.reps)?])
    }

    fn backward(
        &mut self,
        _: &Dispatch,
        inputs: &[Array],
        grad_outputs: &[Array],
    ) -> Result<Vec<Option<Array>>> {
        let x = inputs[0].shape();
        let gy = &grad_outputs[0];
        if gy.rank() == 0 {
            return Ok(vec![Some(gy.reshape(x.clone())?)]);
        }

        let rank = x.rank().max(self.reps.len());
        let padded = x.left_pad(rank);
        let mut reps = vec![1; rank - self.reps.len()];
        reps.extend_from_slice(&self.reps);

        let interleaved: Vec<usize> = reps
            .iter()
            .zip(padded.dims())
            .flat_map(|(&r, &s)| [r, s])
            .collect();
        let rep_axes: Vec<usize> = (0..rank).map(|d| 2 * d).collect();
        let gx = gy
            .reshape(Shape::new(interleaved))?
            .sum(&rep_axes, false)?
            .reshape(x.clone())?;
        Ok(vec![Some(gx)])
    }
}

/// Tile `x` by `reps`.
pub fn tile(x: &Variable, reps: impl Into<Reps>) -> Result<Variable> {
    call(Tile::new(reps)?, &[x])
}

#[cfg(test)]
mod tests {
    use super::*;
    use wren_core::gradient_check::{check_backward, CheckOptions};
    use wren_core::{DType, Device, Graph};

    fn arange(n: usize, shape: impl Into<Shape>) -> Array {
        Array::arange(n, DType::F64, Device::Host)
            .unwrap()
            .reshape(shape)
            .unwrap()
    }

    #[test]
    fn negative_reps_rejected_at_construction() {
        let err = Tile::new([2i64, -1]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedConfiguration { .. }));
        assert!(Tile::new(-3i64).is_err());
    }

    #[test]
    fn scalar_reps_become_one_tuple() {
        assert_eq!(Tile::new(3i64).unwrap().reps(), &[3]);
    }

    #[test]
    fn reps_longer_than_rank_pad_the_input() {
        let g = Graph::new();
        let x = g.variable(arange(3, 3));
        let y = tile(&x, [2i64, 1]).unwrap();
        assert_eq!(y.shape().unwrap().dims(), &[2, 3]);
        y.backward().unwrap();
        assert_eq!(x.grad().unwrap().to_f64_vec(), vec![2.0; 3]);
        assert_eq!(x.grad().unwrap().dims(), &[3]);
    }

    #[test]
    fn reps_shorter_than_rank_pad_the_reps() {
        let g = Graph::new();
        let x = g.variable(arange(6, (2, 3)));
        let y = tile(&x, 2i64).unwrap();
        assert_eq!(y.shape().unwrap().dims(), &[2, 6]);
        assert_eq!(
            y.array().unwrap().to_f64_vec(),
            vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 3.0, 4.0, 5.0]
        );
    }

    #[test]
    fn zero_dim_input_with_empty_reps() {
        let g = Graph::new();
        let x = g.variable(Array::scalar(1.5, DType::F64, Device::Host).unwrap());
        let y = tile(&x, Vec::<i64>::new()).unwrap();
        assert_eq!(y.shape().unwrap().rank(), 0);
        y.backward().unwrap();
        assert_eq!(x.grad().unwrap().to_scalar().unwrap(), 1.0);
    }

    #[test]
    fn zero_reps_give_empty_output_and_zero_grad() {
        let g = Graph::new();
        let x = g.variable(arange(3, 3));
        let y = tile(&x, 0i64).unwrap();
        assert_eq!(y.shape().unwrap().elem_count(), 0);
        y.backward().unwrap();
        assert_eq!(x.grad().unwrap().to_f64_vec(), vec![0.0; 3]);
    }

    #[test]
    fn gradients_match_numerical() {
        let x = arange(6, (2, 3));
        let gy = arange(24, (2, 2, 6)).affine(0.1, -1.0).unwrap();
        check_backward(
            || Ok(Box::new(Tile::new([2i64, 1, 2])?)),
            &[x],
            &[gy],
            CheckOptions::default(),
        )
        .unwrap();
    }
}
