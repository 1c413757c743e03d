// Element rearrangement: Roll and Flip.
//
// Both are permutations, so backward applies the inverse permutation to gy:
// a roll by -shift, or the same flip again.

use wren_core::{Array, Dispatch, Expect, Function, InTypes, Result, Variable};

use super::call;

fn check_axis(in_types: &InTypes, axis: isize) -> Result<()> {
    let Some(t) = in_types.get(0) else {
        return Ok(());
    };
    t.shape.normalize_axis(axis).map(|_| ()).map_err(|_| {
        let rank = t.ndim() as isize;
        in_types.violation(
            "-in_types[0].ndim <= axis < in_types[0].ndim",
            axis,
            format!("axis in [{}, {})", -rank, rank),
        )
    })
}

/// Roll elements by `shift` along `axis`, wrapping around. Without an axis
/// the input is rolled as if flattened, keeping its shape.
#[derive(Debug, Clone, Copy)]
pub struct Roll {
    shift: isize,
    axis: Option<isize>,
}

impl Roll {
    pub fn new(shift: isize, axis: Option<isize>) -> Self {
        Roll { shift, axis }
    }

    fn apply(&self, x: &Array, shift: isize) -> Result<Array> {
        let axis = self
            .axis
            .map(|a| x.shape().normalize_axis(a))
            .transpose()?;
        x.roll(shift, axis)
    }
}

impl Function for Roll {
    fn label(&self) -> &'static str {
        "Roll"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        in_types.expect(&[Expect::size(1)])?;
        match self.axis {
            Some(axis) => check_axis(in_types, axis),
            None => Ok(()),
        }
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        Ok(vec![self.apply(&inputs[0], self.shift)?])
    }

    fn backward(&mut self, _: &Dispatch, _: &[Array], gy: &[Array]) -> Result<Vec<Option<Array>>> {
        Ok(vec![Some(self.apply(&gy[0], -self.shift)?)])
    }
}

/// Reverse the order of elements along one axis.
#[derive(Debug, Clone, Copy)]
pub struct Flip {
    axis: isize,
}

impl Flip {
    pub fn new(axis: isize) -> Self {
        Flip { axis }
    }
}

impl Function for Flip {
    fn label(&self) -> &'static str {
        "Flip"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        in_types.expect(&[Expect::size(1), Expect::min_ndim(0, 1)])?;
        check_axis(in_types, self.axis)
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        let axis = inputs[0].shape().normalize_axis(self.axis)?;
        Ok(vec![inputs[0].flip(axis)?])
    }

    fn backward(&mut self, _: &Dispatch, _: &[Array], gy: &[Array]) -> Result<Vec<Option<Array>>> {
        let axis = gy[0].shape().normalize_axis(self.axis)?;
        Ok(vec![Some(gy[0].flip(axis)?)])
    }
}

pub fn roll(x: &Variable, shift: isize, axis: Option<isize>) -> Result<Variable> {
    call(Roll::new(shift, axis), &[x])
}

pub fn flip(x: &Variable, axis: isize) -> Result<Variable> {
    call(Flip::new(axis), &[x])
}

/// Flip columns (axis 1); the input needs at least two dimensions.
pub fn fliplr(x: &Variable) -> Result<Variable> {
    flip(x, 1)
}

/// Flip rows (axis 0).
pub fn flipud(x: &Variable) -> Result<Variable> {
    flip(x, 0)
}
