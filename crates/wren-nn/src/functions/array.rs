// Shape-manipulating functions: Reshape, BroadcastTo, Sum, SplitAxis.
//
// Their backward rules are the adjoint shape operation:
//
//   Reshape      reshape gy back to the input shape
//   BroadcastTo  sum gy over the broadcast axes
//   Sum          broadcast gy back over the reduced axes
//   SplitAxis    concatenate the per-piece gradients

use wren_core::{Array, Dispatch, Expect, Function, InTypes, Result, Shape, Variable};

use super::{call, graph_of};

/// Sum `grad` (shape `target` after broadcasting) down to `source`.
pub(crate) fn unbroadcast(grad: &Array, source: &Shape) -> Result<Array> {
    if grad.shape() == source {
        return Ok(grad.clone());
    }
    let lead = grad.rank() - source.rank();
    let padded = source.left_pad(grad.rank());
    let axes: Vec<usize> = grad
        .dims()
        .iter()
        .zip(padded.dims())
        .enumerate()
        .filter(|(d, (&g, &s))| *d < lead || (s == 1 && g != 1))
        .map(|(d, _)| d)
        .collect();
    grad.sum(&axes, true)?.reshape(source.clone())
}

/// Same data under a new shape with the same element count.
#[derive(Debug, Clone)]
pub struct Reshape {
    shape: Shape,
}

impl Reshape {
    pub fn new(shape: impl Into<Shape>) -> Self {
        Reshape {
            shape: shape.into(),
        }
    }
}

impl Function for Reshape {
    fn label(&self) -> &'static str {
        "Reshape"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        in_types.expect(&[Expect::size(1)])?;
        let count = in_types.get(0).map_or(0, |t| t.shape.elem_count());
        if count != self.shape.elem_count() {
            return Err(in_types.violation(
                "in_types[0].size == prod(shape)",
                count,
                self.shape.elem_count(),
            ));
        }
        Ok(())
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        Ok(vec![inputs[0].reshape(self.shape.clone())?])
    }

    fn backward(&mut self, _: &Dispatch, inputs: &[Array], gy: &[Array]) -> Result<Vec<Option<Array>>> {
        Ok(vec![Some(gy[0].reshape(inputs[0].shape().clone())?)])
    }
}

/// NumPy broadcasting to a fixed target shape.
#[derive(Debug, Clone)]
pub struct BroadcastTo {
    shape: Shape,
}

impl BroadcastTo {
    pub fn new(shape: impl Into<Shape>) -> Self {
        BroadcastTo {
            shape: shape.into(),
        }
    }
}

impl Function for BroadcastTo {
    fn label(&self) -> &'static str {
        "BroadcastTo"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        in_types.expect(&[Expect::size(1)])?;
        if let Some(t) = in_types.get(0) {
            if !t.shape.broadcastable_to(&self.shape) {
                return Err(in_types.violation(
                    "in_types[0].shape broadcastable to shape",
                    &t.shape,
                    &self.shape,
                ));
            }
        }
        Ok(())
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        Ok(vec![inputs[0].broadcast_to(self.shape.clone())?])
    }

    fn backward(&mut self, _: &Dispatch, inputs: &[Array], gy: &[Array]) -> Result<Vec<Option<Array>>> {
        Ok(vec![Some(unbroadcast(&gy[0], inputs[0].shape())?)])
    }
}

/// Sum over `axes` (every axis when None).
#[derive(Debug, Clone)]
pub struct Sum {
    axes: Option<Vec<isize>>,
    keepdims: bool,
    resolved: Vec<usize>,
}

impl Sum {
    pub fn new(axes: Option<Vec<isize>>, keepdims: bool) -> Self {
        Sum {
            axes,
            keepdims,
            resolved: Vec::new(),
        }
    }

    fn resolve(&self, shape: &Shape) -> Result<Vec<usize>> {
        match &self.axes {
            None => Ok((0..shape.rank()).collect()),
            Some(axes) => axes.iter().map(|&a| shape.normalize_axis(a)).collect(),
        }
    }
}

impl Function for Sum {
    fn label(&self) -> &'static str {
        "Sum"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        in_types.expect(&[Expect::size(1), Expect::float(0)])?;
        if let (Some(t), Some(axes)) = (in_types.get(0), &self.axes) {
            let rank = t.ndim() as isize;
            if let Some(&bad) = axes.iter().find(|&&a| a < -rank || a >= rank) {
                return Err(in_types.violation(
                    "-in_types[0].ndim <= axis < in_types[0].ndim",
                    bad,
                    format!("axis in [{}, {})", -rank, rank),
                ));
            }
        }
        Ok(())
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        self.resolved = self.resolve(inputs[0].shape())?;
        Ok(vec![inputs[0].sum(&self.resolved, self.keepdims)?])
    }

    fn backward(&mut self, _: &Dispatch, inputs: &[Array], gy: &[Array]) -> Result<Vec<Option<Array>>> {
        let x = inputs[0].shape();
        let kept: Vec<usize> = x
            .dims()
            .iter()
            .enumerate()
            .map(|(d, &s)| if self.resolved.contains(&d) { 1 } else { s })
            .collect();
        let gx = gy[0].reshape(kept)?.broadcast_to(x.clone())?;
        Ok(vec![Some(gx)])
    }
}

/// How [`SplitAxis`] cuts its axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Split {
    /// This many equal pieces; the axis length must divide evenly.
    Sections(usize),
    /// Cut before each of these (increasing) offsets.
    Indices(Vec<usize>),
}

/// Split one input into several outputs along an axis.
#[derive(Debug, Clone)]
pub struct SplitAxis {
    split: Split,
    axis: isize,
}

impl SplitAxis {
    pub fn new(split: Split, axis: isize) -> Self {
        SplitAxis { split, axis }
    }

    fn bounds(&self, size: usize) -> Vec<(usize, usize)> {
        let cuts: Vec<usize> = match &self.split {
            Split::Sections(n) => {
                let step = if *n == 0 { 0 } else { size / n };
                (1..*n).map(|i| i * step).collect()
            }
            Split::Indices(indices) => indices.iter().map(|&i| i.min(size)).collect(),
        };
        let mut bounds = Vec::with_capacity(cuts.len() + 1);
        let mut start = 0;
        for cut in cuts.into_iter().chain(std::iter::once(size)) {
            let end = cut.max(start);
            bounds.push((start, end - start));
            start = end;
        }
        bounds
    }
}

impl Function for SplitAxis {
    fn label(&self) -> &'static str {
        "SplitAxis"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        in_types.expect(&[Expect::size(1), Expect::min_ndim(0, 1)])?;
        let Some(t) = in_types.get(0) else {
            return Ok(());
        };
        let axis = t
            .shape
            .normalize_axis(self.axis)
            .map_err(|_| in_types.violation("axis < in_types[0].ndim", self.axis, t.ndim()))?;
        if let Split::Sections(n) = self.split {
            let size = t.shape.dims()[axis];
            if n == 0 || size % n != 0 {
                return Err(in_types.violation(
                    format!("in_types[0].shape[{}] % sections == 0", axis),
                    size,
                    format!("a multiple of {}", n),
                ));
            }
        }
        Ok(())
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        let x = &inputs[0];
        let axis = x.shape().normalize_axis(self.axis)?;
        self.bounds(x.dims()[axis])
            .into_iter()
            .map(|(start, len)| x.narrow(axis, start, len))
            .collect()
    }

    fn backward(&mut self, _: &Dispatch, inputs: &[Array], gy: &[Array]) -> Result<Vec<Option<Array>>> {
        let axis = inputs[0].shape().normalize_axis(self.axis)?;
        let parts: Vec<&Array> = gy.iter().collect();
        Ok(vec![Some(Array::concat(&parts, axis)?)])
    }
}

pub fn reshape(x: &Variable, shape: impl Into<Shape>) -> Result<Variable> {
    call(Reshape::new(shape), &[x])
}

pub fn broadcast_to(x: &Variable, shape: impl Into<Shape>) -> Result<Variable> {
    call(BroadcastTo::new(shape), &[x])
}

/// Sum over `axes`; `None` reduces everything to a 0-d value.
pub fn sum(x: &Variable, axes: Option<&[isize]>, keepdims: bool) -> Result<Variable> {
    call(Sum::new(axes.map(<[isize]>::to_vec), keepdims), &[x])
}

pub fn split_axis(x: &Variable, split: Split, axis: isize) -> Result<Vec<Variable>> {
    let graph = graph_of("SplitAxis", &[x])?;
    graph.apply(Box::new(SplitAxis::new(split, axis)), &[x])
}
