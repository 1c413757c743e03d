//! Finite-difference gradient checking.
//!
//! [`numerical_grad`] estimates `d(sum_k <y_k, gy_k>)/dx` by central
//! differences, and [`check_backward`] compares that estimate with what a
//! Function's backward returns. Use f64 inputs: the perturbation is applied in
//! f64 and cast back, so f32 inputs lose most of the signal.

use crate::array::Array;
use crate::device::Device;
use crate::dispatch::Dispatch;
use crate::error::{Error, Result};
use crate::function::Function;

/// Tolerances for [`check_backward`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckOptions {
    pub eps: f64,
    pub atol: f64,
    pub rtol: f64,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            eps: 1e-3,
            atol: 1e-5,
            rtol: 1e-4,
        }
    }
}

impl CheckOptions {
    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_tolerance(mut self, atol: f64, rtol: f64) -> Self {
        self.atol = atol;
        self.rtol = rtol;
        self
    }
}

/// Central-difference gradient of `sum_k <f(inputs)_k, grad_outputs_k>` with
/// respect to every input. Integer inputs get a zero gradient.
pub fn numerical_grad<F>(
    mut f: F,
    inputs: &[Array],
    grad_outputs: &[Array],
    eps: f64,
) -> Result<Vec<Array>>
where
    F: FnMut(&[Array]) -> Result<Vec<Array>>,
{
    let weights: Vec<Vec<f64>> = grad_outputs.iter().map(Array::to_f64_vec).collect();
    let mut objective = |xs: &[Array]| -> Result<f64> {
        let ys = f(xs)?;
        if ys.len() != weights.len() {
            return Err(Error::msg(format!(
                "numerical_grad: function returned {} outputs, {} grad outputs given",
                ys.len(),
                weights.len()
            )));
        }
        Ok(ys
            .iter()
            .zip(&weights)
            .map(|(y, w)| y.to_f64_vec().iter().zip(w).map(|(a, b)| a * b).sum::<f64>())
            .sum())
    };

    let mut grads = Vec::with_capacity(inputs.len());
    for (i, x) in inputs.iter().enumerate() {
        if !x.dtype().is_float() {
            grads.push(Array::zeros_like(x)?);
            continue;
        }
        let base = x.to_f64_vec();
        let mut grad = vec![0.0; base.len()];
        for j in 0..base.len() {
            let mut shifted = inputs.to_vec();
            let mut data = base.clone();

            data[j] = base[j] + eps;
            shifted[i] = Array::from_f64_slice(&data, x.shape().clone(), x.dtype(), x.device())?;
            let plus = objective(&shifted)?;

            data[j] = base[j] - eps;
            shifted[i] = Array::from_f64_slice(&data, x.shape().clone(), x.dtype(), x.device())?;
            let minus = objective(&shifted)?;

            grad[j] = (plus - minus) / (2.0 * eps);
        }
        grads.push(Array::from_f64_slice(&grad, x.shape().clone(), x.dtype(), x.device())?);
    }
    Ok(grads)
}

/// Compare `backward` of freshly built Functions against [`numerical_grad`].
///
/// `make` is called once for the analytic pass and once per numerical
/// evaluation, so any randomness inside the Function must be reproducible
/// across instances. Inputs for which backward returns None are skipped.
pub fn check_backward<M>(
    mut make: M,
    inputs: &[Array],
    grad_outputs: &[Array],
    options: CheckOptions,
) -> Result<()>
where
    M: FnMut() -> Result<Box<dyn Function>>,
{
    let device = inputs.first().map_or(Device::Host, Array::device);

    let mut function = make()?;
    let dispatch = Dispatch::resolve(function.label(), inputs, device)?;
    function.forward(&dispatch, inputs)?;
    let analytic = function.backward(&dispatch, inputs, grad_outputs)?;
    dispatch.synchronize()?;
    let label = function.label();

    let numeric = numerical_grad(
        |xs| {
            let mut f = make()?;
            let d = Dispatch::resolve(f.label(), xs, device)?;
            f.forward(&d, xs)
        },
        inputs,
        grad_outputs,
        options.eps,
    )?;

    for (i, (a, n)) in analytic.iter().zip(&numeric).enumerate() {
        let Some(a) = a else { continue };
        let (a, n) = (a.to_f64_vec(), n.to_f64_vec());
        for (j, (x, y)) in a.iter().zip(&n).enumerate() {
            if (x - y).abs() > options.atol + options.rtol * y.abs() {
                return Err(Error::msg(format!(
                    "{}: gradient mismatch for input {} at element {}: backward {} vs numerical {}",
                    label, i, j, x, y
                )));
            }
        }
    }
    Ok(())
}
