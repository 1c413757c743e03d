// Elementwise arithmetic
//
// Binary functions require operands of identical shape and dtype; broadcast
// explicitly with `broadcast_to` first. This keeps every backward rule a
// plain elementwise expression:
//
//   Add:  ga = gy,        gb = gy
//   Sub:  ga = gy,        gb = -gy
//   Mul:  ga = gy * b,    gb = gy * a
//   Div:  ga = gy / b,    gb = -gy * a / b²
//
// Unary functions that need their own output in backward (Sqrt, Exp) keep
// it from forward instead of recomputing it.

use wren_core::{Array, Dispatch, Expect, Function, InTypes, Result, Variable};

use super::call;

fn check_binary(in_types: &InTypes) -> Result<()> {
    in_types.expect(&[
        Expect::size(2),
        Expect::float(0),
        Expect::same_dtype(0, 1),
        Expect::same_shape(0, 1),
    ])
}

fn check_unary(in_types: &InTypes) -> Result<()> {
    in_types.expect(&[Expect::size(1), Expect::float(0)])
}

macro_rules! binary_function {
    ($name:ident, $label:literal, $op:ident, |$a:ident, $b:ident, $gy:ident| $grads:expr) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl Function for $name {
            fn label(&self) -> &'static str {
                $label
            }

            fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
                check_binary(in_types)
            }

            fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
                Ok(vec![inputs[0].$op(&inputs[1])?])
            }

            fn backward(
                &mut self,
                _: &Dispatch,
                inputs: &[Array],
                grad_outputs: &[Array],
            ) -> Result<Vec<Option<Array>>> {
                let ($a, $b, $gy) = (&inputs[0], &inputs[1], &grad_outputs[0]);
                let (ga, gb): (Array, Array) = $grads;
                Ok(vec![Some(ga), Some(gb)])
            }
        }
    };
}

binary_function!(Add, "Add", add, |_a, _b, gy| (gy.clone(), gy.clone()));
binary_function!(Sub, "Sub", sub, |_a, _b, gy| (gy.clone(), gy.neg()?));
binary_function!(Mul, "Mul", mul, |a, b, gy| (gy.mul(b)?, gy.mul(a)?));
binary_function!(Div, "Div", div, |a, b, gy| {
    let ga = gy.div(b)?;
    (ga.clone(), ga.mul(a)?.div(b)?.neg()?)
});

/// `-x`
#[derive(Debug, Clone, Copy, Default)]
pub struct Neg;

impl Function for Neg {
    fn label(&self) -> &'static str {
        "Neg"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        check_unary(in_types)
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        Ok(vec![inputs[0].neg()?])
    }

    fn backward(&mut self, _: &Dispatch, _: &[Array], gy: &[Array]) -> Result<Vec<Option<Array>>> {
        Ok(vec![Some(gy[0].neg()?)])
    }
}

/// `x + value`
#[derive(Debug, Clone, Copy)]
pub struct AddConstant {
    pub value: f64,
}

impl Function for AddConstant {
    fn label(&self) -> &'static str {
        "AddConstant"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        check_unary(in_types)
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        Ok(vec![inputs[0].affine(1.0, self.value)?])
    }

    fn backward(&mut self, _: &Dispatch, _: &[Array], gy: &[Array]) -> Result<Vec<Option<Array>>> {
        Ok(vec![Some(gy[0].clone())])
    }
}

/// `x * value`
#[derive(Debug, Clone, Copy)]
pub struct MulConstant {
    pub value: f64,
}

impl Function for MulConstant {
    fn label(&self) -> &'static str {
        "MulConstant"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        check_unary(in_types)
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        Ok(vec![inputs[0].affine(self.value, 0.0)?])
    }

    fn backward(&mut self, _: &Dispatch, _: &[Array], gy: &[Array]) -> Result<Vec<Option<Array>>> {
        Ok(vec![Some(gy[0].affine(self.value, 0.0)?)])
    }
}

/// `sqrt(x)`; backward is `gy / (2 * y)`.
#[derive(Debug, Default)]
pub struct Sqrt {
    y: Option<Array>,
}

impl Function for Sqrt {
    fn label(&self) -> &'static str {
        "Sqrt"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        check_unary(in_types)
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        let y = inputs[0].sqrt()?;
        self.y = Some(y.clone());
        Ok(vec![y])
    }

    fn backward(&mut self, _: &Dispatch, inputs: &[Array], gy: &[Array]) -> Result<Vec<Option<Array>>> {
        let y = match self.y.take() {
            Some(y) => y,
            None => inputs[0].sqrt()?,
        };
        Ok(vec![Some(gy[0].div(&y.affine(2.0, 0.0)?)?)])
    }
}

/// `x²`
#[derive(Debug, Clone, Copy, Default)]
pub struct Square;

impl Function for Square {
    fn label(&self) -> &'static str {
        "Square"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        check_unary(in_types)
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        Ok(vec![inputs[0].square()?])
    }

    fn backward(&mut self, _: &Dispatch, inputs: &[Array], gy: &[Array]) -> Result<Vec<Option<Array>>> {
        Ok(vec![Some(gy[0].mul(&inputs[0].affine(2.0, 0.0)?)?)])
    }
}

/// `exp(x)`; backward reuses the forward output.
#[derive(Debug, Default)]
pub struct Exp {
    y: Option<Array>,
}

impl Function for Exp {
    fn label(&self) -> &'static str {
        "Exp"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        check_unary(in_types)
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        let y = inputs[0].exp()?;
        self.y = Some(y.clone());
        Ok(vec![y])
    }

    fn backward(&mut self, _: &Dispatch, inputs: &[Array], gy: &[Array]) -> Result<Vec<Option<Array>>> {
        let y = match self.y.take() {
            Some(y) => y,
            None => inputs[0].exp()?,
        };
        Ok(vec![Some(gy[0].mul(&y)?)])
    }
}

/// Natural logarithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct Log;

impl Function for Log {
    fn label(&self) -> &'static str {
        "Log"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        check_unary(in_types)
    }

    fn forward(&mut self, _: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        Ok(vec![inputs[0].log()?])
    }

    fn backward(&mut self, _: &Dispatch, inputs: &[Array], gy: &[Array]) -> Result<Vec<Option<Array>>> {
        Ok(vec![Some(gy[0].div(&inputs[0])?)])
    }
}

pub fn add(a: &Variable, b: &Variable) -> Result<Variable> {
    call(Add, &[a, b])
}

pub fn sub(a: &Variable, b: &Variable) -> Result<Variable> {
    call(Sub, &[a, b])
}

pub fn mul(a: &Variable, b: &Variable) -> Result<Variable> {
    call(Mul, &[a, b])
}

pub fn div(a: &Variable, b: &Variable) -> Result<Variable> {
    call(Div, &[a, b])
}

pub fn neg(x: &Variable) -> Result<Variable> {
    call(Neg, &[x])
}

pub fn add_constant(x: &Variable, value: f64) -> Result<Variable> {
    call(AddConstant { value }, &[x])
}

pub fn mul_constant(x: &Variable, value: f64) -> Result<Variable> {
    call(MulConstant { value }, &[x])
}

pub fn sqrt(x: &Variable) -> Result<Variable> {
    call(Sqrt::default(), &[x])
}

pub fn square(x: &Variable) -> Result<Variable> {
    call(Square, &[x])
}

pub fn exp(x: &Variable) -> Result<Variable> {
    call(Exp::default(), &[x])
}

pub fn log(x: &Variable) -> Result<Variable> {
    call(Log, &[x])
}

#[cfg(test)]
mod tests {
    use super::*;
    use wren_core::gradient_check::{check_backward, CheckOptions};
    use wren_core::{DType, Device, Error, Graph};

    fn arr(data: &[f64]) -> Array {
        Array::from_f64_slice(data, data.len(), DType::F64, Device::Host).unwrap()
    }

    #[test]
    fn binary_gradients_match_numerical() {
        let a = arr(&[0.5, -1.5, 2.0]);
        let b = arr(&[1.25, 0.75, -3.0]);
        let gy = arr(&[1.0, -2.0, 0.5]);
        let opts = CheckOptions::default().with_eps(1e-4);
        check_backward(|| Ok(Box::new(Add)), &[a.clone(), b.clone()], &[gy.clone()], opts).unwrap();
        check_backward(|| Ok(Box::new(Sub)), &[a.clone(), b.clone()], &[gy.clone()], opts).unwrap();
        check_backward(|| Ok(Box::new(Mul)), &[a.clone(), b.clone()], &[gy.clone()], opts).unwrap();
        check_backward(|| Ok(Box::new(Div)), &[a, b], &[gy], opts).unwrap();
    }

    #[test]
    fn unary_gradients_match_numerical() {
        let x = arr(&[0.5, 1.5, 2.0]);
        let gy = arr(&[1.0, -1.0, 0.25]);
        let opts = CheckOptions::default().with_eps(1e-4);
        check_backward(|| Ok(Box::new(Sqrt::default())), &[x.clone()], &[gy.clone()], opts).unwrap();
        check_backward(|| Ok(Box::new(Square)), &[x.clone()], &[gy.clone()], opts).unwrap();
        check_backward(|| Ok(Box::new(Exp::default())), &[x.clone()], &[gy.clone()], opts).unwrap();
        check_backward(|| Ok(Box::new(Log)), &[x.clone()], &[gy.clone()], opts).unwrap();
        check_backward(|| Ok(Box::new(MulConstant { value: -3.0 })), &[x], &[gy], opts).unwrap();
    }

    #[test]
    fn shape_mismatch_is_a_contract_violation() {
        let g = Graph::new();
        let a = g.variable(arr(&[1.0, 2.0]));
        let b = g.variable(arr(&[1.0, 2.0, 3.0]));
        assert!(matches!(add(&a, &b), Err(Error::ContractViolation { .. })));
    }

    #[test]
    fn integer_inputs_are_rejected() {
        let g = Graph::new();
        let t = g.variable(Array::from_vec(vec![1i32, 2], 2, Device::Host).unwrap());
        assert!(matches!(neg(&t), Err(Error::ContractViolation { .. })));
    }
}
