// Parameter initialization
//
// Standalone functions that build initial parameter arrays for links.
// Random initializers take the generator explicitly, so a link seeded with
// `with_seed` is reproducible end to end.
//
//   constant(shape, val)             all elements = val
//   zeros(shape) / ones(shape)
//   uniform(shape, low, high, rng)   U(low, high)
//   normal(shape, mean, std, rng)    N(mean, std)
//   xavier_uniform(shape, gain, rng) Glorot uniform
//
// `Initializer` names one of these for links that let the caller choose.

use rand::distributions::Uniform;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use wren_core::{Array, DType, Device, Error, Result, Shape};

/// Compute (fan_in, fan_out) from a shape.
///
/// - 1-D: fan_in = fan_out = dims[0]
/// - 2-D: fan_in = dims[1], fan_out = dims[0]
fn compute_fans(shape: &Shape) -> (f64, f64) {
    let dims = shape.dims();
    match dims.len() {
        0 => (1.0, 1.0),
        1 => (dims[0] as f64, dims[0] as f64),
        _ => {
            let receptive_field: usize = dims[2..].iter().product();
            (
                (dims[1] * receptive_field) as f64,
                (dims[0] * receptive_field) as f64,
            )
        }
    }
}

pub fn constant(shape: impl Into<Shape>, val: f64, dtype: DType, device: Device) -> Result<Array> {
    Array::full(shape, val, dtype, device)
}

pub fn zeros(shape: impl Into<Shape>, dtype: DType, device: Device) -> Result<Array> {
    constant(shape, 0.0, dtype, device)
}

pub fn ones(shape: impl Into<Shape>, dtype: DType, device: Device) -> Result<Array> {
    constant(shape, 1.0, dtype, device)
}

/// U(low, high)
pub fn uniform<R: Rng + ?Sized>(
    shape: impl Into<Shape>,
    low: f64,
    high: f64,
    dtype: DType,
    device: Device,
    rng: &mut R,
) -> Result<Array> {
    if low.partial_cmp(&high) != Some(std::cmp::Ordering::Less) {
        return Err(Error::unsupported(
            "init::uniform",
            format!("low ({}) must be below high ({})", low, high),
        ));
    }
    let shape = shape.into();
    let dist = Uniform::new(low, high);
    let data: Vec<f64> = (0..shape.elem_count()).map(|_| dist.sample(rng)).collect();
    Array::from_f64_slice(&data, shape, dtype, device)
}

/// N(mean, std)
pub fn normal<R: Rng + ?Sized>(
    shape: impl Into<Shape>,
    mean: f64,
    std: f64,
    dtype: DType,
    device: Device,
    rng: &mut R,
) -> Result<Array> {
    let dist = Normal::new(mean, std)
        .map_err(|e| Error::unsupported("init::normal", e.to_string()))?;
    let shape = shape.into();
    let data: Vec<f64> = (0..shape.elem_count()).map(|_| dist.sample(rng)).collect();
    Array::from_f64_slice(&data, shape, dtype, device)
}

/// Glorot uniform: U(-a, a) with `a = gain * sqrt(6 / (fan_in + fan_out))`.
pub fn xavier_uniform<R: Rng + ?Sized>(
    shape: impl Into<Shape>,
    gain: f64,
    dtype: DType,
    device: Device,
    rng: &mut R,
) -> Result<Array> {
    let shape = shape.into();
    let (fan_in, fan_out) = compute_fans(&shape);
    let a = gain * (6.0 / (fan_in + fan_out)).sqrt();
    uniform(shape, -a, a, dtype, device, rng)
}

/// Initial values for a link parameter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Initializer {
    #[default]
    Zeros,
    Constant(f64),
    Normal { mean: f64, std: f64 },
    XavierUniform { gain: f64 },
}

impl Initializer {
    pub fn init<R: Rng + ?Sized>(
        self,
        shape: impl Into<Shape>,
        dtype: DType,
        device: Device,
        rng: &mut R,
    ) -> Result<Array> {
        match self {
            Initializer::Zeros => zeros(shape, dtype, device),
            Initializer::Constant(val) => constant(shape, val, dtype, device),
            Initializer::Normal { mean, std } => normal(shape, mean, std, dtype, device, rng),
            Initializer::XavierUniform { gain } => {
                xavier_uniform(shape, gain, dtype, device, rng)
            }
        }
    }
}
