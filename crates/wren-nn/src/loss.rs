// Negative Sampling Loss
//
// For a batch of context vectors x [B, C], target labels t [B] and an output
// embedding W [V, C], each row i scores its positive label against
// `sample_size` negatives drawn from a sampler:
//
//   k_i = (t_i, n_1, ..., n_S)             S = sample_size, m = S + 1
//   f_ij = W[k_ij] · x_i
//   loss_i = softplus(-f_i0) + Σ_{j≥1} softplus(f_ij)
//
// Column 0 is always the positive sample and its term is the one negated.
// Rows whose label is IGNORE_LABEL (-1) contribute nothing to the loss or to
// either gradient.
//
// GRADIENT: with y_j = +1 for the positive column and -1 otherwise,
//
//   g_ij  = -y_j * gy_i / (1 + exp(y_j * f_ij))
//   gx_i  = Σ_j g_ij W[k_ij]
//   gW[k] += g_ij x_i   for every (i, j) with k_ij = k
//
// Host and accelerator take different routes to the same numbers: the host
// walks rows in explicit loops, the accelerator launches one fused kernel per
// stage and scatters gW with `scatter_add_rows`. Samples are drawn once in
// forward and kept, along with the ignore mask (and on the accelerator the
// per-sample dot products), for backward.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use wren_core::{
    Array, DType, Device, Dispatch, Error, Expect, Function, InTypes, Result, Shape, Storage,
    Variable,
};

use crate::functions::graph_of;
use crate::sampler::Sampler;

/// Label value whose rows are excluded from the loss.
pub const IGNORE_LABEL: i32 = -1;

/// How per-row losses are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reduction {
    /// A single scalar: the sum over every row.
    #[default]
    Sum,
    /// One loss per row.
    None,
}

impl FromStr for Reduction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(Reduction::Sum),
            "none" => Ok(Reduction::None),
            other => Err(Error::unsupported(
                "Reduction",
                format!("only 'sum' and 'none' are valid for 'reduce', got '{}'", other),
            )),
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reduction::Sum => write!(f, "sum"),
            Reduction::None => write!(f, "none"),
        }
    }
}

/// `log(1 + exp(f))` without overflow for large |f|.
fn softplus(f: f64) -> f64 {
    if f < 0.0 {
        f.exp().ln_1p()
    } else {
        f + (-f).exp().ln_1p()
    }
}

fn dot(w: &[f64], x: &[f64]) -> f64 {
    w.iter().zip(x).map(|(a, b)| a * b).sum()
}

/// Sampled softmax surrogate: logistic loss of the positive label against
/// drawn negatives.
pub struct NegativeSamplingFunction<S> {
    sampler: S,
    sample_size: usize,
    reduce: Reduction,
    samples: Option<Array>,
    mask: Vec<bool>,
    wx: Option<Storage>,
}

impl<S> fmt::Debug for NegativeSamplingFunction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegativeSamplingFunction")
            .field("sample_size", &self.sample_size)
            .field("reduce", &self.reduce)
            .field("samples", &self.samples)
            .finish()
    }
}

impl<S: Sampler> NegativeSamplingFunction<S> {
    pub fn new(sampler: S, sample_size: usize, reduce: Reduction) -> Self {
        NegativeSamplingFunction {
            sampler,
            sample_size,
            reduce,
            samples: None,
            mask: Vec::new(),
            wx: None,
        }
    }

    /// The `[B, sample_size + 1]` indices drawn by forward, positive first.
    pub fn samples(&self) -> Option<&Array> {
        self.samples.as_ref()
    }

    pub fn reduce(&self) -> Reduction {
        self.reduce
    }

    fn width(&self) -> usize {
        self.sample_size + 1
    }

    /// Draw `[B, m]` indices and overwrite column 0 with the labels.
    fn make_samples(&mut self, t: &[i64], vocab: usize) -> Result<Vec<i64>> {
        let m = self.width();
        let shape = Shape::from((t.len(), m));
        let drawn = self.sampler.draw(&shape)?;
        if drawn.shape() != &shape {
            return Err(Error::msg(format!(
                "NegativeSampling: sampler returned shape {}, requested {}",
                drawn.shape(),
                shape
            )));
        }
        let mut samples = drawn.storage().as_i64().into_owned();
        for (row, &label) in t.iter().enumerate() {
            samples[row * m] = label;
        }
        for (row, k) in samples.chunks(m).enumerate() {
            if !self.mask[row] {
                continue;
            }
            if let Some(&bad) = k.iter().find(|&&k| k < 0 || k as usize >= vocab) {
                return Err(Error::msg(format!(
                    "NegativeSampling: index {} in row {} is out of range for W with {} rows",
                    bad, row, vocab
                )));
            }
        }
        self.samples = Some(Array::from_vec(samples.clone(), shape, Device::Host)?);
        Ok(samples)
    }

    fn forward_host(&self, x: &Array, w: &Array, k: &[i64]) -> Result<Array> {
        let (batch, c) = (x.dims()[0], x.dims()[1]);
        let m = self.width();
        let xs = x.storage().as_f64();
        let ws = w.storage().as_f64();

        let mut loss = vec![0.0; batch];
        for (i, row_loss) in loss.iter_mut().enumerate() {
            if !self.mask[i] {
                continue;
            }
            let xi = &xs[i * c..(i + 1) * c];
            for (j, &kj) in k[i * m..(i + 1) * m].iter().enumerate() {
                let kj = kj as usize;
                let mut f = dot(&ws[kj * c..(kj + 1) * c], xi);
                if j == 0 {
                    f = -f;
                }
                *row_loss += softplus(f);
            }
        }

        match self.reduce {
            Reduction::Sum => {
                let total: f64 = loss.iter().sum();
                Array::from_f64_slice(&[total], (), x.dtype(), x.device())
            }
            Reduction::None => Array::from_f64_slice(&loss, batch, x.dtype(), x.device()),
        }
    }

    fn forward_accel(
        &mut self,
        dispatch: &Dispatch,
        x: &Array,
        w: &Array,
        k: &[i64],
    ) -> Result<Array> {
        let backend = dispatch.backend();
        let (batch, c) = (x.dims()[0], x.dims()[1]);
        let m = self.width();
        let xs = x.storage().as_f64();
        let ws = w.storage().as_f64();
        let (xs, ws, mask) = (xs.as_ref(), ws.as_ref(), self.mask.as_slice());

        let wx = backend.elementwise("negative_sampling_wx", batch * m, x.dtype(), &|i| {
            let row = i / m;
            if !mask[row] {
                return 0.0;
            }
            let kj = k[i] as usize;
            dot(&ws[kj * c..(kj + 1) * c], &xs[row * c..(row + 1) * c])
        })?;
        let wxs = wx.as_f64();
        let wxs = wxs.as_ref();
        let y = backend.elementwise("negative_sampling_forward", batch * m, x.dtype(), &|i| {
            if !mask[i / m] {
                return 0.0;
            }
            let f = if i % m == 0 { -wxs[i] } else { wxs[i] };
            softplus(f)
        })?;
        self.wx = Some(wx.clone());

        let y = Array::from_storage(y, (batch, m), x.device())?;
        match self.reduce {
            Reduction::Sum => y.sum_all(),
            Reduction::None => y.sum(&[1], false),
        }
    }

    fn backward_host(&self, x: &Array, w: &Array, gy: &Array, k: &[i64]) -> Result<(Array, Array)> {
        let (batch, c) = (x.dims()[0], x.dims()[1]);
        let m = self.width();
        let xs = x.storage().as_f64();
        let ws = w.storage().as_f64();
        let gys = gy.storage().as_f64();

        let mut gx = vec![0.0; x.elem_count()];
        let mut gw = vec![0.0; w.elem_count()];
        for i in 0..batch {
            if !self.mask[i] {
                continue;
            }
            let igy = match self.reduce {
                Reduction::Sum => gys[0],
                Reduction::None => gys[i],
            };
            let xi = &xs[i * c..(i + 1) * c];
            let ki = &k[i * m..(i + 1) * m];

            let mut g: Vec<f64> = ki
                .iter()
                .map(|&kj| dot(&ws[kj as usize * c..(kj as usize + 1) * c], xi))
                .collect();
            g[0] = -g[0];
            for gj in g.iter_mut() {
                *gj = igy / (1.0 + (-*gj).exp());
            }
            g[0] = -g[0];

            for (&kj, &gj) in ki.iter().zip(&g) {
                let kj = kj as usize;
                for col in 0..c {
                    gx[i * c + col] += gj * ws[kj * c + col];
                    gw[kj * c + col] += gj * xi[col];
                }
            }
        }

        Ok((
            Array::from_f64_slice(&gx, x.shape().clone(), x.dtype(), x.device())?,
            Array::from_f64_slice(&gw, w.shape().clone(), w.dtype(), w.device())?,
        ))
    }

    fn backward_accel(
        &self,
        dispatch: &Dispatch,
        x: &Array,
        w: &Array,
        gy: &Array,
        k: &[i64],
    ) -> Result<(Array, Array)> {
        let backend = dispatch.backend();
        let (batch, c) = (x.dims()[0], x.dims()[1]);
        let vocab = w.dims()[0];
        let m = self.width();
        let wx = self
            .wx
            .as_ref()
            .ok_or_else(|| Error::msg("NegativeSampling: backward called before forward"))?;
        let (wxs, gys, xs, ws) = (
            wx.as_f64(),
            gy.storage().as_f64(),
            x.storage().as_f64(),
            w.storage().as_f64(),
        );
        let (wxs, gys, xs, ws) = (wxs.as_ref(), gys.as_ref(), xs.as_ref(), ws.as_ref());
        let mask = self.mask.as_slice();
        let reduce = self.reduce;

        let g = backend.elementwise("negative_sampling_calculate_g", batch * m, x.dtype(), &|i| {
            let row = i / m;
            if !mask[row] {
                return 0.0;
            }
            let igy = match reduce {
                Reduction::Sum => gys[0],
                Reduction::None => gys[row],
            };
            let y = if i % m == 0 { 1.0 } else { -1.0 };
            -y * igy / (1.0 + (wxs[i] * y).exp())
        })?;
        let gs = g.as_f64();
        let gs = gs.as_ref();

        let gx = backend.elementwise("negative_sampling_calculate_gx", batch * c, x.dtype(), &|i| {
            let (row, col) = (i / c, i % c);
            if !mask[row] {
                return 0.0;
            }
            (0..m)
                .map(|j| gs[row * m + j] * ws[k[row * m + j] as usize * c + col])
                .sum()
        })?;

        // Row n of `contrib` is g_n * x_{n / m}; masked rows scatter nowhere.
        let contrib = backend.elementwise(
            "negative_sampling_calculate_gw",
            batch * m * c,
            w.dtype(),
            &|i| {
                let (n, col) = (i / c, i % c);
                gs[n] * xs[(n / m) * c + col]
            },
        )?;
        let targets: Vec<i64> = k
            .iter()
            .enumerate()
            .map(|(n, &kn)| if mask[n / m] { kn } else { -1 })
            .collect();
        let gw = backend.scatter_add_rows(vocab, c, &targets, &contrib)?;

        Ok((
            Array::from_storage(gx, x.shape().clone(), x.device())?,
            Array::from_storage(gw, w.shape().clone(), w.device())?,
        ))
    }
}

impl<S: Sampler> Function for NegativeSamplingFunction<S> {
    fn label(&self) -> &'static str {
        "NegativeSampling"
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        in_types.expect(&[
            Expect::size(3),
            Expect::float(0),
            Expect::ndim(0, 2),
            Expect::dtype(1, DType::I32),
            Expect::ndim(1, 1),
            Expect::dim_eq((0, 0), (1, 0)),
            Expect::same_dtype(0, 2),
            Expect::ndim(2, 2),
            Expect::dim_eq((0, 1), (2, 1)),
        ])
    }

    fn forward(&mut self, dispatch: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        let (x, t, w) = (&inputs[0], &inputs[1], &inputs[2]);
        let labels = t.storage().as_i64().into_owned();
        self.mask = labels.iter().map(|&l| l != IGNORE_LABEL as i64).collect();
        let k = self.make_samples(&labels, w.dims()[0])?;

        debug!(
            batch = labels.len(),
            sample_size = self.sample_size,
            reduce = %self.reduce,
            device = %dispatch.device(),
            "negative sampling forward"
        );
        let loss = match dispatch.device() {
            Device::Host => self.forward_host(x, w, &k)?,
            Device::Accelerator => self.forward_accel(dispatch, x, w, &k)?,
        };
        Ok(vec![loss])
    }

    fn backward(
        &mut self,
        dispatch: &Dispatch,
        inputs: &[Array],
        grad_outputs: &[Array],
    ) -> Result<Vec<Option<Array>>> {
        let (x, w, gy) = (&inputs[0], &inputs[2], &grad_outputs[0]);
        let samples = self
            .samples
            .as_ref()
            .ok_or_else(|| Error::msg("NegativeSampling: backward called before forward"))?;
        let k = samples.storage().as_i64();

        let (gx, gw) = match dispatch.device() {
            Device::Host => self.backward_host(x, w, gy, &k)?,
            Device::Accelerator => self.backward_accel(dispatch, x, w, gy, &k)?,
        };
        Ok(vec![Some(gx), None, Some(gw)])
    }
}

/// Negative sampling loss of `x` against labels `t` under embedding `w`.
pub fn negative_sampling<S: Sampler + 'static>(
    x: &Variable,
    t: &Variable,
    w: &Variable,
    sampler: S,
    sample_size: usize,
    reduce: Reduction,
) -> Result<Variable> {
    let graph = graph_of("NegativeSampling", &[x, t, w])?;
    graph.apply_one(
        Box::new(NegativeSamplingFunction::new(sampler, sample_size, reduce)),
        &[x, t, w],
    )
}
