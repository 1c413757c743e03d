// NegativeSampling link
//
// Owns the output embedding W [V, in_size] and a WalkerAlias sampler over
// the unigram distribution raised to `power` (0.75 is the usual choice, which
// flattens the distribution so rare words are drawn more often than their
// raw frequency).
//
// Each `forward` builds a fresh NegativeSamplingFunction that shares the
// link's sampler, so successive calls continue one random stream.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use wren_core::{DType, Error, Graph, Result, Variable};

use crate::init::Initializer;
use crate::loss::{negative_sampling, Reduction};
use crate::sampler::WalkerAlias;

/// Negative sampling loss with a learnable output embedding.
#[derive(Debug, Clone)]
pub struct NegativeSampling {
    w: Variable,
    sampler: Rc<RefCell<WalkerAlias>>,
    probs: Vec<f64>,
    sample_size: usize,
    reduce: Reduction,
}

impl NegativeSampling {
    /// `counts[k]` is the frequency of label `k`; W has one row per label
    /// and starts at zero.
    pub fn new(
        graph: &Graph,
        in_size: usize,
        counts: &[f64],
        sample_size: usize,
        power: f64,
        reduce: Reduction,
    ) -> Result<Self> {
        if counts.is_empty() {
            return Err(Error::unsupported("NegativeSampling", "counts are empty"));
        }
        let probs: Vec<f64> = counts.iter().map(|c| c.powf(power)).collect();
        let sampler = WalkerAlias::new(&probs)?;
        let device = graph.config().default_device;
        let w = graph.variable(Initializer::Zeros.init(
            (counts.len(), in_size),
            DType::F32,
            device,
            &mut StdRng::seed_from_u64(0),
        )?);
        w.set_name("W");
        Ok(NegativeSampling {
            w,
            sampler: Rc::new(RefCell::new(sampler)),
            probs,
            sample_size,
            reduce,
        })
    }

    /// Rebuild the sampler with a fixed seed.
    pub fn with_seed(mut self, seed: u64) -> Result<Self> {
        self.sampler = Rc::new(RefCell::new(WalkerAlias::with_seed(&self.probs, seed)?));
        Ok(self)
    }

    /// Re-initialise W, keeping its shape.
    pub fn with_initializer(self, init: Initializer, dtype: DType, seed: u64) -> Result<Self> {
        let current = self.w.array()?;
        let mut rng = StdRng::seed_from_u64(seed);
        self.w
            .set_data(init.init(current.shape().clone(), dtype, current.device(), &mut rng)?);
        Ok(self)
    }

    pub fn w(&self) -> &Variable {
        &self.w
    }

    pub fn sampler(&self) -> Rc<RefCell<WalkerAlias>> {
        Rc::clone(&self.sampler)
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn reduce(&self) -> Reduction {
        self.reduce
    }

    /// Loss of contexts `x` [B, in_size] against labels `t` [B].
    pub fn forward(&self, x: &Variable, t: &Variable) -> Result<Variable> {
        negative_sampling(
            x,
            t,
            &self.w,
            Rc::clone(&self.sampler),
            self.sample_size,
            self.reduce,
        )
    }

    pub fn parameters(&self) -> Vec<Variable> {
        vec![self.w.clone()]
    }

    pub fn cleargrads(&self) {
        self.w.cleargrad();
    }
}
