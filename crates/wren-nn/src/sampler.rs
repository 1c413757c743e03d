// Index samplers
//
// A `Sampler` draws an I64 array of indices of a requested shape. Negative
// sampling asks its sampler once per forward call; the drawn indices are
// kept by the Function so backward never samples again.
//
// WalkerAlias implements Walker's alias method: after an O(n log n) table
// construction each draw costs one uniform number and one comparison.
//
// TABLE CONSTRUCTION (n probabilities, normalized to sum 1):
//
//   visit (p_i, i) in ascending order of p_i, scaled to q = p_i * n
//     while q > 1 and an earlier bucket is still open:
//       give the open bucket's upper half to i, q -= 1 - threshold[open]
//     open a new bucket: threshold = q, lower half = i
//
// DRAW: pb = u * n with u ~ U[0, 1), idx = floor(pb), pick the upper half of
// bucket idx if threshold[idx] < pb - idx, else the lower half.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use wren_core::{Array, Device, Error, Result, Shape};

/// Source of index arrays for sampling-based losses.
pub trait Sampler {
    /// Draw a host `I64` array of `shape`.
    fn draw(&mut self, shape: &Shape) -> Result<Array>;
}

impl<S: Sampler + ?Sized> Sampler for Rc<RefCell<S>> {
    fn draw(&mut self, shape: &Shape) -> Result<Array> {
        self.borrow_mut().draw(shape)
    }
}

impl<S: Sampler + ?Sized> Sampler for Box<S> {
    fn draw(&mut self, shape: &Shape) -> Result<Array> {
        (**self).draw(shape)
    }
}

/// Walker's alias method over a discrete distribution.
#[derive(Debug, Clone)]
pub struct WalkerAlias {
    threshold: Vec<f64>,
    values: Vec<i64>,
    rng: StdRng,
}

impl WalkerAlias {
    /// Build the alias table for `probs` (need not be normalized).
    pub fn new(probs: &[f64]) -> Result<Self> {
        Self::with_rng(probs, StdRng::from_entropy())
    }

    /// Same table, with a deterministic generator.
    pub fn with_seed(probs: &[f64], seed: u64) -> Result<Self> {
        Self::with_rng(probs, StdRng::seed_from_u64(seed))
    }

    fn with_rng(probs: &[f64], rng: StdRng) -> Result<Self> {
        let n = probs.len();
        if n == 0 {
            return Err(Error::unsupported("WalkerAlias", "probabilities are empty"));
        }
        if let Some(p) = probs.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(Error::unsupported(
                "WalkerAlias",
                format!("probabilities must be finite and non-negative, got {}", p),
            ));
        }
        let total: f64 = probs.iter().sum();
        if total <= 0.0 {
            return Err(Error::unsupported("WalkerAlias", "probabilities sum to zero"));
        }

        let mut pairs: Vec<(f64, usize)> = probs
            .iter()
            .enumerate()
            .map(|(i, &p)| (p / total, i))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut threshold = vec![0.0; n];
        let mut values = vec![0i64; 2 * n];
        let (mut il, mut ir) = (0, 0);
        for (prob, i) in pairs {
            let mut p = prob * n as f64;
            while p > 1.0 && ir < il {
                values[ir * 2 + 1] = i as i64;
                p -= 1.0 - threshold[ir];
                ir += 1;
            }
            threshold[il] = p;
            values[il * 2] = i as i64;
            il += 1;
        }
        // Buckets still open keep their own index on both halves.
        for i in ir..n {
            values[i * 2 + 1] = values[i * 2];
        }

        Ok(WalkerAlias {
            threshold,
            values,
            rng,
        })
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.threshold.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threshold.is_empty()
    }

    /// Draw `shape.elem_count()` indices.
    pub fn sample(&mut self, shape: impl Into<Shape>) -> Result<Array> {
        let shape = shape.into();
        let n = self.threshold.len();
        let data: Vec<i64> = (0..shape.elem_count())
            .map(|_| {
                let pb = self.rng.gen::<f64>() * n as f64;
                let idx = (pb as usize).min(n - 1);
                let right = self.threshold[idx] < pb - idx as f64;
                self.values[2 * idx + right as usize]
            })
            .collect();
        Array::from_vec(data, shape, Device::Host)
    }
}

impl Sampler for WalkerAlias {
    fn draw(&mut self, shape: &Shape) -> Result<Array> {
        self.sample(shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_tables() {
        for probs in [&[][..], &[0.5, -0.1][..], &[0.0, 0.0][..], &[f64::NAN][..]] {
            let err = WalkerAlias::new(probs).unwrap_err();
            assert!(matches!(err, Error::UnsupportedConfiguration { .. }));
        }
    }

    #[test]
    fn zero_probability_never_drawn() {
        let mut w = WalkerAlias::with_seed(&[0.0, 1.0, 0.0, 3.0], 7).unwrap();
        let draws = w.sample(1000).unwrap().to_vec::<i64>().unwrap();
        assert!(draws.iter().all(|&d| d == 1 || d == 3));
    }

    #[test]
    fn same_seed_same_draws() {
        let probs = [0.1, 0.2, 0.3, 0.4];
        let mut a = WalkerAlias::with_seed(&probs, 42).unwrap();
        let mut b = WalkerAlias::with_seed(&probs, 42).unwrap();
        let sa = a.draw(&Shape::from((4, 5))).unwrap();
        let sb = b.draw(&Shape::from((4, 5))).unwrap();
        assert_eq!(sa.dims(), &[4, 5]);
        assert_eq!(sa.to_vec::<i64>().unwrap(), sb.to_vec::<i64>().unwrap());
    }

    #[test]
    fn shared_sampler_advances_once() {
        let shared = Rc::new(RefCell::new(WalkerAlias::with_seed(&[1.0, 1.0], 0).unwrap()));
        let mut handle = Rc::clone(&shared);
        let mut fresh = WalkerAlias::with_seed(&[1.0, 1.0], 0).unwrap();
        let first = handle.draw(&Shape::from(8)).unwrap();
        assert_eq!(
            first.to_vec::<i64>().unwrap(),
            fresh.sample(8).unwrap().to_vec::<i64>().unwrap()
        );
        let second = shared.borrow_mut().sample(8).unwrap();
        assert_eq!(
            second.to_vec::<i64>().unwrap(),
            fresh.sample(8).unwrap().to_vec::<i64>().unwrap()
        );
    }
}
