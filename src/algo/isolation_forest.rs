//! Isolation Forest for univariate outlier scoring
//!
//! The forest partitions a training sample with repeated random cuts. Values
//! that separate from the bulk after few cuts (short isolation paths) score
//! close to 1.0; values buried in dense regions score near or below 0.5.
//!
//! Every node remembers the value range of the training points it holds.
//! A scored value that falls outside a node's range (widened by a relative
//! hull tolerance) is treated as isolated at that node, so values far from
//! a zero-spread sample still separate immediately.
//!
//! Reference: "Isolation Forest" (Liu, Ting, Zhou, ICDM 2008)

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Euler-Mascheroni constant, used by the harmonic number approximation.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Largest ensemble a forest will grow.
pub const MAX_TREES: usize = 1000;

/// Capability the outlier model needs from its scoring algorithm.
///
/// `fit` always rebuilds from scratch; `score` returns higher values for
/// more anomalous inputs, in `[0, 1]`.
pub trait OutlierScorer: Send {
    fn name(&self) -> &str;
    fn fit(&mut self, snapshot: &[f64]);
    fn score(&self, value: f64) -> f64;
}

#[derive(Clone, Debug)]
enum IsoNode {
    Internal {
        cut: f64,
        lo: f64,
        hi: f64,
        left: Box<IsoNode>,
        right: Box<IsoNode>,
    },
    Leaf {
        lo: f64,
        hi: f64,
        size: usize,
    },
}

impl IsoNode {
    fn bounds(&self) -> (f64, f64) {
        match self {
            IsoNode::Internal { lo, hi, .. } | IsoNode::Leaf { lo, hi, .. } => (*lo, *hi),
        }
    }
}

#[derive(Clone, Debug)]
struct IsoTree {
    root: IsoNode,
}

impl IsoTree {
    fn grow(sample: &mut [f64], depth_limit: usize, rng: &mut StdRng) -> Self {
        Self {
            root: grow_recursive(sample, 0, depth_limit, rng),
        }
    }

    /// Length of the path `value` takes before it is isolated.
    fn path_length(&self, value: f64, tolerance: f64) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;

        loop {
            let (lo, hi) = node.bounds();
            if outside_hull(value, lo, hi, tolerance) {
                return depth;
            }

            match node {
                IsoNode::Leaf { size, .. } => return depth + average_path_length(*size),
                IsoNode::Internal {
                    cut, left, right, ..
                } => {
                    node = if value <= *cut { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }

    fn isolates_at_root(&self, value: f64, tolerance: f64) -> bool {
        let (lo, hi) = self.root.bounds();
        outside_hull(value, lo, hi, tolerance)
    }
}

fn grow_recursive(values: &mut [f64], depth: usize, depth_limit: usize, rng: &mut StdRng) -> IsoNode {
    let (lo, hi) = value_range(values);

    if values.len() <= 1 || depth >= depth_limit || hi <= lo || !(hi - lo).is_finite() {
        return IsoNode::Leaf {
            lo,
            hi,
            size: values.len(),
        };
    }

    // cut lands in [lo, hi); `<=` keeps both sides non-empty
    let cut = rng.random_range(lo..hi);

    let mut mid = 0;
    for i in 0..values.len() {
        if values[i] <= cut {
            values.swap(i, mid);
            mid += 1;
        }
    }
    let (left, right) = values.split_at_mut(mid);

    IsoNode::Internal {
        cut,
        lo,
        hi,
        left: Box::new(grow_recursive(left, depth + 1, depth_limit, rng)),
        right: Box::new(grow_recursive(right, depth + 1, depth_limit, rng)),
    }
}

fn value_range(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

fn outside_hull(value: f64, lo: f64, hi: f64, tolerance: f64) -> bool {
    let margin = tolerance * lo.abs().max(hi.abs()).max(1.0);
    value < lo - margin || value > hi + margin
}

/// Average path length of an unsuccessful BST search over `n` points, c(n).
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Ensemble of isolation trees over scalar values.
pub struct IsolationForest {
    trees: Vec<IsoTree>,
    num_trees: usize,
    max_samples: usize,
    /// Sample size each tree was grown on during the last fit
    sample_size: usize,
    hull_tolerance: f64,
    rng: StdRng,
}

impl IsolationForest {
    /// Create an unfitted forest
    ///
    /// # Arguments
    /// * `num_trees` - Number of trees in the ensemble (typically 50-200)
    /// * `max_samples` - Subsample size per tree (typically 256)
    /// * `hull_tolerance` - Relative widening of node ranges before a value counts as outside
    /// * `seed` - Fixed seed for reproducible forests; `None` seeds from the OS
    pub fn new(num_trees: usize, max_samples: usize, hull_tolerance: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };

        Self {
            trees: Vec::new(),
            num_trees: num_trees.clamp(1, MAX_TREES),
            max_samples: max_samples.max(2),
            sample_size: 0,
            hull_tolerance: hull_tolerance.max(0.0),
            rng,
        }
    }

    pub fn num_trees(&self) -> usize {
        self.num_trees
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Mean isolation path length of `value` across the forest.
    pub fn mean_path_length(&self, value: f64) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .trees
            .iter()
            .map(|tree| tree.path_length(value, self.hull_tolerance))
            .sum();
        total / self.trees.len() as f64
    }
}

impl OutlierScorer for IsolationForest {
    fn name(&self) -> &str {
        "IsolationForest"
    }

    fn fit(&mut self, snapshot: &[f64]) {
        self.trees.clear();
        if snapshot.is_empty() {
            self.sample_size = 0;
            return;
        }

        let sample_size = snapshot.len().min(self.max_samples);
        let depth_limit = (sample_size as f64).log2().ceil() as usize;
        let mut sample = vec![0.0; sample_size];

        for _ in 0..self.num_trees {
            if sample_size == snapshot.len() {
                sample.copy_from_slice(snapshot);
            } else {
                let picks = rand::seq::index::sample(&mut self.rng, snapshot.len(), sample_size);
                for (slot, idx) in sample.iter_mut().zip(picks.iter()) {
                    *slot = snapshot[idx];
                }
            }
            self.trees.push(IsoTree::grow(&mut sample, depth_limit, &mut self.rng));
        }

        self.sample_size = sample_size;
    }

    fn score(&self, value: f64) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }

        let norm = average_path_length(self.sample_size);
        if norm <= 0.0 {
            // single-point trees: only hull membership carries information
            let isolated = self
                .trees
                .iter()
                .any(|tree| tree.isolates_at_root(value, self.hull_tolerance));
            return if isolated { 1.0 } else { 0.5 };
        }

        2f64.powf(-self.mean_path_length(value) / norm)
    }
}
