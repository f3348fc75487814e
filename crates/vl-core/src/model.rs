//! Contracts between the launcher, models, data loaders and runners

use crate::device::Device;
use crate::syncbn::SyncBnBackend;
use crate::types::{Batch, Epoch, RunSummary};
use crate::Result;
use std::collections::BTreeMap;
use std::ops::Range;

/// Normalization layer flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormKind {
    /// Per-process batch statistics
    BatchNorm,

    /// Batch statistics reduced across the process group
    SyncBatchNorm { backend: SyncBnBackend },

    LayerNorm,
}

/// A named normalization layer inside a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormLayer {
    pub name: String,
    pub kind: NormKind,
}

impl NormLayer {
    pub fn new(name: impl Into<String>, kind: NormKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Loss and parameter gradients summed over a set of rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gradients {
    /// Sum of per-row losses
    pub loss_sum: f64,

    /// Number of rows contributing to the sums
    pub rows: usize,

    /// Sum of per-row gradients, one entry per parameter
    pub values: Vec<f64>,
}

impl Gradients {
    /// Add another partial result into this one
    pub fn accumulate(&mut self, other: &Gradients) {
        if self.values.len() < other.values.len() {
            self.values.resize(other.values.len(), 0.0);
        }
        for (acc, g) in self.values.iter_mut().zip(&other.values) {
            *acc += g;
        }
        self.loss_sum += other.loss_sum;
        self.rows += other.rows;
    }

    /// Mean loss per row
    pub fn mean_loss(&self) -> Option<f64> {
        (self.rows > 0).then(|| self.loss_sum / self.rows as f64)
    }

    /// Mean gradient per row
    pub fn mean_values(&self) -> Vec<f64> {
        if self.rows == 0 {
            return vec![0.0; self.values.len()];
        }
        let n = self.rows as f64;
        self.values.iter().map(|g| g / n).collect()
    }
}

/// A trainable model built by a pipeline factory
pub trait Model: Send {
    fn name(&self) -> &str;

    fn device(&self) -> Device;

    /// Move parameters to `device`
    fn to_device(&mut self, device: Device);

    fn norm_layers(&self) -> &[NormLayer];

    fn norm_layers_mut(&mut self) -> &mut [NormLayer];

    /// Loss and gradient sums for `rows` of `batch`, scored against the whole batch
    fn forward_backward(&self, batch: &Batch, rows: Range<usize>) -> Result<Gradients>;

    /// Apply the mean of `grads` with learning rate `lr`
    fn step(&mut self, grads: &Gradients, lr: f64) -> Result<()>;

    /// Current parameter values
    fn parameters(&self) -> Vec<f64>;

    /// True when no per-process batch-norm layer remains
    fn is_sync_batchnorm(&self) -> bool {
        let layers = self.norm_layers();
        !layers.iter().any(|l| l.kind == NormKind::BatchNorm)
            && layers
                .iter()
                .any(|l| matches!(l.kind, NormKind::SyncBatchNorm { .. }))
    }
}

/// A source of training or evaluation batches
pub trait DataLoader: Send {
    /// Number of batches per epoch
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of samples per epoch
    fn num_samples(&self) -> usize;

    /// Batches for `epoch`, in iteration order
    fn batches(&self, epoch: Epoch) -> Box<dyn Iterator<Item = Batch> + '_>;
}

/// Loaders keyed by split name (`train`, `val`, ...)
pub type DataLoaders = BTreeMap<String, Box<dyn DataLoader>>;

/// Owner of a training lifecycle
pub trait Runner {
    /// Variant identifier
    fn name(&self) -> &'static str;

    fn model(&self) -> &dyn Model;

    fn loaders(&self) -> &DataLoaders;

    /// Execute the whole training lifecycle
    fn run(&mut self) -> Result<RunSummary>;
}
