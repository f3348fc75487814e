//! Core type definitions shared by tasks, models and runners

use serde::{Deserialize, Serialize};

/// Training step and epoch counters
pub type Step = u64;
pub type Epoch = u64;

/// A batch of paired image/text feature vectors
///
/// Row `i` of `images` and row `i` of `texts` describe the same sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub images: Vec<Vec<f32>>,
    pub texts: Vec<Vec<f32>>,
}

impl Batch {
    pub fn new(images: Vec<Vec<f32>>, texts: Vec<Vec<f32>>) -> Self {
        debug_assert_eq!(images.len(), texts.len());
        Self { images, texts }
    }

    /// Number of paired samples
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Training progress snapshot reported by runners
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingProgress {
    /// Current step
    pub step: Step,

    /// Current epoch
    pub epoch: Epoch,

    /// Total steps
    pub total_steps: Option<Step>,

    /// Training loss (if available)
    pub loss: Option<f64>,

    /// Learning rate
    pub learning_rate: Option<f64>,

    /// Samples processed per second
    pub samples_per_second: Option<f64>,
}

/// Outcome of a complete runner invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Name of the runner variant that executed
    pub runner: String,

    /// Epochs completed
    pub epochs: Epoch,

    /// Optimizer steps taken
    pub steps: Step,

    /// Mean loss of the last training batch
    pub final_loss: Option<f64>,

    /// Mean validation loss after the last epoch
    pub val_loss: Option<f64>,
}
