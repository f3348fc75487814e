//! Training runners
//!
//! [`ClipRunner`] computes each batch's gradient in one pass.
//! [`ClipBsgsRunner`] (batched-subset gradient sharing) walks the batch in
//! row subsets, scoring each subset against the whole batch and accumulating
//! the gradient before a single optimizer step, so peak work per pass is
//! bounded by the subset size while the objective stays the full-batch one.

use crate::config::{OptimConfig, RunnerConfig};
use std::time::Instant;
use tracing::{info, warn};
use vl_core::{
    Batch, Config, DataLoader, DataLoaders, Epoch, Error, Gradients, Model, Result, RunSummary,
    Runner, Step, TrainingProgress,
};

/// Runner variant selected by `runner.name`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    Clip,
    ClipBsgs,
}

impl RunnerKind {
    /// `clip_bsgs` selects subset gradient sharing; everything else is the default
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some("clip_bsgs") => RunnerKind::ClipBsgs,
            _ => RunnerKind::Clip,
        }
    }

    pub fn from_cfg(cfg: &Config) -> Self {
        Self::from_name(cfg.get("runner.name").and_then(|v| v.as_str()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerKind::Clip => "clip",
            RunnerKind::ClipBsgs => "clip_bsgs",
        }
    }
}

/// Construct the runner for `kind`
pub fn build_runner(
    kind: RunnerKind,
    cfg: &Config,
    loaders: DataLoaders,
    model: Box<dyn Model>,
) -> Result<Box<dyn Runner>> {
    Ok(match kind {
        RunnerKind::Clip => Box::new(ClipRunner::new(cfg, loaders, model)?),
        RunnerKind::ClipBsgs => Box::new(ClipBsgsRunner::new(cfg, loaders, model)?),
    })
}

/// State shared by both runner variants
struct TrainLoop {
    epochs: Epoch,
    log_interval: u64,
    lr: f64,
    loaders: DataLoaders,
    model: Box<dyn Model>,
}

impl TrainLoop {
    fn new(cfg: &Config, loaders: DataLoaders, model: Box<dyn Model>) -> Result<Self> {
        let runner: RunnerConfig = cfg.section("runner")?;
        let optim: OptimConfig = cfg.section("optim")?;
        Ok(Self {
            epochs: runner.epochs,
            log_interval: runner.log_interval,
            lr: optim.lr,
            loaders,
            model,
        })
    }

    fn run<F>(&mut self, name: &'static str, batch_grads: F) -> Result<RunSummary>
    where
        F: Fn(&dyn Model, &Batch) -> Result<Gradients>,
    {
        let train = self.loaders.get("train").ok_or_else(|| Error::InvalidConfig {
            message: "data loaders provide no `train` split".to_string(),
        })?;

        let mut progress = TrainingProgress {
            total_steps: Some(total_steps(self.epochs, train.len())),
            learning_rate: Some(self.lr),
            ..TrainingProgress::default()
        };
        let mut val_loss = None;

        info!(
            runner = name,
            model = self.model.name(),
            device = %self.model.device(),
            epochs = self.epochs,
            batches_per_epoch = train.len(),
            "Starting training"
        );

        for epoch in 0..self.epochs {
            progress.epoch = epoch;
            let started = Instant::now();
            let mut samples = 0usize;

            for batch in train.batches(epoch) {
                if batch.is_empty() {
                    continue;
                }
                let grads = batch_grads(self.model.as_ref(), &batch)?;
                self.model.step(&grads, self.lr)?;

                samples += batch.len();
                progress.step += 1;
                progress.loss = grads.mean_loss();

                if self.log_interval > 0 && progress.step % self.log_interval == 0 {
                    info!(
                        step = progress.step,
                        epoch,
                        loss = progress.loss.unwrap_or_default(),
                        "Training step"
                    );
                }
            }

            let elapsed = started.elapsed().as_secs_f64();
            progress.samples_per_second = (elapsed > 0.0).then(|| samples as f64 / elapsed);

            if let Some(val) = self.loaders.get("val") {
                val_loss = evaluate(self.model.as_ref(), &**val, epoch)?;
            }

            info!(
                epoch,
                step = progress.step,
                loss = progress.loss.unwrap_or_default(),
                val_loss = val_loss.unwrap_or_default(),
                samples_per_second = progress.samples_per_second.unwrap_or_default(),
                "Epoch finished"
            );
        }

        if progress.step == 0 {
            warn!(runner = name, "Training finished without any optimizer step");
        }

        Ok(RunSummary {
            runner: name.to_string(),
            epochs: self.epochs,
            steps: progress.step,
            final_loss: progress.loss,
            val_loss,
        })
    }
}

/// Planned optimizer steps, saturating for huge epoch counts
fn total_steps(epochs: Epoch, batches_per_epoch: usize) -> Step {
    epochs.saturating_mul(batches_per_epoch as Step)
}

/// Mean full-batch loss over a loader
fn evaluate(model: &dyn Model, loader: &dyn DataLoader, epoch: Epoch) -> Result<Option<f64>> {
    let mut total = Gradients::default();
    for batch in loader.batches(epoch) {
        total.accumulate(&model.forward_backward(&batch, 0..batch.len())?);
    }
    Ok(total.mean_loss())
}

/// Default runner: one forward/backward pass per batch
pub struct ClipRunner {
    inner: TrainLoop,
}

impl ClipRunner {
    pub fn new(cfg: &Config, loaders: DataLoaders, model: Box<dyn Model>) -> Result<Self> {
        Ok(Self {
            inner: TrainLoop::new(cfg, loaders, model)?,
        })
    }
}

impl Runner for ClipRunner {
    fn name(&self) -> &'static str {
        RunnerKind::Clip.as_str()
    }

    fn model(&self) -> &dyn Model {
        self.inner.model.as_ref()
    }

    fn loaders(&self) -> &DataLoaders {
        &self.inner.loaders
    }

    fn run(&mut self) -> Result<RunSummary> {
        let name = self.name();
        self.inner.run(name, |model, batch| {
            model.forward_backward(batch, 0..batch.len())
        })
    }
}

/// Batched-subset gradient sharing runner
pub struct ClipBsgsRunner {
    inner: TrainLoop,
    subset_size: usize,
}

impl ClipBsgsRunner {
    pub fn new(cfg: &Config, loaders: DataLoaders, model: Box<dyn Model>) -> Result<Self> {
        let runner: RunnerConfig = cfg.section("runner")?;
        if runner.bsgs.subset_size == 0 {
            return Err(Error::InvalidConfig {
                message: "runner.bsgs.subset_size must be positive".to_string(),
            });
        }
        Ok(Self {
            inner: TrainLoop::new(cfg, loaders, model)?,
            subset_size: runner.bsgs.subset_size,
        })
    }

    pub fn subset_size(&self) -> usize {
        self.subset_size
    }
}

impl Runner for ClipBsgsRunner {
    fn name(&self) -> &'static str {
        RunnerKind::ClipBsgs.as_str()
    }

    fn model(&self) -> &dyn Model {
        self.inner.model.as_ref()
    }

    fn loaders(&self) -> &DataLoaders {
        &self.inner.loaders
    }

    fn run(&mut self) -> Result<RunSummary> {
        let name = self.name();
        let subset = self.subset_size;
        self.inner.run(name, |model, batch| {
            let mut shared = Gradients::default();
            let mut start = 0;
            while start < batch.len() {
                let end = (start + subset).min(batch.len());
                shared.accumulate(&model.forward_backward(batch, start..end)?);
                start = end;
            }
            Ok(shared)
        })
    }
}
