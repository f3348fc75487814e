//! Reference CLIP pipeline
//!
//! Scores paired image/text features with a symmetric contrastive (InfoNCE)
//! objective. The only trainable parameter is the temperature, kept in log
//! space as in CLIP.

use crate::config::ModelConfig;
use std::ops::Range;
use vl_core::{Batch, Config, Device, Error, Gradients, Model, NormKind, NormLayer, Result};

/// Upper bound on the logit scale
const MAX_LOGIT_SCALE: f64 = 100.0;

/// Initial temperature
const INIT_TEMPERATURE: f64 = 0.07;

/// Contrastive image-text model
#[derive(Debug, Clone)]
pub struct ClipPipeline {
    name: String,
    embed_dim: usize,
    log_scale: f64,
    device: Device,
    norm_layers: Vec<NormLayer>,
}

impl ClipPipeline {
    pub fn new(cfg: &ModelConfig) -> Self {
        let mut norm_layers: Vec<NormLayer> = (0..cfg.batchnorm_layers)
            .map(|i| NormLayer::new(format!("visual.layer{}.bn", i), NormKind::BatchNorm))
            .collect();
        norm_layers.push(NormLayer::new("text.ln_final", NormKind::LayerNorm));

        Self {
            name: cfg.name.clone(),
            embed_dim: cfg.embed_dim,
            log_scale: (1.0 / INIT_TEMPERATURE).ln(),
            device: Device::Cpu,
            norm_layers,
        }
    }

    /// Pipeline factory
    pub fn from_cfg(cfg: &Config) -> Result<Box<dyn Model>> {
        let model_cfg: ModelConfig = cfg.section("model")?;
        if model_cfg.embed_dim == 0 {
            return Err(Error::InvalidConfig {
                message: "model.embed_dim must be positive".to_string(),
            });
        }
        Ok(Box::new(Self::new(&model_cfg)))
    }

    /// Multiplier applied to cosine similarities
    pub fn logit_scale(&self) -> f64 {
        self.log_scale.exp()
    }

    fn normalized(&self, rows: &[Vec<f32>]) -> Result<Vec<Vec<f64>>> {
        rows.iter()
            .map(|row| {
                if row.len() != self.embed_dim {
                    return Err(Error::Training {
                        message: format!(
                            "feature width {} does not match model.embed_dim {}",
                            row.len(),
                            self.embed_dim
                        ),
                    });
                }
                let norm = row
                    .iter()
                    .map(|&x| f64::from(x) * f64::from(x))
                    .sum::<f64>()
                    .sqrt()
                    .max(1e-12);
                Ok(row.iter().map(|&x| f64::from(x) / norm).collect())
            })
            .collect()
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cross-entropy of `sims * scale` against `target` and its derivative in `scale`
fn softmax_xent(sims: &[f64], target: usize, scale: f64) -> (f64, f64) {
    let max = sims
        .iter()
        .map(|s| s * scale)
        .fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = sims.iter().map(|s| (s * scale - max).exp()).collect();
    let total: f64 = weights.iter().sum();

    let loss = max + total.ln() - sims[target] * scale;
    let expected: f64 = weights
        .iter()
        .zip(sims)
        .map(|(w, s)| w / total * s)
        .sum();
    (loss, expected - sims[target])
}

impl Model for ClipPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> Device {
        self.device
    }

    fn to_device(&mut self, device: Device) {
        self.device = device;
    }

    fn norm_layers(&self) -> &[NormLayer] {
        &self.norm_layers
    }

    fn norm_layers_mut(&mut self) -> &mut [NormLayer] {
        &mut self.norm_layers
    }

    fn forward_backward(&self, batch: &Batch, rows: Range<usize>) -> Result<Gradients> {
        let n = batch.len();
        if batch.texts.len() != n {
            return Err(Error::Training {
                message: format!("{} images paired with {} texts", n, batch.texts.len()),
            });
        }
        if rows.start > rows.end || rows.end > n {
            return Err(Error::Training {
                message: format!("row range {:?} outside batch of {}", rows, n),
            });
        }

        let images = self.normalized(&batch.images)?;
        let texts = self.normalized(&batch.texts)?;
        let scale = self.logit_scale();

        let mut grads = Gradients {
            loss_sum: 0.0,
            rows: rows.len(),
            values: vec![0.0],
        };
        for i in rows {
            let image_to_text: Vec<f64> = texts.iter().map(|t| dot(&images[i], t)).collect();
            let text_to_image: Vec<f64> = images.iter().map(|v| dot(v, &texts[i])).collect();

            let (loss_i, dscale_i) = softmax_xent(&image_to_text, i, scale);
            let (loss_t, dscale_t) = softmax_xent(&text_to_image, i, scale);

            grads.loss_sum += (loss_i + loss_t) / 2.0;
            // Chain rule through scale = exp(log_scale)
            grads.values[0] += scale * (dscale_i + dscale_t) / 2.0;
        }
        Ok(grads)
    }

    fn step(&mut self, grads: &Gradients, lr: f64) -> Result<()> {
        let mean = grads.mean_values();
        let grad = mean.first().copied().unwrap_or(0.0);
        if !grad.is_finite() {
            return Err(Error::Training {
                message: "non-finite temperature gradient".to_string(),
            });
        }
        self.log_scale = (self.log_scale - lr * grad).clamp(0.0, MAX_LOGIT_SCALE.ln());
        Ok(())
    }

    fn parameters(&self) -> Vec<f64> {
        vec![self.log_scale]
    }
}
