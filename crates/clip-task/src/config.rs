//! CLIP task defaults and typed config sections

use serde::Deserialize;
use serde_json::json;
use vl_core::{Config, Error, Result};

/// Default configuration of the CLIP task
pub fn task_cfg_init_fn() -> Config {
    let defaults = json!({
        "seed": 42,
        "device": { "name": "cuda" },
        "dist": { "name": "torch", "backend": "nccl" },
        "model": {
            "name": "clip",
            "syncbn": false,
            "embed_dim": 64,
            "batchnorm_layers": 4,
        },
        "data": {
            "name": "synthetic_clip",
            "batch_size": 32,
            "train_samples": 256,
            "val_samples": 64,
            "noise": 0.1,
        },
        "optim": { "lr": 0.5 },
        "runner": {
            "name": "clip",
            "epochs": 1,
            "log_interval": 10,
            "output_dir": "",
            "bsgs": { "subset_size": 8 },
        },
    });
    // A literal mapping always forms a valid root
    Config::from_value(defaults).unwrap_or_default()
}

/// Check task invariants of the merged config
///
/// Selector strings are left untouched: `model.name`, `data.name`,
/// `dist.name` and `runner.name` are matched exactly.
pub fn update_clip_config(cfg: &mut Config) -> Result<()> {
    if cfg.get_u64("data.batch_size")? == 0 {
        return Err(Error::InvalidConfig {
            message: "data.batch_size must be positive".to_string(),
        });
    }
    if cfg.get_u64("runner.bsgs.subset_size")? == 0 {
        return Err(Error::InvalidConfig {
            message: "runner.bsgs.subset_size must be positive".to_string(),
        });
    }
    Ok(())
}

/// `model` section
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub syncbn: bool,
    pub embed_dim: usize,
    pub batchnorm_layers: usize,
}

/// `data` section
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub name: String,
    pub batch_size: usize,
    pub train_samples: usize,
    pub val_samples: usize,
    pub noise: f32,
}

/// `optim` section
#[derive(Debug, Clone, Deserialize)]
pub struct OptimConfig {
    pub lr: f64,
}

/// `runner.bsgs` section
#[derive(Debug, Clone, Deserialize)]
pub struct BsgsConfig {
    pub subset_size: usize,
}

/// `runner` section
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    pub name: String,
    pub epochs: u64,
    pub log_interval: u64,
    pub output_dir: String,
    pub bsgs: BsgsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_deserialize() {
        let cfg = task_cfg_init_fn();
        let model: ModelConfig = cfg.section("model").unwrap();
        let data: DataConfig = cfg.section("data").unwrap();
        let runner: RunnerConfig = cfg.section("runner").unwrap();

        assert_eq!(model.name, "clip");
        assert!(!model.syncbn);
        assert_eq!(data.name, "synthetic_clip");
        assert_eq!(runner.name, "clip");
        assert_eq!(runner.bsgs.subset_size, 8);
        assert_eq!(cfg.get_str("dist.name").unwrap(), "torch");
    }

    #[test]
    fn test_selectors_kept_verbatim() {
        let mut cfg = task_cfg_init_fn();
        cfg.merge_from_overrides(&["runner.name", "CLIP_BSGS", "dist.name", "Torch"])
            .unwrap();
        update_clip_config(&mut cfg).unwrap();

        assert_eq!(cfg.get_str("runner.name").unwrap(), "CLIP_BSGS");
        assert_eq!(cfg.get_str("dist.name").unwrap(), "Torch");
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut cfg = task_cfg_init_fn();
        cfg.merge_from_overrides(&["runner.bsgs.subset_size", "0"])
            .unwrap();
        assert!(matches!(
            update_clip_config(&mut cfg),
            Err(Error::InvalidConfig { .. })
        ));

        let mut cfg = task_cfg_init_fn();
        cfg.merge_from_overrides(&["data.batch_size=0"]).unwrap();
        assert!(update_clip_config(&mut cfg).is_err());
    }
}
