//! CLIP contrastive training task
//!
//! This crate provides:
//! - **Task configuration**: defaults and invariant checks
//! - **Reference pipeline**: a temperature-only contrastive model
//! - **Synthetic data**: deterministic paired-feature loaders
//! - **Runners**: full-batch and batched-subset gradient sharing
//! - **Launcher**: argument parsing and registry-driven orchestration
//!
//! # Example
//!
//! ```ignore
//! use clip_task::{launch, Registries, TrainArgs};
//! use vl_core::DistEnv;
//!
//! let args = TrainArgs { cfg: "configs/clip.yaml".into(), local_rank: 0, overrides: vec![] };
//! let summary = launch(&args, &Registries::with_defaults()?, &DistEnv::single())?;
//! ```

pub mod config;
pub mod data;
pub mod launch;
pub mod model;
pub mod runner;

pub use config::{task_cfg_init_fn, update_clip_config};
pub use data::SyntheticClipLoader;
pub use launch::{launch, prepare, LaunchPlan, Registries, TrainArgs, DATALOADER, PIPELINE};
pub use model::ClipPipeline;
pub use runner::{ClipBsgsRunner, ClipRunner, RunnerKind};
