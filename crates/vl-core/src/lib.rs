//! Vision-language training core
//!
//! Provides the layered configuration, the launch environment, device
//! initialization, name-based registries and the model / loader / runner
//! contracts that task crates build on.

pub mod config;
pub mod device;
pub mod env;
pub mod error;
pub mod model;
pub mod registry;
pub mod syncbn;
pub mod types;

pub use config::{update_cfg, Config, InitFn, PreprocessFn};
pub use device::{init_device, Device, DistContext, DistEnv};
pub use env::{Capabilities, Env};
pub use error::{Error, Result};
pub use model::{DataLoader, DataLoaders, Gradients, Model, NormKind, NormLayer, Runner};
pub use registry::{build_from_cfg, Registry};
pub use syncbn::{convert_sync_batchnorm, SyncBnBackend};
pub use types::*;
