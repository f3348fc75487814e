//! Compute device and distributed context initialization

use crate::{Env, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Compute device a model is placed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    Cuda {
        index: u32,
    },
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda { index } => write!(f, "cuda:{}", index),
        }
    }
}

/// Process-group variables exported by a distributed launcher
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistEnv {
    /// `WORLD_SIZE`
    pub world_size: Option<u32>,

    /// Global `RANK`
    pub rank: Option<u32>,
}

impl DistEnv {
    /// Read `WORLD_SIZE` and `RANK` from the process environment
    pub fn from_process() -> Self {
        Self {
            world_size: read_var("WORLD_SIZE"),
            rank: read_var("RANK"),
        }
    }

    /// Single-process launch
    pub fn single() -> Self {
        Self::default()
    }
}

fn read_var(name: &str) -> Option<u32> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparsable launcher variable");
            None
        }
    }
}

/// Resolved distributed-training context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistContext {
    /// Collective communication backend (nccl, gloo, ...)
    pub backend: String,

    /// Global rank of this process
    pub rank: u32,

    /// Number of processes in the group
    pub world_size: u32,
}

impl DistContext {
    pub fn is_distributed(&self) -> bool {
        self.world_size > 1
    }

    pub fn is_main_process(&self) -> bool {
        self.rank == 0
    }
}

/// Resolve the compute device and distributed context for this process
///
/// Reads `device.name` and `dist.backend` from the live config. The global
/// rank defaults to the local rank when the launcher did not export one.
pub fn init_device(env: &mut Env, dist_env: &DistEnv) -> Result<()> {
    let local_rank = env.local_rank();

    let device = match env.cfg().get_str("device.name")? {
        "cuda" => Device::Cuda { index: local_rank },
        "cpu" => Device::Cpu,
        other => {
            return Err(Error::InvalidConfig {
                message: format!("unsupported device `{}` (expected cuda or cpu)", other),
            })
        }
    };

    let world_size = dist_env.world_size.unwrap_or(1);
    let rank = dist_env.rank.unwrap_or(local_rank);
    if world_size == 0 || rank >= world_size {
        return Err(Error::InvalidConfig {
            message: format!("rank {} is outside world size {}", rank, world_size),
        });
    }

    let dist = DistContext {
        backend: env.cfg().get_str("dist.backend")?.to_string(),
        rank,
        world_size,
    };

    info!(
        device = %device,
        rank = dist.rank,
        world_size = dist.world_size,
        backend = %dist.backend,
        "Initialized device"
    );

    env.set_device(device, dist);
    Ok(())
}
