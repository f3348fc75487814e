//! Process-wide launch environment
//!
//! An [`Env`] is created once per process after the configuration has been
//! resolved and is passed by reference to every component that needs the
//! config, the rank or the device.

use crate::device::{Device, DistContext};
use crate::{Config, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// File name used when persisting the config snapshot
pub const SNAPSHOT_FILE: &str = "config_snapshot.yaml";

/// Optional backends compiled into this build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Alternate sync batch-norm conversion (cargo feature `apex`)
    pub apex_available: bool,
}

impl Capabilities {
    /// Capabilities of the running binary
    pub fn detect() -> Self {
        Self {
            apex_available: cfg!(feature = "apex"),
        }
    }
}

/// Launch state shared by the launcher, models, loaders and runners
#[derive(Debug)]
pub struct Env {
    cfg: Config,
    cfg_snapshot: Arc<Config>,
    local_rank: u32,
    device: Device,
    dist: Option<DistContext>,
    capabilities: Capabilities,
    run_id: Uuid,
    started_at: DateTime<Utc>,
}

impl Env {
    /// Record the resolved config, freeze a snapshot of it and the rank
    pub fn new(cfg: Config, local_rank: u32) -> Self {
        let cfg_snapshot = Arc::new(cfg.clone());
        Self {
            cfg,
            cfg_snapshot,
            local_rank,
            device: Device::default(),
            dist: None,
            capabilities: Capabilities::detect(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    /// Override the detected optional backends
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Live configuration
    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn cfg_mut(&mut self) -> &mut Config {
        &mut self.cfg
    }

    /// Configuration as it was when the environment was created
    pub fn cfg_snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.cfg_snapshot)
    }

    pub fn local_rank(&self) -> u32 {
        self.local_rank
    }

    /// Device resolved by [`crate::init_device`], `cpu` before that
    pub fn device(&self) -> Device {
        self.device
    }

    /// Distributed context, once initialized
    pub fn dist(&self) -> Option<&DistContext> {
        self.dist.as_ref()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Rank 0, or any process before the distributed context exists
    pub fn is_main_process(&self) -> bool {
        self.dist
            .as_ref()
            .map(DistContext::is_main_process)
            .unwrap_or(self.local_rank == 0)
    }

    pub(crate) fn set_device(&mut self, device: Device, dist: DistContext) {
        self.device = device;
        self.dist = Some(dist);
    }

    /// Write the frozen snapshot into `dir` and return the file path
    pub fn write_snapshot(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(SNAPSHOT_FILE);
        let body = self.cfg_snapshot.to_yaml()?;
        let header = format!(
            "# run_id: {}\n# created_at: {}\n",
            self.run_id,
            self.started_at.to_rfc3339()
        );
        std::fs::write(&path, header + &body)?;
        info!(path = %path.display(), run_id = %self.run_id, "Saved config snapshot");
        Ok(path)
    }
}
