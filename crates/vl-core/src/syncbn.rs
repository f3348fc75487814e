//! Synchronized batch-norm conversion
//!
//! Two backends are supported: the native conversion and the `apex`
//! conversion, which exists only when the crate is built with the `apex`
//! feature. Requesting it in a build without the feature fails with
//! [`Error::MissingDependency`] instead of surfacing later.

use crate::env::Capabilities;
use crate::model::{Model, NormKind};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Backend performing the conversion, selected by `dist.name`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncBnBackend {
    Torch,
    Apex,
}

impl SyncBnBackend {
    /// Parse a `dist.name` value
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "torch" => Ok(SyncBnBackend::Torch),
            "apex" => Ok(SyncBnBackend::Apex),
            other => Err(Error::NotImplemented {
                feature: format!("sync batch-norm for dist backend `{}`", other),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncBnBackend::Torch => "torch",
            SyncBnBackend::Apex => "apex",
        }
    }

    /// Fail unless this backend is compiled in
    pub fn ensure_available(&self, capabilities: &Capabilities) -> Result<()> {
        match self {
            SyncBnBackend::Torch => Ok(()),
            SyncBnBackend::Apex if capabilities.apex_available => Ok(()),
            SyncBnBackend::Apex => Err(Error::MissingDependency {
                dependency: "apex".to_string(),
                feature: "sync batch-norm conversion with dist.name=apex".to_string(),
            }),
        }
    }
}

impl fmt::Display for SyncBnBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replace every batch-norm layer of `model` with its synchronized variant
///
/// Returns the number of converted layers.
pub fn convert_sync_batchnorm(
    model: &mut dyn Model,
    backend: SyncBnBackend,
    capabilities: &Capabilities,
) -> Result<usize> {
    backend.ensure_available(capabilities)?;

    let mut converted = 0;
    for layer in model.norm_layers_mut() {
        if layer.kind == NormKind::BatchNorm {
            layer.kind = NormKind::SyncBatchNorm { backend };
            converted += 1;
        }
    }

    info!(model = model.name(), backend = %backend, converted, "Converted batch-norm layers");
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names() {
        assert_eq!(SyncBnBackend::from_name("torch").unwrap(), SyncBnBackend::Torch);
        assert_eq!(SyncBnBackend::from_name("apex").unwrap(), SyncBnBackend::Apex);
        assert!(matches!(
            SyncBnBackend::from_name("horovod"),
            Err(Error::NotImplemented { .. })
        ));
    }

    #[test]
    fn test_apex_requires_capability() {
        let without = Capabilities {
            apex_available: false,
        };
        let with = Capabilities {
            apex_available: true,
        };

        assert!(SyncBnBackend::Torch.ensure_available(&without).is_ok());
        assert!(matches!(
            SyncBnBackend::Apex.ensure_available(&without),
            Err(Error::MissingDependency { .. })
        ));
        assert!(SyncBnBackend::Apex.ensure_available(&with).is_ok());
    }
}
