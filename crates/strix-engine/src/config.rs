//! Engine configuration and model sourcing.

use std::path::PathBuf;

use strix_core::error::{EngineError, Result};

/// Per-engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Device the model is loaded onto; validated against the runtime's
    /// device count at construction.
    pub device_id: u32,
    /// Optional runtime configuration file, passed through opaquely and
    /// recorded for diagnostics.  The engine never parses it.
    pub config_path: Option<PathBuf>,
}

impl EngineConfig {
    pub fn for_device(device_id: u32) -> Self {
        Self {
            device_id,
            config_path: None,
        }
    }
}

/// Exactly one serialized model blob.
///
/// The engine loads a single model; being an enum of one path or one buffer
/// makes multi-blob input unrepresentable.
#[derive(Debug, Clone)]
pub enum ModelSource {
    File(PathBuf),
    Memory(Vec<u8>),
}

impl ModelSource {
    /// Reads the blob bytes.
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            Self::File(path) => std::fs::read(path).map_err(|e| {
                EngineError::Resource(format!("failed to read model file {}: {e}", path.display()))
            }),
            Self::Memory(bytes) => {
                if bytes.is_empty() {
                    return Err(EngineError::Config("model buffer is empty".into()));
                }
                Ok(bytes.clone())
            }
        }
    }
}
