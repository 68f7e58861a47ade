//! tether-manifest — debug adapter manifest loading.
//!
//! A manifest is a JSON file describing how to run one debug adapter:
//! its identifier, executable, arguments, optional working directory, and
//! environment overrides. The runtime consumes [`ManifestDescriptor`]
//! values; this crate owns reading and validating them.

pub mod error;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

pub use error::ManifestError;

/// Description of one debug adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDescriptor {
    /// Adapter identifier, sent as `adapterID` during initialization.
    pub identifier: String,
    /// Executable that speaks DAP on its stdio.
    pub executable: String,
    /// Command-line arguments for the executable.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Working directory for the adapter process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    /// Environment merged on top of the host environment.
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl ManifestDescriptor {
    /// Validate structural requirements that serde cannot express.
    fn validate(&self) -> Result<(), ManifestError> {
        if self.identifier.trim().is_empty() {
            return Err(ManifestError::ConfigurationInvalid(
                "identifier must not be empty".into(),
            ));
        }
        if self.executable.trim().is_empty() {
            return Err(ManifestError::ConfigurationInvalid(format!(
                "manifest '{}' has an empty executable",
                self.identifier
            )));
        }
        Ok(())
    }
}

/// Load and validate a single manifest file.
pub fn load_manifest(path: &Path) -> Result<ManifestDescriptor, ManifestError> {
    if !path.exists() {
        return Err(ManifestError::ConfigurationNotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    let descriptor: ManifestDescriptor = serde_json::from_slice(&bytes).map_err(|e| {
        ManifestError::ConfigurationInvalid(format!("{}: {e}", path.display()))
    })?;
    descriptor.validate()?;
    Ok(descriptor)
}

/// Load every `*.json` manifest in `dir`.
///
/// Invalid manifests are skipped with a warning so one broken file does
/// not hide the rest. A missing directory is
/// [`ManifestError::ConfigurationNotFound`].
pub fn load_manifest_dir(dir: &Path) -> Result<Vec<ManifestDescriptor>, ManifestError> {
    if !dir.is_dir() {
        return Err(ManifestError::ConfigurationNotFound(dir.to_path_buf()));
    }
    let mut descriptors = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.extension().is_some_and(|ext| ext == "json") {
            continue;
        }
        match load_manifest(&path) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping invalid adapter manifest");
            }
        }
    }
    descriptors.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    Ok(descriptors)
}
