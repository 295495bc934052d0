use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SealError};

/// A file standing in for the NVMe namespace the slots are carved from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub path: PathBuf,
    /// Capacity in `BLOCK_SIZE` blocks.
    pub blocks: u64,
}

/// Contents of the optional configuration file passed to `Sealer::init`.
///
/// ```json
/// { "device": { "path": "/var/tmp/seal.dev", "blocks": 262144 }, "threads": 16 }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SealConfig {
    #[serde(default)]
    pub device: Option<DeviceConfig>,
    /// Worker threads for stage execution; rayon's default when absent.
    #[serde(default)]
    pub threads: Option<usize>,
}

impl SealConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| SealError::Config(format!("could not read {:?}: {}", path, e)))?;
        let config: SealConfig = serde_json::from_str(&raw)
            .map_err(|e| SealError::Config(format!("could not parse {:?}: {}", path, e)))?;
        config.validate()?;

        info!("loaded seal config from {:?}", path);
        Ok(config)
    }

    /// Loads `path` when given, otherwise returns the default configuration
    /// (no device).
    pub fn load_optional<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(device) = &self.device {
            if device.blocks == 0 {
                return Err(SealError::Config("device.blocks must be non-zero".into()));
            }
        }
        if self.threads == Some(0) {
            return Err(SealError::Config("threads must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn parses_device_section() {
        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{ "device": { "path": "/tmp/dev.img", "blocks": 64 }, "threads": 2 }"#,
        )
        .unwrap();

        let config = SealConfig::load(file.path()).unwrap();
        assert_eq!(
            config.device,
            Some(DeviceConfig {
                path: PathBuf::from("/tmp/dev.img"),
                blocks: 64
            })
        );
        assert_eq!(config.threads, Some(2));
    }

    #[test]
    fn missing_path_is_default() {
        let config = SealConfig::load_optional(None::<&Path>).unwrap();
        assert_eq!(config, SealConfig::default());
        assert!(config.device.is_none());
    }

    #[test]
    fn rejects_bad_files() {
        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{ "device": { "path": "x", "blocks": 0 } }"#)
            .unwrap();
        assert!(matches!(
            SealConfig::load(file.path()),
            Err(SealError::Config(_))
        ));
        assert!(matches!(
            SealConfig::load("/nonexistent/seal.json"),
            Err(SealError::Config(_))
        ));
    }
}
