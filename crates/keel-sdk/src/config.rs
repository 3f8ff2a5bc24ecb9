use std::path::{Path, PathBuf};

use keel_crypto::PublicKey;
use keel_nar::DEFAULT_CHUNK_SIZE;
use keel_types::StoreDir;
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Settings for opening a store.
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory the store objects live in.
    pub store_dir: PathBuf,
    /// Directory holding the metadata documents.
    pub db_dir: PathBuf,
    /// Size of the chunks an export hands to its sink.
    pub export_chunk_size: usize,
    /// Chunks buffered between a streaming export and its consumer.
    pub export_channel_capacity: usize,
    /// Keys whose signatures count as trusted, as `<name>:<base64>`.
    pub trusted_public_keys: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("/nix/store"),
            db_dir: PathBuf::from("/nix/var/keel/db"),
            export_chunk_size: DEFAULT_CHUNK_SIZE,
            export_channel_capacity: 16,
            trusted_public_keys: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| SdkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SdkResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SdkError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn validate(&self) -> SdkResult<()> {
        self.store_dir()?;
        if self.export_chunk_size == 0 {
            return Err(SdkError::Config("export_chunk_size must be positive".into()));
        }
        if self.export_channel_capacity == 0 {
            return Err(SdkError::Config(
                "export_channel_capacity must be positive".into(),
            ));
        }
        self.public_keys()?;
        Ok(())
    }

    pub fn store_dir(&self) -> SdkResult<StoreDir> {
        StoreDir::new(&self.store_dir).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn public_keys(&self) -> SdkResult<Vec<PublicKey>> {
        self.trusted_public_keys
            .iter()
            .map(|k| {
                k.parse::<PublicKey>()
                    .map_err(|e| SdkError::Config(format!("trusted key {k:?}: {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_crypto::Keypair;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert_eq!(c.store_dir, PathBuf::from("/nix/store"));
        assert_eq!(c.db_dir, PathBuf::from("/nix/var/keel/db"));
        assert_eq!(c.export_chunk_size, 65536);
        assert_eq!(c.export_channel_capacity, 16);
        assert!(c.trusted_public_keys.is_empty());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = StoreConfig::from_toml_str(
            r#"
            store_dir = "/opt/store"
            export_chunk_size = 4096
            "#,
        )
        .unwrap();
        assert_eq!(c.store_dir, PathBuf::from("/opt/store"));
        assert_eq!(c.export_chunk_size, 4096);
        assert_eq!(c.export_channel_capacity, 16);
        assert_eq!(c.db_dir, PathBuf::from("/nix/var/keel/db"));
    }

    #[test]
    fn rejects_invalid_values() {
        for text in [
            "export_chunk_size = 0",
            "export_channel_capacity = 0",
            "store_dir = \"relative/store\"",
            "trusted_public_keys = [\"nonsense\"]",
            "export_chunk_size = \"big\"",
        ] {
            let err = StoreConfig::from_toml_str(text).unwrap_err();
            assert!(matches!(err, SdkError::Config(_)), "{text}");
        }
    }

    #[test]
    fn trusted_keys_parse() {
        let key = Keypair::generate("cache.example.org-1").unwrap();
        let c = StoreConfig {
            trusted_public_keys: vec![key.export_public_key()],
            ..StoreConfig::default()
        };
        let keys = c.public_keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name(), "cache.example.org-1");
    }

    #[test]
    fn toml_round_trip_and_load() {
        let c = StoreConfig {
            store_dir: PathBuf::from("/srv/store"),
            export_channel_capacity: 4,
            ..StoreConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("keel.toml");
        std::fs::write(&file, c.to_toml_string().unwrap()).unwrap();
        assert_eq!(StoreConfig::load(&file).unwrap(), c);
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = StoreConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
