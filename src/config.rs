use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use gcore::mode::CompressMode;
use gstore::{BackendKind, ChunkSizes};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Accessor settings, every field is optional in the TOML form:
///
/// ```toml
/// backend = "sqlite"
/// compress = "SlowCompress"
///
/// [chunking]
/// raw_chunk_size = 268435456
/// compressed_chunk_size = 4194304
/// ```
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Overrides picking the backend from the file name
    pub backend: Option<BackendKind>,
    /// Used by the typed writers
    pub compress: CompressMode,
    pub chunking: ChunkSizes,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Config::from_toml_str(&text)
    }
}

#[cfg(test)]
mod test_config {
    use super::*;

    #[test]
    fn empty_is_default() {
        let config = Config::from_toml_str("").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.compress, CompressMode::FastCompress);
        assert_eq!(config.chunking.compressed_chunk_size, 4 * 1024 * 1024);
    }

    #[test]
    fn full_config() {
        let config = Config::from_toml_str(
            r#"
            backend = "tar"
            compress = "NoCompress"

            [chunking]
                compressed_chunk_size = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, Some(BackendKind::Tar));
        assert_eq!(config.compress, CompressMode::NoCompress);
        assert_eq!(config.chunking.compressed_chunk_size, 1024);
        assert_eq!(config.chunking.raw_chunk_size, ChunkSizes::default().raw_chunk_size);
    }

    #[test]
    fn bad_backend() {
        assert!(matches!(
            Config::from_toml_str("backend = \"floppy\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("getar.toml");
        std::fs::write(&path, "backend = \"dir\"").unwrap();

        assert_eq!(Config::load(&path).unwrap().backend, Some(BackendKind::Dir));
        assert!(matches!(
            Config::load(&dir.path().join("missing.toml")),
            Err(ConfigError::IO(_))
        ));
    }
}
