use anyhow::{Context, Result};
use nexus_store::ImportConfig;
use std::fs;
use std::path::Path;

/// Settings given on the command line, applied last
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub processors: Option<usize>,
    pub dense_node_threshold: Option<u64>,
    pub max_memory: Option<u64>,
}

/// Load the import configuration: TOML file, then environment, then flags
pub fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<ImportConfig> {
    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            ImportConfig::from_toml(&content)?
        }
        None => ImportConfig::default(),
    };
    let mut config = config.overlay_env()?;

    if let Some(processors) = overrides.processors {
        config = config.with_max_processors(processors);
    }
    if let Some(threshold) = overrides.dense_node_threshold {
        config = config.with_dense_node_threshold(threshold);
    }
    if let Some(bytes) = overrides.max_memory {
        config = config.with_max_memory(bytes);
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let config = load_config(None, Overrides::default()).unwrap();
        assert_eq!(config.dense_node_threshold, ImportConfig::default().dense_node_threshold);
    }

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("import.toml");
        fs::write(&path, "batch_size = 500\ndense_node_threshold = 10\n").unwrap();

        let config = load_config(
            Some(&path),
            Overrides {
                dense_node_threshold: Some(99),
                max_memory: Some(1 << 20),
                ..Overrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.dense_node_threshold, 99);
        assert_eq!(config.max_memory_bytes, Some(1 << 20));
    }

    #[test]
    fn test_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("import.toml");
        fs::write(&path, "batch_size = \"many\"").unwrap();
        assert!(load_config(Some(&path), Overrides::default()).is_err());
        assert!(load_config(Some(&dir.path().join("missing.toml")), Overrides::default()).is_err());
    }

    #[test]
    fn test_zero_processors_rejected() {
        let overrides = Overrides {
            processors: Some(0),
            ..Overrides::default()
        };
        assert!(load_config(None, overrides).is_err());
    }
}
