use anyhow::Context;
use rochambeau_core::Address;
use rochambeau_escrow::EscrowConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "rochambeau.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    pub escrow: EscrowConfig,
    /// Party allowed to pause the escrow and change the commission.
    pub owner: Address,
    pub paused: bool,
}

impl CliConfig {
    pub fn new(escrow: EscrowConfig, owner: Address) -> Self {
        Self {
            escrow,
            owner,
            paused: false,
        }
    }

    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(CONFIG_FILE)
    }

    pub fn exists(data_dir: &Path) -> bool {
        Self::path(data_dir).exists()
    }

    pub fn load(data_dir: &Path) -> anyhow::Result<Self> {
        let path = Self::path(data_dir);
        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "no escrow at {}, run 'rochambeau init' first",
                data_dir.display()
            )
        })?;
        let config: CliConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.escrow.validate()?;
        Ok(config)
    }

    pub fn save(&self, data_dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(data_dir)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::path(data_dir), content)?;
        Ok(())
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rochambeau")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_round_trip() {
        let temp_dir = tempdir().unwrap();
        let config = CliConfig::new(EscrowConfig::default(), Address::new([7u8; 20]));
        config.save(temp_dir.path()).unwrap();

        let loaded = CliConfig::load(temp_dir.path()).unwrap();
        assert_eq!(loaded.escrow, config.escrow);
        assert_eq!(loaded.owner, config.owner);
        assert!(!loaded.paused);
    }

    #[test]
    fn test_missing_config_points_at_init() {
        let temp_dir = tempdir().unwrap();
        let err = CliConfig::load(temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("rochambeau init"));
    }
}
