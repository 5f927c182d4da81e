use std::path::Path;

use serde::Deserialize;

/// Orchestrator configuration, loaded from TOML.
///
/// ```toml
/// chain_id = 1
/// gas_limit = 90000
/// gas_price = 0
///
/// [tee]
/// private_key = "0x..."
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// EIP-155 chain id used when signing `set_states` transactions.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default)]
    pub gas_price: u128,
    #[serde(default)]
    pub tee: TeeSection,
}

/// [tee] section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TeeSection {
    /// Hex-encoded secp256k1 key. When absent a fresh key is generated,
    /// which is only useful for demos: the TEE address changes every run.
    pub private_key: Option<String>,
}

fn default_chain_id() -> u64 {
    1
}

fn default_gas_limit() -> u64 {
    90_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            gas_limit: default_gas_limit(),
            gas_price: 0,
            tee: TeeSection::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl OrchestratorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(config.chain_id, 1);
        assert_eq!(config.gas_limit, 90_000);
        assert_eq!(config.gas_price, 0);
        assert!(config.tee.private_key.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            chain_id = 31337
            gas_limit = 500000
            gas_price = 1000000000

            [tee]
            private_key = "0x0101010101010101010101010101010101010101010101010101010101010101"
            "#,
        )
        .unwrap();

        assert_eq!(config.chain_id, 31337);
        assert_eq!(config.gas_price, 1_000_000_000);
        assert!(config.tee.private_key.is_some());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            OrchestratorConfig::from_toml_str("chain_id = \"one\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = OrchestratorConfig::load(Path::new("/nonexistent/tee_mpt.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
