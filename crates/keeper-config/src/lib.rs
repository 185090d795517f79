//! Configuration for the keeper service.
//!
//! Configuration is loaded from a TOML file with `${VAR}` environment
//! variable substitution, then validated before any component is
//! constructed. The process refuses to start with a partial configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Top-level keeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	pub node: NodeConfig,
	pub contracts: ContractsConfig,
	#[serde(default)]
	pub indexer: IndexerConfig,
}

/// Node provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
	pub rpc_url: String,
	pub chain_id: u64,
}

/// Addresses of the on-chain collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
	/// Shared settlement contract emitting Trade/OrderInvalidated events.
	pub settlement: String,
	/// Conditional-order registry emitting creation events.
	pub registry: String,
	/// Conditional-order handler this deployment cares about; creation
	/// events for other handlers are ignored.
	pub handler: String,
	/// Spender of sell-token approvals.
	pub vault_relayer: String,
	/// Expected wallet fallback handler.
	pub fallback_handler: String,
	/// Expected domain verifier registered under the settlement domain.
	pub domain_verifier: String,
	/// 32-byte settlement domain separator, hex-encoded.
	pub domain_separator: String,
}

/// Poller and backfill settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
	/// Minimum starting block; the persisted cursor is clamped to this.
	#[serde(default)]
	pub start_block: u64,
	/// Block-range size for backfill and polling queries.
	#[serde(default = "default_batch_size")]
	pub batch_size: u64,
	/// Polling interval in seconds.
	#[serde(default = "default_poll_interval_secs")]
	pub poll_interval_secs: u64,
	/// Passes a failing range is retried before it is parked.
	#[serde(default = "default_max_range_attempts")]
	pub max_range_attempts: u32,
}

fn default_batch_size() -> u64 {
	100
}

fn default_poll_interval_secs() -> u64 {
	3
}

fn default_max_range_attempts() -> u32 {
	5
}

impl Default for IndexerConfig {
	fn default() -> Self {
		Self {
			start_block: 0,
			batch_size: default_batch_size(),
			poll_interval_secs: default_poll_interval_secs(),
			max_range_attempts: default_max_range_attempts(),
		}
	}
}

impl Config {
	/// Validates the configuration. Called by the loader; also usable on a
	/// hand-built config in tests.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if !self.node.rpc_url.starts_with("http://") && !self.node.rpc_url.starts_with("https://")
		{
			return Err(ConfigError::ValidationError(
				"node.rpc_url must start with http:// or https://".to_string(),
			));
		}

		if self.node.chain_id == 0 {
			return Err(ConfigError::ValidationError(
				"node.chain_id must be non-zero".to_string(),
			));
		}

		for (name, value) in [
			("contracts.settlement", &self.contracts.settlement),
			("contracts.registry", &self.contracts.registry),
			("contracts.handler", &self.contracts.handler),
			("contracts.vault_relayer", &self.contracts.vault_relayer),
			("contracts.fallback_handler", &self.contracts.fallback_handler),
			("contracts.domain_verifier", &self.contracts.domain_verifier),
		] {
			validate_address(name, value)?;
		}

		let sep = self
			.contracts
			.domain_separator
			.strip_prefix("0x")
			.unwrap_or(&self.contracts.domain_separator);
		if sep.len() != 64 || hex_decode_ok(sep).is_none() {
			return Err(ConfigError::ValidationError(
				"contracts.domain_separator must be 32 hex-encoded bytes".to_string(),
			));
		}

		if self.indexer.batch_size == 0 {
			return Err(ConfigError::ValidationError(
				"indexer.batch_size must be at least 1".to_string(),
			));
		}

		if self.indexer.poll_interval_secs == 0 {
			return Err(ConfigError::ValidationError(
				"indexer.poll_interval_secs must be at least 1".to_string(),
			));
		}

		Ok(())
	}
}

fn validate_address(field: &str, value: &str) -> Result<(), ConfigError> {
	let body = value.strip_prefix("0x").unwrap_or("");
	if value.len() != 42 || body.len() != 40 || hex_decode_ok(body).is_none() {
		return Err(ConfigError::ValidationError(format!(
			"{} must be a valid Ethereum address",
			field
		)));
	}
	Ok(())
}

fn hex_decode_ok(s: &str) -> Option<()> {
	s.chars().all(|c| c.is_ascii_hexdigit()).then_some(())
}

/// Configuration loader with environment variable substitution.
#[derive(Default)]
pub struct ConfigLoader {
	file_path: Option<String>,
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self { file_path: None }
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub async fn load(&self) -> Result<Config, ConfigError> {
		let file_path = self.file_path.as_ref().ok_or_else(|| {
			ConfigError::FileNotFound("No configuration file specified".to_string())
		})?;

		let content = tokio::fs::read_to_string(file_path).await.map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				ConfigError::FileNotFound(file_path.clone())
			} else {
				ConfigError::IoError(e)
			}
		})?;

		let substituted = substitute_env_vars(&content)?;

		let config: Config =
			toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))?;

		config.validate()?;

		Ok(config)
	}
}

/// Replaces `${VAR_NAME}` patterns with the corresponding environment
/// variable. Missing variables are an error rather than an empty string.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
	let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern");

	let mut result = content.to_string();
	for cap in re.captures_iter(content) {
		let full_match = &cap[0];
		let var_name = &cap[1];

		let env_value =
			env::var(var_name).map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;

		result = result.replace(full_match, &env_value);
	}

	Ok(result)
}
