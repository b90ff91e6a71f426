//! Routing Configuration
//!
//! The immutable [`RoutingConfig`] snapshot every component reads from. It is
//! loaded once at process start and shared behind an `Arc`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI overrides ([`ConfigOverrides`])
//! 2. Environment variables (`COORDINATOR_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! The file lives at `$XDG_CONFIG_HOME/retrieval-coordinator/coordinator.toml`.
//!
//! # Example Configuration
//!
//! ```toml
//! [local]
//! url = "http://localhost:8080"
//! wait_queue_max_depth = 8
//! wait_timeout_ms = 30000
//!
//! [embedding]
//! service_url = "http://localhost:8081"
//! dimension = 768
//! variant_split = 0.1
//! cache_max_entries = 10000
//!
//! [[search.collections]]
//! name = "docs"
//! priority = 10
//!
//! [circuit]
//! failure_threshold = 3
//! cooldown_ms = 30000
//!
//! [security]
//! egress_allowlist = ["api.openai.com"]
//! block_private_ranges = true
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Local inference backend settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalBackendConfig {
    /// Base URL of the local inference server
    pub url: String,

    /// Model name sent in chat requests
    pub model: String,

    /// Health probe timeout (must stay at or below 1s)
    pub health_timeout_ms: u64,

    /// How long a ready/unreachable probe result is reused
    pub health_cache_ttl_ms: u64,

    /// How long a loading probe result is reused
    pub loading_poll_interval_ms: u64,

    /// Maximum callers allowed to wait for the model to finish loading
    pub wait_queue_max_depth: usize,

    /// Default wait-for-ready timeout
    pub wait_timeout_ms: u64,

    /// Chat completion timeout
    pub request_timeout_ms: u64,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            model: "local".to_string(),
            health_timeout_ms: 1_000,
            health_cache_ttl_ms: 10_000,
            loading_poll_interval_ms: 500,
            wait_queue_max_depth: 8,
            wait_timeout_ms: 30_000,
            request_timeout_ms: 120_000,
        }
    }
}

impl LocalBackendConfig {
    /// Health probe timeout, clamped to one second
    #[must_use]
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms.min(1_000))
    }

    /// Probe result cache TTL
    #[must_use]
    pub fn health_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.health_cache_ttl_ms)
    }

    /// Loading result cache TTL
    #[must_use]
    pub fn loading_poll_interval(&self) -> Duration {
        Duration::from_millis(self.loading_poll_interval_ms)
    }

    /// Wait-for-ready timeout
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Chat request timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Remote fallback backend settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteBackendConfig {
    /// Base URL of the OpenAI-compatible remote API
    pub url: String,

    /// Model name sent in chat requests
    pub model: String,

    /// Bearer key (usually supplied through the environment)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Chat completion timeout
    pub request_timeout_ms: u64,
}

impl Default for RemoteBackendConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            request_timeout_ms: 60_000,
        }
    }
}

impl RemoteBackendConfig {
    /// Chat request timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Embedding cache and fallback chain settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Dedicated embedding service base URL
    pub service_url: String,

    /// Optional API key for the embedding service
    #[serde(skip_serializing)]
    pub service_api_key: Option<String>,

    /// Knowledge-base base URL (second hop, also hosts keyword search)
    pub knowledge_base_url: String,

    /// Vector dimension for this deployment
    pub dimension: usize,

    /// Cache TTL for computed vectors
    pub cache_ttl_secs: u64,

    /// Most vectors kept; least recently used are evicted past this
    pub cache_max_entries: usize,

    /// Fraction of untagged calls assigned to the treatment variant
    pub variant_split: f64,

    /// Tag for the control partition
    pub control_variant: String,

    /// Tag for the treatment partition
    pub treatment_variant: String,

    /// Per-hop request timeout
    pub request_timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:8081".to_string(),
            service_api_key: None,
            knowledge_base_url: "http://localhost:8000".to_string(),
            dimension: 768,
            cache_ttl_secs: 3_600,
            cache_max_entries: 10_000,
            variant_split: 0.0,
            control_variant: "control".to_string(),
            treatment_variant: "treatment".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl EmbeddingConfig {
    /// Cache TTL
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Per-hop request timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// A searchable collection and its merge priority
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Collection name in the vector store
    pub name: String,
    /// Higher wins exact score ties
    #[serde(default)]
    pub priority: u8,
}

impl CollectionConfig {
    /// Create a collection entry
    pub fn new(name: impl Into<String>, priority: u8) -> Self {
        Self {
            name: name.into(),
            priority,
        }
    }
}

/// Search router settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Vector store base URL
    pub vector_store_url: String,

    /// Collections searched by default
    pub collections: Vec<CollectionConfig>,

    /// Top semantic score below which `auto` mode merges keyword results
    pub confidence_threshold: f32,

    /// Result limit when the caller does not give one
    pub default_limit: usize,

    /// Weight of lexical overlap in reranking (0 disables)
    pub rerank_weight: f32,

    /// Groups expanded by the tree strategy
    pub tree_groups: usize,

    /// Vector store / keyword search request timeout
    pub request_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            vector_store_url: "http://localhost:6333".to_string(),
            collections: vec![CollectionConfig::new("knowledge", 10)],
            confidence_threshold: 0.5,
            default_limit: 10,
            rerank_weight: 0.15,
            tree_groups: 3,
            request_timeout_ms: 10_000,
        }
    }
}

impl SearchConfig {
    /// Request timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Configured priority for a collection (0 when unknown)
    #[must_use]
    pub fn priority_of(&self, collection: &str) -> u8 {
        self.collections
            .iter()
            .find(|c| c.name == collection)
            .map_or(0, |c| c.priority)
    }

    /// Names of the default collections
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.iter().map(|c| c.name.clone()).collect()
    }
}

/// Circuit breaker settings (shared by both backends)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Time an open circuit waits before admitting a trial request
    pub cooldown_ms: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 30_000,
        }
    }
}

impl CircuitConfig {
    /// Cool-down interval
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Capability discovery settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Cache TTL for discovered capabilities
    pub cache_ttl_secs: u64,

    /// Most queries kept; least recently used are evicted past this
    pub cache_max_entries: usize,

    /// Matches returned per capability kind
    pub result_limit: usize,

    /// Minimum similarity for a capability match
    pub min_score: f32,

    /// Collection holding tool descriptions
    pub tool_collection: String,

    /// Collection holding skill descriptions
    pub skill_collection: String,

    /// Collection holding dataset descriptions
    pub dataset_collection: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            cache_max_entries: 1_000,
            result_limit: 5,
            min_score: 0.3,
            tool_collection: "tools".to_string(),
            skill_collection: "skills".to_string(),
            dataset_collection: "datasets".to_string(),
        }
    }
}

impl DiscoveryConfig {
    /// Cache TTL
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Egress and content security settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Risk score at or above which ingested text is rejected
    pub risk_threshold: f32,

    /// Hosts (and their subdomains) outbound calls may reach; empty = any
    pub egress_allowlist: Vec<String>,

    /// Reject hosts resolving to private/loopback/link-local/... ranges
    pub block_private_ranges: bool,

    /// Permit plaintext `http://` to non-internal hosts
    pub allow_plaintext_http: bool,

    /// Extra hosts treated as internal services
    pub internal_hosts: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            risk_threshold: 0.3,
            egress_allowlist: Vec::new(),
            block_private_ranges: true,
            allow_plaintext_http: false,
            internal_hosts: Vec::new(),
        }
    }
}

/// Agent memory settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// When false every memory operation reports `Disabled`
    pub enabled: bool,

    /// Fixed score threshold applied on recall
    pub score_threshold: f32,

    /// Collection name prefix; the memory type is appended
    pub collection_prefix: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            score_threshold: 0.3,
            collection_prefix: "agent_memory".to_string(),
        }
    }
}

// =============================================================================
// Top-level Configuration
// =============================================================================

/// Top-level TOML file structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorToml {
    /// `[local]`
    pub local: LocalBackendConfig,
    /// `[remote]`
    pub remote: RemoteBackendConfig,
    /// `[embedding]`
    pub embedding: EmbeddingConfig,
    /// `[search]`
    pub search: SearchConfig,
    /// `[circuit]`
    pub circuit: CircuitConfig,
    /// `[discovery]`
    pub discovery: DiscoveryConfig,
    /// `[security]`
    pub security: SecurityConfig,
    /// `[memory]`
    pub memory: MemoryConfig,
}

/// Immutable configuration snapshot shared by every component
#[derive(Clone, Debug, Default)]
pub struct RoutingConfig {
    /// Local inference backend
    pub local: LocalBackendConfig,
    /// Remote fallback backend
    pub remote: RemoteBackendConfig,
    /// Embedding cache and fallback chain
    pub embedding: EmbeddingConfig,
    /// Search router
    pub search: SearchConfig,
    /// Circuit breakers
    pub circuit: CircuitConfig,
    /// Capability discovery cache
    pub discovery: DiscoveryConfig,
    /// Egress guard and content filter
    pub security: SecurityConfig,
    /// Agent memory
    pub memory: MemoryConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl RoutingConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Hosts of the configured internal services (local backend, embedding
    /// service, knowledge base, vector store) plus `security.internal_hosts`
    #[must_use]
    pub fn internal_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = [
            &self.local.url,
            &self.embedding.service_url,
            &self.embedding.knowledge_base_url,
            &self.search.vector_store_url,
        ]
        .into_iter()
        .filter_map(|url| reqwest::Url::parse(url).ok())
        .filter_map(|url| url.host_str().map(|h| h.to_ascii_lowercase()))
        .collect();

        hosts.extend(
            self.security
                .internal_hosts
                .iter()
                .map(|h| h.to_ascii_lowercase()),
        );
        hosts.sort();
        hosts.dedup();
        hosts
    }

    /// Check cross-field invariants
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.embedding.dimension == 0 {
            return invalid("embedding.dimension must be greater than zero".into());
        }
        if !(0.0..=1.0).contains(&self.embedding.variant_split) {
            return invalid(format!(
                "embedding.variant_split must be within [0, 1], got {}",
                self.embedding.variant_split
            ));
        }
        if self.embedding.control_variant == self.embedding.treatment_variant {
            return invalid("embedding variants must have distinct tags".into());
        }
        if !(0.0..=1.0).contains(&self.search.confidence_threshold) {
            return invalid(format!(
                "search.confidence_threshold must be within [0, 1], got {}",
                self.search.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.security.risk_threshold) {
            return invalid(format!(
                "security.risk_threshold must be within [0, 1], got {}",
                self.security.risk_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.search.rerank_weight) {
            return invalid("search.rerank_weight must be within [0, 1]".into());
        }
        if self.local.wait_queue_max_depth == 0 {
            return invalid("local.wait_queue_max_depth must be greater than zero".into());
        }
        if self.embedding.cache_max_entries == 0 || self.discovery.cache_max_entries == 0 {
            return invalid("cache_max_entries must be greater than zero".into());
        }
        if self.circuit.failure_threshold == 0 {
            return invalid("circuit.failure_threshold must be greater than zero".into());
        }
        for (name, url) in [
            ("local.url", &self.local.url),
            ("remote.url", &self.remote.url),
            ("embedding.service_url", &self.embedding.service_url),
            ("embedding.knowledge_base_url", &self.embedding.knowledge_base_url),
            ("search.vector_store_url", &self.search.vector_store_url),
        ] {
            if let Err(e) = reqwest::Url::parse(url) {
                return invalid(format!("{name} is not a valid URL ({url}): {e}"));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/retrieval-coordinator/coordinator.toml` or
/// `~/.config/retrieval-coordinator/coordinator.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("retrieval-coordinator").join("coordinator.toml"))
}

/// Load configuration from the default path, the environment and defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the merged configuration fails validation. A missing file is not an error.
pub fn load_config() -> Result<RoutingConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or validation fails.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RoutingConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration using a custom environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RoutingConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = RoutingConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let file: CoordinatorToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, file);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, &env);
    config.validate()?;
    Ok(config)
}

fn apply_toml_config(config: &mut RoutingConfig, file: CoordinatorToml) {
    config.local = file.local;
    config.remote = file.remote;
    config.embedding = file.embedding;
    config.search = file.search;
    config.circuit = file.circuit;
    config.discovery = file.discovery;
    config.security = file.security;
    config.memory = file.memory;
}

fn parse_env<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, "Ignoring unparseable environment value");
            None
        }
    }
}

fn parse_env_bool(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    env(key).map(|v| {
        let v = v.trim().to_ascii_lowercase();
        v != "0" && v != "false" && v != "no" && v != "off"
    })
}

fn parse_env_list(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Vec<String>> {
    env(key).map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase)
            .collect()
    })
}

/// Apply `COORDINATOR_*` environment overrides
fn apply_env_config(config: &mut RoutingConfig, env: &impl Fn(&str) -> Option<String>) {
    let mut touched = false;

    macro_rules! set {
        ($field:expr, $value:expr) => {
            if let Some(v) = $value {
                $field = v;
                touched = true;
            }
        };
    }

    set!(config.local.url, env("COORDINATOR_LOCAL_URL"));
    set!(config.local.model, env("COORDINATOR_LOCAL_MODEL"));
    set!(
        config.local.health_cache_ttl_ms,
        parse_env(env, "COORDINATOR_HEALTH_CACHE_TTL_MS")
    );
    set!(
        config.local.wait_queue_max_depth,
        parse_env(env, "COORDINATOR_WAIT_QUEUE_MAX")
    );
    set!(
        config.local.wait_timeout_ms,
        parse_env(env, "COORDINATOR_WAIT_TIMEOUT_MS")
    );

    set!(config.remote.url, env("COORDINATOR_REMOTE_URL"));
    set!(config.remote.model, env("COORDINATOR_REMOTE_MODEL"));
    set!(
        config.remote.api_key,
        env("COORDINATOR_REMOTE_API_KEY").map(Some)
    );

    set!(config.embedding.service_url, env("COORDINATOR_EMBEDDING_URL"));
    set!(
        config.embedding.service_api_key,
        env("COORDINATOR_EMBEDDING_API_KEY").map(Some)
    );
    set!(
        config.embedding.knowledge_base_url,
        env("COORDINATOR_KNOWLEDGE_BASE_URL")
    );
    set!(
        config.embedding.dimension,
        parse_env(env, "COORDINATOR_EMBEDDING_DIMENSION")
    );
    set!(
        config.embedding.cache_ttl_secs,
        parse_env(env, "COORDINATOR_EMBEDDING_CACHE_TTL_SECS")
    );
    set!(
        config.embedding.cache_max_entries,
        parse_env(env, "COORDINATOR_EMBEDDING_CACHE_MAX_ENTRIES")
    );
    set!(
        config.embedding.variant_split,
        parse_env(env, "COORDINATOR_EMBEDDING_VARIANT_SPLIT")
    );

    set!(
        config.search.vector_store_url,
        env("COORDINATOR_VECTOR_STORE_URL")
    );
    set!(
        config.search.confidence_threshold,
        parse_env(env, "COORDINATOR_CONFIDENCE_THRESHOLD")
    );

    set!(
        config.circuit.failure_threshold,
        parse_env(env, "COORDINATOR_CIRCUIT_FAILURE_THRESHOLD")
    );
    set!(
        config.circuit.cooldown_ms,
        parse_env(env, "COORDINATOR_CIRCUIT_COOLDOWN_MS")
    );

    set!(
        config.discovery.cache_ttl_secs,
        parse_env(env, "COORDINATOR_DISCOVERY_CACHE_TTL_SECS")
    );
    set!(
        config.discovery.cache_max_entries,
        parse_env(env, "COORDINATOR_DISCOVERY_CACHE_MAX_ENTRIES")
    );

    set!(
        config.security.risk_threshold,
        parse_env(env, "COORDINATOR_RISK_THRESHOLD")
    );
    set!(
        config.security.egress_allowlist,
        parse_env_list(env, "COORDINATOR_EGRESS_ALLOWLIST")
    );
    set!(
        config.security.block_private_ranges,
        parse_env_bool(env, "COORDINATOR_BLOCK_PRIVATE_RANGES")
    );
    set!(
        config.security.allow_plaintext_http,
        parse_env_bool(env, "COORDINATOR_ALLOW_PLAINTEXT_HTTP")
    );

    set!(
        config.memory.enabled,
        parse_env_bool(env, "COORDINATOR_MEMORY_ENABLED")
    );

    if touched {
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Overrides applied after [`load_config`], typically from CLI arguments
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Local backend URL override
    pub local_url: Option<String>,

    /// Remote backend URL override
    pub remote_url: Option<String>,

    /// Vector store URL override
    pub vector_store_url: Option<String>,

    /// Disable agent memory
    pub memory_enabled: Option<bool>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set local backend URL override
    #[must_use]
    pub fn with_local_url(mut self, url: String) -> Self {
        self.local_url = Some(url);
        self
    }

    /// Set remote backend URL override
    #[must_use]
    pub fn with_remote_url(mut self, url: String) -> Self {
        self.remote_url = Some(url);
        self
    }

    /// Set vector store URL override
    #[must_use]
    pub fn with_vector_store_url(mut self, url: String) -> Self {
        self.vector_store_url = Some(url);
        self
    }

    /// Set memory enabled override
    #[must_use]
    pub fn with_memory_enabled(mut self, enabled: bool) -> Self {
        self.memory_enabled = Some(enabled);
        self
    }

    /// Apply overrides and re-validate
    ///
    /// # Errors
    ///
    /// Returns an error if an override produces an invalid configuration.
    pub fn apply(&self, config: &mut RoutingConfig) -> Result<(), ConfigError> {
        let mut touched = false;
        if let Some(ref url) = self.local_url {
            config.local.url = url.clone();
            touched = true;
        }
        if let Some(ref url) = self.remote_url {
            config.remote.url = url.clone();
            touched = true;
        }
        if let Some(ref url) = self.vector_store_url {
            config.search.vector_store_url = url.clone();
            touched = true;
        }
        if let Some(enabled) = self.memory_enabled {
            config.memory.enabled = enabled;
            touched = true;
        }
        if touched {
            config.source = ConfigSource::Cli;
        }
        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
