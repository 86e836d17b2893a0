//! Configuration for the DroughtWatch batch jobs.
//!
//! Every component receives the pieces of [`Config`] it needs at construction.
//! Environment variables used by the deployed handlers are folded in once, by
//! [`Config::apply_env_overrides`], before anything is built.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the processing and observation jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Blob storage connection settings
    #[serde(default)]
    pub aws: AwsConfig,

    /// Ledger/metrics database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Raw → processed transformation settings
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Drift observation settings
    #[serde(default)]
    pub observation: ObservationConfig,
}

/// Blob storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom S3 endpoint (for LocalStack, MinIO, etc.)
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Allow plain HTTP endpoints. Defaults to true when `endpoint_url` is http://
    #[serde(default)]
    pub allow_http: Option<bool>,

    /// Use a local directory instead of S3; each bucket is a sub-directory.
    #[serde(default)]
    pub use_local: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            allow_http: None,
            use_local: None,
        }
    }
}

impl AwsConfig {
    /// Whether plain HTTP is allowed for the configured endpoint.
    pub fn allows_http(&self) -> bool {
        self.allow_http.unwrap_or_else(|| {
            self.endpoint_url
                .as_deref()
                .is_some_and(|url| url.starts_with("http://"))
        })
    }
}

/// Database connection parameters for the ledger and metrics tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection string. Takes precedence over the individual fields.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Database holding the ledger and metrics tables
    #[serde(default = "default_dbname")]
    pub dbname: String,

    /// Database used to issue `CREATE DATABASE` when `dbname` is missing
    #[serde(default = "default_maintenance_db")]
    pub maintenance_db: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Create `dbname` on first use if it does not exist
    #[serde(default = "default_true")]
    pub create_database: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: Some("localhost".to_string()),
            port: default_db_port(),
            user: None,
            password: None,
            dbname: default_dbname(),
            maintenance_db: default_maintenance_db(),
            max_connections: default_max_connections(),
            create_database: true,
        }
    }
}

impl DatabaseConfig {
    /// Connection target for log lines, never including the password.
    pub fn display_target(&self) -> String {
        match &self.url {
            Some(url) => match url.split_once('@') {
                Some((_, rest)) => format!("postgres://***@{}", rest),
                None => url.clone(),
            },
            None => format!(
                "{}:{}/{}",
                self.host.as_deref().unwrap_or("<unset>"),
                self.port,
                self.dbname
            ),
        }
    }
}

/// Processing worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Parent directory for per-file scratch directories (system temp dir if unset)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Appended to the raw file stem to name the processed artifact
    #[serde(default = "default_processed_suffix")]
    pub processed_suffix: String,

    /// Extension of the processed artifact
    #[serde(default = "default_processed_extension")]
    pub processed_extension: String,

    /// Keys containing any of these markers are derived artifacts, not raw data
    #[serde(default = "default_exclude_markers")]
    pub exclude_markers: Vec<String>,

    /// Add a sequential `id` feature to every processed record
    #[serde(default = "default_true")]
    pub assign_id: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            processed_suffix: default_processed_suffix(),
            processed_extension: default_processed_extension(),
            exclude_markers: default_exclude_markers(),
            assign_id: true,
        }
    }
}

/// Drift statistic used to compare predicted-label distributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftMethod {
    /// Jensen-Shannon distance (natural log)
    #[default]
    JensenShannon,

    /// Population stability index
    Psi,
}

impl std::fmt::Display for DriftMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftMethod::JensenShannon => write!(f, "jensen_shannon"),
            DriftMethod::Psi => write!(f, "psi"),
        }
    }
}

/// Observation worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationConfig {
    /// Key of the reference dataset inside the data bucket
    #[serde(default = "default_reference_path")]
    pub reference_path: String,

    /// Column holding the predicted label
    #[serde(default = "default_label_column")]
    pub label_column: String,

    /// Number of known classes (one `class_<k>_frac` column each)
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,

    #[serde(default)]
    pub drift_method: DriftMethod,

    /// Scores at or above this value are reported as drift
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            reference_path: default_reference_path(),
            label_column: default_label_column(),
            num_classes: default_num_classes(),
            drift_method: DriftMethod::default(),
            drift_threshold: default_drift_threshold(),
        }
    }
}

/// Highest class count the metrics table has columns for.
pub const MAX_CLASSES: usize = 4;

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Fold the handler environment variables into this configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("aws_endpoint_url") {
            self.aws.endpoint_url = Some(url);
        }
        if let Some(path) = lookup("reference_path") {
            self.observation.reference_path = path;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(host) = lookup("POSTGRES_HOST") {
            self.database.host = Some(host);
        }
        if let Some(port) = lookup("POSTGRES_PORT").and_then(|p| p.parse().ok()) {
            self.database.port = port;
        }
        if let Some(user) = lookup("POSTGRES_USER") {
            self.database.user = Some(user);
        }
        if let Some(password) = lookup("POSTGRES_PASSWORD") {
            self.database.password = Some(password);
        }
        if let Some(db) = lookup("POSTGRES_DB") {
            self.database.dbname = db;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.aws.region.trim().is_empty() {
            anyhow::bail!("AWS region must not be empty");
        }
        if self.database.url.is_none() && self.database.host.is_none() {
            anyhow::bail!("Database needs either url or host");
        }
        if self.database.dbname.is_empty() {
            anyhow::bail!("Database name must not be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.processing.processed_extension.is_empty() {
            anyhow::bail!("Processed extension must not be empty");
        }
        if self.observation.num_classes == 0 || self.observation.num_classes > MAX_CLASSES {
            anyhow::bail!("num_classes must be between 1 and {}", MAX_CLASSES);
        }
        if !(self.observation.drift_threshold >= 0.0) {
            anyhow::bail!("Drift threshold must be a non-negative number");
        }
        if self.observation.label_column.is_empty() {
            anyhow::bail!("Label column must not be empty");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_region() -> String { "us-east-1".to_string() }
fn default_db_port() -> u16 { 5432 }
fn default_dbname() -> String { "droughtwatch".to_string() }
fn default_maintenance_db() -> String { "postgres".to_string() }
fn default_max_connections() -> u32 { 4 }
fn default_true() -> bool { true }
fn default_processed_suffix() -> String { "_processed".to_string() }
fn default_processed_extension() -> String { "tfrecord".to_string() }
fn default_exclude_markers() -> Vec<String> { vec!["processed".to_string(), "parquet".to_string()] }
fn default_reference_path() -> String { "reference_data.parquet".to_string() }
fn default_label_column() -> String { "label".to_string() }
fn default_num_classes() -> usize { 4 }
fn default_drift_threshold() -> f64 { 0.1 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.processing.processed_suffix, "_processed");
        assert_eq!(config.observation.reference_path, "reference_data.parquet");
        assert_eq!(config.observation.num_classes, 4);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
aws:
  endpoint_url: "http://localhost:4566"
observation:
  drift_method: psi
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.aws.region, "us-east-1");
        assert!(config.aws.allows_http());
        assert_eq!(config.observation.drift_method, DriftMethod::Psi);
        assert_eq!(config.observation.label_column, "label");
        assert_eq!(config.database.dbname, "droughtwatch");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_config() {
        let config = Config::from_json(r#"{"database": {"url": "postgres://u:p@db:5432/x"}}"#).unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://u:p@db:5432/x"));
        assert_eq!(config.database.display_target(), "postgres://***@db:5432/x");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("aws_endpoint_url", "http://localstack:4566"),
            ("reference_path", "ref/v2.parquet"),
            ("POSTGRES_PORT", "6543"),
            ("POSTGRES_DB", "dw"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.aws.endpoint_url.as_deref(), Some("http://localstack:4566"));
        assert_eq!(config.observation.reference_path, "ref/v2.parquet");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.dbname, "dw");
        assert!(config.database.password.is_none());
    }

    #[test]
    fn test_config_validation_invalid() {
        let mut config = Config::default();
        config.observation.num_classes = 5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.observation.drift_threshold = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.database.host = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_roundtrip_preserves_method() {
        let mut config = Config::default();
        config.observation.drift_method = DriftMethod::Psi;
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("psi"));
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.observation.drift_method, DriftMethod::Psi);
    }
}
