use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

/// A setting that was present in the environment but could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedSetting {
    pub key: &'static str,
    pub value: String,
}

/// Parse a profiled env var. A present but unparsable value keeps the
/// default and is recorded in `rejected`, so `validate` can refuse it.
fn profiled_env_parse<T: FromStr>(
    profile: &str,
    key: &'static str,
    default: T,
    rejected: &mut Vec<RejectedSetting>,
) -> T {
    match profiled_env_opt(profile, key) {
        Some(v) => match v.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                rejected.push(RejectedSetting { key, value: v });
                default
            }
        },
        None => default,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn profiled_env_bool(
    profile: &str,
    key: &'static str,
    default: bool,
    rejected: &mut Vec<RejectedSetting>,
) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => parse_bool(&v).unwrap_or_else(|| {
            rejected.push(RejectedSetting { key, value: v });
            default
        }),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub lti: LtiConfig,
    pub sandbox: SandboxConfig,
    pub submissions: SubmissionConfig,
    pub grading: GradingConfig,
    /// Settings whose values could not be parsed; `validate` rejects them.
    #[serde(skip)]
    pub rejected: Vec<RejectedSetting>,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `LABGRADE_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("LABGRADE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let mut rejected = Vec::new();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p, &mut rejected),
            lti: LtiConfig::from_env_profiled(p),
            sandbox: SandboxConfig::from_env_profiled(p, &mut rejected),
            submissions: SubmissionConfig::from_env_profiled(p),
            grading: GradingConfig::from_env_profiled(p, &mut rejected),
            rejected,
        }
    }

    /// Forget a rejected env value for `key`, e.g. once a command-line
    /// flag has replaced it.
    pub fn clear_rejected(&mut self, key: &str) {
        self.rejected.retain(|r| r.key != key);
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject configurations that cannot start a run.
    ///
    /// Everything checked here is a setup failure: nothing has been
    /// scheduled yet, so the whole run aborts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bad) = self.rejected.first() {
            return Err(ConfigError::Invalid {
                key: bad.key,
                reason: format!("cannot parse {:?}", bad.value),
            });
        }
        if self.postgres.password.is_none() {
            return Err(ConfigError::Missing("POSTGRES_PASSWORD"));
        }
        if self.lti.consumer_key.is_none() {
            return Err(ConfigError::Missing("LTI_CONSUMER_KEY"));
        }
        if self.lti.consumer_secret.is_none() {
            return Err(ConfigError::Missing("LTI_CONSUMER_SECRET"));
        }
        if self.grading.concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "GRADER_CONCURRENCY",
                reason: "concurrency limit must be at least 1".to_string(),
            });
        }
        if self.sandbox.image.trim().is_empty() {
            return Err(ConfigError::Missing("GRADER_IMAGE"));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  postgres:    host={}, db={}, user={}", self.postgres.host, self.postgres.database, self.postgres.username);
        tracing::info!("  lti:         configured={}", self.lti.is_configured());
        tracing::info!(
            "  sandbox:     image={}, memory={}, network_disabled={}, timeout={:?}",
            self.sandbox.image,
            self.sandbox.memory_limit,
            self.sandbox.network_disabled,
            self.sandbox.timeout()
        );
        tracing::info!("  submissions: root={}", self.submissions.root.display());
        tracing::info!("  grading:     concurrency={}", self.grading.concurrency);
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Hostname, or a unix-socket directory when it starts with `/`.
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str, rejected: &mut Vec<RejectedSetting>) -> Self {
        Self {
            host: profiled_env_or(
                p,
                "PG_HOST",
                "/run/cloudsql/data8x-scratch:us-central1:prod-hubshard-db-instance",
            ),
            port: profiled_env_parse(p, "PG_PORT", 5432, rejected),
            database: profiled_env_or(p, "PG_DATABASE", "prod-hubshard-sharder-db"),
            username: profiled_env_or(p, "PG_USERNAME", "prod-db-proxyuser"),
            password: profiled_env_opt(p, "POSTGRES_PASSWORD"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 4, rejected),
        }
    }

    pub fn is_socket(&self) -> bool {
        self.host.starts_with('/')
    }
}

// ── LTI outcome service credentials ───────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct LtiConfig {
    pub consumer_key: Option<String>,
    #[serde(skip_serializing)]
    pub consumer_secret: Option<String>,
}

impl LtiConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            consumer_key: profiled_env_opt(p, "LTI_CONSUMER_KEY"),
            consumer_secret: profiled_env_opt(p, "LTI_CONSUMER_SECRET"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.consumer_key.is_some() && self.consumer_secret.is_some()
    }
}

impl std::fmt::Debug for LtiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LtiConfig")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &self.consumer_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ── Sandbox ───────────────────────────────────────────────────

/// Docker sandbox settings shared by every grading job in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Image that carries the grading scripts.
    pub image: String,
    /// Docker memory ceiling (e.g. "1G").
    pub memory_limit: String,
    pub network_disabled: bool,
    /// Per-job wall-clock limit in seconds; 0 disables it.
    pub timeout_secs: u64,
    /// Script run inside the container; it reads the notebook from stdin.
    pub grade_command: String,
    /// In-container notebook path, `{lab}` is replaced with the assignment.
    pub notebook_template: String,
    /// Diagnostic lines starting with any of these are dropped.
    pub suppress_prefixes: Vec<String>,
    /// Docker client command; may carry a wrapper such as `sudo docker`.
    pub docker_bin: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "yuvipanda/materials-x18".to_string(),
            memory_limit: "1G".to_string(),
            network_disabled: true,
            timeout_secs: 0,
            grade_command: "/srv/repo/grading/containergrade.bash".to_string(),
            notebook_template: "/srv/repo/materials/x18/lab/1/{lab}/{lab}.ipynb".to_string(),
            suppress_prefixes: vec!["WARNING:".to_string()],
            docker_bin: "docker".to_string(),
        }
    }
}

impl SandboxConfig {
    fn from_env_profiled(p: &str, rejected: &mut Vec<RejectedSetting>) -> Self {
        let d = Self::default();
        Self {
            image: profiled_env_or(p, "GRADER_IMAGE", &d.image),
            memory_limit: profiled_env_or(p, "SANDBOX_MEMORY_LIMIT", &d.memory_limit),
            network_disabled: profiled_env_bool(p, "SANDBOX_NETWORK_DISABLED", d.network_disabled, rejected),
            timeout_secs: profiled_env_parse(p, "SANDBOX_TIMEOUT_SECS", d.timeout_secs, rejected),
            grade_command: profiled_env_or(p, "SANDBOX_GRADE_COMMAND", &d.grade_command),
            notebook_template: profiled_env_or(p, "SANDBOX_NOTEBOOK_TEMPLATE", &d.notebook_template),
            suppress_prefixes: profiled_env_opt(p, "SANDBOX_SUPPRESS_PREFIXES")
                .map(|v| split_list(&v))
                .unwrap_or(d.suppress_prefixes),
            docker_bin: profiled_env_or(p, "DOCKER_BIN", &d.docker_bin),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn notebook_path(&self, lab: &str) -> String {
        self.notebook_template.replace("{lab}", lab)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Submissions ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    pub root: PathBuf,
    /// Relative path under `root`; `{user}` and `{lab}` are substituted.
    pub path_template: String,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            path_template: "{user}/materials-x18/materials/x18/lab/1/{lab}/{lab}.ipynb".to_string(),
        }
    }
}

impl SubmissionConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            root: PathBuf::from(profiled_env_or(p, "SUBMISSIONS_ROOT", ".")),
            path_template: profiled_env_or(p, "SUBMISSION_PATH_TEMPLATE", &d.path_template),
        }
    }
}

// ── Grading run ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingConfig {
    /// Maximum number of sandboxes running at once.
    pub concurrency: usize,
}

impl GradingConfig {
    /// A negative limit fails to parse as `usize` and is rejected with
    /// everything else unparsable.
    fn from_env_profiled(p: &str, rejected: &mut Vec<RejectedSetting>) -> Self {
        Self {
            concurrency: profiled_env_parse(p, "GRADER_CONCURRENCY", 16, rejected),
        }
    }
}
