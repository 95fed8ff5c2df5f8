//! Configuration types

use crate::{ConfigError, ItemKind, StaylensError, StaylensResult, Timestamp};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DAY: u64 = 24 * 60 * 60;

// ============================================================================
// INSIGHT CONFIGURATION
// ============================================================================

/// Recency windows, per-kind caps and the analysis timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightConfig {
    /// How far back reviews are considered.
    pub review_window: Duration,
    /// How far back messages are considered.
    pub message_window: Duration,
    /// Maximum number of reviews fetched per call.
    pub max_reviews: usize,
    /// Maximum number of messages fetched per call.
    pub max_messages: usize,
    /// Upper bound on a single analysis call.
    pub analysis_timeout: Duration,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            review_window: Duration::from_secs(180 * DAY),
            message_window: Duration::from_secs(30 * DAY),
            max_reviews: 50,
            max_messages: 100,
            analysis_timeout: Duration::from_secs(60),
        }
    }
}

impl InsightConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_review_window(mut self, window: Duration) -> Self {
        self.review_window = window;
        self
    }

    pub fn with_message_window(mut self, window: Duration) -> Self {
        self.message_window = window;
        self
    }

    pub fn with_max_reviews(mut self, max: usize) -> Self {
        self.max_reviews = max;
        self
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    /// Recency window for one kind.
    pub fn window_for(&self, kind: ItemKind) -> Duration {
        match kind {
            ItemKind::Review => self.review_window,
            ItemKind::Message => self.message_window,
        }
    }

    /// Fetch cap for one kind.
    pub fn limit_for(&self, kind: ItemKind) -> usize {
        match kind {
            ItemKind::Review => self.max_reviews,
            ItemKind::Message => self.max_messages,
        }
    }

    /// Oldest `created_at` still inside the window for `kind`, relative to `now`.
    ///
    /// Windows too large to represent clamp to the earliest representable
    /// timestamp, so everything is in range.
    pub fn cutoff_for(&self, kind: ItemKind, now: Timestamp) -> Timestamp {
        chrono::Duration::from_std(self.window_for(kind))
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn validate(&self) -> StaylensResult<()> {
        let checks: [(&str, bool, String); 5] = [
            (
                "review_window",
                self.review_window.is_zero(),
                format!("{:?}", self.review_window),
            ),
            (
                "message_window",
                self.message_window.is_zero(),
                format!("{:?}", self.message_window),
            ),
            ("max_reviews", self.max_reviews == 0, self.max_reviews.to_string()),
            ("max_messages", self.max_messages == 0, self.max_messages.to_string()),
            (
                "analysis_timeout",
                self.analysis_timeout.is_zero(),
                format!("{:?}", self.analysis_timeout),
            ),
        ];

        for (field, invalid, value) in checks {
            if invalid {
                return Err(StaylensError::Config(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value,
                    reason: "must be greater than zero".to_string(),
                }));
            }
        }
        Ok(())
    }
}

// ============================================================================
// PROVIDER CONFIGURATION
// ============================================================================

/// Which analysis provider backs the insight service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    /// Deterministic in-process provider, no credentials.
    Mock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Mock => "mock",
        }
    }

    /// Model used when none is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-haiku-20241022",
            ProviderKind::Mock => "mock",
        }
    }

    /// Provider-specific API key variable consulted after `STAYLENS_API_KEY`.
    fn key_var(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Mock => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "mock" => Ok(ProviderKind::Mock),
            other => Err(ConfigError::ProviderNotSupported {
                provider: other.to_string(),
            }),
        }
    }
}

/// Analysis provider settings.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub model: String,
    pub requests_per_minute: u32,
    /// Overrides the provider's public endpoint (proxies, local gateways).
    pub base_url: Option<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            api_key: None,
            model: kind.default_model().to_string(),
            requests_per_minute: 60,
            base_url: None,
        }
    }

    pub fn mock() -> Self {
        Self::new(ProviderKind::Mock)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn validate(&self) -> StaylensResult<()> {
        if self.kind != ProviderKind::Mock
            && self.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            return Err(StaylensError::Config(ConfigError::MissingRequired {
                field: "STAYLENS_API_KEY".to_string(),
            }));
        }
        if self.requests_per_minute == 0 {
            return Err(StaylensError::Config(ConfigError::InvalidValue {
                field: "requests_per_minute".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            }));
        }
        if self.model.trim().is_empty() {
            return Err(StaylensError::Config(ConfigError::InvalidValue {
                field: "model".to_string(),
                value: self.model.clone(),
                reason: "must not be empty".to_string(),
            }));
        }
        Ok(())
    }
}

// ============================================================================
// PERSISTENCE CONFIGURATION
// ============================================================================

/// PostgreSQL connection pool settings.
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection wait timeout
    pub timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "staylens".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("max_size", &self.max_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Where the ledger and insight records live. Chosen once at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceBackend {
    /// Process-local, nothing survives a restart.
    Memory,
    Sqlite { path: PathBuf },
    Postgres(PostgresConfig),
}

impl PersistenceBackend {
    pub fn name(&self) -> &'static str {
        match self {
            PersistenceBackend::Memory => "memory",
            PersistenceBackend::Sqlite { .. } => "sqlite",
            PersistenceBackend::Postgres(_) => "postgres",
        }
    }

    pub fn validate(&self) -> StaylensResult<()> {
        match self {
            PersistenceBackend::Memory => Ok(()),
            PersistenceBackend::Sqlite { path } if path.as_os_str().is_empty() => {
                Err(StaylensError::Config(ConfigError::MissingRequired {
                    field: "STAYLENS_SQLITE_PATH".to_string(),
                }))
            }
            PersistenceBackend::Sqlite { .. } => Ok(()),
            PersistenceBackend::Postgres(pg) => {
                if pg.max_size == 0 {
                    return Err(StaylensError::Config(ConfigError::InvalidValue {
                        field: "max_size".to_string(),
                        value: "0".to_string(),
                        reason: "pool needs at least one connection".to_string(),
                    }));
                }
                if pg.host.trim().is_empty() {
                    return Err(StaylensError::Config(ConfigError::MissingRequired {
                        field: "STAYLENS_DB_HOST".to_string(),
                    }));
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// MASTER CONFIGURATION
// ============================================================================

/// Everything the insight service needs at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaylensConfig {
    pub insights: InsightConfig,
    pub provider: ProviderConfig,
    pub persistence: PersistenceBackend,
}

impl StaylensConfig {
    /// Read configuration from `STAYLENS_*` environment variables.
    pub fn from_env() -> StaylensResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup, then validate.
    pub fn from_lookup<F>(lookup: F) -> StaylensResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = InsightConfig::default();
        let review_days = parse_var(
            &lookup,
            "STAYLENS_REVIEW_WINDOW_DAYS",
            defaults.review_window.as_secs() / DAY,
        )?;
        let message_days = parse_var(
            &lookup,
            "STAYLENS_MESSAGE_WINDOW_DAYS",
            defaults.message_window.as_secs() / DAY,
        )?;
        let insights = InsightConfig {
            review_window: Duration::from_secs(review_days.saturating_mul(DAY)),
            message_window: Duration::from_secs(message_days.saturating_mul(DAY)),
            max_reviews: parse_var(&lookup, "STAYLENS_MAX_REVIEWS", defaults.max_reviews)?,
            max_messages: parse_var(&lookup, "STAYLENS_MAX_MESSAGES", defaults.max_messages)?,
            analysis_timeout: Duration::from_secs(parse_var(
                &lookup,
                "STAYLENS_ANALYSIS_TIMEOUT_SECS",
                defaults.analysis_timeout.as_secs(),
            )?),
        };

        let kind: ProviderKind = lookup("STAYLENS_PROVIDER")
            .map(|value| value.parse())
            .transpose()?
            .unwrap_or(ProviderKind::OpenAi);
        let mut provider = ProviderConfig::new(kind);
        provider.api_key = lookup("STAYLENS_API_KEY")
            .or_else(|| kind.key_var().and_then(|var| lookup(var)))
            .filter(|key| !key.trim().is_empty());
        if let Some(model) = lookup("STAYLENS_MODEL") {
            provider.model = model;
        }
        provider.requests_per_minute =
            parse_var(&lookup, "STAYLENS_REQUESTS_PER_MINUTE", provider.requests_per_minute)?;
        provider.base_url = lookup("STAYLENS_BASE_URL");

        let backend = lookup("STAYLENS_BACKEND").unwrap_or_else(|| "sqlite".to_string());
        let persistence = match backend.trim().to_ascii_lowercase().as_str() {
            "memory" => PersistenceBackend::Memory,
            "sqlite" => PersistenceBackend::Sqlite {
                path: lookup("STAYLENS_SQLITE_PATH").map(PathBuf::from).ok_or_else(|| {
                    ConfigError::MissingRequired {
                        field: "STAYLENS_SQLITE_PATH".to_string(),
                    }
                })?,
            },
            "postgres" | "postgresql" => {
                let pg = PostgresConfig::default();
                PersistenceBackend::Postgres(PostgresConfig {
                    host: lookup("STAYLENS_DB_HOST").unwrap_or(pg.host),
                    port: parse_var(&lookup, "STAYLENS_DB_PORT", pg.port)?,
                    dbname: lookup("STAYLENS_DB_NAME").unwrap_or(pg.dbname),
                    user: lookup("STAYLENS_DB_USER").unwrap_or(pg.user),
                    password: lookup("STAYLENS_DB_PASSWORD").unwrap_or(pg.password),
                    max_size: parse_var(&lookup, "STAYLENS_DB_POOL_SIZE", pg.max_size)?,
                    timeout: Duration::from_secs(parse_var(
                        &lookup,
                        "STAYLENS_DB_TIMEOUT",
                        pg.timeout.as_secs(),
                    )?),
                })
            }
            other => {
                return Err(StaylensError::Config(ConfigError::BackendNotSupported {
                    backend: other.to_string(),
                }))
            }
        };

        let config = Self {
            insights,
            provider,
            persistence,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StaylensResult<()> {
        self.insights.validate()?;
        self.provider.validate()?;
        self.persistence.validate()
    }
}

fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw,
            reason: "not a valid number".to_string(),
        }),
    }
}

// ============================================================================
// TESTS
// ============================================================================
