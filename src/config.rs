use clap::Parser;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

/// Variables the web front-end already exports, mapped onto config keys.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("DESCOPE_MANAGEMENT_KEY", "broker.management_key"),
    ("NEXT_PUBLIC_DESCOPE_PROJECT_ID", "broker.project_id"),
    ("DESCOPE_BASE_URL", "broker.base_url"),
    ("OPENAI_API_KEY", "llm.api_key"),
    ("CRM_API_URL", "providers.crm"),
    ("NEXT_PUBLIC_POSTHOG_KEY", "analytics.posthog_key"),
    ("NEXT_PUBLIC_SEGMENT_WRITE_KEY", "analytics.segment_write_key"),
];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Require JWT authentication on every request
    #[arg(long, env = "JWT_REQUIRED")]
    pub jwt_required: Option<bool>,

    /// Emit logs as JSON lines
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub broker: BrokerConfig,
    pub llm: LlmConfig,
    pub providers: ProviderEndpoints,
    pub analytics: AnalyticsConfig,
    pub caches: CacheConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
            json_logs: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SecurityConfig {
    pub jwt_required: bool,
    pub jwt_secret: String,
}

/// Identity provider management API used for outbound token exchange.
#[derive(Deserialize, Serialize, Clone)]
pub struct BrokerConfig {
    pub base_url: String,
    pub project_id: String,
    pub management_key: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.descope.com".to_string(),
            project_id: String::new(),
            management_key: String::new(),
        }
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .field("management_key", &"<redacted>")
            .finish()
    }
}

impl BrokerConfig {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.project_id.trim().is_empty() && !self.management_key.trim().is_empty()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Base URLs of the third-party REST APIs the tools call.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderEndpoints {
    pub google_calendar: String,
    pub google_docs: String,
    pub zoom: String,
    pub slack: String,
    pub linkedin: String,
    pub microsoft_graph: String,
    #[serde(default)]
    pub crm: Option<String>,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            google_calendar: "https://www.googleapis.com/calendar/v3".to_string(),
            google_docs: "https://docs.googleapis.com/v1".to_string(),
            zoom: "https://api.zoom.us/v2".to_string(),
            slack: "https://slack.com/api".to_string(),
            linkedin: "https://api.linkedin.com".to_string(),
            microsoft_graph: "https://graph.microsoft.com/v1.0".to_string(),
            crm: None,
        }
    }
}

impl ProviderEndpoints {
    /// Point every provider at a single base URL. Used against mock servers.
    #[must_use]
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            google_calendar: format!("{base}/calendar/v3"),
            google_docs: format!("{base}/docs/v1"),
            zoom: format!("{base}/zoom/v2"),
            slack: format!("{base}/slack/api"),
            linkedin: format!("{base}/linkedin"),
            microsoft_graph: format!("{base}/graph/v1.0"),
            crm: Some(format!("{base}/crm")),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub posthog_key: Option<String>,
    pub posthog_host: String,
    #[serde(default)]
    pub segment_write_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    pub spec_ttl_secs: u64,
    pub history_ttl_secs: u64,
    pub history_per_user: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            spec_ttl_secs: 3600,
            history_ttl_secs: 24 * 60 * 60,
            history_per_user: 50,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut defaults = AppConfig::default();
        defaults.analytics.posthog_host = "https://us.i.posthog.com".to_string();

        // Priority: CLI flag > legacy env var > SAA_ env var > config file > defaults.
        let mut builder = Config::builder().add_source(Config::try_from(&defaults)?);

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // E.g. SAA_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("SAA")
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_ENV {
            if let Ok(val) = env::var(var)
                && !val.trim().is_empty()
            {
                builder = builder.set_override(*key, val)?;
            }
        }

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(required) = cli.jwt_required {
            builder = builder.set_override("security.jwt_required", required)?;
        }
        if let Some(json) = cli.json_logs {
            builder = builder.set_override("server.json_logs", json)?;
        }

        builder.build()?.try_deserialize()
    }
}
