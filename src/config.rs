use serde::Deserialize;
use std::path::Path;
use validator::Validate;

/// Main configuration for the Pamoja chat service
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct Config {
    /// Interface to bind
    pub server_host: String,

    /// HTTP server port
    #[validate(range(min = 1024, max = 65535))]
    pub server_port: u16,

    /// Database URL (SeaORM / SQLite)
    pub database_url: String,

    /// Log level (e.g., info, debug, trace)
    pub log_level: String,

    /// Secret stretched into the conversation-history key. Without it history is
    /// stored through the plaintext fallback.
    #[validate(length(min = 16))]
    pub encryption_secret: Option<String>,

    /// HS256 secret used to verify bearer tokens issued by the auth service
    #[validate(length(min = 16))]
    pub jwt_secret: Option<String>,

    /// OpenAI-compatible completion endpoint base (without `/chat/completions`)
    pub completion_base_url: String,

    pub completion_api_key: Option<String>,

    pub completion_model: String,

    /// Upper bound on a single completion call
    #[validate(range(min = 1, max = 600))]
    pub completion_timeout_secs: u64,

    /// Prior messages sent to the model per turn; 0 sends the whole thread
    pub history_window: usize,

    pub whatsapp_verify_token: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    pub whatsapp_access_token: Option<String>,

    /// Graph API base, including the version segment
    pub whatsapp_api_base_url: String,

    /// Per-IP request budget for the chat routes
    #[validate(range(min = 1, max = 100000))]
    pub rate_limit_per_minute: u32,

    pub cors_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            database_url: "sqlite://pamoja.db".to_string(),
            log_level: "info".to_string(),
            encryption_secret: None,
            jwt_secret: None,
            completion_base_url: "https://api.openai.com/v1".to_string(),
            completion_api_key: None,
            completion_model: "gpt-4o-mini".to_string(),
            completion_timeout_secs: 60,
            history_window: 0,
            whatsapp_verify_token: None,
            whatsapp_phone_number_id: None,
            whatsapp_access_token: None,
            whatsapp_api_base_url: "https://graph.facebook.com/v21.0".to_string(),
            rate_limit_per_minute: 60,
            cors_enabled: true,
        }
    }
}

impl Config {
    /// Load from `~/.pamoja/config` (if present) and `PAMOJA__*` environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Like [`Config::load`], with an explicit file taking the place of the default one.
    pub fn load_from(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let defaults = Config::default();

        let file_source = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(&format!(
                "{}/.pamoja/config",
                std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
            ))
            .required(false),
        };

        let settings = config::Config::builder()
            // Core defaults
            .set_default("server_host", defaults.server_host)?
            .set_default("server_port", defaults.server_port)?
            .set_default("database_url", defaults.database_url)?
            .set_default("log_level", defaults.log_level)?
            // Completion provider
            .set_default("completion_base_url", defaults.completion_base_url)?
            .set_default("completion_model", defaults.completion_model)?
            .set_default("completion_timeout_secs", defaults.completion_timeout_secs)?
            .set_default("history_window", defaults.history_window as u64)?
            // WhatsApp
            .set_default("whatsapp_api_base_url", defaults.whatsapp_api_base_url)?
            // HTTP surface
            .set_default("rate_limit_per_minute", defaults.rate_limit_per_minute)?
            .set_default("cors_enabled", defaults.cors_enabled)?
            .add_source(file_source)
            // Environment overrides: PAMOJA__ENCRYPTION_SECRET, PAMOJA__SERVER_PORT, etc.
            .add_source(config::Environment::with_prefix("PAMOJA").separator("__"))
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    pub fn whatsapp_enabled(&self) -> bool {
        self.whatsapp_phone_number_id.is_some() && self.whatsapp_access_token.is_some()
    }
}
