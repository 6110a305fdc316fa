use dotenvy::dotenv;
use std::env;

/// Process-level configuration, loaded from the environment.
///
/// Per-community settings (thresholds, feature toggles, webhook targets)
/// live in the database; everything here applies to the whole service.
#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub application_id: u64,
    pub database_url: String,
    pub api_bind_addr: String,
    /// Static bearer token for the configuration API.
    pub api_token: String,
    /// Scopes attached to the bearer token.
    pub api_scopes: Vec<String>,
    pub llama_url: Option<String>,
    pub llama_model: String,
    pub llama_api_key: Option<String>,
    pub embedding_url: Option<String>,
    pub embedding_model: String,
    pub embedding_api_key: Option<String>,
    pub status_message: String,
    // Flood detection
    pub flood_window_secs: u64,
    pub flood_repeat_trigger: usize,
    // Webhook delivery
    pub webhook_timeout_secs: u64,
    pub webhook_max_attempts: u32,
    pub webhook_backoff_base_secs: i64,
    pub webhook_backoff_cap_secs: i64,
    pub webhook_sweep_interval_secs: u64,
    // Announcements
    pub announcement_interval_secs: u64,
    // Message context retention
    pub context_retention_hours: u64,
    pub maintenance_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            application_id: env::var("APPLICATION_ID")
                .map_err(|_| anyhow::anyhow!("APPLICATION_ID must be set"))?
                .parse()
                .map_err(|_| anyhow::anyhow!("APPLICATION_ID must be a valid u64"))?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/hackcord.db".to_string()),
            api_bind_addr: env::var("API_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8090".to_string()),
            api_token: env::var("API_TOKEN")
                .map_err(|_| anyhow::anyhow!("API_TOKEN must be set"))?,
            api_scopes: env::var("API_SCOPES")
                .unwrap_or_else(|_| "bot:configure faq:sync schedule:sync".to_string())
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            llama_url: env::var("LLAMA_URL").ok(),
            llama_model: env::var("LLAMA_MODEL").unwrap_or_else(|_| "local-model".to_string()),
            llama_api_key: env::var("LLAMA_API_KEY").ok(),
            embedding_url: env::var("EMBEDDING_URL").ok(),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "local-model".to_string()),
            embedding_api_key: env::var("EMBEDDING_API_KEY").ok(),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Watching for hackathon questions".to_string()),
            flood_window_secs: env::var("FLOOD_WINDOW_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            flood_repeat_trigger: env::var("FLOOD_REPEAT_TRIGGER")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            webhook_timeout_secs: env::var("WEBHOOK_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            webhook_max_attempts: env::var("WEBHOOK_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            webhook_backoff_base_secs: env::var("WEBHOOK_BACKOFF_BASE_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            webhook_backoff_cap_secs: env::var("WEBHOOK_BACKOFF_CAP_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .unwrap_or(3600),
            webhook_sweep_interval_secs: env::var("WEBHOOK_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .unwrap_or(15),
            announcement_interval_secs: env::var("ANNOUNCEMENT_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            context_retention_hours: env::var("CONTEXT_RETENTION_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),
            maintenance_interval_secs: env::var("MAINTENANCE_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .unwrap_or(3600),
        })
    }

    /// Whether an AI backend is configured for classification and embeddings.
    pub fn ai_enabled(&self) -> bool {
        self.llama_url.is_some() || self.embedding_url.is_some()
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.api_scopes.iter().any(|s| s == scope)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("application_id", &self.application_id)
            .field("database_url", &self.database_url)
            .field("api_bind_addr", &self.api_bind_addr)
            .field("api_token", &"[REDACTED]")
            .field("api_scopes", &self.api_scopes)
            .field("llama_url", &self.llama_url)
            .field("llama_model", &self.llama_model)
            .field(
                "llama_api_key",
                &self.llama_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("embedding_url", &self.embedding_url)
            .field("embedding_model", &self.embedding_model)
            .field(
                "embedding_api_key",
                &self.embedding_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("status_message", &self.status_message)
            .field("flood_window_secs", &self.flood_window_secs)
            .field("flood_repeat_trigger", &self.flood_repeat_trigger)
            .field("webhook_timeout_secs", &self.webhook_timeout_secs)
            .field("webhook_max_attempts", &self.webhook_max_attempts)
            .field("webhook_backoff_base_secs", &self.webhook_backoff_base_secs)
            .field("webhook_backoff_cap_secs", &self.webhook_backoff_cap_secs)
            .field(
                "webhook_sweep_interval_secs",
                &self.webhook_sweep_interval_secs,
            )
            .field(
                "announcement_interval_secs",
                &self.announcement_interval_secs,
            )
            .field("context_retention_hours", &self.context_retention_hours)
            .field("maintenance_interval_secs", &self.maintenance_interval_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_logic() {
        // 1. Missing required vars
        env::remove_var("DISCORD_TOKEN");
        env::remove_var("APPLICATION_ID");
        env::remove_var("API_TOKEN");
        let result = Config::build();
        assert!(
            result.is_err(),
            "Should fail when required vars are missing"
        );

        // 2. Defaults
        env::set_var("DISCORD_TOKEN", "test_token");
        env::set_var("APPLICATION_ID", "12345");
        env::set_var("API_TOKEN", "secret_bearer");
        let config = Config::build().unwrap();
        assert_eq!(config.application_id, 12345);
        assert_eq!(config.webhook_max_attempts, 5);
        assert_eq!(config.webhook_backoff_base_secs, 30);
        assert_eq!(config.flood_repeat_trigger, 3);
        assert!(config.has_scope("bot:configure"));
        assert!(config.has_scope("faq:sync"));
        assert!(!config.has_scope("admin:everything"));
        assert!(!config.ai_enabled());

        // 3. Debug redaction
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("test_token"));
        assert!(!debug_output.contains("secret_bearer"));
        assert!(debug_output.contains("[REDACTED]"));

        // Cleanup
        env::remove_var("DISCORD_TOKEN");
        env::remove_var("APPLICATION_ID");
        env::remove_var("API_TOKEN");
    }
}
