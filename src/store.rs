use crate::db::{ConfigRow, Database};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Feature toggles for one community's bot integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    #[serde(default = "default_true")]
    pub faq_autoreply: bool,
    #[serde(default = "default_true")]
    pub flood_detection: bool,
    #[serde(default = "default_true")]
    pub escalation: bool,
    #[serde(default = "default_true")]
    pub scheduled_announcements: bool,
    #[serde(default = "default_true")]
    pub thread_autocreate: bool,
    #[serde(default = "default_true")]
    pub sentiment_detection: bool,
    #[serde(default = "default_true")]
    pub pin_auto_answers: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Features {
    fn default() -> Self {
        Self {
            faq_autoreply: true,
            flood_detection: true,
            escalation: true,
            scheduled_announcements: true,
            thread_autocreate: true,
            sentiment_detection: true,
            pin_auto_answers: true,
        }
    }
}

/// Per-community bot configuration, stored as JSON alongside its indexed
/// columns (community id, guild id, status).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityConfig {
    pub community_id: String,
    pub guild_id: String,
    pub escalation_channel_id: String,
    #[serde(default)]
    pub features: Features,
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: f64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    pub webhook_url: String,
    pub webhook_secret: String,
    #[serde(default = "default_true")]
    pub send_to_platform_webhook: bool,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default)]
    pub welcome_message: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_reminder_leads")]
    pub reminder_lead_minutes: Vec<i64>,
}

fn default_escalation_threshold() -> f64 {
    0.7
}

fn default_similarity_threshold() -> f64 {
    0.78
}

fn default_tone() -> String {
    "casual".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_reminder_leads() -> Vec<i64> {
    vec![10, 60, 1440]
}

/// Partial update for PATCH requests: only present fields are applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPatch {
    pub escalation_channel_id: Option<String>,
    pub features: Option<Features>,
    pub escalation_threshold: Option<f64>,
    pub similarity_threshold: Option<f64>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub send_to_platform_webhook: Option<bool>,
    pub tone: Option<String>,
    pub welcome_message: Option<String>,
    pub timezone: Option<String>,
    pub reminder_lead_minutes: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStatus {
    Active,
    Disabled,
}

impl ConfigStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigStatus::Active => "active",
            ConfigStatus::Disabled => "disabled",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "active" => ConfigStatus::Active,
            _ => ConfigStatus::Disabled,
        }
    }
}

/// A stored configuration together with its lifecycle state. Disabled
/// records are still returned by lookups so callers can audit them; every
/// acting caller must check `is_active` first.
#[derive(Debug, Clone)]
pub struct ConfigRecord {
    pub id: i64,
    pub status: ConfigStatus,
    pub config: CommunityConfig,
}

impl ConfigRecord {
    pub fn is_active(&self) -> bool {
        self.status == ConfigStatus::Active
    }

    fn from_row(row: ConfigRow) -> anyhow::Result<Self> {
        let config: CommunityConfig = serde_json::from_str(&row.config_json)?;
        Ok(Self {
            id: row.id,
            status: ConfigStatus::from_str(&row.status),
            config,
        })
    }
}

/// Read-mostly store for community configurations, backed by SQLite with an
/// in-memory cache refreshed on every write.
pub struct ConfigStore {
    db: Database,
    cache: RwLock<HashMap<String, Arc<ConfigRecord>>>,
}

impl ConfigStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Warms the cache from the database. Called once at startup.
    pub async fn load_all(&self) -> anyhow::Result<usize> {
        let db = self.db.clone();
        let rows = tokio::task::spawn_blocking(move || db.list_configs()).await??;

        let mut cache = self.cache.write().unwrap();
        cache.clear();
        for row in rows {
            let record = ConfigRecord::from_row(row)?;
            cache.insert(record.config.community_id.clone(), Arc::new(record));
        }
        info!("Config store: loaded {} community configurations", cache.len());
        Ok(cache.len())
    }

    pub async fn upsert(&self, config: CommunityConfig) -> Result<i64, PipelineError> {
        validate(&config)?;

        let db = self.db.clone();
        let community_id = config.community_id.clone();
        let guild_id = config.guild_id.clone();
        let json = serde_json::to_string(&config).map_err(anyhow::Error::from)?;
        let id = tokio::task::spawn_blocking(move || {
            db.upsert_config(&community_id, &guild_id, &json)
        })
        .await
        .map_err(anyhow::Error::from)??;

        let record = Arc::new(ConfigRecord {
            id,
            status: ConfigStatus::Active,
            config: config.clone(),
        });
        self.cache
            .write()
            .unwrap()
            .insert(config.community_id.clone(), record);
        info!(
            "Config store: applied configuration for community {}",
            config.community_id
        );
        Ok(id)
    }

    /// Returns the record (active or disabled) for a community, or None.
    pub async fn get(&self, community_id: &str) -> anyhow::Result<Option<Arc<ConfigRecord>>> {
        if let Some(record) = self.cache.read().unwrap().get(community_id) {
            return Ok(Some(record.clone()));
        }

        let db = self.db.clone();
        let community_id_owned = community_id.to_string();
        let row =
            tokio::task::spawn_blocking(move || db.get_config(&community_id_owned)).await??;

        match row {
            Some(row) => {
                let record = Arc::new(ConfigRecord::from_row(row)?);
                self.cache
                    .write()
                    .unwrap()
                    .insert(community_id.to_string(), record.clone());
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub async fn get_by_id(&self, id: i64) -> anyhow::Result<Option<Arc<ConfigRecord>>> {
        let db = self.db.clone();
        let row = tokio::task::spawn_blocking(move || db.get_config_by_id(id)).await??;
        row.map(|r| ConfigRecord::from_row(r).map(Arc::new))
            .transpose()
    }

    pub async fn get_by_guild(&self, guild_id: &str) -> anyhow::Result<Option<Arc<ConfigRecord>>> {
        {
            let cache = self.cache.read().unwrap();
            if let Some(record) = cache.values().find(|r| r.config.guild_id == guild_id) {
                return Ok(Some(record.clone()));
            }
        }

        let db = self.db.clone();
        let guild_id_owned = guild_id.to_string();
        let row =
            tokio::task::spawn_blocking(move || db.get_config_by_guild(&guild_id_owned)).await??;

        match row {
            Some(row) => {
                let record = Arc::new(ConfigRecord::from_row(row)?);
                self.cache
                    .write()
                    .unwrap()
                    .insert(record.config.community_id.clone(), record.clone());
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Applies a partial update to an existing configuration, revalidating
    /// the merged result before persisting.
    pub async fn patch(&self, id: i64, patch: ConfigPatch) -> Result<Arc<ConfigRecord>, PipelineError> {
        let record = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| PipelineError::ConfigNotFound(format!("config id {}", id)))?;

        let mut config = record.config.clone();
        apply_patch(&mut config, patch);
        validate(&config)?;

        let db = self.db.clone();
        let json = serde_json::to_string(&config).map_err(anyhow::Error::from)?;
        tokio::task::spawn_blocking(move || db.update_config_json(id, &json))
            .await
            .map_err(anyhow::Error::from)??;

        let updated = Arc::new(ConfigRecord {
            id,
            status: record.status,
            config: config.clone(),
        });
        self.cache
            .write()
            .unwrap()
            .insert(config.community_id.clone(), updated.clone());
        Ok(updated)
    }

    /// Soft-disables a configuration. The row is preserved; in-flight
    /// deliveries for the community observe the flipped status and abort.
    pub async fn disable(&self, id: i64) -> Result<(), PipelineError> {
        let record = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| PipelineError::ConfigNotFound(format!("config id {}", id)))?;

        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.set_config_status(id, "disabled"))
            .await
            .map_err(anyhow::Error::from)??;

        let disabled = Arc::new(ConfigRecord {
            id,
            status: ConfigStatus::Disabled,
            config: record.config.clone(),
        });
        self.cache
            .write()
            .unwrap()
            .insert(record.config.community_id.clone(), disabled);
        info!(
            "Config store: disabled configuration for community {}",
            record.config.community_id
        );
        Ok(())
    }
}

fn apply_patch(config: &mut CommunityConfig, patch: ConfigPatch) {
    if let Some(v) = patch.escalation_channel_id {
        config.escalation_channel_id = v;
    }
    if let Some(v) = patch.features {
        config.features = v;
    }
    if let Some(v) = patch.escalation_threshold {
        config.escalation_threshold = v;
    }
    if let Some(v) = patch.similarity_threshold {
        config.similarity_threshold = v;
    }
    if let Some(v) = patch.webhook_url {
        config.webhook_url = v;
    }
    if let Some(v) = patch.webhook_secret {
        config.webhook_secret = v;
    }
    if let Some(v) = patch.send_to_platform_webhook {
        config.send_to_platform_webhook = v;
    }
    if let Some(v) = patch.tone {
        config.tone = v;
    }
    if let Some(v) = patch.welcome_message {
        config.welcome_message = Some(v);
    }
    if let Some(v) = patch.timezone {
        config.timezone = v;
    }
    if let Some(v) = patch.reminder_lead_minutes {
        config.reminder_lead_minutes = v;
    }
}

fn validate(config: &CommunityConfig) -> Result<(), PipelineError> {
    if config.community_id.trim().is_empty() {
        return Err(PipelineError::Validation(
            "community_id must not be empty".to_string(),
        ));
    }
    if config.guild_id.trim().is_empty() {
        return Err(PipelineError::Validation(
            "guild_id must not be empty".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.escalation_threshold) {
        return Err(PipelineError::Validation(format!(
            "escalation_threshold must be within [0, 1], got {}",
            config.escalation_threshold
        )));
    }
    if !(0.0..=1.0).contains(&config.similarity_threshold) {
        return Err(PipelineError::Validation(format!(
            "similarity_threshold must be within [0, 1], got {}",
            config.similarity_threshold
        )));
    }
    if config.send_to_platform_webhook && !config.webhook_url.starts_with("https://") {
        return Err(PipelineError::Validation(
            "webhook_url must use https when platform delivery is enabled".to_string(),
        ));
    }
    if config.reminder_lead_minutes.iter().any(|m| *m < 1) {
        return Err(PipelineError::Validation(
            "reminder_lead_minutes must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
pub fn test_config(community_id: &str, guild_id: &str) -> CommunityConfig {
    CommunityConfig {
        community_id: community_id.to_string(),
        guild_id: guild_id.to_string(),
        escalation_channel_id: "900".to_string(),
        features: Features::default(),
        escalation_threshold: 0.7,
        similarity_threshold: 0.78,
        webhook_url: "https://platform.test/hooks/bot".to_string(),
        webhook_secret: "s3cret".to_string(),
        send_to_platform_webhook: true,
        tone: "casual".to_string(),
        welcome_message: None,
        timezone: "UTC".to_string(),
        reminder_lead_minutes: vec![10, 60],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConfigStore {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        ConfigStore::new(db)
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let store = store();
        let id = store.upsert(test_config("hack-1", "g1")).await.unwrap();

        let record = store.get("hack-1").await.unwrap().unwrap();
        assert_eq!(record.id, id);
        assert!(record.is_active());
        assert_eq!(record.config.similarity_threshold, 0.78);

        assert!(store.get("hack-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_threshold_validation() {
        let store = store();

        let mut bad = test_config("hack-1", "g1");
        bad.escalation_threshold = 1.5;
        assert!(matches!(
            store.upsert(bad).await,
            Err(PipelineError::Validation(_))
        ));

        let mut bad = test_config("hack-1", "g1");
        bad.similarity_threshold = -0.1;
        assert!(matches!(
            store.upsert(bad).await,
            Err(PipelineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_webhook_url_must_be_https() {
        let store = store();

        let mut bad = test_config("hack-1", "g1");
        bad.webhook_url = "http://insecure.test/hook".to_string();
        assert!(matches!(
            store.upsert(bad).await,
            Err(PipelineError::Validation(_))
        ));

        // Plain http is fine once platform delivery is off
        let mut ok = test_config("hack-1", "g1");
        ok.webhook_url = "http://insecure.test/hook".to_string();
        ok.send_to_platform_webhook = false;
        assert!(store.upsert(ok).await.is_ok());
    }

    #[tokio::test]
    async fn test_disable_is_soft() {
        let store = store();
        let id = store.upsert(test_config("hack-1", "g1")).await.unwrap();

        store.disable(id).await.unwrap();

        // get still returns the record, but it is no longer active
        let record = store.get("hack-1").await.unwrap().unwrap();
        assert!(!record.is_active());

        // disabling an unknown id is ConfigNotFound
        assert!(matches!(
            store.disable(9999).await,
            Err(PipelineError::ConfigNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_patch_merges_and_revalidates() {
        let store = store();
        let id = store.upsert(test_config("hack-1", "g1")).await.unwrap();

        let patch = ConfigPatch {
            escalation_threshold: Some(0.9),
            ..Default::default()
        };
        let record = store.patch(id, patch).await.unwrap();
        assert_eq!(record.config.escalation_threshold, 0.9);
        // Untouched fields survive
        assert_eq!(record.config.similarity_threshold, 0.78);

        let bad = ConfigPatch {
            similarity_threshold: Some(2.0),
            ..Default::default()
        };
        assert!(matches!(
            store.patch(id, bad).await,
            Err(PipelineError::Validation(_))
        ));

        assert!(matches!(
            store.patch(424242, ConfigPatch::default()).await,
            Err(PipelineError::ConfigNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_by_guild() {
        let store = store();
        store.upsert(test_config("hack-1", "guild-7")).await.unwrap();

        let record = store.get_by_guild("guild-7").await.unwrap().unwrap();
        assert_eq!(record.config.community_id, "hack-1");
        assert!(store.get_by_guild("guild-8").await.unwrap().is_none());
    }
}
