//! Scraper configuration.
//!
//! Loaded once from a YAML file at startup and handed to each component as an
//! `Arc<ScraperConfig>`. Every key except `chain.nodes` has a default.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScraperError};
use crate::notify::EventKind;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub chain: ChainConfig,
    pub mongo: MongoConfig,
    pub redis: RedisConfig,
    pub operations: OperationSets,
    /// Accounts whose authority changes are recorded.
    pub watch_accounts: BTreeSet<String>,
    pub curator_payouts: CuratorPayouts,
    pub notification: NotificationConfig,
    /// Routing table: application name → owned collections.
    pub apps: BTreeMap<String, AppConfig>,
    pub scraper: PipelineConfig,
    pub collections: CollectionNames,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// `steem` or `golos`.
    pub name: String,
    /// JSON-RPC endpoints, tried in order with failover.
    pub nodes: Vec<String>,
    /// Read only irreversible blocks.
    pub irreversible_only: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            name: "steem".into(),
            nodes: Vec::new(),
            irreversible_only: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://127.0.0.1:27017".into(),
            database: "SteemData".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Prefix of the work/result list names.
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
            key_prefix: "chainscraper".into(),
        }
    }
}

/// Operation-type classification sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationSets {
    pub post: BTreeSet<String>,
    pub delegate: BTreeSet<String>,
    pub transfer: BTreeSet<String>,
    pub account: BTreeSet<String>,
}

impl Default for OperationSets {
    fn default() -> Self {
        let set = |names: &[&str]| names.iter().map(|s| s.to_string()).collect();
        Self {
            post: set(&["comment", "vote", "delete_comment", "author_reward"]),
            delegate: set(&["delegate_vesting_shares", "return_vesting_delegation"]),
            transfer: set(&["transfer"]),
            account: set(&["account_update"]),
        }
    }
}

impl OperationSets {
    /// Returns `true` if `op_type` belongs to any configured set.
    pub fn contains(&self, op_type: &str) -> bool {
        self.post.contains(op_type)
            || self.delegate.contains(op_type)
            || self.transfer.contains(op_type)
            || self.account.contains(op_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CuratorPayouts {
    /// Transfers to these accounts are curator payouts.
    pub accounts_for_transfer: BTreeSet<String>,
    pub minimal_sum: f64,
    pub currencies: BTreeSet<String>,
}

impl Default for CuratorPayouts {
    fn default() -> Self {
        Self {
            accounts_for_transfer: BTreeSet::new(),
            minimal_sum: 1.0,
            currencies: ["STEEM", "SBD"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub send: bool,
    pub url: Option<String>,
    pub token: String,
    /// Operation type → notification event.
    pub events: BTreeMap<String, EventKind>,
}

/// Content rule applied to root posts before they are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentRule {
    #[default]
    None,
    /// The body must contain at least one image.
    RequireImages,
}

impl ContentRule {
    /// Returns `true` if a root post with this body may be stored live.
    pub fn accepts(self, body: &str) -> bool {
        match self {
            Self::None => true,
            Self::RequireImages => has_images(body),
        }
    }
}

static IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)!\[[^\]]*\]\([^)\s]+[^)]*\)|<img\b[^>]*>|https?://\S+?\.(?:jpe?g|png|gif|webp|bmp)\b").unwrap()
});

/// Markdown image, `<img>` tag or bare image URL.
pub fn has_images(body: &str) -> bool {
    IMAGE_RE.is_match(body)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub posts: String,
    pub comments: String,
    #[serde(default)]
    pub content_rule: ContentRule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Producer attempts before a direction gives up.
    pub max_attempts: u32,
    /// Unchanged-checkpoint attempts before the producer skips one block.
    pub skip_freq: u32,
    pub workers_per_direction: usize,
    /// Worker sleep when its queue is empty (milliseconds).
    pub polling_interval_ms: u64,
    /// Consolidator sleep when both result queues are empty (milliseconds).
    pub consolidator_idle_ms: u64,
    pub inspector_interval_secs: u64,
    /// Ledger fetch attempts per post before it is treated as absent.
    pub fetch_attempts: u32,
    /// Retries for individual document-store calls.
    pub store_retries: u32,
    pub forward: bool,
    pub backward: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            skip_freq: 5,
            workers_per_direction: 4,
            polling_interval_ms: 500,
            consolidator_idle_ms: 200,
            inspector_interval_secs: 30,
            fetch_attempts: 5,
            store_retries: 4,
            forward: true,
            backward: true,
        }
    }
}

impl PipelineConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn consolidator_idle(&self) -> Duration {
        Duration::from_millis(self.consolidator_idle_ms)
    }

    pub fn inspector_interval(&self) -> Duration {
        Duration::from_secs(self.inspector_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionNames {
    /// Holds the checkpoint document.
    pub settings: String,
    /// Delegate and account-update records.
    pub operations: String,
    pub curators: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            settings: "Settings".into(),
            operations: "Operations".into(),
            curators: "Curators".into(),
        }
    }
}

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    pub level: String,
    /// Override per component: component_name → level
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl ScraperConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ScraperError::Config(format!("invalid YAML: {e}")))?;
        if config.apps.is_empty() {
            config.apps = default_apps();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ScraperError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain.nodes.is_empty() {
            return Err(ScraperError::Config("chain.nodes must list at least one node".into()));
        }
        if !matches!(self.chain.name.as_str(), "steem" | "golos") {
            return Err(ScraperError::Config(format!("unknown chain '{}'", self.chain.name)));
        }
        if self.scraper.max_attempts == 0 {
            return Err(ScraperError::Config("scraper.max_attempts must be positive".into()));
        }
        if self.scraper.skip_freq == 0 {
            return Err(ScraperError::Config("scraper.skip_freq must be positive".into()));
        }
        if self.scraper.workers_per_direction == 0 {
            return Err(ScraperError::Config("scraper.workers_per_direction must be positive".into()));
        }
        if self.scraper.fetch_attempts == 0 {
            return Err(ScraperError::Config("scraper.fetch_attempts must be positive".into()));
        }
        if !self.scraper.forward && !self.scraper.backward {
            return Err(ScraperError::Config("at least one of scraper.forward and scraper.backward must be enabled".into()));
        }
        if self.notification.send && self.notification.url.is_none() {
            return Err(ScraperError::Config("notification.url is required when notification.send is set".into()));
        }
        Ok(())
    }
}

fn default_apps() -> BTreeMap<String, AppConfig> {
    BTreeMap::from([(
        "steepshot".to_string(),
        AppConfig {
            posts: "Posts".into(),
            comments: "Comments".into(),
            content_rule: ContentRule::RequireImages,
        },
    )])
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
chain:
  name: golos
  nodes: ["https://golos.example.org"]
curator_payouts:
  accounts_for_transfer: [watched]
  minimal_sum: 1.0
  currencies: [TOKEN]
notification:
  send: false
  events:
    vote: vote
    transfer: transfer
scraper:
  skip_freq: 3
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg = ScraperConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(cfg.chain.name, "golos");
        assert_eq!(cfg.scraper.skip_freq, 3);
        assert_eq!(cfg.scraper.max_attempts, 1000);
        assert!(cfg.operations.contains("comment"));
        assert!(cfg.operations.contains("delegate_vesting_shares"));
        assert!(!cfg.operations.contains("witness_update"));
        assert_eq!(cfg.notification.events["vote"], EventKind::Vote);
        assert_eq!(cfg.apps["steepshot"].content_rule, ContentRule::RequireImages);
        assert_eq!(cfg.collections.curators, "Curators");
    }

    #[test]
    fn explicit_apps_replace_defaults() {
        let yaml = format!(
            "{MINIMAL}apps:\n  golosio:\n    posts: GolosPosts\n    comments: GolosComments\n"
        );
        let cfg = ScraperConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(cfg.apps.len(), 1);
        assert_eq!(cfg.apps["golosio"].content_rule, ContentRule::None);
    }

    #[test]
    fn rejects_missing_nodes() {
        let err = ScraperConfig::from_yaml_str("chain:\n  name: steem\n").unwrap_err();
        assert!(matches!(err, ScraperError::Config(_)));
    }

    #[test]
    fn rejects_notification_without_url() {
        let yaml = "chain:\n  nodes: [\"http://n\"]\nnotification:\n  send: true\n";
        assert!(ScraperConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn image_detection() {
        assert!(has_images("look ![sunset](https://img.example.org/a.jpg)"));
        assert!(has_images("<p><img src=\"x\"></p>"));
        assert!(has_images("https://i.example.org/photo.PNG"));
        assert!(!has_images("just words and https://example.org/page"));
        assert!(ContentRule::None.accepts(""));
        assert!(!ContentRule::RequireImages.accepts("no pictures here"));
    }

    #[test]
    fn rejects_unknown_chain() {
        let yaml = "chain:\n  name: hive\n  nodes: [\"http://n\"]\n";
        assert!(ScraperConfig::from_yaml_str(yaml).is_err());
    }
}
