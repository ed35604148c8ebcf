use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `OUTREACH__` and TOML config files.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sequence: SequenceConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between dispatch ticks.
    #[serde(default = "default_dispatch_interval_secs")]
    pub dispatch_interval_secs: u64,
    /// Upper bound on campaigns examined per tick.
    #[serde(default = "default_max_campaigns_per_tick")]
    pub max_campaigns_per_tick: usize,
    /// Interval used when a campaign does not specify one.
    #[serde(default = "default_batch_interval_minutes")]
    pub default_batch_interval_minutes: u32,
    /// Transient dispatch attempts before a batch is marked failed.
    #[serde(default = "default_max_dispatch_attempts")]
    pub max_dispatch_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequenceConfig {
    /// Seconds between sequence-progression ticks.
    #[serde(default = "default_sequence_interval_secs")]
    pub tick_interval_secs: u64,
    /// Upper bound on links evaluated per tick.
    #[serde(default = "default_max_links_per_tick")]
    pub max_links_per_tick: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Seconds between janitor sweeps.
    #[serde(default = "default_recovery_interval_secs")]
    pub tick_interval_secs: u64,
    /// A Sending campaign with no sent batches is considered stuck after
    /// this many minutes without an update.
    #[serde(default = "default_stuck_after_minutes")]
    pub stuck_after_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_dispatch_interval_secs() -> u64 {
    60
}
fn default_max_campaigns_per_tick() -> usize {
    100
}
fn default_batch_interval_minutes() -> u32 {
    60
}
fn default_max_dispatch_attempts() -> u32 {
    5
}
fn default_sequence_interval_secs() -> u64 {
    120
}
fn default_max_links_per_tick() -> usize {
    200
}
fn default_recovery_interval_secs() -> u64 {
    900
}
fn default_stuck_after_minutes() -> i64 {
    30
}
fn default_from_email() -> String {
    "outreach@example.com".to_string()
}
fn default_from_name() -> String {
    "Outreach Express".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_secs: default_dispatch_interval_secs(),
            max_campaigns_per_tick: default_max_campaigns_per_tick(),
            default_batch_interval_minutes: default_batch_interval_minutes(),
            max_dispatch_attempts: default_max_dispatch_attempts(),
        }
    }
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_sequence_interval_secs(),
            max_links_per_tick: default_max_links_per_tick(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_recovery_interval_secs(),
            stuck_after_minutes: default_stuck_after_minutes(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            from_email: default_from_email(),
            from_name: default_from_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            scheduler: SchedulerConfig::default(),
            sequence: SequenceConfig::default(),
            recovery: RecoveryConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("OUTREACH")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
