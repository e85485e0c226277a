use std::{
    collections::BTreeSet,
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::config::Settings;
use crate::error::{ModerationError, ModerationResult};
use crate::ledger::CaseLedger;
use crate::moderation::escalation::EscalationTracker;
use crate::moderation::filters::compile_pattern;
use crate::moderation::pipeline::ModerationPipeline;
use crate::platform::Platform;
use crate::store::MemoryStore;
use crate::sweeper::{PollSweeper, SweepRequest, SweeperService, TempBanSweeper, WindowSweeper};
use crate::temp_bans::TempBanService;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;
use tracing::{info, warn};

/// A filter driven by a list of words
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WordListPolicy {
    pub enabled: bool,
    pub words: Vec<String>,
}

/// A filter driven by a list of regular expressions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternPolicy {
    pub enabled: bool,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapsPolicy {
    pub enabled: bool,
    /// Uppercase share of letters at which a message flags
    pub ratio: f64,
    /// Messages with fewer letters never flag
    pub min_length: usize,
}

impl Default for CapsPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            ratio: 0.7,
            min_length: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MentionPolicy {
    pub enabled: bool,
    pub max: usize,
}

impl Default for MentionPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max: 5,
        }
    }
}

/// Automatic timeout after repeated violations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    pub enabled: bool,
    pub max_violations: usize,
    pub window_minutes: u32,
    pub timeout_minutes: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_violations: 3,
            window_minutes: 5,
            timeout_minutes: 5,
        }
    }
}

impl EscalationPolicy {
    #[must_use]
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.window_minutes))
    }

    #[must_use]
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.timeout_minutes) * 60)
    }
}

/// Automod settings for one guild
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationPolicy {
    pub banned_words: WordListPolicy,
    pub regex_filters: PatternPolicy,
    pub caps: CapsPolicy,
    pub mentions: MentionPolicy,
    pub swears: WordListPolicy,
    /// Members with Manage Messages skip automod
    pub bypass_staff: bool,
    pub escalation: EscalationPolicy,
}

impl Default for ModerationPolicy {
    fn default() -> Self {
        Self {
            banned_words: WordListPolicy::default(),
            regex_filters: PatternPolicy::default(),
            caps: CapsPolicy::default(),
            mentions: MentionPolicy::default(),
            swears: WordListPolicy::default(),
            bypass_staff: true,
            escalation: EscalationPolicy::default(),
        }
    }
}

/// Guild policy document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub guild_id: u64,
    pub moderation: ModerationPolicy,
    pub mod_log_channel_id: Option<u64>,
    pub mod_role_id: Option<u64>,
    pub ignored_channel_ids: BTreeSet<u64>,
}

impl PolicyConfig {
    #[must_use]
    pub fn for_guild(guild_id: u64) -> Self {
        Self {
            guild_id,
            ..Self::default()
        }
    }

    /// Regex patterns that will be skipped at evaluation time
    #[must_use]
    pub fn invalid_patterns(&self) -> Vec<ModerationError> {
        self.moderation
            .regex_filters
            .patterns
            .iter()
            .map(|pattern| pattern.trim())
            .filter(|pattern| !pattern.is_empty())
            .filter_map(|pattern| compile_pattern(pattern).err())
            .collect()
    }
}

/// Per-guild policy documents, kept in memory and saved as YAML
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    configs: Arc<DashMap<u64, PolicyConfig>>,
    path: Option<PathBuf>,
}

impl PolicyStore {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load policies from `path`; a missing file yields an empty store
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: impl Into<PathBuf>) -> ModerationResult<Self> {
        let path = path.into();
        let store = Self {
            configs: Arc::new(DashMap::new()),
            path: Some(path.clone()),
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let configs: Vec<PolicyConfig> = serde_yaml::from_str(&content)?;
                for config in configs {
                    for invalid in config.invalid_patterns() {
                        warn!(guild_id = config.guild_id, error = %invalid, "Policy has an unusable pattern");
                    }
                    store.configs.insert(config.guild_id, config);
                }
                info!(path = %path.display(), guilds = store.configs.len(), "Loaded guild policies");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No policy file yet, using defaults");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(store)
    }

    /// The guild's policy, or the defaults if it has none
    #[must_use]
    pub fn fetch(&self, guild_id: u64) -> PolicyConfig {
        self.configs
            .get(&guild_id)
            .map_or_else(|| PolicyConfig::for_guild(guild_id), |entry| entry.value().clone())
    }

    /// Replace one guild's policy and write the file
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, config: PolicyConfig) -> ModerationResult<()> {
        for invalid in config.invalid_patterns() {
            warn!(guild_id = config.guild_id, error = %invalid, "Saving policy with an unusable pattern");
        }
        self.configs.insert(config.guild_id, config);
        self.persist().await
    }

    /// Write every policy to the YAML file, if one is configured
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub async fn persist(&self) -> ModerationResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut configs: Vec<PolicyConfig> = self
            .configs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        configs.sort_by_key(|config| config.guild_id);

        let yaml = serde_yaml::to_string(&configs)?;
        write_file(path, &yaml).await?;
        Ok(())
    }
}

async fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    let tmp = path.with_extension("yaml.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("settings", &self.settings)
            .field("store", &self.store)
            .field("escalation_windows", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct DataInner {
    pub settings: Settings,
    pub policies: PolicyStore,
    pub store: Arc<MemoryStore>,
    pub platform: Arc<dyn Platform>,
    pub ledger: CaseLedger,
    pub pipeline: ModerationPipeline,
    pub temp_bans: TempBanService,
    pub tracker: EscalationTracker,
    /// Requests for the background sweeper task
    pub sweeps: Sender<SweepRequest>,
}

impl Data {
    /// Wire the moderation services together
    #[must_use]
    pub fn new(
        settings: Settings,
        policies: PolicyStore,
        store: Arc<MemoryStore>,
        platform: Arc<dyn Platform>,
        sweeps: Sender<SweepRequest>,
    ) -> Self {
        let ledger = CaseLedger::new(store.clone(), Arc::clone(&platform), settings.case_retries);
        let tracker = EscalationTracker::new();
        let pipeline =
            ModerationPipeline::new(Arc::clone(&platform), ledger.clone(), tracker.clone());
        let temp_bans = TempBanService::new(store.clone(), Arc::clone(&platform), ledger.clone());

        Self(Arc::new(DataInner {
            settings,
            policies,
            store,
            platform,
            ledger,
            pipeline,
            temp_bans,
            tracker,
            sweeps,
        }))
    }

    /// Sweepers for expired temp bans, due polls and idle escalation windows
    #[must_use]
    pub fn sweeper_service(&self) -> SweeperService {
        let batch = self.settings.sweep_batch;
        SweeperService::new(self.settings.sweep_interval)
            .with(TempBanSweeper::new(
                self.store.clone(),
                Arc::clone(&self.platform),
                self.ledger.clone(),
                self.policies.clone(),
                batch,
            ))
            .with(PollSweeper::new(
                self.store.clone(),
                Arc::clone(&self.platform),
                batch,
            ))
            .with(WindowSweeper::new(self.tracker.clone()))
    }

    /// Write policies and the moderation snapshot
    ///
    /// # Errors
    /// Returns the first write failure.
    pub async fn save(&self) -> ModerationResult<()> {
        self.policies.persist().await?;
        self.store.persist().await
    }
}
