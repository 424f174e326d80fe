use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{env_optional, env_u64, env_usize, BotError, Result};

pub(crate) const DEFAULT_CONFIG_PATH: &str = "./catbot.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct BotConfig {
    #[serde(default)]
    pub(crate) bot: BotSection,
    #[serde(default)]
    pub(crate) slack: SlackSection,
    #[serde(default)]
    pub(crate) catmaid: CatmaidSection,
    #[serde(default)]
    pub(crate) nblast: NblastSection,
    #[serde(default)]
    pub(crate) plot: PlotSection,
    #[serde(default)]
    pub(crate) zotero: Option<ZoteroSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BotSection {
    #[serde(default = "default_bot_name")]
    pub(crate) name: String,
    /// Ceiling on concurrently live workers (threads plus subprocesses).
    #[serde(default = "default_max_parallel")]
    pub(crate) max_parallel: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub(crate) poll_interval_ms: u64,
    #[serde(default = "default_data_dir")]
    pub(crate) data_dir: PathBuf,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            max_parallel: default_max_parallel(),
            poll_interval_ms: default_poll_interval_ms(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct SlackSection {
    #[serde(default)]
    pub(crate) bot_token: String,
    /// App-level token (`xapp-...`) used to open the Socket Mode connection.
    #[serde(default)]
    pub(crate) app_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CatmaidSection {
    #[serde(default)]
    pub(crate) server_url: String,
    #[serde(default)]
    pub(crate) auth_token: String,
    #[serde(default)]
    pub(crate) http_user: Option<String>,
    #[serde(default)]
    pub(crate) http_password: Option<String>,
    #[serde(default = "default_project_id")]
    pub(crate) project_id: u64,
    #[serde(default = "default_stack_id")]
    pub(crate) stack_id: u64,
    #[serde(default)]
    pub(crate) autoseg_server_url: Option<String>,
    /// Timeout for handler-thread requests.
    #[serde(default = "default_catmaid_timeout_ms")]
    pub(crate) timeout_ms: u64,
    /// Timeout for the lookups the main loop makes before starting a search.
    #[serde(default = "default_lookup_timeout_ms")]
    pub(crate) lookup_timeout_ms: u64,
}

impl Default for CatmaidSection {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            auth_token: String::new(),
            http_user: None,
            http_password: None,
            project_id: default_project_id(),
            stack_id: default_stack_id(),
            autoseg_server_url: None,
            timeout_ms: default_catmaid_timeout_ms(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NblastSection {
    /// Interpreter command line, split shell-style (e.g. `python3 -u`).
    #[serde(default = "default_interpreter")]
    pub(crate) interpreter: String,
    #[serde(default = "default_script")]
    pub(crate) script: PathBuf,
    #[serde(default = "default_fafb_script")]
    pub(crate) fafb_script: PathBuf,
    #[serde(default)]
    pub(crate) flycircuit_db: Option<String>,
    #[serde(default)]
    pub(crate) janelia_gmr_db: Option<String>,
    #[serde(default)]
    pub(crate) fafb_dump: Option<String>,
}

impl Default for NblastSection {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script: default_script(),
            fafb_script: default_fafb_script(),
            flycircuit_db: None,
            janelia_gmr_db: None,
            fafb_dump: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PlotSection {
    #[serde(default = "default_neuropil")]
    pub(crate) default_volume: String,
}

impl Default for PlotSection {
    fn default() -> Self {
        Self {
            default_volume: default_neuropil(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ZoteroSection {
    pub(crate) group_id: String,
    #[serde(default)]
    pub(crate) api_key: String,
}

fn default_bot_name() -> String {
    "catbot".to_string()
}

fn default_max_parallel() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_project_id() -> u64 {
    1
}

fn default_stack_id() -> u64 {
    5
}

fn default_catmaid_timeout_ms() -> u64 {
    120_000
}

fn default_lookup_timeout_ms() -> u64 {
    10_000
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_script() -> PathBuf {
    PathBuf::from("ffnblast.py")
}

fn default_fafb_script() -> PathBuf {
    PathBuf::from("ffnblast_fafb.py")
}

fn default_neuropil() -> String {
    "v14.neuropil".to_string()
}

pub(crate) fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }
    if let Some(value) = env_optional("CATBOT_CONFIG") {
        return PathBuf::from(value);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

impl BotConfig {
    /// Read the config file (if present) and layer environment secrets on top.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let mut config = crate::load_file_config(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub(crate) fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(token) = env_optional("SLACK_BOT_TOKEN") {
            self.slack.bot_token = token;
        }
        if let Some(token) = env_optional("SLACK_APP_TOKEN") {
            self.slack.app_token = token;
        }
        if let Some(url) = env_optional("CATMAID_SERVER_URL") {
            self.catmaid.server_url = url;
        }
        if let Some(token) = env_optional("CATMAID_AUTHTOKEN") {
            self.catmaid.auth_token = token;
        }
        if let Some(user) = env_optional("CATMAID_HTTP_USER") {
            self.catmaid.http_user = Some(user);
        }
        if let Some(pw) = env_optional("CATMAID_HTTP_PW") {
            self.catmaid.http_password = Some(pw);
        }
        if let Some(zotero) = self.zotero.as_mut() {
            if let Some(key) = env_optional("ZOTERO_API_KEY") {
                zotero.api_key = key;
            }
        }
        self.bot.max_parallel = env_usize("CATBOT_MAX_PARALLEL", self.bot.max_parallel)?;
        self.bot.poll_interval_ms = env_u64("CATBOT_POLL_INTERVAL_MS", self.bot.poll_interval_ms)?;
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.slack.bot_token.trim().is_empty() {
            return Err(BotError::Config("Missing slack.bot_token (SLACK_BOT_TOKEN)".into()));
        }
        if self.slack.app_token.trim().is_empty() {
            return Err(BotError::Config("Missing slack.app_token (SLACK_APP_TOKEN)".into()));
        }
        if self.catmaid.server_url.trim().is_empty() {
            return Err(BotError::Config(
                "Missing catmaid.server_url (CATMAID_SERVER_URL)".into(),
            ));
        }
        if self.bot.max_parallel == 0 {
            return Err(BotError::Config("bot.max_parallel must be at least 1".into()));
        }
        if self.bot.poll_interval_ms == 0 {
            return Err(BotError::Config("bot.poll_interval_ms must be at least 1".into()));
        }
        if self.catmaid.timeout_ms == 0 || self.catmaid.lookup_timeout_ms == 0 {
            return Err(BotError::Config("catmaid timeouts must be at least 1 ms".into()));
        }
        if shlex::split(&self.nblast.interpreter).is_none_or(|parts| parts.is_empty()) {
            return Err(BotError::Config(format!(
                "Invalid nblast.interpreter: {:?}",
                self.nblast.interpreter
            )));
        }
        Ok(())
    }

    pub(crate) fn neurondb_path(&self) -> PathBuf {
        self.bot.data_dir.join("neurondb.sqlite")
    }

    pub(crate) fn subscriptions_path(&self) -> PathBuf {
        self.bot.data_dir.join("subscriptions.sqlite")
    }

    pub(crate) fn renderings_dir(&self) -> PathBuf {
        self.bot.data_dir.join("renderings")
    }

    pub(crate) fn log_path(&self) -> PathBuf {
        self.bot.data_dir.join("catbot.log")
    }

    pub(crate) fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.bot.poll_interval_ms)
    }
}
