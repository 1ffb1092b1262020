#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use golive_domain::AccountId;
use golive_platform::{SecretString, TrackedAccount, WebhookUrl};
use serde::Deserialize;
use tracing::{info, warn};

pub const CONFIG_PATH_ENV: &str = "GOLIVE_CONFIG";

const DEFAULT_NOW_LIVE_MESSAGE: &str = "{name} is now live!";
const DEFAULT_WAS_LIVE_MESSAGE: &str = "{login} was live.";

fn golive_home() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".golive"))
}

/// Default config path: `~/.golive/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	Ok(golive_home()?.join("config.toml"))
}

/// Default state database: `sqlite://~/.golive/state.db`.
pub fn default_state_database_url() -> anyhow::Result<String> {
	Ok(format!("sqlite://{}", golive_home()?.join("state.db").display()))
}

/// Load the config from TOML and env overrides.
pub fn load_config_from_path(path: &Path) -> anyhow::Result<Config> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = Config::from_file(file_cfg)?;

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Daemon config (loaded once, read-only afterwards).
#[derive(Debug, Clone, Default)]
pub struct Config {
	pub twitch: TwitchSettings,
	pub polling: PollingSettings,
	pub state: StateSettings,
	pub server: ServerSettings,
	/// Tracked accounts in configured order.
	pub accounts: Vec<TrackedAccount>,
}

/// Twitch app credentials and endpoints.
#[derive(Debug, Clone, Default)]
pub struct TwitchSettings {
	pub client_id: Option<String>,
	pub client_secret: Option<SecretString>,
	/// Helix base URL override.
	pub api_base_url: Option<String>,
	/// OAuth token endpoint override.
	pub token_url: Option<String>,
}

impl TwitchSettings {
	/// Client id and secret, both required to poll Helix.
	pub fn credentials(&self) -> anyhow::Result<(String, SecretString)> {
		let client_id = self
			.client_id
			.clone()
			.ok_or_else(|| anyhow!("twitch client_id is not configured"))?;
		let client_secret = self
			.client_secret
			.clone()
			.ok_or_else(|| anyhow!("twitch client_secret is not configured"))?;
		Ok((client_id, client_secret))
	}
}

#[derive(Debug, Clone)]
pub struct PollingSettings {
	pub poll_interval: Duration,
	pub error_retry_interval: Duration,
	pub offline_grace: Duration,
	/// Per platform call.
	pub request_timeout: Duration,
}

impl Default for PollingSettings {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(30),
			error_retry_interval: Duration::from_secs(60),
			offline_grace: Duration::from_secs(600),
			request_timeout: Duration::from_secs(5),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct StateSettings {
	/// `sqlite:...` or `memory:`; `None` means the default under `~/.golive`.
	pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	twitch: FileTwitchSettings,

	#[serde(default)]
	polling: FilePollingSettings,

	#[serde(default)]
	state: FileStateSettings,

	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	accounts: Vec<FileAccount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTwitchSettings {
	client_id: Option<String>,
	client_secret: Option<String>,
	api_base_url: Option<String>,
	token_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePollingSettings {
	poll_interval_secs: Option<u64>,
	error_retry_interval_secs: Option<u64>,
	offline_grace_secs: Option<u64>,
	request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileStateSettings {
	database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileAccount {
	login: String,
	webhook_url: String,
	now_live_message: Option<String>,
	was_live_message: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn secs(v: Option<u64>, default: Duration, field: &str) -> Duration {
	match v {
		Some(0) => {
			warn!(field, "config: zero duration ignored");
			default
		}
		Some(s) => Duration::from_secs(s),
		None => default,
	}
}

impl Config {
	fn from_file(file: FileConfig) -> anyhow::Result<Self> {
		let defaults = PollingSettings::default();
		let polling = PollingSettings {
			poll_interval: secs(file.polling.poll_interval_secs, defaults.poll_interval, "poll_interval_secs"),
			error_retry_interval: secs(
				file.polling.error_retry_interval_secs,
				defaults.error_retry_interval,
				"error_retry_interval_secs",
			),
			offline_grace: secs(file.polling.offline_grace_secs, defaults.offline_grace, "offline_grace_secs"),
			request_timeout: secs(
				file.polling.request_timeout_secs,
				defaults.request_timeout,
				"request_timeout_secs",
			),
		};

		let mut seen = HashSet::new();
		let mut accounts = Vec::with_capacity(file.accounts.len());
		for (idx, entry) in file.accounts.into_iter().enumerate() {
			let id = AccountId::new(entry.login.clone())
				.with_context(|| format!("accounts[{idx}]: invalid login {:?}", entry.login))?;
			if !seen.insert(id.clone()) {
				return Err(anyhow!("accounts[{idx}]: duplicate login {id}"));
			}
			let webhook = WebhookUrl::parse(&entry.webhook_url).with_context(|| format!("accounts[{idx}] ({id})"))?;

			accounts.push(TrackedAccount {
				id,
				webhook,
				now_live_message: entry
					.now_live_message
					.unwrap_or_else(|| DEFAULT_NOW_LIVE_MESSAGE.to_string()),
				was_live_message: entry
					.was_live_message
					.unwrap_or_else(|| DEFAULT_WAS_LIVE_MESSAGE.to_string()),
			});
		}

		Ok(Self {
			twitch: TwitchSettings {
				client_id: non_empty(file.twitch.client_id),
				client_secret: non_empty(file.twitch.client_secret).map(SecretString::new),
				api_base_url: non_empty(file.twitch.api_base_url),
				token_url: non_empty(file.twitch.token_url),
			},
			polling,
			state: StateSettings {
				database_url: non_empty(file.state.database_url),
			},
			server: ServerSettings {
				metrics_bind: non_empty(file.server.metrics_bind),
				health_bind: non_empty(file.server.health_bind),
			},
			accounts,
		})
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut Config) {
	apply_overrides_from(cfg, |key| std::env::var(key).ok());

	if cfg.accounts.is_empty() {
		warn!("config: no accounts configured; nothing will be tracked");
	}
}

fn parse_env_secs(v: &str) -> Option<Duration> {
	v.trim().parse::<u64>().ok().filter(|s| *s > 0).map(Duration::from_secs)
}

fn apply_overrides_from(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
	if let Some(v) = var("GOLIVE_TWITCH_CLIENT_ID").and_then(|v| non_empty(Some(v))) {
		cfg.twitch.client_id = Some(v);
		info!("twitch config: client_id overridden by env");
	}

	if let Some(v) = var("GOLIVE_TWITCH_CLIENT_SECRET").and_then(|v| non_empty(Some(v))) {
		cfg.twitch.client_secret = Some(SecretString::new(v));
		info!("twitch config: client_secret overridden by env");
	}

	if let Some(v) = var("GOLIVE_TWITCH_API_BASE_URL").and_then(|v| non_empty(Some(v))) {
		cfg.twitch.api_base_url = Some(v);
		info!("twitch config: api_base_url overridden by env");
	}

	if let Some(v) = var("GOLIVE_POLL_INTERVAL_SECS") {
		match parse_env_secs(&v) {
			Some(d) => {
				cfg.polling.poll_interval = d;
				info!(secs = d.as_secs(), "polling config: poll_interval overridden by env");
			}
			None => warn!(value = %v, "polling config: ignoring invalid GOLIVE_POLL_INTERVAL_SECS"),
		}
	}

	if let Some(v) = var("GOLIVE_ERROR_RETRY_INTERVAL_SECS") {
		match parse_env_secs(&v) {
			Some(d) => {
				cfg.polling.error_retry_interval = d;
				info!(secs = d.as_secs(), "polling config: error_retry_interval overridden by env");
			}
			None => warn!(value = %v, "polling config: ignoring invalid GOLIVE_ERROR_RETRY_INTERVAL_SECS"),
		}
	}

	if let Some(v) = var("GOLIVE_OFFLINE_GRACE_SECS") {
		match parse_env_secs(&v) {
			Some(d) => {
				cfg.polling.offline_grace = d;
				info!(secs = d.as_secs(), "polling config: offline_grace overridden by env");
			}
			None => warn!(value = %v, "polling config: ignoring invalid GOLIVE_OFFLINE_GRACE_SECS"),
		}
	}

	if let Some(v) = var("GOLIVE_REQUEST_TIMEOUT_SECS") {
		match parse_env_secs(&v) {
			Some(d) => {
				cfg.polling.request_timeout = d;
				info!(secs = d.as_secs(), "polling config: request_timeout overridden by env");
			}
			None => warn!(value = %v, "polling config: ignoring invalid GOLIVE_REQUEST_TIMEOUT_SECS"),
		}
	}

	if let Some(v) = var("GOLIVE_STATE_DATABASE_URL").and_then(|v| non_empty(Some(v))) {
		cfg.state.database_url = Some(v);
		info!("state config: database_url overridden by env");
	}

	if let Some(v) = var("GOLIVE_METRICS_BIND").and_then(|v| non_empty(Some(v))) {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = var("GOLIVE_HEALTH_BIND").and_then(|v| non_empty(Some(v))) {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}
}

#[cfg(test)]
pub(crate) fn parse_config_str(s: &str) -> anyhow::Result<Config> {
	let file: FileConfig = toml::from_str(s).context("parse TOML")?;
	Config::from_file(file)
}
