#![forbid(unsafe_code)]

mod helix;

use std::time::Duration;

use anyhow::Context;
use golive_domain::{AccountId, LiveSnapshot, LiveStream};
use tracing::{debug, warn};
use url::Url;

use crate::{AcquisitionError, LiveStatusSource, SecretString};
use helix::{HelixClient, HelixStream};

pub const DEFAULT_API_BASE_URL: &str = "https://api.twitch.tv";
pub const DEFAULT_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Twitch live-status source configuration.
#[derive(Debug, Clone)]
pub struct TwitchConfig {
	pub client_id: String,
	pub client_secret: SecretString,
	pub api_base_url: String,
	pub token_url: String,
	/// Bound on one platform call, retry included.
	pub request_timeout: Duration,
	/// Longest advertised rate-limit wait honoured in-line.
	pub max_retry_delay: Duration,
}

impl TwitchConfig {
	pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret,
			api_base_url: DEFAULT_API_BASE_URL.to_string(),
			token_url: DEFAULT_TOKEN_URL.to_string(),
			request_timeout: Duration::from_secs(5),
			max_retry_delay: Duration::from_secs(5),
		}
	}
}

/// Live status from Helix `GET /helix/streams`.
#[derive(Debug)]
pub struct TwitchStreamSource {
	helix: HelixClient,
}

impl TwitchStreamSource {
	pub fn new(cfg: TwitchConfig) -> anyhow::Result<Self> {
		let base_url = Url::parse(&cfg.api_base_url).context("parse twitch api base url")?;
		let token_url = Url::parse(&cfg.token_url).context("parse twitch token url")?;
		let helix = HelixClient::new(
			base_url,
			token_url,
			cfg.client_id,
			cfg.client_secret,
			cfg.request_timeout,
			cfg.max_retry_delay,
		)?;
		Ok(Self { helix })
	}
}

/// Keep live entries for requested accounts, keyed by login.
fn snapshot_from_streams(requested: &[AccountId], streams: Vec<HelixStream>) -> LiveSnapshot {
	let mut snapshot = LiveSnapshot::new();
	for stream in streams {
		if !stream.is_live() {
			debug!(login = %stream.user_login, kind = %stream.kind, "skipping non-live stream entry");
			continue;
		}

		let account = match AccountId::new(stream.user_login.clone()) {
			Ok(id) => id,
			Err(e) => {
				warn!(login = %stream.user_login, error = %e, "helix returned an unusable user_login");
				continue;
			}
		};
		if !requested.contains(&account) {
			continue;
		}

		let display_name = if stream.user_name.trim().is_empty() {
			account.to_string()
		} else {
			stream.user_name
		};

		snapshot.insert(
			account.clone(),
			LiveStream {
				account,
				display_name,
				title: stream.title,
				started_at: stream.started_at,
				viewer_count: stream.viewer_count,
				category: stream.game_name,
				thumbnail_url: stream.thumbnail_url,
			},
		);
	}
	snapshot
}

#[async_trait::async_trait]
impl LiveStatusSource for TwitchStreamSource {
	async fn live_status(&self, accounts: &[AccountId]) -> Result<LiveSnapshot, AcquisitionError> {
		if accounts.is_empty() {
			return Ok(LiveSnapshot::new());
		}

		let streams = self.helix.get_streams(accounts).await?;
		metrics::counter!("golive_helix_polls_total").increment(1);
		Ok(snapshot_from_streams(accounts, streams))
	}
}
