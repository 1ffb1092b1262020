#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use golive_domain::AccountId;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::http::{retry_delay_from_headers, send_with_retry};
use crate::{AcquisitionError, SecretString};

const STREAMS_PATH: &str = "/helix/streams";

/// Helix accepts at most 100 `user_login` filters per request.
pub(crate) const MAX_LOGINS_PER_REQUEST: usize = 100;

/// Refresh the app token this long before Twitch expires it.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Longest token lifetime trusted from the token endpoint.
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(90 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct AppToken {
	access_token: SecretString,
	expires_at: Instant,
}

/// Helix client authenticated with an app access token (client credentials).
#[derive(Debug)]
pub(crate) struct HelixClient {
	http: reqwest::Client,
	base_url: Url,
	token_url: Url,
	client_id: String,
	client_secret: SecretString,
	max_retry_delay: Duration,
	call_timeout: Duration,
	token: Mutex<Option<AppToken>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AppTokenResponse {
	pub(crate) access_token: String,
	pub(crate) expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HelixStreamsResponse {
	pub(crate) data: Vec<HelixStream>,
	#[serde(default)]
	pub(crate) pagination: Option<HelixPagination>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HelixPagination {
	#[serde(default)]
	pub(crate) cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HelixStream {
	pub(crate) user_login: String,
	#[serde(default)]
	pub(crate) user_name: String,
	#[serde(default)]
	pub(crate) game_name: String,
	/// `"live"`, or `""` on errors.
	#[serde(rename = "type", default)]
	pub(crate) kind: String,
	#[serde(default)]
	pub(crate) title: String,
	#[serde(default)]
	pub(crate) viewer_count: u64,
	pub(crate) started_at: DateTime<Utc>,
	#[serde(default)]
	pub(crate) thumbnail_url: String,
}

impl HelixStream {
	pub(crate) fn is_live(&self) -> bool {
		self.kind == "live"
	}
}

/// `/helix/streams?first=100&user_login=a&user_login=b...`
pub(crate) fn streams_path(logins: &[AccountId], after: Option<&str>) -> String {
	let mut path = format!("{STREAMS_PATH}?first={MAX_LOGINS_PER_REQUEST}");
	for login in logins {
		path.push_str("&user_login=");
		path.push_str(&urlencoding::encode(login.as_str()));
	}
	if let Some(after) = after {
		path.push_str("&after=");
		path.push_str(&urlencoding::encode(after));
	}
	path
}

/// Expiry for a token issued at `now` with the advertised `expires_in` seconds.
fn token_expiry(now: Instant, expires_in: u64) -> Instant {
	let lifetime = Duration::from_secs(expires_in).min(MAX_TOKEN_LIFETIME);
	now.checked_add(lifetime).unwrap_or(now)
}

impl HelixClient {
	pub(crate) fn new(
		base_url: Url,
		token_url: Url,
		client_id: String,
		client_secret: SecretString,
		request_timeout: Duration,
		max_retry_delay: Duration,
	) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.user_agent("golive/0.x (helix-streams)")
			.timeout(request_timeout)
			.build()
			.context("build reqwest client")?;

		Ok(Self {
			http,
			base_url,
			token_url,
			client_id,
			client_secret,
			max_retry_delay,
			call_timeout: request_timeout,
			token: Mutex::new(None),
		})
	}

	fn url(&self, path_and_query: &str) -> anyhow::Result<Url> {
		self.base_url.join(path_and_query).context("join helix url")
	}

	async fn app_token(&self) -> Result<SecretString, AcquisitionError> {
		let mut guard = self.token.lock().await;
		if let Some(token) = guard.as_ref()
			&& token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN
		{
			return Ok(token.access_token.clone());
		}

		let resp = self
			.http
			.post(self.token_url.clone())
			.form(&[
				("client_id", self.client_id.as_str()),
				("client_secret", self.client_secret.expose()),
				("grant_type", "client_credentials"),
			])
			.send()
			.await
			.context("twitch app token request")?;

		let status = resp.status();
		let body = resp.text().await.context("twitch app token read body")?;
		if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
			return Err(AcquisitionError::Unauthorized {
				status: status.as_u16(),
				body,
			});
		}
		if !status.is_success() {
			return Err(AcquisitionError::Status {
				status: status.as_u16(),
				body,
			});
		}

		let parsed: AppTokenResponse = serde_json::from_str(&body).context("twitch app token parse json")?;
		let token = AppToken {
			access_token: SecretString::new(parsed.access_token),
			expires_at: token_expiry(Instant::now(), parsed.expires_in),
		};
		tracing::debug!(expires_in = parsed.expires_in, "twitch app token refreshed");
		let access = token.access_token.clone();
		*guard = Some(token);
		Ok(access)
	}

	async fn invalidate_token(&self) {
		self.token.lock().await.take();
	}

	/// Streams for `logins` (any size; chunked per Helix limits).
	pub(crate) async fn get_streams(&self, logins: &[AccountId]) -> Result<Vec<HelixStream>, AcquisitionError> {
		let mut out = Vec::new();
		for chunk in logins.chunks(MAX_LOGINS_PER_REQUEST) {
			let mut after: Option<String> = None;
			loop {
				let page = self.get_streams_page(chunk, after.as_deref()).await?;
				let empty = page.data.is_empty();
				out.extend(page.data);

				let next = page.pagination.and_then(|p| p.cursor).filter(|c| !c.is_empty());
				if next.is_none() || empty {
					break;
				}
				after = next;
			}
		}
		Ok(out)
	}

	async fn get_streams_page(
		&self,
		logins: &[AccountId],
		after: Option<&str>,
	) -> Result<HelixStreamsResponse, AcquisitionError> {
		let token = self.app_token().await?;
		let url = self.url(&streams_path(logins, after))?;
		let req = self
			.http
			.get(url)
			.header("Client-Id", &self.client_id)
			.header("Authorization", format!("Bearer {}", token.expose()));

		let resp = send_with_retry(req, "helix GET /helix/streams", self.max_retry_delay, self.call_timeout).await?;
		let status = resp.status();

		if status == StatusCode::UNAUTHORIZED {
			self.invalidate_token().await;
			let body = resp.text().await.unwrap_or_default();
			return Err(AcquisitionError::Unauthorized {
				status: status.as_u16(),
				body,
			});
		}
		if status == StatusCode::TOO_MANY_REQUESTS {
			return Err(AcquisitionError::RateLimited {
				retry_after: retry_delay_from_headers(resp.headers()),
			});
		}

		let body = resp.text().await.context("helix GET /helix/streams read body")?;
		if !status.is_success() {
			return Err(AcquisitionError::Status {
				status: status.as_u16(),
				body,
			});
		}

		let parsed = serde_json::from_str(&body).context("helix streams parse json")?;
		Ok(parsed)
	}
}
