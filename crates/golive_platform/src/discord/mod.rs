#![forbid(unsafe_code)]

mod payload;

use std::time::Duration;

use anyhow::{Context, anyhow};
use golive_domain::NotificationRef;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

pub use payload::{
	EMBED_COLOR, Embed, EmbedField, EmbedImage, NotificationPayload, THUMBNAIL_CACHE_BUCKET_SECS, channel_url,
	now_live_payload, render_template, thumbnail_url, was_live_payload,
};

use crate::http::{retry_delay_from_headers, send_with_retry};
use crate::{DispatchError, EditError, Notifier, WebhookUrl};

/// Discord webhook client configuration.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
	/// Bound on one platform call, retry included.
	pub request_timeout: Duration,
	/// Longest advertised rate-limit wait honoured in-line.
	pub max_retry_delay: Duration,
}

impl Default for DiscordConfig {
	fn default() -> Self {
		Self {
			request_timeout: Duration::from_secs(5),
			max_retry_delay: Duration::from_secs(5),
		}
	}
}

/// Posts and edits webhook messages.
#[derive(Debug, Clone)]
pub struct DiscordWebhookClient {
	http: reqwest::Client,
	max_retry_delay: Duration,
	call_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct WebhookMessageResponse {
	id: String,
}

impl DiscordWebhookClient {
	pub fn new(cfg: DiscordConfig) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.user_agent("golive/0.x (discord-webhook)")
			.timeout(cfg.request_timeout)
			.build()
			.context("build reqwest client")?;

		Ok(Self {
			http,
			max_retry_delay: cfg.max_retry_delay,
			call_timeout: cfg.request_timeout,
		})
	}
}

/// `<webhook>?wait=true`, so Discord answers with the created message.
pub(crate) fn create_url(webhook: &WebhookUrl) -> Url {
	let mut url = webhook.url().clone();
	url.query_pairs_mut().append_pair("wait", "true");
	url
}

/// `<webhook>/messages/<id>`, keeping any query (e.g. `thread_id`).
pub(crate) fn edit_url(webhook: &WebhookUrl, message: &NotificationRef) -> anyhow::Result<Url> {
	let mut url = webhook.url().clone();
	url.path_segments_mut()
		.map_err(|_| anyhow!("webhook url cannot carry a path"))?
		.pop_if_empty()
		.push("messages")
		.push(message.as_str());
	Ok(url)
}

async fn status_error(resp: reqwest::Response) -> DispatchError {
	let status = resp.status();
	if status == StatusCode::TOO_MANY_REQUESTS {
		return DispatchError::RateLimited {
			retry_after: retry_delay_from_headers(resp.headers()),
		};
	}
	let body = resp.text().await.unwrap_or_default();
	DispatchError::Status {
		status: status.as_u16(),
		body,
	}
}

#[async_trait::async_trait]
impl Notifier for DiscordWebhookClient {
	async fn create_message(
		&self,
		destination: &WebhookUrl,
		payload: &NotificationPayload,
	) -> Result<NotificationRef, DispatchError> {
		let req = self.http.post(create_url(destination)).json(payload);
		let resp = send_with_retry(req, "discord POST webhook", self.max_retry_delay, self.call_timeout).await?;

		if !resp.status().is_success() {
			metrics::counter!("golive_discord_requests_failed_total", "op" => "create").increment(1);
			return Err(status_error(resp).await);
		}

		let body = resp.text().await.context("discord POST webhook read body")?;
		let parsed: WebhookMessageResponse =
			serde_json::from_str(&body).context("discord POST webhook parse json")?;
		metrics::counter!("golive_discord_requests_total", "op" => "create").increment(1);

		NotificationRef::new(parsed.id)
			.map_err(|e| DispatchError::Transport(anyhow!("discord returned an unusable message id: {e}")))
	}

	async fn edit_message(
		&self,
		destination: &WebhookUrl,
		message: &NotificationRef,
		payload: &NotificationPayload,
	) -> Result<(), EditError> {
		let url = edit_url(destination, message).map_err(DispatchError::from)?;
		let req = self.http.patch(url).json(payload);
		let resp = send_with_retry(req, "discord PATCH webhook message", self.max_retry_delay, self.call_timeout)
			.await
			.map_err(DispatchError::from)?;

		match resp.status() {
			status if status.is_success() => {
				metrics::counter!("golive_discord_requests_total", "op" => "edit").increment(1);
				Ok(())
			}
			StatusCode::NOT_FOUND => {
				metrics::counter!("golive_discord_requests_failed_total", "op" => "edit_not_found").increment(1);
				Err(EditError::NotFound)
			}
			_ => {
				metrics::counter!("golive_discord_requests_failed_total", "op" => "edit").increment(1);
				Err(EditError::Dispatch(status_error(resp).await))
			}
		}
	}
}
