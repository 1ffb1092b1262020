#![forbid(unsafe_code)]

pub mod discord;
mod http;
pub mod twitch;

use std::fmt;
use std::time::Duration;

use golive_domain::{AccountId, LiveSnapshot, NotificationRef};
use thiserror::Error;
use url::Url;

pub use discord::{NotificationPayload, render_template};

/// Snapshot acquisition failed; the whole poll cycle is skipped.
#[derive(Debug, Error)]
pub enum AcquisitionError {
	#[error("streaming platform rejected credentials (status={status}): {body}")]
	Unauthorized { status: u16, body: String },

	#[error("streaming platform rate limited (retry_after={retry_after:?})")]
	RateLimited { retry_after: Option<Duration> },

	#[error("streaming platform request failed (status={status}): {body}")]
	Status { status: u16, body: String },

	#[error("{0:#}")]
	Transport(#[from] anyhow::Error),
}

/// A create/edit call against the notification platform failed.
#[derive(Debug, Error)]
pub enum DispatchError {
	#[error("notification platform rate limited (retry_after={retry_after:?})")]
	RateLimited { retry_after: Option<Duration> },

	#[error("notification platform request failed (status={status}): {body}")]
	Status { status: u16, body: String },

	#[error("{0:#}")]
	Transport(#[from] anyhow::Error),
}

/// Outcome of a failed edit.
#[derive(Debug, Error)]
pub enum EditError {
	/// The referenced message no longer exists.
	#[error("notification message not found")]
	NotFound,

	#[error(transparent)]
	Dispatch(#[from] DispatchError),
}

/// Streaming-platform side: who is live right now.
#[async_trait::async_trait]
pub trait LiveStatusSource: Send + Sync {
	/// Returns the live subset of `accounts`. An empty map means nobody is live.
	async fn live_status(&self, accounts: &[AccountId]) -> Result<LiveSnapshot, AcquisitionError>;
}

/// Notification-platform side: post and edit one message per account.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
	async fn create_message(
		&self,
		destination: &WebhookUrl,
		payload: &NotificationPayload,
	) -> Result<NotificationRef, DispatchError>;

	async fn edit_message(
		&self,
		destination: &WebhookUrl,
		message: &NotificationRef,
		payload: &NotificationPayload,
	) -> Result<(), EditError>;
}

/// A tracked account and where its notifications go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedAccount {
	pub id: AccountId,
	pub webhook: WebhookUrl,
	/// Message content while live.
	pub now_live_message: String,
	/// Message content once the stream is over.
	pub was_live_message: String,
}

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Discord webhook URL. The path carries the webhook token, so it is
/// never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookUrl(Url);

impl WebhookUrl {
	pub fn parse(s: &str) -> anyhow::Result<Self> {
		let url = Url::parse(s.trim()).map_err(|e| anyhow::anyhow!("invalid webhook url: {e}"))?;
		match url.scheme() {
			"http" | "https" => {}
			other => anyhow::bail!("invalid webhook url scheme (expected http/https): {other}"),
		}
		if url.cannot_be_a_base() {
			anyhow::bail!("invalid webhook url (cannot be a base url)");
		}
		Ok(Self(url))
	}

	pub fn url(&self) -> &Url {
		&self.0
	}
}

impl fmt::Debug for WebhookUrl {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "WebhookUrl({})", self)
	}
}

impl fmt::Display for WebhookUrl {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}://{}/<redacted>", self.0.scheme(), self.0.host_str().unwrap_or_default())
	}
}
