#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Twitch logins are at most 25 characters.
pub const MAX_LOGIN_LEN: usize = 25;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Tracked account identifier (a Twitch login).
///
/// Normalized to lowercase so config entries match the `user_login`
/// field Helix reports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
	/// Create a non-empty, lowercase `AccountId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		let id = id.trim();
		if id.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if id.len() > MAX_LOGIN_LEN {
			return Err(ParseIdError::InvalidFormat(format!(
				"login longer than {MAX_LOGIN_LEN} characters: {id}"
			)));
		}
		if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
			return Err(ParseIdError::InvalidFormat(format!(
				"login may only contain ascii letters, digits and '_': {id}"
			)));
		}
		Ok(Self(id.to_ascii_lowercase()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for AccountId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for AccountId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		AccountId::new(s.to_string())
	}
}

/// Opaque handle to a posted notification message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationRef(String);

impl NotificationRef {
	/// Create a non-empty notification reference.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for NotificationRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// One live stream as reported by a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStream {
	pub account: AccountId,
	pub display_name: String,
	pub title: String,
	/// Platform start time; stable for one stream instance.
	pub started_at: DateTime<Utc>,
	pub viewer_count: u64,
	pub category: String,
	/// Thumbnail URL with `{width}` and `{height}` placeholders.
	pub thumbnail_url: String,
}

/// Accounts currently live, keyed by identifier.
pub type LiveSnapshot = BTreeMap<AccountId, LiveStream>;

/// Persisted notification state for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
	pub notification_ref: NotificationRef,
	pub stream_started_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ended_at: Option<DateTime<Utc>>,
}

impl AccountState {
	/// State for a freshly created notification.
	pub fn live(notification_ref: NotificationRef, stream_started_at: DateTime<Utc>) -> Self {
		Self {
			notification_ref,
			stream_started_at,
			ended_at: None,
		}
	}

	pub fn is_confirmed_live(&self) -> bool {
		self.ended_at.is_none()
	}

	/// Whether this state tracks the stream instance that started at `started_at`.
	pub fn same_instance(&self, started_at: DateTime<Utc>) -> bool {
		self.stream_started_at == started_at
	}
}

/// Offline grace window.
///
/// A stream seen again within the window after it disappeared is the
/// same stream instance; past it, the stream is considered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePeriod(TimeDelta);

impl GracePeriod {
	pub const DEFAULT_SECS: i64 = 600;

	pub fn from_secs(secs: i64) -> Self {
		Self(TimeDelta::try_seconds(secs.max(0)).unwrap_or(TimeDelta::MAX))
	}

	pub fn from_std(d: std::time::Duration) -> Self {
		Self(TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX))
	}

	/// `true` while `now - ended_at <= window`.
	pub fn contains(self, ended_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
		now.signed_duration_since(ended_at) <= self.0
	}
}

impl Default for GracePeriod {
	fn default() -> Self {
		Self::from_secs(Self::DEFAULT_SECS)
	}
}
