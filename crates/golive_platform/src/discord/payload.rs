#![forbid(unsafe_code)]

use chrono::{DateTime, SecondsFormat, Utc};
use golive_domain::{AccountId, LiveStream};
use serde::Serialize;

/// Twitch brand purple.
pub const EMBED_COLOR: u32 = 0x6441A4;

pub const THUMBNAIL_WIDTH: u32 = 426;
pub const THUMBNAIL_HEIGHT: u32 = 240;

/// Thumbnail URLs change every bucket so Discord refetches the preview.
pub const THUMBNAIL_CACHE_BUCKET_SECS: i64 = 600;

const CHANNEL_BASE_URL: &str = "https://twitch.tv";

/// Webhook message body (create and edit share it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
	pub content: String,
	pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
	pub title: String,
	pub color: u32,
	/// ISO-8601 stream start.
	pub timestamp: String,
	pub url: String,
	pub image: EmbedImage,
	pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedImage {
	pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedField {
	pub name: String,
	pub value: String,
	pub inline: bool,
}

/// Replace `{key}` placeholders. Unknown placeholders are left as-is.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
	let mut out = template.to_string();
	for (key, value) in vars {
		out = out.replace(&format!("{{{key}}}"), value);
	}
	out
}

pub fn channel_url(account: &AccountId) -> String {
	format!("{CHANNEL_BASE_URL}/{account}")
}

/// Sized thumbnail with a cache-busting time bucket.
pub fn thumbnail_url(template: &str, now: DateTime<Utc>) -> String {
	let sized = template
		.replace("{width}", &THUMBNAIL_WIDTH.to_string())
		.replace("{height}", &THUMBNAIL_HEIGHT.to_string());
	let bucket = now.timestamp().div_euclid(THUMBNAIL_CACHE_BUCKET_SECS);
	let sep = if sized.contains('?') { '&' } else { '?' };
	format!("{sized}{sep}time={bucket}")
}

fn stream_vars<'a>(stream: &'a LiveStream, viewers: &'a str) -> [(&'static str, &'a str); 5] {
	[
		("login", stream.account.as_str()),
		("name", stream.display_name.as_str()),
		("title", stream.title.as_str()),
		("category", stream.category.as_str()),
		("viewers", viewers),
	]
}

/// "Now live" message: template content plus a stream embed.
pub fn now_live_payload(template: &str, stream: &LiveStream, now: DateTime<Utc>) -> NotificationPayload {
	let viewers = stream.viewer_count.to_string();
	let category = if stream.category.trim().is_empty() {
		"-".to_string()
	} else {
		stream.category.clone()
	};

	NotificationPayload {
		content: render_template(template, &stream_vars(stream, &viewers)),
		embeds: vec![Embed {
			title: stream.title.clone(),
			color: EMBED_COLOR,
			timestamp: stream.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
			url: channel_url(&stream.account),
			image: EmbedImage {
				url: thumbnail_url(&stream.thumbnail_url, now),
			},
			fields: vec![
				EmbedField {
					name: ":busts_in_silhouette: Viewers".to_string(),
					value: viewers.clone(),
					inline: true,
				},
				EmbedField {
					name: ":joystick: Category".to_string(),
					value: category,
					inline: true,
				},
			],
		}],
	}
}

/// "Was live" message: template content, embeds cleared.
pub fn was_live_payload(template: &str, account: &AccountId) -> NotificationPayload {
	NotificationPayload {
		content: render_template(template, &[("login", account.as_str())]),
		embeds: Vec::new(),
	}
}
