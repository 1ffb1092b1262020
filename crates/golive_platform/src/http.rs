#![forbid(unsafe_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, anyhow};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};

const SERVER_ERROR_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Rate-limit delay advertised by the response.
///
/// Understands `Retry-After` (seconds, fractional for Discord),
/// Discord's `X-RateLimit-Reset-After` and Twitch's `Ratelimit-Reset`
/// (unix seconds).
pub(crate) fn retry_delay_from_headers(headers: &HeaderMap) -> Option<Duration> {
	for name in [RETRY_AFTER.as_str(), "X-RateLimit-Reset-After"] {
		if let Some(v) = headers.get(name)
			&& let Ok(s) = v.to_str()
			&& let Ok(secs) = s.trim().parse::<f64>()
			&& secs.is_finite()
			&& secs >= 0.0
		{
			return Some(Duration::from_secs_f64(secs));
		}
	}

	if let Some(v) = headers.get("Ratelimit-Reset")
		&& let Ok(s) = v.to_str()
		&& let Ok(reset_unix) = s.trim().parse::<u64>()
	{
		let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
		if reset_unix > now {
			return Some(Duration::from_secs(reset_unix - now));
		}
		return Some(Duration::ZERO);
	}

	None
}

/// Send once, retrying a single time on 429 (when the advertised delay
/// fits in `max_retry_delay`) or on 5xx. The whole call, retry included,
/// is bounded by `call_timeout`.
pub(crate) async fn send_with_retry(
	req: reqwest::RequestBuilder,
	label: &'static str,
	max_retry_delay: Duration,
	call_timeout: Duration,
) -> anyhow::Result<reqwest::Response> {
	tokio::time::timeout(call_timeout, send_with_retry_inner(req, label, max_retry_delay))
		.await
		.map_err(|_| anyhow!("{label} timed out after {}ms", call_timeout.as_millis()))?
}

async fn send_with_retry_inner(
	req: reqwest::RequestBuilder,
	label: &'static str,
	max_retry_delay: Duration,
) -> anyhow::Result<reqwest::Response> {
	let retry_builder = req.try_clone();
	let resp = req.send().await.with_context(|| format!("{label} send"))?;
	let status = resp.status();

	if status == StatusCode::TOO_MANY_REQUESTS
		&& let Some(delay) = retry_delay_from_headers(resp.headers())
		&& delay <= max_retry_delay
		&& let Some(retry) = retry_builder
	{
		tracing::debug!(label, delay_ms = delay.as_millis() as u64, "rate limited; retrying once");
		tokio::time::sleep(delay).await;
		return retry.send().await.with_context(|| format!("{label} retry send"));
	}

	if status.is_server_error()
		&& let Some(retry) = retry_builder
	{
		tokio::time::sleep(SERVER_ERROR_RETRY_DELAY).await;
		return retry.send().await.with_context(|| format!("{label} retry send"));
	}

	Ok(resp)
}
