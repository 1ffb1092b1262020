#![forbid(unsafe_code)]

mod config;
mod engine;
mod health;

use std::path::PathBuf;
use std::sync::Arc;

use golive_domain::GracePeriod;
use golive_platform::discord::{DiscordConfig, DiscordWebhookClient};
use golive_platform::twitch::{TwitchConfig, TwitchStreamSource};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::CONFIG_PATH_ENV;
use crate::engine::coordinator::{PollCoordinator, PollSettings};
use crate::engine::store::StateStore;
use crate::health::{HealthState, spawn_health_server};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: golive_daemon [--config path]\n\
\n\
Options:\n\
\t--config  Config file (default: $GOLIVE_CONFIG or ~/.golive/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Option<PathBuf> {
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" | "-c" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	config_path
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,golive_daemon=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("golive_daemon");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			warn!(error = %e, "failed to listen for ctrl-c");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut sig) => {
				sig.recv().await;
			}
			Err(e) => {
				warn!(error = %e, "failed to listen for SIGTERM");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {}
		_ = terminate => {}
	}

	info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let config_path = match parse_args() {
		Some(path) => path,
		None => match std::env::var(CONFIG_PATH_ENV).ok().filter(|v| !v.trim().is_empty()) {
			Some(path) => PathBuf::from(path),
			None => crate::config::default_config_path()?,
		},
	};
	let cfg = crate::config::load_config_from_path(&config_path)?;
	info!(
		path = %config_path.display(),
		accounts = cfg.accounts.len(),
		"loaded config (toml + env overrides)"
	);

	init_metrics(cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let (client_id, client_secret) = cfg.twitch.credentials()?;
	let mut twitch_cfg = TwitchConfig::new(client_id, client_secret);
	if let Some(base_url) = cfg.twitch.api_base_url.clone() {
		twitch_cfg.api_base_url = base_url;
	}
	if let Some(token_url) = cfg.twitch.token_url.clone() {
		twitch_cfg.token_url = token_url;
	}
	twitch_cfg.request_timeout = cfg.polling.request_timeout;
	let source = TwitchStreamSource::new(twitch_cfg)?;

	let notifier = DiscordWebhookClient::new(DiscordConfig {
		request_timeout: cfg.polling.request_timeout,
		..DiscordConfig::default()
	})?;

	let database_url = match cfg.state.database_url.clone() {
		Some(url) => url,
		None => crate::config::default_state_database_url()?,
	};
	let store = StateStore::open(&database_url).await?;

	let settings = PollSettings {
		poll_interval: cfg.polling.poll_interval,
		error_retry_interval: cfg.polling.error_retry_interval,
		grace: GracePeriod::from_std(cfg.polling.offline_grace),
	};

	let coordinator = PollCoordinator::new(cfg.accounts, Arc::new(source), Arc::new(notifier), store.clone(), settings)
		.with_health(health_state);

	coordinator.run(shutdown_signal()).await;

	store.close().await;
	info!("golive_daemon stopped");

	Ok(())
}
