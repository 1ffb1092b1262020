#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use golive_domain::{AccountId, GracePeriod};
use golive_platform::{LiveStatusSource, Notifier, TrackedAccount};
use tracing::{debug, info, warn};

use super::differ::reconcile;
use super::dispatcher::Dispatcher;
use super::store::StateStore;
use crate::health::HealthState;

#[derive(Debug, Clone)]
pub struct PollSettings {
	/// Sleep after a successful cycle.
	pub poll_interval: Duration,
	/// Sleep after a failed snapshot acquisition.
	pub error_retry_interval: Duration,
	pub grace: GracePeriod,
}

impl Default for PollSettings {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(30),
			error_retry_interval: Duration::from_secs(60),
			grace: GracePeriod::default(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
	Polling,
	BackingOff,
}

/// Drives poll → reconcile → dispatch, one cycle and one account at a time.
pub struct PollCoordinator {
	accounts: Vec<TrackedAccount>,
	ids: Vec<AccountId>,
	source: Arc<dyn LiveStatusSource>,
	dispatcher: Dispatcher,
	store: StateStore,
	settings: PollSettings,
	state: PollState,
	health: Option<HealthState>,
}

impl PollCoordinator {
	pub fn new(
		accounts: Vec<TrackedAccount>,
		source: Arc<dyn LiveStatusSource>,
		notifier: Arc<dyn Notifier>,
		store: StateStore,
		settings: PollSettings,
	) -> Self {
		let ids = accounts.iter().map(|a| a.id.clone()).collect();
		Self {
			accounts,
			ids,
			source,
			dispatcher: Dispatcher::new(notifier, store.clone()),
			store,
			settings,
			state: PollState::Polling,
			health: None,
		}
	}

	/// Report readiness once a snapshot has been reconciled.
	pub fn with_health(mut self, health: HealthState) -> Self {
		self.health = Some(health);
		self
	}

	pub fn state(&self) -> PollState {
		self.state
	}

	/// Run one cycle at `now`; returns how long to wait before the next.
	pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Duration {
		metrics::counter!("golive_polls_total").increment(1);

		let snapshot = match self.source.live_status(&self.ids).await {
			Ok(snapshot) => snapshot,
			Err(e) => {
				metrics::counter!("golive_poll_failures_total").increment(1);
				warn!(
					error = %e,
					retry_in_secs = self.settings.error_retry_interval.as_secs(),
					"live status acquisition failed; backing off"
				);
				return self.back_off();
			}
		};

		let known = match self.store.load_all().await {
			Ok(known) => known,
			Err(e) => {
				warn!(error = %e, "state store read failed; backing off");
				return self.back_off();
			}
		};

		metrics::gauge!("golive_live_accounts").set(snapshot.len() as f64);
		debug!(live = snapshot.len(), tracked = self.accounts.len(), "snapshot acquired");

		for planned in reconcile(&self.accounts, &snapshot, &known, now, self.settings.grace) {
			self.dispatcher.apply(planned.account, &planned.action, now).await;
		}

		if self.state == PollState::BackingOff {
			info!("live status acquisition recovered");
		}
		self.state = PollState::Polling;
		if let Some(health) = &self.health {
			health.mark_ready();
		}
		self.settings.poll_interval
	}

	fn back_off(&mut self) -> Duration {
		self.state = PollState::BackingOff;
		self.settings.error_retry_interval
	}

	/// Poll until `shutdown` resolves. An in-flight cycle is abandoned.
	pub async fn run<F>(mut self, shutdown: F)
	where
		F: Future<Output = ()>,
	{
		tokio::pin!(shutdown);
		info!(accounts = self.accounts.len(), "poll loop started");

		loop {
			let delay = tokio::select! {
				_ = &mut shutdown => break,
				delay = self.run_cycle(Utc::now()) => delay,
			};

			tokio::select! {
				_ = &mut shutdown => break,
				_ = tokio::time::sleep(delay) => {}
			}
		}

		info!("poll loop stopped");
	}
}
