#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use golive_domain::{AccountState, LiveStream, NotificationRef};
use golive_platform::discord::{now_live_payload, was_live_payload};
use golive_platform::{EditError, Notifier, TrackedAccount};
use tracing::{debug, error, info, warn};

use super::differ::Action;
use super::store::StateStore;

/// Executes planned actions against the notifier and the state store.
///
/// Never fails: platform and store errors are logged and the action is
/// retried by the next cycle's plan.
#[derive(Clone)]
pub struct Dispatcher {
	notifier: Arc<dyn Notifier>,
	store: StateStore,
}

impl Dispatcher {
	pub fn new(notifier: Arc<dyn Notifier>, store: StateStore) -> Self {
		Self { notifier, store }
	}

	pub async fn apply(&self, account: &TrackedAccount, action: &Action, now: DateTime<Utc>) {
		let id = &account.id;
		info!(account = %id, "{}", action.label());

		match action {
			Action::CreateLive { stream } => self.create_live(account, stream, now).await,
			Action::RefreshLive { state, stream } => {
				self.refresh_live(account, &state.notification_ref, stream, now).await;
			}
			Action::RecoverLive { state, stream } => {
				if let Err(e) = self.store.set_ended_at(id, None).await {
					warn!(account = %id, error = %e, "failed to clear ended_at");
				}
				self.refresh_live(account, &state.notification_ref, stream, now).await;
			}
			Action::FinalizeThenCreate { previous, stream } => {
				debug!(account = %id, previous_ref = %previous.notification_ref, "finalizing previous notification");
				let _ = self.send_was_live(account, &previous.notification_ref).await;
				self.drop_state(account).await;
				self.create_live(account, stream, now).await;
			}
			Action::MarkEnded { state } => self.mark_ended(account, state, now).await,
			Action::Retire => {
				if self.drop_state(account).await {
					metrics::counter!("golive_notifications_retired_total").increment(1);
				}
			}
		}
	}

	async fn create_live(&self, account: &TrackedAccount, stream: &LiveStream, now: DateTime<Utc>) {
		let payload = now_live_payload(&account.now_live_message, stream, now);
		let notification_ref = match self.notifier.create_message(&account.webhook, &payload).await {
			Ok(r) => r,
			Err(e) => {
				metrics::counter!("golive_dispatch_failures_total", "op" => "create").increment(1);
				warn!(account = %account.id, error = %e, "notification create failed");
				return;
			}
		};

		metrics::counter!("golive_notifications_created_total").increment(1);
		info!(account = %account.id, notification_ref = %notification_ref, "created notification");

		let state = AccountState::live(notification_ref, stream.started_at);
		if let Err(e) = self.store.put(&account.id, &state).await {
			error!(
				account = %account.id,
				notification_ref = %state.notification_ref,
				error = %e,
				"notification created but its state could not be saved"
			);
		}
	}

	async fn refresh_live(
		&self,
		account: &TrackedAccount,
		notification_ref: &NotificationRef,
		stream: &LiveStream,
		now: DateTime<Utc>,
	) {
		let payload = now_live_payload(&account.now_live_message, stream, now);
		match self.notifier.edit_message(&account.webhook, notification_ref, &payload).await {
			Ok(()) => {
				metrics::counter!("golive_notifications_edited_total").increment(1);
				debug!(account = %account.id, %notification_ref, viewers = stream.viewer_count, "notification refreshed");
			}
			Err(EditError::NotFound) => self.forget_dead_ref(account, notification_ref).await,
			Err(EditError::Dispatch(e)) => {
				metrics::counter!("golive_dispatch_failures_total", "op" => "edit").increment(1);
				warn!(account = %account.id, %notification_ref, error = %e, "notification edit failed");
			}
		}
	}

	async fn mark_ended(&self, account: &TrackedAccount, state: &AccountState, now: DateTime<Utc>) {
		if let Err(EditError::NotFound) = self.send_was_live(account, &state.notification_ref).await {
			return;
		}

		// The grace timer starts even when the edit failed.
		if let Err(e) = self.store.set_ended_at(&account.id, Some(now)).await {
			warn!(account = %account.id, error = %e, "failed to record ended_at");
		}
	}

	/// Edit the message into its "was live" form. Not-found drops the state.
	async fn send_was_live(&self, account: &TrackedAccount, notification_ref: &NotificationRef) -> Result<(), EditError> {
		let payload = was_live_payload(&account.was_live_message, &account.id);
		match self.notifier.edit_message(&account.webhook, notification_ref, &payload).await {
			Ok(()) => {
				metrics::counter!("golive_notifications_edited_total").increment(1);
				debug!(account = %account.id, %notification_ref, "notification finalized");
				Ok(())
			}
			Err(EditError::NotFound) => {
				self.forget_dead_ref(account, notification_ref).await;
				Err(EditError::NotFound)
			}
			Err(EditError::Dispatch(e)) => {
				metrics::counter!("golive_dispatch_failures_total", "op" => "edit").increment(1);
				warn!(account = %account.id, %notification_ref, error = %e, "webhook edit failed");
				Err(EditError::Dispatch(e))
			}
		}
	}

	async fn forget_dead_ref(&self, account: &TrackedAccount, notification_ref: &NotificationRef) {
		metrics::counter!("golive_notifications_not_found_total").increment(1);
		warn!(account = %account.id, %notification_ref, "webhook message not found; dropping state");
		self.drop_state(account).await;
	}

	async fn drop_state(&self, account: &TrackedAccount) -> bool {
		match self.store.discard(&account.id).await {
			Ok(removed) => removed,
			Err(e) => {
				warn!(account = %account.id, error = %e, "failed to delete state");
				false
			}
		}
	}
}
