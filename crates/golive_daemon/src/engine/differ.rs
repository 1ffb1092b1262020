#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use golive_domain::{AccountId, AccountState, GracePeriod, LiveSnapshot, LiveStream};
use golive_platform::TrackedAccount;

/// What to do for one account this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
	/// No state yet and the account is live: post a new notification.
	CreateLive { stream: LiveStream },

	/// Same stream instance still live: edit in place.
	RefreshLive { state: AccountState, stream: LiveStream },

	/// A different stream instance: finalize the old message, post a new one.
	FinalizeThenCreate { previous: AccountState, stream: LiveStream },

	/// Back within the grace window: clear `ended_at`, keep editing.
	RecoverLive { state: AccountState, stream: LiveStream },

	/// First poll without the account: post "was live", start the grace timer.
	MarkEnded { state: AccountState },

	/// Grace window over: forget the state.
	Retire,
}

impl Action {
	/// Transition name used in logs.
	pub fn label(&self) -> &'static str {
		match self {
			Self::CreateLive { .. } => "NOW LIVE",
			Self::RefreshLive { .. } => "STILL LIVE",
			Self::FinalizeThenCreate { .. } => "NEW STREAM",
			Self::RecoverLive { .. } => "STREAM RECOVERED",
			Self::MarkEnded { .. } => "WAS LIVE",
			Self::Retire => "OFFLINE",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction<'a> {
	pub account: &'a TrackedAccount,
	pub action: Action,
}

/// Decision table for a single account. `None` is a no-op.
pub fn classify(
	prior: Option<&AccountState>,
	live: Option<&LiveStream>,
	now: DateTime<Utc>,
	grace: GracePeriod,
) -> Option<Action> {
	match (prior, live) {
		(None, None) => None,

		(None, Some(stream)) => Some(Action::CreateLive { stream: stream.clone() }),

		(Some(state), Some(stream)) => {
			// A new instance always wins over grace recovery.
			if !state.same_instance(stream.started_at) {
				return Some(Action::FinalizeThenCreate {
					previous: state.clone(),
					stream: stream.clone(),
				});
			}

			match state.ended_at {
				None => Some(Action::RefreshLive {
					state: state.clone(),
					stream: stream.clone(),
				}),
				Some(ended_at) if grace.contains(ended_at, now) => Some(Action::RecoverLive {
					state: state.clone(),
					stream: stream.clone(),
				}),
				Some(_) => Some(Action::FinalizeThenCreate {
					previous: state.clone(),
					stream: stream.clone(),
				}),
			}
		}

		(Some(state), None) => match state.ended_at {
			None => Some(Action::MarkEnded { state: state.clone() }),
			Some(ended_at) if grace.contains(ended_at, now) => None,
			Some(_) => Some(Action::Retire),
		},
	}
}

/// Plan one action per account, in account-list order. Pure.
pub fn reconcile<'a>(
	accounts: &'a [TrackedAccount],
	snapshot: &LiveSnapshot,
	state: &BTreeMap<AccountId, AccountState>,
	now: DateTime<Utc>,
	grace: GracePeriod,
) -> Vec<PlannedAction<'a>> {
	accounts
		.iter()
		.filter_map(|account| {
			classify(state.get(&account.id), snapshot.get(&account.id), now, grace)
				.map(|action| PlannedAction { account, action })
		})
		.collect()
}
