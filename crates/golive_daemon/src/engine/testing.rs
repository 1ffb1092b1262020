#![forbid(unsafe_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use golive_domain::{AccountId, LiveSnapshot, LiveStream, NotificationRef};
use golive_platform::{
	AcquisitionError, DispatchError, EditError, LiveStatusSource, NotificationPayload, Notifier, TrackedAccount,
	WebhookUrl,
};

pub fn at(secs: i64) -> DateTime<Utc> {
	Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
}

pub fn account(login: &str) -> TrackedAccount {
	TrackedAccount {
		id: AccountId::new(login).unwrap(),
		webhook: WebhookUrl::parse(&format!("https://discord.test/api/webhooks/1/{login}")).unwrap(),
		now_live_message: format!("{{name}} live: {login}"),
		was_live_message: format!("{login} was live"),
	}
}

pub fn id(login: &str) -> AccountId {
	AccountId::new(login).unwrap()
}

pub fn nref(s: &str) -> NotificationRef {
	NotificationRef::new(s).unwrap()
}

pub fn stream(login: &str, started_at: DateTime<Utc>) -> LiveStream {
	LiveStream {
		account: id(login),
		display_name: login.to_uppercase(),
		title: format!("{login} stream"),
		started_at,
		viewer_count: 42,
		category: "Just Chatting".to_string(),
		thumbnail_url: format!("https://thumbs.test/{login}-{{width}}x{{height}}.jpg"),
	}
}

pub fn snapshot(streams: impl IntoIterator<Item = LiveStream>) -> LiveSnapshot {
	streams.into_iter().map(|s| (s.account.clone(), s)).collect()
}

/// Scripted live-status source: pops queued results, then repeats the last snapshot.
#[derive(Default)]
pub struct FakeSource {
	queued: Mutex<VecDeque<Result<LiveSnapshot, ()>>>,
	last: Mutex<LiveSnapshot>,
	calls: Mutex<usize>,
}

impl FakeSource {
	pub fn push(&self, snapshot: LiveSnapshot) {
		self.queued.lock().unwrap().push_back(Ok(snapshot));
	}

	pub fn push_failure(&self) {
		self.queued.lock().unwrap().push_back(Err(()));
	}

	pub fn calls(&self) -> usize {
		*self.calls.lock().unwrap()
	}
}

#[async_trait::async_trait]
impl LiveStatusSource for FakeSource {
	async fn live_status(&self, _accounts: &[AccountId]) -> Result<LiveSnapshot, AcquisitionError> {
		*self.calls.lock().unwrap() += 1;
		match self.queued.lock().unwrap().pop_front() {
			Some(Ok(snapshot)) => {
				*self.last.lock().unwrap() = snapshot.clone();
				Ok(snapshot)
			}
			Some(Err(())) => Err(AcquisitionError::Status {
				status: 503,
				body: "unavailable".to_string(),
			}),
			None => Ok(self.last.lock().unwrap().clone()),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
	Create {
		destination: String,
		payload: NotificationPayload,
	},
	Edit {
		destination: String,
		message: NotificationRef,
		payload: NotificationPayload,
	},
}

impl Call {
	pub fn is_was_live_edit(&self) -> bool {
		matches!(self, Call::Edit { payload, .. } if payload.embeds.is_empty())
	}
}

/// Records every call; hands out message ids `R1`, `R2`, ...
#[derive(Default)]
pub struct FakeNotifier {
	calls: Mutex<Vec<Call>>,
	next_id: Mutex<u64>,
	fail_creates: Mutex<bool>,
	fail_edits: Mutex<bool>,
	deleted: Mutex<HashSet<String>>,
}

impl FakeNotifier {
	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().unwrap().clone()
	}

	pub fn clear(&self) {
		self.calls.lock().unwrap().clear();
	}

	pub fn fail_creates(&self, fail: bool) {
		*self.fail_creates.lock().unwrap() = fail;
	}

	pub fn fail_edits(&self, fail: bool) {
		*self.fail_edits.lock().unwrap() = fail;
	}

	/// Edits of `message` answer not-found from now on.
	pub fn delete_message(&self, message: &str) {
		self.deleted.lock().unwrap().insert(message.to_string());
	}
}

#[async_trait::async_trait]
impl Notifier for FakeNotifier {
	async fn create_message(
		&self,
		destination: &WebhookUrl,
		payload: &NotificationPayload,
	) -> Result<NotificationRef, DispatchError> {
		self.calls.lock().unwrap().push(Call::Create {
			destination: destination.url().to_string(),
			payload: payload.clone(),
		});
		if *self.fail_creates.lock().unwrap() {
			return Err(DispatchError::Status {
				status: 500,
				body: "boom".to_string(),
			});
		}
		let mut next = self.next_id.lock().unwrap();
		*next += 1;
		Ok(nref(&format!("R{next}")))
	}

	async fn edit_message(
		&self,
		destination: &WebhookUrl,
		message: &NotificationRef,
		payload: &NotificationPayload,
	) -> Result<(), EditError> {
		self.calls.lock().unwrap().push(Call::Edit {
			destination: destination.url().to_string(),
			message: message.clone(),
			payload: payload.clone(),
		});
		if self.deleted.lock().unwrap().contains(message.as_str()) {
			return Err(EditError::NotFound);
		}
		if *self.fail_edits.lock().unwrap() {
			return Err(EditError::Dispatch(DispatchError::RateLimited { retry_after: None }));
		}
		Ok(())
	}
}
