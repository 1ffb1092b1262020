#![forbid(unsafe_code)]

use std::sync::Arc;

use golive_domain::AccountState;

use crate::engine::differ::Action;
use crate::engine::dispatcher::Dispatcher;
use crate::engine::store::StateStore;
use crate::engine::testing::{Call, FakeNotifier, account, at, id, nref, stream};

fn setup() -> (Arc<FakeNotifier>, StateStore, Dispatcher) {
	let notifier = Arc::new(FakeNotifier::default());
	let store = StateStore::in_memory();
	let dispatcher = Dispatcher::new(notifier.clone(), store.clone());
	(notifier, store, dispatcher)
}

#[tokio::test]
async fn create_live_posts_and_records_state() {
	let (notifier, store, dispatcher) = setup();
	let alice = account("alice");

	dispatcher
		.apply(&alice, &Action::CreateLive { stream: stream("alice", at(0)) }, at(5))
		.await;

	let calls = notifier.calls();
	assert_eq!(calls.len(), 1);
	let Call::Create { destination, payload } = &calls[0] else {
		panic!("expected create, got {calls:?}");
	};
	assert_eq!(destination, "https://discord.test/api/webhooks/1/alice");
	assert_eq!(payload.content, "ALICE live: alice");
	assert_eq!(payload.embeds.len(), 1);

	assert_eq!(
		store.get(&id("alice")).await.unwrap(),
		Some(AccountState::live(nref("R1"), at(0)))
	);
}

#[tokio::test]
async fn failed_create_writes_no_state() {
	let (notifier, store, dispatcher) = setup();
	notifier.fail_creates(true);

	dispatcher
		.apply(&account("alice"), &Action::CreateLive { stream: stream("alice", at(0)) }, at(5))
		.await;

	assert_eq!(notifier.calls().len(), 1);
	assert!(!store.contains(&id("alice")).await.unwrap());
}

#[tokio::test]
async fn refresh_edits_existing_message() {
	let (notifier, store, dispatcher) = setup();
	let state = AccountState::live(nref("M7"), at(0));
	store.put(&id("alice"), &state).await.unwrap();

	dispatcher
		.apply(
			&account("alice"),
			&Action::RefreshLive {
				state: state.clone(),
				stream: stream("alice", at(0)),
			},
			at(30),
		)
		.await;

	let calls = notifier.calls();
	assert!(matches!(&calls[..], [Call::Edit { message, payload, .. }] if message.as_str() == "M7" && payload.embeds.len() == 1));
	assert_eq!(store.get(&id("alice")).await.unwrap(), Some(state));
}

#[tokio::test]
async fn refresh_of_deleted_message_drops_state() {
	let (notifier, store, dispatcher) = setup();
	let state = AccountState::live(nref("M7"), at(0));
	store.put(&id("alice"), &state).await.unwrap();
	notifier.delete_message("M7");

	dispatcher
		.apply(
			&account("alice"),
			&Action::RefreshLive {
				state,
				stream: stream("alice", at(0)),
			},
			at(30),
		)
		.await;

	assert!(!store.contains(&id("alice")).await.unwrap());
}

#[tokio::test]
async fn refresh_failure_keeps_state() {
	let (notifier, store, dispatcher) = setup();
	let state = AccountState::live(nref("M7"), at(0));
	store.put(&id("alice"), &state).await.unwrap();
	notifier.fail_edits(true);

	dispatcher
		.apply(
			&account("alice"),
			&Action::RefreshLive {
				state: state.clone(),
				stream: stream("alice", at(0)),
			},
			at(30),
		)
		.await;

	assert_eq!(store.get(&id("alice")).await.unwrap(), Some(state));
}

#[tokio::test]
async fn mark_ended_sends_was_live_and_starts_grace() {
	let (notifier, store, dispatcher) = setup();
	let state = AccountState::live(nref("M7"), at(0));
	store.put(&id("alice"), &state).await.unwrap();

	dispatcher
		.apply(&account("alice"), &Action::MarkEnded { state }, at(90))
		.await;

	let calls = notifier.calls();
	assert_eq!(calls.len(), 1);
	assert!(calls[0].is_was_live_edit());
	let Call::Edit { payload, .. } = &calls[0] else {
		unreachable!()
	};
	assert_eq!(payload.content, "alice was live");

	let stored = store.get(&id("alice")).await.unwrap().unwrap();
	assert_eq!(stored.ended_at, Some(at(90)));
	assert_eq!(stored.notification_ref, nref("M7"));
}

#[tokio::test]
async fn mark_ended_starts_grace_even_when_edit_fails() {
	let (notifier, store, dispatcher) = setup();
	let state = AccountState::live(nref("M7"), at(0));
	store.put(&id("alice"), &state).await.unwrap();
	notifier.fail_edits(true);

	dispatcher
		.apply(&account("alice"), &Action::MarkEnded { state }, at(90))
		.await;

	let stored = store.get(&id("alice")).await.unwrap().unwrap();
	assert_eq!(stored.ended_at, Some(at(90)));
}

#[tokio::test]
async fn mark_ended_on_deleted_message_drops_state() {
	let (notifier, store, dispatcher) = setup();
	let state = AccountState::live(nref("M7"), at(0));
	store.put(&id("alice"), &state).await.unwrap();
	notifier.delete_message("M7");

	dispatcher
		.apply(&account("alice"), &Action::MarkEnded { state }, at(90))
		.await;

	assert!(!store.contains(&id("alice")).await.unwrap());
}

#[tokio::test]
async fn recover_clears_ended_at_and_refreshes() {
	let (notifier, store, dispatcher) = setup();
	let state = AccountState {
		ended_at: Some(at(60)),
		..AccountState::live(nref("M7"), at(0))
	};
	store.put(&id("alice"), &state).await.unwrap();

	dispatcher
		.apply(
			&account("alice"),
			&Action::RecoverLive {
				state,
				stream: stream("alice", at(0)),
			},
			at(120),
		)
		.await;

	let calls = notifier.calls();
	assert_eq!(calls.len(), 1);
	assert!(!calls[0].is_was_live_edit());
	assert_eq!(
		store.get(&id("alice")).await.unwrap(),
		Some(AccountState::live(nref("M7"), at(0)))
	);
}

#[tokio::test]
async fn new_stream_finalizes_once_then_creates() {
	let (notifier, store, dispatcher) = setup();
	let previous = AccountState::live(nref("M7"), at(0));
	store.put(&id("alice"), &previous).await.unwrap();

	dispatcher
		.apply(
			&account("alice"),
			&Action::FinalizeThenCreate {
				previous,
				stream: stream("alice", at(1000)),
			},
			at(1010),
		)
		.await;

	let calls = notifier.calls();
	assert_eq!(calls.len(), 2);
	assert!(matches!(&calls[0], Call::Edit { message, .. } if message.as_str() == "M7"));
	assert!(calls[0].is_was_live_edit());
	assert!(matches!(&calls[1], Call::Create { .. }));
	assert_eq!(
		store.get(&id("alice")).await.unwrap(),
		Some(AccountState::live(nref("R1"), at(1000)))
	);
}

#[tokio::test]
async fn new_stream_with_failed_create_leaves_no_state() {
	let (notifier, store, dispatcher) = setup();
	let previous = AccountState::live(nref("M7"), at(0));
	store.put(&id("alice"), &previous).await.unwrap();
	notifier.fail_creates(true);

	dispatcher
		.apply(
			&account("alice"),
			&Action::FinalizeThenCreate {
				previous,
				stream: stream("alice", at(1000)),
			},
			at(1010),
		)
		.await;

	assert!(!store.contains(&id("alice")).await.unwrap());
}

#[tokio::test]
async fn retire_forgets_state_without_calls() {
	let (notifier, store, dispatcher) = setup();
	let state = AccountState {
		ended_at: Some(at(60)),
		..AccountState::live(nref("M7"), at(0))
	};
	store.put(&id("alice"), &state).await.unwrap();

	dispatcher.apply(&account("alice"), &Action::Retire, at(700)).await;

	assert!(notifier.calls().is_empty());
	assert!(!store.contains(&id("alice")).await.unwrap());
}

#[tokio::test]
async fn new_stream_is_created_even_when_finalize_fails() {
	let (notifier, store, dispatcher) = setup();
	let previous = AccountState::live(nref("M7"), at(0));
	store.put(&id("alice"), &previous).await.unwrap();
	notifier.fail_edits(true);

	dispatcher
		.apply(
			&account("alice"),
			&Action::FinalizeThenCreate {
				previous,
				stream: stream("alice", at(1000)),
			},
			at(1010),
		)
		.await;

	let calls = notifier.calls();
	assert_eq!(calls.len(), 2);
	assert!(calls[0].is_was_live_edit());
	assert!(matches!(&calls[1], Call::Create { .. }));
	assert_eq!(
		store.get(&id("alice")).await.unwrap(),
		Some(AccountState::live(nref("R1"), at(1000)))
	);
}

#[tokio::test]
async fn new_stream_after_deleted_old_message_keeps_only_new_state() {
	let (notifier, store, dispatcher) = setup();
	let previous = AccountState::live(nref("M7"), at(0));
	store.put(&id("alice"), &previous).await.unwrap();
	notifier.delete_message("M7");

	dispatcher
		.apply(
			&account("alice"),
			&Action::FinalizeThenCreate {
				previous,
				stream: stream("alice", at(1000)),
			},
			at(1010),
		)
		.await;

	assert_eq!(notifier.calls().len(), 2);
	assert_eq!(
		store.get(&id("alice")).await.unwrap(),
		Some(AccountState::live(nref("R1"), at(1000)))
	);
}

#[tokio::test]
async fn recover_of_deleted_message_drops_state() {
	let (notifier, store, dispatcher) = setup();
	let state = AccountState {
		ended_at: Some(at(60)),
		..AccountState::live(nref("M7"), at(0))
	};
	store.put(&id("alice"), &state).await.unwrap();
	notifier.delete_message("M7");

	dispatcher
		.apply(
			&account("alice"),
			&Action::RecoverLive {
				state,
				stream: stream("alice", at(0)),
			},
			at(120),
		)
		.await;

	assert_eq!(notifier.calls().len(), 1);
	assert!(!store.contains(&id("alice")).await.unwrap());
}
