#![forbid(unsafe_code)]

use golive_domain::AccountState;

use crate::engine::store::{MEMORY_URL, StateStore, StoreError};
use crate::engine::testing::{at, id, nref};

async fn stores() -> Vec<(&'static str, StateStore)> {
	vec![
		("memory", StateStore::open(MEMORY_URL).await.unwrap()),
		("sqlite", StateStore::open("sqlite::memory:").await.unwrap()),
	]
}

#[tokio::test]
async fn put_get_and_replace() {
	for (name, store) in stores().await {
		let alice = id("alice");
		assert_eq!(store.get(&alice).await.unwrap(), None, "{name}");

		let first = AccountState::live(nref("M1"), at(0));
		store.put(&alice, &first).await.unwrap();
		assert_eq!(store.get(&alice).await.unwrap(), Some(first), "{name}");

		let second = AccountState::live(nref("M2"), at(500));
		store.put(&alice, &second).await.unwrap();
		assert_eq!(store.get(&alice).await.unwrap(), Some(second), "{name}");
		assert_eq!(store.notification_ref(&alice).await.unwrap(), Some(nref("M2")), "{name}");
	}
}

#[tokio::test]
async fn set_ended_at_updates_only_that_field() {
	for (name, store) in stores().await {
		let alice = id("alice");
		store.put(&alice, &AccountState::live(nref("M1"), at(0))).await.unwrap();

		store.set_ended_at(&alice, Some(at(60))).await.unwrap();
		let ended = store.get(&alice).await.unwrap().unwrap();
		assert_eq!(ended.ended_at, Some(at(60)), "{name}");
		assert_eq!(ended.notification_ref, nref("M1"), "{name}");
		assert_eq!(ended.stream_started_at, at(0), "{name}");

		store.set_ended_at(&alice, None).await.unwrap();
		assert!(store.get(&alice).await.unwrap().unwrap().is_confirmed_live(), "{name}");
	}
}

#[tokio::test]
async fn missing_state_is_reported() {
	for (name, store) in stores().await {
		let ghost = id("ghost");
		assert!(
			matches!(store.set_ended_at(&ghost, Some(at(1))).await, Err(StoreError::Missing(_))),
			"{name}"
		);
		assert!(matches!(store.delete(&ghost).await, Err(StoreError::Missing(_))), "{name}");
		assert!(!store.discard(&ghost).await.unwrap(), "{name}");
	}
}

#[tokio::test]
async fn delete_and_discard() {
	for (name, store) in stores().await {
		let alice = id("alice");
		let bob = id("bob");
		store.put(&alice, &AccountState::live(nref("M1"), at(0))).await.unwrap();
		store.put(&bob, &AccountState::live(nref("M2"), at(0))).await.unwrap();

		store.delete(&alice).await.unwrap();
		assert!(!store.contains(&alice).await.unwrap(), "{name}");

		assert!(store.discard(&bob).await.unwrap(), "{name}");
		assert!(!store.discard(&bob).await.unwrap(), "{name}");
	}
}

#[tokio::test]
async fn load_all_returns_every_account() {
	for (name, store) in stores().await {
		let ended = AccountState {
			ended_at: Some(at(90)),
			..AccountState::live(nref("M2"), at(10))
		};
		store.put(&id("zed"), &AccountState::live(nref("M1"), at(0))).await.unwrap();
		store.put(&id("amy"), &ended).await.unwrap();

		let all = store.load_all().await.unwrap();
		let keys: Vec<_> = all.keys().map(|k| k.as_str()).collect();
		assert_eq!(keys, vec!["amy", "zed"], "{name}");
		assert_eq!(all.get(&id("amy")), Some(&ended), "{name}");

		store.close().await;
	}
}

#[tokio::test]
async fn sqlite_file_survives_reopen() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("nested").join("state.db");
	let url = format!("sqlite://{}", path.display());

	let state = AccountState {
		ended_at: Some(at(90)),
		..AccountState::live(nref("M1"), at(0))
	};

	let store = StateStore::open(&url).await.unwrap();
	store.put(&id("alice"), &state).await.unwrap();
	store.close().await;

	let reopened = StateStore::open(&url).await.unwrap();
	assert_eq!(reopened.get(&id("alice")).await.unwrap(), Some(state));
	reopened.close().await;
}

#[tokio::test]
async fn unsupported_url_is_rejected() {
	assert!(matches!(
		StateStore::open("postgres://localhost/golive").await,
		Err(StoreError::UnsupportedUrl(_))
	));
}
