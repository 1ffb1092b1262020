#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use golive_domain::{AccountId, AccountState, NotificationRef};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// `database_url` value selecting the non-durable in-memory backend.
pub const MEMORY_URL: &str = "memory:";

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("no state stored for account {0}")]
	Missing(AccountId),

	#[error("stored state for {account} is unreadable: {reason}")]
	Corrupt { account: String, reason: String },

	#[error("state database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("state migration error: {0}")]
	Migrate(#[from] sqlx::migrate::MigrateError),

	#[error("unsupported database_url (use sqlite: or {MEMORY_URL}): {0}")]
	UnsupportedUrl(String),

	#[error("create state directory {path}: {source}")]
	CreateDir {
		path: String,
		#[source]
		source: std::io::Error,
	},
}

/// Storage mechanism behind [`StateStore`]. Every mutation is durable
/// when the call returns.
#[async_trait::async_trait]
pub trait StateBackend: Send + Sync {
	async fn get(&self, account: &AccountId) -> Result<Option<AccountState>, StoreError>;

	/// Insert or fully replace.
	async fn put(&self, account: &AccountId, state: &AccountState) -> Result<(), StoreError>;

	/// Update `ended_at` only. Returns `false` when no state exists.
	async fn set_ended_at(&self, account: &AccountId, ended_at: Option<DateTime<Utc>>) -> Result<bool, StoreError>;

	/// Returns `false` when no state existed.
	async fn remove(&self, account: &AccountId) -> Result<bool, StoreError>;

	async fn load_all(&self) -> Result<BTreeMap<AccountId, AccountState>, StoreError>;

	async fn close(&self);
}

#[derive(Default)]
pub struct InMemoryStateBackend {
	inner: Mutex<BTreeMap<AccountId, AccountState>>,
}

#[async_trait::async_trait]
impl StateBackend for InMemoryStateBackend {
	async fn get(&self, account: &AccountId) -> Result<Option<AccountState>, StoreError> {
		Ok(self.inner.lock().await.get(account).cloned())
	}

	async fn put(&self, account: &AccountId, state: &AccountState) -> Result<(), StoreError> {
		self.inner.lock().await.insert(account.clone(), state.clone());
		Ok(())
	}

	async fn set_ended_at(&self, account: &AccountId, ended_at: Option<DateTime<Utc>>) -> Result<bool, StoreError> {
		let mut guard = self.inner.lock().await;
		match guard.get_mut(account) {
			Some(state) => {
				state.ended_at = ended_at;
				Ok(true)
			}
			None => Ok(false),
		}
	}

	async fn remove(&self, account: &AccountId) -> Result<bool, StoreError> {
		Ok(self.inner.lock().await.remove(account).is_some())
	}

	async fn load_all(&self) -> Result<BTreeMap<AccountId, AccountState>, StoreError> {
		Ok(self.inner.lock().await.clone())
	}

	async fn close(&self) {}
}

/// SQLite file backend; one row per account in `account_state`.
#[derive(Clone)]
pub struct SqliteStateBackend {
	pool: sqlx::SqlitePool,
}

type StateRow = (String, String, DateTime<Utc>, Option<DateTime<Utc>>);

fn state_from_row((account_id, notification_ref, stream_started_at, ended_at): StateRow) -> Result<(AccountId, AccountState), StoreError> {
	let account = AccountId::new(account_id.clone()).map_err(|e| StoreError::Corrupt {
		account: account_id.clone(),
		reason: e.to_string(),
	})?;
	let notification_ref = NotificationRef::new(notification_ref).map_err(|e| StoreError::Corrupt {
		account: account_id,
		reason: format!("notification_ref: {e}"),
	})?;
	Ok((
		account,
		AccountState {
			notification_ref,
			stream_started_at,
			ended_at,
		},
	))
}

impl SqliteStateBackend {
	pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
		let opts = SqliteConnectOptions::from_str(database_url)?
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.synchronous(SqliteSynchronous::Full);

		let filename = opts.get_filename();
		if filename != Path::new(":memory:")
			&& let Some(parent) = filename.parent()
			&& !parent.as_os_str().is_empty()
		{
			std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
				path: parent.display().to_string(),
				source,
			})?;
		}

		// Single writer; also keeps `sqlite::memory:` to one shared database.
		let pool = SqlitePoolOptions::new().max_connections(1).connect_with(opts).await?;
		sqlx::migrate!("migrations/sqlite").run(&pool).await?;

		Ok(Self { pool })
	}
}

#[async_trait::async_trait]
impl StateBackend for SqliteStateBackend {
	async fn get(&self, account: &AccountId) -> Result<Option<AccountState>, StoreError> {
		let row: Option<StateRow> = sqlx::query_as(
			"SELECT account_id, notification_ref, stream_started_at, ended_at FROM account_state WHERE account_id = ?",
		)
		.bind(account.as_str())
		.fetch_optional(&self.pool)
		.await?;

		row.map(state_from_row).transpose().map(|r| r.map(|(_, state)| state))
	}

	async fn put(&self, account: &AccountId, state: &AccountState) -> Result<(), StoreError> {
		sqlx::query(
			"INSERT INTO account_state (account_id, notification_ref, stream_started_at, ended_at, updated_at) \
			VALUES (?, ?, ?, ?, strftime('%s','now')) \
			ON CONFLICT(account_id) DO UPDATE SET \
			notification_ref = excluded.notification_ref, \
			stream_started_at = excluded.stream_started_at, \
			ended_at = excluded.ended_at, \
			updated_at = excluded.updated_at",
		)
		.bind(account.as_str())
		.bind(state.notification_ref.as_str())
		.bind(state.stream_started_at)
		.bind(state.ended_at)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn set_ended_at(&self, account: &AccountId, ended_at: Option<DateTime<Utc>>) -> Result<bool, StoreError> {
		let result = sqlx::query(
			"UPDATE account_state SET ended_at = ?, updated_at = strftime('%s','now') WHERE account_id = ?",
		)
		.bind(ended_at)
		.bind(account.as_str())
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected() > 0)
	}

	async fn remove(&self, account: &AccountId) -> Result<bool, StoreError> {
		let result = sqlx::query("DELETE FROM account_state WHERE account_id = ?")
			.bind(account.as_str())
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	async fn load_all(&self) -> Result<BTreeMap<AccountId, AccountState>, StoreError> {
		let rows: Vec<StateRow> = sqlx::query_as(
			"SELECT account_id, notification_ref, stream_started_at, ended_at FROM account_state ORDER BY account_id",
		)
		.fetch_all(&self.pool)
		.await?;

		let mut out = BTreeMap::new();
		for row in rows {
			match state_from_row(row) {
				Ok((account, state)) => {
					out.insert(account, state);
				}
				Err(e) => warn!(error = %e, "skipping unreadable state row"),
			}
		}
		Ok(out)
	}

	async fn close(&self) {
		self.pool.close().await;
	}
}

/// Durable account → notification state mapping.
#[derive(Clone)]
pub struct StateStore {
	backend: Arc<dyn StateBackend>,
}

impl StateStore {
	/// Open the backend selected by `database_url` (`sqlite:...` or `memory:`).
	pub async fn open(database_url: &str) -> Result<Self, StoreError> {
		let url = database_url.trim();
		if url == MEMORY_URL {
			warn!("state store is in-memory; notification state will not survive a restart");
			return Ok(Self::in_memory());
		}
		if url.starts_with("sqlite:") {
			let backend = SqliteStateBackend::connect(url).await?;
			info!("state store opened (sqlite)");
			return Ok(Self::with_backend(Arc::new(backend)));
		}
		Err(StoreError::UnsupportedUrl(url.to_string()))
	}

	pub fn in_memory() -> Self {
		Self::with_backend(Arc::new(InMemoryStateBackend::default()))
	}

	pub fn with_backend(backend: Arc<dyn StateBackend>) -> Self {
		Self { backend }
	}

	pub async fn contains(&self, account: &AccountId) -> Result<bool, StoreError> {
		Ok(self.backend.get(account).await?.is_some())
	}

	pub async fn get(&self, account: &AccountId) -> Result<Option<AccountState>, StoreError> {
		self.backend.get(account).await
	}

	pub async fn notification_ref(&self, account: &AccountId) -> Result<Option<NotificationRef>, StoreError> {
		Ok(self.backend.get(account).await?.map(|s| s.notification_ref))
	}

	pub async fn put(&self, account: &AccountId, state: &AccountState) -> Result<(), StoreError> {
		self.backend.put(account, state).await
	}

	/// Errors with [`StoreError::Missing`] when there is no state to update.
	pub async fn set_ended_at(&self, account: &AccountId, ended_at: Option<DateTime<Utc>>) -> Result<(), StoreError> {
		if self.backend.set_ended_at(account, ended_at).await? {
			Ok(())
		} else {
			Err(StoreError::Missing(account.clone()))
		}
	}

	/// Errors with [`StoreError::Missing`] when there is nothing to delete.
	pub async fn delete(&self, account: &AccountId) -> Result<(), StoreError> {
		if self.backend.remove(account).await? {
			Ok(())
		} else {
			Err(StoreError::Missing(account.clone()))
		}
	}

	/// Delete if present. Returns whether anything was removed.
	pub async fn discard(&self, account: &AccountId) -> Result<bool, StoreError> {
		self.backend.remove(account).await
	}

	pub async fn load_all(&self) -> Result<BTreeMap<AccountId, AccountState>, StoreError> {
		self.backend.load_all().await
	}

	pub async fn close(&self) {
		self.backend.close().await;
	}
}
