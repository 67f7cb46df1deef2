//! Distributed sessions and caches kept in Redis.
//!
//! A session lives in two colocated hashes, `session:info:{id}` and
//! `session:attr:{id}`, whose TTLs are kept equal to the session timeout.
//! Every operation goes to the store; two protocols are available:
//!
//! - [`Protocol::Scripted`]: each operation is one server-side script, so
//!   the guard (expired, stopped, invalid) and the mutation are atomic.
//! - [`Protocol::Direct`]: each operation is a few plain commands; races
//!   with expiry are detected and compensated, not prevented.
//!
//! [`CacheManager`] hands out typed map caches over the same store, with
//! optional TTL, idle expiry and size bound per cache name.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use twinkey_session::{Protocol, RedisStore, SessionContext, SessionDao, SessionManager};
//!
//! let store = Arc::new(RedisStore::connect("redis://127.0.0.1/").await?);
//! let manager = SessionManager::new(SessionDao::new(store, Protocol::Scripted));
//!
//! let session = manager.start(&SessionContext::new().with_host("10.0.0.1")).await?;
//! session.set_attribute("user", serde_json::json!("alice")).await?;
//! session.touch().await?;
//! ```

pub mod cache;
mod clock;
mod dao;
mod error;
mod keys;
mod manager;
pub mod script;
pub mod session;
mod state;
pub mod store;

pub use cache::{Cache, CacheManager, CachePolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dao::{SessionDao, SessionIdGenerator, UuidGenerator};
pub use error::{CacheError, CacheResult, Result, SessionError, StoreError, StoreResult};
pub use keys::{SESSION_ATTR_KEY_PREFIX, SESSION_INFO_KEY_PREFIX, SessionId, SessionKeys};
pub use manager::{SessionContext, SessionFactory, SessionManager, SimpleSessionFactory};
pub use session::{DirectSession, Protocol, ScriptedSession, Session, SessionTemplate};
pub use state::{GuardCode, SessionState};
pub use store::{MemoryStore, RecordStore, RedisStore, SharedStore};
