//! Session persistence entry points: create, read, delete.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SessionError};
use crate::keys::{SessionId, SessionKeys};
use crate::script::SessionScript;
use crate::session::{DirectSession, Protocol, ScriptedSession, Session, SessionTemplate};
use crate::store::SharedStore;

/// Produces ids for new sessions.
pub trait SessionIdGenerator: Send + Sync {
    fn generate(&self, template: &SessionTemplate) -> SessionId;
}

/// Random UUID v4 ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl SessionIdGenerator for UuidGenerator {
    fn generate(&self, _template: &SessionTemplate) -> SessionId {
        SessionId::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Creates, reads and deletes sessions in the store.
///
/// The protocol is fixed at construction; every handle the DAO returns
/// uses it.
pub struct SessionDao {
    store: SharedStore,
    protocol: Protocol,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn SessionIdGenerator>,
}

impl SessionDao {
    pub fn new(store: SharedStore, protocol: Protocol) -> Self {
        Self {
            store,
            protocol,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn SessionIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Assign a fresh id to `template`, persist it and return the id.
    pub async fn create(&self, template: &mut SessionTemplate) -> Result<SessionId> {
        let id = self.ids.generate(template);
        template.id = Some(id.clone());
        trace!(session_id = %id, protocol = %self.protocol, "creating session");

        match self.protocol {
            Protocol::Scripted => {
                ScriptedSession::create(self.store.clone(), self.clock.clone(), template).await?;
            }
            Protocol::Direct => {
                DirectSession::create(self.store.clone(), self.clock.clone(), template).await?;
            }
        }
        Ok(id)
    }

    /// A handle onto a live session, `None` when the id maps to no readable
    /// state.
    pub async fn read(&self, id: &SessionId) -> Result<Option<Box<dyn Session>>> {
        if id.is_empty() {
            return Ok(None);
        }
        match self.protocol {
            Protocol::Scripted => {
                let session =
                    ScriptedSession::attach(self.store.clone(), self.clock.clone(), id.clone())?;
                if session.remaining_ttl().await? > 0 {
                    Ok(Some(Box::new(session)))
                } else {
                    debug!(session_id = %id, "session not found");
                    Ok(None)
                }
            }
            Protocol::Direct => {
                let opened =
                    DirectSession::open(self.store.clone(), self.clock.clone(), id.clone()).await;
                match opened {
                    Ok(session) => Ok(Some(Box::new(session))),
                    Err(SessionError::Expired) => {
                        debug!(session_id = %id, "session not found");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Remove both records of a session. Empty ids are ignored.
    pub async fn delete(&self, id: &SessionId) -> Result<()> {
        if id.is_empty() {
            return Ok(());
        }
        let keys = SessionKeys::for_id(id);
        match self.protocol {
            Protocol::Scripted => {
                self.store
                    .eval(SessionScript::Delete, &keys.both(), &[])
                    .await?;
            }
            Protocol::Direct => {
                self.store.del(&keys.both()).await?;
            }
        }
        debug!(session_id = %id, "session deleted");
        Ok(())
    }

    /// Enumerating sessions would mean scanning the keyspace; always empty.
    pub async fn active_sessions(&self) -> Result<Vec<Box<dyn Session>>> {
        trace!("active session enumeration is not supported");
        Ok(Vec::new())
    }
}

impl fmt::Debug for SessionDao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDao")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RecordStore};
    use parking_lot::Mutex;
    use serde_json::json;

    /// Hands out `seq-1`, `seq-2`, ...
    #[derive(Default)]
    struct SequentialIds {
        next: Mutex<u32>,
    }

    impl SessionIdGenerator for SequentialIds {
        fn generate(&self, _template: &SessionTemplate) -> SessionId {
            let mut next = self.next.lock();
            *next += 1;
            SessionId::new(format!("seq-{next}"))
        }
    }

    fn dao(store: &Arc<MemoryStore>, protocol: Protocol) -> SessionDao {
        SessionDao::new(store.clone(), protocol)
            .with_id_generator(Arc::new(SequentialIds::default()))
    }

    #[tokio::test]
    async fn test_create_assigns_generated_id() {
        for protocol in [Protocol::Scripted, Protocol::Direct] {
            let store = Arc::new(MemoryStore::new());
            let dao = dao(&store, protocol);
            let mut template = SessionTemplate::new().with_host("h");

            let id = dao.create(&mut template).await.unwrap();

            assert_eq!(id.as_str(), "seq-1");
            assert_eq!(template.id, Some(id.clone()));
            assert!(store.exists(&SessionKeys::for_id(&id).info).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_uuid_ids_are_unique() {
        let store = Arc::new(MemoryStore::new());
        let dao = SessionDao::new(store, Protocol::Scripted);
        let a = dao.create(&mut SessionTemplate::new()).await.unwrap();
        let b = dao.create(&mut SessionTemplate::new()).await.unwrap();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(a.as_str()).is_ok());
    }

    #[tokio::test]
    async fn test_read_returns_handle_for_live_session() {
        for protocol in [Protocol::Scripted, Protocol::Direct] {
            let store = Arc::new(MemoryStore::new());
            let dao = dao(&store, protocol);
            let id = dao.create(&mut SessionTemplate::new()).await.unwrap();

            let session = dao.read(&id).await.unwrap().expect("session");
            session.set_attribute("k", json!("v")).await.unwrap();
            assert_eq!(session.attribute("k").await.unwrap(), Some(json!("v")));
        }
    }

    #[tokio::test]
    async fn test_read_unknown_is_none() {
        for protocol in [Protocol::Scripted, Protocol::Direct] {
            let store = Arc::new(MemoryStore::new());
            let dao = dao(&store, protocol);
            assert!(dao.read(&"missing".into()).await.unwrap().is_none());
            assert!(dao.read(&"".into()).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_delete_removes_records() {
        for protocol in [Protocol::Scripted, Protocol::Direct] {
            let store = Arc::new(MemoryStore::new());
            let dao = dao(&store, protocol);
            let id = dao.create(&mut SessionTemplate::new()).await.unwrap();
            dao.read(&id)
                .await
                .unwrap()
                .expect("session")
                .set_attribute("k", json!(1))
                .await
                .unwrap();

            dao.delete(&id).await.unwrap();
            dao.delete(&"".into()).await.unwrap();

            assert_eq!(store.key_count(), 0);
            assert!(dao.read(&id).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_active_sessions_is_empty() {
        let store = Arc::new(MemoryStore::new());
        let dao = dao(&store, Protocol::Scripted);
        dao.create(&mut SessionTemplate::new()).await.unwrap();
        assert!(dao.active_sessions().await.unwrap().is_empty());
    }
}
