//! Session lifecycle on top of [`SessionDao`].

use std::sync::Arc;

use tracing::{debug, info};

use crate::dao::SessionDao;
use crate::error::{Result, SessionError};
use crate::keys::SessionId;
use crate::session::{DEFAULT_TIMEOUT_MS, Session, SessionTemplate};

/// What the caller knows about a session it is starting.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub host: Option<String>,
    /// Overrides the factory's default timeout.
    pub timeout_ms: Option<i64>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Builds the template a new session is persisted from.
pub trait SessionFactory: Send + Sync {
    fn create_session(&self, context: &SessionContext) -> SessionTemplate;
}

/// Copies host and timeout from the context, falling back to a default
/// timeout.
#[derive(Debug, Clone)]
pub struct SimpleSessionFactory {
    default_timeout_ms: i64,
}

impl SimpleSessionFactory {
    pub fn new(default_timeout_ms: i64) -> Self {
        Self { default_timeout_ms }
    }
}

impl Default for SimpleSessionFactory {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_MS)
    }
}

impl SessionFactory for SimpleSessionFactory {
    fn create_session(&self, context: &SessionContext) -> SessionTemplate {
        SessionTemplate {
            id: None,
            start_timestamp: None,
            timeout_ms: context.timeout_ms.unwrap_or(self.default_timeout_ms),
            host: context.host.clone(),
        }
    }
}

/// Starts, looks up and stops sessions.
pub struct SessionManager {
    dao: SessionDao,
    factory: Arc<dyn SessionFactory>,
}

impl SessionManager {
    pub fn new(dao: SessionDao) -> Self {
        Self {
            dao,
            factory: Arc::new(SimpleSessionFactory::default()),
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn dao(&self) -> &SessionDao {
        &self.dao
    }

    /// Create and persist a new session.
    pub async fn start(&self, context: &SessionContext) -> Result<Box<dyn Session>> {
        let mut template = self.factory.create_session(context);
        debug!(host = ?template.host, "creating session");
        let id = self.dao.create(&mut template).await?;
        info!(session_id = %id, "session started");
        self.get_session(&id).await
    }

    /// Look up a session by id.
    ///
    /// Fails with [`SessionError::UnknownSession`] when the id maps to no
    /// readable session.
    pub async fn get_session(&self, id: &SessionId) -> Result<Box<dyn Session>> {
        if id.is_empty() {
            return Err(SessionError::IllegalArgument(
                "session id must not be empty".to_string(),
            ));
        }
        self.dao
            .read(id)
            .await?
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))
    }

    /// Stop a session and remove its records.
    ///
    /// A session some handle already stopped is removed all the same.
    pub async fn stop(&self, id: &SessionId) -> Result<()> {
        match self.get_session(id).await {
            Ok(session) => session.stop().await?,
            Err(SessionError::Stopped) => {
                debug!(session_id = %id, "session already stopped");
            }
            Err(e) => return Err(e),
        }
        self.dao.delete(id).await?;
        info!(session_id = %id, "session stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Protocol;
    use crate::store::MemoryStore;

    fn manager(protocol: Protocol) -> (Arc<MemoryStore>, SessionManager) {
        let store = Arc::new(MemoryStore::new());
        let dao = SessionDao::new(store.clone(), protocol);
        (store, SessionManager::new(dao))
    }

    #[test]
    fn test_factory_applies_context() {
        let factory = SimpleSessionFactory::new(10_000);
        let template = factory.create_session(&SessionContext::new());
        assert_eq!(template.timeout_ms, 10_000);
        assert_eq!(template.host, None);

        let template =
            factory.create_session(&SessionContext::new().with_host("h1").with_timeout_ms(5));
        assert_eq!(template.timeout_ms, 5);
        assert_eq!(template.host.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn test_start_and_get() {
        for protocol in [Protocol::Scripted, Protocol::Direct] {
            let (_store, manager) = manager(protocol);
            let started = manager
                .start(&SessionContext::new().with_host("10.1.1.1"))
                .await
                .unwrap();

            let found = manager.get_session(started.id()).await.unwrap();
            assert_eq!(found.id(), started.id());
            assert_eq!(found.host().await.unwrap().as_deref(), Some("10.1.1.1"));
            assert_eq!(found.timeout().await.unwrap(), DEFAULT_TIMEOUT_MS);
        }
    }

    #[tokio::test]
    async fn test_get_unknown_session() {
        let (_store, manager) = manager(Protocol::Scripted);
        let err = manager.get_session(&"ghost".into()).await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(id) if id == "ghost"));

        let err = manager.get_session(&"".into()).await.unwrap_err();
        assert!(matches!(err, SessionError::IllegalArgument(_)));
    }

    #[tokio::test]
    async fn test_stop_deletes_records() {
        for protocol in [Protocol::Scripted, Protocol::Direct] {
            let (store, manager) = manager(protocol);
            let session = manager.start(&SessionContext::new()).await.unwrap();
            let id = session.id().clone();

            manager.stop(&id).await.unwrap();

            assert_eq!(store.key_count(), 0);
            assert!(matches!(
                manager.get_session(&id).await,
                Err(SessionError::UnknownSession(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_stop_after_handle_stop_deletes_records() {
        for protocol in [Protocol::Scripted, Protocol::Direct] {
            let (store, manager) = manager(protocol);
            let session = manager.start(&SessionContext::new()).await.unwrap();
            session.set_attribute("k", serde_json::json!(1)).await.unwrap();
            let id = session.id().clone();

            session.stop().await.unwrap();
            manager.stop(&id).await.unwrap();

            assert_eq!(store.key_count(), 0, "{protocol}");
            assert!(
                matches!(
                    manager.get_session(&id).await,
                    Err(SessionError::UnknownSession(_))
                ),
                "{protocol}"
            );
        }
    }

    #[tokio::test]
    async fn test_stop_unknown_session() {
        for protocol in [Protocol::Scripted, Protocol::Direct] {
            let (_store, manager) = manager(protocol);
            assert!(
                matches!(
                    manager.stop(&"ghost".into()).await,
                    Err(SessionError::UnknownSession(_))
                ),
                "{protocol}"
            );
        }
    }
}
