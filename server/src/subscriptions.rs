use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use session_tracker_data_management::{DataManager, DataManagerError};
use session_tracker_lib::session::{SessionId, SessionState};

/// Transport level identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: HandleId,
    pub session_id: SessionId,
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("No session to subscribe to, connect with ?sessionId=<id>")]
    MissingSessionScope,

    #[error("No active session {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    DataManager(#[from] DataManagerError),
}

impl SubscriptionError {
    pub fn code(&self) -> &'static str {
        match self {
            SubscriptionError::MissingSessionScope => "MissingSessionScope",
            SubscriptionError::SessionNotFound(_) => "SessionNotFound",
            SubscriptionError::DataManager(_) => "InternalError",
        }
    }
}

#[derive(Default)]
struct Subscriptions {
    by_handle: HashMap<HandleId, SessionId>,
    by_session: HashMap<SessionId, HashSet<HandleId>>,
}

impl Subscriptions {
    fn remove(&mut self, handle: HandleId) -> Option<SessionId> {
        let session_id = self.by_handle.remove(&handle)?;
        if let Some(handles) = self.by_session.get_mut(&session_id) {
            handles.remove(&handle);
            if handles.is_empty() {
                self.by_session.remove(&session_id);
            }
        }
        Some(session_id)
    }
}

/// Which live connection listens to which session. A handle belongs to at most one session.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    data_manager: DataManager,
    subscriptions: Arc<RwLock<Subscriptions>>,
}

impl SubscriptionRegistry {
    pub fn new(data_manager: DataManager) -> Self {
        Self {
            data_manager,
            subscriptions: Arc::new(RwLock::new(Subscriptions::default())),
        }
    }

    /// Binds `handle` to the active session named by `scope`.
    /// Subscribing again overwrites, so a handle can be moved to another session.
    pub async fn subscribe(&self, scope: Option<&str>, handle: HandleId) -> Result<SubscriptionHandle, SubscriptionError> {
        let scope = scope
            .map(str::trim)
            .filter(|scope| !scope.is_empty())
            .ok_or(SubscriptionError::MissingSessionScope)?;

        let session_id: SessionId = scope
            .parse()
            .map_err(|_| SubscriptionError::SessionNotFound(scope.to_string()))?;

        match self.data_manager.find_session(session_id).await? {
            Some(session) if session.state() == SessionState::Active => {}
            _ => return Err(SubscriptionError::SessionNotFound(scope.to_string())),
        }

        let mut subscriptions = self.subscriptions.write();
        subscriptions.remove(handle);
        subscriptions.by_handle.insert(handle, session_id);
        subscriptions.by_session.entry(session_id).or_default().insert(handle);

        tracing::debug!("{} subscribed to session {}", handle, session_id);
        Ok(SubscriptionHandle { id: handle, session_id })
    }

    /// Never fails, unknown handles are ignored.
    pub fn unsubscribe(&self, handle: HandleId) -> Option<SessionId> {
        let session_id = self.subscriptions.write().remove(handle);
        if let Some(session_id) = session_id {
            tracing::debug!("{} unsubscribed from session {}", handle, session_id);
        }
        session_id
    }

    pub fn members_of(&self, session_id: SessionId) -> HashSet<HandleId> {
        self.subscriptions
            .read()
            .by_session
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn session_of(&self, handle: HandleId) -> Option<SessionId> {
        self.subscriptions.read().by_handle.get(&handle).copied()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry_with_session() -> (SubscriptionRegistry, DataManager, SessionId) {
        let data_manager = DataManager::in_memory();
        let session = data_manager.create_session("Commute").await.unwrap();
        (SubscriptionRegistry::new(data_manager.clone()), data_manager, session.id)
    }

    #[tokio::test]
    async fn missing_scope() {
        let (registry, _, _) = registry_with_session().await;
        let handle = HandleId::next();

        assert!(matches!(registry.subscribe(None, handle).await, Err(SubscriptionError::MissingSessionScope)));
        assert!(matches!(registry.subscribe(Some("  "), handle).await, Err(SubscriptionError::MissingSessionScope)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unknown_or_inactive_session() {
        let (registry, data_manager, session_id) = registry_with_session().await;
        let handle = HandleId::next();

        let unknown = SessionId::generate().to_string();
        assert!(matches!(registry.subscribe(Some(&unknown), handle).await, Err(SubscriptionError::SessionNotFound(_))));
        assert!(matches!(registry.subscribe(Some("garbage"), handle).await, Err(SubscriptionError::SessionNotFound(_))));

        data_manager.update_session(session_id, "Commute", false).await.unwrap();
        let inactive = session_id.to_string();
        let err = registry.subscribe(Some(&inactive), handle).await.unwrap_err();
        assert_eq!(err.code(), "SessionNotFound");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn resubscribe_is_idempotent() {
        let (registry, _, session_id) = registry_with_session().await;
        let handle = HandleId::next();
        let scope = session_id.to_string();

        registry.subscribe(Some(&scope), handle).await.unwrap();
        registry.subscribe(Some(&scope), handle).await.unwrap();

        assert_eq!(registry.members_of(session_id), HashSet::from([handle]));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn handle_moves_between_sessions() {
        let (registry, data_manager, first) = registry_with_session().await;
        let second = data_manager.create_session("Return").await.unwrap().id;
        let handle = HandleId::next();

        registry.subscribe(Some(&first.to_string()), handle).await.unwrap();
        registry.subscribe(Some(&second.to_string()), handle).await.unwrap();

        assert!(registry.members_of(first).is_empty());
        assert_eq!(registry.members_of(second), HashSet::from([handle]));
        assert_eq!(registry.session_of(handle), Some(second));
    }

    #[tokio::test]
    async fn unsubscribe() {
        let (registry, _, session_id) = registry_with_session().await;
        let (a, b) = (HandleId::next(), HandleId::next());
        let scope = session_id.to_string();
        registry.subscribe(Some(&scope), a).await.unwrap();
        registry.subscribe(Some(&scope), b).await.unwrap();

        assert_eq!(registry.unsubscribe(a), Some(session_id));
        assert_eq!(registry.unsubscribe(a), None);
        assert_eq!(registry.members_of(session_id), HashSet::from([b]));

        registry.unsubscribe(b);
        assert!(registry.members_of(session_id).is_empty());
        assert!(registry.members_of(SessionId::generate()).is_empty());
    }
}
