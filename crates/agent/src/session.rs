use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::llm::ChatMessage;

const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session id must not be empty")]
    Empty,
    #[error("session id must be at most 128 characters")]
    TooLong,
    #[error("session id must not contain whitespace or control characters")]
    InvalidCharacter,
}

impl SessionId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SessionError::Empty);
        }
        if raw.len() > MAX_SESSION_ID_LEN {
            return Err(SessionError::TooLong);
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(SessionError::InvalidCharacter);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct Session {
    /// One entry per completed turn: the user message followed by every
    /// assistant and tool message it produced.
    turns: Vec<Vec<ChatMessage>>,
    last_active_at: Instant,
}

/// In-memory conversation state keyed by session id, with idle expiry.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    ttl: Duration,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(ttl: Duration, max_turns: usize) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), ttl, max_turns }
    }

    /// Prior messages of a live session, oldest first. An expired session is
    /// dropped and reads as empty.
    pub async fn history(&self, id: &SessionId) -> Vec<ChatMessage> {
        self.history_at(id, Instant::now()).await
    }

    async fn history_at(&self, id: &SessionId, now: Instant) -> Vec<ChatMessage> {
        let mut sessions = self.sessions.write().await;
        let expired = match sessions.get(id) {
            Some(session) => self.is_expired(session, now),
            None => return Vec::new(),
        };
        if expired {
            sessions.remove(id);
            debug!(event_name = "agent.session.expired", session_id = %id, "session expired");
            return Vec::new();
        }
        sessions
            .get(id)
            .map(|session| session.turns.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn record_turn(&self, id: &SessionId, turn: Vec<ChatMessage>) {
        self.record_turn_at(id, turn, Instant::now()).await;
    }

    async fn record_turn_at(&self, id: &SessionId, turn: Vec<ChatMessage>, now: Instant) {
        if turn.is_empty() {
            return;
        }
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(id.clone()).or_insert_with(|| {
            info!(event_name = "agent.session.created", session_id = %id, "session created");
            Session { turns: Vec::new(), last_active_at: now }
        });
        session.turns.push(turn);
        if session.turns.len() > self.max_turns {
            let excess = session.turns.len() - self.max_turns;
            session.turns.drain(..excess);
        }
        session.last_active_at = now;
    }

    /// Returns whether a session was removed.
    pub async fn end(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!(event_name = "agent.session.ended", session_id = %id, "session ended");
        }
        removed
    }

    pub async fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now()).await
    }

    async fn sweep_expired_at(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !self.is_expired(session, now));
        let removed = before - sessions.len();
        if removed > 0 {
            info!(event_name = "agent.session.swept", removed, "expired sessions removed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        now.saturating_duration_since(session.last_active_at) >= self.ttl
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{SessionError, SessionId, SessionStore};
    use crate::llm::ChatMessage;

    fn turn(text: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::User(text.to_string()),
            ChatMessage::Assistant { content: Some(format!("ok: {text}")), tool_calls: Vec::new() },
        ]
    }

    #[test]
    fn session_ids_are_validated() {
        assert_eq!(SessionId::parse("  "), Err(SessionError::Empty));
        assert_eq!(SessionId::parse("a b"), Err(SessionError::InvalidCharacter));
        assert_eq!(SessionId::parse(&"x".repeat(129)), Err(SessionError::TooLong));
        assert_eq!(SessionId::parse(" web-42 ").map(|id| id.to_string()), Ok("web-42".to_string()));
        assert_ne!(SessionId::new_random(), SessionId::new_random());
    }

    #[tokio::test]
    async fn history_is_isolated_per_session() {
        let store = SessionStore::new(Duration::from_secs(60), 10);
        let first = SessionId::parse("first").expect("id");
        let second = SessionId::parse("second").expect("id");

        store.record_turn(&first, turn("hello")).await;

        assert_eq!(store.history(&first).await.len(), 2);
        assert!(store.history(&second).await.is_empty());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn history_keeps_only_the_latest_whole_turns() {
        let store = SessionStore::new(Duration::from_secs(60), 2);
        let id = SessionId::parse("capped").expect("id");

        for text in ["one", "two", "three"] {
            store.record_turn(&id, turn(text)).await;
        }

        let history = store.history(&id).await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], ChatMessage::User("two".to_string()));
        assert_eq!(history[2], ChatMessage::User("three".to_string()));
    }

    #[tokio::test]
    async fn idle_sessions_expire_lazily_and_by_sweep() {
        let ttl = Duration::from_secs(30);
        let store = SessionStore::new(ttl, 10);
        let lazy = SessionId::parse("lazy").expect("id");
        let swept = SessionId::parse("swept").expect("id");
        let start = Instant::now();
        let later = start + ttl + Duration::from_secs(1);

        store.record_turn_at(&lazy, turn("a"), start).await;
        store.record_turn_at(&swept, turn("b"), start).await;

        assert!(store.history_at(&lazy, later).await.is_empty());
        assert_eq!(store.len().await, 1);
        assert_eq!(store.sweep_expired_at(later).await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn end_removes_session_once() {
        let store = SessionStore::new(Duration::from_secs(60), 10);
        let id = SessionId::parse("bye").expect("id");
        store.record_turn(&id, turn("hi")).await;

        assert!(store.end(&id).await);
        assert!(!store.end(&id).await);
        assert!(store.history(&id).await.is_empty());
    }
}
