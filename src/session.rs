use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Opaque identity the transport assigns to each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(n: u64) -> Self {
        Self(n)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The username a live connection has claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub username: String,
    pub joined_at: DateTime<Utc>,
}

/// Tracks which connection joined under which username.
///
/// Holds at most one [`Session`] per connection. Usernames are not required to
/// be unique: two connections may join under the same name and are tracked
/// independently. Callers serialize access (the server keeps it behind a
/// single mutex).
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the session for `id`, replacing any earlier one.
    /// Returns the username that was replaced, if any.
    pub fn put(&mut self, id: ConnectionId, username: impl Into<String>) -> Option<String> {
        let session = Session {
            connection_id: id,
            username: username.into(),
            joined_at: Utc::now(),
        };
        self.sessions.insert(id, session).map(|old| old.username)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Usernames of every joined connection, sorted, duplicates kept.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.values().map(|s| s.username.clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove() {
        let mut reg = SessionRegistry::new();
        let c1 = ConnectionId::new(1);
        assert!(reg.get(c1).is_none());

        assert_eq!(reg.put(c1, "bob"), None);
        let session = reg.get(c1).unwrap();
        assert_eq!(session.username, "bob");
        assert_eq!(session.connection_id, c1);

        let removed = reg.remove(c1).unwrap();
        assert_eq!(removed.username, "bob");
        assert!(reg.get(c1).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn put_overwrites_on_rejoin() {
        let mut reg = SessionRegistry::new();
        let c1 = ConnectionId::new(1);
        reg.put(c1, "bob");
        assert_eq!(reg.put(c1, "robert"), Some("bob".to_string()));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(c1).unwrap().username, "robert");
    }

    #[test]
    fn remove_missing_is_noop() {
        let mut reg = SessionRegistry::new();
        assert!(reg.remove(ConnectionId::new(7)).is_none());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn duplicate_usernames_are_tracked_separately() {
        let mut reg = SessionRegistry::new();
        reg.put(ConnectionId::new(1), "sam");
        reg.put(ConnectionId::new(2), "sam");
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.usernames(), vec!["sam", "sam"]);

        reg.remove(ConnectionId::new(1));
        assert_eq!(reg.get(ConnectionId::new(2)).unwrap().username, "sam");
    }

    #[test]
    fn connection_id_display() {
        assert_eq!(ConnectionId::new(42).to_string(), "conn-42");
    }
}
