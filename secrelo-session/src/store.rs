//! Tab-scoped session storage.
//!
//! Models the browser's per-tab session storage: it survives a page reload
//! but not the tab. The per-session backup key and the encrypted key backup
//! live here and nowhere else.

use std::collections::HashMap;
use std::sync::Mutex;

/// Storage slot holding the per-session symmetric key.
pub const SESSION_KEY_SLOT: &str = "__session_key";

/// Storage slot holding the encrypted keypair backup.
pub const KEY_BACKUP_SLOT: &str = "__enc_backup";

/// String key/value storage scoped to one tab.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// In-memory [`SessionStore`]; one instance per simulated tab.
#[derive(Default)]
pub struct MemorySessionStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every item, as closing the tab would.
    pub fn clear(&self) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let store = MemorySessionStore::new();
        assert!(store.get("a").is_none());

        store.set("a", "1".to_string());
        store.set("a", "2".to_string());
        assert_eq!(store.get("a").as_deref(), Some("2"));
        assert_eq!(store.len(), 1);

        store.remove("a");
        assert!(store.is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let store = MemorySessionStore::new();
        store.set(SESSION_KEY_SLOT, "k".to_string());
        store.set(KEY_BACKUP_SLOT, "b".to_string());
        store.clear();
        assert!(store.is_empty());
    }
}
