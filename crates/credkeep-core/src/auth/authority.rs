//! The credential authority: single owner of the session credential.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::listeners::{notify_all, CredentialListener, ListenerSet};
use crate::extract::extract_credential;
use crate::storage::{CredentialStorage, DEFAULT_STORAGE_KEY};

/// Owns the current session credential, keeps it written through to
/// durable storage, and notifies listeners when it changes.
///
/// No method returns an error. Storage failures are logged and the
/// in-memory value stays authoritative.
///
/// Every accepted change gets a generation number under the state lock.
/// A delivery that has been overtaken by a newer change stops before the
/// next listener, so no listener is handed a value older than one it has
/// already seen.
pub struct CredentialAuthority {
    storage: Box<dyn CredentialStorage>,
    storage_key: String,
    current: Mutex<Option<String>>,
    generation: AtomicU64,
    listeners: Mutex<ListenerSet>,
}

impl CredentialAuthority {
    /// Create an authority over `storage` using the default storage key,
    /// seeded from whatever is stored there.
    pub fn new(storage: impl CredentialStorage + 'static) -> Self {
        Self::with_key(storage, DEFAULT_STORAGE_KEY)
    }

    /// Create an authority persisting under `storage_key`.
    pub fn with_key(storage: impl CredentialStorage + 'static, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let initial = match storage.read(&storage_key) {
            Ok(value) => normalize(value.as_deref()).map(str::to_string),
            Err(e) => {
                warn!(
                    backend = storage.name(),
                    error = %e,
                    "Could not read stored credential, starting unauthenticated"
                );
                None
            }
        };
        debug!(
            backend = storage.name(),
            authenticated = initial.is_some(),
            "Credential authority initialized"
        );

        Self {
            storage: Box::new(storage),
            storage_key,
            current: Mutex::new(initial),
            generation: AtomicU64::new(0),
            listeners: Mutex::new(ListenerSet::default()),
        }
    }

    /// The current credential. Never touches storage.
    pub fn get(&self) -> Option<String> {
        self.current().clone()
    }

    /// Replace the credential and persist it.
    pub fn set(&self, value: Option<&str>) {
        self.set_with(value, true);
    }

    /// Replace the credential. With `persist` false a present value is kept
    /// in memory only; an absent value always removes the stored entry.
    ///
    /// Setting the value already held is a no-op and notifies nobody.
    pub fn set_with(&self, value: Option<&str>, persist: bool) {
        let value = normalize(value);
        let generation = {
            let mut current = self.current();
            if current.as_deref() == value {
                return;
            }
            *current = value.map(str::to_string);
            // Persist under the state lock so concurrent writers cannot
            // leave storage holding an older value than memory
            match value {
                Some(token) if persist => self.persist(token),
                Some(_) => {}
                None => self.remove_stored(),
            }
            self.next_generation()
        };

        debug!(
            authenticated = value.is_some(),
            len = value.map(str::len).unwrap_or(0),
            persisted = persist,
            "Credential changed"
        );
        self.notify(value, generation);
    }

    /// Drop the credential and the stored entry.
    ///
    /// The stored entry is removed even when nothing is held in memory, so
    /// an entry written behind the authority's back cannot outlive a logout.
    pub fn clear(&self) {
        let generation = {
            let mut current = self.current();
            self.remove_stored();
            match current.take() {
                Some(_) => self.next_generation(),
                None => return,
            }
        };
        info!("Credential cleared");
        self.notify(None, generation);
    }

    pub fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }

    /// Look for a credential in `payload`. If one is found it becomes the
    /// current credential and is returned; otherwise the current credential
    /// is returned unchanged.
    pub fn apply_from_response(&self, payload: &Value) -> Option<String> {
        match extract_credential(payload) {
            Some(found) => {
                self.set(Some(found));
                Some(found.to_string())
            }
            None => self.get(),
        }
    }

    /// Register `listener`. Registering the same `Arc` again does nothing.
    pub fn add_listener(&self, listener: CredentialListener) {
        if !self.listeners().insert(listener) {
            debug!("Listener already registered");
        }
    }

    /// Deregister `listener`, matched by `Arc` identity.
    pub fn remove_listener(&self, listener: &CredentialListener) {
        self.listeners().remove(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    pub fn storage_backend(&self) -> &'static str {
        self.storage.name()
    }

    /// Must be called with the state lock held
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, value: Option<&str>, generation: u64) {
        // Snapshot so listeners can register, deregister or call back in
        // while the notification runs
        let snapshot = self.listeners().snapshot();
        let delivered = notify_all(&snapshot, value, || {
            self.generation.load(Ordering::SeqCst) == generation
        });
        if delivered < snapshot.len() {
            debug!(
                generation,
                delivered,
                "Notification superseded by a newer change"
            );
        }
    }

    fn persist(&self, token: &str) {
        if let Err(e) = self.storage.write(&self.storage_key, token) {
            warn!(
                backend = self.storage.name(),
                error = %e,
                "Failed to persist credential, keeping it in memory only"
            );
        }
    }

    fn remove_stored(&self) {
        if let Err(e) = self.storage.remove(&self.storage_key) {
            warn!(
                backend = self.storage.name(),
                error = %e,
                "Failed to remove stored credential"
            );
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<String>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn listeners(&self) -> MutexGuard<'_, ListenerSet> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for CredentialAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialAuthority")
            .field("backend", &self.storage.name())
            .field("storage_key", &self.storage_key)
            .field("authenticated", &self.is_authenticated())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Wrap a closure as a listener handle usable with `add_listener` and
/// `remove_listener`.
pub fn listener<F>(f: F) -> CredentialListener
where
    F: Fn(Option<&str>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Empty strings count as no credential
fn normalize(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageError, UnavailableStorage};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Seen = Arc<Mutex<Vec<Option<String>>>>;

    fn recorder() -> (CredentialListener, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = listener(move |v: Option<&str>| {
            sink.lock().unwrap().push(v.map(str::to_string));
        });
        (listener, seen)
    }

    /// Storage that reads fine but fails every write and remove
    struct ReadOnlyStorage;

    impl CredentialStorage for ReadOnlyStorage {
        fn read(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(Some("stored".to_string()))
        }

        fn write(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("read only".to_string()))
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("read only".to_string()))
        }

        fn name(&self) -> &'static str {
            "read-only"
        }
    }

    #[test]
    fn test_starts_empty() {
        let authority = CredentialAuthority::new(MemoryStorage::new());
        assert_eq!(authority.get(), None);
        assert!(!authority.is_authenticated());
    }

    #[test]
    fn test_sequential_sets_notify_once_each() {
        let authority = CredentialAuthority::new(MemoryStorage::new());
        let (listener, seen) = recorder();
        authority.add_listener(listener);

        authority.set(Some("v1"));
        authority.set(Some("v2"));

        assert_eq!(authority.get().as_deref(), Some("v2"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("v1".to_string()), Some("v2".to_string())]
        );
    }

    #[test]
    fn test_redundant_set_is_noop() {
        let storage = MemoryStorage::new();
        let authority = CredentialAuthority::new(storage.clone());
        let (listener, seen) = recorder();
        authority.add_listener(listener);

        authority.set(Some("abc"));
        storage.remove(DEFAULT_STORAGE_KEY).unwrap();
        authority.set(Some("abc"));

        assert_eq!(seen.lock().unwrap().len(), 1);
        // No second write happened
        assert!(!storage.contains(DEFAULT_STORAGE_KEY));
    }

    #[test]
    fn test_restart_round_trip() {
        let storage = MemoryStorage::new();
        let authority = CredentialAuthority::new(storage.clone());
        authority.set(Some("abc"));

        let restarted = CredentialAuthority::new(storage);
        assert_eq!(restarted.get().as_deref(), Some("abc"));
        assert!(restarted.is_authenticated());
    }

    #[test]
    fn test_clear_removes_entry() {
        let storage = MemoryStorage::new();
        let authority = CredentialAuthority::new(storage.clone());
        let (listener, seen) = recorder();
        authority.add_listener(listener);

        authority.set(Some("abc"));
        authority.clear();

        assert_eq!(authority.get(), None);
        assert!(!storage.contains(DEFAULT_STORAGE_KEY));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("abc".to_string()), None]
        );
    }

    #[test]
    fn test_clear_when_empty_still_removes_stale_entry() {
        let storage = MemoryStorage::new();
        let authority = CredentialAuthority::new(storage.clone());
        let (listener, seen) = recorder();
        authority.add_listener(listener);

        storage.write(DEFAULT_STORAGE_KEY, "stale").unwrap();
        authority.clear();

        assert!(!storage.contains(DEFAULT_STORAGE_KEY));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_string_is_absent() {
        let storage = MemoryStorage::new();
        let authority = CredentialAuthority::new(storage.clone());
        authority.set(Some("abc"));
        authority.set(Some(""));

        assert_eq!(authority.get(), None);
        assert!(!storage.contains(DEFAULT_STORAGE_KEY));

        storage.write(DEFAULT_STORAGE_KEY, "").unwrap();
        let restarted = CredentialAuthority::new(storage);
        assert_eq!(restarted.get(), None);
    }

    #[test]
    fn test_set_without_persist() {
        let storage = MemoryStorage::new();
        let authority = CredentialAuthority::new(storage.clone());
        authority.set_with(Some("memory-only"), false);

        assert_eq!(authority.get().as_deref(), Some("memory-only"));
        assert!(!storage.contains(DEFAULT_STORAGE_KEY));
    }

    #[test]
    fn test_absent_value_removes_entry_even_without_persist() {
        let storage = MemoryStorage::new();
        let authority = CredentialAuthority::new(storage.clone());
        authority.set(Some("abc"));
        authority.set_with(None, false);

        assert!(!storage.contains(DEFAULT_STORAGE_KEY));
    }

    #[test]
    fn test_custom_storage_key() {
        let storage = MemoryStorage::new();
        let authority = CredentialAuthority::with_key(storage.clone(), "session");
        authority.set(Some("abc"));
        assert!(storage.contains("session"));
        assert!(!storage.contains(DEFAULT_STORAGE_KEY));
    }

    #[test]
    fn test_unavailable_storage_degrades_to_memory() {
        let authority = CredentialAuthority::new(UnavailableStorage);
        assert_eq!(authority.get(), None);

        let (listener, seen) = recorder();
        authority.add_listener(listener);
        authority.set(Some("abc"));
        assert_eq!(authority.get().as_deref(), Some("abc"));

        authority.clear();
        assert_eq!(authority.get(), None);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_write_keeps_memory_value() {
        let authority = CredentialAuthority::new(ReadOnlyStorage);
        assert_eq!(authority.get().as_deref(), Some("stored"));

        authority.set(Some("new"));
        assert_eq!(authority.get().as_deref(), Some("new"));

        authority.clear();
        assert_eq!(authority.get(), None);
    }

    #[test]
    fn test_duplicate_listener_notified_once() {
        let authority = CredentialAuthority::new(MemoryStorage::new());
        let (listener, seen) = recorder();
        authority.add_listener(listener.clone());
        authority.add_listener(listener);
        assert_eq!(authority.listener_count(), 1);

        authority.set(Some("abc"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_removed_listener_not_notified() {
        let authority = CredentialAuthority::new(MemoryStorage::new());
        let (listener, seen) = recorder();
        authority.add_listener(listener.clone());
        authority.set(Some("a"));
        authority.remove_listener(&listener);
        authority.set(Some("b"));

        assert_eq!(*seen.lock().unwrap(), vec![Some("a".to_string())]);
        assert_eq!(authority.listener_count(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let authority = CredentialAuthority::new(MemoryStorage::new());
        authority.add_listener(listener(|_: Option<&str>| panic!("listener failure")));
        let (listener, seen) = recorder();
        authority.add_listener(listener);

        authority.set(Some("v"));

        assert_eq!(*seen.lock().unwrap(), vec![Some("v".to_string())]);
        assert_eq!(authority.get().as_deref(), Some("v"));
    }

    #[test]
    fn test_listener_sees_new_value_via_get() {
        let authority = Arc::new(CredentialAuthority::new(MemoryStorage::new()));
        let observed = Arc::new(Mutex::new(None));
        {
            let weak = Arc::downgrade(&authority);
            let observed = observed.clone();
            authority.add_listener(listener(move |_: Option<&str>| {
                if let Some(authority) = weak.upgrade() {
                    *observed.lock().unwrap() = authority.get();
                }
            }));
        }

        authority.set(Some("fresh"));
        assert_eq!(observed.lock().unwrap().as_deref(), Some("fresh"));
    }

    #[test]
    fn test_listener_added_during_notification_misses_current_change() {
        let authority = Arc::new(CredentialAuthority::new(MemoryStorage::new()));
        let (late, late_seen) = recorder();
        let added = Arc::new(AtomicUsize::new(0));
        {
            let weak = Arc::downgrade(&authority);
            let added = added.clone();
            authority.add_listener(listener(move |_: Option<&str>| {
                if let Some(authority) = weak.upgrade() {
                    authority.add_listener(late.clone());
                    added.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        authority.set(Some("first"));
        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert!(late_seen.lock().unwrap().is_empty());

        authority.set(Some("second"));
        assert_eq!(*late_seen.lock().unwrap(), vec![Some("second".to_string())]);
        // Re-registration from the second notification was de-duplicated
        assert_eq!(authority.listener_count(), 2);
    }

    #[test]
    fn test_apply_from_response() {
        let storage = MemoryStorage::new();
        let authority = CredentialAuthority::new(storage.clone());
        let (listener, seen) = recorder();
        authority.add_listener(listener);

        let found = authority.apply_from_response(&json!({ "data": { "accessToken": "y" } }));
        assert_eq!(found.as_deref(), Some("y"));
        assert_eq!(authority.get().as_deref(), Some("y"));
        assert_eq!(storage.read(DEFAULT_STORAGE_KEY).unwrap().as_deref(), Some("y"));

        // Nothing found: current value returned, nothing fires
        let found = authority.apply_from_response(&json!({ "status": "ok" }));
        assert_eq!(found.as_deref(), Some("y"));
        let found = authority.apply_from_response(&json!(null));
        assert_eq!(found.as_deref(), Some("y"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_sets_leave_storage_consistent() {
        let storage = MemoryStorage::new();
        let authority = Arc::new(CredentialAuthority::new(storage.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let authority = authority.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        authority.set(Some(format!("token-{}-{}", i, j).as_str()));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(authority.get(), storage.read(DEFAULT_STORAGE_KEY).unwrap());
    }

    #[test]
    fn test_listener_removed_during_notification_still_sees_current_change() {
        let authority = Arc::new(CredentialAuthority::new(MemoryStorage::new()));
        let (sibling, sibling_seen) = recorder();
        {
            let weak = Arc::downgrade(&authority);
            let sibling = sibling.clone();
            authority.add_listener(listener(move |_: Option<&str>| {
                if let Some(authority) = weak.upgrade() {
                    authority.remove_listener(&sibling);
                }
            }));
        }
        authority.add_listener(sibling);

        authority.set(Some("first"));
        assert_eq!(*sibling_seen.lock().unwrap(), vec![Some("first".to_string())]);
        assert_eq!(authority.listener_count(), 1);

        authority.set(Some("second"));
        assert_eq!(*sibling_seen.lock().unwrap(), vec![Some("first".to_string())]);
    }

    #[test]
    fn test_overlapping_sets_deliver_newest_last() {
        use std::sync::mpsc;

        let authority = Arc::new(CredentialAuthority::new(MemoryStorage::new()));
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        let release_rx = Mutex::new(release_rx);

        // Holds up the delivery of "v1" until released
        authority.add_listener(listener(move |v: Option<&str>| {
            if v == Some("v1") {
                started_tx.lock().unwrap().send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
            }
        }));
        let last_seen = Arc::new(Mutex::new(None));
        {
            let last_seen = last_seen.clone();
            authority.add_listener(listener(move |v: Option<&str>| {
                *last_seen.lock().unwrap() = v.map(str::to_string);
            }));
        }

        let writer = {
            let authority = authority.clone();
            std::thread::spawn(move || authority.set(Some("v1")))
        };
        started_rx.recv().unwrap();
        authority.set(Some("v2"));
        release_tx.send(()).unwrap();
        writer.join().unwrap();

        assert_eq!(authority.get().as_deref(), Some("v2"));
        assert_eq!(*last_seen.lock().unwrap(), authority.get());
    }

    #[test]
    fn test_reentrant_set_supersedes_outer_delivery() {
        let authority = Arc::new(CredentialAuthority::new(MemoryStorage::new()));
        {
            let weak = Arc::downgrade(&authority);
            authority.add_listener(listener(move |v: Option<&str>| {
                if v == Some("login") {
                    if let Some(authority) = weak.upgrade() {
                        authority.set(Some("rotated"));
                    }
                }
            }));
        }
        let (listener, seen) = recorder();
        authority.add_listener(listener);

        authority.set(Some("login"));

        // The stale "login" delivery is not handed out after "rotated"
        assert_eq!(*seen.lock().unwrap(), vec![Some("rotated".to_string())]);
        assert_eq!(authority.get().as_deref(), Some("rotated"));
    }
}
