use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

/// Callback invoked with the new credential (or `None`) after every
/// accepted change.
pub type CredentialListener = Arc<dyn Fn(Option<&str>) + Send + Sync>;

/// Registered listeners, keyed by `Arc` identity.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Vec<CredentialListener>,
}

impl ListenerSet {
    /// Register `listener`. Returns false if that same `Arc` is already
    /// registered.
    pub fn insert(&mut self, listener: CredentialListener) -> bool {
        if self.position(&listener).is_some() {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    /// Deregister `listener`. Returns false if it was not registered.
    pub fn remove(&mut self, listener: &CredentialListener) -> bool {
        match self.position(listener) {
            Some(index) => {
                self.listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Copy of the current registrations for notifying outside the lock
    pub fn snapshot(&self) -> Vec<CredentialListener> {
        self.listeners.clone()
    }

    fn position(&self, listener: &CredentialListener) -> Option<usize> {
        self.listeners
            .iter()
            .position(|existing| same_listener(existing, listener))
    }
}

/// Identity comparison on the closure allocation. Compares data pointers
/// only, vtable pointers can differ across codegen units.
fn same_listener(a: &CredentialListener, b: &CredentialListener) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Call every listener with `value` while `still_current` holds, returning
/// how many were called. A panicking listener is logged and skipped; the
/// rest still run.
pub(crate) fn notify_all<F>(listeners: &[CredentialListener], value: Option<&str>, still_current: F) -> usize
where
    F: Fn() -> bool,
{
    for (index, listener) in listeners.iter().enumerate() {
        if !still_current() {
            return index;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| listener(value)));
        if let Err(payload) = result {
            error!(
                listener = index,
                panic = %panic_message(payload.as_ref()),
                "Credential listener panicked"
            );
        }
    }
    listeners.len()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
