use std::sync::{Mutex, MutexGuard};

/// Take a mutex even if a panicking holder poisoned it; the status snapshot
/// is plain data, so the last written value is still meaningful.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        crate::log_debug(&format!("mutex poisoned in {context}; recovering"));
        tracing::warn!(context, "mutex poisoned; recovering");
        poisoned.into_inner()
    })
}
