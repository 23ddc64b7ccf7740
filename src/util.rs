//! Small shared helpers.

use std::sync::{Mutex, MutexGuard};

/// A poisoned lock only means a panic elsewhere; the guarded state itself
/// stays usable, so recover the guard instead of propagating the panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
