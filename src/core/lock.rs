use std::sync::{Mutex, MutexGuard};

/// Locks `mutex`, recovering the guard if a panicking holder poisoned it.
///
/// The guarded state in this crate is plain counters and maps, which stay
/// consistent across a panic in an unrelated worker.
pub fn lock_mutex<'a, T>(mutex: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::error!("Mutex lock poisoned in {}", context);
            poisoned.into_inner()
        }
    }
}
