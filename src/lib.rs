use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod request;
pub mod resp_value;
pub mod response;
pub mod server;
pub mod snapshot;
pub mod storage;
pub mod store;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, Parameter, StoreConfig};
pub use error::{StorageError, StorageResult};
pub use events::{Callback, EventBus, Subscription};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::{Change, RevealStore, RevealedEntry, StoreEvent, StoreStats};

/// Lock a mutex, taking the data even if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
