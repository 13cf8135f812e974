use std::{sync::Arc, time::Duration};

use revealcache::{EventBus, ManualClock, MemoryStorage, RevealStore, StoreConfig};

const T0: u64 = 1_700_000_000_000;

fn test_store(clock: &ManualClock) -> RevealStore {
    RevealStore::with_parts(
        Arc::new(MemoryStorage::new()),
        StoreConfig::default(),
        Arc::new(clock.clone()),
        EventBus::new(),
    )
}

#[tokio::test(start_paused = true)]
async fn sweeper_removes_expired_entries_each_interval() {
    let clock = ManualClock::new(T0);
    let store = test_store(&clock);
    store.reveal(1);
    store.start_sweeper().unwrap();
    // A second start keeps the running sweeper.
    store.start_sweeper().unwrap();

    clock.advance(Duration::from_secs(61));
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(store.stats().total, 1);

    // The sweep runs on the blocking pool; give it a few turns to land.
    tokio::time::sleep(Duration::from_secs(2)).await;
    for _ in 0..10 {
        if store.stats().total == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.stats().total, 0);

    store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_sweeping() {
    let clock = ManualClock::new(T0);
    let store = test_store(&clock);
    store.reveal(1);
    store.start_sweeper().unwrap();
    store.shutdown().await;

    clock.advance(Duration::from_secs(61));
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(store.stats().total, 1);
    assert_eq!(store.stats().expired, 1);
}

#[test]
fn sweeper_needs_a_runtime() {
    let clock = ManualClock::new(T0);
    let store = test_store(&clock);
    assert!(store.start_sweeper().is_err());
}
