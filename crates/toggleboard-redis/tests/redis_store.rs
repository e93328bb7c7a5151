//! Tests against a live Redis server.
//!
//! Skipped unless `TOGGLEBOARD_TEST_REDIS_URL` points at a disposable
//! instance; the tests flush the selected database.

use std::time::Duration;

use toggleboard_core::BoardSettings;
use toggleboard_core::BoardStore;
use toggleboard_core::Bitset;
use toggleboard_core::FeedTopic;
use toggleboard_core::InitialCount;
use toggleboard_core::ToggleEvent;
use toggleboard_core::constants::CHECKBOX_BITSET_KEY;
use toggleboard_core::constants::LAST_CHECKED_KEY;
use toggleboard_redis::RedisBoardStore;

const CELLS: u64 = 128;

fn test_redis_url() -> Option<String> {
    match std::env::var("TOGGLEBOARD_TEST_REDIS_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("skipping: TOGGLEBOARD_TEST_REDIS_URL is not set");
            None
        }
    }
}

async fn fresh_store(threshold_ms: u64) -> Option<RedisBoardStore> {
    let url = test_redis_url()?;
    let client = redis::Client::open(url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    redis::cmd("FLUSHDB").query_async::<_, ()>(&mut conn).await.unwrap();

    let store = RedisBoardStore::connect(&url, None).await.unwrap();
    store
        .initialize(&BoardSettings {
            total_cells: CELLS,
            global_cap: CELLS,
            freeze_threshold_ms: threshold_ms,
            initial_count: InitialCount::Zero,
        })
        .await
        .unwrap();
    Some(store)
}

#[tokio::test]
async fn toggle_updates_bitset_and_counter() {
    let Some(store) = fresh_store(60_000).await else {
        return;
    };

    let on = store.apply_toggle(42, CELLS).await.unwrap();
    assert!(on.bit);
    assert_eq!(on.delta, 1);

    let state = store.board_state().await.unwrap();
    let bits = Bitset::from_bytes(state.bits, CELLS);
    assert!(bits.get(42));
    assert_eq!(state.count, bits.count_ones());

    let off = store.apply_toggle(42, CELLS).await.unwrap();
    assert_eq!(off.delta, -1);
    assert_eq!(store.board_state().await.unwrap().count, 0);
}

#[tokio::test]
async fn zero_threshold_freezes_on_uncheck() {
    let Some(store) = fresh_store(0).await else {
        return;
    };

    store.apply_toggle(7, CELLS).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let outcome = store.apply_toggle(7, CELLS).await.unwrap();
    assert!(outcome.frozen);
    assert!(outcome.bit);

    let state = store.board_state().await.unwrap();
    assert_eq!(state.frozen_count, 1);
    assert!(!store.apply_toggle(7, CELLS).await.unwrap().changed());
}

#[tokio::test]
async fn cap_blocks_toggles() {
    let Some(store) = fresh_store(60_000).await else {
        return;
    };
    store.set_toggle_count(CELLS).await.unwrap();
    assert!(!store.apply_toggle(1, CELLS).await.unwrap().changed());
    assert_eq!(store.reconcile_counters().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn feed_round_trip() {
    let Some(store) = fresh_store(60_000).await else {
        return;
    };
    let mut sub = store.subscribe(FeedTopic::Toggles).await.unwrap();
    let event = ToggleEvent {
        index: 3,
        bit: true,
        timestamp_ms: 99,
    };
    store.publish_toggle(&event).await.unwrap();

    let payload = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
    assert_eq!(payload.as_deref(), Some("[3,1,99]"));
}

#[tokio::test]
async fn epoch_check_is_swept() {
    let Some(store) = fresh_store(1_000).await else {
        return;
    };
    let Some(url) = test_redis_url() else {
        return;
    };
    let client = redis::Client::open(url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    redis::cmd("SETBIT").arg(CHECKBOX_BITSET_KEY).arg(5).arg(1).query_async::<_, ()>(&mut conn).await.unwrap();
    redis::cmd("HSET").arg(LAST_CHECKED_KEY).arg(5).arg(0).query_async::<_, ()>(&mut conn).await.unwrap();

    assert!(!store.freeze_if_stale(5, 0).await.unwrap());
    assert!(store.freeze_if_stale(5, 1).await.unwrap());
    assert_eq!(store.board_state().await.unwrap().frozen_count, 1);
}
