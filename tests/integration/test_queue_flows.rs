use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use redis::AsyncCommands;
use relayq::infrastructure::keys::KeySpace;
use relayq::{JobState, RedisQueue, WaitError};

use crate::helpers::{
    self, Parcel, RecordingHandler, handler, reaches_state, test_config, unique_queue,
};

#[tokio::test]
async fn pushed_document_is_processed_to_done() {
    let Some(client) = helpers::connect().await else {
        return helpers::skip_notice("pushed_document_is_processed_to_done");
    };
    let name = unique_queue("roundtrip");
    let handler = handler();
    let queue: RedisQueue<Parcel> = RedisQueue::new(test_config(&name), client, handler.clone()).unwrap();
    queue.start().await;

    queue.push(Parcel::new("A")).await.unwrap();
    let wait = queue
        .wait_for_states(&[JobState::Done, JobState::Failed], "A")
        .await
        .unwrap();
    wait.wait(Duration::from_secs(5)).await.unwrap();

    let state = queue.get_state("A").await.unwrap().unwrap();
    assert_eq!(state.state, JobState::Done);
    assert_eq!(queue.processing_len().await.unwrap(), 0);
    assert_eq!(queue.ready_len().await.unwrap(), 0);
    assert_eq!(handler.seen.lock().await.as_slice(), ["A"]);

    queue.close().await;
}

#[tokio::test]
async fn failing_handler_records_failed_with_detail() {
    let Some(client) = helpers::connect().await else {
        return helpers::skip_notice("failing_handler_records_failed_with_detail");
    };
    let name = unique_queue("failure");
    let handler = Arc::new(RecordingHandler::failing("boom"));
    let queue: RedisQueue<Parcel> = RedisQueue::new(test_config(&name), client, handler).unwrap();
    queue.start().await;

    queue
        .push_and_wait(Parcel::new("B"), Duration::from_secs(5))
        .await
        .unwrap();

    let state = queue.get_state("B").await.unwrap().unwrap();
    assert_eq!(state.state, JobState::Failed);
    assert!(state.info.contains("boom"));
    assert_eq!(queue.processing_len().await.unwrap(), 0);

    queue.close().await;
}

#[tokio::test]
async fn push_and_wait_survives_an_instant_handler() {
    let Some(client) = helpers::connect().await else {
        return helpers::skip_notice("push_and_wait_survives_an_instant_handler");
    };
    let name = unique_queue("race");
    let queue: RedisQueue<Parcel> = RedisQueue::new(test_config(&name), client, handler()).unwrap();
    queue.start().await;

    // The wait is registered before the push, so even a completion faster
    // than the subscription round-trip cannot be missed.
    queue
        .push_and_wait(Parcel::new("E"), Duration::from_secs(10))
        .await
        .unwrap();
    let state = queue.get_state("E").await.unwrap().unwrap();
    assert_eq!(state.state, JobState::Done);

    queue.close().await;
}

#[tokio::test]
async fn abandoned_processing_entry_is_requeued_and_completed() {
    let Some(client) = helpers::connect().await else {
        return helpers::skip_notice("abandoned_processing_entry_is_requeued_and_completed");
    };
    let name = unique_queue("rescue");
    let handler = handler();
    let queue: RedisQueue<Parcel> =
        RedisQueue::new(test_config(&name), client.clone(), handler.clone()).unwrap();
    let keys = KeySpace::new(&name);

    // Enqueue, then fake a consumer that claimed the document and died:
    // entry on the processing list, state PROCESSING, lock gone.
    queue.push(Parcel::new("B")).await.unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let moved: Option<String> = redis::cmd("RPOPLPUSH")
        .arg(keys.ready())
        .arg(keys.processing())
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(moved.as_deref(), Some("B"));
    queue
        .set_state("B", JobState::Processing, "")
        .await
        .unwrap();
    conn.del::<_, ()>(keys.lock("B")).await.unwrap();

    let wait = queue
        .wait_for_states(&[JobState::Done], "B")
        .await
        .unwrap();
    queue.start().await;

    wait.wait(Duration::from_secs(10)).await.unwrap();
    assert_eq!(handler.seen.lock().await.as_slice(), ["B"]);
    assert_eq!(queue.processing_len().await.unwrap(), 0);

    queue.close().await;
}

#[tokio::test]
async fn stale_document_is_claimed_but_never_dispatched() {
    let Some(client) = helpers::connect().await else {
        return helpers::skip_notice("stale_document_is_claimed_but_never_dispatched");
    };
    let name = unique_queue("discard");
    let mut config = test_config(&name);
    config.discard_after = Duration::from_millis(50);
    let handler = handler();
    let queue: RedisQueue<Parcel> = RedisQueue::new(config, client, handler.clone()).unwrap();

    queue.push(Parcel::new("C")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    queue.start().await;

    // The consumer claims the document and records PROCESSING, but skips the
    // handler; the entry stays on the processing list for the sweep.
    assert!(reaches_state(&queue, "C", JobState::Processing, Duration::from_secs(3)).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(handler.seen.lock().await.is_empty());
    let state = queue.get_state("C").await.unwrap().unwrap();
    assert_eq!(state.state, JobState::Processing);

    queue.close().await;
}

#[tokio::test]
async fn sweep_releases_waiters_on_unacknowledged_terminal_entries() {
    let Some(client) = helpers::connect().await else {
        return helpers::skip_notice("sweep_releases_waiters_on_unacknowledged_terminal_entries");
    };
    let name = unique_queue("stop");
    let queue: RedisQueue<Parcel> = RedisQueue::new(test_config(&name), client.clone(), handler()).unwrap();
    let keys = KeySpace::new(&name);

    // A document that finished but whose consumer never removed it from the
    // processing list, and whose lock is long gone.
    queue.set_state("D", JobState::Done, "").await.unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    conn.lpush::<_, _, ()>(keys.processing(), "D").await.unwrap();

    let wait = queue
        .wait_for_states(&[JobState::Failed], "D")
        .await
        .unwrap();
    queue.start().await;

    let err = wait.wait(Duration::from_secs(10)).await.unwrap_err();
    assert!(matches!(err, WaitError::Stopped), "got {err:?}");
    assert_eq!(queue.processing_len().await.unwrap(), 0);

    queue.close().await;
}

#[tokio::test]
async fn closed_queue_accepts_pushes_but_makes_no_progress() {
    let Some(client) = helpers::connect().await else {
        return helpers::skip_notice("closed_queue_accepts_pushes_but_makes_no_progress");
    };
    let name = unique_queue("closed");
    let handler = handler();
    let queue: RedisQueue<Parcel> = RedisQueue::new(test_config(&name), client, handler.clone()).unwrap();
    queue.start().await;
    queue.close().await;

    queue.push(Parcel::new("F")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let state = queue.get_state("F").await.unwrap().unwrap();
    assert_eq!(state.state, JobState::New);
    assert_eq!(queue.ready_len().await.unwrap(), 1);
    assert!(handler.seen.lock().await.is_empty());
}

#[tokio::test]
async fn get_states_enumerates_every_document_of_the_queue() {
    let Some(client) = helpers::connect().await else {
        return helpers::skip_notice("get_states_enumerates_every_document_of_the_queue");
    };
    let name = unique_queue("enumerate");
    let queue: RedisQueue<Parcel> = RedisQueue::new(test_config(&name), client, handler()).unwrap();

    queue.push(Parcel::new("G1")).await.unwrap();
    queue.push(Parcel::new("G2")).await.unwrap();

    let states: Vec<_> = queue.get_states().await.unwrap().collect().await;
    let mut ids: Vec<String> = states
        .into_iter()
        .flatten()
        .map(|extended| extended.key)
        .collect();
    ids.sort();
    let keys = KeySpace::new(&name);
    assert_eq!(ids, vec![keys.state("G1"), keys.state("G2")]);
}
