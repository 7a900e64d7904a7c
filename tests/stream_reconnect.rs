//! Reconnect behaviour of the stream client against a scripted transport
//!
//! All tests run on paused tokio time, so backoff delays are observed exactly
//! and without waiting.

mod common;

use common::{FakeTransport, Script};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use straddle_tracker::feed::TransportEvent;
use straddle_tracker::{FeedStatus, LtpTick, PriceCache, ReconnectPolicy, StreamClient};

fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().map(|s| Duration::from_secs(*s)).collect()
}

fn client(transport: &FakeTransport) -> StreamClient {
    StreamClient::new(Arc::new(transport.clone()), ReconnectPolicy::default())
}

fn tick(token: u32) -> TransportEvent {
    TransportEvent::Ticks(vec![LtpTick {
        token,
        last_price: dec!(101.5),
        exchange_time: None,
    }])
}

async fn wait_for_status(client: &StreamClient, wanted: impl Fn(&FeedStatus) -> bool) {
    let mut status = client.subscribe_status();
    timeout(Duration::from_secs(3600), async {
        loop {
            if wanted(&status.borrow_and_update()) {
                break;
            }
            status.changed().await.unwrap();
        }
    })
    .await
    .expect("status never reached");
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_backoff_doubles_up_to_cap_then_gives_up() {
    let transport = FakeTransport::refusing();
    let mut client = client(&transport);

    client.start(vec![11, 12], Arc::new(PriceCache::new())).unwrap();
    wait_for_status(&client, FeedStatus::is_exhausted).await;

    // One initial attempt plus ten reconnects.
    assert_eq!(transport.connect_count(), 11);
    assert_eq!(
        transport.connect_gaps(),
        secs(&[1, 2, 4, 8, 16, 30, 30, 30, 30, 30])
    );
    assert_eq!(client.status(), FeedStatus::Exhausted { attempts: 10 });

    // Gave up for good.
    sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.connect_count(), 11);
    client.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_message_resets_backoff() {
    let transport = FakeTransport::accepting();
    transport
        .push(Script::Refuse)
        .push(Script::Refuse)
        .push(Script::AcceptThenDrop(vec![tick(11)]));
    let cache = Arc::new(PriceCache::new());
    let mut client = client(&transport);

    client.start(vec![11, 12], cache.clone()).unwrap();
    transport.wait_for_connects(4).await;

    // 1s and 2s for the refusals; the tick resets the count so the drop
    // after it waits 1s again.
    assert_eq!(transport.connect_gaps(), secs(&[1, 2, 1]));
    assert_eq!(cache.read(11).map(|e| e.price), Some(dec!(101.5)));

    wait_for_status(&client, |s| *s == FeedStatus::Connected).await;
    assert_eq!(client.reconnect_attempts(), 0);

    client.stop();
    client.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_counts_as_activity() {
    let transport = FakeTransport::accepting();
    transport
        .push(Script::Refuse)
        .push(Script::Refuse)
        .push(Script::Refuse)
        .push(Script::AcceptThenDrop(vec![TransportEvent::Heartbeat]));
    let mut client = client(&transport);

    client.start(vec![11, 12], Arc::new(PriceCache::new())).unwrap();
    transport.wait_for_connects(5).await;

    assert_eq!(transport.connect_gaps(), secs(&[1, 2, 4, 1]));
    client.stop();
    client.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_never_reconnects() {
    let transport = FakeTransport::accepting();
    let mut client = client(&transport);

    client.start(vec![11, 12], Arc::new(PriceCache::new())).unwrap();
    transport.wait_for_connects(1).await;

    client.stop();
    client.stop();
    client.join().await;

    sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(transport.close_count(), 1);
    assert_eq!(client.status(), FeedStatus::Stopped);
    assert!(!client.is_running());

    // Still harmless after the task is gone.
    client.stop();
}

#[tokio::test(start_paused = true)]
async fn test_rebind_during_backoff_uses_new_instruments() {
    let transport = FakeTransport::accepting();
    transport.push(Script::Refuse);
    let mut client = client(&transport);

    client.start(vec![11, 12], Arc::new(PriceCache::new())).unwrap();
    wait_for_status(&client, |s| matches!(s, FeedStatus::Reconnecting { .. })).await;

    client.rebind(vec![21, 22]);
    transport.wait_for_connects(2).await;

    let connects = transport.connects();
    assert_eq!(connects[0].instruments, vec![11, 12]);
    assert_eq!(connects[1].instruments, vec![21, 22]);
    // The pending 1s backoff was cut short.
    assert!(connects[1].at - connects[0].at < Duration::from_secs(1));

    client.stop();
    client.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_rebind_while_connected_resubscribes() {
    let transport = FakeTransport::accepting();
    let mut client = client(&transport);

    client.start(vec![11, 12], Arc::new(PriceCache::new())).unwrap();
    wait_for_status(&client, |s| *s == FeedStatus::Connected).await;

    client.rebind(vec![21, 22]);
    transport.wait_for_connects(2).await;

    assert_eq!(transport.connects()[1].instruments, vec![21, 22]);
    assert_eq!(transport.close_count(), 1);
    assert_eq!(client.reconnect_attempts(), 0);
    assert_eq!(*client.instruments(), vec![21, 22]);

    client.stop();
    client.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_ticks_reach_the_sink() {
    let transport = FakeTransport::accepting();
    let cache = Arc::new(PriceCache::new());
    let mut client = client(&transport);

    client.start(vec![11, 12], cache.clone()).unwrap();
    wait_for_status(&client, |s| *s == FeedStatus::Connected).await;

    assert!(transport.send(tick(12)));
    timeout(Duration::from_secs(5), async {
        while cache.read(12).is_none() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(cache.read(12).unwrap().price, dec!(101.5));

    client.stop();
    client.join().await;
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let transport = FakeTransport::accepting();
    let mut client = client(&transport);

    client.start(vec![11], Arc::new(PriceCache::new())).unwrap();
    assert!(client.start(vec![11], Arc::new(PriceCache::new())).is_err());

    client.stop();
    client.join().await;
}
