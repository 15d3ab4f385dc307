//! Reading channel tests over real Unix sockets

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::time::Duration;

use mb_comlink::{
    decode, ComLinkError, DecodedValue, IntSignedness, RawRegisterGroup, ReadingEvent,
    ReadingListener, ReadingProducer, ReadingSink, RegisterValue, ValueKind,
};
use tokio_util::sync::CancellationToken;

fn event(remote: Option<&str>, address: u16, value: RegisterValue) -> ReadingEvent {
    ReadingEvent {
        remote: remote.map(str::to_string),
        values: vec![DecodedValue { address, value }],
    }
}

#[tokio::test]
async fn events_arrive_in_order_and_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mbsocket");
    let listener = ReadingListener::bind(&path).unwrap();

    let mut producer = ReadingProducer::connect(&path).await.unwrap();
    let mut consumer = listener.accept().await.unwrap();

    let sent = vec![
        event(Some("hello"), 0, RegisterValue::Float(12345.6)),
        event(Some("hello"), 2, RegisterValue::Float(789.0)),
        event(None, 4, RegisterValue::Int(3)),
    ];
    for e in &sent {
        producer.emit(e.clone()).await.unwrap();
    }
    drop(producer);

    let mut received = Vec::new();
    while let Some(e) = consumer.next_event().await.unwrap() {
        received.push(e);
    }
    assert_eq!(received, sent);
}

#[tokio::test]
async fn bind_clears_stale_path_and_drop_unlinks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mbsocket");
    std::fs::write(&path, b"stale").unwrap();

    let listener = ReadingListener::bind(&path).unwrap();
    assert!(path.exists());
    assert_eq!(listener.path(), path.as_path());

    drop(listener);
    assert!(!path.exists());
}

#[tokio::test]
async fn producer_waits_for_late_recorder() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mbsocket");
    let token = CancellationToken::new();

    let bind_path = path.clone();
    let recorder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let listener = ReadingListener::bind(&bind_path).unwrap();
        let mut consumer = listener.accept().await.unwrap();
        consumer.next_event().await.unwrap()
    });

    let mut producer = ReadingProducer::connect_with_wait(&path, Duration::from_secs(5), &token)
        .await
        .unwrap();
    let sent = event(None, 1, RegisterValue::Int(5678));
    producer.send(&sent).await.unwrap();

    assert_eq!(recorder.await.unwrap(), Some(sent));
}

#[tokio::test]
async fn producer_gives_up_without_recorder() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing");
    let token = CancellationToken::new();

    let err = ReadingProducer::connect_with_wait(&path, Duration::from_millis(200), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, ComLinkError::Channel(_)));
}

#[tokio::test]
async fn producer_wait_is_cancellable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing");
    let token = CancellationToken::new();
    token.cancel();

    let err = ReadingProducer::connect_with_wait(&path, Duration::from_secs(30), &token)
        .await
        .unwrap_err();
    assert_eq!(err, ComLinkError::Cancelled);
}

#[tokio::test]
async fn mpsc_sender_is_a_sink() {
    let (mut tx, mut rx) = tokio::sync::mpsc::channel(4);
    let sent = event(Some("hello"), 4, RegisterValue::Int(1));
    tx.emit(sent.clone()).await.unwrap();
    assert_eq!(rx.recv().await, Some(sent));

    drop(rx);
    assert!(tx.emit(event(None, 0, RegisterValue::Int(0))).await.is_err());
}

#[tokio::test]
async fn non_finite_floats_cross_the_channel() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mbsocket");
    let listener = ReadingListener::bind(&path).unwrap();

    let mut producer = ReadingProducer::connect(&path).await.unwrap();
    let mut consumer = listener.accept().await.unwrap();

    // 0xFFFF 0xFFFF is what an unwritten or faulted float register pair often reads as
    let nan = decode(
        &RawRegisterGroup::new(0, vec![0xFFFF, 0xFFFF]),
        ValueKind::FloatWordsMsb,
        IntSignedness::Unsigned,
    )
    .unwrap();
    let sent = [
        ReadingEvent::master("hello", nan),
        event(Some("hello"), 2, RegisterValue::Float(f32::INFINITY)),
        event(Some("hello"), 4, RegisterValue::Float(f32::NEG_INFINITY)),
    ];
    for e in &sent {
        producer.send(e).await.unwrap();
    }
    // The channel stays usable afterwards
    producer
        .send(&event(None, 6, RegisterValue::Int(1)))
        .await
        .unwrap();

    let bits: Vec<u32> = [
        consumer.next_event().await.unwrap().unwrap(),
        consumer.next_event().await.unwrap().unwrap(),
        consumer.next_event().await.unwrap().unwrap(),
    ]
    .iter()
    .map(|e| match e.values[0].value {
        RegisterValue::Float(f) => f.to_bits(),
        RegisterValue::Int(_) => panic!("expected a float"),
    })
    .collect();
    assert_eq!(
        bits,
        vec![0xFFFF_FFFF, f32::INFINITY.to_bits(), f32::NEG_INFINITY.to_bits()]
    );

    let last = consumer.next_event().await.unwrap().unwrap();
    assert_eq!(last.values[0].value, RegisterValue::Int(1));
}
