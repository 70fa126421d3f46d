//! Queue protocol against a live database: at-most-once delivery under
//! concurrent receivers, expiry, poison isolation, peek and purge.

mod common;

use common::*;
use sqlbus_core::dispatch::{DeliveryConstraints, TransactionContext, UnicastTransportOperation};
use sqlbus_core::queue::TableBasedQueue;
use sqlbus_core::{OutgoingMessage, ReceiveResult, TransportError, TransportInfrastructure};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

async fn send(
    transport: &sqlbus_core::TransportInfrastructure,
    message: OutgoingMessage,
    constraints: DeliveryConstraints,
) {
    let destination = transport.input_queue().unwrap().address().to_string();
    transport
        .dispatcher()
        .dispatch(
            UnicastTransportOperation::new(message, destination)
                .with_constraints(constraints)
                .into(),
            TransactionContext::None,
            &CancellationToken::new(),
        )
        .await
        .expect("Failed to send");
}

#[tokio::test]
async fn test_concurrent_receivers_never_share_a_row() {
    let Some(url) = database_url() else { return };
    let transport = transport(&url, &unique_name("concurrent")).await;

    const MESSAGES: usize = 40;
    const RECEIVERS: usize = 4;
    let mut sent = HashSet::new();
    for i in 0..MESSAGES {
        let message = OutgoingMessage::with_body(format!("m{i}").into_bytes());
        sent.insert(message.message_id);
        send(&transport, message, DeliveryConstraints::none()).await;
    }

    let handler = Arc::new(RecordingHandler::default());
    let receiver = Arc::clone(transport.receiver().unwrap());
    let mut tasks = Vec::new();
    for _ in 0..RECEIVERS {
        let receiver = Arc::clone(&receiver);
        let handler = Arc::clone(&handler);
        tasks.push(tokio::spawn(async move {
            let token = CancellationToken::new();
            loop {
                match receiver.receive_once(handler.as_ref(), &token).await {
                    Ok(ReceiveResult::Empty) => break,
                    Ok(_) => {}
                    Err(e) => panic!("receive failed: {e}"),
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let received: Vec<Uuid> = handler.received().iter().map(|m| m.message_id).collect();
    let distinct: HashSet<Uuid> = received.iter().copied().collect();
    assert_eq!(received.len(), MESSAGES, "no message delivered twice");
    assert_eq!(distinct, sent);
    assert_eq!(count_rows(&transport, transport.input_queue().unwrap()).await, 0);

    teardown(&transport).await;
}

#[tokio::test]
async fn test_empty_queue_receives_nothing() {
    let Some(url) = database_url() else { return };
    let transport = transport(&url, &unique_name("empty")).await;
    let handler = RecordingHandler::default();

    let result = transport
        .receiver()
        .unwrap()
        .receive_once(&handler, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result, ReceiveResult::Empty);

    teardown(&transport).await;
}

#[tokio::test]
async fn test_expired_message_is_never_delivered() {
    let Some(url) = database_url() else { return };
    let transport = transport(&url, &unique_name("expiry")).await;

    send(
        &transport,
        OutgoingMessage::with_body(b"short-lived".to_vec()),
        DeliveryConstraints::expiring_after(Duration::from_millis(200)),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let handler = RecordingHandler::default();
    let result = transport
        .receiver()
        .unwrap()
        .receive_once(&handler, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result, ReceiveResult::Empty);
    assert!(handler.received().is_empty());
    assert_eq!(
        count_rows(&transport, transport.input_queue().unwrap()).await,
        0,
        "expired row was consumed silently"
    );

    teardown(&transport).await;
}

#[tokio::test]
async fn test_purge_expired_leaves_live_rows() {
    let Some(url) = database_url() else { return };
    let transport = transport(&url, &unique_name("purge")).await;

    send(
        &transport,
        OutgoingMessage::with_body(b"expiring".to_vec()),
        DeliveryConstraints::expiring_after(Duration::from_millis(100)),
    )
    .await;
    send(
        &transport,
        OutgoingMessage::with_body(b"durable".to_vec()),
        DeliveryConstraints::none(),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let receiver = transport.receiver().unwrap();
    let token = CancellationToken::new();
    assert_eq!(receiver.purge_expired_messages(&token).await.unwrap(), 1);
    assert_eq!(receiver.peek(&token).await.unwrap(), 1);
    assert_eq!(receiver.purge(&token).await.unwrap(), 1);
    assert_eq!(receiver.peek(&token).await.unwrap(), 0);

    teardown(&transport).await;
}

/// Row whose headers are not valid JSON
async fn insert_unparseable_row(transport: &TransportInfrastructure, row_id: Uuid) {
    let mut conn = transport
        .connection_factory()
        .open_connection(&CancellationToken::new())
        .await
        .unwrap();
    sqlx::query(&format!(
        "INSERT INTO {} (id, recoverable, headers, body) VALUES ($1, TRUE, $2, NULL)",
        transport.input_queue().unwrap().qualified_table_name()
    ))
    .bind(row_id)
    .bind("{\"truncated\": ")
    .execute(&mut *conn)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_poison_row_is_moved_to_error_queue() {
    let Some(url) = database_url() else { return };
    let transport = transport(&url, &unique_name("poison")).await;
    let input = transport.input_queue().unwrap().clone();
    let row_id = Uuid::new_v4();
    insert_unparseable_row(&transport, row_id).await;

    let handler = RecordingHandler::default();
    let result = transport
        .receiver()
        .unwrap()
        .receive_once(&handler, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        result,
        ReceiveResult::PoisonForwarded { row_id: id, .. } if id == row_id
    ));
    assert!(handler.received().is_empty());
    assert_eq!(count_rows(&transport, &input).await, 0);
    assert_eq!(count_rows(&transport, transport.error_queue()).await, 1);

    teardown(&transport).await;
}

#[tokio::test]
async fn test_poison_row_stays_when_error_queue_is_missing() {
    let Some(url) = database_url() else { return };
    let transport = transport(&url, &unique_name("poison_stuck")).await;
    let input = transport.input_queue().unwrap().clone();
    let row_id = Uuid::new_v4();
    insert_unparseable_row(&transport, row_id).await;
    drop_tables(&transport, &[transport.error_queue().clone()]).await;

    let error = transport
        .receiver()
        .unwrap()
        .receive_once(&RecordingHandler::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    match error {
        TransportError::PoisonMessage { message_id, .. } => {
            assert_eq!(message_id, row_id.to_string())
        }
        other => panic!("expected poison message error, got {other}"),
    }
    assert_eq!(count_rows(&transport, &input).await, 1, "row rolled back");

    teardown(&transport).await;
}

#[tokio::test]
async fn test_cancelled_receive_commits_nothing() {
    let Some(url) = database_url() else { return };
    let transport = transport(&url, &unique_name("cancel")).await;
    send(
        &transport,
        OutgoingMessage::with_body(b"keep".to_vec()),
        DeliveryConstraints::none(),
    )
    .await;

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let handler = RecordingHandler::default();
    let error = transport
        .receiver()
        .unwrap()
        .receive_once(&handler, &cancelled)
        .await
        .unwrap_err();
    assert!(error.is_cancelled());
    assert_eq!(count_rows(&transport, transport.input_queue().unwrap()).await, 1);

    teardown(&transport).await;
}

#[tokio::test]
async fn test_peek_does_not_hide_rows_from_receivers() {
    let Some(url) = database_url() else { return };
    let transport = transport(&url, &unique_name("peek_lock")).await;
    let input = transport.input_queue().unwrap().clone();
    let token = CancellationToken::new();
    send(
        &transport,
        OutgoingMessage::with_body(b"waiting".to_vec()),
        DeliveryConstraints::none(),
    )
    .await;

    let queue = transport.queues().get(&input);
    let mut peeking = transport.connection_factory().begin(&token).await.unwrap();
    assert_eq!(queue.peek(&mut *peeking).await.unwrap(), 1);

    // The peek transaction is still open while the receive runs
    let result = transport
        .receiver()
        .unwrap()
        .receive_once(&RecordingHandler::default(), &token)
        .await
        .unwrap();
    assert!(matches!(result, ReceiveResult::Processed { .. }), "{result:?}");

    peeking.rollback().await.unwrap();
    teardown(&transport).await;
}

#[tokio::test]
async fn test_concurrent_table_creation_creates_once() {
    let Some(url) = database_url() else { return };
    let transport = transport(&url, &unique_name("create")).await;
    let token = CancellationToken::new();
    let address = transport
        .translator()
        .translate_physical(&unique_name("fresh"))
        .unwrap();
    let queue = Arc::new(TableBasedQueue::new(address.clone()));

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let queue = Arc::clone(&queue);
        let factory = Arc::clone(transport.connection_factory());
        let token = token.clone();
        tasks.push(tokio::spawn(async move {
            let mut conn = factory.open_connection(&token).await?;
            queue.create_if_necessary(&mut conn).await
        }));
    }

    let mut created = 0;
    for task in tasks {
        if task.await.unwrap().expect("creation failed") {
            created += 1;
        }
    }
    assert_eq!(created, 1, "exactly one caller creates the table");
    assert_eq!(count_rows(&transport, &address).await, 0);

    // Creating an endpoint's queues again changes nothing
    transport.create_queues(&token).await.unwrap();
    let mut conn = transport.connection_factory().open_connection(&token).await.unwrap();
    assert!(!queue.create_if_necessary(&mut conn).await.unwrap());
    drop(conn);

    drop_tables(&transport, &[address]).await;
    teardown(&transport).await;
}

