//! Delayed delivery end to end: schedule, mature, intercept.

mod common;

use common::*;
use sqlbus_core::constants::headers;
use sqlbus_core::dispatch::{DeliveryConstraints, TransactionContext, UnicastTransportOperation};
use sqlbus_core::{OutgoingMessage, ReceiveResult};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_delayed_message_arrives_after_due_time() {
    let Some(url) = database_url() else { return };
    let transport = transport(&url, &unique_name("delayed")).await;
    let input = transport.input_queue().unwrap().clone();
    let shutdown = CancellationToken::new();
    let background = transport
        .start_background_services(&shutdown)
        .await
        .unwrap();

    let message = OutgoingMessage::with_body(b"m1".to_vec()).with_header("app", "value");
    let message_id = message.message_id;
    transport
        .dispatcher()
        .dispatch(
            UnicastTransportOperation::new(message, input.address())
                .with_constraints(DeliveryConstraints::delayed_by(Duration::from_secs(2)))
                .into(),
            TransactionContext::None,
            &shutdown,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(count_rows(&transport, &input).await, 0, "not yet due");

    tokio::time::sleep(Duration::from_secs(2)).await;
    let handler = RecordingHandler::default();
    let result = transport
        .receiver()
        .unwrap()
        .receive_once(&handler, &shutdown)
        .await
        .unwrap();
    assert_eq!(result, ReceiveResult::Processed { message_id });

    let received = handler.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, b"m1");
    assert_eq!(received[0].header("app"), Some("value"));
    assert_eq!(received[0].header(headers::FORWARD_DESTINATION), None);

    shutdown.cancel();
    for handle in background {
        handle.await.unwrap();
    }
    teardown(&transport).await;
}

#[tokio::test]
async fn test_matured_message_for_other_queue_is_forwarded() {
    let Some(url) = database_url() else { return };
    let sender = transport(&url, &unique_name("scheduler")).await;
    let target = transport(&url, &unique_name("target")).await;
    let target_input = target.input_queue().unwrap().clone();
    let token = CancellationToken::new();

    sender
        .dispatcher()
        .dispatch(
            UnicastTransportOperation::new(
                OutgoingMessage::with_body(b"for target".to_vec()),
                target_input.address(),
            )
            .with_constraints(DeliveryConstraints::not_before(chrono::Utc::now()))
            .into(),
            TransactionContext::None,
            &token,
        )
        .await
        .unwrap();

    let processor = Arc::clone(sender.maturation().unwrap());
    assert_eq!(processor.drain(&token).await.unwrap(), 1);
    assert_eq!(processor.stats().messages_moved(), 1);

    let handler = RecordingHandler::default();
    let result = sender
        .receiver()
        .unwrap()
        .receive_once(&handler, &token)
        .await
        .unwrap();
    assert!(matches!(result, ReceiveResult::Forwarded { ref destination, .. }
        if destination == target_input.address()));
    assert!(handler.received().is_empty(), "forwarded without processing");

    let result = target
        .receiver()
        .unwrap()
        .receive_once(&handler, &token)
        .await
        .unwrap();
    assert!(matches!(result, ReceiveResult::Processed { .. }));
    assert_eq!(handler.received()[0].header(headers::FORWARD_DESTINATION), None);

    teardown(&sender).await;
    teardown(&target).await;
}

#[tokio::test]
async fn test_maturation_preserves_due_order() {
    let Some(url) = database_url() else { return };
    let transport = transport(&url, &unique_name("order")).await;
    let input = transport.input_queue().unwrap().clone();
    let token = CancellationToken::new();
    let now = chrono::Utc::now();

    let later = OutgoingMessage::with_body(b"later".to_vec());
    let sooner = OutgoingMessage::with_body(b"sooner".to_vec());
    for (message, offset) in [(later.clone(), 2), (sooner.clone(), 1)] {
        transport
            .dispatcher()
            .dispatch(
                UnicastTransportOperation::new(message, input.address())
                    .with_constraints(DeliveryConstraints::not_before(
                        now - chrono::Duration::seconds(10 - offset),
                    ))
                    .into(),
                TransactionContext::None,
                &token,
            )
            .await
            .unwrap();
    }

    transport.maturation().unwrap().drain(&token).await.unwrap();

    let handler = RecordingHandler::default();
    let receiver = transport.receiver().unwrap();
    receiver.receive_once(&handler, &token).await.unwrap();
    receiver.receive_once(&handler, &token).await.unwrap();
    let ids: Vec<_> = handler.received().iter().map(|m| m.message_id).collect();
    assert_eq!(ids, vec![sooner.message_id, later.message_id]);

    teardown(&transport).await;
}
