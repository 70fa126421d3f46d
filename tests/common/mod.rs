//! Shared helpers for database integration tests.
//!
//! Tests skip themselves when `DATABASE_URL` is not set. Every test gets its
//! own endpoint name, so tables never collide between tests running in
//! parallel.

#![allow(dead_code)]

use async_trait::async_trait;
use sqlbus_core::addressing::CanonicalQueueAddress;
use sqlbus_core::config::TransportConfig;
use sqlbus_core::pubsub::MessageTypeRegistry;
use sqlbus_core::{
    IncomingMessage, MessageHandler, TransactionContext, TransportInfrastructure, TransportResult,
};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub fn database_url() -> Option<String> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            println!("Skipping database test - no DATABASE_URL provided");
            None
        }
    }
}

pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}_{}", &Uuid::new_v4().simple().to_string()[..8])
}

pub fn test_config(database_url: &str, endpoint: &str) -> TransportConfig {
    let mut config = TransportConfig::for_test(database_url, endpoint);
    config.endpoint.error_queue = format!("{endpoint}_error");
    config.subscriptions.table_name = format!("{endpoint}_subscriptions");
    config
}

/// Transport with all of its tables created
pub async fn transport_with(
    config: TransportConfig,
    registry: MessageTypeRegistry,
) -> TransportInfrastructure {
    let transport = TransportInfrastructure::initialize(config, registry)
        .await
        .expect("Failed to initialize transport");
    transport
        .create_queues(&CancellationToken::new())
        .await
        .expect("Failed to create queues");
    transport
}

pub async fn transport(database_url: &str, endpoint: &str) -> TransportInfrastructure {
    transport_with(
        test_config(database_url, endpoint),
        MessageTypeRegistry::default(),
    )
    .await
}

pub async fn count_rows(transport: &TransportInfrastructure, table: &CanonicalQueueAddress) -> i64 {
    let mut conn = transport
        .connection_factory()
        .open_connection(&CancellationToken::new())
        .await
        .expect("Failed to open connection");
    sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM {}",
        table.qualified_table_name()
    ))
    .fetch_one(&mut *conn)
    .await
    .expect("Failed to count rows")
}

pub async fn drop_tables(transport: &TransportInfrastructure, tables: &[CanonicalQueueAddress]) {
    let mut conn = transport
        .connection_factory()
        .open_connection(&CancellationToken::new())
        .await
        .expect("Failed to open connection");
    for table in tables {
        sqlx::query(&format!(
            "DROP TABLE IF EXISTS {}",
            table.qualified_table_name()
        ))
        .execute(&mut *conn)
        .await
        .expect("Failed to drop table");
    }
}

/// Drop every table the transport created
pub async fn teardown(transport: &TransportInfrastructure) {
    let mut tables = vec![transport.error_queue().clone()];
    if let Some(input) = transport.input_queue() {
        tables.push(input.clone());
    }
    if let Some(store) = transport.delayed_store() {
        tables.push(store.table().clone());
    }
    let subscriptions = transport.translator().translate_physical(&format!(
        "{}@[{}]",
        transport.config().subscriptions.table_name,
        transport.config().addressing.default_schema
    ));
    if let Ok(subscriptions) = subscriptions {
        tables.push(subscriptions);
    }
    drop_tables(transport, &tables).await;
}

/// Handler recording every message it sees
#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub received: Mutex<Vec<IncomingMessage>>,
}

impl RecordingHandler {
    pub fn received(&self) -> Vec<IncomingMessage> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(
        &self,
        message: IncomingMessage,
        _context: TransactionContext<'_>,
        _cancellation: &CancellationToken,
    ) -> TransportResult<()> {
        self.received.lock().unwrap().push(message);
        Ok(())
    }
}
