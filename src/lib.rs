#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # SqlBus Core
//!
//! A message-queue transport built entirely on PostgreSQL tables.
//!
//! ## Overview
//!
//! Every queue is a table, every send is an insert and every receive is an
//! atomic locked delete. Broker features are plain transactional SQL:
//!
//! - **Addressing**: `table@[schema]@[catalog]` wire form, resolved through
//!   per-queue overrides and defaults into a fully-qualified table
//! - **Queue protocol**: `FOR UPDATE SKIP LOCKED` receives that never deliver
//!   a row twice, write-time expiry and poison-row isolation
//! - **Dispatch**: consistency-aware transaction binding and deduplication of
//!   outgoing operations
//! - **Delayed delivery**: a scheduling table matured into the input queue by a
//!   background loop
//! - **Publish/subscribe**: a routing table queried across a message type's
//!   whole topic hierarchy, with a cancellation-safe cache
//!
//! ## Module Organization
//!
//! - [`addressing`] - Queue address parsing, quoting and resolution
//! - [`queue`] - Table-based queue protocol
//! - [`dispatch`] - Outbound dispatch engine
//! - [`delayed`] - Delayed delivery store, maturation and forwarding
//! - [`pubsub`] - Subscription storage and topic hierarchies
//! - [`receiving`] - Transactional receive-and-process cycle
//! - [`infrastructure`] - Composition root
//! - [`database`] - Connection factory and cancellation
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sqlbus_core::config::TransportConfig;
//! use sqlbus_core::dispatch::{TransactionContext, UnicastTransportOperation};
//! use sqlbus_core::pubsub::MessageTypeRegistry;
//! use sqlbus_core::queue::OutgoingMessage;
//! use sqlbus_core::TransportInfrastructure;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransportConfig::for_test("postgresql://localhost/sqlbus", "orders");
//! let transport = TransportInfrastructure::initialize(config, MessageTypeRegistry::default()).await?;
//! let cancellation = CancellationToken::new();
//! transport.create_queues(&cancellation).await?;
//!
//! let message = OutgoingMessage::with_body(b"hello".to_vec());
//! transport
//!     .dispatcher()
//!     .dispatch(
//!         UnicastTransportOperation::new(message, "billing@[public]").into(),
//!         TransactionContext::None,
//!         &cancellation,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib                                        # Unit tests
//! DATABASE_URL=postgresql://localhost/sqlbus_test cargo test  # With integration tests
//! ```

pub mod addressing;
pub mod config;
pub mod constants;
pub mod database;
pub mod delayed;
pub mod dispatch;
pub mod error;
pub mod infrastructure;
pub mod logging;
pub mod pubsub;
pub mod queue;
pub mod receiving;

pub use addressing::{CanonicalQueueAddress, QueueAddress, QueueAddressTranslator};
pub use config::{ConfigLoader, TransportConfig};
pub use dispatch::{
    DispatchConsistency, MessageDispatcher, TransactionContext, TransportOperations,
};
pub use error::{TransportError, TransportResult};
pub use infrastructure::TransportInfrastructure;
pub use queue::{IncomingMessage, OutgoingMessage};
pub use receiving::{MessageHandler, MessageReceiver, ReceiveResult};
