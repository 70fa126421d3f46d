//! # Transport Infrastructure
//!
//! Composition root. Builds every component from a [`TransportConfig`] once at
//! endpoint startup and owns the shared caches, so nothing in the crate relies
//! on process-global state.
//!
//! ```rust,no_run
//! use sqlbus_core::config::ConfigLoader;
//! use sqlbus_core::pubsub::MessageTypeRegistry;
//! use sqlbus_core::TransportInfrastructure;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?;
//! let transport = TransportInfrastructure::initialize(config, MessageTypeRegistry::default()).await?;
//! let shutdown = CancellationToken::new();
//! transport.create_queues(&shutdown).await?;
//! let background = transport.start_background_services(&shutdown).await?;
//! // ... drive transport.receiver() from the message pump ...
//! shutdown.cancel();
//! for handle in background {
//!     handle.await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::addressing::{
    AddressingRules, CanonicalQueueAddress, LogicalAddress, QueueAddress, QueueAddressTranslator,
};
use crate::config::TransportConfig;
use crate::database::{ConnectionFactory, PgConnectionFactory};
use crate::delayed::{DelayedMessageForwarder, DelayedMessageProcessor, DelayedMessageStore};
use crate::dispatch::MessageDispatcher;
use crate::error::{TransportError, TransportResult};
use crate::pubsub::{
    CachedSubscriptionStore, MessageTypeRegistry, PolymorphicSubscriptionStore,
    PostgreSqlSubscriptionStore, SubscriptionStore,
};
use crate::queue::TableBasedQueueCache;
use crate::receiving::MessageReceiver;

pub struct TransportInfrastructure {
    config: TransportConfig,
    connection_factory: Arc<dyn ConnectionFactory>,
    translator: Arc<QueueAddressTranslator>,
    queues: Arc<TableBasedQueueCache>,
    input_queue: Option<CanonicalQueueAddress>,
    error_queue: CanonicalQueueAddress,
    delayed_store: Option<Arc<DelayedMessageStore>>,
    subscription_table: Arc<PostgreSqlSubscriptionStore>,
    subscriptions: Arc<PolymorphicSubscriptionStore>,
    dispatcher: Arc<MessageDispatcher>,
    receiver: Option<Arc<MessageReceiver>>,
    maturation: Option<Arc<DelayedMessageProcessor>>,
}

impl std::fmt::Debug for TransportInfrastructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportInfrastructure")
            .field("endpoint", &self.config.endpoint.name)
            .field("input_queue", &self.input_queue)
            .field("error_queue", &self.error_queue)
            .field("delayed_delivery", &self.delayed_store.is_some())
            .finish_non_exhaustive()
    }
}

impl TransportInfrastructure {
    /// Connect to the database and build the transport
    pub async fn initialize(
        config: TransportConfig,
        registry: MessageTypeRegistry,
    ) -> TransportResult<Self> {
        config.validate()?;

        let factory = PgConnectionFactory::connect(&config.database).await?;
        let default_catalog = match &config.addressing.default_catalog {
            Some(catalog) => catalog.clone(),
            None => factory.current_database().await?,
        };

        Self::with_factory(config, Arc::new(factory), default_catalog, registry)
    }

    /// Build the transport over an existing connection factory
    pub fn with_factory(
        config: TransportConfig,
        connection_factory: Arc<dyn ConnectionFactory>,
        default_catalog: impl Into<String>,
        registry: MessageTypeRegistry,
    ) -> TransportResult<Self> {
        config.validate()?;

        let rules = addressing_rules(&config, default_catalog.into());
        let translator = Arc::new(QueueAddressTranslator::new(rules));
        let queues = Arc::new(TableBasedQueueCache::new());

        let input_queue = if config.endpoint.send_only {
            None
        } else {
            let mut logical = LogicalAddress::new(config.endpoint.name.clone());
            if let Some(discriminator) = &config.endpoint.discriminator {
                logical = logical.with_discriminator(discriminator.clone());
            }
            Some(translator.translate_logical(&logical)?)
        };
        let error_queue = translator.translate_physical(&config.endpoint.error_queue)?;

        let delayed_store = input_queue.as_ref().map(|input| {
            let table = format!("{}.{}", input.table(), config.delayed_delivery.table_suffix);
            Arc::new(DelayedMessageStore::new(input.sibling(table), input.clone()))
        });

        let subscription_table = Arc::new(PostgreSqlSubscriptionStore::new(
            translator.canonicalize(&QueueAddress::new(
                config.subscriptions.table_name.clone(),
                config.subscriptions.schema.clone(),
                None,
            )?),
            Arc::clone(&connection_factory),
        ));
        let subscription_store: Arc<dyn SubscriptionStore> = match config.subscriptions.cache_ttl() {
            Some(ttl) => Arc::new(CachedSubscriptionStore::new(
                subscription_table.clone(),
                ttl,
            )),
            None => subscription_table.clone(),
        };
        let subscriptions = Arc::new(PolymorphicSubscriptionStore::new(
            subscription_store,
            Arc::new(registry),
        ));

        let mut dispatcher = MessageDispatcher::new(
            Arc::clone(&translator),
            Arc::clone(&queues),
            Arc::clone(&connection_factory),
        )
        .with_subscriptions(Arc::clone(&subscriptions));
        if let Some(store) = &delayed_store {
            dispatcher = dispatcher.with_delayed_store(Arc::clone(store));
        }
        let dispatcher = Arc::new(dispatcher);

        let receiver = input_queue.as_ref().map(|input| {
            let forwarder = DelayedMessageForwarder::new(
                input.clone(),
                Arc::clone(&translator),
                Arc::clone(&dispatcher),
            );
            Arc::new(
                MessageReceiver::new(
                    queues.get(input),
                    queues.get(&error_queue),
                    Arc::clone(&connection_factory),
                    config.expiry.purge_batch_size,
                )
                .with_forwarder(Arc::new(forwarder)),
            )
        });

        let maturation = delayed_store.as_ref().map(|store| {
            Arc::new(DelayedMessageProcessor::new(
                Arc::clone(store),
                Arc::clone(&connection_factory),
                config.delayed_delivery.processing_interval(),
                config.delayed_delivery.batch_size,
            ))
        });

        info!(
            endpoint = %config.endpoint.name,
            input_queue = ?input_queue.as_ref().map(CanonicalQueueAddress::address),
            error_queue = %error_queue,
            delayed_delivery = delayed_store.is_some(),
            subscription_table = %subscription_table.table(),
            "Transport infrastructure initialized"
        );

        Ok(Self {
            config,
            connection_factory,
            translator,
            queues,
            input_queue,
            error_queue,
            delayed_store,
            subscription_table,
            subscriptions,
            dispatcher,
            receiver,
            maturation,
        })
    }

    /// Create every table this endpoint uses, idempotently
    pub async fn create_queues(&self, cancellation: &CancellationToken) -> TransportResult<()> {
        let mut conn = self.connection_factory.open_connection(cancellation).await?;

        if let Some(input) = &self.input_queue {
            self.queues.get(input).create_if_necessary(&mut conn).await?;
        }
        self.queues
            .get(&self.error_queue)
            .create_if_necessary(&mut conn)
            .await?;
        if let Some(store) = &self.delayed_store {
            store.create_if_necessary(&mut conn).await?;
        }
        drop(conn);

        self.subscription_table
            .create_if_necessary(cancellation)
            .await?;
        Ok(())
    }

    /// Purge expired rows if configured, then spawn the maturation loop.
    /// Background tasks stop when `cancellation` fires.
    pub async fn start_background_services(
        &self,
        cancellation: &CancellationToken,
    ) -> TransportResult<Vec<JoinHandle<()>>> {
        if self.config.expiry.purge_on_startup {
            if let Some(receiver) = &self.receiver {
                let purged = receiver.purge_expired_messages(cancellation).await?;
                info!(purged, "Purged expired messages on startup");
            }
        }

        let mut handles = Vec::new();
        if let Some(processor) = &self.maturation {
            handles.push(Arc::clone(processor).start(cancellation.child_token()));
        }
        Ok(handles)
    }

    /// Subscribe this endpoint's input queue to `message_type`
    pub async fn subscribe(
        &self,
        message_type: &str,
        cancellation: &CancellationToken,
    ) -> TransportResult<()> {
        let input = self.require_input_queue("subscribe")?;
        self.subscriptions
            .subscribe(
                &self.config.endpoint.name,
                input.address(),
                message_type,
                cancellation,
            )
            .await
    }

    pub async fn unsubscribe(
        &self,
        message_type: &str,
        cancellation: &CancellationToken,
    ) -> TransportResult<()> {
        self.subscriptions
            .unsubscribe(&self.config.endpoint.name, message_type, cancellation)
            .await
    }

    fn require_input_queue(&self, operation: &str) -> TransportResult<&CanonicalQueueAddress> {
        self.input_queue.as_ref().ok_or_else(|| {
            TransportError::configuration(
                "endpoint.send_only",
                format!("{operation} requires an endpoint with an input queue"),
            )
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn connection_factory(&self) -> &Arc<dyn ConnectionFactory> {
        &self.connection_factory
    }

    pub fn translator(&self) -> &Arc<QueueAddressTranslator> {
        &self.translator
    }

    pub fn queues(&self) -> &Arc<TableBasedQueueCache> {
        &self.queues
    }

    pub fn input_queue(&self) -> Option<&CanonicalQueueAddress> {
        self.input_queue.as_ref()
    }

    pub fn error_queue(&self) -> &CanonicalQueueAddress {
        &self.error_queue
    }

    pub fn delayed_store(&self) -> Option<&Arc<DelayedMessageStore>> {
        self.delayed_store.as_ref()
    }

    pub fn subscriptions(&self) -> &Arc<PolymorphicSubscriptionStore> {
        &self.subscriptions
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    /// `None` for send-only endpoints
    pub fn receiver(&self) -> Option<&Arc<MessageReceiver>> {
        self.receiver.as_ref()
    }

    pub fn maturation(&self) -> Option<&Arc<DelayedMessageProcessor>> {
        self.maturation.as_ref()
    }
}

fn addressing_rules(config: &TransportConfig, default_catalog: String) -> AddressingRules {
    let addressing = &config.addressing;
    let mut rules = AddressingRules::new(addressing.default_schema.clone(), default_catalog);
    for (table, schema) in &addressing.schema_overrides {
        rules = rules.with_schema_override(table.clone(), schema.clone());
    }
    for (table, catalog) in &addressing.catalog_overrides {
        rules = rules.with_catalog_override(table.clone(), catalog.clone());
    }
    rules
}
