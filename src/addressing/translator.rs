//! Logical → physical and physical → canonical address translation.
//!
//! Both directions are cached for the life of the process. The key space is
//! bounded by configuration (endpoints and queues), not by message volume.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::queue_address::{AddressingRules, CanonicalQueueAddress, QueueAddress};
use crate::error::TransportResult;

/// Logical queue identity composed from an endpoint name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalAddress {
    pub endpoint: String,
    pub discriminator: Option<String>,
    pub qualifier: Option<String>,
    /// Schema declared by the endpoint's routing settings
    pub schema: Option<String>,
}

impl LogicalAddress {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            discriminator: None,
            qualifier: None,
            schema: None,
        }
    }

    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

/// Build a queue address from an endpoint's logical parts.
///
/// The table name joins the non-empty parts of endpoint, qualifier and
/// discriminator with `.`.
pub fn translate(
    endpoint: &str,
    discriminator: Option<&str>,
    qualifier: Option<&str>,
    declared_schema: Option<&str>,
) -> TransportResult<QueueAddress> {
    let table = [Some(endpoint), qualifier, discriminator]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(".");

    QueueAddress::new(table, declared_schema.map(str::to_string), None)
}

/// Caching translator shared by every component that resolves addresses
#[derive(Debug)]
pub struct QueueAddressTranslator {
    rules: AddressingRules,
    physical_cache: DashMap<String, CanonicalQueueAddress>,
    logical_cache: DashMap<LogicalAddress, CanonicalQueueAddress>,
}

impl QueueAddressTranslator {
    pub fn new(rules: AddressingRules) -> Self {
        Self {
            rules,
            physical_cache: DashMap::new(),
            logical_cache: DashMap::new(),
        }
    }

    pub fn rules(&self) -> &AddressingRules {
        &self.rules
    }

    /// Resolve a wire-form address string
    pub fn translate_physical(&self, address: &str) -> TransportResult<CanonicalQueueAddress> {
        if let Some(cached) = self.physical_cache.get(address) {
            return Ok(cached.clone());
        }

        let canonical = QueueAddress::parse(address)?.resolve(&self.rules);
        debug!(
            address = %address,
            canonical = %canonical,
            "Resolved physical queue address"
        );

        Ok(self
            .physical_cache
            .entry(address.to_string())
            .or_insert(canonical)
            .clone())
    }

    /// Resolve an endpoint's logical address
    pub fn translate_logical(
        &self,
        logical: &LogicalAddress,
    ) -> TransportResult<CanonicalQueueAddress> {
        if let Some(cached) = self.logical_cache.get(logical) {
            return Ok(cached.clone());
        }

        let canonical = translate(
            &logical.endpoint,
            logical.discriminator.as_deref(),
            logical.qualifier.as_deref(),
            logical.schema.as_deref(),
        )?
        .resolve(&self.rules);
        debug!(
            endpoint = %logical.endpoint,
            canonical = %canonical,
            "Resolved logical queue address"
        );

        Ok(self
            .logical_cache
            .entry(logical.clone())
            .or_insert(canonical)
            .clone())
    }

    /// Canonical form of an already-parsed address
    pub fn canonicalize(&self, address: &QueueAddress) -> CanonicalQueueAddress {
        address.resolve(&self.rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> QueueAddressTranslator {
        QueueAddressTranslator::new(
            AddressingRules::new("public", "sqlbus").with_schema_override("billing", "finance"),
        )
    }

    #[test]
    fn test_translate_joins_non_empty_parts() {
        let address = translate("orders", Some("blue"), Some("timeouts"), None).unwrap();
        assert_eq!(address.table, "orders.timeouts.blue");

        let address = translate("orders", Some(""), None, Some("sales")).unwrap();
        assert_eq!(address.table, "orders");
        assert_eq!(address.schema.as_deref(), Some("sales"));
    }

    #[test]
    fn test_translate_empty_endpoint_is_invalid() {
        assert!(translate("", None, None, None).is_err());
    }

    #[test]
    fn test_translate_physical_applies_rules() {
        let translator = translator();
        let canonical = translator.translate_physical("billing@[ignored]").unwrap();
        assert_eq!(canonical.schema(), "finance");
        assert_eq!(canonical.catalog(), "sqlbus");
    }

    #[test]
    fn test_translate_physical_is_cached_and_stable() {
        let translator = translator();
        let first = translator.translate_physical("orders").unwrap();
        let second = translator.translate_physical("orders").unwrap();
        assert_eq!(first, second);
        assert_eq!(translator.physical_cache.len(), 1);

        let again = translator.translate_physical(first.address()).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_translate_logical() {
        let translator = translator();
        let logical = LogicalAddress::new("orders")
            .with_discriminator("1")
            .with_schema("sales");
        let canonical = translator.translate_logical(&logical).unwrap();
        assert_eq!(canonical.table(), "orders.1");
        assert_eq!(canonical.schema(), "sales");
        assert_eq!(translator.logical_cache.len(), 1);
    }

    #[test]
    fn test_invalid_addresses_are_not_cached() {
        let translator = translator();
        assert!(translator.translate_physical("").is_err());
        assert!(translator.physical_cache.is_empty());
    }
}
