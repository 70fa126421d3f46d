//! Queue addresses and their canonical form.
//!
//! The wire form is `table@[schema]@[catalog]`. Trailing segments are omitted
//! when absent; a segment starting with `[` is bracket-quoted with `]` doubled.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::name_helper::{quote, quote_identifier, unquote};
use crate::error::{TransportError, TransportResult};

const SEPARATOR: char = '@';

/// Logical identity of a queue as written on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueAddress {
    pub table: String,
    pub schema: Option<String>,
    pub catalog: Option<String>,
}

impl QueueAddress {
    /// Create an address; only the table is required
    pub fn new(
        table: impl Into<String>,
        schema: Option<String>,
        catalog: Option<String>,
    ) -> TransportResult<Self> {
        let table = table.into();
        if table.is_empty() {
            return Err(TransportError::invalid_address(
                table,
                "table name must not be empty",
            ));
        }
        Ok(Self {
            table,
            schema,
            catalog,
        })
    }

    /// Parse the wire form. Malformed bracket sequences are kept literally;
    /// only an empty table name is rejected.
    pub fn parse(address: &str) -> TransportResult<Self> {
        let mut segments = split_segments(address).into_iter();

        let table = segments
            .next()
            .map(|segment| segment.value)
            .unwrap_or_default();
        if table.is_empty() {
            return Err(TransportError::invalid_address(
                address,
                "table name must not be empty",
            ));
        }

        let schema = segments.next().and_then(Segment::into_option);

        // Anything past the catalog separator belongs to the catalog
        let rest: Vec<Segment> = segments.collect();
        let catalog = match rest.len() {
            0 => None,
            1 => rest.into_iter().next().and_then(Segment::into_option),
            _ => Some(
                rest.iter()
                    .map(|segment| segment.raw.as_str())
                    .collect::<Vec<_>>()
                    .join("@"),
            ),
        };

        Ok(Self {
            table,
            schema,
            catalog,
        })
    }

    /// Resolve overrides and defaults into a canonical address
    pub fn resolve(&self, rules: &AddressingRules) -> CanonicalQueueAddress {
        let schema = rules
            .schema_overrides
            .get(&self.table)
            .cloned()
            .or_else(|| self.schema.clone())
            .unwrap_or_else(|| rules.default_schema.clone());

        let catalog = rules
            .catalog_overrides
            .get(&self.table)
            .cloned()
            .or_else(|| self.catalog.clone())
            .unwrap_or_else(|| rules.default_catalog.clone());

        CanonicalQueueAddress::new(self.table.clone(), schema, catalog)
    }
}

impl fmt::Display for QueueAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.table.contains(SEPARATOR) || self.table.starts_with('[') {
            write!(f, "{}", quote(Some(&self.table)).unwrap_or_default())?;
        } else {
            write!(f, "{}", self.table)?;
        }

        match (&self.schema, &self.catalog) {
            (None, None) => Ok(()),
            (schema, catalog) => {
                write!(
                    f,
                    "{SEPARATOR}{}",
                    quote(schema.as_deref()).unwrap_or_default()
                )?;
                if let Some(catalog) = catalog {
                    write!(f, "{SEPARATOR}{}", quote(Some(catalog)).unwrap_or_default())?;
                }
                Ok(())
            }
        }
    }
}

/// Defaults and per-queue overrides applied during resolution
///
/// Precedence per dimension: configured override, then the value embedded in
/// the address, then the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressingRules {
    pub default_schema: String,
    pub default_catalog: String,
    pub schema_overrides: HashMap<String, String>,
    pub catalog_overrides: HashMap<String, String>,
}

impl AddressingRules {
    pub fn new(default_schema: impl Into<String>, default_catalog: impl Into<String>) -> Self {
        Self {
            default_schema: default_schema.into(),
            default_catalog: default_catalog.into(),
            schema_overrides: HashMap::new(),
            catalog_overrides: HashMap::new(),
        }
    }

    pub fn with_schema_override(mut self, table: impl Into<String>, schema: impl Into<String>) -> Self {
        self.schema_overrides.insert(table.into(), schema.into());
        self
    }

    pub fn with_catalog_override(
        mut self,
        table: impl Into<String>,
        catalog: impl Into<String>,
    ) -> Self {
        self.catalog_overrides.insert(table.into(), catalog.into());
        self
    }
}

/// A fully resolved queue address with its SQL table reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalQueueAddress {
    table: String,
    schema: String,
    catalog: String,
    qualified_table_name: String,
    address: String,
}

impl CanonicalQueueAddress {
    pub fn new(
        table: impl Into<String>,
        schema: impl Into<String>,
        catalog: impl Into<String>,
    ) -> Self {
        let table = table.into();
        let schema = schema.into();
        let catalog = catalog.into();

        let qualified_table_name = format!(
            "{}.{}.{}",
            quote_identifier(&catalog),
            quote_identifier(&schema),
            quote_identifier(&table)
        );
        let address = QueueAddress {
            table: table.clone(),
            schema: Some(schema.clone()),
            catalog: Some(catalog.clone()),
        }
        .to_string();

        Self {
            table,
            schema,
            catalog,
            qualified_table_name,
            address,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    /// `"catalog"."schema"."table"`, ready to splice into SQL
    pub fn qualified_table_name(&self) -> &str {
        &self.qualified_table_name
    }

    /// Canonical wire form
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Address of a sibling table in the same schema and catalog
    pub fn sibling(&self, table: impl Into<String>) -> Self {
        Self::new(table, self.schema.clone(), self.catalog.clone())
    }

    pub fn to_queue_address(&self) -> QueueAddress {
        QueueAddress {
            table: self.table.clone(),
            schema: Some(self.schema.clone()),
            catalog: Some(self.catalog.clone()),
        }
    }
}

impl fmt::Display for CanonicalQueueAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

#[derive(Debug)]
struct Segment {
    /// Unescaped value
    value: String,
    /// Text exactly as it appeared on the wire
    raw: String,
    quoted: bool,
}

impl Segment {
    /// An unquoted empty segment means "not specified"
    fn into_option(self) -> Option<String> {
        if self.value.is_empty() && !self.quoted {
            None
        } else {
            Some(self.value)
        }
    }
}

/// Split on `@` outside of bracket-quoted segments
fn split_segments(address: &str) -> Vec<Segment> {
    let chars: Vec<char> = address.chars().collect();
    let mut segments = Vec::new();
    let mut start = 0;

    loop {
        let (segment, end) = read_segment(&chars, start);
        segments.push(segment);

        if end >= chars.len() {
            break;
        }
        // chars[end] is the separator
        start = end + 1;
    }

    segments
}

/// Read one segment starting at `start`; returns it with the index of the
/// separator that ends it (or the input length)
fn read_segment(chars: &[char], start: usize) -> (Segment, usize) {
    if chars.get(start) == Some(&'[') {
        if let Some((segment, end)) = read_quoted_segment(chars, start) {
            return (segment, end);
        }
    }

    let end = chars[start..]
        .iter()
        .position(|c| *c == SEPARATOR)
        .map_or(chars.len(), |offset| start + offset);
    let raw: String = chars[start..end].iter().collect();
    (
        Segment {
            value: raw.clone(),
            raw,
            quoted: false,
        },
        end,
    )
}

/// A well-formed quoted segment closes with a single `]` directly followed by
/// a separator or the end of input. Anything else is not a quoted segment.
fn read_quoted_segment(chars: &[char], start: usize) -> Option<(Segment, usize)> {
    let mut index = start + 1;

    while index < chars.len() {
        if chars[index] == ']' {
            if chars.get(index + 1) == Some(&']') {
                index += 2;
                continue;
            }
            let end = index + 1;
            if end == chars.len() || chars[end] == SEPARATOR {
                let raw: String = chars[start..end].iter().collect();
                let value = unquote(Some(&raw)).unwrap_or_default();
                return Some((
                    Segment {
                        value,
                        raw,
                        quoted: true,
                    },
                    end,
                ));
            }
            return None;
        }
        index += 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rules() -> AddressingRules {
        AddressingRules::new("public", "sqlbus")
    }

    #[test]
    fn test_parse_table_only() {
        let address = QueueAddress::parse("orders").unwrap();
        assert_eq!(address.table, "orders");
        assert_eq!(address.schema, None);
        assert_eq!(address.catalog, None);
    }

    #[test]
    fn test_parse_all_segments() {
        let address = QueueAddress::parse("orders@[sales]@[shop]").unwrap();
        assert_eq!(address.table, "orders");
        assert_eq!(address.schema.as_deref(), Some("sales"));
        assert_eq!(address.catalog.as_deref(), Some("shop"));
    }

    #[test]
    fn test_parse_escaped_segments() {
        let address = QueueAddress::parse("[or@ders]@[sa]]les]").unwrap();
        assert_eq!(address.table, "or@ders");
        assert_eq!(address.schema.as_deref(), Some("sa]les"));
    }

    #[test]
    fn test_parse_missing_schema_with_catalog() {
        let address = QueueAddress::parse("orders@@[shop]").unwrap();
        assert_eq!(address.schema, None);
        assert_eq!(address.catalog.as_deref(), Some("shop"));
    }

    #[test]
    fn test_parse_unquoted_schema() {
        let address = QueueAddress::parse("orders@sales").unwrap();
        assert_eq!(address.schema.as_deref(), Some("sales"));
    }

    #[test]
    fn test_parse_malformed_brackets_preserved() {
        let address = QueueAddress::parse("[orders").unwrap();
        assert_eq!(address.table, "[orders");

        let address = QueueAddress::parse("[ord]ers@[sales").unwrap();
        assert_eq!(address.table, "[ord]ers");
        assert_eq!(address.schema.as_deref(), Some("[sales"));
    }

    #[test]
    fn test_parse_empty_table_is_invalid() {
        assert!(matches!(
            QueueAddress::parse(""),
            Err(TransportError::InvalidAddress { .. })
        ));
        assert!(matches!(
            QueueAddress::parse("@[sales]"),
            Err(TransportError::InvalidAddress { .. })
        ));
        assert!(QueueAddress::new("", None, None).is_err());
    }

    #[test]
    fn test_display() {
        let address = QueueAddress::new("orders", Some("sales".into()), None).unwrap();
        assert_eq!(address.to_string(), "orders@[sales]");

        let address = QueueAddress::new("orders", None, Some("shop".into())).unwrap();
        assert_eq!(address.to_string(), "orders@@[shop]");

        let address = QueueAddress::new("or@ders", None, None).unwrap();
        assert_eq!(address.to_string(), "[or@ders]");
    }

    #[test]
    fn test_resolve_precedence() {
        let rules = rules()
            .with_schema_override("orders", "configured")
            .with_catalog_override("billing", "finance");

        let canonical = QueueAddress::parse("orders@[embedded]")
            .unwrap()
            .resolve(&rules);
        assert_eq!(canonical.schema(), "configured");
        assert_eq!(canonical.catalog(), "sqlbus");

        let canonical = QueueAddress::parse("billing@[embedded]@[other]")
            .unwrap()
            .resolve(&rules);
        assert_eq!(canonical.schema(), "embedded");
        assert_eq!(canonical.catalog(), "finance");

        let canonical = QueueAddress::parse("audit").unwrap().resolve(&rules);
        assert_eq!(canonical.schema(), "public");
        assert_eq!(canonical.address(), "audit@[public]@[sqlbus]");
        assert_eq!(
            canonical.qualified_table_name(),
            "\"sqlbus\".\"public\".\"audit\""
        );
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let rules = rules().with_schema_override("orders", "configured");
        let once = QueueAddress::parse("orders@[x]").unwrap().resolve(&rules);
        let twice = once.to_queue_address().resolve(&rules);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_sibling_keeps_schema_and_catalog() {
        let canonical = QueueAddress::parse("orders@[sales]").unwrap().resolve(&rules());
        let delayed = canonical.sibling("orders.Delayed");
        assert_eq!(delayed.schema(), "sales");
        assert_eq!(delayed.table(), "orders.Delayed");
    }

    proptest! {
        #[test]
        fn canonical_round_trip(
            table in "[a-zA-Z0-9_.@\\]\\[]{1,12}",
            schema in proptest::option::of("[a-z@\\]\\[]{0,8}"),
            catalog in proptest::option::of("[a-z@\\]]{0,8}"),
        ) {
            let rules = rules();
            let address = QueueAddress::new(table, schema, catalog).unwrap();
            let canonical = address.resolve(&rules);
            let reparsed = QueueAddress::parse(&canonical.to_string()).unwrap().resolve(&rules);
            prop_assert_eq!(canonical.table(), reparsed.table());
            prop_assert_eq!(canonical.schema(), reparsed.schema());
            prop_assert_eq!(canonical.catalog(), reparsed.catalog());
        }
    }
}
