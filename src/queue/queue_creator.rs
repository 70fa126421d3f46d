//! Idempotent table creation, safe under concurrent first use.
//!
//! Existence is checked, then a transaction-scoped advisory lock keyed on the
//! qualified table name is taken and the check repeated before creating.

use sqlx::{Connection, Executor, PgConnection};
use tracing::{debug, info};

use crate::addressing::CanonicalQueueAddress;
use crate::error::TransportResult;

/// Whether the table behind `address` exists
pub async fn table_exists(
    conn: &mut PgConnection,
    address: &CanonicalQueueAddress,
) -> TransportResult<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_catalog = $1 AND table_schema = $2 AND table_name = $3
        )
        "#,
    )
    .bind(address.catalog())
    .bind(address.schema())
    .bind(address.table())
    .fetch_one(&mut *conn)
    .await?;

    Ok(exists)
}

/// Run `ddl` unless the table already exists. Returns `true` when this call
/// created it.
pub async fn ensure_table(
    conn: &mut PgConnection,
    address: &CanonicalQueueAddress,
    ddl: &str,
) -> TransportResult<bool> {
    if table_exists(conn, address).await? {
        debug!(table = %address, "Table already exists");
        return Ok(false);
    }

    let mut tx = conn.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(address.qualified_table_name())
        .execute(&mut *tx)
        .await?;

    if table_exists(&mut *tx, address).await? {
        tx.commit().await?;
        debug!(table = %address, "Table created concurrently by another caller");
        return Ok(false);
    }

    (&mut *tx).execute(sqlx::raw_sql(ddl)).await?;
    tx.commit().await?;

    info!(table = %address, "Created table");
    Ok(true)
}

/// Index name scoped to its table, as an SQL identifier
pub(crate) fn index_name(table: &str, suffix: &str) -> String {
    crate::addressing::name_helper::quote_identifier(&format!("{table}_{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name() {
        assert_eq!(index_name("orders", "seq_idx"), "\"orders_seq_idx\"");
        assert_eq!(index_name("a\"b", "due_idx"), "\"a\"\"b_due_idx\"");
    }
}
