//! [`InvoiceStore`] implementations: PostgreSQL and in-memory.
//!
//! ## Uniqueness
//!
//! `facturas` carries a unique index on
//! `(invoice_number, COALESCE(product_code, ''))` and rows are written with
//! `INSERT ... ON CONFLICT DO NOTHING`. Two runs racing on the same invoice
//! cannot both insert a line item: the second insert waits on the first
//! transaction and then affects zero rows. `rows_affected` is what tells an
//! insert from a skip, so no separate existence query is issued.
//!
//! Tables created by older deployments lack the index, and without it
//! `ON CONFLICT` never fires. [`PgStore`] therefore checks for the index
//! before its first write and refuses to insert until
//! [`PgStore::ensure_schema`] has been run once. That call adds the index
//! and the `id` / `created_at` columns to a legacy table (it fails if
//! duplicates already exist).

use crate::config::DatabaseConfig;
use crate::error::FacturaError;
use crate::invoice::FacturaRow;
use crate::pipeline::persist::InvoiceStore;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS facturas (
    id                  BIGSERIAL PRIMARY KEY,
    invoice_number      TEXT NOT NULL,
    date                TEXT,
    client_name         TEXT,
    provider_name       TEXT,
    total               TEXT,
    product_code        TEXT,
    product_description TEXT,
    product_quantity    TEXT,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

/// Columns a table from before the unique index may lack.
const UPGRADE_LEGACY_COLUMNS: &str = r#"
ALTER TABLE facturas
    ADD COLUMN IF NOT EXISTS id         BIGSERIAL,
    ADD COLUMN IF NOT EXISTS created_at TIMESTAMPTZ NOT NULL DEFAULT now()
"#;

const UNIQUE_INDEX_NAME: &str = "facturas_invoice_product_key";

const CREATE_UNIQUE_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS facturas_invoice_product_key
    ON facturas (invoice_number, (COALESCE(product_code, '')))
"#;

const UNIQUE_INDEX_EXISTS: &str = r#"
SELECT EXISTS (
    SELECT 1 FROM pg_indexes
    WHERE schemaname = current_schema()
      AND tablename  = 'facturas'
      AND indexname  = $1
)
"#;

const INSERT_ROW: &str = r#"
INSERT INTO facturas (invoice_number, date, client_name, provider_name, total,
                      product_code, product_description, product_quantity)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
ON CONFLICT DO NOTHING
"#;

const SELECT_ROWS: &str = r#"
SELECT invoice_number, date, client_name, provider_name, total,
       product_code, product_description, product_quantity
FROM facturas
WHERE invoice_number = $1
ORDER BY id
"#;

fn connection_error(e: sqlx::Error) -> FacturaError {
    FacturaError::ConnectionError {
        detail: e.to_string(),
    }
}

// ── PostgreSQL ───────────────────────────────────────────────────────────

/// PostgreSQL-backed store. Build once per process; each invoice borrows one
/// pooled connection for the length of its transaction.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    /// Set once the unique index is known to exist. Shared by clones.
    index_verified: Arc<OnceCell<()>>,
}

impl PgStore {
    /// Open a pool and check that the server answers.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, FacturaError> {
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        info!(
            "Connecting to postgres://{}@{}:{}/{}",
            config.user, config.host, config.port, config.database
        );

        let connect = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(timeout)
            .connect_with(config.connect_options());

        let pool = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| FacturaError::ConnectionError {
                detail: format!("timed out after {}s", timeout.as_secs()),
            })?
            .map_err(connection_error)?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool, e.g. one whose connections set a `search_path`.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            index_verified: Arc::new(OnceCell::new()),
        }
    }

    /// Create `facturas` and its unique index if they do not exist, and
    /// bring a legacy table up to the current layout.
    pub async fn ensure_schema(&self) -> Result<(), FacturaError> {
        for statement in [CREATE_TABLE, UPGRADE_LEGACY_COLUMNS, CREATE_UNIQUE_INDEX] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| FacturaError::SchemaSetupFailed {
                    detail: e.to_string(),
                })?;
        }
        let _ = self.index_verified.set(());
        debug!("facturas schema ready");
        Ok(())
    }

    /// `true` when `facturas` carries the unique index deduplication relies on.
    pub async fn has_unique_index(&self) -> Result<bool, FacturaError> {
        sqlx::query_scalar::<_, bool>(UNIQUE_INDEX_EXISTS)
            .bind(UNIQUE_INDEX_NAME)
            .fetch_one(&self.pool)
            .await
            .map_err(connection_error)
    }

    /// Fail unless the unique index exists. Checked once per store.
    async fn verify_unique_index(&self) -> Result<(), FacturaError> {
        self.index_verified
            .get_or_try_init(|| async {
                if self.has_unique_index().await? {
                    Ok::<(), FacturaError>(())
                } else {
                    warn!("facturas has no {} index; refusing to write", UNIQUE_INDEX_NAME);
                    Err(FacturaError::MissingUniqueIndex)
                }
            })
            .await
            .map(|_| ())
    }

    /// Stored rows of one invoice, in insertion order.
    ///
    /// Needs the `id` column that [`PgStore::ensure_schema`] adds.
    pub async fn rows_for(&self, invoice_number: &str) -> Result<Vec<FacturaRow>, FacturaError> {
        sqlx::query_as::<_, FacturaRow>(SELECT_ROWS)
            .bind(invoice_number)
            .fetch_all(&self.pool)
            .await
            .map_err(connection_error)
    }

    /// Close every pooled connection. Pending transactions finish first.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl InvoiceStore for PgStore {
    async fn insert_new(&self, rows: &[FacturaRow]) -> Result<Vec<bool>, FacturaError> {
        self.verify_unique_index().await?;

        // Dropping `tx` on any early return rolls back and hands the
        // connection back to the pool.
        let mut tx = self.pool.begin().await.map_err(connection_error)?;

        let mut flags = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let result = sqlx::query(INSERT_ROW)
                .bind(&row.invoice_number)
                .bind(&row.date)
                .bind(&row.client_name)
                .bind(&row.provider_name)
                .bind(&row.total)
                .bind(&row.product_code)
                .bind(&row.product_description)
                .bind(&row.product_quantity)
                .execute(&mut *tx)
                .await
                .map_err(|e| FacturaError::PersistenceError {
                    invoice_number: row.invoice_number.clone(),
                    line: idx + 1,
                    detail: e.to_string(),
                })?;
            flags.push(result.rows_affected() == 1);
        }

        tx.commit().await.map_err(|e| FacturaError::PersistenceError {
            invoice_number: rows.first().map(|r| r.invoice_number.clone()).unwrap_or_default(),
            line: rows.len(),
            detail: format!("commit failed: {e}"),
        })?;

        Ok(flags)
    }
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Process-local store with the same key and batch semantics as
/// [`PgStore`]. Backs `factura --no-store` runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<FacturaRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored row, in insertion order.
    pub fn rows(&self) -> Vec<FacturaRow> {
        self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InvoiceStore for MemoryStore {
    async fn insert_new(&self, rows: &[FacturaRow]) -> Result<Vec<bool>, FacturaError> {
        let mut stored = self
            .rows
            .lock()
            .map_err(|_| FacturaError::Internal("memory store lock poisoned".into()))?;

        let mut keys: HashSet<(String, String)> = stored.iter().map(owned_key).collect();

        let mut flags = Vec::with_capacity(rows.len());
        let mut fresh = Vec::new();
        for row in rows {
            let inserted = keys.insert(owned_key(row));
            if inserted {
                fresh.push(row.clone());
            }
            flags.push(inserted);
        }
        stored.extend(fresh);
        Ok(flags)
    }
}

fn owned_key(row: &FacturaRow) -> (String, String) {
    let (number, code) = row.dedup_key();
    (number.to_string(), code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(number: &str, code: Option<&str>) -> FacturaRow {
        FacturaRow {
            invoice_number: number.into(),
            date: None,
            client_name: None,
            provider_name: None,
            total: None,
            product_code: code.map(String::from),
            product_description: None,
            product_quantity: None,
        }
    }

    #[tokio::test]
    async fn memory_store_flags_duplicates() {
        let store = MemoryStore::new();
        let flags = store
            .insert_new(&[row("1", Some("A")), row("1", Some("B")), row("1", Some("A"))])
            .await
            .unwrap();
        assert_eq!(flags, vec![true, true, false]);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn missing_codes_share_one_key() {
        let store = MemoryStore::new();
        let flags = store
            .insert_new(&[row("1", None), row("1", Some("")), row("1", None)])
            .await
            .unwrap();
        assert_eq!(flags, vec![true, false, false]);
    }

    #[tokio::test]
    async fn rows_keep_insertion_order() {
        let store = MemoryStore::new();
        store.insert_new(&[row("2", Some("Z")), row("2", Some("A"))]).await.unwrap();
        let codes: Vec<_> = store.rows().into_iter().map(|r| r.product_code).collect();
        assert_eq!(codes, vec![Some("Z".to_string()), Some("A".to_string())]);
        assert!(!store.is_empty());
    }

    #[test]
    fn unique_index_matches_dedup_key() {
        assert!(CREATE_UNIQUE_INDEX.contains("COALESCE(product_code, '')"));
        assert!(INSERT_ROW.contains("ON CONFLICT DO NOTHING"));
        assert!(CREATE_UNIQUE_INDEX.contains(UNIQUE_INDEX_NAME));
    }
}
