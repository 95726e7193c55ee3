//! Discovered certificates and their domain index.

use anyhow::Result;
use sqlx::PgConnection;

use crate::ct::cert::DerivedFields;

/// Row operations for `cert_store` and `cert_index`. The store key is the
/// SHA-256 of the canonicalized leaf, so a key collision means identical
/// canonical bytes and inserts can be `ON CONFLICT DO NOTHING`.
pub struct CertStore;

impl CertStore {
    /// Insert a certificate if its key is new. Returns whether this call
    /// actually inserted the row; downstream notification fan-out keys off
    /// that, so retries never double-post.
    pub async fn insert_if_new(
        key: &[u8],
        leaf: &[u8],
        derived: &DerivedFields,
        conn: &mut PgConnection,
    ) -> Result<bool> {
        let inserted: Option<Vec<u8>> = sqlx::query_scalar(
            r#"
            INSERT INTO cert_store
                (key, leaf, not_valid_before, not_valid_after, issuer_cn, jurisdiction, cdn, needs_update)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE)
            ON CONFLICT (key) DO NOTHING
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(leaf)
        .bind(derived.not_valid_before)
        .bind(derived.not_valid_after)
        .bind(&derived.issuer_cn)
        .bind(&derived.jurisdiction)
        .bind(&derived.cdn)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(inserted.is_some())
    }

    /// Link a certificate to one watched domain it covers.
    pub async fn index_domain(key: &[u8], domain: &str, conn: &mut PgConnection) -> Result<()> {
        sqlx::query(
            "INSERT INTO cert_index (key, domain) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(key)
        .bind(domain)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Certificates whose derived columns are stale.
    pub async fn pending_metadata_refresh(
        limit: i64,
        conn: &mut PgConnection,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let rows: Vec<(Vec<u8>, Vec<u8>)> = sqlx::query_as(
            "SELECT key, leaf FROM cert_store WHERE needs_update = TRUE LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows)
    }

    /// Rewrite the derived columns and clear the refresh flag.
    pub async fn apply_derived(
        key: &[u8],
        derived: &DerivedFields,
        conn: &mut PgConnection,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cert_store
            SET not_valid_before = $2,
                not_valid_after = $3,
                issuer_cn = $4,
                jurisdiction = $5,
                cdn = $6,
                needs_update = FALSE
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(derived.not_valid_before)
        .bind(derived.not_valid_after)
        .bind(&derived.issuer_cn)
        .bind(&derived.jurisdiction)
        .bind(&derived.cdn)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Certificates still waiting for an open-data upsert.
    pub async fn pending_ckan_backfill(
        limit: i64,
        conn: &mut PgConnection,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let rows: Vec<(Vec<u8>, Vec<u8>)> = sqlx::query_as(
            "SELECT key, leaf FROM cert_store WHERE needs_ckan_backfill = TRUE LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows)
    }

    pub async fn clear_ckan_backfill(key: &[u8], conn: &mut PgConnection) -> Result<()> {
        sqlx::query("UPDATE cert_store SET needs_ckan_backfill = FALSE WHERE key = $1")
            .bind(key)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

/// Append-only diagnostics for leaves whose X.509 body would not parse.
pub struct ErrorLog;

impl ErrorLog {
    pub async fn record(error: &str, conn: &mut PgConnection) -> Result<()> {
        sqlx::query("INSERT INTO error_log (error) VALUES ($1)")
            .bind(error)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}
