//! Batch recomputation of derived certificate columns.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::info;

use crate::ct::cert::{derive_fields, parse_entry_certificate};
use crate::ct::leaf::MerkleTreeLeaf;
use crate::models::CertStore;
use crate::queue::{Job, JobHandler, Outcome};
use crate::WatchContext;

const MAX_TO_UPDATE: i64 = 1024;

/// Recomputes jurisdiction, CDN, validity, and issuer for certificates
/// flagged `needs_update` (set when classification rules change).
/// Singleton cron; pages through the backlog one batch per transaction.
pub struct RefreshCertMetadata;

#[async_trait]
impl JobHandler for RefreshCertMetadata {
    async fn run(
        &self,
        _ctx: &WatchContext,
        _job: &Job,
        tx: &mut PgConnection,
    ) -> Result<Outcome> {
        let rows = CertStore::pending_metadata_refresh(MAX_TO_UPDATE, tx).await?;

        for (key, leaf_bytes) in &rows {
            let leaf =
                MerkleTreeLeaf::parse(leaf_bytes).map_err(|e| anyhow!("bad stored leaf: {e}"))?;
            let cert = parse_entry_certificate(&leaf.entry.body);
            let derived = derive_fields(cert.as_ref());
            CertStore::apply_derived(key, &derived, tx).await?;
        }

        info!(count = rows.len(), "refreshed derived certificate fields");

        if !rows.is_empty() {
            return Ok(Outcome::RunAgainNow);
        }
        Ok(Outcome::Done)
    }
}
