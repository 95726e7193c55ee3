//! Open-data (CKAN) upserts of discovered certificates.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgConnection;
use tracing::info;

use crate::ct::cert::{parse_entry_certificate, watched_domains, CertInfo};
use crate::ct::leaf::{store_key, MerkleTreeLeaf};
use crate::models::CertStore;
use crate::queue::{Job, JobHandler, Outcome};
use crate::WatchContext;

/// Batch size for the backfill sweep.
const MAX_TO_BACKFILL: i64 = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDataArgs {
    /// Base64 of the canonical leaf bytes.
    pub data: String,
}

impl OpenDataArgs {
    pub fn from_leaf(canonical: &[u8]) -> Self {
        Self {
            data: BASE64.encode(canonical),
        }
    }

    pub fn leaf_bytes(&self) -> Result<Vec<u8>> {
        BASE64.decode(&self.data).context("invalid base64 leaf data")
    }
}

/// One datastore row for the open-data portal.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OpenDataRecord {
    key: String,
    issuer_cn: String,
    domains: Vec<String>,
    not_valid_before: Option<DateTime<Utc>>,
    not_valid_after: Option<DateTime<Utc>>,
    raw_data: String,
}

/// Build the portal record for a canonical leaf. Unparseable certificate
/// bodies still produce a record; they just carry no issuer or domains.
pub fn open_data_record(canonical: &[u8], suffix: &str, apex: &str) -> Result<OpenDataRecord> {
    let leaf = MerkleTreeLeaf::parse(canonical).map_err(|e| anyhow!("bad stored leaf: {e}"))?;
    let cert = parse_entry_certificate(&leaf.entry.body);

    let (issuer_cn, domains, not_valid_before, not_valid_after) = match &cert {
        Some(cert) => (
            cert.issuer_cn.clone(),
            domain_list(cert, suffix, apex),
            Some(cert.not_before),
            Some(cert.not_after),
        ),
        None => (String::new(), Vec::new(), None, None),
    };

    Ok(OpenDataRecord {
        key: BASE64.encode(store_key(canonical)),
        issuer_cn,
        domains,
        not_valid_before,
        not_valid_after,
        raw_data: BASE64.encode(canonical),
    })
}

fn domain_list(cert: &CertInfo, suffix: &str, apex: &str) -> Vec<String> {
    watched_domains(cert, suffix, apex).into_iter().collect()
}

async fn upsert_records(ctx: &WatchContext, api_key: &str, records: &[OpenDataRecord]) -> Result<()> {
    let payload = json!({
        "resource_id": ctx.config.ckan_resource_id,
        "records": records,
        "method": "upsert",
    });

    let url = format!("{}/api/3/action/datastore_upsert", ctx.config.ckan_base_url);
    let response = ctx
        .http
        .post(&url)
        .header("Authorization", api_key)
        .json(&payload)
        .send()
        .await
        .context("Failed to post open-data upsert")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("bad status from open-data portal: {status} ({body})");
    }

    Ok(())
}

/// Pushes one newly discovered certificate to the open-data portal.
pub struct UpsertOpenData;

#[async_trait]
impl JobHandler for UpsertOpenData {
    async fn run(
        &self,
        ctx: &WatchContext,
        job: &Job,
        _tx: &mut PgConnection,
    ) -> Result<Outcome> {
        // Without credentials there is nothing to do.
        let Some(api_key) = ctx.config.ckan_api_key.as_deref() else {
            return Ok(Outcome::Done);
        };

        let args: OpenDataArgs = job.decode()?;
        let record = open_data_record(
            &args.leaf_bytes()?,
            &ctx.config.domain_suffix,
            ctx.config.domain_apex(),
        )?;

        upsert_records(ctx, api_key, &[record]).await?;
        Ok(Outcome::Done)
    }
}

/// Sweeps certificates flagged `needs_ckan_backfill` in batches, clearing
/// the flag and upserting each batch. Singleton cron; pages through the
/// backlog by asking to run again whenever a batch had rows.
pub struct BackfillOpenData;

#[async_trait]
impl JobHandler for BackfillOpenData {
    async fn run(
        &self,
        ctx: &WatchContext,
        _job: &Job,
        tx: &mut PgConnection,
    ) -> Result<Outcome> {
        let Some(api_key) = ctx.config.ckan_api_key.as_deref() else {
            return Ok(Outcome::Done);
        };

        let rows = CertStore::pending_ckan_backfill(MAX_TO_BACKFILL, tx).await?;
        if rows.is_empty() {
            return Ok(Outcome::Done);
        }

        let mut records = Vec::with_capacity(rows.len());
        for (key, leaf) in &rows {
            records.push(open_data_record(
                leaf,
                &ctx.config.domain_suffix,
                ctx.config.domain_apex(),
            )?);
            CertStore::clear_ckan_backfill(key, tx).await?;
        }

        // The upsert happens inside the transaction's lifetime: if the
        // portal rejects the batch, the cleared flags roll back with it.
        upsert_records(ctx, api_key, &records).await?;

        info!(count = records.len(), "backfilled open-data records");
        Ok(Outcome::RunAgainNow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ct::leaf::{EntryBody, TimestampedEntry, VERSION_V1};

    fn garbage_leaf() -> Vec<u8> {
        MerkleTreeLeaf {
            version: VERSION_V1,
            entry: TimestampedEntry {
                timestamp: 0,
                body: EntryBody::X509 {
                    cert: b"not-der".to_vec(),
                },
                extensions: Vec::new(),
            },
        }
        .marshal()
    }

    #[test]
    fn open_data_args_round_trip_leaf_bytes() {
        let canonical = garbage_leaf();
        let args = OpenDataArgs::from_leaf(&canonical);
        assert_eq!(args.leaf_bytes().unwrap(), canonical);
    }

    #[test]
    fn record_for_unparseable_cert_keeps_key_and_raw_data() {
        let canonical = garbage_leaf();
        let record = open_data_record(&canonical, ".gov.au", "gov.au").unwrap();
        assert_eq!(record.key, BASE64.encode(store_key(&canonical)));
        assert_eq!(record.raw_data, BASE64.encode(&canonical));
        assert_eq!(record.issuer_cn, "");
        assert!(record.domains.is_empty());
        assert!(record.not_valid_before.is_none());
    }

    #[test]
    fn record_rejects_undecodable_leaf() {
        assert!(open_data_record(b"\x00", ".gov.au", "gov.au").is_err());
    }
}
