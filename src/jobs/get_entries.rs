//! Divide-and-conquer fetch of a leaf index range.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::{debug, info};

use crate::ct::cert::{derive_fields, parse_entry_certificate, watched_domains};
use crate::ct::client::LogClient;
use crate::ct::leaf::{store_key, MerkleTreeLeaf};
use crate::jobs::ckan::OpenDataArgs;
use crate::jobs::slack::SlackArgs;
use crate::models::{CertStore, ErrorLog};
use crate::queue::{Job, JobHandler, NewJob, Outcome};
use crate::WatchContext;

/// Never request more than this many leaves at once, or a large server
/// response will surprise us.
pub const MAX_BATCH: u64 = 1024;

/// An exclusive-end index range `[start, end)` of one log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEntriesArgs {
    pub url: String,
    pub start: u64,
    pub end: u64,
}

/// Fetches a bounded slice of `[start, end)`, ingests the returned
/// leaves, and re-enqueues the remainder as two halves. Splitting keeps
/// per-job work bounded and makes progress even when a server truncates
/// responses well below the requested count.
pub struct FetchEntries;

#[async_trait]
impl JobHandler for FetchEntries {
    async fn run(
        &self,
        ctx: &WatchContext,
        job: &Job,
        tx: &mut PgConnection,
    ) -> Result<Outcome> {
        let args: GetEntriesArgs = job.decode()?;

        if args.start >= args.end {
            return Ok(Outcome::Done);
        }

        let client = LogClient::for_connect_url(&args.url)?;
        let entries = client
            .get_entries(args.start, last_index_to_request(args.start, args.end))
            .await?;

        if entries.is_empty() {
            // A child range equal to its parent would recurse forever;
            // surface the stall and let the queue's backoff retry us.
            return Err(anyhow!(
                "log {} returned no entries for [{}, {})",
                args.url,
                args.start,
                args.end
            ));
        }

        let mut idx = args.start;
        let mut stored = 0usize;
        for raw in &entries {
            let leaf = MerkleTreeLeaf::parse(raw)?;

            let cert = parse_entry_certificate(&leaf.entry.body);
            if cert.is_none() {
                ErrorLog::record(&format!("cannotparse|{}|{}", args.url, idx), tx).await?;
            }

            let domains = match &cert {
                Some(cert) => watched_domains(
                    cert,
                    &ctx.config.domain_suffix,
                    ctx.config.domain_apex(),
                ),
                None => Default::default(),
            };
            if domains.is_empty() {
                idx += 1;
                continue;
            }

            let canonical = leaf.canonical_bytes();
            let key = store_key(&canonical);
            let derived = derive_fields(cert.as_ref());
            let issuer = derived.issuer_cn.clone();

            let inserted = CertStore::insert_if_new(&key, &canonical, &derived, tx).await?;
            for domain in &domains {
                CertStore::index_domain(&key, domain, tx).await?;
            }

            if inserted {
                stored += 1;
                NewJob::new(
                    super::UPDATE_SLACK,
                    &SlackArgs {
                        key: URL_SAFE_NO_PAD.encode(key),
                        domains: domains.iter().cloned().collect(),
                        issuer,
                    },
                )?
                .enqueue(tx)
                .await?;
                NewJob::new(
                    super::UPDATE_DATA_GOV_AU,
                    &OpenDataArgs::from_leaf(&canonical),
                )?
                .enqueue(tx)
                .await?;
            }

            idx += 1;
        }

        if stored > 0 {
            info!(url = %args.url, stored, "stored new watched certificates");
        }

        if idx < args.end {
            debug!(
                url = %args.url,
                fetched = idx - args.start,
                remaining = args.end - idx,
                "short read, splitting remainder"
            );
            for (start, end) in split_ranges(idx, args.end) {
                NewJob::new(
                    super::GET_ENTRIES,
                    &GetEntriesArgs {
                        url: args.url.clone(),
                        start,
                        end,
                    },
                )?
                .enqueue(tx)
                .await?;
            }
        }

        Ok(Outcome::Done)
    }
}

/// The last (inclusive) index to ask the server for.
pub(crate) fn last_index_to_request(start: u64, end: u64) -> u64 {
    (end - 1).min(start + MAX_BATCH)
}

/// Split the unfetched remainder `[idx, end)` into two non-empty halves.
/// Callers only reach this after at least one leaf of the parent range
/// was consumed, so every child is strictly narrower than its parent.
pub(crate) fn split_ranges(idx: u64, end: u64) -> Vec<(u64, u64)> {
    let mid = idx + (end - idx) / 2;
    let mut ranges = Vec::with_capacity(2);
    if idx < mid {
        ranges.push((idx, mid));
    }
    if mid < end {
        ranges.push((mid, end));
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_read_splits_in_half() {
        // One leaf consumed out of [0, 4).
        assert_eq!(split_ranges(1, 4), vec![(1, 2), (2, 4)]);
    }

    #[test]
    fn single_remaining_index_yields_one_child() {
        assert_eq!(split_ranges(1, 2), vec![(1, 2)]);
    }

    #[test]
    fn children_partition_the_remainder() {
        for (idx, end) in [(0u64, 7u64), (3, 100), (10, 11), (0, 2)] {
            let ranges = split_ranges(idx, end);
            assert_eq!(ranges.first().unwrap().0, idx);
            assert_eq!(ranges.last().unwrap().1, end);
            for window in ranges.windows(2) {
                assert_eq!(window[0].1, window[1].0);
            }
            for (s, e) in ranges {
                assert!(s < e);
                if end - idx > 1 {
                    assert!(e - s < end - idx);
                }
            }
        }
    }

    #[test]
    fn children_are_strictly_narrower_once_progress_was_made() {
        // idx > start implies every child is smaller than [start, end).
        let parent = (0u64, 4u64);
        let idx = 1u64;
        for (s, e) in split_ranges(idx, parent.1) {
            assert!(e - s < parent.1 - parent.0);
        }
    }

    #[test]
    fn batch_request_is_bounded() {
        assert_eq!(last_index_to_request(0, 3), 2);
        assert_eq!(last_index_to_request(0, 1_000_000), MAX_BATCH);
        assert_eq!(last_index_to_request(500, 1_000_000), 500 + MAX_BATCH);
    }
}
