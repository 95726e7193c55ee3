//! Chat webhook notification for a newly discovered certificate.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgConnection;
use tracing::info;

use crate::queue::{Job, JobHandler, NewJob, Outcome};
use crate::WatchContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackArgs {
    /// URL-safe base64 of the store key, used in the cert detail link.
    pub key: String,
    pub domains: Vec<String>,
    pub issuer: String,
}

/// Posts one message per newly stored certificate. Exactly-once relative
/// to the store insert: the job only exists when the insert happened, and
/// a rate-limited attempt hands itself a future copy instead of failing.
pub struct NotifySlack;

#[async_trait]
impl JobHandler for NotifySlack {
    async fn run(
        &self,
        ctx: &WatchContext,
        job: &Job,
        tx: &mut PgConnection,
    ) -> Result<Outcome> {
        // Without a webhook there is nothing to do.
        let Some(hook) = ctx.config.slack_webhook_url.as_deref() else {
            return Ok(Outcome::Done);
        };

        let args: SlackArgs = job.decode()?;
        let payload = json!({
            "text": message_text(&args, &ctx.config.site_base_url),
        });

        let response = ctx
            .http
            .post(hook)
            .json(&payload)
            .send()
            .await
            .context("Failed to post Slack notification")?;

        match response.status() {
            StatusCode::OK => Ok(Outcome::Done),
            StatusCode::TOO_MANY_REQUESTS => {
                let ttl: i64 = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .context("429 from Slack without a usable Retry-After")?;

                info!(ttl, "slack rate limited, coming back later");
                NewJob::raw(job.job_class.clone(), job.args.clone())
                    .at(chrono::Utc::now() + chrono::Duration::seconds(ttl))
                    .enqueue(tx)
                    .await?;
                Ok(Outcome::Done)
            }
            status => anyhow::bail!("bad status from Slack: {status}"),
        }
    }
}

fn message_text(args: &SlackArgs, base_url: &str) -> String {
    format!(
        "*{}* <{}/cert/{}|View...>\n```{}```\n",
        args.issuer,
        base_url,
        args.key,
        args.domains.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_links_cert_and_lists_domains() {
        let args = SlackArgs {
            key: "a2V5".to_string(),
            domains: vec!["a.gov.au".to_string(), "b.gov.au".to_string()],
            issuer: "Example CA".to_string(),
        };
        let text = message_text(&args, "https://certwatch.example");
        assert_eq!(
            text,
            "*Example CA* <https://certwatch.example/cert/a2V5|View...>\n```a.gov.au\nb.gov.au```\n"
        );
    }
}
