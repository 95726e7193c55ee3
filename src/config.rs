use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub worker_count: usize,
    pub domain_suffix: String,
    pub log_list_url: String,
    pub slack_webhook_url: Option<String>,
    pub site_base_url: String,
    pub ckan_base_url: String,
    pub ckan_api_key: Option<String>,
    pub ckan_resource_id: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            worker_count: env::var("WORKER_COUNT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("WORKER_COUNT must be a valid number")?,
            domain_suffix: env::var("DOMAIN_SUFFIX").unwrap_or_else(|_| ".gov.au".to_string()),
            log_list_url: env::var("LOG_LIST_URL").unwrap_or_else(|_| {
                "https://www.gstatic.com/ct/log_list/log_list.json".to_string()
            }),
            slack_webhook_url: env::var("SLACK_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
            site_base_url: env::var("SITE_BASE_URL")
                .unwrap_or_else(|_| "https://certwatch.gov.au".to_string()),
            ckan_base_url: env::var("CKAN_BASE_URL")
                .unwrap_or_else(|_| "https://data.gov.au".to_string()),
            ckan_api_key: env::var("CKAN_API_KEY").ok().filter(|s| !s.is_empty()),
            ckan_resource_id: env::var("CKAN_RESOURCE_ID").unwrap_or_default(),
        })
    }

    /// The apex form of the monitored suffix, e.g. `gov.au` for `.gov.au`.
    ///
    /// A domain matches when it ends in the suffix or equals the apex.
    pub fn domain_apex(&self) -> &str {
        self.domain_suffix.trim_start_matches('.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apex_strips_leading_dot() {
        let config = Config {
            database_url: String::new(),
            port: 8080,
            worker_count: 5,
            domain_suffix: ".gov.au".to_string(),
            log_list_url: String::new(),
            slack_webhook_url: None,
            site_base_url: String::new(),
            ckan_base_url: String::new(),
            ckan_api_key: None,
            ckan_resource_id: String::new(),
        };
        assert_eq!(config.domain_apex(), "gov.au");
    }
}
