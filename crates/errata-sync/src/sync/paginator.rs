//! Upstream paginator
//!
//! Fetches the whole catalog before anything is written. Each response's
//! `pages` value decides whether another page is requested, so a feed whose
//! total shrinks or grows mid-run still terminates; `max_pages` bounds a feed
//! that keeps growing.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::client::UpstreamClient;
use super::models::{ErrataRequest, UpstreamErratum};
use crate::config::UpstreamConfig;
use crate::error::FetchError;

/// Every record of one catalog fetch, in page order
#[derive(Debug, Default)]
pub struct FetchedCatalog {
    pub pages_fetched: u32,
    pub records: Vec<(String, UpstreamErratum)>,
}

/// Keep the last occurrence of each advisory name, in fetch order
///
/// Upstream pages can shift between requests, so the same advisory may show
/// up on two pages; the later copy is the newer one.
pub fn dedupe_by_name<T>(records: Vec<(String, T)>) -> Vec<(String, T)> {
    let last: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.clone(), i))
        .collect();

    records
        .into_iter()
        .enumerate()
        .filter(|(i, (name, _))| last.get(name) == Some(i))
        .map(|(_, record)| record)
        .collect()
}

pub struct Paginator {
    client: Arc<dyn UpstreamClient>,
    page_size: u32,
    page_deadline: Duration,
    max_pages: u32,
    cancel: CancellationToken,
}

impl Paginator {
    pub fn new(client: Arc<dyn UpstreamClient>, config: &UpstreamConfig) -> Self {
        Self {
            client,
            page_size: config.page_size,
            page_deadline: config.page_deadline(),
            max_pages: config.max_pages,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort between (or during) page fetches once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetch page 0 onwards until the last reported page has been covered
    pub async fn fetch_all(
        &self,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchedCatalog, FetchError> {
        let mut catalog = FetchedCatalog::default();
        let mut page = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled { page });
            }

            let request = ErrataRequest::page(page, self.page_size, modified_since);
            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled { page }),
                result = tokio::time::timeout(self.page_deadline, self.client.fetch_page(&request)) => {
                    result.map_err(|_| FetchError::Timeout {
                        page,
                        after: self.page_deadline,
                    })??
                }
            };

            if response.pages > self.max_pages {
                return Err(FetchError::Pagination(format!(
                    "upstream reports {} pages, more than the limit of {}",
                    response.pages, self.max_pages
                )));
            }

            catalog.pages_fetched += 1;
            debug!(
                page,
                pages = response.pages,
                records = response.errata_list.len(),
                "Fetched errata page"
            );
            catalog.records.extend(response.errata_list);

            page += 1;
            if page >= response.pages {
                break;
            }
        }

        let fetched = catalog.records.len();
        catalog.records = dedupe_by_name(catalog.records);
        if catalog.records.len() < fetched {
            debug!(
                duplicates = fetched - catalog.records.len(),
                "Dropped advisories repeated across pages"
            );
        }

        info!(
            pages = catalog.pages_fetched,
            records = catalog.records.len(),
            "Fetched upstream catalog"
        );

        Ok(catalog)
    }
}
