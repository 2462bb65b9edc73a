use crate::error::Result;
use crate::retry::RetryPolicy;
use std::future::Future;

/// Limits for one paginated fetch pass.
#[derive(Clone, Copy, Debug)]
pub struct FetchWindow {
    /// Number of records wanted.
    pub target_count: usize,
    /// Records requested per page.
    pub page_size: u8,
    /// Hard limit on the number of pages requested.
    pub max_pages: u32,
}

impl FetchWindow {
    /// Most records the page limit lets a pass collect.
    pub fn reach(&self) -> usize {
        (self.page_size as usize).saturating_mul(self.max_pages as usize)
    }

    /// True when `max_pages` full pages can hold `target_count` records.
    pub fn covers_target(&self) -> bool {
        self.reach() >= self.target_count
    }
}

/// Collects the first `window.target_count` records of a paginated resource.
///
/// Pages are requested one at a time, starting at page 1, until enough records have been
/// gathered, the server returns an empty page, or `window.max_pages` pages have been requested.
/// Each page request is retried on transient failures; any other error aborts the pass.
///
/// The result never holds more than `target_count` records. When the window covers its target
/// (see [`FetchWindow::covers_target`], enforced by `AppConfig::validate`), it holds fewer only
/// when the resource ran out first.
pub async fn fetch_all<T, F, Fut>(
    what: &str,
    window: FetchWindow,
    retry: &RetryPolicy,
    mut fetch_page: F,
) -> Result<Vec<T>>
where
    F: FnMut(u32, u8) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    // target_count comes straight from the environment, so it never sizes an allocation
    let mut items: Vec<T> = Vec::new();
    let mut page: u32 = 1;
    let mut exhausted = false;

    while items.len() < window.target_count {
        if page > window.max_pages {
            tracing::warn!(
                "Hit max_github_api_pages ({}) while fetching {} before reaching {} items. Data may be incomplete.",
                window.max_pages,
                what,
                window.target_count
            );
            break;
        }

        let batch = retry
            .run(&format!("fetching {} page {}", what, page), || {
                fetch_page(page, window.page_size)
            })
            .await?;

        tracing::debug!(page, received = batch.len(), "Fetched {} page", what);

        if batch.is_empty() {
            exhausted = true;
            break;
        }

        items.extend(batch);
        page += 1;
    }

    items.truncate(window.target_count);

    if exhausted && items.len() < window.target_count {
        tracing::info!(
            "{} exhausted after {} items (wanted {})",
            what,
            items.len(),
            window.target_count
        );
    }

    Ok(items)
}
