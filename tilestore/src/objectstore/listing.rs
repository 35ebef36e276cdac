//! Lazy, paginated prefix listings.
//!
//! Layers can hold millions of tiles, so listings are never materialised in
//! one request. [`object_stream`] fetches one page at a time and follows
//! continuation tokens until the store reports the listing is exhausted.
//! [`object_stream_with_retry`] additionally retries page requests that fail
//! transiently, so one throttled page does not end a long listing.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::debug;

use super::traits::{ListPage, ObjectStore, ObjectStoreError, ObjectSummary, MAX_KEYS_PER_PAGE};
use crate::executor::RetryPolicy;

struct ListingState<F> {
    client: Arc<dyn ObjectStore>,
    prefix: String,
    page_size: usize,
    token: Option<String>,
    exhausted: bool,
    retry: RetryPolicy,
    on_retry: F,
}

impl<F> ListingState<F>
where
    F: Fn(&ObjectStoreError) + Send + Sync,
{
    async fn fetch_page(&self, token: Option<String>) -> Result<ListPage, ObjectStoreError> {
        let mut attempt = 1;
        loop {
            match self
                .client
                .list_page(&self.prefix, token.clone(), self.page_size)
                .await
            {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() => match self.retry.delay_for_attempt(attempt) {
                    Some(delay) => {
                        debug!(prefix = self.prefix.as_str(), attempt, ?delay, error = %e, "Retrying listing page");
                        (self.on_retry)(&e);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }
}

/// Streams every object under `prefix`, one page request at a time.
///
/// The next page is only requested once the previous one has been consumed.
/// A failed page request ends the stream with that error.
pub fn object_stream(
    client: Arc<dyn ObjectStore>,
    prefix: impl Into<String>,
    page_size: usize,
) -> BoxStream<'static, Result<ObjectSummary, ObjectStoreError>> {
    object_stream_with_retry(client, prefix, page_size, RetryPolicy::None, |_| {})
}

/// Like [`object_stream`], but retries transiently failing page requests
/// according to `retry`, calling `on_retry` before each retry.
///
/// The stream ends with an error once a page fails permanently or its
/// attempts are exhausted.
pub fn object_stream_with_retry<F>(
    client: Arc<dyn ObjectStore>,
    prefix: impl Into<String>,
    page_size: usize,
    retry: RetryPolicy,
    on_retry: F,
) -> BoxStream<'static, Result<ObjectSummary, ObjectStoreError>>
where
    F: Fn(&ObjectStoreError) + Send + Sync + 'static,
{
    let state = ListingState {
        client,
        prefix: prefix.into(),
        page_size: page_size.clamp(1, MAX_KEYS_PER_PAGE),
        token: None,
        exhausted: false,
        retry,
        on_retry,
    };

    stream::try_unfold(state, |mut state| async move {
        if state.exhausted {
            return Ok(None);
        }

        let token = state.token.take();
        let page = state.fetch_page(token).await?;
        state.exhausted = page.next_token.is_none();
        state.token = page.next_token;

        let objects = stream::iter(page.objects.into_iter().map(Ok::<_, ObjectStoreError>));
        Ok(Some((objects, state)))
    })
    .try_flatten()
    .boxed()
}

/// Returns true if at least one object exists under `prefix`.
pub async fn prefix_exists(client: &dyn ObjectStore, prefix: &str) -> Result<bool, ObjectStoreError> {
    let page = client.list_page(prefix, None, 1).await?;
    Ok(!page.objects.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::MemoryObjectStore;
    use std::collections::HashSet;

    fn populated(count: usize, page_size: usize) -> Arc<MemoryObjectStore> {
        let store = Arc::new(MemoryObjectStore::new().with_page_size(page_size));
        for i in 0..count {
            store.insert(format!("layer/grid/{:04}.png", i), vec![0u8; 4]);
        }
        store.insert("other/0.png", vec![1u8]);
        store
    }

    #[tokio::test]
    async fn test_stream_follows_continuation_tokens() {
        let store = populated(25, 10);
        let client: Arc<dyn ObjectStore> = store.clone();

        let keys: Vec<String> = object_stream(client, "layer/", 1000)
            .map_ok(|o| o.key)
            .try_collect()
            .await
            .unwrap();

        let distinct: HashSet<&String> = keys.iter().collect();
        assert_eq!(keys.len(), 25);
        assert_eq!(distinct.len(), 25);
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_stream_empty_prefix() {
        let store = populated(5, 10);
        let client: Arc<dyn ObjectStore> = store;

        let keys: Vec<ObjectSummary> = object_stream(client, "missing/", 10)
            .try_collect()
            .await
            .unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let store = populated(30, 10);
        let client: Arc<dyn ObjectStore> = store.clone();

        let mut listing = object_stream(client, "layer/", 10);
        let first = listing.try_next().await.unwrap();
        assert!(first.is_some());
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_page_failure_is_retried() {
        let store = populated(25, 10);
        store.fail_next_list_pages(2);
        let client: Arc<dyn ObjectStore> = store.clone();
        let retries = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = retries.clone();

        let keys: Vec<ObjectSummary> = object_stream_with_retry(
            client,
            "layer/",
            10,
            RetryPolicy::fixed(3, std::time::Duration::ZERO),
            move |_| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            },
        )
        .try_collect()
        .await
        .unwrap();

        assert_eq!(keys.len(), 25);
        assert_eq!(retries.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(store.list_calls(), 5);
    }

    #[tokio::test]
    async fn test_plain_stream_does_not_retry() {
        let store = populated(5, 10);
        store.fail_next_list_pages(1);
        let client: Arc<dyn ObjectStore> = store;

        let err = object_stream(client, "layer/", 10)
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_prefix_exists() {
        let store = populated(1, 10);
        assert!(prefix_exists(store.as_ref(), "layer/").await.unwrap());
        assert!(!prefix_exists(store.as_ref(), "nothing/").await.unwrap());
    }
}
