use std::future::Future;

use tracing::debug;

use crate::retry::{RateLimitSignal, RateLimitedCaller};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }

    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }
}

/// Drives a cursor-based listing to exhaustion, starting from the empty cursor.
///
/// Items keep the order the remote returned them in; every page fetch goes
/// through [`RateLimitedCaller`].
pub async fn paginate<T, E, F, Fut>(endpoint: &'static str, mut fetch: F) -> Result<Vec<T>, E>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
    E: RateLimitSignal,
{
    let caller = RateLimitedCaller::new(endpoint);
    let mut all = Vec::new();
    let mut cursor = String::new();
    let mut pages = 0usize;

    loop {
        let page = caller.call(|| fetch(cursor.clone())).await?;
        pages += 1;
        all.extend(page.items);

        match page.next_cursor.filter(|next| !next.is_empty()) {
            Some(next) => cursor = next,
            None => break,
        }
    }

    debug!(endpoint, pages, items = all.len(), "sync: pagination complete");
    Ok(all)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum FakeError {
        RateLimited,
        Broken(String),
    }

    impl RateLimitSignal for FakeError {
        fn retry_after(&self) -> Option<Duration> {
            match self {
                Self::RateLimited => Some(Duration::from_millis(1)),
                Self::Broken(_) => None,
            }
        }
    }

    #[tokio::test]
    async fn accumulates_pages_in_call_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let items = paginate("test.list", |cursor| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().expect("lock").push(cursor.clone());
                Ok::<_, FakeError>(match cursor.as_str() {
                    "" => Page::new(vec![3, 1], Some("b".to_string())),
                    "b" => Page::new(vec![2], Some("c".to_string())),
                    _ => Page::new(vec![0], Some(String::new())),
                })
            }
        })
        .await
        .expect("pages");

        assert_eq!(items, vec![3, 1, 2, 0]);
        assert_eq!(*seen.lock().expect("lock"), vec!["", "b", "c"]);
    }

    #[tokio::test]
    async fn retries_a_rate_limited_page_with_the_same_cursor() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let items = paginate("test.list", |cursor| {
            let seen = Arc::clone(&seen);
            async move {
                let attempt = {
                    let mut seen = seen.lock().expect("lock");
                    seen.push(cursor.clone());
                    seen.len()
                };
                match (cursor.as_str(), attempt) {
                    ("", _) => Ok(Page::new(vec!["a"], Some("next".to_string()))),
                    ("next", 2) => Err(FakeError::RateLimited),
                    _ => Ok(Page::last(vec!["b"])),
                }
            }
        })
        .await
        .expect("pages");

        assert_eq!(items, vec!["a", "b"]);
        assert_eq!(*seen.lock().expect("lock"), vec!["", "next", "next"]);
    }

    #[tokio::test]
    async fn surfaces_the_first_unrecovered_error() {
        let result: Result<Vec<u8>, FakeError> = paginate("test.list", |cursor| async move {
            if cursor.is_empty() {
                Ok(Page::new(vec![1], Some("x".to_string())))
            } else {
                Err(FakeError::Broken("boom".to_string()))
            }
        })
        .await;

        assert_eq!(result, Err(FakeError::Broken("boom".to_string())));
    }
}
