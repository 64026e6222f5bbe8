use std::future::Future;

use crate::error::EngineError;

/// Iterate a paged list operation, invoking `visit` once per page.
///
/// `fetch` receives the continuation token (`None` for the first page) and
/// returns the page plus the next token; an empty or absent token marks the
/// last page and is exactly what the visitor sees as `is_last`. A `None`
/// page skips the visitor but still honours `is_last`. The visitor
/// returning `false` stops iteration; errors stop it immediately. Pages
/// are never buffered.
pub async fn for_each_page<P, F, Fut, V>(mut fetch: F, mut visit: V) -> Result<(), EngineError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Option<P>, Option<String>), EngineError>>,
    V: FnMut(&P, bool) -> bool,
{
    let mut token: Option<String> = None;
    loop {
        let (page, next) = fetch(token.take()).await?;
        let next = next.filter(|t| !t.is_empty());
        let is_last = next.is_none();

        if let Some(page) = &page {
            if !visit(page, is_last) {
                return Ok(());
            }
        }
        if is_last {
            return Ok(());
        }
        token = next;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use converge_core::ApiError;

    use super::*;

    /// Serve `pages` one at a time, counting fetches.
    fn paged_fetch(
        pages: Vec<Vec<u32>>,
        fetches: Arc<AtomicUsize>,
    ) -> impl FnMut(
        Option<String>,
    ) -> std::future::Ready<Result<(Option<Vec<u32>>, Option<String>), EngineError>> {
        move |token| {
            fetches.fetch_add(1, Ordering::SeqCst);
            let i: usize = token.as_deref().map_or(0, |t| t.parse().unwrap());
            let next = (i + 1 < pages.len()).then(|| (i + 1).to_string());
            std::future::ready(Ok((Some(pages[i].clone()), next)))
        }
    }

    #[tokio::test]
    async fn visits_every_page_exactly_once_with_is_last_on_the_final_page() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let mut seen = Vec::new();
        for_each_page(
            paged_fetch(vec![vec![1, 2], vec![3], vec![4, 5]], Arc::clone(&fetches)),
            |page, is_last| {
                seen.push((page.clone(), is_last));
                true
            },
        )
        .await
        .unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 3);
        assert_eq!(
            seen,
            vec![
                (vec![1, 2], false),
                (vec![3], false),
                (vec![4, 5], true),
            ]
        );
    }

    #[tokio::test]
    async fn visitor_returning_false_stops_fetching() {
        let fetches = Arc::new(AtomicUsize::new(0));
        for_each_page(
            paged_fetch(vec![vec![1], vec![2], vec![3]], Arc::clone(&fetches)),
            |_, _| false,
        )
        .await
        .unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_string_token_means_last_page() {
        let mut calls = 0;
        for_each_page(
            |_token| {
                calls += 1;
                std::future::ready(Ok((Some(vec![9u32]), Some(String::new()))))
            },
            |_page: &Vec<u32>, is_last| {
                assert!(is_last);
                true
            },
        )
        .await
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn missing_page_skips_the_visitor() {
        let visits = Arc::new(AtomicUsize::new(0));
        let visits2 = Arc::clone(&visits);
        for_each_page(
            |token: Option<String>| {
                let out = match token {
                    None => Ok((None::<Vec<u32>>, Some("1".to_string()))),
                    Some(_) => Ok((Some(vec![7]), None)),
                };
                std::future::ready(out)
            },
            move |_page, is_last| {
                visits2.fetch_add(1, Ordering::SeqCst);
                assert!(is_last);
                true
            },
        )
        .await
        .unwrap();
        assert_eq!(visits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_errors_stop_iteration_immediately() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let fetches2 = Arc::clone(&fetches);
        let err = for_each_page(
            move |_token: Option<String>| {
                let i = fetches2.fetch_add(1, Ordering::SeqCst);
                let out = if i == 0 {
                    Ok((Some(vec![1u32]), Some("next".to_string())))
                } else {
                    Err(EngineError::Api(ApiError::new("Throttling", "slow down")))
                };
                std::future::ready(out)
            },
            |_, _| true,
        )
        .await
        .unwrap_err();

        assert!(converge_core::is_code(&err, "Throttling"));
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }
}
