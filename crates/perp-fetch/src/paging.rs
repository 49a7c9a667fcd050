//! Backward paging for time-bounded endpoints (e.g. OKX premium history).
//!
//! Start from `after = now+1`, request up to `limit` rows, dedupe by
//! timestamp, advance `after = min(timestamps)-1`. Stop when the oldest
//! observed timestamp reaches the window start, two consecutive pages
//! yielded zero new rows, the page came back short, or the fetch errored.

use crate::error::FetchResult;
use std::collections::HashSet;
use std::future::Future;

/// One row of a paged response, carrying its own timestamp for dedup/advance.
#[derive(Debug, Clone)]
pub struct PageRow<T> {
    pub ts: i64,
    pub data: T,
}

/// Page backward from `start_after` down to `window_start_ts`, calling
/// `fetch_page(after, limit)` for each page.
pub async fn paginate<T, F, Fut>(
    start_after: i64,
    window_start_ts: i64,
    limit: u32,
    mut fetch_page: F,
) -> FetchResult<Vec<PageRow<T>>>
where
    F: FnMut(i64, u32) -> Fut,
    Fut: Future<Output = FetchResult<Vec<PageRow<T>>>>,
{
    let mut after = start_after;
    let mut seen_ts: HashSet<i64> = HashSet::new();
    let mut rows: Vec<PageRow<T>> = Vec::new();
    let mut consecutive_empty_pages = 0u32;

    loop {
        let page = fetch_page(after, limit).await?;
        let page_len = page.len();

        let mut new_count = 0usize;
        let mut min_ts = i64::MAX;
        for row in page {
            min_ts = min_ts.min(row.ts);
            if seen_ts.insert(row.ts) {
                new_count += 1;
                rows.push(row);
            }
        }

        consecutive_empty_pages = if new_count == 0 { consecutive_empty_pages + 1 } else { 0 };

        let oldest_reached = min_ts != i64::MAX && min_ts <= window_start_ts;
        let short_page = page_len < limit as usize;

        if oldest_reached || consecutive_empty_pages >= 2 || short_page {
            break;
        }

        after = min_ts.saturating_sub(1);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stops_at_window_start() {
        let pages = vec![
            vec![PageRow { ts: 100, data: () }, PageRow { ts: 90, data: () }],
            vec![PageRow { ts: 80, data: () }, PageRow { ts: 70, data: () }],
        ];
        let mut pages = pages.into_iter();
        let rows = paginate(100, 75, 2, move |_after, _limit| {
            let page = pages.next().unwrap_or_default();
            async move { Ok(page) }
        })
        .await
        .unwrap();
        assert_eq!(rows.len(), 4);
    }

    #[tokio::test]
    async fn stops_on_short_page() {
        let rows = paginate(100, 0, 10, |_after, _limit| async move {
            Ok(vec![PageRow { ts: 100, data: () }])
        })
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn dedupes_by_timestamp() {
        let mut calls = 0;
        let rows = paginate(100, 0, 3, move |after, _limit| {
            calls += 1;
            let call = calls;
            async move {
                if call == 1 {
                    Ok(vec![
                        PageRow { ts: 100, data: () },
                        PageRow { ts: 99, data: () },
                        PageRow { ts: 98, data: () },
                    ])
                } else if call == 2 {
                    // Overlapping page: 98 repeats, only 97 is new.
                    assert_eq!(after, 97);
                    Ok(vec![PageRow { ts: 98, data: () }, PageRow { ts: 97, data: () }])
                } else {
                    Ok(vec![])
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(rows.len(), 4);
    }
}
