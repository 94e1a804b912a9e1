//! Two-level pagination.
//!
//! Sources that only page by offset with a fixed page size are read by
//! repeating page fetches until the pipeline's batch limit is reached or a
//! page comes back empty, then truncating to exactly the limit.

/// Accumulate pages from `fetch(offset, page_size)` into one batch of at
/// most `limit` items.
///
/// `offset` counts items already collected in this call, so a short page
/// is followed by a request starting right after it.
///
/// # Errors
///
/// Propagates the first error returned by `fetch`; pages collected before
/// it are discarded.
pub fn collect_pages<T, E, F>(limit: usize, page_size: usize, mut fetch: F) -> Result<Vec<T>, E>
where
    F: FnMut(u64, usize) -> Result<Vec<T>, E>,
{
    let page_size = page_size.max(1);
    let mut collected: Vec<T> = Vec::new();
    while collected.len() < limit {
        let page = fetch(collected.len() as u64, page_size)?;
        if page.is_empty() {
            break;
        }
        collected.extend(page);
    }
    collected.truncate(limit);
    Ok(collected)
}
