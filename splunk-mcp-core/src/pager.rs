//! Bounding and previewing of search results.
//!
//! A result stream is truncated to `max_results`, and only a short preview is
//! kept when the truncated set is larger than one page.

use serde::Serialize;

use crate::Result;
use crate::error::SplunkMcpError;

/// Upper bound on preview length regardless of page size.
pub const PREVIEW_CAP: usize = 100;

/// A bounded view of one query's results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageResult<T> {
    /// First `min(PREVIEW_CAP, page_size, total_count)` records
    pub preview: Vec<T>,
    /// Records kept after truncation to `max_results`
    pub total_count: usize,
    /// Page size the result was cut with
    pub page_size: usize,
    /// Source was clipped or the kept records span more than one page
    pub has_more: bool,
    /// Source had more than `max_results` records
    pub truncated: bool,
    /// The kept records when they fit in one page
    #[serde(skip)]
    page: Vec<T>,
}

impl<T> PageResult<T> {
    /// Number of pages needed for `total_count` records.
    pub fn total_pages(&self) -> usize {
        self.total_count.div_ceil(self.page_size)
    }

    /// Whether every kept record fits in a single page.
    pub fn fits_one_page(&self) -> bool {
        self.total_count <= self.page_size
    }

    /// All kept records when they fit one page, otherwise `None`.
    pub fn full_page(&self) -> Option<&[T]> {
        self.fits_one_page().then_some(self.page.as_slice())
    }
}

/// Bounds `raw_results` to `max_results` and builds the preview.
///
/// At most `max_results + 1` items are pulled from the iterator: the extra
/// one only tells whether the source was clipped.
///
/// # Errors
/// Returns a configuration error if `page_size` is zero.
///
/// # Example
/// ```rust
/// use splunk_mcp_core::pager::paginate;
///
/// let page = paginate(0..5000, 1000, 10_000).unwrap();
/// assert_eq!(page.total_count, 5000);
/// assert_eq!(page.preview.len(), 100);
/// assert!(page.has_more);
/// ```
pub fn paginate<T, I>(raw_results: I, page_size: usize, max_results: usize) -> Result<PageResult<T>>
where
    T: Clone,
    I: IntoIterator<Item = T>,
{
    if page_size == 0 {
        return Err(SplunkMcpError::configuration(
            "page_size must be greater than 0",
        ));
    }

    let mut kept: Vec<T> = raw_results
        .into_iter()
        .take(max_results.saturating_add(1))
        .collect();
    let truncated = kept.len() > max_results;
    kept.truncate(max_results);

    let total_count = kept.len();
    let preview_len = PREVIEW_CAP.min(page_size).min(total_count);
    let preview = kept[..preview_len].to_vec();
    let page = if total_count <= page_size {
        kept
    } else {
        Vec::new()
    };

    Ok(PageResult {
        preview,
        total_count,
        page_size,
        has_more: truncated || total_count > page_size,
        truncated,
        page,
    })
}
