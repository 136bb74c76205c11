//! Page window over filtered browse rows

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Requested page size, or the default when absent or non-positive
pub fn normalize_page_size(requested: Option<i64>) -> i64 {
    requested
        .filter(|size| *size > 0)
        .map_or(DEFAULT_PAGE_SIZE, |size| size.min(MAX_PAGE_SIZE))
}

/// Which slice of `total` rows a page shows
///
/// There is always at least one page, so an empty result still reports
/// page 1 of 1. A page past the end is pulled back to the last page.
///
/// ```
/// use bggweb::pagination::PageWindow;
///
/// let window = PageWindow::new(120, 9, 50);
/// assert_eq!((window.page, window.num_pages, window.offset), (3, 3, 100));
/// assert_eq!(window.bounds(20), (101, 120));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub page_size: i64,
    pub num_pages: i64,
    pub offset: i64,
}

impl PageWindow {
    pub fn new(total: usize, requested_page: i64, page_size: i64) -> Self {
        let page_size = page_size.max(1);
        let num_pages = (total as i64).div_euclid(page_size)
            + i64::from((total as i64).rem_euclid(page_size) != 0);
        let num_pages = num_pages.max(1);
        let page = requested_page.clamp(1, num_pages);

        Self {
            page,
            page_size,
            num_pages,
            offset: (page - 1) * page_size,
        }
    }

    /// 1-based (first, last) row numbers shown; (0, 0) for an empty page
    pub fn bounds(&self, rows_on_page: usize) -> (i64, i64) {
        if rows_on_page == 0 {
            return (0, 0);
        }
        (self.offset + 1, self.offset + rows_on_page as i64)
    }
}
