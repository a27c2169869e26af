//! Pagination for flight listings (100 flights per page)

use serde::Serialize;

/// Page size constant for all pagination
pub const PAGE_SIZE: i64 = 100;

/// Pagination metadata calculated from total results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: i64,
    pub total_pages: i64,
    /// Offset for SQL LIMIT/OFFSET query
    #[serde(skip)]
    pub offset: i64,
}

/// Clamp the requested page into [1, total_pages] and compute its offset
///
/// ```
/// use flightlog_server::pagination::calculate_pagination;
///
/// let p = calculate_pagination(250, 99);
/// assert_eq!(p.page, 3);
/// assert_eq!(p.offset, 200);
/// ```
pub fn calculate_pagination(total_results: i64, requested_page: i64) -> Pagination {
    let total_pages = (total_results + PAGE_SIZE - 1) / PAGE_SIZE;
    let page = requested_page.max(1).min(total_pages.max(1));
    let offset = (page - 1) * PAGE_SIZE;

    Pagination {
        page,
        total_pages,
        offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_middle_page() {
        let p = calculate_pagination(250, 2);
        assert_eq!((p.page, p.total_pages, p.offset), (2, 3, 100));
    }

    #[test]
    fn test_pagination_clamps_out_of_range() {
        let p = calculate_pagination(150, 0);
        assert_eq!((p.page, p.offset), (1, 0));
        let p = calculate_pagination(150, 99);
        assert_eq!((p.page, p.offset), (2, 100));
    }

    #[test]
    fn test_pagination_empty_year() {
        let p = calculate_pagination(0, 1);
        assert_eq!((p.page, p.total_pages, p.offset), (1, 0, 0));
    }
}
