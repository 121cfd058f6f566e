/// Number of list pages needed to show `total` items at `page_size`
/// per page. Always at least 1: an empty or unknown list still gets a
/// single page scan.
pub fn calculate_max_page(total: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return 1;
    }
    total.div_ceil(page_size).max(1)
}

/// Page range for one list walk. An absent count defaults to a single
/// page; a positive `cap` smaller than the computed range wins; a cap
/// of zero or below means unlimited.
pub fn effective_pages(count: Option<u64>, page_size: u64, cap: i64) -> u64 {
    let computed = match count {
        Some(total) => calculate_max_page(total, page_size),
        None => 1,
    };
    if cap > 0 && (cap as u64) < computed {
        cap as u64
    } else {
        computed
    }
}
