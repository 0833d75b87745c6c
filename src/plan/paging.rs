//! Pagination policy and continuation links

use urlencoding::encode;

use crate::config::Limits;
use crate::query::QueryDescription;

/// Effective page size.
///
/// Clamped to `min(requested-or-default, hard max)`. A result of zero
/// means "no limit", not "no rows".
pub fn effective_limit(top: Option<u64>, limits: &Limits) -> Option<u64> {
    let requested = top.or(limits.default_page_size)?;
    let n = requested.min(limits.hard_max());
    (n > 0).then_some(n)
}

/// Effective offset; zero normalizes to "no skip"
pub fn effective_skip(skip: Option<u64>) -> Option<u64> {
    skip.filter(|&n| n > 0)
}

/// Continuation link for a full page.
///
/// Emitted only when `$top` was requested explicitly and the page holds at
/// least that many rows.
pub fn next_link(query: &QueryDescription, base_url: Option<&str>, returned: usize) -> Option<String> {
    let top = query.top.filter(|&t| t > 0)?;
    if (returned as u64) < top {
        return None;
    }

    let mut parts = vec![
        format!("$top={}", top),
        format!("$skip={}", query.skip.unwrap_or(0) + top),
    ];
    if !query.select.is_empty() {
        parts.push(format!("$select={}", encode(&query.select.join(","))));
    }
    if !query.order_by.is_empty() {
        let order: Vec<String> = query
            .order_by
            .iter()
            .map(|o| format!("{} {}", o.field, o.direction))
            .collect();
        parts.push(format!("$orderby={}", encode(&order.join(","))));
    }
    if let Some(count) = query.count {
        parts.push(format!("$count={}", count));
    }
    if let Some(filter) = query.raw_filter() {
        parts.push(format!("$filter={}", encode(filter)));
    }
    if !query.expand.is_empty() {
        let paths: Vec<&str> = query.expand.iter().map(|e| e.path.as_str()).collect();
        parts.push(format!("$expand={}", encode(&paths.join(","))));
    }

    let qs = parts.join("&");
    Some(match base_url.filter(|b| !b.is_empty()) {
        Some(base) => format!("{}?{}", base, qs),
        None => format!("?{}", qs),
    })
}
