//! Picks the page that serves a request path.

use crate::domain::pages::Page;
use crate::domain::pattern::{Tokens, match_path};

use super::directory::DirectorySnapshot;

/// A page selected for a path, with the pattern that selected it.
#[derive(Debug, Clone, PartialEq)]
pub struct PageMatch {
    pub pattern: String,
    pub tokens: Tokens,
    pub page: Page,
}

/// Every pattern in `snapshot` that matches `path`, in snapshot order.
pub fn matching_pages<'a>(
    snapshot: &'a DirectorySnapshot,
    path: &'a str,
) -> impl Iterator<Item = PageMatch> + 'a {
    snapshot.entries().iter().filter_map(move |entry| {
        match_path(&entry.pattern, path).map(|tokens| PageMatch {
            pattern: entry.pattern.clone(),
            tokens,
            page: entry.page.clone(),
        })
    })
}

/// The first matching pattern wins. There is no specificity ranking: a
/// catch-all registered before a literal shadows it.
pub fn find_matching_page(snapshot: &DirectorySnapshot, path: &str) -> Option<PageMatch> {
    matching_pages(snapshot, path).next()
}
