use crate::error::RepoError;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;

/// Hypermedia links echoed by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub next: Option<String>,
}

/// Filter echo on a page envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default)]
    pub path: String,
}

/// Cursor-pagination envelope metadata.
///
/// `has_next` and `next_cursor` together define continuation; a server
/// setting `has_next` without a cursor violates the contract (see
/// [`collect_all`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u64,
    pub returned: u64,
    pub has_next: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub links: Links,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub sort: Vec<String>,
}

impl Pagination {
    /// Envelope for a cache-served result: everything in one page.
    pub fn single_page(returned: u64) -> Self {
        Self {
            limit: returned,
            returned,
            has_next: false,
            next_cursor: None,
            links: Links::default(),
            filters: Filters::default(),
            sort: Vec::new(),
        }
    }
}

/// One page of a paginated collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

/// Walk a cursor-paginated endpoint to completion.
///
/// Fetches the first page with `params` as given, then refetches with
/// `cursor = next_cursor` while `has_next` holds, concatenating the rows
/// of every page in the order received. No dedup is performed across
/// pages. A page claiming `has_next` without a cursor is treated as
/// terminal rather than looping on unchanged parameters.
pub async fn collect_all<T, F, Fut>(
    params: BTreeMap<String, String>,
    mut fetch_page: F,
) -> Result<Vec<T>, RepoError>
where
    F: FnMut(BTreeMap<String, String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, RepoError>>,
{
    let mut params = params;
    let mut page = fetch_page(params.clone()).await?;
    let mut all = Vec::new();

    loop {
        all.append(&mut page.data);
        if !page.pagination.has_next {
            break;
        }
        let Some(cursor) = page.pagination.next_cursor.take() else {
            tracing::warn!("server reported has_next without next_cursor, stopping pagination");
            break;
        };
        params.insert("cursor".to_string(), cursor);
        page = fetch_page(params.clone()).await?;
    }

    Ok(all)
}
