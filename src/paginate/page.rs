//! Page shapes and the page-source seam.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ApiError;

/// One page of a cursor-paginated collection.
///
/// Deserializes from the common list-response shape; the item array may be
/// named `results`, `items` or `data`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Page<T> {
    /// Items of this page, in remote order.
    #[serde(rename = "results", alias = "items", alias = "data")]
    pub items: Vec<T>,
    /// Whether another page follows.
    #[serde(default)]
    pub has_more: bool,
    /// Cursor for the next page.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// A page followed by the page at `next_cursor`.
    pub fn more(items: Vec<T>, next_cursor: impl Into<String>) -> Self {
        Self {
            items,
            has_more: true,
            next_cursor: Some(next_cursor.into()),
        }
    }

    /// The final page.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            has_more: false,
            next_cursor: None,
        }
    }
}

/// Parameters of a single page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Cursor returned by the previous page; `None` for the first page.
    pub cursor: Option<String>,
    /// Requested number of items.
    pub page_size: u32,
}

/// Something that can fetch one page of `T` at a time.
///
/// Implemented by the HTTP page source; closures can be used directly with
/// [`PaginatedFetcher::stream`](super::PaginatedFetcher::stream).
#[async_trait]
pub trait PageSource<T>: Send + Sync {
    /// Fetches the page described by `request`.
    async fn fetch_page(&self, request: PageRequest) -> Result<Page<T>, ApiError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_page_deserializes_results_key() {
        let page: Page<u32> =
            serde_json::from_str(r#"{"results":[1,2],"has_more":true,"next_cursor":"c2"}"#)
                .unwrap();
        assert_eq!(page, Page::more(vec![1, 2], "c2"));
    }

    #[test]
    fn test_page_deserializes_item_aliases() {
        let page: Page<u32> = serde_json::from_str(r#"{"items":[3]}"#).unwrap();
        assert_eq!(page, Page::last(vec![3]));

        let page: Page<u32> =
            serde_json::from_str(r#"{"data":[4],"has_more":false,"next_cursor":null}"#).unwrap();
        assert_eq!(page.items, vec![4]);
    }

    #[test]
    fn test_page_without_items_is_an_error() {
        assert!(serde_json::from_str::<Page<u32>>(r#"{"has_more":false}"#).is_err());
    }
}
