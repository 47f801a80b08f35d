use serde::{Deserialize, Serialize};

use super::meal::Meal;

/// One page of meals as returned by `GET /meal`, with the page's etag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub page: u32,
    pub items: Vec<Meal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl Batch {
    pub fn new(page: u32, items: Vec<Meal>, etag: Option<String>) -> Self {
        Self { page, items, etag }
    }

    /// A page is terminal when it holds fewer items than the page size.
    pub fn is_last(&self, page_size: usize) -> bool {
        self.items.len() < page_size
    }
}
