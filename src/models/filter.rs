use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::meal::Meal;

/// Listing filters understood by `GET /meal` and by offline page synthesis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealFilter {
    /// Keep meals whose comment starts with this text.
    pub by_comment: Option<String>,
    /// Keep meals whose eaten flag equals this value.
    pub is_eaten: Option<bool>,
}

impl MealFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_comment(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.by_comment = if prefix.is_empty() { None } else { Some(prefix) };
        self
    }

    pub fn with_eaten(mut self, eaten: bool) -> Self {
        self.is_eaten = Some(eaten);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.by_comment.is_none() && self.is_eaten.is_none()
    }

    pub fn matches(&self, meal: &Meal) -> bool {
        if let Some(prefix) = &self.by_comment {
            if !meal.comment.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(eaten) = self.is_eaten {
            if meal.eaten != eaten {
                return false;
            }
        }
        true
    }

    /// Cache key suffix for the batch holding `page` under these filters.
    ///
    /// Computed as hex(sha256("page:<n>|comment:<c>|eaten:<e>")[0:8]).
    pub fn fingerprint(&self, page: u32) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("page:{}", page).as_bytes());
        hasher.update(b"|comment:");
        if let Some(prefix) = &self.by_comment {
            hasher.update(prefix.as_bytes());
        }
        hasher.update(b"|eaten:");
        match self.is_eaten {
            Some(true) => hasher.update(b"true"),
            Some(false) => hasher.update(b"false"),
            None => hasher.update(b"any"),
        }
        let hash = hasher.finalize();
        hash[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }
}
