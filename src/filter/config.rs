use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{Filter, FilterChain, FilterError};
use crate::trace::Category;

/// Filter preset read from a JSON file
///
/// ```json
/// { "categories": { "tick": true, "random": false }, "filters": ["!task=3"] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// Category checkboxes to override; unlisted categories keep their default
    #[serde(default)]
    pub categories: BTreeMap<Category, bool>,

    /// User filter expressions, in chain order
    #[serde(default)]
    pub filters: Vec<String>,
}

impl FilterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FilterError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FilterError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, FilterError> {
        serde_json::from_str(text).map_err(|e| FilterError::InvalidConfig(e.to_string()))
    }

    /// Apply the preset on top of `chain`. Nothing is applied unless every
    /// expression parses.
    pub fn apply_to(&self, chain: &mut FilterChain) -> Result<(), FilterError> {
        let filters = self
            .filters
            .iter()
            .map(|expr| Filter::from_expr(expr))
            .collect::<Result<Vec<_>, _>>()?;

        for (&category, &enabled) in &self.categories {
            chain.set_category(category, enabled);
        }
        for filter in filters {
            let title = filter.title.clone();
            if !chain.add(filter) {
                log::warn!("Filter '{}' listed twice in config", title);
            }
        }
        Ok(())
    }
}
