//! Predicates applied by `ItemStore::query`.

use serde_json::Value;

use crate::models::item::Item;

/// Fields consulted, in order, for an item's date.
const DATE_FIELDS: [&str; 3] = ["created_at", "date", "timestamp"];

/// Inclusive date window over an item's best-effort date field.
///
/// Bounds are compared as strings, so they only order correctly when every
/// date shares one ISO-8601 layout and offset. A bare `end` of `2024-06-30`
/// therefore excludes `2024-06-30T08:00:00Z`, which sorts after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl DateRange {
    pub fn new(start: Option<String>, end: Option<String>) -> Self {
        Self { start, end }
    }

    /// True when neither bound is set.
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Items without a usable date field always match.
    pub fn matches(&self, item: &Item) -> bool {
        let Some(date) = item_date(item) else {
            return true;
        };
        let after_start = self.start.as_deref().is_none_or(|start| start <= date);
        let before_end = self.end.as_deref().is_none_or(|end| date <= end);
        after_start && before_end
    }
}

/// First non-empty string among the date fields.
pub fn item_date(item: &Item) -> Option<&str> {
    DATE_FIELDS
        .iter()
        .filter_map(|field| item.get(*field).and_then(Value::as_str))
        .find(|value| !value.is_empty())
}
