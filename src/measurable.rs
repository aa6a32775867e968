use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Anything that can report when it was last modified.
pub trait TimeMeasurable {
    fn last_modified(&self) -> Option<DateTime<Utc>>;
}

impl TimeMeasurable for DateTime<Utc> {
    fn last_modified(&self) -> Option<DateTime<Utc>> {
        Some(*self)
    }
}

impl TimeMeasurable for Option<DateTime<Utc>> {
    fn last_modified(&self) -> Option<DateTime<Utc>> {
        *self
    }
}

/// Source of the values a policy measures its reference timestamp from.
///
/// Returns `None` for fields that are missing or have no last-modified capability.
pub trait ResolutionContext {
    fn measurable(&self, field: &str) -> Option<&dyn TimeMeasurable>;
}

/// Per-request attributes, inserted into the request extensions by handlers.
#[derive(Clone, Default)]
pub struct RequestAttributes {
    attributes: HashMap<String, Arc<dyn TimeMeasurable + Send + Sync>>,
}

impl RequestAttributes {
    pub fn new() -> RequestAttributes {
        RequestAttributes {
            attributes: HashMap::new(),
        }
    }

    pub fn insert(&mut self, field: &str, value: Arc<dyn TimeMeasurable + Send + Sync>) {
        self.attributes.insert(field.to_string(), value);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.attributes.contains_key(field)
    }
}

impl ResolutionContext for RequestAttributes {
    fn measurable(&self, field: &str) -> Option<&dyn TimeMeasurable> {
        self.attributes
            .get(field)
            .map(|value| value.as_ref() as &dyn TimeMeasurable)
    }
}

impl Debug for RequestAttributes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.attributes.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Article {
        updated_at: Option<DateTime<Utc>>,
    }

    impl TimeMeasurable for Article {
        fn last_modified(&self) -> Option<DateTime<Utc>> {
            self.updated_at
        }
    }

    #[test]
    fn test_lookup() {
        let updated_at = Utc.with_ymd_and_hms(2021, 11, 2, 8, 30, 0).unwrap();
        let mut attributes = RequestAttributes::new();
        attributes.insert("article", Arc::new(Article { updated_at: Some(updated_at) }));
        attributes.insert("draft", Arc::new(Article { updated_at: None }));

        assert!(attributes.contains("article"));
        assert_eq!(attributes.measurable("article").unwrap().last_modified(), Some(updated_at));
        assert_eq!(attributes.measurable("draft").unwrap().last_modified(), None);
        assert!(attributes.measurable("user").is_none());
    }
}
