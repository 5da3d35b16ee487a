//! Requests handed to stores.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::PredicateError;
use crate::id::ObjectId;
use crate::model::EntityKind;
use crate::predicate::{parse, Expression};
use crate::value::Value;

use super::node::StoreCacheNode;

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDescriptor {
    pub key: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: true,
        }
    }

    pub fn descending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: false,
        }
    }

    /// Compares two values of this key. Null sorts first when ascending.
    #[must_use]
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ord = a.sort_cmp(b);
        if self.ascending {
            ord
        } else {
            ord.reverse()
        }
    }
}

/// Describes which objects to fetch and how to order them.
///
/// # Example
/// ```rust,ignore
/// let request = FetchRequest::new("Employee")
///     .filter("salary > 1000 && active == true")?
///     .sort_by(SortDescriptor::ascending("name"))
///     .limit(10);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Expression>,
    #[serde(default)]
    pub sort: Vec<SortDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    /// Union in matching unsaved inserts and drop pending deletes.
    pub include_pending_changes: bool,
    /// Also match instances of sub-entities.
    pub include_subentities: bool,
}

impl FetchRequest {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: None,
            sort: Vec::new(),
            limit: None,
            offset: 0,
            include_pending_changes: true,
            include_subentities: true,
        }
    }

    /// A request for the entity a type tag stands for.
    #[must_use]
    pub fn of<T: EntityKind>() -> Self {
        Self::new(T::ENTITY_NAME)
    }

    #[must_use]
    pub fn predicate(mut self, predicate: Expression) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Parses `text` as the predicate.
    pub fn filter(self, text: &str) -> Result<Self, PredicateError> {
        Ok(self.predicate(parse(text)?))
    }

    #[must_use]
    pub fn sort_by(mut self, descriptor: SortDescriptor) -> Self {
        self.sort.push(descriptor);
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub const fn include_pending_changes(mut self, include: bool) -> Self {
        self.include_pending_changes = include;
        self
    }

    #[must_use]
    pub const fn include_subentities(mut self, include: bool) -> Self {
        self.include_subentities = include;
        self
    }

    /// Applies offset then limit.
    pub(crate) fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// The changes of one save, for one store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveChangesRequest {
    /// Full cache nodes of new objects, under their permanent IDs.
    pub inserted: Vec<StoreCacheNode>,
    /// Cache nodes of changed objects. Properties absent from a node are
    /// left as stored.
    pub updated: Vec<StoreCacheNode>,
    pub deleted: Vec<ObjectId>,
}

impl SaveChangesRequest {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let request = FetchRequest::new("Book");
        assert!(request.include_pending_changes);
        assert!(request.include_subentities);
        assert_eq!(request.offset, 0);
        assert!(request.limit.is_none());
    }

    #[test]
    fn test_filter_parses_text() {
        let request = FetchRequest::new("Book").filter("pages > 100").unwrap();
        assert_eq!(
            request.predicate,
            Some(Expression::field("pages").gt(Expression::constant(100)))
        );
        assert!(FetchRequest::new("Book").filter("pages >").is_err());
    }

    #[test]
    fn test_page_applies_offset_then_limit() {
        let request = FetchRequest::new("Book").offset(1).limit(2);
        assert_eq!(request.page(vec![1, 2, 3, 4]), vec![2, 3]);
        let request = FetchRequest::new("Book").offset(5);
        assert!(request.page(vec![1, 2]).is_empty());
    }

    #[test]
    fn test_descending_sort_puts_null_last() {
        let desc = SortDescriptor::descending("pages");
        assert_eq!(desc.compare(&Value::Null, &Value::Int(1)), Ordering::Greater);
        let asc = SortDescriptor::ascending("pages");
        assert_eq!(asc.compare(&Value::Null, &Value::Int(1)), Ordering::Less);
    }
}
