//! Fetching and in-memory predicate evaluation.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::GraphResult;
use crate::predicate::{Expression, Subject};
use crate::storage::FetchRequest;
use crate::value::Value;

use super::object::{ObjectRef, PropertyValue};
use super::ObjectContext;

/// Presents a managed object to the predicate evaluator, faulting it in on
/// first access. Relationships read as object IDs.
struct ObjectSubject<'a> {
    context: &'a mut ObjectContext,
    object: ObjectRef,
}

impl Subject for ObjectSubject<'_> {
    fn value_for_key(&mut self, key: &str) -> GraphResult<Value> {
        self.context.predicate_value(self.object, key)
    }
}

impl ObjectContext {
    fn predicate_value(&mut self, object: ObjectRef, key: &str) -> GraphResult<Value> {
        Ok(match self.value(object, key)? {
            PropertyValue::Attribute(v) => v,
            PropertyValue::ToOne(Some(target)) => Value::Object(self.object_id(target)?),
            PropertyValue::ToOne(None) => Value::Null,
            PropertyValue::ToMany(members) => Value::Objects(
                members
                    .into_iter()
                    .map(|m| self.object_id(m))
                    .collect::<GraphResult<BTreeSet<_>>>()?,
            ),
        })
    }

    /// Evaluates `predicate` against a managed object.
    pub fn evaluate(&mut self, object: ObjectRef, predicate: &Expression) -> GraphResult<bool> {
        self.check(object)?;
        predicate.matches(&mut ObjectSubject {
            context: self,
            object,
        })
    }

    /// Runs a fetch against every store, then applies pending changes,
    /// sorting and paging.
    ///
    /// Each result is the context's unique instance for its ID; objects not
    /// yet registered come back as faults unless sorting or in-memory
    /// filtering had to load them.
    pub fn execute_fetch(&mut self, request: &FetchRequest) -> GraphResult<Vec<ObjectRef>> {
        let model = Arc::clone(self.coordinator().model());
        let entity = model.entity(&request.entity)?;

        let mut seen = BTreeSet::new();
        let mut results = Vec::new();
        for store_id in self.coordinator().stores()? {
            let store = self.coordinator().store(store_id)?;
            for id in store.execute_fetch_request(request)? {
                let object = self.object_with_id(&id)?;
                if request.include_pending_changes && self.is_deleted(object) {
                    continue;
                }
                if seen.insert(object) {
                    results.push(object);
                }
            }
        }
        let persisted = results.len();

        if request.include_pending_changes {
            for object in self.inserted_objects() {
                let obj = self.obj(object)?;
                let kind_matches = if request.include_subentities {
                    obj.entity.is_kind_of(entity.name())
                } else {
                    obj.entity.name() == entity.name()
                };
                if !kind_matches || seen.contains(&object) {
                    continue;
                }
                let matched = match &request.predicate {
                    Some(predicate) => self.evaluate(object, predicate)?,
                    None => true,
                };
                if matched {
                    seen.insert(object);
                    results.push(object);
                }
            }
        }

        if !request.sort.is_empty() {
            let mut keyed = Vec::with_capacity(results.len());
            for object in results {
                let keys = request
                    .sort
                    .iter()
                    .map(|d| self.predicate_value(object, &d.key))
                    .collect::<GraphResult<Vec<_>>>()?;
                keyed.push((object, keys));
            }
            keyed.sort_by(|(_, a), (_, b)| {
                request
                    .sort
                    .iter()
                    .zip(a.iter().zip(b))
                    .map(|(descriptor, (x, y))| descriptor.compare(x, y))
                    .find(|ord| ord.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            results = keyed.into_iter().map(|(object, _)| object).collect();
        }

        let total = results.len();
        let page = request.page(results);
        debug!(
            context = %self.id(),
            entity = %request.entity,
            persisted,
            total,
            returned = page.len(),
            "fetch executed"
        );
        Ok(page)
    }

    /// Number of objects `request` would return.
    pub fn count(&mut self, request: &FetchRequest) -> GraphResult<usize> {
        Ok(self.execute_fetch(request)?.len())
    }
}
