//! Relationship edits with inverse maintenance.
//!
//! Every edit made through the context keeps both sides of a modeled
//! inverse pair consistent: if `a.rel` holds `b` then `b.inverse` holds `a`.
//! Partners are faulted in, and their faulted to-many sets resolved, before
//! they are modified.

use std::collections::BTreeSet;

use tracing::trace;

use crate::error::{ContextError, GraphResult, IdError};
use crate::model::RelationshipDescription;

use super::object::{FaultingSet, ObjectRef, Slot};
use super::ObjectContext;

impl ObjectContext {
    /// Faults in any faulted to-many set at `index`. Other slots are left as
    /// they are.
    pub(crate) fn resolve_to_many(&mut self, object: ObjectRef, index: usize) -> GraphResult<()> {
        let obj = self.obj(object)?;
        match &obj.slots[index] {
            Slot::ToMany(set) if set.faulted => {}
            _ => return Ok(()),
        }
        let id = obj.id.clone();
        let name = obj.entity.properties()[index].name().to_string();

        let members = if id.is_temporary() {
            BTreeSet::new()
        } else {
            let store = self.coordinator().route(&id)?;
            store
                .get_to_many_relationship_value(&id, &name)?
                .iter()
                .map(|member| self.object_with_id(member))
                .collect::<GraphResult<BTreeSet<_>>>()?
        };
        trace!(%id, relationship = %name, members = members.len(), "to-many fault resolved");

        if let Slot::ToMany(set) = &mut self.obj_mut(object)?.slots[index] {
            *set = FaultingSet::loaded(members);
        }
        Ok(())
    }

    /// Checks that `target` may be stored in `relationship`.
    pub(crate) fn check_destination(
        &self,
        relationship: &RelationshipDescription,
        target: ObjectRef,
    ) -> GraphResult<()> {
        let entity = self.entity_of(target)?;
        if entity.is_kind_of(relationship.destination()) {
            return Ok(());
        }
        Err(ContextError::InvalidValue {
            property: relationship.name().to_string(),
            expected: relationship.destination().to_string(),
            actual: entity.name().to_string(),
        }
        .into())
    }

    fn relationship_at(&self, object: ObjectRef, index: usize) -> GraphResult<RelationshipDescription> {
        let entity = self.entity_of(object)?;
        entity.properties()[index]
            .as_relationship()
            .cloned()
            .ok_or_else(|| {
                ContextError::InvalidValue {
                    property: entity.properties()[index].name().to_string(),
                    expected: "relationship".to_string(),
                    actual: "attribute".to_string(),
                }
                .into()
            })
    }

    fn holds_set(&self, object: ObjectRef, index: usize) -> GraphResult<bool> {
        Ok(matches!(self.obj(object)?.slots[index], Slot::ToMany(_)))
    }

    fn current_to_one(&self, object: ObjectRef, index: usize) -> GraphResult<Option<ObjectRef>> {
        Ok(match &self.obj(object)?.slots[index] {
            Slot::ToOne(target) => *target,
            _ => None,
        })
    }

    pub(crate) fn current_members(&self, object: ObjectRef, index: usize) -> GraphResult<BTreeSet<ObjectRef>> {
        Ok(match &self.obj(object)?.slots[index] {
            Slot::ToMany(set) => set.members.clone(),
            _ => BTreeSet::new(),
        })
    }

    // Raw writes: no inverse handling, but change tracking and events.

    fn write_to_one(&mut self, object: ObjectRef, index: usize, target: Option<ObjectRef>) -> GraphResult<()> {
        self.obj_mut(object)?.slots[index] = Slot::ToOne(target);
        self.did_change(object, index);
        Ok(())
    }

    fn write_insert(&mut self, object: ObjectRef, index: usize, member: ObjectRef) -> GraphResult<()> {
        let obj = self.obj_mut(object)?;
        if !matches!(obj.slots[index], Slot::ToMany(_)) {
            obj.slots[index] = Slot::ToMany(FaultingSet::default());
        }
        if let Slot::ToMany(set) = &mut obj.slots[index] {
            set.members.insert(member);
        }
        self.did_change(object, index);
        Ok(())
    }

    fn write_remove(&mut self, object: ObjectRef, index: usize, member: ObjectRef) -> GraphResult<()> {
        let removed = match &mut self.obj_mut(object)?.slots[index] {
            Slot::ToMany(set) => set.members.remove(&member),
            _ => false,
        };
        if removed {
            self.did_change(object, index);
        }
        Ok(())
    }

    /// Loads `object` and the relationship named `name` on it, returning the
    /// property index.
    fn prepare(&mut self, object: ObjectRef, name: &str) -> GraphResult<usize> {
        let index = self.property_index(object, name)?;
        self.fault_in_object(object)?;
        self.resolve_to_many(object, index)?;
        Ok(index)
    }

    /// Points `partner.inverse` back at `owner`, whose relationship
    /// `relationship` now holds `partner`.
    fn link_inverse(
        &mut self,
        partner: ObjectRef,
        inverse: &str,
        owner: ObjectRef,
        relationship: &str,
    ) -> GraphResult<()> {
        let index = self.prepare(partner, inverse)?;
        if self.holds_set(partner, index)? {
            return self.write_insert(partner, index, owner);
        }
        let previous = self.current_to_one(partner, index)?;
        if previous == Some(owner) {
            return Ok(());
        }
        // The partner can only point back at one owner; detach it from the
        // previous one.
        if let Some(previous) = previous {
            let prev_index = self.prepare(previous, relationship)?;
            if self.holds_set(previous, prev_index)? {
                self.write_remove(previous, prev_index, partner)?;
            } else if self.current_to_one(previous, prev_index)? == Some(partner) {
                self.write_to_one(previous, prev_index, None)?;
            }
        }
        self.write_to_one(partner, index, Some(owner))
    }

    /// Removes `owner` from `partner.inverse`.
    fn unlink_inverse(&mut self, partner: ObjectRef, inverse: &str, owner: ObjectRef) -> GraphResult<()> {
        let index = self.prepare(partner, inverse)?;
        if self.holds_set(partner, index)? {
            self.write_remove(partner, index, owner)
        } else if self.current_to_one(partner, index)? == Some(owner) {
            self.write_to_one(partner, index, None)
        } else {
            Ok(())
        }
    }

    /// Sets a to-one relationship of a loaded object.
    pub(crate) fn set_to_one(
        &mut self,
        object: ObjectRef,
        index: usize,
        target: Option<ObjectRef>,
    ) -> GraphResult<()> {
        let old = self.current_to_one(object, index)?;
        if old == target {
            return Ok(());
        }
        let relationship = self.relationship_at(object, index)?;
        if let Some(inverse) = relationship.inverse() {
            if let Some(old) = old {
                self.unlink_inverse(old, inverse, object)?;
            }
            if let Some(target) = target {
                self.link_inverse(target, inverse, object, relationship.name())?;
            }
        }
        self.write_to_one(object, index, target)?;

        if let Some(target) = target {
            self.adopt_unsaved(object)?;
            self.adopt_unsaved(target)?;
        }
        Ok(())
    }

    /// Adds `member` to a to-many relationship of a loaded object.
    pub(crate) fn add_member(
        &mut self,
        object: ObjectRef,
        index: usize,
        member: ObjectRef,
        relationship: &RelationshipDescription,
    ) -> GraphResult<()> {
        self.resolve_to_many(object, index)?;
        if self.current_members(object, index)?.contains(&member) {
            return Ok(());
        }
        if let Some(inverse) = relationship.inverse() {
            self.link_inverse(member, inverse, object, relationship.name())?;
        }
        self.write_insert(object, index, member)?;

        self.adopt_unsaved(object)?;
        self.adopt_unsaved(member)
    }

    /// Inserts an object that has never been saved and is not inserted,
    /// such as a new object discarded by `delete_object`. Anything that is
    /// linked into the graph must be saved with it.
    fn adopt_unsaved(&mut self, object: ObjectRef) -> GraphResult<()> {
        if self.obj(object)?.id.is_temporary() && !self.is_inserted(object) {
            self.insert_object(object)?;
        }
        Ok(())
    }

    /// Removes `member` from a to-many relationship of a loaded object.
    ///
    /// With `apply_policy`, a never-saved member is deleted afterwards when
    /// the context is configured to do so.
    pub(crate) fn remove_member(
        &mut self,
        object: ObjectRef,
        index: usize,
        member: ObjectRef,
        relationship: &RelationshipDescription,
        apply_policy: bool,
    ) -> GraphResult<()> {
        self.resolve_to_many(object, index)?;
        if !self.current_members(object, index)?.contains(&member) {
            return Ok(());
        }
        self.write_remove(object, index, member)?;
        if let Some(inverse) = relationship.inverse() {
            self.unlink_inverse(member, inverse, object)?;
        }

        if apply_policy && self.config().delete_new_on_remove && self.is_inserted(member) {
            self.delete_object(member)?;
        }
        Ok(())
    }

    /// Replaces the members of a to-many relationship by diffing against the
    /// current members.
    pub(crate) fn replace_to_many(
        &mut self,
        object: ObjectRef,
        index: usize,
        relationship: &RelationshipDescription,
        members: Vec<ObjectRef>,
    ) -> GraphResult<()> {
        self.resolve_to_many(object, index)?;
        let current = self.current_members(object, index)?;
        let wanted: BTreeSet<ObjectRef> = members.into_iter().collect();
        if current == wanted {
            return Ok(());
        }
        for member in current.difference(&wanted) {
            self.remove_member(object, index, *member, relationship, true)?;
        }
        for member in wanted.difference(&current) {
            self.add_member(object, index, *member, relationship)?;
        }
        Ok(())
    }

    /// Nullifies every relationship of `object`, updating inverses.
    pub(crate) fn detach_relationships(&mut self, object: ObjectRef) -> GraphResult<()> {
        let entity = self.entity_of(object)?;
        self.fault_in_object(object)?;
        for (index, property) in entity.properties().iter().enumerate() {
            let Some(relationship) = property.as_relationship() else {
                continue;
            };
            if relationship.is_to_many() {
                self.resolve_to_many(object, index)?;
                for member in self.current_members(object, index)? {
                    self.remove_member(object, index, member, relationship, false)?;
                }
            } else if self.current_to_one(object, index)?.is_some() {
                self.set_to_one(object, index, None)?;
            }
        }
        Ok(())
    }

    /// A live view of a to-many relationship.
    pub fn related(&mut self, object: ObjectRef, name: &str) -> GraphResult<RelatedSet<'_>> {
        let index = self.property_index(object, name)?;
        let relationship = self.relationship_at(object, index)?;
        if !relationship.is_to_many() {
            return Err(ContextError::InvalidValue {
                property: name.to_string(),
                expected: "to-many relationship".to_string(),
                actual: "to-one relationship".to_string(),
            }
            .into());
        }
        Ok(RelatedSet {
            context: self,
            owner: object,
            index,
            relationship,
        })
    }
}

/// A to-many relationship of one object, borrowed from its context.
///
/// Membership is loaded from the store on first access. Edits maintain the
/// inverse relationship like [`ObjectContext::set_value`] does.
#[derive(Debug)]
pub struct RelatedSet<'a> {
    context: &'a mut ObjectContext,
    owner: ObjectRef,
    index: usize,
    relationship: RelationshipDescription,
}

impl RelatedSet<'_> {
    #[must_use]
    pub const fn owner(&self) -> ObjectRef {
        self.owner
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.relationship.name()
    }

    /// True until membership has been loaded.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.context.obj(self.owner).map_or(true, |obj| {
            obj.is_fault()
                || match &obj.slots[self.index] {
                    Slot::ToMany(set) => set.faulted,
                    _ => true,
                }
        })
    }

    fn load(&mut self) -> GraphResult<BTreeSet<ObjectRef>> {
        self.context.fault_in_object(self.owner)?;
        self.context.resolve_to_many(self.owner, self.index)?;
        self.context.current_members(self.owner, self.index)
    }

    pub fn len(&mut self) -> GraphResult<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&mut self) -> GraphResult<bool> {
        Ok(self.load()?.is_empty())
    }

    pub fn contains(&mut self, member: ObjectRef) -> GraphResult<bool> {
        Ok(self.load()?.contains(&member))
    }

    /// Members in registration order.
    pub fn to_vec(&mut self) -> GraphResult<Vec<ObjectRef>> {
        Ok(self.load()?.into_iter().collect())
    }

    pub fn add(&mut self, member: ObjectRef) -> GraphResult<()> {
        self.context.check_destination(&self.relationship, member)?;
        self.load()?;
        self.context
            .add_member(self.owner, self.index, member, &self.relationship)
    }

    pub fn remove(&mut self, member: ObjectRef) -> GraphResult<()> {
        self.context.check(member)?;
        self.load()?;
        self.context
            .remove_member(self.owner, self.index, member, &self.relationship, true)
    }

    /// Removes every member, clearing each member's inverse.
    pub fn clear(&mut self) -> GraphResult<()> {
        for member in self.load()? {
            self.context
                .remove_member(self.owner, self.index, member, &self.relationship, false)?;
        }
        Ok(())
    }

    /// Resolves the members, by ID, in another context on the same
    /// coordinator.
    ///
    /// Members that have never been saved have no ID the other context can
    /// resolve and fail with [`IdError::TemporaryId`].
    pub fn clone_into(&mut self, target: &mut ObjectContext) -> GraphResult<Vec<ObjectRef>> {
        if target.coordinator().id() != self.context.coordinator().id() {
            return Err(ContextError::IncompatibleContext.into());
        }
        let mut ids = Vec::new();
        for member in self.load()? {
            let id = self.context.object_id(member)?;
            if id.is_temporary() {
                return Err(IdError::TemporaryId { uri: id.to_string() }.into());
            }
            ids.push(id);
        }
        ids.iter().map(|id| target.object_with_id(id)).collect()
    }
}
