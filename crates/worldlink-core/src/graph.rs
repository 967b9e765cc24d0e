//! Id-indexed object store with parent to children adjacency.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::object::{DeltaRecord, GameObject, ObjectId};

/// Graph mutation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Moving {id} under {parent_id} would make it its own ancestor")]
    Cycle { id: ObjectId, parent_id: ObjectId },
}

/// First structural invariant found broken by [`ObjectGraphStore::check_consistency`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("{id} is listed under {listed_under} but its parent is {parent_id:?}")]
    ParentMismatch {
        id: ObjectId,
        listed_under: ObjectId,
        parent_id: Option<ObjectId>,
    },
    #[error("{id} is listed under {listed_under} but no such object exists")]
    DanglingChild { id: ObjectId, listed_under: ObjectId },
    #[error("{id} appears in more than one children list")]
    MultipleParents { id: ObjectId },
    #[error("{id} appears twice under {parent}")]
    DuplicateChild { id: ObjectId, parent: ObjectId },
    #[error("{parent} has an empty children list")]
    EmptyChildren { parent: ObjectId },
    #[error("{id} has parent {parent_id} but is missing from its children list")]
    Unlisted { id: ObjectId, parent_id: ObjectId },
    #[error("{id} is part of a parent cycle")]
    Cycle { id: ObjectId },
}

/// Mirror of the server's object tree.
///
/// Children lists keep arrival order. An absent entry and "no children" are
/// the same thing: empty lists are never stored.
#[derive(Debug, Default)]
pub struct ObjectGraphStore {
    objects: HashMap<ObjectId, GameObject>,
    children: HashMap<ObjectId, Vec<ObjectId>>,
}

impl ObjectGraphStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a delta, creating the object on first sight.
    ///
    /// The stored record is updated in place. A parent that does not exist
    /// yet is fine: the object is reachable through `children_of(parent)` and
    /// becomes part of the tree once the parent arrives.
    ///
    /// # Errors
    /// Returns [`GraphError::Cycle`] if the new parent is the object itself or
    /// one of its descendants. The store is left untouched in that case.
    pub fn apply_delta(&mut self, delta: &DeltaRecord) -> Result<&GameObject, GraphError> {
        let previous_parent = self
            .objects
            .get(&delta.id)
            .and_then(|obj| obj.parent_id.clone());
        let reparent = previous_parent != delta.parent_id;

        if reparent {
            if let Some(parent_id) = &delta.parent_id {
                if self.is_self_or_descendant(parent_id, &delta.id) {
                    tracing::warn!(id = %delta.id, parent_id = %parent_id, "Rejecting cyclic reparent");
                    return Err(GraphError::Cycle {
                        id: delta.id.clone(),
                        parent_id: parent_id.clone(),
                    });
                }
            }
        }

        let object = self
            .objects
            .entry(delta.id.clone())
            .or_insert_with(|| GameObject::new(delta.id.clone()));
        object.merge(delta);

        if reparent {
            if let Some(old) = &previous_parent {
                detach_child(&mut self.children, old, &delta.id);
            }
            if let Some(new) = &delta.parent_id {
                attach_child(&mut self.children, new, &delta.id);
            }
            object.parent_id.clone_from(&delta.parent_id);
            tracing::trace!(id = %delta.id, from = ?previous_parent, to = ?delta.parent_id, "Reparented");
        }

        Ok(object)
    }

    /// Remove an object and its whole subtree.
    ///
    /// Descendants go first (depth-first, post-order). Returns the ids of
    /// every removed object in removal order.
    pub fn remove(&mut self, id: &str) -> Vec<ObjectId> {
        let mut removed = Vec::new();
        self.remove_subtree(id, &mut removed);
        removed
    }

    fn remove_subtree(&mut self, id: &str, removed: &mut Vec<ObjectId>) {
        let children = self.children.get(id).cloned().unwrap_or_default();
        for child in &children {
            self.remove_subtree(child, removed);
        }

        if let Some(object) = self.objects.remove(id) {
            if let Some(parent_id) = &object.parent_id {
                detach_child(&mut self.children, parent_id, id);
            }
            removed.push(object.id);
        }
        self.children.remove(id);
    }

    /// Drop every object.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.children.clear();
    }

    /// Get an object by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&GameObject> {
        self.objects.get(id)
    }

    /// Whether an object is present.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    /// Children of `id` in arrival order. Empty when there are none.
    #[must_use]
    pub fn children_of(&self, id: &str) -> &[ObjectId] {
        self.children.get(id).map_or(&[], Vec::as_slice)
    }

    /// Parent of `obj`, if it is present.
    #[must_use]
    pub fn parent_of(&self, obj: &GameObject) -> Option<&GameObject> {
        obj.parent_id.as_deref().and_then(|p| self.objects.get(p))
    }

    /// Whether `id` is `ancestor` or sits somewhere below it.
    #[must_use]
    pub fn is_self_or_descendant(&self, id: &str, ancestor: &str) -> bool {
        let mut current = Some(id);
        // Bounded so a corrupted chain can never spin.
        for _ in 0..=self.objects.len() {
            match current {
                Some(c) if c == ancestor => return true,
                Some(c) => current = self.objects.get(c).and_then(|o| o.parent_id.as_deref()),
                None => return false,
            }
        }
        false
    }

    /// Number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterate over all objects in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &GameObject> {
        self.objects.values()
    }

    /// Verify the structural invariants.
    ///
    /// # Errors
    /// Returns the first violation found.
    pub fn check_consistency(&self) -> Result<(), InvariantViolation> {
        let mut seen = HashSet::new();
        for (parent, list) in &self.children {
            if list.is_empty() {
                return Err(InvariantViolation::EmptyChildren {
                    parent: parent.clone(),
                });
            }
            let mut local = HashSet::new();
            for id in list {
                if !local.insert(id) {
                    return Err(InvariantViolation::DuplicateChild {
                        id: id.clone(),
                        parent: parent.clone(),
                    });
                }
                if !seen.insert(id) {
                    return Err(InvariantViolation::MultipleParents { id: id.clone() });
                }
                let Some(object) = self.objects.get(id) else {
                    return Err(InvariantViolation::DanglingChild {
                        id: id.clone(),
                        listed_under: parent.clone(),
                    });
                };
                if object.parent_id.as_ref() != Some(parent) {
                    return Err(InvariantViolation::ParentMismatch {
                        id: id.clone(),
                        listed_under: parent.clone(),
                        parent_id: object.parent_id.clone(),
                    });
                }
            }
        }

        for object in self.objects.values() {
            if let Some(parent_id) = &object.parent_id {
                if !seen.contains(&object.id) {
                    return Err(InvariantViolation::Unlisted {
                        id: object.id.clone(),
                        parent_id: parent_id.clone(),
                    });
                }
                if self.is_self_or_descendant(parent_id, &object.id) {
                    return Err(InvariantViolation::Cycle {
                        id: object.id.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn attach_child(children: &mut HashMap<ObjectId, Vec<ObjectId>>, parent: &str, id: &str) {
    let list = children.entry(parent.to_string()).or_default();
    if !list.iter().any(|c| c == id) {
        list.push(id.to_string());
    }
}

fn detach_child(children: &mut HashMap<ObjectId, Vec<ObjectId>>, parent: &str, id: &str) {
    if let Some(list) = children.get_mut(parent) {
        list.retain(|c| c != id);
        if list.is_empty() {
            children.remove(parent);
        }
    }
}
