//! Variable-reference allocation. References are session-local and valid
//! only within the pause cycle that issued them.
use std::collections::HashMap;
use std::hash::Hash;

/// References `1..=MAX_FRAME_REFS` are reserved for stack-frame locals
/// (frame index + 1).
pub const MAX_FRAME_REFS: i64 = 0xfff;
/// Fixed reference for the global object, re-seeded on every pause.
pub const GLOBAL_OBJECT_REF: i64 = MAX_FRAME_REFS + 1;
/// First reference handed out for arbitrary structured objects.
pub const OBJECT_REFS_START: i64 = GLOBAL_OBJECT_REF + 1;

/// Object ↔ reference table for one pause cycle. Cleared and re-seeded with
/// the global object each time the engine pauses; a handle issued in an
/// earlier pause simply fails lookup — it is never silently rebound, even
/// though its numeric value may be reissued for a different object.
pub(crate) struct RefTable<O> {
    next: i64,
    object_to_id: HashMap<O, i64>,
    id_to_object: HashMap<i64, O>,
}

impl<O> RefTable<O>
where
    O: Clone + Eq + Hash,
{
    pub(crate) fn new() -> Self {
        Self {
            next: OBJECT_REFS_START,
            object_to_id: HashMap::new(),
            id_to_object: HashMap::new(),
        }
    }

    pub(crate) fn reset(&mut self, global: Option<O>) {
        self.object_to_id.clear();
        self.id_to_object.clear();
        self.next = OBJECT_REFS_START;
        if let Some(global) = global {
            self.object_to_id.insert(global.clone(), GLOBAL_OBJECT_REF);
            self.id_to_object.insert(GLOBAL_OBJECT_REF, global);
        }
    }

    /// Reference for `object`: the memoized one if it was already seen this
    /// pause, the next sequential id otherwise.
    pub(crate) fn reference_for(&mut self, object: O) -> i64 {
        if let Some(&id) = self.object_to_id.get(&object) {
            return id;
        }
        let id = self.next;
        self.next += 1;
        self.object_to_id.insert(object.clone(), id);
        self.id_to_object.insert(id, object);
        id
    }

    pub(crate) fn lookup(&self, reference: i64) -> Option<&O> {
        self.id_to_object.get(&reference)
    }
}
