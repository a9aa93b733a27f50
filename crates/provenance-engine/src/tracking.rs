//! Mutable tracking state threaded through instrumented evaluation.
//!
//! All of it lives in a [`TrackingContext`] owned by the executing host and passed by `&mut`.
//! Whatever writes the tracking register is immediately followed by the one consumer that
//! reads it.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Weak;

use crate::operation::{OperationId, OperationLog, OperationLookup};
use crate::value::{JsObject, Value};

/// Owns every log recorded by a [`TrackingContext`], keyed by id.
#[derive(Debug, Default)]
pub struct OperationArena {
    logs: BTreeMap<OperationId, OperationLog>,
}

impl OperationArena {
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationLog> {
        self.logs.values()
    }

    /// Add `log`, replacing any log with the same id.
    pub fn insert(&mut self, log: OperationLog) {
        self.logs.insert(log.id, log);
    }
}

impl OperationLookup for OperationArena {
    fn operation(&self, id: OperationId) -> Option<&OperationLog> {
        self.logs.get(&id)
    }

    fn operation_count(&self) -> usize {
        self.logs.len()
    }
}

#[derive(Debug)]
enum WeakHandle {
    Object(Weak<RefCell<JsObject>>),
    Array(Weak<RefCell<Vec<Value>>>),
}

impl WeakHandle {
    fn for_value(value: &Value) -> Option<(usize, Self)> {
        match value {
            Value::Object(obj) => Some((obj.identity(), Self::Object(obj.downgrade()))),
            Value::Array(arr) => Some((arr.identity(), Self::Array(arr.downgrade()))),
            _ => None,
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            Self::Object(weak) => weak.strong_count() > 0,
            Self::Array(weak) => weak.strong_count() > 0,
        }
    }

    fn same_allocation(&self, identity: usize) -> bool {
        let ptr = match self {
            Self::Object(weak) => weak.as_ptr() as *const () as usize,
            Self::Array(weak) => weak.as_ptr() as *const () as usize,
        };
        ptr == identity
    }
}

#[derive(Debug)]
struct TrackedObject {
    handle: WeakHandle,
    properties: HashMap<String, OperationId>,
}

/// Maps (object identity, property name) to the origin of that property's latest write.
///
/// Entries hold weak handles only; an object that is otherwise unreachable is dropped and its
/// entry is purged on the next sweep.
#[derive(Debug, Default)]
pub struct PropertyTrackingTable {
    entries: HashMap<usize, TrackedObject>,
    writes_since_sweep: usize,
}

const SWEEP_INTERVAL: usize = 256;

impl PropertyTrackingTable {
    pub fn get(&self, object: &Value, property: &str) -> Option<OperationId> {
        let (key, _) = WeakHandle::for_value(object)?;
        let entry = self.entries.get(&key)?;
        if !entry.handle.is_alive() || !entry.handle.same_allocation(key) {
            return None;
        }
        entry.properties.get(property).copied()
    }

    pub fn set(&mut self, object: &Value, property: &str, origin: OperationId) {
        let Some((key, handle)) = WeakHandle::for_value(object) else {
            log::trace!("ignoring property tracking for non-object value ({property})");
            return;
        };

        self.writes_since_sweep += 1;
        if self.writes_since_sweep >= SWEEP_INTERVAL {
            self.sweep();
        }

        match self.entries.get_mut(&key) {
            Some(entry) if entry.handle.is_alive() => {
                entry.properties.insert(property.to_string(), origin);
            }
            _ => {
                let mut properties = HashMap::new();
                properties.insert(property.to_string(), origin);
                self.entries.insert(key, TrackedObject { handle, properties });
            }
        }
    }

    /// Drop entries whose objects are no longer alive.
    pub fn sweep(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.handle.is_alive());
        self.writes_since_sweep = 0;
        let dropped = before - self.entries.len();
        if dropped > 0 {
            log::debug!("property tracking sweep dropped {dropped} collected objects");
        }
    }

    /// Number of objects with at least one tracked property (including not-yet-swept dead ones).
    pub fn tracked_object_count(&self) -> usize {
        self.entries.len()
    }
}

/// Per-execution tracking state: the log arena, the tracking register and the hand-off slots
/// used between a call site and its callee.
#[derive(Debug)]
pub struct TrackingContext {
    arena: OperationArena,
    next_id: u64,
    last_operation: Option<OperationId>,
    argument_tracking: Option<Vec<OperationId>>,
    last_member_object: Option<(Value, Option<OperationId>)>,
    properties: PropertyTrackingTable,
}

impl Default for TrackingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingContext {
    pub fn new() -> Self {
        Self::starting_at(OperationId(1))
    }

    /// Create a context whose first log gets `first`. Lets several executions feed one store
    /// without id collisions.
    pub fn starting_at(first: OperationId) -> Self {
        Self {
            arena: OperationArena::default(),
            next_id: first.0,
            last_operation: None,
            argument_tracking: None,
            last_member_object: None,
            properties: PropertyTrackingTable::default(),
        }
    }

    pub fn next_id(&mut self) -> OperationId {
        let id = OperationId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Store a log without touching the tracking register.
    pub fn record(&mut self, log: OperationLog) -> OperationId {
        let id = log.id;
        self.arena.insert(log);
        id
    }

    /// Store the log of a completed instrumented operation and publish it in the tracking
    /// register for the syntactically next consumer.
    pub fn complete_operation(&mut self, log: OperationLog) -> OperationId {
        let id = self.record(log);
        self.last_operation = Some(id);
        id
    }

    pub fn last_operation(&self) -> Option<OperationId> {
        self.last_operation
    }

    pub fn set_last_operation(&mut self, origin: Option<OperationId>) {
        self.last_operation = origin;
    }

    pub fn set_argument_tracking(&mut self, args: Option<Vec<OperationId>>) {
        self.argument_tracking = args;
    }

    /// Consume the argument records published by the current call site.
    pub fn take_argument_tracking(&mut self) -> Option<Vec<OperationId>> {
        self.argument_tracking.take()
    }

    pub fn set_last_member_object(&mut self, object: Value, origin: Option<OperationId>) {
        self.last_member_object = Some((object, origin));
    }

    pub fn last_member_object(&self) -> (Value, Option<OperationId>) {
        self.last_member_object
            .clone()
            .unwrap_or((Value::Undefined, None))
    }

    pub fn object_property_tracking(&self, object: &Value, property: &str) -> Option<OperationId> {
        self.properties.get(object, property)
    }

    pub fn track_object_property_assignment(
        &mut self,
        object: &Value,
        property: &str,
        origin: OperationId,
    ) {
        self.properties.set(object, property, origin);
    }

    pub fn property_table(&self) -> &PropertyTrackingTable {
        &self.properties
    }

    pub fn property_table_mut(&mut self) -> &mut PropertyTrackingTable {
        &mut self.properties
    }

    pub fn logs(&self) -> &OperationArena {
        &self.arena
    }

    /// Drain all recorded logs (in id order), e.g. to ship them to a store.
    pub fn take_logs(&mut self) -> Vec<OperationLog> {
        std::mem::take(&mut self.arena.logs).into_values().collect()
    }

    /// Clear the transient hand-off slots. Called when a run finishes so no program value is
    /// kept alive by the context.
    pub fn reset_transient(&mut self) {
        self.argument_tracking = None;
        self.last_member_object = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ObjectRef;

    #[test]
    fn property_table_does_not_keep_objects_alive() {
        let mut table = PropertyTrackingTable::default();
        let obj = Value::Object(ObjectRef::new(JsObject::new()));
        table.set(&obj, "k", OperationId(7));
        assert_eq!(table.get(&obj, "k"), Some(OperationId(7)));
        assert_eq!(table.get(&obj, "other"), None);

        drop(obj);
        table.sweep();
        assert_eq!(table.tracked_object_count(), 0);
    }

    #[test]
    fn distinct_objects_track_independently() {
        let mut table = PropertyTrackingTable::default();
        let a = Value::Object(ObjectRef::new(JsObject::new()));
        let b = Value::Object(ObjectRef::new(JsObject::new()));
        table.set(&a, "k", OperationId(1));
        table.set(&b, "k", OperationId(2));
        assert_eq!(table.get(&a, "k"), Some(OperationId(1)));
        assert_eq!(table.get(&b, "k"), Some(OperationId(2)));
        assert_eq!(table.get(&Value::from("k"), "k"), None);
    }

    fn literal_log(id: OperationId) -> OperationLog {
        OperationLog {
            id,
            kind: crate::operation::OperationKind::NumericLiteral,
            args: Default::default(),
            extra_args: Default::default(),
            static_args: Default::default(),
            result: crate::operation::RecordedValue::Number(1.0),
            loc: None,
        }
    }

    #[test]
    fn complete_operation_sets_register_but_record_does_not() {
        let mut ctx = TrackingContext::new();
        let first = ctx.next_id();
        let second = ctx.next_id();
        assert_eq!((first, second), (OperationId(1), OperationId(2)));

        ctx.record(literal_log(first));
        assert_eq!(ctx.last_operation(), None);
        ctx.complete_operation(literal_log(second));
        assert_eq!(ctx.last_operation(), Some(second));
        assert_eq!(ctx.logs().operation_count(), 2);

        let drained = ctx.take_logs();
        assert_eq!(drained.iter().map(|l| l.id).collect::<Vec<_>>(), vec![first, second]);
        assert!(ctx.logs().is_empty());
    }

    #[test]
    fn argument_tracking_is_consumed_once() {
        let mut ctx = TrackingContext::starting_at(OperationId(100));
        assert_eq!(ctx.next_id(), OperationId(100));
        ctx.set_argument_tracking(Some(vec![OperationId(3)]));
        assert_eq!(ctx.take_argument_tracking(), Some(vec![OperationId(3)]));
        assert_eq!(ctx.take_argument_tracking(), None);
    }
}
