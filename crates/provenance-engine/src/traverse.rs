//! Backward provenance queries over a log graph.

use crate::operation::{OperationId, OperationLookup, OperationLog};
use crate::operations;

/// One visited record together with the character index being tracked inside its result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraversalStep<'a> {
    pub operation: &'a OperationLog,
    pub char_index: usize,
}

/// Lazy walk from a value's origin back towards the literal or input that produced it.
///
/// Created by [`traverse`].
pub struct Traversal<'a, L: OperationLookup + ?Sized> {
    lookup: &'a L,
    next: Option<(OperationId, usize)>,
    remaining: usize,
}

/// Walk back from `origin`, following the character at `char_index` of its result.
///
/// The first step is `origin` itself. The walk ends when a record has no further step, or
/// the next origin is untracked or unknown to `lookup`. It never visits more records than
/// `lookup` holds, so malformed cyclic graphs still terminate.
pub fn traverse<L: OperationLookup + ?Sized>(
    lookup: &L,
    origin: OperationId,
    char_index: usize,
) -> Traversal<'_, L> {
    Traversal {
        lookup,
        next: Some((origin, char_index)),
        remaining: lookup.operation_count(),
    }
}

impl<'a, L: OperationLookup + ?Sized> Iterator for Traversal<'a, L> {
    type Item = TraversalStep<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (id, char_index) = self.next.take()?;
        if self.remaining == 0 {
            log::warn!("traversal step cap reached at operation #{id}");
            return None;
        }
        self.remaining -= 1;

        let Some(operation) = self.lookup.operation(id) else {
            log::debug!("traversal stopped at unknown operation #{id}");
            return None;
        };
        self.next = operations::traverse_step(operation, char_index);
        Some(TraversalStep {
            operation,
            char_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationArg, OperationKind, RecordedValue, TrackedArg};
    use crate::tracking::OperationArena;
    use indexmap::IndexMap;

    fn log(id: u64, kind: OperationKind, value: Option<u64>) -> OperationLog {
        let mut args = IndexMap::new();
        args.insert(
            "value".to_string(),
            OperationArg::Single(TrackedArg::new(
                RecordedValue::String("v".to_string()),
                value.map(OperationId),
            )),
        );
        OperationLog {
            id: OperationId(id),
            kind,
            args,
            extra_args: IndexMap::new(),
            static_args: IndexMap::new(),
            result: RecordedValue::String("v".to_string()),
            loc: None,
        }
    }

    #[test]
    fn stops_at_unknown_origin() {
        let mut arena = OperationArena::default();
        arena.insert(log(2, OperationKind::Identifier, Some(99)));
        let ids: Vec<_> = traverse(&arena, OperationId(2), 0)
            .map(|step| step.operation.id)
            .collect();
        assert_eq!(ids, vec![OperationId(2)]);
        assert_eq!(traverse(&arena, OperationId(5), 0).count(), 0);
    }

    #[test]
    fn cyclic_graphs_terminate() {
        let mut arena = OperationArena::default();
        arena.insert(log(1, OperationKind::Identifier, Some(2)));
        arena.insert(log(2, OperationKind::Identifier, Some(1)));
        assert_eq!(traverse(&arena, OperationId(1), 0).count(), 2);
    }
}
