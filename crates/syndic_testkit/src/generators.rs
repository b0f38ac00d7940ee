//! Property-based test generators using proptest.
//!
//! Documents generated here are always acyclic with flat dependency lists,
//! but their object order is shuffled.

use crate::fixtures::{document, object, uuid};
use proptest::prelude::*;
use std::collections::BTreeSet;
use syndic_cdf::CdfDocument;
use uuid::Uuid;

/// Strategy for acyclic documents of 1 to `max_objects` objects.
///
/// Object `i` (UUID `i + 1`) may only depend on objects with a smaller index.
/// Every object lists its transitive dependencies.
pub fn dag_document_strategy(max_objects: usize, origin: Uuid) -> impl Strategy<Value = CdfDocument> {
    (1..=max_objects.max(1))
        .prop_flat_map(|n| {
            (
                prop::collection::vec(prop::collection::vec(any::<bool>(), n), n),
                Just((0..n).collect::<Vec<usize>>()).prop_shuffle(),
            )
        })
        .prop_map(move |(edges, order)| {
            let closure = transitive_dependencies(&edges);
            document(order.into_iter().map(|i| {
                let deps: Vec<u128> = closure[i].iter().map(|&j| j as u128 + 1).collect();
                object(i as u128 + 1, origin, &deps)
            }))
        })
}

/// Strategy for a shuffled dependency chain `1 <- 2 <- ... <- n`.
pub fn chain_document_strategy(max_len: usize, origin: Uuid) -> impl Strategy<Value = CdfDocument> {
    (1..=max_len.max(1))
        .prop_flat_map(|n| Just((1..=n as u128).collect::<Vec<u128>>()).prop_shuffle())
        .prop_map(move |order| {
            document(order.into_iter().map(|n| {
                let deps: Vec<u128> = (1..n).collect();
                object(n, origin, &deps)
            }))
        })
}

fn transitive_dependencies(edges: &[Vec<bool>]) -> Vec<BTreeSet<usize>> {
    let mut closure: Vec<BTreeSet<usize>> = Vec::with_capacity(edges.len());
    for (i, row) in edges.iter().enumerate() {
        let mut deps = BTreeSet::new();
        for j in (0..i).filter(|&j| row[j]) {
            deps.insert(j);
            deps.extend(closure[j].iter().copied());
        }
        closure.push(deps);
    }
    closure
}

/// Checks that `order` lists every dependency before its dependents.
pub fn respects_dependencies(document: &CdfDocument, order: &[Uuid]) -> bool {
    let position = |u: &Uuid| order.iter().position(|o| o == u);
    document.entities().all(|object| {
        let Some(own) = position(&object.uuid) else {
            return false;
        };
        object
            .dependency_uuids()
            .iter()
            .all(|dep| position(dep).is_some_and(|p| p < own))
    })
}

/// The UUID at generator index `i`.
pub fn generated_uuid(i: usize) -> Uuid {
    uuid(i as u128 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_dependencies_stay_inside_document(doc in dag_document_strategy(8, uuid(100))) {
            prop_assert!(doc.missing_dependencies().is_empty());
            for object in doc.entities() {
                prop_assert!(!object.depends_on(&object.uuid));
            }
        }
    }

    #[test]
    fn closure_is_transitive() {
        let edges = vec![
            vec![false, false, false],
            vec![true, false, false],
            vec![false, true, false],
        ];
        let closure = transitive_dependencies(&edges);
        assert_eq!(closure[2], BTreeSet::from([0, 1]));
    }

    #[test]
    fn order_check() {
        let doc = crate::fixtures::document([object(1, uuid(100), &[]), object(2, uuid(100), &[1])]);
        assert!(respects_dependencies(&doc, &[uuid(1), uuid(2)]));
        assert!(!respects_dependencies(&doc, &[uuid(2), uuid(1)]));
    }
}
