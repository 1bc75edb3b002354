//! Edge policies and the resolver that applies them.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use uuid::Uuid;

use super::graph::{DependencyGraph, Edge, EdgeKind};
use super::plan::{BlockReason, Detachment, PreserveReason};
use super::{EntityKind, EntityRef};
use crate::store::ReferenceLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Deleting the source is refused while the dependent survives.
    Block,
    /// Like [`Policy::Block`], but a forced delete cascades instead.
    BlockUnlessForced,
    /// The dependent is deleted together with the source.
    Cascade,
    /// The dependent is deleted unless something outside the deletion still uses it.
    CascadeUnlessShared,
    /// The dependent survives; the nullable link between the two is cleared.
    Detach,
}

/// The one place deletion behaviour per relationship is decided.
pub const POLICY_TABLE: &[(EdgeKind, Policy)] = &[
    (EdgeKind::DocumentRevision, Policy::Cascade),
    (EdgeKind::RevisionReference, Policy::Block),
    (EdgeKind::DocumentReference, Policy::BlockUnlessForced),
    (EdgeKind::ReferenceDerivedRevision, Policy::CascadeUnlessShared),
    (EdgeKind::ReferenceAuxiliary, Policy::Detach),
    (EdgeKind::ReferencePrimary, Policy::Detach),
    (EdgeKind::RevisionDerivedReference, Policy::Detach),
    (EdgeKind::AuxiliaryReference, Policy::Detach),
];

pub fn policy_for(kind: EdgeKind) -> Policy {
    POLICY_TABLE
        .iter()
        .find(|(edge, _)| *edge == kind)
        .map(|(_, policy)| *policy)
        .unwrap_or(Policy::Block)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Delete,
    Detach(Detachment),
    Block(BlockReason),
    Preserve(PreserveReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub entity: EntityRef,
    pub action: Action,
}

impl Resolution {
    fn new(entity: EntityRef, action: Action) -> Self {
        Self { entity, action }
    }
}

/// Resolves every edge of `graph` into `(entity, action)` pairs.
///
/// The deletion closure is grown from the target through cascading edges
/// until nothing new is added. Shared derived revisions are decided only
/// after the closure is complete, so "other users" always means references
/// that survive the whole operation.
pub fn resolve(graph: &DependencyGraph, force: bool) -> Vec<Resolution> {
    let mut resolver = Resolver {
        graph,
        force,
        deleting: BTreeSet::new(),
        out: Vec::new(),
    };
    resolver.check_target_revision();
    let (forced_out, candidates) = resolver.close_over_cascades();
    resolver.block_referenced_documents(&forced_out);
    resolver.decide_candidates(candidates);
    resolver.block_revisions_in_use(&forced_out);
    resolver.detach_survivors();

    for entity in &resolver.deleting {
        resolver.out.push(Resolution::new(*entity, Action::Delete));
    }
    resolver.out
}

struct Resolver<'g> {
    graph: &'g DependencyGraph,
    force: bool,
    deleting: BTreeSet<EntityRef>,
    out: Vec<Resolution>,
}

impl Resolver<'_> {
    fn check_target_revision(&mut self) {
        let target = self.graph.target;
        if target.kind != EntityKind::Revision {
            return;
        }
        let Some(revision) = self.graph.revisions.get(&target.id) else {
            return;
        };

        let count = self.graph.revision_count(revision.document_id);
        let reason = if count <= 1 {
            BlockReason::LastRevision {
                revision_id: revision.id,
                document_id: revision.document_id,
            }
        } else if revision.is_original {
            BlockReason::OriginalRevision {
                revision_id: revision.id,
                sibling_count: (count - 1) as usize,
            }
        } else {
            return;
        };
        self.out.push(Resolution::new(target, Action::Block(reason)));
    }

    /// Returns the references kept out of the closure for lack of `force`,
    /// grouped by document, and the derived revisions awaiting a sharing check.
    fn close_over_cascades(
        &mut self,
    ) -> (BTreeMap<Uuid, BTreeSet<Uuid>>, BTreeMap<Uuid, BTreeSet<Uuid>>) {
        let mut forced_out: BTreeMap<Uuid, BTreeSet<Uuid>> = BTreeMap::new();
        let mut candidates: BTreeMap<Uuid, BTreeSet<Uuid>> = BTreeMap::new();
        let graph = self.graph;
        let mut queue = VecDeque::from([graph.target]);
        self.deleting.insert(graph.target);

        while let Some(entity) = queue.pop_front() {
            for edge in graph.edges_from(entity) {
                match policy_for(edge.kind) {
                    Policy::Cascade => self.enqueue(edge.dependent, &mut queue),
                    Policy::BlockUnlessForced if self.force => {
                        self.enqueue(edge.dependent, &mut queue)
                    }
                    Policy::BlockUnlessForced => {
                        forced_out
                            .entry(edge.source.id)
                            .or_default()
                            .insert(edge.dependent.id);
                    }
                    Policy::CascadeUnlessShared => {
                        candidates
                            .entry(edge.dependent.id)
                            .or_default()
                            .insert(edge.source.id);
                    }
                    Policy::Block | Policy::Detach => {}
                }
            }
        }

        (forced_out, candidates)
    }

    fn enqueue(&mut self, entity: EntityRef, queue: &mut VecDeque<EntityRef>) {
        if self.deleting.insert(entity) {
            queue.push_back(entity);
        }
    }

    fn block_referenced_documents(&mut self, forced_out: &BTreeMap<Uuid, BTreeSet<Uuid>>) {
        for (document_id, references) in forced_out {
            self.out.push(Resolution::new(
                EntityRef::document(*document_id),
                Action::Block(BlockReason::ReferencedDocument {
                    document_id: *document_id,
                    reference_count: references.len(),
                }),
            ));
        }
    }

    fn decide_candidates(&mut self, candidates: BTreeMap<Uuid, BTreeSet<Uuid>>) {
        let graph = self.graph;
        for (revision_id, linking_references) in candidates {
            let revision_ref = EntityRef::revision(revision_id);
            if self.deleting.contains(&revision_ref) {
                continue;
            }
            let Some(revision) = graph.revisions.get(&revision_id) else {
                continue;
            };

            let primary_of_deleted = graph.edges_from(revision_ref).any(|edge| {
                edge.kind == EdgeKind::RevisionReference && self.deleting.contains(&edge.dependent)
            });
            let other_references = self.surviving_users(revision_ref).len();
            let deleted_siblings = self
                .deleting
                .iter()
                .filter(|entity| entity.kind == EntityKind::Revision)
                .filter_map(|entity| graph.revisions.get(&entity.id))
                .filter(|sibling| sibling.document_id == revision.document_id)
                .count() as i64;
            let remaining = graph.revision_count(revision.document_id) - deleted_siblings;

            let reason = if primary_of_deleted {
                PreserveReason::PrimaryOfDeletedReference
            } else if other_references > 0 {
                PreserveReason::SharedRevision { other_references }
            } else if revision.is_original {
                PreserveReason::OriginalRevision
            } else if remaining <= 1 {
                PreserveReason::LastRevisionOfDocument
            } else {
                self.deleting.insert(revision_ref);
                continue;
            };

            self.out
                .push(Resolution::new(revision_ref, Action::Preserve(reason)));
            for reference_id in linking_references {
                let reference_ref = EntityRef::reference(reference_id);
                self.out.push(Resolution::new(
                    reference_ref,
                    Action::Detach(Detachment {
                        reference_id,
                        link: ReferenceLink::DerivedRevision,
                        entity: revision_ref,
                    }),
                ));
            }
        }
    }

    /// References outside the closure that use `revision` as primary or derived.
    fn surviving_users(&self, revision: EntityRef) -> BTreeSet<EntityRef> {
        self.graph
            .edges_from(revision)
            .filter(|edge| {
                matches!(
                    edge.kind,
                    EdgeKind::RevisionReference | EdgeKind::RevisionDerivedReference
                )
            })
            .map(|edge| edge.dependent)
            .filter(|reference| !self.deleting.contains(reference))
            .collect()
    }

    fn block_revisions_in_use(&mut self, forced_out: &BTreeMap<Uuid, BTreeSet<Uuid>>) {
        let already_reported: BTreeSet<Uuid> = forced_out.values().flatten().copied().collect();
        let mut in_use: BTreeMap<Uuid, usize> = BTreeMap::new();

        for edge in self.crossing_edges(Policy::Block) {
            if already_reported.contains(&edge.dependent.id) {
                continue;
            }
            *in_use.entry(edge.source.id).or_default() += 1;
        }

        for (revision_id, reference_count) in in_use {
            self.out.push(Resolution::new(
                EntityRef::revision(revision_id),
                Action::Block(BlockReason::RevisionInUse {
                    revision_id,
                    reference_count,
                }),
            ));
        }
    }

    fn detach_survivors(&mut self) {
        for edge in self.crossing_edges(Policy::Detach) {
            match edge.kind {
                EdgeKind::ReferencePrimary => self.out.push(Resolution::new(
                    edge.dependent,
                    Action::Preserve(PreserveReason::PrimaryOfDeletedReference),
                )),
                EdgeKind::ReferenceAuxiliary => {
                    self.out.push(Resolution::new(
                        edge.source,
                        Action::Detach(Detachment {
                            reference_id: edge.source.id,
                            link: ReferenceLink::AuxiliaryDocument,
                            entity: edge.dependent,
                        }),
                    ));
                    self.out.push(Resolution::new(
                        edge.dependent,
                        Action::Preserve(PreserveReason::AuxiliaryDocument),
                    ));
                }
                EdgeKind::RevisionDerivedReference | EdgeKind::AuxiliaryReference => {
                    if let Some(link) = edge.kind.link() {
                        self.out.push(Resolution::new(
                            edge.dependent,
                            Action::Detach(Detachment {
                                reference_id: edge.dependent.id,
                                link,
                                entity: edge.source,
                            }),
                        ));
                    }
                }
                _ => {}
            }
        }
    }

    /// Edges governed by `policy` that leave the deletion closure.
    fn crossing_edges(&self, policy: Policy) -> Vec<Edge> {
        self.graph
            .edges()
            .filter(|edge| policy_for(edge.kind) == policy)
            .filter(|edge| {
                self.deleting.contains(&edge.source) && !self.deleting.contains(&edge.dependent)
            })
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_edge_kind_has_a_policy() {
        for kind in EdgeKind::ALL {
            assert!(
                POLICY_TABLE.iter().any(|(edge, _)| *edge == kind),
                "{kind:?} missing from policy table"
            );
        }
        assert_eq!(POLICY_TABLE.len(), EdgeKind::ALL.len());
    }

    #[test]
    fn auxiliary_documents_never_cascade() {
        for (kind, policy) in POLICY_TABLE {
            if matches!(kind, EdgeKind::ReferenceAuxiliary | EdgeKind::AuxiliaryReference) {
                assert_eq!(*policy, Policy::Detach);
            }
        }
    }

    #[test]
    fn references_never_cascade_upwards() {
        assert_eq!(policy_for(EdgeKind::ReferencePrimary), Policy::Detach);
        assert_eq!(policy_for(EdgeKind::RevisionReference), Policy::Block);
    }
}
