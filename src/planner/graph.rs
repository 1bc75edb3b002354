//! Dependency graph builder.
//!
//! Loads only the entities whose fate depends on the deletion target: its
//! children, the references pointing at it or at its children, and the
//! references sharing any revision a deleted reference might cascade into.
//! Entities live in an arena keyed by id; edges are explicit and typed.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EntityKind, EntityRef, PlannerError, PlannerResult};
use crate::models::{AuxiliaryDocument, Document, Reference, Revision};
use crate::store::{ReferenceLink, StoreTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Document owns revision.
    DocumentRevision,
    /// Reference points at the document or one of its revisions as primary.
    DocumentReference,
    /// Reference uses the revision as its primary revision.
    RevisionReference,
    /// Reference uses the revision as its derived revision.
    RevisionDerivedReference,
    /// Reference carries a derived revision.
    ReferenceDerivedRevision,
    /// Reference links an auxiliary document.
    ReferenceAuxiliary,
    /// Reference points at its primary document or revision.
    ReferencePrimary,
    /// Auxiliary document is linked from the reference.
    AuxiliaryReference,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 8] = [
        EdgeKind::DocumentRevision,
        EdgeKind::DocumentReference,
        EdgeKind::RevisionReference,
        EdgeKind::RevisionDerivedReference,
        EdgeKind::ReferenceDerivedRevision,
        EdgeKind::ReferenceAuxiliary,
        EdgeKind::ReferencePrimary,
        EdgeKind::AuxiliaryReference,
    ];

    /// The nullable reference column this edge is stored in, if any.
    pub fn link(self) -> Option<ReferenceLink> {
        match self {
            EdgeKind::RevisionDerivedReference | EdgeKind::ReferenceDerivedRevision => {
                Some(ReferenceLink::DerivedRevision)
            }
            EdgeKind::ReferenceAuxiliary | EdgeKind::AuxiliaryReference => {
                Some(ReferenceLink::AuxiliaryDocument)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub kind: EdgeKind,
    pub source: EntityRef,
    pub dependent: EntityRef,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub target: EntityRef,
    pub documents: BTreeMap<Uuid, Document>,
    pub revisions: BTreeMap<Uuid, Revision>,
    pub references: BTreeMap<Uuid, Reference>,
    pub auxiliary_documents: BTreeMap<Uuid, AuxiliaryDocument>,
    /// Total revisions per document as stored, including ones not loaded.
    revision_counts: BTreeMap<Uuid, i64>,
    edges: BTreeSet<Edge>,
}

impl DependencyGraph {
    fn new(target: EntityRef) -> Self {
        Self {
            target,
            documents: BTreeMap::new(),
            revisions: BTreeMap::new(),
            references: BTreeMap::new(),
            auxiliary_documents: BTreeMap::new(),
            revision_counts: BTreeMap::new(),
            edges: BTreeSet::new(),
        }
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn edges_from(&self, source: EntityRef) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.source == source)
    }

    pub fn revision_count(&self, document_id: Uuid) -> i64 {
        self.revision_counts.get(&document_id).copied().unwrap_or(0)
    }

    fn connect(&mut self, kind: EdgeKind, source: EntityRef, dependent: EntityRef) {
        self.edges.insert(Edge {
            kind,
            source,
            dependent,
        });
    }
}

/// Loads the dependency subgraph for deleting `target` on behalf of `owner_id`.
pub fn build(
    tx: &mut dyn StoreTx,
    owner_id: Uuid,
    target: EntityRef,
) -> PlannerResult<DependencyGraph> {
    let mut builder = GraphBuilder {
        tx,
        graph: DependencyGraph::new(target),
        expanded_revisions: BTreeSet::new(),
    };

    match target.kind {
        EntityKind::Document => builder.document_target(owner_id, target.id)?,
        EntityKind::Revision => builder.revision_target(owner_id, target.id)?,
        EntityKind::Reference => builder.reference_target(owner_id, target.id)?,
        EntityKind::AuxiliaryDocument => builder.auxiliary_target(owner_id, target.id)?,
    }

    Ok(builder.graph)
}

struct GraphBuilder<'t> {
    tx: &'t mut dyn StoreTx,
    graph: DependencyGraph,
    expanded_revisions: BTreeSet<Uuid>,
}

impl GraphBuilder<'_> {
    fn document_target(&mut self, owner_id: Uuid, id: Uuid) -> PlannerResult<()> {
        let document = self
            .tx
            .document(id)?
            .filter(|document| document.owner_id == owner_id)
            .ok_or_else(|| PlannerError::not_found(EntityKind::Document, id))?;
        let document_ref = EntityRef::document(document.id);
        self.graph.documents.insert(document.id, document);

        let revisions = self.tx.revisions_of(id)?;
        self.graph.revision_counts.insert(id, revisions.len() as i64);
        let revision_ids: Vec<Uuid> = revisions.iter().map(|rev| rev.id).collect();
        for revision in revisions {
            self.graph.connect(
                EdgeKind::DocumentRevision,
                document_ref,
                EntityRef::revision(revision.id),
            );
            self.graph.revisions.insert(revision.id, revision);
        }

        for reference in self.tx.references_to_document(id, &revision_ids)? {
            self.graph.connect(
                EdgeKind::DocumentReference,
                document_ref,
                EntityRef::reference(reference.id),
            );
            let reference_id = reference.id;
            self.graph.references.insert(reference_id, reference);
            self.expand_reference(reference_id)?;
        }

        self.expand_revisions(&revision_ids)
    }

    fn revision_target(&mut self, owner_id: Uuid, id: Uuid) -> PlannerResult<()> {
        let not_found = || PlannerError::not_found(EntityKind::Revision, id);
        let revision = self.tx.revision(id)?.ok_or_else(not_found)?;
        let document = self
            .tx
            .document(revision.document_id)?
            .filter(|document| document.owner_id == owner_id)
            .ok_or_else(not_found)?;

        self.graph.documents.insert(document.id, document);
        self.graph.revisions.insert(revision.id, revision);
        self.expand_revisions(&[id])
    }

    fn reference_target(&mut self, owner_id: Uuid, id: Uuid) -> PlannerResult<()> {
        let reference = self
            .tx
            .reference(id)?
            .filter(|reference| reference.owner_id == owner_id)
            .ok_or_else(|| PlannerError::not_found(EntityKind::Reference, id))?;
        self.graph.references.insert(reference.id, reference);
        self.expand_reference(id)
    }

    fn auxiliary_target(&mut self, owner_id: Uuid, id: Uuid) -> PlannerResult<()> {
        let auxiliary = self
            .tx
            .auxiliary_document(id)?
            .filter(|auxiliary| auxiliary.owner_id == owner_id)
            .ok_or_else(|| PlannerError::not_found(EntityKind::AuxiliaryDocument, id))?;
        let auxiliary_ref = EntityRef::auxiliary_document(auxiliary.id);
        self.graph.auxiliary_documents.insert(auxiliary.id, auxiliary);

        for reference in self.tx.references_to_auxiliary(id)? {
            self.graph.connect(
                EdgeKind::AuxiliaryReference,
                auxiliary_ref,
                EntityRef::reference(reference.id),
            );
            self.graph.references.insert(reference.id, reference);
        }
        Ok(())
    }

    /// Adds the outgoing edges of a reference that may be deleted.
    fn expand_reference(&mut self, reference_id: Uuid) -> PlannerResult<()> {
        let Some(reference) = self.graph.references.get(&reference_id).cloned() else {
            return Ok(());
        };
        let reference_ref = EntityRef::reference(reference.id);

        if self.load_document(reference.document_id)? {
            self.graph.connect(
                EdgeKind::ReferencePrimary,
                reference_ref,
                EntityRef::document(reference.document_id),
            );
        }
        if self.load_revision(reference.revision_id)? {
            self.graph.connect(
                EdgeKind::ReferencePrimary,
                reference_ref,
                EntityRef::revision(reference.revision_id),
            );
        }

        if let Some(derived_id) = reference.derived_revision_id {
            if self.load_revision(derived_id)? {
                self.graph.connect(
                    EdgeKind::ReferenceDerivedRevision,
                    reference_ref,
                    EntityRef::revision(derived_id),
                );
                self.expand_revisions(&[derived_id])?;
            }
        }

        if let Some(auxiliary_id) = reference.auxiliary_document_id {
            if !self.graph.auxiliary_documents.contains_key(&auxiliary_id) {
                if let Some(auxiliary) = self.tx.auxiliary_document(auxiliary_id)? {
                    self.graph.auxiliary_documents.insert(auxiliary.id, auxiliary);
                }
            }
            if self.graph.auxiliary_documents.contains_key(&auxiliary_id) {
                self.graph.connect(
                    EdgeKind::ReferenceAuxiliary,
                    reference_ref,
                    EntityRef::auxiliary_document(auxiliary_id),
                );
            }
        }

        Ok(())
    }

    /// Loads every reference using the given revisions plus their documents'
    /// revision counts, which the resolver needs for sharing decisions.
    fn expand_revisions(&mut self, revision_ids: &[Uuid]) -> PlannerResult<()> {
        let fresh: Vec<Uuid> = revision_ids
            .iter()
            .copied()
            .filter(|id| self.expanded_revisions.insert(*id))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        for id in &fresh {
            let Some(document_id) = self.graph.revisions.get(id).map(|rev| rev.document_id) else {
                continue;
            };
            if !self.graph.revision_counts.contains_key(&document_id) {
                let count = self.tx.count_revisions(document_id)?;
                self.graph.revision_counts.insert(document_id, count);
            }
        }

        for reference in self.tx.references_with_primary(&fresh)? {
            self.graph.connect(
                EdgeKind::RevisionReference,
                EntityRef::revision(reference.revision_id),
                EntityRef::reference(reference.id),
            );
            self.graph.references.entry(reference.id).or_insert(reference);
        }

        for reference in self.tx.references_with_derived(&fresh)? {
            if let Some(derived_id) = reference.derived_revision_id {
                self.graph.connect(
                    EdgeKind::RevisionDerivedReference,
                    EntityRef::revision(derived_id),
                    EntityRef::reference(reference.id),
                );
            }
            self.graph.references.entry(reference.id).or_insert(reference);
        }

        Ok(())
    }

    fn load_document(&mut self, id: Uuid) -> PlannerResult<bool> {
        if self.graph.documents.contains_key(&id) {
            return Ok(true);
        }
        match self.tx.document(id)? {
            Some(document) => {
                self.graph.documents.insert(id, document);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn load_revision(&mut self, id: Uuid) -> PlannerResult<bool> {
        if self.graph.revisions.contains_key(&id) {
            return Ok(true);
        }
        match self.tx.revision(id)? {
            Some(revision) => {
                self.graph.revisions.insert(id, revision);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
