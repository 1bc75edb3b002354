use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::graph::{DependencyGraph, EdgeKind};
use super::policy::{Action, Resolution};
use super::{EntityKind, EntityRef};
use crate::store::ReferenceLink;

/// Outcome of planning a deletion. Computing one never mutates storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub target: EntityRef,
    pub force: bool,
    pub can_delete: bool,
    /// Live references pointing at the target.
    pub application_count: usize,
    /// Entities to remove, in execution order.
    pub delete: Vec<EntityRef>,
    pub detach: Vec<Detachment>,
    pub preserve: Vec<Preserved>,
    pub block_reasons: Vec<BlockReason>,
    /// Ways forward when blocked; empty otherwise.
    pub options: Vec<DeleteOption>,
}

impl Plan {
    pub fn blocked(&self) -> Option<Blocked> {
        if self.can_delete {
            return None;
        }
        Some(Blocked {
            target: self.target,
            reasons: self.block_reasons.clone(),
            options: self.options.clone(),
            application_count: self.application_count,
        })
    }

    /// Every entity this plan would delete or modify.
    pub fn footprint(&self) -> BTreeSet<EntityRef> {
        let mut footprint: BTreeSet<EntityRef> = self.delete.iter().copied().collect();
        footprint.insert(self.target);
        for detachment in &self.detach {
            footprint.insert(EntityRef::reference(detachment.reference_id));
            footprint.insert(detachment.entity);
        }
        footprint
    }

    pub fn revisions_deleted(&self) -> usize {
        self.delete
            .iter()
            .filter(|entity| entity.kind == EntityKind::Revision)
            .count()
    }
}

/// A nullable link cleared on a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Detachment {
    pub reference_id: Uuid,
    pub link: ReferenceLink,
    /// The entity the link pointed at.
    pub entity: EntityRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preserved {
    pub entity: EntityRef,
    #[serde(flatten)]
    pub reason: PreserveReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PreserveReason {
    SharedRevision { other_references: usize },
    OriginalRevision,
    LastRevisionOfDocument,
    PrimaryOfDeletedReference,
    AuxiliaryDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    ReferencedDocument {
        document_id: Uuid,
        reference_count: usize,
    },
    RevisionInUse {
        revision_id: Uuid,
        reference_count: usize,
    },
    LastRevision {
        revision_id: Uuid,
        document_id: Uuid,
    },
    OriginalRevision {
        revision_id: Uuid,
        sibling_count: usize,
    },
}

impl BlockReason {
    fn options(&self) -> &'static [DeleteOption] {
        match self {
            BlockReason::ReferencedDocument { .. } => {
                &[DeleteOption::ForceDelete, DeleteOption::Reassign]
            }
            BlockReason::RevisionInUse { .. } => &[DeleteOption::DeleteDependentsFirst],
            BlockReason::LastRevision { .. } | BlockReason::OriginalRevision { .. } => &[],
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::ReferencedDocument {
                document_id,
                reference_count,
            } => write!(
                f,
                "document {document_id} is referenced by {reference_count} references"
            ),
            BlockReason::RevisionInUse {
                revision_id,
                reference_count,
            } => write!(
                f,
                "revision {revision_id} is used by {reference_count} references"
            ),
            BlockReason::LastRevision {
                revision_id,
                document_id,
            } => write!(
                f,
                "revision {revision_id} is the last revision of document {document_id}"
            ),
            BlockReason::OriginalRevision {
                revision_id,
                sibling_count,
            } => write!(
                f,
                "revision {revision_id} is the original revision and has {sibling_count} siblings"
            ),
        }
    }
}

/// Declared in the order options are presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOption {
    ForceDelete,
    Reassign,
    DeleteDependentsFirst,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocked {
    pub target: EntityRef,
    pub reasons: Vec<BlockReason>,
    pub options: Vec<DeleteOption>,
    pub application_count: usize,
}

impl fmt::Display for Blocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deletion of {} is blocked", self.target)?;
        for (index, reason) in self.reasons.iter().enumerate() {
            let separator = if index == 0 { ": " } else { "; " };
            write!(f, "{separator}{reason}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub target: EntityRef,
    pub deleted: Vec<EntityRef>,
    pub detached: Vec<Detachment>,
    pub preserved: Vec<Preserved>,
}

/// Turns resolver output into a deduplicated, ordered [`Plan`].
pub fn calculate(graph: &DependencyGraph, force: bool, resolutions: &[Resolution]) -> Plan {
    let mut delete = BTreeSet::new();
    let mut detach = BTreeSet::new();
    let mut preserve: BTreeMap<EntityRef, PreserveReason> = BTreeMap::new();
    let mut block_reasons = Vec::new();

    for resolution in resolutions {
        match &resolution.action {
            Action::Delete => {
                delete.insert(resolution.entity);
            }
            Action::Detach(detachment) => {
                detach.insert(*detachment);
            }
            Action::Preserve(reason) => {
                preserve
                    .entry(resolution.entity)
                    .or_insert_with(|| reason.clone());
            }
            Action::Block(reason) => {
                if !block_reasons.contains(reason) {
                    block_reasons.push(reason.clone());
                }
            }
        }
    }

    preserve.retain(|entity, _| !delete.contains(entity));

    let can_delete = block_reasons.is_empty();
    let options = if can_delete {
        Vec::new()
    } else {
        let mut options: BTreeSet<DeleteOption> = block_reasons
            .iter()
            .flat_map(|reason| reason.options().iter().copied())
            .collect();
        options.insert(DeleteOption::Cancel);
        options.into_iter().collect()
    };

    let deleted_documents: BTreeSet<Uuid> = delete
        .iter()
        .filter(|entity| entity.kind == EntityKind::Document)
        .map(|entity| entity.id)
        .collect();
    let mut delete: Vec<EntityRef> = delete.into_iter().collect();
    delete.sort_by_key(|entity| (execution_rank(graph, &deleted_documents, *entity), entity.id));

    Plan {
        target: graph.target,
        force,
        can_delete,
        application_count: application_count(graph),
        delete,
        detach: detach.into_iter().collect(),
        preserve: preserve
            .into_iter()
            .map(|(entity, reason)| Preserved { entity, reason })
            .collect(),
        block_reasons,
        options,
    }
}

/// References first, then revisions of surviving documents, then the
/// revisions of documents being deleted, then documents, then auxiliary
/// documents. Storage foreign keys require this order.
fn execution_rank(
    graph: &DependencyGraph,
    deleted_documents: &BTreeSet<Uuid>,
    entity: EntityRef,
) -> u8 {
    match entity.kind {
        EntityKind::Reference => 0,
        EntityKind::Revision => {
            let owner_deleted = graph
                .revisions
                .get(&entity.id)
                .is_some_and(|revision| deleted_documents.contains(&revision.document_id));
            if owner_deleted {
                2
            } else {
                1
            }
        }
        EntityKind::Document => 3,
        EntityKind::AuxiliaryDocument => 4,
    }
}

fn application_count(graph: &DependencyGraph) -> usize {
    let target = graph.target;
    let users: BTreeSet<EntityRef> = graph
        .edges_from(target)
        .filter(|edge| match target.kind {
            EntityKind::Document => edge.kind == EdgeKind::DocumentReference,
            EntityKind::Revision => matches!(
                edge.kind,
                EdgeKind::RevisionReference | EdgeKind::RevisionDerivedReference
            ),
            EntityKind::AuxiliaryDocument => edge.kind == EdgeKind::AuxiliaryReference,
            EntityKind::Reference => false,
        })
        .map(|edge| edge.dependent)
        .collect();
    users.len()
}
