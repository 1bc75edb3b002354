use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EntityKind, PlannerError, PlannerResult};
use crate::models::Revision;
use crate::store::StoreTx;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignRequest {
    pub source_document_id: Uuid,
    pub target_document_id: Uuid,
    #[serde(default)]
    pub target_revision_id: Option<Uuid>,
    /// Limits the move to these references; all of the source's when absent.
    #[serde(default)]
    pub reference_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignResult {
    pub source_document_id: Uuid,
    pub target_document_id: Uuid,
    pub target_revision_id: Uuid,
    pub reassigned: Vec<Uuid>,
    /// References still pointing at the source; zero means it can be deleted.
    pub source_remaining_references: usize,
}

/// Repoints references from the source document to the target document.
/// Never deletes anything.
pub fn apply(
    tx: &mut dyn StoreTx,
    owner_id: Uuid,
    request: &ReassignRequest,
) -> PlannerResult<ReassignResult> {
    let source_id = request.source_document_id;
    let target_id = request.target_document_id;

    tx.document(source_id)?
        .filter(|document| document.owner_id == owner_id)
        .ok_or_else(|| PlannerError::not_found(EntityKind::Document, source_id))?;

    if source_id == target_id {
        return Err(PlannerError::InvalidTarget(
            "source and target document are the same".to_string(),
        ));
    }

    let target = tx
        .document(target_id)?
        .ok_or_else(|| PlannerError::not_found(EntityKind::Document, target_id))?;
    if target.owner_id != owner_id {
        return Err(PlannerError::InvalidTarget(format!(
            "document {target_id} belongs to another owner"
        )));
    }

    let revision_id = match request.target_revision_id {
        Some(revision_id) => {
            let belongs = tx
                .revision(revision_id)?
                .is_some_and(|revision| revision.document_id == target_id);
            if !belongs {
                return Err(PlannerError::VersionMismatch {
                    revision_id,
                    document_id: target_id,
                });
            }
            revision_id
        }
        None => default_revision(&tx.revisions_of(target_id)?).ok_or_else(|| {
            PlannerError::InvalidTarget(format!("document {target_id} has no revisions"))
        })?,
    };

    let source_revision_ids: Vec<Uuid> = tx
        .revisions_of(source_id)?
        .into_iter()
        .map(|revision| revision.id)
        .collect();
    let candidates: Vec<Uuid> = tx
        .references_to_document(source_id, &source_revision_ids)?
        .into_iter()
        .filter(|reference| reference.owner_id == owner_id)
        .map(|reference| reference.id)
        .collect();

    let selected = match &request.reference_ids {
        Some(ids) => {
            let mut selected = Vec::with_capacity(ids.len());
            for id in ids {
                if !candidates.contains(id) {
                    return Err(PlannerError::not_found(EntityKind::Reference, *id));
                }
                if !selected.contains(id) {
                    selected.push(*id);
                }
            }
            selected
        }
        None => candidates,
    };

    for reference_id in &selected {
        if !tx.repoint_reference(*reference_id, target_id, revision_id)? {
            return Err(PlannerError::Conflict(format!(
                "reference {reference_id} was removed concurrently"
            )));
        }
    }

    let source_remaining_references = tx
        .references_to_document(source_id, &source_revision_ids)?
        .len();

    Ok(ReassignResult {
        source_document_id: source_id,
        target_document_id: target_id,
        target_revision_id: revision_id,
        reassigned: selected,
        source_remaining_references,
    })
}

/// The original revision, or the newest one when there is none.
fn default_revision(revisions: &[Revision]) -> Option<Uuid> {
    revisions
        .iter()
        .find(|revision| revision.is_original)
        .or_else(|| {
            revisions
                .iter()
                .max_by_key(|revision| (revision.created_at, revision.id))
        })
        .map(|revision| revision.id)
}
