use std::collections::BTreeSet;

use uuid::Uuid;

use super::plan::{ExecutionResult, Plan};
use super::{EntityKind, EntityRef, PlannerError, PlannerResult};
use crate::store::StoreTx;

/// Applies `plan` inside the caller's transaction.
///
/// Links are cleared before any row is deleted, and rows are deleted in the
/// order the plan lists them. The caller must roll back on any error.
pub fn apply(tx: &mut dyn StoreTx, plan: &Plan) -> PlannerResult<ExecutionResult> {
    if let Some(blocked) = plan.blocked() {
        return Err(blocked.into());
    }

    for detachment in &plan.detach {
        if !tx.clear_link(detachment.reference_id, detachment.link)? {
            return Err(vanished(EntityRef::reference(detachment.reference_id)));
        }
    }

    let mut touched_documents = BTreeSet::new();
    let mut deleted_documents = BTreeSet::new();
    let mut deleted_revisions = Vec::new();

    for entity in &plan.delete {
        let removed = match entity.kind {
            EntityKind::Reference => tx.delete_reference(entity.id)?,
            EntityKind::Revision => {
                let Some(revision) = tx.revision(entity.id)? else {
                    return Err(vanished(*entity));
                };
                touched_documents.insert(revision.document_id);
                deleted_revisions.push(entity.id);
                tx.delete_revision(entity.id)?
            }
            EntityKind::Document => {
                deleted_documents.insert(entity.id);
                tx.delete_document(entity.id)?
            }
            EntityKind::AuxiliaryDocument => tx.delete_auxiliary_document(entity.id)?,
        };
        if !removed {
            return Err(vanished(*entity));
        }
    }

    verify(tx, &touched_documents, &deleted_documents, &deleted_revisions)?;

    Ok(ExecutionResult {
        target: plan.target,
        deleted: plan.delete.clone(),
        detached: plan.detach.clone(),
        preserved: plan.preserve.clone(),
    })
}

/// Re-checks the storage invariants the plan was supposed to uphold.
fn verify(
    tx: &mut dyn StoreTx,
    touched_documents: &BTreeSet<Uuid>,
    deleted_documents: &BTreeSet<Uuid>,
    deleted_revisions: &[Uuid],
) -> PlannerResult<()> {
    for document_id in touched_documents.difference(deleted_documents) {
        if tx.count_revisions(*document_id)? < 1 {
            return Err(PlannerError::invariant(format!(
                "document {document_id} would be left without revisions"
            )));
        }
    }

    if !deleted_revisions.is_empty() {
        let dangling = tx
            .references_with_primary(deleted_revisions)?
            .into_iter()
            .chain(tx.references_with_derived(deleted_revisions)?)
            .next();
        if let Some(reference) = dangling {
            return Err(PlannerError::invariant(format!(
                "reference {} still points at a deleted revision",
                reference.id
            )));
        }
    }

    for document_id in deleted_documents {
        if let Some(reference) = tx.references_to_document(*document_id, &[])?.first() {
            return Err(PlannerError::invariant(format!(
                "reference {} still points at deleted document {document_id}",
                reference.id
            )));
        }
    }

    Ok(())
}

fn vanished(entity: EntityRef) -> PlannerError {
    PlannerError::Conflict(format!("{entity} was removed concurrently"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewDocument, NewRevision};
    use crate::store::{transaction, MemoryStore, TxMode};

    fn store_with_single_revision() -> (MemoryStore, Uuid, Uuid) {
        let store = MemoryStore::new();
        let document = store
            .insert_document(NewDocument {
                id: Uuid::new_v4(),
                owner_id: Uuid::new_v4(),
                title: "Resume".to_string(),
            })
            .unwrap();
        let revision = store
            .insert_revision(NewRevision {
                id: Uuid::new_v4(),
                document_id: document.id,
                label: "v1".to_string(),
                is_original: false,
                source_context: None,
            })
            .unwrap();
        (store, document.id, revision.id)
    }

    fn plan_deleting(target: EntityRef, delete: Vec<EntityRef>) -> Plan {
        Plan {
            target,
            force: false,
            can_delete: true,
            application_count: 0,
            delete,
            detach: Vec::new(),
            preserve: Vec::new(),
            block_reasons: Vec::new(),
            options: Vec::new(),
        }
    }

    #[test]
    fn rejects_plan_that_empties_a_surviving_document() {
        let (store, _, revision_id) = store_with_single_revision();
        let before = store.snapshot().unwrap();
        let target = EntityRef::revision(revision_id);
        let plan = plan_deleting(target, vec![target]);

        let result = transaction(&store, TxMode::ReadWrite, |tx| apply(tx, &plan));

        assert!(matches!(result, Err(PlannerError::InvariantViolation(_))));
        assert_eq!(store.snapshot().unwrap(), before);
    }

    #[test]
    fn missing_row_is_a_conflict() {
        let (store, _, _) = store_with_single_revision();
        let ghost = EntityRef::reference(Uuid::new_v4());
        let plan = plan_deleting(ghost, vec![ghost]);

        let result = transaction(&store, TxMode::ReadWrite, |tx| apply(tx, &plan));

        assert!(matches!(result, Err(PlannerError::Conflict(_))));
    }

    #[test]
    fn blocked_plan_is_refused() {
        let (store, document_id, _) = store_with_single_revision();
        let target = EntityRef::document(document_id);
        let mut plan = plan_deleting(target, vec![target]);
        plan.can_delete = false;

        let result = transaction(&store, TxMode::ReadWrite, |tx| apply(tx, &plan));

        assert!(matches!(result, Err(PlannerError::Blocked(_))));
        assert!(store.snapshot().unwrap().documents.contains_key(&document_id));
    }
}
