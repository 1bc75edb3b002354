use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use super::{EntityStore, ReferenceLink, StoreTx, TxBody, TxMode};
use crate::models::{
    AuxiliaryDocument, Document, NewAuxiliaryDocument, NewDocument, NewReference, NewRevision,
    Reference, Revision,
};
use crate::planner::{PlannerError, PlannerResult};

/// Full contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub documents: BTreeMap<Uuid, Document>,
    pub revisions: BTreeMap<Uuid, Revision>,
    pub references: BTreeMap<Uuid, Reference>,
    pub auxiliary_documents: BTreeMap<Uuid, AuxiliaryDocument>,
}

/// In-process entity store.
///
/// Transactions are serialised behind a mutex and run against a copy of the
/// data that replaces the live copy only on commit. Deletes enforce the same
/// RESTRICT foreign keys as the SQL schema.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemorySnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PlannerResult<MemorySnapshot> {
        Ok(self.lock()?.clone())
    }

    pub fn insert_document(&self, new: NewDocument) -> PlannerResult<Document> {
        let now = Utc::now().naive_utc();
        let document = Document {
            id: new.id,
            owner_id: new.owner_id,
            title: new.title,
            created_at: now,
            updated_at: now,
        };
        self.lock()?.documents.insert(document.id, document.clone());
        Ok(document)
    }

    pub fn insert_revision(&self, new: NewRevision) -> PlannerResult<Revision> {
        let mut state = self.lock()?;
        if !state.documents.contains_key(&new.document_id) {
            return Err(fk_violation("revisions.document_id", new.document_id));
        }
        if new.is_original
            && state
                .revisions
                .values()
                .any(|rev| rev.document_id == new.document_id && rev.is_original)
        {
            return Err(PlannerError::storage(format!(
                "document {} already has an original revision",
                new.document_id
            )));
        }
        let revision = Revision {
            id: new.id,
            document_id: new.document_id,
            label: new.label,
            is_original: new.is_original,
            source_context: new.source_context,
            created_at: Utc::now().naive_utc(),
        };
        state.revisions.insert(revision.id, revision.clone());
        Ok(revision)
    }

    pub fn insert_auxiliary_document(
        &self,
        new: NewAuxiliaryDocument,
    ) -> PlannerResult<AuxiliaryDocument> {
        let now = Utc::now().naive_utc();
        let auxiliary = AuxiliaryDocument {
            id: new.id,
            owner_id: new.owner_id,
            title: new.title,
            created_at: now,
            updated_at: now,
        };
        self.lock()?
            .auxiliary_documents
            .insert(auxiliary.id, auxiliary.clone());
        Ok(auxiliary)
    }

    pub fn insert_reference(&self, new: NewReference) -> PlannerResult<Reference> {
        let mut state = self.lock()?;
        if !state.documents.contains_key(&new.document_id) {
            return Err(fk_violation("job_references.document_id", new.document_id));
        }
        if !state.revisions.contains_key(&new.revision_id) {
            return Err(fk_violation("job_references.revision_id", new.revision_id));
        }
        if let Some(derived) = new.derived_revision_id {
            if !state.revisions.contains_key(&derived) {
                return Err(fk_violation("job_references.derived_revision_id", derived));
            }
        }
        if let Some(auxiliary) = new.auxiliary_document_id {
            if !state.auxiliary_documents.contains_key(&auxiliary) {
                return Err(fk_violation(
                    "job_references.auxiliary_document_id",
                    auxiliary,
                ));
            }
        }
        let now = Utc::now().naive_utc();
        let reference = Reference {
            id: new.id,
            owner_id: new.owner_id,
            document_id: new.document_id,
            revision_id: new.revision_id,
            derived_revision_id: new.derived_revision_id,
            auxiliary_document_id: new.auxiliary_document_id,
            company: new.company,
            position: new.position,
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        state.references.insert(reference.id, reference.clone());
        Ok(reference)
    }

    fn lock(&self) -> PlannerResult<MutexGuard<'_, MemorySnapshot>> {
        self.state
            .lock()
            .map_err(|_| PlannerError::storage("memory store lock poisoned"))
    }
}

impl EntityStore for MemoryStore {
    fn with_transaction(&self, mode: TxMode, body: &mut TxBody<'_>) -> PlannerResult<()> {
        let mut state = self.lock()?;
        let mut working = state.clone();
        body(&mut working)?;
        if mode == TxMode::ReadWrite {
            *state = working;
        }
        Ok(())
    }
}

fn fk_violation(column: &str, id: Uuid) -> PlannerError {
    PlannerError::invariant(format!("foreign key violation: {column} -> {id}"))
}

fn collect_references<F>(state: &MemorySnapshot, predicate: F) -> Vec<Reference>
where
    F: Fn(&Reference) -> bool,
{
    state
        .references
        .values()
        .filter(|reference| predicate(reference))
        .cloned()
        .collect()
}

impl StoreTx for MemorySnapshot {
    fn document(&mut self, id: Uuid) -> PlannerResult<Option<Document>> {
        Ok(self.documents.get(&id).cloned())
    }

    fn revision(&mut self, id: Uuid) -> PlannerResult<Option<Revision>> {
        Ok(self.revisions.get(&id).cloned())
    }

    fn reference(&mut self, id: Uuid) -> PlannerResult<Option<Reference>> {
        Ok(self.references.get(&id).cloned())
    }

    fn auxiliary_document(&mut self, id: Uuid) -> PlannerResult<Option<AuxiliaryDocument>> {
        Ok(self.auxiliary_documents.get(&id).cloned())
    }

    fn revisions_of(&mut self, document_id: Uuid) -> PlannerResult<Vec<Revision>> {
        Ok(self
            .revisions
            .values()
            .filter(|rev| rev.document_id == document_id)
            .cloned()
            .collect())
    }

    fn count_revisions(&mut self, document_id: Uuid) -> PlannerResult<i64> {
        let count = self
            .revisions
            .values()
            .filter(|rev| rev.document_id == document_id)
            .count();
        Ok(count as i64)
    }

    fn references_to_document(
        &mut self,
        document_id: Uuid,
        revision_ids: &[Uuid],
    ) -> PlannerResult<Vec<Reference>> {
        Ok(collect_references(self, |reference| {
            reference.document_id == document_id || revision_ids.contains(&reference.revision_id)
        }))
    }

    fn references_with_primary(&mut self, revision_ids: &[Uuid]) -> PlannerResult<Vec<Reference>> {
        Ok(collect_references(self, |reference| {
            revision_ids.contains(&reference.revision_id)
        }))
    }

    fn references_with_derived(&mut self, revision_ids: &[Uuid]) -> PlannerResult<Vec<Reference>> {
        Ok(collect_references(self, |reference| {
            reference
                .derived_revision_id
                .is_some_and(|derived| revision_ids.contains(&derived))
        }))
    }

    fn references_to_auxiliary(&mut self, auxiliary_id: Uuid) -> PlannerResult<Vec<Reference>> {
        Ok(collect_references(self, |reference| {
            reference.auxiliary_document_id == Some(auxiliary_id)
        }))
    }

    fn delete_document(&mut self, id: Uuid) -> PlannerResult<bool> {
        if self.revisions.values().any(|rev| rev.document_id == id) {
            return Err(fk_violation("revisions.document_id", id));
        }
        if self.references.values().any(|reference| reference.document_id == id) {
            return Err(fk_violation("job_references.document_id", id));
        }
        Ok(self.documents.remove(&id).is_some())
    }

    fn delete_revision(&mut self, id: Uuid) -> PlannerResult<bool> {
        if self
            .references
            .values()
            .any(|reference| reference.uses_revision(id))
        {
            return Err(fk_violation("job_references.revision_id", id));
        }
        Ok(self.revisions.remove(&id).is_some())
    }

    fn delete_reference(&mut self, id: Uuid) -> PlannerResult<bool> {
        Ok(self.references.remove(&id).is_some())
    }

    fn delete_auxiliary_document(&mut self, id: Uuid) -> PlannerResult<bool> {
        if self
            .references
            .values()
            .any(|reference| reference.auxiliary_document_id == Some(id))
        {
            return Err(fk_violation("job_references.auxiliary_document_id", id));
        }
        Ok(self.auxiliary_documents.remove(&id).is_some())
    }

    fn clear_link(&mut self, reference_id: Uuid, link: ReferenceLink) -> PlannerResult<bool> {
        let Some(reference) = self.references.get_mut(&reference_id) else {
            return Ok(false);
        };
        match link {
            ReferenceLink::DerivedRevision => reference.derived_revision_id = None,
            ReferenceLink::AuxiliaryDocument => reference.auxiliary_document_id = None,
        }
        reference.updated_at = Utc::now().naive_utc();
        Ok(true)
    }

    fn repoint_reference(
        &mut self,
        reference_id: Uuid,
        document_id: Uuid,
        revision_id: Uuid,
    ) -> PlannerResult<bool> {
        if !self.documents.contains_key(&document_id) {
            return Err(fk_violation("job_references.document_id", document_id));
        }
        if !self.revisions.contains_key(&revision_id) {
            return Err(fk_violation("job_references.revision_id", revision_id));
        }
        let Some(reference) = self.references.get_mut(&reference_id) else {
            return Ok(false);
        };
        reference.document_id = document_id;
        reference.revision_id = revision_id;
        reference.updated_at = Utc::now().naive_utc();
        Ok(true)
    }
}
