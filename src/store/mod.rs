//! Entity store contract consumed by the planner.
//!
//! A store hands the planner a [`StoreTx`] scoped to exactly one transaction.
//! Everything the planner reads or writes for a single request goes through
//! that handle, so reference counts are always taken inside the same
//! transaction that later applies the plan.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AuxiliaryDocument, Document, Reference, Revision};
use crate::planner::{PlannerError, PlannerResult};

pub mod memory;
pub mod postgres;

pub use memory::{MemorySnapshot, MemoryStore};
pub use postgres::PgEntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Reads only; nothing may be written.
    ReadOnly,
    /// Commits when the body succeeds, rolls back otherwise.
    ReadWrite,
    /// Writes are visible inside the transaction but always rolled back.
    RollbackOnly,
}

/// Nullable links a reference can drop without being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceLink {
    DerivedRevision,
    AuxiliaryDocument,
}

/// Operations available inside one storage transaction.
///
/// List queries return rows ordered by id so that plans built from them are
/// deterministic.
pub trait StoreTx {
    fn document(&mut self, id: Uuid) -> PlannerResult<Option<Document>>;
    fn revision(&mut self, id: Uuid) -> PlannerResult<Option<Revision>>;
    fn reference(&mut self, id: Uuid) -> PlannerResult<Option<Reference>>;
    fn auxiliary_document(&mut self, id: Uuid) -> PlannerResult<Option<AuxiliaryDocument>>;

    fn revisions_of(&mut self, document_id: Uuid) -> PlannerResult<Vec<Revision>>;
    fn count_revisions(&mut self, document_id: Uuid) -> PlannerResult<i64>;

    /// References whose primary document is `document_id` or whose primary
    /// revision is one of `revision_ids`.
    fn references_to_document(
        &mut self,
        document_id: Uuid,
        revision_ids: &[Uuid],
    ) -> PlannerResult<Vec<Reference>>;
    fn references_with_primary(&mut self, revision_ids: &[Uuid]) -> PlannerResult<Vec<Reference>>;
    fn references_with_derived(&mut self, revision_ids: &[Uuid]) -> PlannerResult<Vec<Reference>>;
    fn references_to_auxiliary(&mut self, auxiliary_id: Uuid) -> PlannerResult<Vec<Reference>>;

    fn delete_document(&mut self, id: Uuid) -> PlannerResult<bool>;
    fn delete_revision(&mut self, id: Uuid) -> PlannerResult<bool>;
    fn delete_reference(&mut self, id: Uuid) -> PlannerResult<bool>;
    fn delete_auxiliary_document(&mut self, id: Uuid) -> PlannerResult<bool>;

    fn clear_link(&mut self, reference_id: Uuid, link: ReferenceLink) -> PlannerResult<bool>;
    fn repoint_reference(
        &mut self,
        reference_id: Uuid,
        document_id: Uuid,
        revision_id: Uuid,
    ) -> PlannerResult<bool>;
}

pub type TxBody<'b> = dyn FnMut(&mut dyn StoreTx) -> PlannerResult<()> + 'b;

pub trait EntityStore: Send + Sync {
    /// Runs `body` inside a single transaction. Implementations may invoke
    /// `body` more than once when the transaction has to be retried.
    fn with_transaction(&self, mode: TxMode, body: &mut TxBody<'_>) -> PlannerResult<()>;
}

/// Typed wrapper over [`EntityStore::with_transaction`].
pub fn transaction<T, F>(store: &dyn EntityStore, mode: TxMode, mut body: F) -> PlannerResult<T>
where
    F: FnMut(&mut dyn StoreTx) -> PlannerResult<T>,
{
    let mut output = None;
    store.with_transaction(mode, &mut |tx: &mut dyn StoreTx| {
        output = Some(body(tx)?);
        Ok(())
    })?;
    output.ok_or_else(|| PlannerError::storage("transaction finished without a result"))
}
