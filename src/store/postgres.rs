use chrono::Utc;
use diesel::{pg::PgConnection, prelude::*};
use tracing::warn;
use uuid::Uuid;

use super::{EntityStore, ReferenceLink, StoreTx, TxBody, TxMode};
use crate::db::PgPool;
use crate::models::{AuxiliaryDocument, Document, Reference, Revision};
use crate::planner::{PlannerError, PlannerResult};
use crate::schema::{auxiliary_documents, documents, job_references, revisions};

pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

/// Entity store backed by PostgreSQL.
///
/// Every transaction runs at SERIALIZABLE isolation; serialization failures
/// are retried a bounded number of times before surfacing as
/// [`PlannerError::Conflict`].
#[derive(Clone)]
pub struct PgEntityStore {
    pool: PgPool,
    max_conflict_retries: u32,
}

impl PgEntityStore {
    pub fn new(pool: PgPool, max_conflict_retries: u32) -> Self {
        Self {
            pool,
            max_conflict_retries,
        }
    }

    fn run_once(&self, mode: TxMode, body: &mut TxBody<'_>) -> PlannerResult<()> {
        let mut conn = self
            .pool
            .get()
            .map_err(|err| PlannerError::storage(format!("database pool error: {err}")))?;

        let mut builder = conn.build_transaction().serializable();
        if mode == TxMode::ReadOnly {
            builder = builder.read_only();
        }

        let outcome = builder.run::<(), TxError, _>(|conn| {
            let mut tx = PgTx {
                conn,
                lock_rows: mode != TxMode::ReadOnly,
            };
            body(&mut tx).map_err(TxError::Planner)?;
            if mode == TxMode::RollbackOnly {
                return Err(TxError::Rollback);
            }
            Ok(())
        });

        match outcome {
            Ok(()) | Err(TxError::Rollback) => Ok(()),
            Err(TxError::Planner(err)) => Err(err),
        }
    }
}

impl EntityStore for PgEntityStore {
    fn with_transaction(&self, mode: TxMode, body: &mut TxBody<'_>) -> PlannerResult<()> {
        let mut attempt = 0;
        loop {
            match self.run_once(mode, body) {
                Err(PlannerError::Conflict(message)) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    warn!(attempt, error = %message, "retrying serializable transaction");
                }
                other => return other,
            }
        }
    }
}

enum TxError {
    Planner(PlannerError),
    Rollback,
}

impl From<diesel::result::Error> for TxError {
    fn from(value: diesel::result::Error) -> Self {
        TxError::Planner(value.into())
    }
}

struct PgTx<'c> {
    conn: &'c mut PgConnection,
    lock_rows: bool,
}

impl StoreTx for PgTx<'_> {
    fn document(&mut self, id: Uuid) -> PlannerResult<Option<Document>> {
        let query = documents::table.find(id);
        let row = if self.lock_rows {
            query.for_update().first(self.conn).optional()?
        } else {
            query.first(self.conn).optional()?
        };
        Ok(row)
    }

    fn revision(&mut self, id: Uuid) -> PlannerResult<Option<Revision>> {
        let query = revisions::table.find(id);
        let row = if self.lock_rows {
            query.for_update().first(self.conn).optional()?
        } else {
            query.first(self.conn).optional()?
        };
        Ok(row)
    }

    fn reference(&mut self, id: Uuid) -> PlannerResult<Option<Reference>> {
        let query = job_references::table.find(id);
        let row = if self.lock_rows {
            query.for_update().first(self.conn).optional()?
        } else {
            query.first(self.conn).optional()?
        };
        Ok(row)
    }

    fn auxiliary_document(&mut self, id: Uuid) -> PlannerResult<Option<AuxiliaryDocument>> {
        let query = auxiliary_documents::table.find(id);
        let row = if self.lock_rows {
            query.for_update().first(self.conn).optional()?
        } else {
            query.first(self.conn).optional()?
        };
        Ok(row)
    }

    fn revisions_of(&mut self, document_id: Uuid) -> PlannerResult<Vec<Revision>> {
        Ok(revisions::table
            .filter(revisions::document_id.eq(document_id))
            .order(revisions::id.asc())
            .load(self.conn)?)
    }

    fn count_revisions(&mut self, document_id: Uuid) -> PlannerResult<i64> {
        Ok(revisions::table
            .filter(revisions::document_id.eq(document_id))
            .count()
            .get_result(self.conn)?)
    }

    fn references_to_document(
        &mut self,
        document_id: Uuid,
        revision_ids: &[Uuid],
    ) -> PlannerResult<Vec<Reference>> {
        Ok(job_references::table
            .filter(
                job_references::document_id
                    .eq(document_id)
                    .or(job_references::revision_id.eq_any(revision_ids)),
            )
            .order(job_references::id.asc())
            .load(self.conn)?)
    }

    fn references_with_primary(&mut self, revision_ids: &[Uuid]) -> PlannerResult<Vec<Reference>> {
        if revision_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(job_references::table
            .filter(job_references::revision_id.eq_any(revision_ids))
            .order(job_references::id.asc())
            .load(self.conn)?)
    }

    fn references_with_derived(&mut self, revision_ids: &[Uuid]) -> PlannerResult<Vec<Reference>> {
        if revision_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(job_references::table
            .filter(job_references::derived_revision_id.eq_any(revision_ids))
            .order(job_references::id.asc())
            .load(self.conn)?)
    }

    fn references_to_auxiliary(&mut self, auxiliary_id: Uuid) -> PlannerResult<Vec<Reference>> {
        Ok(job_references::table
            .filter(job_references::auxiliary_document_id.eq(auxiliary_id))
            .order(job_references::id.asc())
            .load(self.conn)?)
    }

    fn delete_document(&mut self, id: Uuid) -> PlannerResult<bool> {
        let deleted = diesel::delete(documents::table.find(id)).execute(self.conn)?;
        Ok(deleted > 0)
    }

    fn delete_revision(&mut self, id: Uuid) -> PlannerResult<bool> {
        let deleted = diesel::delete(revisions::table.find(id)).execute(self.conn)?;
        Ok(deleted > 0)
    }

    fn delete_reference(&mut self, id: Uuid) -> PlannerResult<bool> {
        let deleted = diesel::delete(job_references::table.find(id)).execute(self.conn)?;
        Ok(deleted > 0)
    }

    fn delete_auxiliary_document(&mut self, id: Uuid) -> PlannerResult<bool> {
        let deleted = diesel::delete(auxiliary_documents::table.find(id)).execute(self.conn)?;
        Ok(deleted > 0)
    }

    fn clear_link(&mut self, reference_id: Uuid, link: ReferenceLink) -> PlannerResult<bool> {
        let now = Utc::now().naive_utc();
        let target = job_references::table.find(reference_id);
        let updated = match link {
            ReferenceLink::DerivedRevision => diesel::update(target)
                .set((
                    job_references::derived_revision_id.eq(None::<Uuid>),
                    job_references::updated_at.eq(now),
                ))
                .execute(self.conn)?,
            ReferenceLink::AuxiliaryDocument => diesel::update(target)
                .set((
                    job_references::auxiliary_document_id.eq(None::<Uuid>),
                    job_references::updated_at.eq(now),
                ))
                .execute(self.conn)?,
        };
        Ok(updated > 0)
    }

    fn repoint_reference(
        &mut self,
        reference_id: Uuid,
        document_id: Uuid,
        revision_id: Uuid,
    ) -> PlannerResult<bool> {
        let updated = diesel::update(job_references::table.find(reference_id))
            .set((
                job_references::document_id.eq(document_id),
                job_references::revision_id.eq(revision_id),
                job_references::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(self.conn)?;
        Ok(updated > 0)
    }
}
