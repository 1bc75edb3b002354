mod common;

use std::sync::Arc;

use anyhow::Result;
use common::Fixture;
use jobtrail::models::{AuxiliaryDocument, Document, Reference, Revision};
use jobtrail::planner::{
    BulkOutcome, BulkRequest, EntityKind, EntityRef, Planner, PlannerError, PlannerResult,
    PlannerSettings,
};
use jobtrail::store::{EntityStore, MemoryStore, ReferenceLink, StoreTx, TxBody, TxMode};
use uuid::Uuid;

#[tokio::test]
async fn references_sharing_a_revision_are_deleted_in_one_lane() -> Result<()> {
    let fixture = Fixture::new();
    let (document_id, revisions) = fixture.document(1)?;
    let derived_id = fixture.revision(document_id, false)?;
    let first = fixture.reference(document_id, revisions[0], Some(derived_id), None)?;
    let second = fixture.reference(document_id, revisions[0], Some(derived_id), None)?;
    let (other_document, other_revisions) = fixture.document(1)?;
    let unrelated = fixture.reference(other_document, other_revisions[0], None, None)?;

    let report = fixture
        .planner
        .bulk_delete(
            fixture.owner_id,
            BulkRequest {
                kind: EntityKind::Reference,
                ids: vec![first, second, unrelated],
                dry_run: false,
                force: false,
            },
        )
        .await?;

    assert_eq!(report.total, 3);
    assert_eq!(report.deleted, 3);
    assert_eq!(report.revisions_deleted, 1);
    assert_eq!(
        report
            .items
            .iter()
            .map(|item| item.target)
            .collect::<Vec<_>>(),
        vec![
            EntityRef::reference(first),
            EntityRef::reference(second),
            EntityRef::reference(unrelated)
        ]
    );

    let snapshot = fixture.snapshot()?;
    assert!(snapshot.references.is_empty());
    assert!(!snapshot.revisions.contains_key(&derived_id));
    Ok(())
}

#[tokio::test]
async fn one_blocked_item_does_not_stop_the_batch() -> Result<()> {
    let fixture = Fixture::new();
    let (free_id, _) = fixture.document(2)?;
    let (busy_id, busy_revisions) = fixture.document(1)?;
    fixture.reference(busy_id, busy_revisions[0], None, None)?;
    let missing = Uuid::new_v4();

    let report = fixture
        .planner
        .bulk_delete(
            fixture.owner_id,
            BulkRequest {
                kind: EntityKind::Document,
                ids: vec![busy_id, free_id, missing, free_id],
                dry_run: false,
                force: false,
            },
        )
        .await?;

    assert_eq!(report.total, 3);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.blocked, 1);
    assert_eq!(report.revisions_deleted, 2);
    assert!(matches!(report.items[0].outcome, BulkOutcome::Blocked { .. }));
    assert!(matches!(report.items[1].outcome, BulkOutcome::Deleted { .. }));
    assert!(matches!(report.items[2].outcome, BulkOutcome::NotFound));

    let snapshot = fixture.snapshot()?;
    assert!(!snapshot.documents.contains_key(&free_id));
    assert!(snapshot.documents.contains_key(&busy_id));
    Ok(())
}

#[tokio::test]
async fn dry_run_accounts_for_earlier_items_and_commits_nothing() -> Result<()> {
    let fixture = Fixture::new();
    let (document_id, revisions) = fixture.document(1)?;
    let derived_id = fixture.revision(document_id, false)?;
    let first = fixture.reference(document_id, revisions[0], Some(derived_id), None)?;
    let second = fixture.reference(document_id, revisions[0], Some(derived_id), None)?;
    let before = fixture.snapshot()?;

    let report = fixture
        .planner
        .bulk_delete(
            fixture.owner_id,
            BulkRequest {
                kind: EntityKind::Reference,
                ids: vec![first, second, Uuid::new_v4()],
                dry_run: true,
                force: false,
            },
        )
        .await?;

    assert_eq!(report.total, 3);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.revisions_deleted, 1);

    let BulkOutcome::Previewed { plan: first_plan } = &report.items[0].outcome else {
        panic!("expected preview for first item");
    };
    assert!(!first_plan.delete.contains(&EntityRef::revision(derived_id)));
    let BulkOutcome::Previewed { plan: second_plan } = &report.items[1].outcome else {
        panic!("expected preview for second item");
    };
    assert!(second_plan.delete.contains(&EntityRef::revision(derived_id)));
    assert!(matches!(report.items[2].outcome, BulkOutcome::NotFound));

    assert_eq!(fixture.snapshot()?, before);
    Ok(())
}

#[tokio::test]
async fn forced_bulk_delete_clears_referenced_documents() -> Result<()> {
    let fixture = Fixture::new();
    let mut documents = Vec::new();
    for _ in 0..4 {
        let (document_id, revisions) = fixture.document(2)?;
        fixture.reference(document_id, revisions[1], None, None)?;
        documents.push(document_id);
    }

    let report = fixture
        .planner
        .bulk_delete(
            fixture.owner_id,
            BulkRequest {
                kind: EntityKind::Document,
                ids: documents,
                dry_run: false,
                force: true,
            },
        )
        .await?;

    assert_eq!(report.deleted, 4);
    assert_eq!(report.revisions_deleted, 8);
    let snapshot = fixture.snapshot()?;
    assert!(snapshot.documents.is_empty());
    assert!(snapshot.references.is_empty());
    Ok(())
}

/// Wraps the memory store. Deleting `vanishing` reports a missing row and
/// deleting `crashing` panics once the transaction has been rolled back.
struct FaultyStore {
    inner: Arc<MemoryStore>,
    vanishing: Uuid,
    crashing: Uuid,
}

impl EntityStore for FaultyStore {
    fn with_transaction(&self, mode: TxMode, body: &mut TxBody<'_>) -> PlannerResult<()> {
        let mut crashed = false;
        let outcome = self.inner.with_transaction(mode, &mut |tx: &mut dyn StoreTx| {
            let mut faulty = FaultyTx {
                inner: tx,
                vanishing: self.vanishing,
                crashing: self.crashing,
                crashed: &mut crashed,
            };
            body(&mut faulty)
        });
        if crashed {
            panic!("storage crashed while deleting document {}", self.crashing);
        }
        outcome
    }
}

struct FaultyTx<'a> {
    inner: &'a mut dyn StoreTx,
    vanishing: Uuid,
    crashing: Uuid,
    crashed: &'a mut bool,
}

impl StoreTx for FaultyTx<'_> {
    fn document(&mut self, id: Uuid) -> PlannerResult<Option<Document>> {
        self.inner.document(id)
    }

    fn revision(&mut self, id: Uuid) -> PlannerResult<Option<Revision>> {
        self.inner.revision(id)
    }

    fn reference(&mut self, id: Uuid) -> PlannerResult<Option<Reference>> {
        self.inner.reference(id)
    }

    fn auxiliary_document(&mut self, id: Uuid) -> PlannerResult<Option<AuxiliaryDocument>> {
        self.inner.auxiliary_document(id)
    }

    fn revisions_of(&mut self, document_id: Uuid) -> PlannerResult<Vec<Revision>> {
        self.inner.revisions_of(document_id)
    }

    fn count_revisions(&mut self, document_id: Uuid) -> PlannerResult<i64> {
        self.inner.count_revisions(document_id)
    }

    fn references_to_document(
        &mut self,
        document_id: Uuid,
        revision_ids: &[Uuid],
    ) -> PlannerResult<Vec<Reference>> {
        self.inner.references_to_document(document_id, revision_ids)
    }

    fn references_with_primary(&mut self, revision_ids: &[Uuid]) -> PlannerResult<Vec<Reference>> {
        self.inner.references_with_primary(revision_ids)
    }

    fn references_with_derived(&mut self, revision_ids: &[Uuid]) -> PlannerResult<Vec<Reference>> {
        self.inner.references_with_derived(revision_ids)
    }

    fn references_to_auxiliary(&mut self, auxiliary_id: Uuid) -> PlannerResult<Vec<Reference>> {
        self.inner.references_to_auxiliary(auxiliary_id)
    }

    fn delete_document(&mut self, id: Uuid) -> PlannerResult<bool> {
        if id == self.vanishing {
            return Ok(false);
        }
        if id == self.crashing {
            *self.crashed = true;
            return Err(PlannerError::storage("connection reset"));
        }
        self.inner.delete_document(id)
    }

    fn delete_revision(&mut self, id: Uuid) -> PlannerResult<bool> {
        self.inner.delete_revision(id)
    }

    fn delete_reference(&mut self, id: Uuid) -> PlannerResult<bool> {
        self.inner.delete_reference(id)
    }

    fn delete_auxiliary_document(&mut self, id: Uuid) -> PlannerResult<bool> {
        self.inner.delete_auxiliary_document(id)
    }

    fn clear_link(&mut self, reference_id: Uuid, link: ReferenceLink) -> PlannerResult<bool> {
        self.inner.clear_link(reference_id, link)
    }

    fn repoint_reference(
        &mut self,
        reference_id: Uuid,
        document_id: Uuid,
        revision_id: Uuid,
    ) -> PlannerResult<bool> {
        self.inner
            .repoint_reference(reference_id, document_id, revision_id)
    }
}

#[tokio::test]
async fn failing_lanes_leave_the_others_alone() -> Result<()> {
    let fixture = Fixture::new();
    let (first_id, _) = fixture.document(2)?;
    let (vanishing_id, _) = fixture.document(1)?;
    let (crashing_id, _) = fixture.document(1)?;
    let (last_id, _) = fixture.document(1)?;

    let store = Arc::new(FaultyStore {
        inner: fixture.store.clone(),
        vanishing: vanishing_id,
        crashing: crashing_id,
    });
    let planner = Planner::new(store, PlannerSettings::default());

    let report = planner
        .bulk_delete(
            fixture.owner_id,
            BulkRequest {
                kind: EntityKind::Document,
                ids: vec![first_id, vanishing_id, crashing_id, last_id],
                dry_run: false,
                force: false,
            },
        )
        .await?;

    assert_eq!(report.total, 4);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.revisions_deleted, 3);
    assert!(matches!(report.items[0].outcome, BulkOutcome::Deleted { .. }));
    match &report.items[1].outcome {
        BulkOutcome::Failed { error } => assert!(error.contains("concurrent modification")),
        other => panic!("expected a conflict, got {other:?}"),
    }
    match &report.items[2].outcome {
        BulkOutcome::Failed { error } => assert!(error.contains("panicked")),
        other => panic!("expected a crashed lane, got {other:?}"),
    }
    assert!(matches!(report.items[3].outcome, BulkOutcome::Deleted { .. }));

    let snapshot = fixture.snapshot()?;
    assert!(!snapshot.documents.contains_key(&first_id));
    assert!(!snapshot.documents.contains_key(&last_id));
    assert!(snapshot.documents.contains_key(&vanishing_id));
    assert!(snapshot.documents.contains_key(&crashing_id));
    assert_eq!(
        snapshot
            .revisions
            .values()
            .filter(|revision| revision.document_id == vanishing_id)
            .count(),
        1
    );
    Ok(())
}
