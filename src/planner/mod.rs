//! Cascade-deletion planner.
//!
//! A request flows through [`graph`] (load the bounded dependency subgraph),
//! [`policy`] (resolve every edge through the policy table), [`plan`]
//! (deduplicate and order the outcome) and, unless it is a dry run,
//! [`executor`] (apply the plan inside the same transaction).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::store::{self, EntityStore, StoreTx, TxMode};

pub mod bulk;
pub mod error;
pub mod executor;
pub mod graph;
pub mod plan;
pub mod policy;
pub mod reassign;

pub use bulk::{BulkItemResult, BulkOutcome, BulkReport, BulkRequest};
pub use error::{PlannerError, PlannerResult};
pub use plan::{
    BlockReason, Blocked, DeleteOption, Detachment, ExecutionResult, Plan, PreserveReason,
    Preserved,
};
pub use reassign::{ReassignRequest, ReassignResult};

pub const DEFAULT_BULK_MAX_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Reference,
    Revision,
    Document,
    AuxiliaryDocument,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Reference => "reference",
            EntityKind::Revision => "revision",
            EntityKind::Document => "document",
            EntityKind::AuxiliaryDocument => "auxiliary document",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityRef {
    pub const fn new(kind: EntityKind, id: Uuid) -> Self {
        Self { kind, id }
    }

    pub const fn document(id: Uuid) -> Self {
        Self::new(EntityKind::Document, id)
    }

    pub const fn revision(id: Uuid) -> Self {
        Self::new(EntityKind::Revision, id)
    }

    pub const fn reference(id: Uuid) -> Self {
        Self::new(EntityKind::Reference, id)
    }

    pub const fn auxiliary_document(id: Uuid) -> Self {
        Self::new(EntityKind::AuxiliaryDocument, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerSettings {
    /// Upper bound on concurrently executing bulk lanes.
    pub bulk_max_workers: usize,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            bulk_max_workers: DEFAULT_BULK_MAX_WORKERS,
        }
    }
}

/// Entry point for preview, delete, reassign and bulk deletion.
#[derive(Clone)]
pub struct Planner {
    store: Arc<dyn EntityStore>,
    settings: PlannerSettings,
}

impl Planner {
    pub fn new(store: Arc<dyn EntityStore>, settings: PlannerSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> PlannerSettings {
        self.settings
    }

    /// Computes what deleting `target` would do. Never mutates storage.
    pub fn preview(&self, owner_id: Uuid, target: EntityRef, force: bool) -> PlannerResult<Plan> {
        store::transaction(self.store.as_ref(), TxMode::ReadOnly, |tx| {
            plan_for(tx, owner_id, target, force)
        })
    }

    /// Plans and applies the deletion of `target` in one transaction.
    ///
    /// Returns [`PlannerError::Blocked`] without touching storage when the
    /// plan carries block reasons.
    pub fn delete(
        &self,
        owner_id: Uuid,
        target: EntityRef,
        force: bool,
    ) -> PlannerResult<ExecutionResult> {
        let outcome = store::transaction(self.store.as_ref(), TxMode::ReadWrite, |tx| {
            let plan = plan_for(tx, owner_id, target, force)?;
            if let Some(blocked) = plan.blocked() {
                return Err(blocked.into());
            }
            executor::apply(tx, &plan)
        });

        match &outcome {
            Ok(result) => info!(
                target = %target,
                force,
                deleted = result.deleted.len(),
                detached = result.detached.len(),
                preserved = result.preserved.len(),
                "deletion committed"
            ),
            Err(PlannerError::Blocked(blocked)) => warn!(
                target = %target,
                reasons = blocked.reasons.len(),
                application_count = blocked.application_count,
                "deletion blocked"
            ),
            Err(err @ PlannerError::InvariantViolation(_)) => {
                error!(target = %target, error = %err, "deletion aborted by invariant check")
            }
            Err(_) => {}
        }

        outcome
    }

    /// Moves references from one document to another without deleting anything.
    pub fn reassign(
        &self,
        owner_id: Uuid,
        request: &ReassignRequest,
    ) -> PlannerResult<ReassignResult> {
        let outcome = store::transaction(self.store.as_ref(), TxMode::ReadWrite, |tx| {
            reassign::apply(tx, owner_id, request)
        });

        if let Ok(result) = &outcome {
            info!(
                source_document_id = %result.source_document_id,
                target_document_id = %result.target_document_id,
                reassigned = result.reassigned.len(),
                "references reassigned"
            );
        }

        outcome
    }

    pub(crate) fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }
}

/// Builds the plan for `target` inside an open transaction.
pub(crate) fn plan_for(
    tx: &mut dyn StoreTx,
    owner_id: Uuid,
    target: EntityRef,
    force: bool,
) -> PlannerResult<Plan> {
    let graph = graph::build(tx, owner_id, target)?;
    let resolutions = policy::resolve(&graph, force);
    Ok(plan::calculate(&graph, force, &resolutions))
}
