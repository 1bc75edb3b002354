//! Bulk deletion across many targets of one kind.
//!
//! Live runs plan every item up front, group items whose plans touch a common
//! entity into lanes, and execute lanes concurrently while items inside a lane
//! run one after another. Dry runs apply every plan inside one transaction
//! that is always rolled back.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{error, info};
use uuid::Uuid;

use super::plan::{Blocked, ExecutionResult, Plan};
use super::{executor, plan_for, EntityKind, EntityRef, Planner, PlannerError, PlannerResult};
use crate::store::{self, TxMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRequest {
    pub kind: EntityKind,
    pub ids: Vec<Uuid>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub target: EntityRef,
    #[serde(flatten)]
    pub outcome: BulkOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BulkOutcome {
    Previewed { plan: Plan },
    Deleted { result: ExecutionResult },
    Blocked { blocked: Blocked },
    NotFound,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    pub total: usize,
    /// Items deleted, or that would be deleted on a dry run.
    pub deleted: usize,
    pub blocked: usize,
    pub failed: usize,
    pub revisions_deleted: usize,
    pub items: Vec<BulkItemResult>,
}

impl BulkReport {
    fn from_items(items: Vec<BulkItemResult>) -> Self {
        let mut report = BulkReport {
            total: items.len(),
            deleted: 0,
            blocked: 0,
            failed: 0,
            revisions_deleted: 0,
            items: Vec::new(),
        };

        for item in &items {
            match &item.outcome {
                BulkOutcome::Previewed { plan } if plan.can_delete => {
                    report.deleted += 1;
                    report.revisions_deleted += plan.revisions_deleted();
                }
                BulkOutcome::Previewed { .. } | BulkOutcome::Blocked { .. } => report.blocked += 1,
                BulkOutcome::Deleted { result } => {
                    report.deleted += 1;
                    report.revisions_deleted += result
                        .deleted
                        .iter()
                        .filter(|entity| entity.kind == EntityKind::Revision)
                        .count();
                }
                BulkOutcome::Failed { .. } => report.failed += 1,
                BulkOutcome::NotFound => {}
            }
        }

        report.items = items;
        report
    }
}

type Lane = Vec<(usize, EntityRef)>;

impl Planner {
    pub async fn bulk_delete(
        &self,
        owner_id: Uuid,
        request: BulkRequest,
    ) -> PlannerResult<BulkReport> {
        let mut seen = BTreeSet::new();
        let targets: Vec<EntityRef> = request
            .ids
            .iter()
            .filter(|id| seen.insert(**id))
            .map(|id| EntityRef::new(request.kind, *id))
            .collect();

        let items = if request.dry_run {
            let planner = self.clone();
            let force = request.force;
            task::spawn_blocking(move || planner.dry_run_all(owner_id, &targets, force))
                .await
                .map_err(|err| PlannerError::storage(format!("bulk dry run panicked: {err}")))??
        } else {
            self.run_independent(owner_id, targets, request.force).await?
        };

        let report = BulkReport::from_items(items);
        info!(
            kind = %request.kind,
            dry_run = request.dry_run,
            total = report.total,
            deleted = report.deleted,
            blocked = report.blocked,
            failed = report.failed,
            revisions_deleted = report.revisions_deleted,
            "bulk deletion finished"
        );
        Ok(report)
    }

    fn dry_run_all(
        &self,
        owner_id: Uuid,
        targets: &[EntityRef],
        force: bool,
    ) -> PlannerResult<Vec<BulkItemResult>> {
        store::transaction(self.store(), TxMode::RollbackOnly, |tx| {
            let mut items = Vec::with_capacity(targets.len());

            for target in targets {
                match plan_for(tx, owner_id, *target, force) {
                    Ok(plan) => {
                        if plan.can_delete {
                            executor::apply(tx, &plan)?;
                        }
                        items.push(item(*target, BulkOutcome::Previewed { plan }));
                    }
                    Err(err) if err.is_not_found() => {
                        items.push(item(*target, BulkOutcome::NotFound));
                    }
                    Err(err) => return Err(err),
                }
            }

            Ok(items)
        })
    }

    async fn run_independent(
        &self,
        owner_id: Uuid,
        targets: Vec<EntityRef>,
        force: bool,
    ) -> PlannerResult<Vec<BulkItemResult>> {
        let planner = self.clone();
        let lanes = task::spawn_blocking(move || planner.plan_lanes(owner_id, &targets, force))
            .await
            .map_err(|err| PlannerError::storage(format!("bulk footprint pass panicked: {err}")))?;
        let workers = self.settings().bulk_max_workers.max(1);

        let finished: Vec<Vec<(usize, BulkItemResult)>> = stream::iter(lanes)
            .map(|lane| {
                let planner = self.clone();
                async move {
                    let fallback = lane.clone();
                    match task::spawn_blocking(move || planner.run_lane(owner_id, &lane, force))
                        .await
                    {
                        Ok(results) => results,
                        Err(join_err) => {
                            error!(error = %join_err, "bulk deletion lane panicked");
                            fallback
                                .into_iter()
                                .map(|(index, target)| {
                                    let outcome = BulkOutcome::Failed {
                                        error: format!("worker panicked: {join_err}"),
                                    };
                                    (index, item(target, outcome))
                                })
                                .collect()
                        }
                    }
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut ordered: Vec<(usize, BulkItemResult)> = finished.into_iter().flatten().collect();
        ordered.sort_by_key(|(index, _)| *index);
        Ok(ordered.into_iter().map(|(_, result)| result).collect())
    }

    /// Read-only pass computing each item's footprint. Items that cannot be
    /// planned get a lane of their own and report their error when run.
    fn plan_lanes(&self, owner_id: Uuid, targets: &[EntityRef], force: bool) -> Vec<Lane> {
        let footprints: Vec<BTreeSet<EntityRef>> = targets
            .iter()
            .map(|target| match self.preview(owner_id, *target, force) {
                Ok(plan) => plan.footprint(),
                Err(_) => BTreeSet::from([*target]),
            })
            .collect();
        partition_lanes(targets, &footprints)
    }

    /// Runs a lane sequentially, one transaction per item.
    fn run_lane(
        &self,
        owner_id: Uuid,
        lane: &[(usize, EntityRef)],
        force: bool,
    ) -> Vec<(usize, BulkItemResult)> {
        let mut results = Vec::with_capacity(lane.len());

        for (index, target) in lane {
            let outcome = match self.delete(owner_id, *target, force) {
                Ok(result) => BulkOutcome::Deleted { result },
                Err(PlannerError::Blocked(blocked)) => BulkOutcome::Blocked { blocked: *blocked },
                Err(err) if err.is_not_found() => BulkOutcome::NotFound,
                Err(err) => BulkOutcome::Failed {
                    error: err.to_string(),
                },
            };
            results.push((*index, item(*target, outcome)));
        }

        results
    }
}

fn item(target: EntityRef, outcome: BulkOutcome) -> BulkItemResult {
    BulkItemResult { target, outcome }
}

/// Groups items whose footprints overlap, transitively. Lanes keep input order.
fn partition_lanes(targets: &[EntityRef], footprints: &[BTreeSet<EntityRef>]) -> Vec<Lane> {
    let mut parent: Vec<usize> = (0..targets.len()).collect();
    let mut first_owner: BTreeMap<EntityRef, usize> = BTreeMap::new();

    for (index, footprint) in footprints.iter().enumerate() {
        for entity in footprint {
            match first_owner.entry(*entity) {
                Entry::Occupied(owner) => union(&mut parent, index, *owner.get()),
                Entry::Vacant(slot) => {
                    slot.insert(index);
                }
            }
        }
    }

    let mut lanes: BTreeMap<usize, Lane> = BTreeMap::new();
    for (index, target) in targets.iter().enumerate() {
        let root = find(&mut parent, index);
        lanes.entry(root).or_default().push((index, *target));
    }
    let mut lanes: Vec<Lane> = lanes.into_values().collect();
    lanes.sort_by_key(|lane| lane.first().map(|(index, _)| *index));
    lanes
}

fn find(parent: &mut [usize], mut node: usize) -> usize {
    while parent[node] != node {
        parent[node] = parent[parent[node]];
        node = parent[node];
    }
    node
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let root_a = find(parent, a);
    let root_b = find(parent, b);
    if root_a != root_b {
        parent[root_a.max(root_b)] = root_a.min(root_b);
    }
}
