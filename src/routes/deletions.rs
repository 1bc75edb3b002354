use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::planner::{
    BulkReport, BulkRequest, EntityKind, EntityRef, Plan, ReassignRequest, ReassignResult,
};
use crate::state::AppState;

/// Path segment naming the collection a target lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Documents,
    Revisions,
    References,
    AuxiliaryDocuments,
}

impl From<ResourceKind> for EntityKind {
    fn from(value: ResourceKind) -> Self {
        match value {
            ResourceKind::Documents => EntityKind::Document,
            ResourceKind::Revisions => EntityKind::Revision,
            ResourceKind::References => EntityKind::Reference,
            ResourceKind::AuxiliaryDocuments => EntityKind::AuxiliaryDocument,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PreviewQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeletePayload {
    pub ids: Vec<Uuid>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReassignPayload {
    pub target_document_id: Uuid,
    pub target_revision_id: Option<Uuid>,
    pub reference_ids: Option<Vec<Uuid>>,
}

pub async fn deletion_preview(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((kind, id)): Path<(ResourceKind, Uuid)>,
    Query(query): Query<PreviewQuery>,
) -> AppResult<Json<Plan>> {
    let target = EntityRef::new(kind.into(), id);
    let plan = state.planner.preview(user.user_id, target, query.force)?;
    Ok(Json(plan))
}

/// Deletes the target, or only plans it when `dry_run` is set.
pub async fn delete_entity(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((kind, id)): Path<(ResourceKind, Uuid)>,
    Query(query): Query<DeleteQuery>,
) -> AppResult<Response> {
    let target = EntityRef::new(kind.into(), id);
    if query.dry_run {
        let plan = state.planner.preview(user.user_id, target, query.force)?;
        return Ok(Json(plan).into_response());
    }

    let result = state.planner.delete(user.user_id, target, query.force)?;
    Ok(Json(result).into_response())
}

pub async fn bulk_delete(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(kind): Path<ResourceKind>,
    Json(payload): Json<BulkDeletePayload>,
) -> AppResult<Json<BulkReport>> {
    if payload.ids.is_empty() {
        return Err(AppError::bad_request("ids must not be empty"));
    }

    let request = BulkRequest {
        kind: kind.into(),
        ids: payload.ids,
        dry_run: payload.dry_run,
        force: payload.force,
    };
    let report = state.planner.bulk_delete(user.user_id, request).await?;
    Ok(Json(report))
}

pub async fn reassign_references(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((kind, id)): Path<(ResourceKind, Uuid)>,
    Json(payload): Json<ReassignPayload>,
) -> AppResult<Json<ReassignResult>> {
    if kind != ResourceKind::Documents {
        return Err(AppError::bad_request(
            "only documents can have their references reassigned",
        ));
    }

    let request = ReassignRequest {
        source_document_id: id,
        target_document_id: payload.target_document_id,
        target_revision_id: payload.target_revision_id,
        reference_ids: payload.reference_ids,
    };
    let result = state.planner.reassign(user.user_id, &request)?;
    Ok(Json(result))
}
