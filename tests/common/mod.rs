use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use http_body_util::BodyExt;
use jobtrail::auth::jwt::JwtService;
use jobtrail::config::AppConfig;
use jobtrail::db;
use jobtrail::models::{NewAuxiliaryDocument, NewDocument, NewReference, NewRevision};
use jobtrail::planner::{Planner, PlannerSettings};
use jobtrail::routes;
use jobtrail::state::AppState;
use jobtrail::store::{MemorySnapshot, MemoryStore};
use serde::Serialize;
use tower::util::ServiceExt;
use uuid::Uuid;

/// An in-memory store with a planner on top, seeded through small helpers.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub planner: Planner,
    pub owner_id: Uuid,
}

#[allow(dead_code)]
impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(PlannerSettings::default())
    }

    pub fn with_settings(settings: PlannerSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let planner = Planner::new(store.clone(), settings);
        Self {
            store,
            planner,
            owner_id: Uuid::new_v4(),
        }
    }

    /// A document owned by the fixture owner whose first revision is the original.
    pub fn document(&self, revisions: usize) -> Result<(Uuid, Vec<Uuid>)> {
        self.document_for(self.owner_id, revisions)
    }

    pub fn document_for(&self, owner_id: Uuid, revisions: usize) -> Result<(Uuid, Vec<Uuid>)> {
        let document = self.store.insert_document(NewDocument {
            id: Uuid::new_v4(),
            owner_id,
            title: "Resume".to_string(),
        })?;
        let mut revision_ids = Vec::with_capacity(revisions);
        for index in 0..revisions {
            revision_ids.push(self.revision(document.id, index == 0)?);
        }
        Ok((document.id, revision_ids))
    }

    pub fn revision(&self, document_id: Uuid, is_original: bool) -> Result<Uuid> {
        let revision = self.store.insert_revision(NewRevision {
            id: Uuid::new_v4(),
            document_id,
            label: if is_original { "original" } else { "tailored" }.to_string(),
            is_original,
            source_context: (!is_original).then(|| "Senior backend engineer".to_string()),
        })?;
        Ok(revision.id)
    }

    pub fn auxiliary(&self) -> Result<Uuid> {
        let auxiliary = self.store.insert_auxiliary_document(NewAuxiliaryDocument {
            id: Uuid::new_v4(),
            owner_id: self.owner_id,
            title: "Cover letter".to_string(),
        })?;
        Ok(auxiliary.id)
    }

    pub fn reference(
        &self,
        document_id: Uuid,
        revision_id: Uuid,
        derived_revision_id: Option<Uuid>,
        auxiliary_document_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let reference = self.store.insert_reference(NewReference {
            id: Uuid::new_v4(),
            owner_id: self.owner_id,
            document_id,
            revision_id,
            derived_revision_id,
            auxiliary_document_id,
            company: "Acme".to_string(),
            position: "Engineer".to_string(),
            status: "applied".to_string(),
        })?;
        Ok(reference.id)
    }

    pub fn snapshot(&self) -> Result<MemorySnapshot> {
        Ok(self.store.snapshot()?)
    }
}

pub struct TestApp {
    pub fixture: Fixture,
    pub state: AppState,
    router: Router,
}

#[allow(dead_code)]
impl TestApp {
    pub fn new() -> Result<Self> {
        let config = AppConfig {
            database_url: "postgres://localhost/jobtrail_unused".to_string(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            bulk_max_workers: 2,
            conflict_max_retries: 0,
        };

        let fixture = Fixture::with_settings(config.planner_settings());
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(fixture.planner.clone(), config, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            fixture,
            state,
            router,
        })
    }

    pub fn token(&self) -> Result<String> {
        self.token_for(self.fixture.owner_id)
    }

    pub fn token_for(&self, owner_id: Uuid) -> Result<String> {
        Ok(self.state.jwt.generate_token(owner_id)?)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_to_json(body: Body) -> Result<serde_json::Value> {
    let bytes = body_to_vec(body).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
