use std::sync::Arc;

use crate::{auth::jwt::JwtService, config::AppConfig, planner::Planner};

#[derive(Clone)]
pub struct AppState {
    pub planner: Planner,
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(planner: Planner, config: AppConfig, jwt: JwtService) -> Self {
        Self {
            planner,
            config: Arc::new(config),
            jwt,
        }
    }
}
