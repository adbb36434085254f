use axum::{Router, http::Method, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::Connector;
use crate::handlers::phase::phase_handler;
use crate::service::PhaseService;

pub struct PhaseState<C: Connector> {
    pub service: Arc<PhaseService<C>>,
}

impl<C: Connector> PhaseState<C> {
    pub fn new(service: PhaseService<C>) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

impl<C: Connector> Clone for PhaseState<C> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

pub fn phase_router<C: Connector>(state: PhaseState<C>) -> Router {
    // The viewer is served from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/phase", get(phase_handler::<C>))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
