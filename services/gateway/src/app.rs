//! Gateway application wiring: shared state and route composition.
use crate::api;
use crate::blacklist::Blacklist;
use crate::config::GatewayConfig;
use crate::event_types::EventTypeRegistry;
use crate::features::FeatureToggles;
use crate::limits::ConsumerLimiter;
use axum::Router;
use axum::routing::{get, post};
use hermod_broker::TopicRepository;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<TopicRepository>,
    pub event_types: Arc<EventTypeRegistry>,
    pub limiter: Arc<ConsumerLimiter>,
    pub blacklist: Arc<Blacklist>,
    pub features: Arc<FeatureToggles>,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(repository: Arc<TopicRepository>, config: GatewayConfig) -> Self {
        let features = FeatureToggles::from_names(
            config.features_enabled.iter().map(String::as_str),
        );
        Self {
            repository,
            event_types: Arc::new(EventTypeRegistry::new()),
            limiter: Arc::new(ConsumerLimiter::new(config.max_streams_per_partition)),
            blacklist: Arc::new(Blacklist::new()),
            features: Arc::new(features),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/event-types", post(api::event_types::create_event_type))
        .route(
            "/event-types/:name",
            axum::routing::delete(api::event_types::delete_event_type),
        )
        .route(
            "/event-types/:name/events",
            get(api::events::stream_events).post(api::publish::publish_events),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
