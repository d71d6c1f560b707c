use crate::{
    compose,
    config::AppConfig,
    db::{self, PgPool},
    error::{Result, ServiceError},
    executor::QueryExecutor,
    gate::{Pipeline, RequestContext},
    notify::{Notification, Notifier},
    registry::ViewRegistry,
    state::AppState,
};
use anyhow::Context;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use once_cell::sync::Lazy;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

static PIPELINE: Lazy<Pipeline> = Lazy::new(Pipeline::default);

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
}

impl Server {
    /// Loads the view definitions and opens the pool. A views file that
    /// cannot be loaded is reported to the operators and aborts startup.
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let notifier = Notifier::from_config(config.notify.clone(), config.notify_cooldown)?;

        let registry = match ViewRegistry::load(&config.views_path) {
            Ok(registry) => registry,
            Err(err) => {
                error!(error = %err, "failed to load view definitions");
                notifier
                    .notify(Notification::views_config_unavailable(&err.to_string()))
                    .await;
                return Err(err).context("views configuration could not be loaded");
            }
        };

        let pool = db::connect_pool(&config).await?;
        Ok(Self::from_parts(config, registry, pool, notifier))
    }

    /// Assembles a server from already-built collaborators.
    pub fn from_parts(
        config: AppConfig,
        registry: ViewRegistry,
        pool: PgPool,
        notifier: Notifier,
    ) -> Self {
        let config = Arc::new(config);
        let executor = QueryExecutor::new(
            pool,
            config.max_concurrent_queries,
            config.request_timeout,
            config.max_rows,
            config.output_date_format.clone(),
        );
        let state = AppState::new(Arc::clone(&config), Arc::new(registry), executor, notifier);

        Self { config, state }
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.state.executor
    }

    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/healthz", get(Self::health))
            .route("/:view", get(Self::view))
            .with_state(self.state.clone())
            .layer(CompressionLayer::new().gzip(true))
            .layer(TraceLayer::new_for_http());

        match cors_layer(&self.config) {
            Some(cors) => router.layer(cors),
            None => router,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, views = self.state.registry.len(), "view service listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
        Json(json!({ "status": "ok", "views": state.registry.len() }))
    }

    async fn view(
        State(state): State<AppState>,
        Path(view_name): Path<String>,
        Query(params): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> Result<Response> {
        let mut ctx = RequestContext::new(view_name, headers, params);
        PIPELINE.run(&state, &mut ctx).await?;

        let (view, values, lease) = match (ctx.view, ctx.values, ctx.lease) {
            (Some(view), Some(values), Some(lease)) => (view, values, lease),
            _ => {
                return Err(ServiceError::Internal(anyhow::anyhow!(
                    "request passed the gates without a view, values or lease"
                )))
            }
        };

        let query = compose::compose(&view, &values)?;
        let body = state.executor.execute(&view.name, lease, query).await?;

        Ok((
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            Body::from_stream(body),
        )
            .into_response())
    }
}

fn cors_layer(config: &AppConfig) -> Option<CorsLayer> {
    let origins = config.allowed_origins.as_ref()?;
    let layer = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([header::AUTHORIZATION]);

    if origins.iter().any(|origin| origin == "*") {
        return Some(layer.allow_origin(AllowOrigin::any()));
    }

    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                error!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    Some(layer.allow_origin(AllowOrigin::list(values)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_only_when_origins_configured() {
        let mut config = AppConfig::embedded("postgres://unused/db".into());
        assert!(cors_layer(&config).is_none());

        config.allowed_origins = Some(vec!["https://dash.example".into()]);
        assert!(cors_layer(&config).is_some());

        config.allowed_origins = Some(vec!["*".into()]);
        assert!(cors_layer(&config).is_some());
    }
}
