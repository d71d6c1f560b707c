use crate::{
    config::AppConfig, executor::QueryExecutor, notify::Notifier, registry::ViewRegistry,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ViewRegistry>,
    pub executor: QueryExecutor,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<ViewRegistry>,
        executor: QueryExecutor,
        notifier: Notifier,
    ) -> Self {
        Self {
            config,
            registry,
            executor,
            notifier,
        }
    }
}
