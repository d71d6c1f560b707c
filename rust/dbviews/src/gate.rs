//! Per-request checks that run before any SQL is composed.
//!
//! Gates run in a fixed order and the first failure wins: the view must
//! exist, the caller must be authenticated, the parameters must validate,
//! and a database connection must be available.

use crate::{
    error::{Result, ServiceError},
    executor::Lease,
    notify::Notification,
    params::{self, ValidatedParameters},
    registry::ViewDefinition,
    state::AppState,
};
use async_trait::async_trait;
use axum::http::HeaderMap;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};

/// What the gates learn about a request as they pass it along.
#[derive(Debug)]
pub struct RequestContext {
    pub view_name: String,
    pub headers: HeaderMap,
    pub params: HashMap<String, String>,
    pub view: Option<Arc<ViewDefinition>>,
    pub values: Option<ValidatedParameters>,
    pub lease: Option<Lease>,
}

impl RequestContext {
    pub fn new(view_name: String, headers: HeaderMap, params: HashMap<String, String>) -> Self {
        Self {
            view_name,
            headers,
            params,
            view: None,
            values: None,
            lease: None,
        }
    }

    fn view(&self) -> Result<&Arc<ViewDefinition>> {
        self.view.as_ref().ok_or_else(|| {
            ServiceError::Internal(anyhow::anyhow!("view not resolved before use"))
        })
    }
}

#[async_trait]
pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, state: &AppState, ctx: &mut RequestContext) -> Result<()>;
}

pub struct ViewExists;

#[async_trait]
impl Gate for ViewExists {
    fn name(&self) -> &'static str {
        "view_exists"
    }

    async fn check(&self, state: &AppState, ctx: &mut RequestContext) -> Result<()> {
        ctx.view = Some(state.registry.lookup(&ctx.view_name)?);
        Ok(())
    }
}

pub struct Authenticated;

#[async_trait]
impl Gate for Authenticated {
    fn name(&self) -> &'static str {
        "authenticated"
    }

    async fn check(&self, state: &AppState, ctx: &mut RequestContext) -> Result<()> {
        match &state.config.credentials {
            Some(credentials) if !credentials.authorize(&ctx.headers, &ctx.params) => {
                Err(ServiceError::Auth)
            }
            _ => Ok(()),
        }
    }
}

pub struct ParametersValid;

#[async_trait]
impl Gate for ParametersValid {
    fn name(&self) -> &'static str {
        "parameters_valid"
    }

    async fn check(&self, state: &AppState, ctx: &mut RequestContext) -> Result<()> {
        let values = params::validate(ctx.view()?, &ctx.params, &state.config.sql_date_format)?;
        ctx.values = Some(values);
        Ok(())
    }
}

pub struct DatabaseAvailable;

#[async_trait]
impl Gate for DatabaseAvailable {
    fn name(&self) -> &'static str {
        "database_available"
    }

    async fn check(&self, state: &AppState, ctx: &mut RequestContext) -> Result<()> {
        match state.executor.acquire().await {
            Ok(lease) => {
                ctx.lease = Some(lease);
                Ok(())
            }
            Err(ServiceError::DatabaseUnavailable(detail)) => {
                warn!(view = %ctx.view_name, error = %detail, "no database connection available");
                let notifier = state.notifier.clone();
                let notification = Notification::database_unavailable(&detail);
                tokio::spawn(async move { notifier.alert(notification).await });
                Err(ServiceError::DatabaseUnavailable(detail))
            }
            Err(err) => Err(err),
        }
    }
}

/// Ordered set of gates applied to every view request.
pub struct Pipeline {
    gates: Vec<Box<dyn Gate>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ViewExists),
            Box::new(Authenticated),
            Box::new(ParametersValid),
            Box::new(DatabaseAvailable),
        ])
    }
}

impl Pipeline {
    pub fn new(gates: Vec<Box<dyn Gate>>) -> Self {
        Self { gates }
    }

    pub async fn run(&self, state: &AppState, ctx: &mut RequestContext) -> Result<()> {
        for gate in &self.gates {
            if let Err(err) = gate.check(state, ctx).await {
                debug!(view = %ctx.view_name, gate = gate.name(), error = %err, "request rejected");
                return Err(err);
            }
        }
        Ok(())
    }
}
