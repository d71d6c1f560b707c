//! View definitions loaded once from the JSON configuration document.

use crate::{
    error::{Result, ServiceError},
    template::{QueryTemplate, TemplateError},
};
use serde::Deserialize;
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::info;

pub const REQUIRED_PLACEHOLDER: &str = "parameters";
pub const OPTIONAL_PLACEHOLDER: &str = "optionals";

/// Query-string keys consumed by authentication; views cannot declare them.
const RESERVED_PARAMETERS: [&str; 2] = ["user", "pass"];
const RESERVED_VIEW_NAMES: [&str; 1] = ["healthz"];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("views configuration '{path}' could not be read: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("views configuration '{path}' is malformed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("view name '{0}' is not allowed")]
    InvalidViewName(String),

    #[error("view '{view}': invalid parameter name '{name}'")]
    InvalidParameter { view: String, name: String },

    #[error("view '{view}': parameter '{name}' is declared more than once")]
    DuplicateParameter { view: String, name: String },

    #[error("view '{view}': optional_query and optional_parameters must be declared together")]
    UnpairedOptional { view: String },

    #[error("view '{view}': {field} does not reference its declared parameters")]
    UnusedParameters { view: String, field: &'static str },

    #[error("view '{view}': {field}: {source}")]
    Template {
        view: String,
        field: &'static str,
        #[source]
        source: TemplateError,
    },
}

#[derive(Debug, Deserialize)]
struct RawView {
    query: String,
    parameters: Vec<String>,
    #[serde(default)]
    optional_parameters: Vec<String>,
    #[serde(default)]
    optional_query: Option<String>,
    #[serde(default)]
    extra_query: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ViewDefinition {
    pub name: String,
    pub query_template: QueryTemplate,
    pub required_parameters: Vec<String>,
    pub optional_parameters: Vec<String>,
    pub optional_query_template: Option<QueryTemplate>,
    pub extra_query: String,
}

/// Immutable name → definition map; shared read-only across requests.
#[derive(Debug, Clone, Default)]
pub struct ViewRegistry {
    views: HashMap<String, Arc<ViewDefinition>>,
}

impl ViewRegistry {
    pub fn load(path: &Path) -> std::result::Result<Self, RegistryError> {
        let raw = fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::from_json(&raw).map_err(|err| match err {
            RegistryError::Parse { source, .. } => RegistryError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        info!(path = %path.display(), views = registry.len(), "loaded view definitions");
        Ok(registry)
    }

    pub fn from_json(raw: &str) -> std::result::Result<Self, RegistryError> {
        let document: HashMap<String, RawView> =
            serde_json::from_str(raw).map_err(|source| RegistryError::Parse {
                path: PathBuf::new(),
                source,
            })?;

        let mut views = HashMap::with_capacity(document.len());
        for (name, raw_view) in document {
            let view = ViewDefinition::build(name, raw_view)?;
            views.insert(view.name.clone(), Arc::new(view));
        }
        Ok(Self { views })
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<ViewDefinition>> {
        self.views
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::ViewNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

impl ViewDefinition {
    fn build(name: String, raw: RawView) -> std::result::Result<Self, RegistryError> {
        if name.trim().is_empty()
            || name.contains('/')
            || RESERVED_VIEW_NAMES.contains(&name.as_str())
        {
            return Err(RegistryError::InvalidViewName(name));
        }

        check_parameter_names(&name, &raw.parameters, &raw.optional_parameters)?;

        let template_error = |field: &'static str| {
            let view = name.clone();
            move |source: TemplateError| RegistryError::Template {
                view,
                field,
                source,
            }
        };

        let query_template = QueryTemplate::parse(&raw.query, REQUIRED_PLACEHOLDER)
            .map_err(template_error("query"))?;
        check_indices(&query_template, raw.parameters.len())
            .map_err(template_error("query"))?;
        if !raw.parameters.is_empty() && !query_template.has_placeholder() {
            return Err(RegistryError::UnusedParameters {
                view: name,
                field: "query",
            });
        }

        let optional_query_template = match (&raw.optional_query, raw.optional_parameters.is_empty())
        {
            (None, true) => None,
            (Some(source), false) => {
                let template = QueryTemplate::parse(source, OPTIONAL_PLACEHOLDER)
                    .map_err(template_error("optional_query"))?;
                check_indices(&template, raw.optional_parameters.len())
                    .map_err(template_error("optional_query"))?;
                if !template.has_placeholder() {
                    return Err(RegistryError::UnusedParameters {
                        view: name,
                        field: "optional_query",
                    });
                }
                Some(template)
            }
            _ => return Err(RegistryError::UnpairedOptional { view: name }),
        };

        Ok(Self {
            name,
            query_template,
            required_parameters: raw.parameters,
            optional_parameters: raw.optional_parameters,
            optional_query_template,
            extra_query: raw.extra_query.unwrap_or_default(),
        })
    }
}

fn check_parameter_names(
    view: &str,
    required: &[String],
    optional: &[String],
) -> std::result::Result<(), RegistryError> {
    let mut seen = HashSet::new();
    for name in required.iter().chain(optional) {
        if name.trim().is_empty() || RESERVED_PARAMETERS.contains(&name.as_str()) {
            return Err(RegistryError::InvalidParameter {
                view: view.to_string(),
                name: name.clone(),
            });
        }
        if !seen.insert(name.as_str()) {
            return Err(RegistryError::DuplicateParameter {
                view: view.to_string(),
                name: name.clone(),
            });
        }
    }
    Ok(())
}

fn check_indices(template: &QueryTemplate, declared: usize) -> std::result::Result<(), TemplateError> {
    match template.max_index() {
        Some(index) if index >= declared => Err(TemplateError::IndexOutOfRange {
            index,
            available: declared,
        }),
        _ => Ok(()),
    }
}
