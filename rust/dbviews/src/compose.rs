//! Final SQL assembly for a view request.

use crate::{
    error::{Result, ServiceError},
    params::ValidatedParameters,
    registry::ViewDefinition,
    template::TemplateError,
};
use std::fmt;

/// SQL sent to the database; built per request, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedQuery(String);

impl ComposedQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Caps the row count without touching the view's own SQL.
    pub fn limited(self, max_rows: Option<u64>) -> String {
        match max_rows {
            Some(limit) => format!("SELECT * FROM ({}) AS view_rows LIMIT {limit}", self.0),
            None => self.into_string(),
        }
    }
}

impl fmt::Display for ComposedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Base query, then the optional fragment (only when at least one optional
/// parameter was supplied), then `extra_query`, joined by single spaces.
pub fn compose(view: &ViewDefinition, values: &ValidatedParameters) -> Result<ComposedQuery> {
    let base = view
        .query_template
        .render(&values.required)
        .map_err(|err| ServiceError::Internal(anyhow::anyhow!("view '{}': {err}", view.name)))?;

    let optional = match &view.optional_query_template {
        Some(template) if !values.optional.is_empty() => {
            template
                .render(&values.optional)
                .map_err(|err| match err {
                    TemplateError::IndexOutOfRange { .. } => ServiceError::MissingParameters(
                        view.optional_parameters
                            .iter()
                            .filter(|name| !values.optional_names.contains(*name))
                            .cloned()
                            .collect(),
                    ),
                    other => ServiceError::Internal(anyhow::anyhow!(
                        "view '{}': {other}",
                        view.name
                    )),
                })?
        }
        _ => String::new(),
    };

    let sql = [base.as_str(), optional.as_str(), view.extra_query.as_str()]
        .into_iter()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Ok(ComposedQuery(sql))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ViewRegistry;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn view(definition: serde_json::Value) -> Arc<ViewDefinition> {
        ViewRegistry::from_json(&json!({ "v": definition }).to_string())
            .unwrap()
            .lookup("v")
            .unwrap()
    }

    fn values(required: &[&str], optional: &[(&str, &str)]) -> ValidatedParameters {
        ValidatedParameters {
            required: required.iter().map(|v| v.to_string()).collect(),
            optional: optional.iter().map(|(_, v)| v.to_string()).collect(),
            optional_names: optional.iter().map(|(name, _)| name.to_string()).collect(),
        }
    }

    #[test]
    fn substitutes_required_literal() {
        let view = view(json!({
            "query": "SELECT * FROM t WHERE d>{parameters}",
            "parameters": ["from"]
        }));
        let query = compose(&view, &values(&["'2024-01-01 00:00:00'"], &[])).unwrap();
        assert_eq!(
            query.as_str(),
            "SELECT * FROM t WHERE d>'2024-01-01 00:00:00'"
        );
    }

    #[test]
    fn omitted_optionals_leave_only_the_base_query() {
        let view = view(json!({
            "query": "SELECT * FROM t WHERE d>{parameters}",
            "parameters": ["from"],
            "optional_parameters": ["region"],
            "optional_query": "AND r>{optionals}"
        }));
        let query = compose(&view, &values(&["'2024-01-01 00:00:00'"], &[])).unwrap();
        assert_eq!(
            query.as_str(),
            "SELECT * FROM t WHERE d>'2024-01-01 00:00:00'"
        );
    }

    #[test]
    fn joins_all_three_parts() {
        let view = view(json!({
            "query": "SELECT * FROM t WHERE d>{parameters}",
            "parameters": ["from"],
            "optional_parameters": ["region"],
            "optional_query": "AND r>{optionals}",
            "extra_query": "ORDER BY d"
        }));
        let query = compose(&view, &values(&["'a'"], &[("region", "'b'")])).unwrap();
        assert_eq!(
            query.as_str(),
            "SELECT * FROM t WHERE d>'a' AND r>'b' ORDER BY d"
        );

        let query = compose(&view, &values(&["'a'"], &[])).unwrap();
        assert_eq!(query.as_str(), "SELECT * FROM t WHERE d>'a' ORDER BY d");
    }

    #[test]
    fn indexed_optional_without_value_is_missing() {
        let view = view(json!({
            "query": "SELECT 1",
            "parameters": [],
            "optional_parameters": ["since", "until"],
            "optional_query": "WHERE u BETWEEN {optionals[0]} AND {optionals[1]}"
        }));
        let err = compose(&view, &values(&[], &[("since", "'a'")])).unwrap_err();
        assert!(matches!(err, ServiceError::MissingParameters(names) if names == vec!["until"]));
    }

    #[test]
    fn row_cap_wraps_without_changing_the_query() {
        let view = view(json!({ "query": "SELECT 1", "parameters": [] }));
        let query = compose(&view, &values(&[], &[])).unwrap();
        assert_eq!(
            query.clone().limited(Some(500)),
            "SELECT * FROM (SELECT 1) AS view_rows LIMIT 500"
        );
        assert_eq!(query.as_str(), "SELECT 1");
        assert_eq!(query.limited(None), "SELECT 1");
    }
}
