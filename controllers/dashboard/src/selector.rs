//! Label selector matching.
//!
//! Decides whether a dashboard is in scope. A dashboard must match at least
//! one resource-level selector, and its namespace must match the namespace
//! selector when one is configured. Failing either check only means the
//! dashboard is skipped; it is never a reason to delete it from Grafana.

use crate::cluster::Cluster;
use crate::error::{with_timeout, ControllerError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// True when the labels satisfy at least one selector.
///
/// `None` or an empty list matches nothing: selectors that are not set yet
/// mean the controller has not finished initialising.
pub fn matches(labels: &BTreeMap<String, String>, selectors: Option<&[LabelSelector]>) -> bool {
    let Some(selectors) = selectors else {
        return false;
    };

    selectors.iter().any(|selector| match selector_matches(selector, labels) {
        Ok(matched) => matched,
        Err(e) => {
            warn!("Ignoring selector that cannot be evaluated: {}", e);
            false
        }
    })
}

/// Check the namespace's labels against the namespace selector.
///
/// An empty selector matches every namespace without a lookup. Lookup
/// failures (including a missing namespace) are returned as errors.
pub async fn matches_namespace(
    cluster: &dyn Cluster,
    namespace: &str,
    selector: &LabelSelector,
    timeout: Duration,
) -> Result<bool, ControllerError> {
    if is_empty(selector) {
        return Ok(true);
    }

    let labels = with_timeout(
        timeout,
        &format!("namespace {} lookup", namespace),
        cluster.namespace_labels(namespace),
    )
    .await?;
    selector_matches(selector, &labels)
}

/// A selector with no `matchLabels` and no `matchExpressions`
pub fn is_empty(selector: &LabelSelector) -> bool {
    selector.match_labels.as_ref().is_none_or(BTreeMap::is_empty)
        && selector.match_expressions.as_ref().is_none_or(Vec::is_empty)
}

/// Kubernetes `LabelSelector` semantics: every term must hold.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> Result<bool, ControllerError> {
    if let Some(match_labels) = &selector.match_labels {
        if !match_labels.iter().all(|(k, v)| labels.get(k) == Some(v)) {
            return Ok(false);
        }
    }

    for requirement in selector.match_expressions.iter().flatten() {
        if !requirement_matches(requirement, labels)? {
            return Ok(false);
        }
    }

    Ok(true)
}

fn requirement_matches(
    requirement: &LabelSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> Result<bool, ControllerError> {
    let value = labels.get(&requirement.key);
    let values = requirement.values.as_deref().unwrap_or_default();

    match requirement.operator.as_str() {
        "In" | "NotIn" if values.is_empty() => Err(ControllerError::InvalidSelector(format!(
            "operator {} on key {} needs at least one value",
            requirement.operator, requirement.key
        ))),
        "In" => Ok(value.is_some_and(|v| values.contains(v))),
        "NotIn" => Ok(!value.is_some_and(|v| values.contains(v))),
        "Exists" => Ok(value.is_some()),
        "DoesNotExist" => Ok(value.is_none()),
        other => Err(ControllerError::InvalidSelector(format!(
            "unknown operator {} on key {}",
            other, requirement.key
        ))),
    }
}
