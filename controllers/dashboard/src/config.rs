//! Controller configuration.
//!
//! Everything is read from environment variables at startup. Label selectors
//! use the kubectl `-l` syntax; several resource selectors are separated by
//! `;` and a dashboard is in scope when any one of them matches.

use crate::error::ControllerError;
use crate::state::ControllerState;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_GRAFANA_URL: &str = "http://grafana-service:3000";
const DEFAULT_ADMIN_USER: &str = "admin";
const DEFAULT_CLIENT_TIMEOUT_SECONDS: u64 = 5;
const DEFAULT_RESYNC_PERIOD_SECONDS: u64 = 600;
const DEFAULT_READINESS_POLL_SECONDS: u64 = 10;
const DEFAULT_REQUEUE_DELAY_SECONDS: u64 = 10;

/// Startup configuration of the controller process
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Period of the full resync of every namespace
    pub resync_period: Duration,
    /// How often Grafana's health endpoint is polled
    pub readiness_poll: Duration,
    /// Delay used for "not ready yet, try later" requeues
    pub requeue_delay: Duration,
    /// Initial state snapshot (readiness starts false)
    pub initial_state: ControllerState,
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let seconds = |key: &str, default: u64| -> Result<Duration, ControllerError> {
            match non_empty(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| ControllerError::InvalidConfig(format!("{} must be a number of seconds: {}", key, e))),
                None => Ok(Duration::from_secs(default)),
            }
        };

        let admin_password = non_empty("GRAFANA_ADMIN_PASSWORD").ok_or_else(|| {
            ControllerError::InvalidConfig("GRAFANA_ADMIN_PASSWORD environment variable is required".to_string())
        })?;

        let dashboard_selectors = non_empty("DASHBOARD_LABEL_SELECTOR")
            .map(|raw| parse_selectors(&raw))
            .transpose()?;
        let namespace_selector = non_empty("DASHBOARD_NAMESPACE_SELECTOR")
            .map(|raw| parse_selector(&raw))
            .transpose()?;

        let initial_state = ControllerState {
            grafana_ready: false,
            grafana_url: non_empty("GRAFANA_URL").unwrap_or_else(|| DEFAULT_GRAFANA_URL.to_string()),
            admin_username: non_empty("GRAFANA_ADMIN_USER").unwrap_or_else(|| DEFAULT_ADMIN_USER.to_string()),
            admin_password,
            client_timeout: seconds("GRAFANA_CLIENT_TIMEOUT_SECONDS", DEFAULT_CLIENT_TIMEOUT_SECONDS)?,
            dashboard_selectors,
            namespace_selector,
        };

        Ok(Self {
            namespace: non_empty("WATCH_NAMESPACE"),
            resync_period: seconds("RESYNC_PERIOD_SECONDS", DEFAULT_RESYNC_PERIOD_SECONDS)?,
            readiness_poll: seconds("READINESS_POLL_SECONDS", DEFAULT_READINESS_POLL_SECONDS)?,
            requeue_delay: seconds("REQUEUE_DELAY_SECONDS", DEFAULT_REQUEUE_DELAY_SECONDS)?,
            initial_state,
        })
    }
}

/// Parse `;`-separated selectors
pub fn parse_selectors(raw: &str) -> Result<Vec<LabelSelector>, ControllerError> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_selector)
        .collect()
}

/// Parse one selector: `k=v`, `k==v`, `k!=v`, `k`, `!k`, `k in (a,b)`, `k notin (a,b)`
pub fn parse_selector(raw: &str) -> Result<LabelSelector, ControllerError> {
    let mut match_labels = BTreeMap::new();
    let mut match_expressions = Vec::new();

    for term in split_terms(raw)? {
        if let Some(key) = term.strip_prefix('!') {
            match_expressions.push(requirement(key.trim(), "DoesNotExist", None));
        } else if let Some((key, values)) = set_term(&term, " notin ")? {
            match_expressions.push(requirement(&key, "NotIn", Some(values)));
        } else if let Some((key, values)) = set_term(&term, " in ")? {
            match_expressions.push(requirement(&key, "In", Some(values)));
        } else if let Some((key, value)) = term.split_once("!=") {
            match_expressions.push(requirement(key.trim(), "NotIn", Some(vec![value.trim().to_string()])));
        } else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
            match_labels.insert(key.trim().to_string(), value.trim().to_string());
        } else {
            match_expressions.push(requirement(&term, "Exists", None));
        }
    }

    for expr in &match_expressions {
        if expr.key.is_empty() {
            return Err(ControllerError::InvalidSelector(format!("empty key in {:?}", raw)));
        }
    }
    if match_labels.keys().any(|k: &String| k.is_empty()) {
        return Err(ControllerError::InvalidSelector(format!("empty key in {:?}", raw)));
    }

    Ok(LabelSelector {
        match_labels: (!match_labels.is_empty()).then_some(match_labels),
        match_expressions: (!match_expressions.is_empty()).then_some(match_expressions),
    })
}

/// Split on commas that are not inside a `( ... )` value list
fn split_terms(raw: &str) -> Result<Vec<String>, ControllerError> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in raw.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ControllerError::InvalidSelector(format!("unbalanced ')' in {:?}", raw)))?;
                current.push(c);
            }
            ',' if depth == 0 => terms.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if depth != 0 {
        return Err(ControllerError::InvalidSelector(format!("unclosed '(' in {:?}", raw)));
    }
    terms.push(current);

    Ok(terms
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

fn set_term(term: &str, operator: &str) -> Result<Option<(String, Vec<String>)>, ControllerError> {
    let Some((key, rest)) = term.split_once(operator) else {
        return Ok(None);
    };
    let values = rest
        .trim()
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| ControllerError::InvalidSelector(format!("expected value list in {:?}", term)))?;
    let values: Vec<String> = values
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err(ControllerError::InvalidSelector(format!("empty value list in {:?}", term)));
    }
    Ok(Some((key.trim().to_string(), values)))
}

fn requirement(key: &str, operator: &str, values: Option<Vec<String>>) -> LabelSelectorRequirement {
    LabelSelectorRequirement {
        key: key.to_string(),
        operator: operator.to_string(),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::from_lookup(lookup(&[("GRAFANA_ADMIN_PASSWORD", "secret")])).unwrap();
        assert_eq!(config.initial_state.grafana_url, DEFAULT_GRAFANA_URL);
        assert_eq!(config.initial_state.admin_username, "admin");
        assert_eq!(config.initial_state.client_timeout, Duration::from_secs(5));
        assert!(!config.initial_state.grafana_ready);
        assert!(config.initial_state.dashboard_selectors.is_none(), "unset selectors stay uninitialized");
        assert!(config.namespace.is_none());
        assert_eq!(config.resync_period, Duration::from_secs(600));
    }

    #[test]
    fn test_password_is_required() {
        let err = ControllerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("GRAFANA_ADMIN_PASSWORD"));
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        let err = ControllerConfig::from_lookup(lookup(&[
            ("GRAFANA_ADMIN_PASSWORD", "secret"),
            ("RESYNC_PERIOD_SECONDS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RESYNC_PERIOD_SECONDS"));
    }

    #[test]
    fn test_selectors_from_env() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("GRAFANA_ADMIN_PASSWORD", "secret"),
            ("DASHBOARD_LABEL_SELECTOR", "app=grafana; team in (a,b)"),
            ("DASHBOARD_NAMESPACE_SELECTOR", "env=prod"),
            ("WATCH_NAMESPACE", "monitoring"),
        ]))
        .unwrap();
        assert_eq!(config.initial_state.dashboard_selectors.as_ref().map(Vec::len), Some(2));
        assert!(config.initial_state.namespace_selector.is_some());
        assert_eq!(config.namespace.as_deref(), Some("monitoring"));
    }

    #[test]
    fn test_parse_selector_terms() {
        let selector = parse_selector("app=grafana, tier in (web, api), env!=dev, monitored, !legacy").unwrap();
        let labels = selector.match_labels.unwrap();
        assert_eq!(labels.get("app").map(String::as_str), Some("grafana"));

        let exprs = selector.match_expressions.unwrap();
        let ops: Vec<(&str, &str)> = exprs.iter().map(|e| (e.key.as_str(), e.operator.as_str())).collect();
        assert_eq!(
            ops,
            vec![("tier", "In"), ("env", "NotIn"), ("monitored", "Exists"), ("legacy", "DoesNotExist")]
        );
        assert_eq!(exprs[0].values.as_deref(), Some(&["web".to_string(), "api".to_string()][..]));
    }

    #[test]
    fn test_parse_selector_errors() {
        assert!(parse_selector("tier in web").is_err());
        assert!(parse_selector("tier in ()").is_err());
        assert!(parse_selector("tier in (a").is_err());
        assert!(parse_selector("=value").is_err());
    }

    #[test]
    fn test_parse_empty_selector_list() {
        assert!(parse_selectors(" ; ").unwrap().is_empty());
    }
}
