//! Error routing: failed invocations re-emitted to an error-handler agent
//!
//! Every failed agent result is classified (category, severity, recovery
//! action) and, when routing is enabled, sent as a structured error event to
//! the handler picked by `ErrorRouter::route`:
//! severity handler → category handler → default handler.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Coarse failure class used to pick an error handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Timeout,
    Network,
    Auth,
    Resource,
    Routing,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Auth => "auth",
            Self::Resource => "resource",
            Self::Routing => "routing",
            Self::Unknown => "unknown",
        }
    }

    /// Classify a dispatch error
    ///
    /// Typed variants map directly; free-form handler messages are matched
    /// on keywords.
    pub fn of(err: &DispatchError) -> Self {
        match err {
            DispatchError::HandlerTimeout { .. } | DispatchError::Cancelled { .. } => Self::Timeout,
            DispatchError::AgentNotFound { .. } | DispatchError::LoopDetected { .. } => Self::Routing,
            DispatchError::CallbackAborted { .. } | DispatchError::InvalidConfig { .. } => {
                Self::Validation
            }
            DispatchError::QueueFull { .. } | DispatchError::CircuitOpen { .. } => Self::Resource,
            DispatchError::Handler { message, .. } => Self::from_message(message),
            DispatchError::MaxRetriesExceeded { last_error, .. } => Self::from_message(last_error),
            _ => Self::Unknown,
        }
    }

    fn from_message(message: &str) -> Self {
        let message = message.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| message.contains(w));
        if has(&["validation", "invalid", "required", "missing"]) {
            Self::Validation
        } else if has(&["timeout", "timed out", "deadline"]) {
            Self::Timeout
        } else if has(&["network", "connection", "dial", "http"]) {
            Self::Network
        } else if has(&["auth", "unauthorized", "forbidden", "token"]) {
            Self::Auth
        } else if has(&["memory", "resource", "limit", "quota"]) {
            Self::Resource
        } else {
            Self::Unknown
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Auth | Self::Resource => Severity::Critical,
            Self::Timeout | Self::Network => Severity::High,
            Self::Validation | Self::Routing | Self::Unknown => Severity::Medium,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the error handler is expected to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// The runner already scheduled a retry
    Retry,
    Fallback,
    Escalate,
    Terminate,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Fallback => "fallback",
            Self::Escalate => "escalate",
            Self::Terminate => "terminate",
        }
    }

    pub fn decide(category: ErrorCategory, retrying: bool) -> Self {
        if retrying {
            return Self::Retry;
        }
        match category {
            ErrorCategory::Auth | ErrorCategory::Resource | ErrorCategory::Unknown => Self::Escalate,
            ErrorCategory::Validation | ErrorCategory::Routing => Self::Terminate,
            ErrorCategory::Timeout | ErrorCategory::Network => Self::Fallback,
        }
    }
}

/// Where failures are reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorRoutingConfig {
    /// Routing is off unless explicitly enabled
    pub enabled: bool,
    /// Agent receiving errors no specific handler claims
    pub default_handler: Option<String>,
    pub category_handlers: BTreeMap<ErrorCategory, String>,
    /// Checked before category handlers
    pub severity_handlers: BTreeMap<Severity, String>,
}

impl Default for ErrorRoutingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_handler: Some("error-handler".to_string()),
            category_handlers: BTreeMap::new(),
            severity_handlers: BTreeMap::new(),
        }
    }
}

impl ErrorRoutingConfig {
    /// Enabled config sending everything to `handler`
    pub fn to_handler(handler: impl Into<String>) -> Self {
        Self {
            enabled: true,
            default_handler: Some(handler.into()),
            ..Self::default()
        }
    }

    pub fn with_category_handler(mut self, category: ErrorCategory, handler: impl Into<String>) -> Self {
        self.category_handlers.insert(category, handler.into());
        self
    }

    pub fn with_severity_handler(mut self, severity: Severity, handler: impl Into<String>) -> Self {
        self.severity_handlers.insert(severity, handler.into());
        self
    }

    /// Every configured handler name
    pub fn handlers(&self) -> impl Iterator<Item = &str> {
        self.default_handler
            .iter()
            .chain(self.category_handlers.values())
            .chain(self.severity_handlers.values())
            .map(String::as_str)
    }
}

/// Classification and destination of one failure
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRoute {
    pub handler: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub action: RecoveryAction,
}

#[derive(Debug, Clone, Default)]
pub struct ErrorRouter {
    config: ErrorRoutingConfig,
}

impl ErrorRouter {
    pub fn new(config: ErrorRoutingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ErrorRoutingConfig {
        &self.config
    }

    /// Pick the handler for a failure of `agent`
    ///
    /// None when routing is disabled, nothing matches, or the pick is the
    /// failing agent itself.
    pub fn route(&self, agent: &str, err: &DispatchError, retrying: bool) -> Option<ErrorRoute> {
        if !self.config.enabled {
            return None;
        }
        let category = ErrorCategory::of(err);
        let severity = category.severity();
        let handler = self
            .config
            .severity_handlers
            .get(&severity)
            .or_else(|| self.config.category_handlers.get(&category))
            .or(self.config.default_handler.as_ref())
            .filter(|handler| handler.as_str() != agent)?;

        Some(ErrorRoute {
            handler: handler.clone(),
            category,
            severity,
            action: RecoveryAction::decide(category, retrying),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn handler_error(message: &str) -> DispatchError {
        DispatchError::Handler {
            agent: "a".into(),
            message: message.into(),
        }
    }

    #[test]
    fn test_typed_errors_classified_directly() {
        let timeout = DispatchError::HandlerTimeout {
            agent: "a".into(),
            timeout_ms: 10,
        };
        assert_eq!(ErrorCategory::of(&timeout), ErrorCategory::Timeout);
        assert_eq!(
            ErrorCategory::of(&DispatchError::AgentNotFound { agent: "Z".into() }),
            ErrorCategory::Routing
        );
        assert_eq!(ErrorCategory::Timeout.severity(), Severity::High);
    }

    #[test]
    fn test_handler_messages_classified_by_keyword() {
        assert_eq!(ErrorCategory::of(&handler_error("Invalid input")), ErrorCategory::Validation);
        assert_eq!(ErrorCategory::of(&handler_error("connection reset")), ErrorCategory::Network);
        assert_eq!(ErrorCategory::of(&handler_error("401 Unauthorized")), ErrorCategory::Auth);
        assert_eq!(ErrorCategory::of(&handler_error("quota exceeded")), ErrorCategory::Resource);
        assert_eq!(ErrorCategory::of(&handler_error("boom")), ErrorCategory::Unknown);
    }

    #[test]
    fn test_severity_handler_wins_over_category() {
        let router = ErrorRouter::new(
            ErrorRoutingConfig::to_handler("errors")
                .with_category_handler(ErrorCategory::Auth, "auth-errors")
                .with_severity_handler(Severity::Critical, "pager"),
        );

        let route = router.route("a", &handler_error("forbidden"), false).unwrap();
        assert_eq!(route.handler, "pager");
        assert_eq!(route.category, ErrorCategory::Auth);
        assert_eq!(route.action, RecoveryAction::Escalate);
    }

    #[test]
    fn test_category_handler_then_default() {
        let router = ErrorRouter::new(
            ErrorRoutingConfig::to_handler("errors")
                .with_category_handler(ErrorCategory::Validation, "validation-errors"),
        );

        assert_eq!(
            router.route("a", &handler_error("missing field"), false).unwrap().handler,
            "validation-errors"
        );
        assert_eq!(router.route("a", &handler_error("boom"), true).unwrap().handler, "errors");
        assert_eq!(
            router.route("a", &handler_error("boom"), true).unwrap().action,
            RecoveryAction::Retry
        );
    }

    #[test]
    fn test_never_routes_to_failing_agent_or_when_disabled() {
        let router = ErrorRouter::new(ErrorRoutingConfig::to_handler("errors"));
        assert!(router.route("errors", &handler_error("boom"), false).is_none());

        let disabled = ErrorRouter::new(ErrorRoutingConfig::default());
        assert!(disabled.route("a", &handler_error("boom"), false).is_none());
    }

    #[test]
    fn test_config_deserializes_handler_maps() {
        let config: ErrorRoutingConfig = serde_json::from_str(
            r#"{"enabled": true, "default_handler": "errors",
                "category_handlers": {"timeout": "slow-errors"},
                "severity_handlers": {"critical": "pager"}}"#,
        )
        .unwrap();

        assert_eq!(
            config.category_handlers.get(&ErrorCategory::Timeout).map(String::as_str),
            Some("slow-errors")
        );
        assert_eq!(config.handlers().collect::<Vec<_>>(), vec!["errors", "slow-errors", "pager"]);
    }
}
