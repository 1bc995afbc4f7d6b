//! Classification of script-engine diagnostics.
//!
//! Diagnostic text written by the script engine on stderr is free-form. It is
//! mapped onto a small set of classes by ordered, case-insensitive substring
//! matching; the first rule that matches wins.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The host denied accessibility / automation permission.
    AccessibilityDenied,
    /// The targeted application is not running.
    AppNotRunning,
    /// A UI element or object referenced by the script does not exist.
    ElementNotFound,
    /// No response boundary was observed within the call's budget.
    Timeout,
    /// Anything else.
    Unknown,
}

/// Ordered matching rules. Order matters: `can't get application` must be
/// seen before the broader `can't get`.
const RULES: &[(ErrorClass, &[&str])] = &[
    (
        ErrorClass::AccessibilityDenied,
        &[
            "assistive access",
            "accessibility",
            "-25211",
            "-1743",
            "not authorized to send apple events",
        ],
    ),
    (
        ErrorClass::AppNotRunning,
        &[
            "isn't running",
            "is not running",
            "-600",
            "application can't be found",
            "can't get application",
        ],
    ),
    (
        ErrorClass::ElementNotFound,
        &[
            "can't get",
            "invalid index",
            "-1719",
            "-1728",
            "doesn't understand",
            "not found",
        ],
    ),
    (ErrorClass::Timeout, &["timed out", "timeout", "-1712"]),
];

/// Classify raw diagnostic text.
pub fn classify(diagnostic: &str) -> ErrorClass {
    let haystack = diagnostic.to_lowercase();
    RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| haystack.contains(needle)))
        .map(|(class, _)| *class)
        .unwrap_or(ErrorClass::Unknown)
}

impl ErrorClass {
    /// Stable snake_case identifier, as used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessibilityDenied => "accessibility_denied",
            Self::AppNotRunning => "app_not_running",
            Self::ElementNotFound => "element_not_found",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }

    /// Human-readable guidance for this class.
    pub fn guidance(self) -> &'static str {
        match self {
            Self::AccessibilityDenied => {
                "Accessibility permission is required. Open System Settings > Privacy & Security > \
                 Accessibility and enable the application running this agent, then retry."
            }
            Self::AppNotRunning => {
                "The target application is not running. Launch it (or activate it) and retry."
            }
            Self::ElementNotFound => {
                "The requested UI element was not found. The window layout may have changed; \
                 query the UI again before acting on it."
            }
            Self::Timeout => {
                "The interpreter did not answer in time. Simplify the script or allow a longer timeout."
            }
            Self::Unknown => "The interpreter reported an error.",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistive_access_is_accessibility_denied() {
        let text = "execution error: System Events got an error: osascript is not allowed assistive access. (-1719)";
        assert_eq!(classify(text), ErrorClass::AccessibilityDenied);
    }

    #[test]
    fn test_app_not_running() {
        assert_eq!(
            classify("execution error: Safari got an error: Application isn't running. (-600)"),
            ErrorClass::AppNotRunning
        );
        assert_eq!(
            classify("Can't get application \"Nope\"."),
            ErrorClass::AppNotRunning
        );
    }

    #[test]
    fn test_element_not_found() {
        assert_eq!(
            classify("Can't get button 3 of window 1. Invalid index. (-1719)"),
            ErrorClass::ElementNotFound
        );
        assert_eq!(
            classify("Finder got an error: Can't get folder \"x\". (-1728)"),
            ErrorClass::ElementNotFound
        );
    }

    #[test]
    fn test_timeout() {
        assert_eq!(
            classify("AppleEvent timed out. (-1712)"),
            ErrorClass::Timeout
        );
    }

    #[test]
    fn test_unknown_and_case_insensitive() {
        assert_eq!(classify("syntax error: expected end of line"), ErrorClass::Unknown);
        assert_eq!(classify(""), ErrorClass::Unknown);
        assert_eq!(
            classify("NOT ALLOWED ASSISTIVE ACCESS"),
            ErrorClass::AccessibilityDenied
        );
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ErrorClass::AppNotRunning).unwrap();
        assert_eq!(json, "\"app_not_running\"");
        assert_eq!(ErrorClass::ElementNotFound.to_string(), "element_not_found");
    }
}
