//! Wire records for the code helper.
//!
//! One JSON object per line in both directions:
//!
//! ```text
//! -> {"id":7,"code":"print(1 + 1)"}
//! <- {"id":7,"ok":true,"output":"2"}
//! <- {"id":7,"ok":false,"error":"NameError: name 'x' is not defined"}
//! ```
//!
//! The `id` is echoed back so that a late answer to an abandoned request can
//! be told apart from the answer to the current one.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Request sent to the code helper.
#[derive(Debug, Clone, Serialize)]
pub struct CodeRequest<'a> {
    /// Correlation token for this call.
    pub id: u64,
    /// Source text to execute.
    pub code: &'a str,
}

impl CodeRequest<'_> {
    /// Encode as a single newline-terminated line.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Response record written by the code helper.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodeResponse {
    /// Echoed correlation token. Helpers that do not echo ids omit it.
    #[serde(default)]
    pub id: Option<u64>,
    /// Whether execution succeeded.
    pub ok: bool,
    /// Captured standard output, present when `ok` is true.
    #[serde(default)]
    pub output: Option<String>,
    /// Error message, present when `ok` is false.
    #[serde(default)]
    pub error: Option<String>,
}

impl CodeResponse {
    /// Whether this record answers the request with the given token.
    pub fn answers(&self, token: u64) -> bool {
        self.id.is_none_or(|id| id == token)
    }

    /// Convert into the caller-facing result.
    pub fn into_result(self) -> Result<String> {
        if self.ok {
            Ok(self.output.unwrap_or_default())
        } else {
            Err(Error::Code {
                message: self
                    .error
                    .unwrap_or_else(|| "code helper reported an unspecified error".to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line() {
        let request = CodeRequest {
            id: 3,
            code: "print(\"hi\")",
        };
        let line = request.to_line().unwrap();
        assert_eq!(line, "{\"id\":3,\"code\":\"print(\\\"hi\\\")\"}\n");
    }

    #[test]
    fn test_success_response() {
        let response: CodeResponse =
            serde_json::from_str(r#"{"id":1,"ok":true,"output":"hi"}"#).unwrap();
        assert!(response.answers(1));
        assert!(!response.answers(2));
        assert_eq!(response.into_result().unwrap(), "hi");
    }

    #[test]
    fn test_error_response() {
        let response: CodeResponse =
            serde_json::from_str(r#"{"ok":false,"error":"boom"}"#).unwrap();
        // No id: accepted for any token.
        assert!(response.answers(42));
        match response.into_result() {
            Err(Error::Code { message }) => assert_eq!(message, "boom"),
            other => panic!("Expected code error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_output_is_empty() {
        let response: CodeResponse = serde_json::from_str(r#"{"id":5,"ok":true}"#).unwrap();
        assert_eq!(response.into_result().unwrap(), "");
    }
}
