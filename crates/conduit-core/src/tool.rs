use crate::error::ConduitResult;
use serde::{Deserialize, Serialize};

/// A tool invocation requested by the model, assembled from a completed stream.
///
/// `arguments` stays a JSON *string*: it is repaired where possible but never
/// parsed here, so consumers decide how to treat arguments that are still
/// malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the provider. Empty if the stream never sent one.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

impl ToolCall {
    /// Parses the argument string as JSON.
    pub fn parsed_arguments(&self) -> ConduitResult<serde_json::Value> {
        Ok(serde_json::from_str(&self.arguments)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_arguments() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "search".into(),
            arguments: r#"{"q":"rust"}"#.into(),
        };
        assert_eq!(call.parsed_arguments().ok(), Some(serde_json::json!({"q": "rust"})));
    }

    #[test]
    fn test_parsed_arguments_invalid() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "search".into(),
            arguments: r#"{"q":"#.into(),
        };
        let err = call.parsed_arguments().unwrap_err();
        assert!(err.to_string().starts_with("JSON error:"));
    }
}
