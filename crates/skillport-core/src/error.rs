use thiserror::Error;

use crate::embedding::EmbeddingError;

/// Errors surfaced by the tool-dispatch layer.
#[derive(Error, Debug)]
pub enum SkillportError {
    #[error("{0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid arguments for {tool_name}: {message}")]
    InvalidArguments { tool_name: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    #[test]
    fn test_embedding_error_passes_through() {
        let err: SkillportError = EmbeddingError::EmptyResponse {
            provider: ProviderKind::OpenAi,
        }
        .into();
        assert!(matches!(err, SkillportError::Embedding(_)));
        assert_eq!(
            err.to_string(),
            "Embedding response from 'openai' contained no vector"
        );
    }

    #[test]
    fn test_tool_errors_name_the_tool() {
        let err = SkillportError::InvalidArguments {
            tool_name: "search_skills".into(),
            message: "Missing 'query' parameter".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid arguments for search_skills: Missing 'query' parameter"
        );
    }
}
