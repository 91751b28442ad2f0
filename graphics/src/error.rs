//! Graphics error types.

use crate::types::ShaderStage;

/// Errors that can occur in the graphics system.
///
/// Native error codes (`VkResult`, `HRESULT`) are rendered into the message
/// of the variant that wraps them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphicsError {
    /// No compatible adapter or device could be created, including the
    /// software fallback.
    #[error("initialization failed: {0}")]
    Initialization(String),
    /// Shader source failed to compile.
    #[error("{stage:?} shader compilation failed: {diagnostic}")]
    Compilation {
        /// Stage of the shader that failed.
        stage: ShaderStage,
        /// Compiler diagnostic text.
        diagnostic: String,
    },
    /// A native allocation or creation call failed.
    #[error("resource creation failed: {0}")]
    ResourceCreation(String),
    /// An operation was invoked in the wrong state.
    #[error("invalid state: {0}")]
    State(String),
    /// A backend or feature is not implemented on this build or platform.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,
}

/// Convenience alias used throughout the crate.
pub type GraphicsResult<T> = Result<T, GraphicsError>;

impl GraphicsError {
    /// Log this error for `operation` under the `keystone` log target.
    pub(crate) fn logged(self, component: &str, operation: &str) -> Self {
        log::error!(target: "keystone", "[{component}] {operation} failed: {self}");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::DeviceLost;
        assert_eq!(err.to_string(), "GPU device lost");

        let err = GraphicsError::Initialization("no adapter".to_string());
        assert_eq!(err.to_string(), "initialization failed: no adapter");
    }

    #[test]
    fn test_compilation_error_carries_diagnostic() {
        let err = GraphicsError::Compilation {
            stage: ShaderStage::Pixel,
            diagnostic: "expected ';'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Pixel shader compilation failed: expected ';'"
        );
    }
}
