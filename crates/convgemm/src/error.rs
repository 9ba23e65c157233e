//! Crate-wide error type.

use thiserror::Error;

/// Errors raised while building transforms, descriptors or GEMM problems.
///
/// Every variant is detected synchronously at construction time; evaluating a
/// finished descriptor never fails except for an index of the wrong arity.
#[derive(Debug, Error)]
pub enum Error {
    /// A transform's lengths are invalid or disagree with the dimensions it
    /// is applied to.
    #[error("shape mismatch in {transform}: {reason}")]
    ShapeMismatch {
        transform: &'static str,
        reason: String,
    },
    /// Transform/dimension id lists are inconsistent.
    #[error("invalid dimension mapping: {reason}")]
    DimensionMapping { reason: String },
    /// The problem cannot be expressed with the requested tiling.
    #[error("unsupported configuration: {reason}")]
    UnsupportedConfiguration { reason: String },
    /// Convolution parameters are inconsistent or produce an empty output.
    #[error("invalid convolution parameters: {reason}")]
    InvalidConvParams { reason: String },
    /// A JSON config document failed to parse.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn shape(transform: &'static str, reason: impl Into<String>) -> Self {
        Error::ShapeMismatch {
            transform,
            reason: reason.into(),
        }
    }

    pub(crate) fn mapping(reason: impl Into<String>) -> Self {
        Error::DimensionMapping {
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        Error::UnsupportedConfiguration {
            reason: reason.into(),
        }
    }

    pub(crate) fn conv_params(reason: impl Into<String>) -> Self {
        Error::InvalidConvParams {
            reason: reason.into(),
        }
    }
}
