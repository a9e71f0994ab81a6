//! Fault taxonomy for the preview pipeline

/// Errors raised by a rasterizer backend
#[derive(Debug, thiserror::Error)]
pub enum RasterFault {
    #[error("target size {width}x{height} is empty")]
    EmptyTarget { width: u32, height: u32 },

    #[error("invalid SVG: {0}")]
    InvalidSvg(String),

    #[error("{detail}")]
    Backend { detail: String },
}

impl RasterFault {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend { detail: msg.into() }
    }
}

/// Every way a render attempt can fail in a user-visible manner.
///
/// Supersession is not a fault; it is reported as
/// [`RenderResult::Cancelled`](crate::render::RenderResult::Cancelled).
#[derive(Debug, thiserror::Error)]
pub enum PreviewFault {
    /// Malformed markup
    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        line: u32,
        column: u32,
        message: String,
    },

    /// Well-formed XML whose root is not `<svg>`
    #[error("unexpected root element <{found}>, expected <svg>")]
    Schema { found: String },

    #[error("render failed: {0}")]
    Raster(#[from] RasterFault),

    #[error("render timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl PreviewFault {
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }
}

impl From<roxmltree::Error> for PreviewFault {
    fn from(err: roxmltree::Error) -> Self {
        let pos = err.pos();
        Self::Parse {
            line: pos.row,
            column: pos.col,
            message: err.to_string(),
        }
    }
}
