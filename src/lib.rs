pub mod cache;
pub mod debounce;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod geometry;
pub mod host;
pub mod logging;
pub mod options;
pub mod panic_handler;
pub mod presenter;
pub mod raster;
pub mod render;
pub mod session;
pub mod watch;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{PreviewFault, RasterFault};
pub use options::Options;
pub use render::{RenderResult, Renderer};
pub use session::{Session, SessionState};
