//! Rasterizer seam and the resvg-backed implementation

use crate::document::SvgDocument;
use crate::error::RasterFault;
use crate::geometry::Size;

/// Straight-alpha RGBA pixels
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    /// 4 bytes per pixel, row-major, not premultiplied
    pub rgba: Vec<u8>,
}

impl RasterImage {
    /// Fully transparent image of the given size
    #[must_use]
    pub fn blank(size: Size) -> Self {
        Self {
            width: size.width,
            height: size.height,
            rgba: vec![0; size.width as usize * size.height as usize * 4],
        }
    }

    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Turns a parsed document into pixels at an exact target size.
///
/// Implementations are called from a dedicated worker thread and may block.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, document: &SvgDocument, target: Size) -> Result<RasterImage, RasterFault>;
}

/// Reverse premultiplied alpha in place
pub fn unpremultiply_rgba(data: &mut [u8]) {
    for pixel in data.chunks_mut(4) {
        let alpha = pixel[3];
        if alpha == 0 {
            pixel[0] = 0;
            pixel[1] = 0;
            pixel[2] = 0;
            continue;
        }
        let a = alpha as u32;
        pixel[0] = ((pixel[0] as u32 * 255 + a / 2) / a).min(255) as u8;
        pixel[1] = ((pixel[1] as u32 * 255 + a / 2) / a).min(255) as u8;
        pixel[2] = ((pixel[2] as u32 * 255 + a / 2) / a).min(255) as u8;
    }
}

#[cfg(feature = "svg")]
pub use resvg_backend::ResvgRasterizer;

#[cfg(feature = "svg")]
mod resvg_backend {
    use std::sync::{Arc, OnceLock};

    use log::debug;
    use resvg::tiny_skia::{Pixmap, Transform};
    use resvg::usvg;

    use super::{RasterImage, Rasterizer, unpremultiply_rgba};
    use crate::document::SvgDocument;
    use crate::error::RasterFault;
    use crate::geometry::Size;

    /// Rasterizer backed by `resvg`
    #[derive(Default)]
    pub struct ResvgRasterizer {
        fonts: OnceLock<Arc<usvg::fontdb::Database>>,
    }

    impl ResvgRasterizer {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn system_fonts(&self) -> Arc<usvg::fontdb::Database> {
            self.fonts
                .get_or_init(|| {
                    debug!("Loading system fonts for SVG text");
                    let mut db = usvg::fontdb::Database::new();
                    db.load_system_fonts();
                    Arc::new(db)
                })
                .clone()
        }

        fn needs_fonts(markup: &str) -> bool {
            markup.contains("<text") || markup.contains("font-family")
        }
    }

    impl Rasterizer for ResvgRasterizer {
        fn rasterize(
            &self,
            document: &SvgDocument,
            target: Size,
        ) -> Result<RasterImage, RasterFault> {
            let mut options = usvg::Options::default();
            if Self::needs_fonts(document.markup()) {
                options.fontdb = self.system_fonts();
            }

            let tree = usvg::Tree::from_str(document.markup(), &options)
                .map_err(|e| RasterFault::InvalidSvg(e.to_string()))?;

            let mut pixmap = Pixmap::new(target.width, target.height).ok_or(
                RasterFault::EmptyTarget {
                    width: target.width,
                    height: target.height,
                },
            )?;

            let tree_size = tree.size();
            let transform = Transform::from_scale(
                target.width as f32 / tree_size.width(),
                target.height as f32 / tree_size.height(),
            );
            resvg::render(&tree, transform, &mut pixmap.as_mut());

            let mut rgba = pixmap.take();
            unpremultiply_rgba(&mut rgba);
            Ok(RasterImage {
                width: target.width,
                height: target.height,
                rgba,
            })
        }
    }
}
