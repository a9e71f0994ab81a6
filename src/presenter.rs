//! UI-facing preview state
//!
//! A [`Presenter`] is only ever mutated on the affinity context. It turns the
//! current [`RenderResult`], zoom, options and viewport into a [`Preview`]
//! and hands every changed preview to the attached [`PreviewSurface`].

use std::borrow::Cow;
use std::time::Duration;

use log::{debug, warn};

use crate::geometry::{Point, Size, Viewport, Zoom, apply_zoom, place};
use crate::options::Options;
use crate::raster::RasterImage;
use crate::render::{Bitmap, RenderResult};
use crate::session::{Outcome, SessionState};

/// Size of the standalone error and loading indicators
pub const INDICATOR_SIZE: Size = Size::square(16);

pub const COPIED_TOOLTIP: &str = "Copied to clipboard";
pub const COPY_FEEDBACK_DURATION: Duration = Duration::from_secs(1);
pub const COPY_FEEDBACK_OPACITY: f32 = 0.5;

#[derive(Clone, Debug, PartialEq)]
pub enum PreviewContent {
    Nothing,
    Image(Bitmap),
    ErrorIndicator,
}

/// Everything a host needs to draw the preview
#[derive(Clone, Debug, PartialEq)]
pub struct Preview {
    pub content: PreviewContent,
    /// Loading affordance shown over (or instead of) the content
    pub loading: bool,
    /// Display size after zoom
    pub size: Size,
    /// Top-left corner inside the viewport; `None` while hidden
    pub position: Option<Point>,
    pub tooltip: Option<String>,
    pub opacity: f32,
}

impl Preview {
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            content: PreviewContent::Nothing,
            loading: false,
            size: Size::default(),
            position: None,
            tooltip: None,
            opacity: 1.0,
        }
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.position.is_some()
    }
}

/// Receives every preview change, on the affinity context
pub trait PreviewSurface: Send {
    fn present(&mut self, preview: &Preview);
}

pub trait Clipboard: Send {
    fn set_image(&mut self, image: &RasterImage) -> Result<(), String>;
    fn set_text(&mut self, text: &str) -> Result<(), String>;
}

/// The desktop clipboard, opened per copy
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn set_image(&mut self, image: &RasterImage) -> Result<(), String> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| format!("Failed to access clipboard: {e}"))?;
        clipboard
            .set_image(arboard::ImageData {
                width: image.width as usize,
                height: image.height as usize,
                bytes: Cow::Borrowed(&image.rgba),
            })
            .map_err(|e| format!("Failed to copy image to clipboard: {e}"))
    }

    fn set_text(&mut self, text: &str) -> Result<(), String> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| format!("Failed to access clipboard: {e}"))?;
        clipboard
            .set_text(text)
            .map_err(|e| format!("Failed to copy text to clipboard: {e}"))
    }
}

pub struct Presenter {
    options: Options,
    viewport: Viewport,
    state: SessionState,
    /// Last result that replaced the visible state
    current: Option<RenderResult>,
    /// What the render cache remembers; `Unchanged` points back to it
    last_success: Option<RenderResult>,
    zoom: Zoom,
    feedback: Option<String>,
    preview: Preview,
    surface: Option<Box<dyn PreviewSurface>>,
}

impl Presenter {
    #[must_use]
    pub fn new(options: Options, viewport: Viewport) -> Self {
        Self {
            options,
            viewport,
            state: SessionState::Idle,
            current: None,
            last_success: None,
            zoom: Zoom::default(),
            feedback: None,
            preview: Preview::hidden(),
            surface: None,
        }
    }

    pub fn set_surface(&mut self, surface: Box<dyn PreviewSurface>) {
        self.surface = Some(surface);
        self.publish();
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn set_options(&mut self, options: Options) {
        self.options = options;
        self.refresh();
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.refresh();
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn preview(&self) -> &Preview {
        &self.preview
    }

    #[must_use]
    pub fn current(&self) -> Option<&RenderResult> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn bitmap(&self) -> Option<&Bitmap> {
        match &self.current {
            Some(RenderResult::Success { bitmap, .. }) => Some(bitmap),
            _ => None,
        }
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        match &self.current {
            Some(RenderResult::Error { message }) => Some(message),
            _ => None,
        }
    }

    #[must_use]
    pub fn zoom(&self) -> Zoom {
        self.zoom
    }

    /// A trigger was accepted; a render is on its way
    pub fn begin_loading(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Loading;
        self.refresh();
    }

    /// Apply the result of the most recent trigger
    pub fn apply(&mut self, result: RenderResult) {
        if self.state == SessionState::Closed {
            return;
        }

        let outcome = match &result {
            RenderResult::Success { .. } => Outcome::Success,
            RenderResult::Error { .. } => Outcome::Error,
            RenderResult::Empty => Outcome::Empty,
            RenderResult::Unchanged { key } => {
                match &self.last_success {
                    Some(success) if success.cache_key() == Some(key) => {
                        if self.current.as_ref() != Some(success) {
                            self.current = Some(success.clone());
                        }
                    }
                    _ => warn!("Unchanged content {} has no applied success", key.fingerprint),
                }
                self.state = self.settled_state();
                self.refresh();
                return;
            }
            RenderResult::Cancelled => return,
        };

        if outcome == Outcome::Success {
            self.zoom.reset();
            self.last_success = Some(result.clone());
        }
        self.current = Some(result);
        self.state = SessionState::Applied(outcome);
        self.refresh();
    }

    /// Returns whether the factor changed
    pub fn zoom_in(&mut self) -> bool {
        self.change_zoom(Zoom::step_in)
    }

    pub fn zoom_out(&mut self) -> bool {
        self.change_zoom(Zoom::step_out)
    }

    pub fn reset_zoom(&mut self) -> bool {
        self.change_zoom(Zoom::reset)
    }

    fn change_zoom(&mut self, step: impl FnOnce(&mut Zoom)) -> bool {
        let before = self.zoom;
        step(&mut self.zoom);
        if before == self.zoom {
            return false;
        }
        debug!("Preview zoom {:.2} -> {:.2}", before.factor(), self.zoom.factor());
        self.refresh();
        true
    }

    /// Dim the preview and replace its tooltip until [`Presenter::clear_feedback`]
    pub fn show_feedback(&mut self, text: impl Into<String>) {
        self.feedback = Some(text.into());
        self.refresh();
    }

    pub fn clear_feedback(&mut self) {
        if self.feedback.take().is_some() {
            self.refresh();
        }
    }

    /// Terminal: hide everything and ignore later results
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.current = None;
        self.last_success = None;
        self.feedback = None;
        self.refresh();
    }

    /// Recompute the preview and publish it if anything changed
    pub fn refresh(&mut self) {
        let next = self.compose();
        if next != self.preview {
            self.preview = next;
            self.publish();
        }
    }

    fn publish(&mut self) {
        if let Some(surface) = self.surface.as_mut() {
            surface.present(&self.preview);
        }
    }

    fn settled_state(&self) -> SessionState {
        match &self.current {
            Some(RenderResult::Success { .. }) => SessionState::Applied(Outcome::Success),
            Some(RenderResult::Error { .. }) => SessionState::Applied(Outcome::Error),
            Some(RenderResult::Empty) => SessionState::Applied(Outcome::Empty),
            _ => SessionState::Idle,
        }
    }

    fn compose(&self) -> Preview {
        if self.state == SessionState::Closed {
            return Preview::hidden();
        }

        let (content, size, tooltip) = match &self.current {
            Some(RenderResult::Success {
                bitmap,
                width_label,
                height_label,
                ..
            }) => (
                PreviewContent::Image(bitmap.clone()),
                apply_zoom(bitmap.size(), self.zoom.factor()),
                Some(format!("Width: {width_label}\nHeight: {height_label}")),
            ),
            Some(RenderResult::Error { message }) if self.options.show_error_indicator => (
                PreviewContent::ErrorIndicator,
                INDICATOR_SIZE,
                Some(message.clone()),
            ),
            _ => (PreviewContent::Nothing, Size::default(), None),
        };

        let loading = self.state == SessionState::Loading && self.options.show_loading_indicator;
        let size = if content == PreviewContent::Nothing && loading {
            INDICATOR_SIZE
        } else {
            size
        };

        let position = place(
            size,
            self.viewport,
            self.options.preview_position,
            self.options.preview_margin,
        );

        let (tooltip, opacity) = match &self.feedback {
            Some(text) if content != PreviewContent::Nothing => {
                (Some(text.clone()), COPY_FEEDBACK_OPACITY)
            }
            _ => (tooltip, 1.0),
        };

        Preview {
            content,
            loading,
            size,
            position,
            tooltip,
            opacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Corner;
    use crate::test_utils::fakes::{RecordingSurface, success_result};

    fn presenter() -> Presenter {
        Presenter::new(Options::default(), Viewport::new(800.0, 600.0))
    }

    fn unchanged(success: &RenderResult) -> RenderResult {
        RenderResult::Unchanged {
            key: *success.cache_key().unwrap(),
        }
    }

    #[test]
    fn unchanged_for_other_content_never_restores_old_image() {
        let mut p = presenter();
        p.apply(success_result(Size::new(40, 20)));
        p.apply(RenderResult::Error {
            message: "boom".into(),
        });

        p.begin_loading();
        p.apply(unchanged(&success_result(Size::new(20, 40))));
        assert_eq!(p.preview().content, PreviewContent::ErrorIndicator);
        assert_eq!(p.state(), SessionState::Applied(Outcome::Error));
    }

    #[test]
    fn success_is_placed_bottom_right_with_dimension_tooltip() {
        let mut p = presenter();
        p.begin_loading();
        p.apply(success_result(Size::new(250, 125)));

        let preview = p.preview();
        assert!(matches!(preview.content, PreviewContent::Image(_)));
        assert_eq!(preview.size, Size::new(250, 125));
        assert_eq!(preview.position, Some(Point { x: 530.0, y: 455.0 }));
        assert_eq!(preview.tooltip.as_deref(), Some("Width: 250px\nHeight: 125px"));
        assert!(!preview.loading);
        assert_eq!(p.state(), SessionState::Applied(Outcome::Success));
    }

    #[test]
    fn error_shows_indicator_with_message() {
        let mut p = presenter();
        p.apply(RenderResult::Error {
            message: "render timed out after 5000 ms".into(),
        });

        assert_eq!(p.preview().content, PreviewContent::ErrorIndicator);
        assert_eq!(
            p.preview().tooltip.as_deref(),
            Some("render timed out after 5000 ms")
        );
        assert_eq!(p.last_error(), Some("render timed out after 5000 ms"));
    }

    #[test]
    fn error_hides_preview_when_indicator_disabled() {
        let mut p = Presenter::new(
            Options {
                show_error_indicator: false,
                ..Options::default()
            },
            Viewport::new(800.0, 600.0),
        );
        p.apply(success_result(Size::new(50, 50)));
        p.apply(RenderResult::Error {
            message: "boom".into(),
        });

        assert!(!p.preview().is_visible());
        assert_eq!(p.state(), SessionState::Applied(Outcome::Error));
    }

    #[test]
    fn empty_hides_preview() {
        let mut p = presenter();
        p.apply(success_result(Size::new(50, 50)));
        p.apply(RenderResult::Empty);
        assert!(!p.preview().is_visible());
        assert!(p.bitmap().is_none());
    }

    #[test]
    fn unchanged_and_cancelled_keep_prior_state() {
        let mut p = presenter();
        p.apply(success_result(Size::new(40, 40)));
        let before = p.preview().clone();

        p.begin_loading();
        assert!(p.preview().loading);
        p.apply(unchanged(p.current().unwrap()));
        assert_eq!(p.preview(), &before);
        assert_eq!(p.state(), SessionState::Applied(Outcome::Success));

        p.apply(RenderResult::Cancelled);
        assert_eq!(p.preview(), &before);
    }

    #[test]
    fn unchanged_after_error_restores_last_success() {
        let mut p = presenter();
        let shown = success_result(Size::new(40, 20));
        p.apply(shown.clone());
        p.apply(RenderResult::Error {
            message: "parse error at line 1, column 6: oops".into(),
        });
        assert_eq!(p.preview().content, PreviewContent::ErrorIndicator);

        p.begin_loading();
        p.apply(unchanged(&shown));
        assert!(matches!(p.preview().content, PreviewContent::Image(_)));
        assert_eq!(p.state(), SessionState::Applied(Outcome::Success));
        assert!(p.last_error().is_none());
    }

    #[test]
    fn loading_without_content_shows_indicator_unless_disabled() {
        let mut p = presenter();
        p.begin_loading();
        assert!(p.preview().is_visible());
        assert_eq!(p.preview().size, INDICATOR_SIZE);

        let mut quiet = Presenter::new(
            Options {
                show_loading_indicator: false,
                ..Options::default()
            },
            Viewport::new(800.0, 600.0),
        );
        quiet.begin_loading();
        assert_eq!(quiet.state(), SessionState::Loading);
        assert!(!quiet.preview().is_visible());
    }

    #[test]
    fn zoom_scales_display_and_resets_on_success() {
        let mut p = presenter();
        p.apply(success_result(Size::new(100, 50)));

        assert!(p.zoom_in());
        assert_eq!(p.preview().size, Size::new(125, 63));
        assert!(p.zoom_out());
        assert!(p.zoom_out());
        assert_eq!(p.preview().size, Size::new(75, 38));

        p.apply(success_result(Size::new(100, 60)));
        assert!(p.zoom().is_identity());
        assert_eq!(p.preview().size, Size::new(100, 60));
    }

    #[test]
    fn zoom_saturates() {
        let mut p = presenter();
        for _ in 0..20 {
            p.zoom_in();
        }
        assert_eq!(p.zoom().factor(), Zoom::MAX);
        assert!(!p.zoom_in());
        assert!(p.reset_zoom());
        assert!(!p.reset_zoom());
    }

    #[test]
    fn option_changes_replace() {
        let mut p = presenter();
        p.apply(success_result(Size::new(100, 100)));
        p.set_options(Options {
            preview_position: Corner::TopLeft,
            preview_margin: 5,
            ..Options::default()
        });
        assert_eq!(p.preview().position, Some(Point { x: 5.0, y: 5.0 }));

        p.set_viewport(Viewport::new(300.0, 300.0));
        assert_eq!(p.preview().position, Some(Point { x: 5.0, y: 5.0 }));
    }

    #[test]
    fn feedback_dims_and_restores() {
        let mut p = presenter();
        p.apply(success_result(Size::new(20, 20)));
        p.show_feedback(COPIED_TOOLTIP);
        assert_eq!(p.preview().opacity, COPY_FEEDBACK_OPACITY);
        assert_eq!(p.preview().tooltip.as_deref(), Some(COPIED_TOOLTIP));

        p.clear_feedback();
        assert_eq!(p.preview().opacity, 1.0);
        assert_eq!(p.preview().tooltip.as_deref(), Some("Width: 20px\nHeight: 20px"));
    }

    #[test]
    fn surface_sees_each_change_once() {
        let surface = RecordingSurface::default();
        let mut p = presenter();
        p.set_surface(Box::new(surface.clone()));
        p.apply(success_result(Size::new(20, 20)));
        p.refresh();
        p.set_viewport(Viewport::new(800.0, 600.0));

        // Initial hidden preview, then the success
        assert_eq!(surface.count(), 2);
        assert!(surface.last().is_some_and(|preview| preview.is_visible()));
    }

    #[test]
    fn closed_presenter_ignores_results() {
        let mut p = presenter();
        p.apply(success_result(Size::new(20, 20)));
        p.close();
        p.apply(success_result(Size::new(30, 30)));
        p.begin_loading();

        assert_eq!(p.state(), SessionState::Closed);
        assert!(!p.preview().is_visible());
    }
}
