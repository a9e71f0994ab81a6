//! Timeout-bounded rendering pipeline
//!
//! `Renderer::render` walks content through the precondition check, the
//! change detector, parsing, sizing and a rasterizer call that runs on its
//! own thread under a wall-clock bound. The outcome is always one of the
//! [`RenderResult`] variants; faults never escape as panics or errors.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use flume::RecvTimeoutError;
use log::{debug, error, warn};

use crate::cache::{CacheEntry, Fingerprint, RenderCache};
use crate::document::{SvgDocument, looks_like_svg};
use crate::error::{PreviewFault, RasterFault};
use crate::geometry::{FitCache, Size};
use crate::raster::{RasterImage, Rasterizer};

/// Default wall-clock bound for one rasterizer call
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_millis(5000);

/// How often a waiting render checks for supersession
const SUPERSESSION_POLL: Duration = Duration::from_millis(10);

/// Initial capacity of the reusable PNG buffer
const OUTPUT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Encoded preview image
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    png: Arc<[u8]>,
    size: Size,
}

impl Bitmap {
    #[must_use]
    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    #[must_use]
    pub fn size(&self) -> Size {
        self.size
    }

    /// Decode back into straight RGBA pixels
    pub fn decode(&self) -> Result<RasterImage, image::ImageError> {
        let rgba = image::load_from_memory_with_format(&self.png, image::ImageFormat::Png)?
            .to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(RasterImage {
            width,
            height,
            rgba: rgba.into_raw(),
        })
    }
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("size", &self.size)
            .field("png_len", &self.png.len())
            .finish()
    }
}

/// Outcome of one render attempt
#[derive(Clone, Debug, PartialEq)]
pub enum RenderResult {
    Success {
        bitmap: Bitmap,
        width_label: String,
        height_label: String,
        /// Change-detector key, recorded once the success is applied
        key: CacheEntry,
    },
    Error {
        message: String,
    },
    /// Content does not look like SVG
    Empty,
    /// Same content and preview size as the last applied success
    Unchanged { key: CacheEntry },
    /// Superseded by a newer trigger
    Cancelled,
}

impl RenderResult {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RenderResult::Success { .. } => "success",
            RenderResult::Error { .. } => "error",
            RenderResult::Empty => "empty",
            RenderResult::Unchanged { .. } => "unchanged",
            RenderResult::Cancelled => "cancelled",
        }
    }

    /// Whether applying this result replaces the visible state
    #[must_use]
    pub fn supersedes_previous(&self) -> bool {
        match self {
            RenderResult::Success { .. } | RenderResult::Error { .. } | RenderResult::Empty => true,
            RenderResult::Unchanged { .. } | RenderResult::Cancelled => false,
        }
    }

    /// Content and envelope this result was produced for
    #[must_use]
    pub fn cache_key(&self) -> Option<&CacheEntry> {
        match self {
            RenderResult::Success { key, .. } | RenderResult::Unchanged { key } => Some(key),
            _ => None,
        }
    }

    fn from_fault(fault: PreviewFault) -> Self {
        match &fault {
            PreviewFault::Unexpected(_) => error!("Render failed unexpectedly: {fault}"),
            _ => warn!("Render failed: {fault}"),
        }
        RenderResult::Error {
            message: fault.to_string(),
        }
    }
}

/// Issues tickets; issuing a new one supersedes all older ones
#[derive(Clone, Debug, Default)]
pub struct Supersession {
    latest: Arc<AtomicU64>,
}

impl Supersession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn issue(&self) -> RenderTicket {
        let id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        RenderTicket {
            id,
            latest: self.latest.clone(),
        }
    }

    /// Supersede every outstanding ticket without issuing a new one
    pub fn invalidate(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }
}

/// Identifies one trigger; stale once a newer ticket is issued
#[derive(Clone, Debug)]
pub struct RenderTicket {
    id: u64,
    latest: Arc<AtomicU64>,
}

impl RenderTicket {
    /// Ticket that nothing else can supersede
    #[must_use]
    pub fn detached() -> Self {
        Supersession::new().issue()
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::SeqCst) == self.id
    }

    #[must_use]
    pub fn is_superseded(&self) -> bool {
        !self.is_current()
    }
}

type RasterOutcome = thread::Result<Result<RasterImage, RasterFault>>;

/// Shared handle to a renderer's change detector.
///
/// Renders only read it. Whoever applies a `Success` records it through
/// [`CacheHandle::commit`], so a discarded success never makes its content
/// look unchanged.
#[derive(Clone, Debug, Default)]
pub struct CacheHandle {
    cache: Arc<Mutex<RenderCache>>,
}

impl CacheHandle {
    #[must_use]
    pub fn lock(&self) -> MutexGuard<'_, RenderCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `result` if it is a success. Returns whether anything was recorded.
    pub fn commit(&self, result: &RenderResult) -> bool {
        let RenderResult::Success { bitmap, key, .. } = result else {
            return false;
        };
        self.lock()
            .record(key.fingerprint, key.preview_size, bitmap.size());
        true
    }
}

/// Per-session renderer: owns the fit memo and the output buffer, and reads
/// the change detector
pub struct Renderer {
    rasterizer: Arc<dyn Rasterizer>,
    cache: CacheHandle,
    fit: FitCache,
    buffer: Vec<u8>,
    timeout: Duration,
}

impl Renderer {
    #[must_use]
    pub fn new(rasterizer: Arc<dyn Rasterizer>) -> Self {
        Self::with_timeout(rasterizer, DEFAULT_RENDER_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(rasterizer: Arc<dyn Rasterizer>, timeout: Duration) -> Self {
        Self {
            rasterizer,
            cache: CacheHandle::default(),
            fit: FitCache::default(),
            buffer: Vec::with_capacity(OUTPUT_BUFFER_CAPACITY),
            timeout,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn cache(&self) -> MutexGuard<'_, RenderCache> {
        self.cache.lock()
    }

    /// Handle for recording applied successes without locking the renderer
    #[must_use]
    pub fn cache_handle(&self) -> CacheHandle {
        self.cache.clone()
    }

    /// Record an applied success
    pub fn commit(&self, result: &RenderResult) -> bool {
        self.cache.commit(result)
    }

    /// Capacity of the retained output buffer
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Render `content` into a preview fitting a `preview_size` square
    pub fn render(&mut self, content: &str, preview_size: u32, ticket: &RenderTicket) -> RenderResult {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.try_render(content, preview_size, ticket)
        }));

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(fault)) => RenderResult::from_fault(fault),
            Err(panic) => RenderResult::from_fault(PreviewFault::unexpected(panic_message(&panic))),
        };
        debug!(
            "Render #{} finished: {} ({} bytes, envelope {preview_size})",
            ticket.id(),
            result.kind(),
            content.len()
        );
        result
    }

    fn try_render(
        &mut self,
        content: &str,
        preview_size: u32,
        ticket: &RenderTicket,
    ) -> Result<RenderResult, PreviewFault> {
        if !looks_like_svg(content) {
            return Ok(RenderResult::Empty);
        }

        let fingerprint = Fingerprint::of(content);
        let key = CacheEntry {
            fingerprint,
            preview_size,
        };
        if self.cache.lock().should_skip(&fingerprint, preview_size) {
            debug!("Skipping render, content {fingerprint} unchanged");
            return Ok(RenderResult::Unchanged { key });
        }

        if ticket.is_superseded() {
            return Ok(RenderResult::Cancelled);
        }

        let document = Arc::new(SvgDocument::parse(content)?);
        let target = self.fit.fit(document.source_size(), preview_size);

        let Some(image) = self.rasterize_bounded(document.clone(), target, ticket)? else {
            return Ok(RenderResult::Cancelled);
        };
        if ticket.is_superseded() {
            return Ok(RenderResult::Cancelled);
        }

        let bitmap = self.encode(&image)?;
        Ok(RenderResult::Success {
            bitmap,
            width_label: document.width.label.clone(),
            height_label: document.height.label.clone(),
            key,
        })
    }

    /// Run the rasterizer on a fresh thread. `Ok(None)` means superseded.
    ///
    /// A rasterizer call cannot be interrupted: on timeout or supersession the
    /// thread is left to finish on its own and its result is dropped, so a
    /// hanging backend keeps one blocked thread per abandoned attempt. See
    /// [`raster_threads_running`].
    fn rasterize_bounded(
        &self,
        document: Arc<SvgDocument>,
        target: Size,
        ticket: &RenderTicket,
    ) -> Result<Option<RasterImage>, PreviewFault> {
        let (tx, rx) = flume::bounded::<RasterOutcome>(1);
        let rasterizer = self.rasterizer.clone();

        RASTER_THREADS.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name(format!("svgpeek-raster-{}", ticket.id()))
            .spawn(move || {
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| rasterizer.rasterize(&document, target)));
                RASTER_THREADS.fetch_sub(1, Ordering::SeqCst);
                // The waiting side may have given up already.
                let _ = tx.send(outcome);
            });
        if let Err(e) = spawned {
            RASTER_THREADS.fetch_sub(1, Ordering::SeqCst);
            return Err(PreviewFault::unexpected(format!("spawn render worker: {e}")));
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            if ticket.is_superseded() {
                debug!(
                    "Render #{} superseded while rasterizing, {} raster thread(s) running",
                    ticket.id(),
                    raster_threads_running()
                );
                return Ok(None);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    "Render #{} timed out, {} raster thread(s) still running",
                    ticket.id(),
                    raster_threads_running()
                );
                return Err(PreviewFault::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }

            match rx.recv_timeout(remaining.min(SUPERSESSION_POLL)) {
                Ok(Ok(Ok(image))) => return Ok(Some(image)),
                Ok(Ok(Err(fault))) => return Err(fault.into()),
                Ok(Err(panic)) => {
                    return Err(PreviewFault::unexpected(panic_message(&panic)));
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PreviewFault::unexpected("render worker disconnected"));
                }
            }
        }
    }

    /// PNG-encode into the retained buffer, then copy out an exact-size bitmap
    fn encode(&mut self, image: &RasterImage) -> Result<Bitmap, PreviewFault> {
        let encoding = |e: png::EncodingError| PreviewFault::unexpected(format!("png encoding: {e}"));

        self.buffer.clear();
        let mut encoder = png::Encoder::new(&mut self.buffer, image.width, image.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().map_err(encoding)?;
        writer.write_image_data(&image.rgba).map_err(encoding)?;
        writer.finish().map_err(encoding)?;

        Ok(Bitmap {
            png: Arc::from(self.buffer.as_slice()),
            size: image.size(),
        })
    }
}

/// Rasterizer threads that have not returned yet, across all renderers
static RASTER_THREADS: AtomicUsize = AtomicUsize::new(0);

/// Rasterizer threads still running, including abandoned ones
#[must_use]
pub fn raster_threads_running() -> usize {
    RASTER_THREADS.load(Ordering::SeqCst)
}

fn panic_message(panic: &Box<dyn std::any::Any + Send + 'static>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fakes::{BlockingRasterizer, CountingRasterizer, FailingRasterizer};

    fn counting() -> (Arc<CountingRasterizer>, Renderer) {
        let rasterizer = Arc::new(CountingRasterizer::default());
        let renderer = Renderer::new(rasterizer.clone());
        (rasterizer, renderer)
    }

    #[test]
    fn non_svg_content_is_empty_without_rasterizing() {
        let (rasterizer, mut renderer) = counting();
        let result = renderer.render("just some text", 250, &RenderTicket::detached());
        assert_eq!(result, RenderResult::Empty);
        assert_eq!(rasterizer.calls(), 0);
    }

    #[test]
    fn success_fits_envelope_and_labels_dimensions() {
        let (rasterizer, mut renderer) = counting();
        let result = renderer.render(
            "<svg width='100' height='50'></svg>",
            250,
            &RenderTicket::detached(),
        );

        match result {
            RenderResult::Success {
                bitmap,
                width_label,
                height_label,
                ..
            } => {
                assert_eq!(bitmap.size(), Size::new(250, 125));
                assert_eq!(width_label, "100px");
                assert_eq!(height_label, "50px");
                assert!(bitmap.png_bytes().starts_with(b"\x89PNG"));
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(rasterizer.calls(), 1);
        assert_eq!(rasterizer.last_target(), Some(Size::new(250, 125)));
    }

    #[test]
    fn identical_content_is_unchanged_and_skips_rasterizer() {
        let (rasterizer, mut renderer) = counting();
        let content = "<svg viewBox='0 0 80 40'/>";

        let first = renderer.render(content, 250, &RenderTicket::detached());
        assert_eq!(first.kind(), "success");
        assert!(renderer.commit(&first));

        let second = renderer.render(content, 250, &RenderTicket::detached());
        assert!(matches!(second, RenderResult::Unchanged { key } if Some(&key) == first.cache_key()));
        assert_eq!(rasterizer.calls(), 1);
    }

    #[test]
    fn success_is_not_remembered_until_committed() {
        let (rasterizer, mut renderer) = counting();
        let content = "<svg width='20' height='10'/>";

        let first = renderer.render(content, 250, &RenderTicket::detached());
        assert_eq!(first.kind(), "success");
        assert!(renderer.cache().entry().is_none());

        let again = renderer.render(content, 250, &RenderTicket::detached());
        assert_eq!(again.kind(), "success");
        assert_eq!(rasterizer.calls(), 2);
    }

    #[test]
    fn only_successes_are_committed() {
        let (_, renderer) = counting();
        assert!(!renderer.commit(&RenderResult::Empty));
        assert!(!renderer.commit(&RenderResult::Error {
            message: "boom".into()
        }));
        assert!(renderer.cache().entry().is_none());
    }

    #[test]
    fn preview_size_change_forces_render() {
        let (rasterizer, mut renderer) = counting();
        let content = "<svg width='10' height='10'/>";

        let first = renderer.render(content, 250, &RenderTicket::detached());
        renderer.commit(&first);
        let result = renderer.render(content, 100, &RenderTicket::detached());
        assert_eq!(result.kind(), "success");
        assert_eq!(rasterizer.calls(), 2);
    }

    #[test]
    fn malformed_markup_is_parse_error() {
        let (rasterizer, mut renderer) = counting();
        let result = renderer.render("<svg><rect></svg>", 250, &RenderTicket::detached());
        match result {
            RenderResult::Error { message } => assert!(message.contains("parse error at line 1")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(rasterizer.calls(), 0);
    }

    #[test]
    fn wrong_root_is_never_success() {
        let (_, mut renderer) = counting();
        let result = renderer.render(
            "<html><body><svg/></body></html>",
            250,
            &RenderTicket::detached(),
        );
        match result {
            RenderResult::Error { message } => assert!(message.contains("unexpected root element")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn failures_do_not_poison_cache() {
        let failing = Arc::new(FailingRasterizer::new("backend exploded"));
        let mut renderer = Renderer::new(failing);
        let content = "<svg width='10' height='10'/>";

        let first = renderer.render(content, 250, &RenderTicket::detached());
        assert!(matches!(first, RenderResult::Error { ref message } if message.contains("backend exploded")));
        assert!(!renderer.commit(&first));
        assert!(renderer.cache().entry().is_none());

        let second = renderer.render(content, 250, &RenderTicket::detached());
        assert_eq!(second.kind(), "error");
    }

    #[test]
    fn slow_rasterizer_times_out_with_configured_value() {
        let blocking = Arc::new(BlockingRasterizer::new());
        let mut renderer = Renderer::with_timeout(blocking.clone(), Duration::from_millis(60));

        let started = Instant::now();
        let result = renderer.render("<svg/>", 250, &RenderTicket::detached());
        // The abandoned call is still blocked in the rasterizer.
        assert!(raster_threads_running() >= 1);
        blocking.release();

        match result {
            RenderResult::Error { message } => assert!(message.contains("60 ms"), "{message}"),
            other => panic!("expected timeout error, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(renderer.cache().entry().is_none());
    }

    #[test]
    fn superseded_render_is_cancelled() {
        let blocking = Arc::new(BlockingRasterizer::new());
        let mut renderer = Renderer::with_timeout(blocking.clone(), Duration::from_secs(10));
        let supersession = Supersession::new();
        let ticket = supersession.issue();

        let trigger = supersession.clone();
        let waiter = blocking.clone();
        let handle = thread::spawn(move || {
            waiter.wait_until_entered(Duration::from_secs(2));
            trigger.invalidate();
        });

        let result = renderer.render("<svg/>", 250, &ticket);
        handle.join().unwrap();
        blocking.release();

        assert_eq!(result, RenderResult::Cancelled);
        assert!(renderer.cache().entry().is_none());
    }

    #[test]
    fn stale_ticket_never_starts_rasterizing() {
        let (rasterizer, mut renderer) = counting();
        let supersession = Supersession::new();
        let ticket = supersession.issue();
        let _newer = supersession.issue();

        let result = renderer.render("<svg/>", 250, &ticket);
        assert_eq!(result, RenderResult::Cancelled);
        assert_eq!(rasterizer.calls(), 0);
    }

    #[test]
    fn rasterizer_panic_becomes_unexpected_error() {
        let failing = Arc::new(FailingRasterizer::panicking("kaboom"));
        let mut renderer = Renderer::new(failing);

        let result = renderer.render("<svg/>", 250, &RenderTicket::detached());
        match result {
            RenderResult::Error { message } => {
                assert!(message.starts_with("unexpected error:"), "{message}");
                assert!(message.contains("kaboom"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn output_buffer_is_retained_between_renders() {
        let (_, mut renderer) = counting();
        let capacity = renderer.buffer_capacity();
        assert!(capacity >= OUTPUT_BUFFER_CAPACITY);

        renderer.render("<svg width='8' height='8'/>", 50, &RenderTicket::detached());
        renderer.render("<svg width='9' height='8'/>", 50, &RenderTicket::detached());
        assert_eq!(renderer.buffer_capacity(), capacity);
    }

    #[test]
    fn bitmap_decodes_back_to_rgba() {
        let (_, mut renderer) = counting();
        let RenderResult::Success { bitmap, .. } =
            renderer.render("<svg width='4' height='2'/>", 50, &RenderTicket::detached())
        else {
            panic!("expected success");
        };

        let image = bitmap.decode().unwrap();
        assert_eq!(image.size(), Size::new(50, 25));
        assert_eq!(image.rgba.len(), 50 * 25 * 4);
    }
}
