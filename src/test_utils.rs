pub mod fakes {
    //! Stand-ins for the rasterizer, host view, clipboard and surface

    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::document::SvgDocument;
    use crate::error::RasterFault;
    use crate::geometry::{Size, Viewport};
    use crate::host::{DocumentSource, EventSink, HostEvent, HostView, Subscription};
    use crate::presenter::{Clipboard, Preview, PreviewSurface};
    use crate::raster::{RasterImage, Rasterizer};
    use crate::render::{RenderResult, RenderTicket, Renderer};

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns blank images and counts calls
    #[derive(Default)]
    pub struct CountingRasterizer {
        calls: AtomicUsize,
        last_target: Mutex<Option<Size>>,
        delay: Option<Duration>,
    }

    impl CountingRasterizer {
        /// Sleeps `delay` inside every call
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn last_target(&self) -> Option<Size> {
            *lock(&self.last_target)
        }
    }

    impl Rasterizer for CountingRasterizer {
        fn rasterize(
            &self,
            _document: &SvgDocument,
            target: Size,
        ) -> Result<RasterImage, RasterFault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *lock(&self.last_target) = Some(target);
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            Ok(RasterImage::blank(target))
        }
    }

    enum Failure {
        Fault(String),
        Panic(String),
    }

    pub struct FailingRasterizer {
        failure: Failure,
    }

    impl FailingRasterizer {
        /// Fails every call with a backend fault
        pub fn new(message: impl Into<String>) -> Self {
            Self {
                failure: Failure::Fault(message.into()),
            }
        }

        /// Panics inside every call
        pub fn panicking(message: impl Into<String>) -> Self {
            Self {
                failure: Failure::Panic(message.into()),
            }
        }
    }

    impl Rasterizer for FailingRasterizer {
        fn rasterize(
            &self,
            _document: &SvgDocument,
            _target: Size,
        ) -> Result<RasterImage, RasterFault> {
            match &self.failure {
                Failure::Fault(message) => Err(RasterFault::backend(message.clone())),
                Failure::Panic(message) => panic!("{message}"),
            }
        }
    }

    #[derive(Default)]
    struct Gate {
        entered: usize,
        released: bool,
    }

    /// Blocks every call until [`BlockingRasterizer::release`]
    #[derive(Default)]
    pub struct BlockingRasterizer {
        gate: Mutex<Gate>,
        changed: Condvar,
    }

    impl BlockingRasterizer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn release(&self) {
            lock(&self.gate).released = true;
            self.changed.notify_all();
        }

        pub fn entered(&self) -> usize {
            lock(&self.gate).entered
        }

        /// Wait until some call is blocked inside the rasterizer
        pub fn wait_until_entered(&self, timeout: Duration) -> bool {
            let deadline = Instant::now() + timeout;
            let mut gate = lock(&self.gate);
            while gate.entered == 0 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return false;
                }
                gate = self
                    .changed
                    .wait_timeout(gate, remaining)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            true
        }
    }

    impl Rasterizer for BlockingRasterizer {
        fn rasterize(
            &self,
            _document: &SvgDocument,
            target: Size,
        ) -> Result<RasterImage, RasterFault> {
            let mut gate = lock(&self.gate);
            gate.entered += 1;
            self.changed.notify_all();
            while !gate.released {
                gate = self
                    .changed
                    .wait(gate)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Ok(RasterImage::blank(target))
        }
    }

    /// A real `Success` whose bitmap has exactly `size`
    pub fn success_result(size: Size) -> RenderResult {
        let markup = format!("<svg width='{}' height='{}'/>", size.width, size.height);
        Renderer::new(Arc::new(CountingRasterizer::default())).render(
            &markup,
            size.width.max(size.height),
            &RenderTicket::detached(),
        )
    }

    /// In-memory editor view
    pub struct FakeView {
        text: Mutex<String>,
        viewport: Mutex<Viewport>,
        content_type: String,
        sinks: Arc<Mutex<Vec<(u64, EventSink)>>>,
        next_id: AtomicU64,
    }

    impl FakeView {
        pub const VIEWPORT: Viewport = Viewport::new(800.0, 600.0);

        pub fn new(text: impl Into<String>) -> Arc<Self> {
            Self::with_content_type(text, "svg")
        }

        pub fn with_content_type(text: impl Into<String>, content_type: &str) -> Arc<Self> {
            Arc::new(Self {
                text: Mutex::new(text.into()),
                viewport: Mutex::new(Self::VIEWPORT),
                content_type: content_type.to_string(),
                sinks: Arc::new(Mutex::new(Vec::new())),
                next_id: AtomicU64::new(0),
            })
        }

        /// Replace the text and notify subscribers
        pub fn set_text(&self, text: impl Into<String>) {
            *lock(&self.text) = text.into();
            self.emit(HostEvent::ContentChanged);
        }

        /// Change both viewport extents and notify subscribers
        pub fn resize(&self, viewport: Viewport) {
            *lock(&self.viewport) = viewport;
            self.emit(HostEvent::ViewportWidthChanged);
            self.emit(HostEvent::ViewportHeightChanged);
        }

        pub fn emit(&self, event: HostEvent) {
            for (_, sink) in lock(&self.sinks).iter() {
                sink.send(event.clone());
            }
        }

        pub fn subscriber_count(&self) -> usize {
            lock(&self.sinks).len()
        }
    }

    impl DocumentSource for FakeView {
        fn current_text(&self) -> String {
            lock(&self.text).clone()
        }
    }

    impl HostView for FakeView {
        fn viewport(&self) -> Viewport {
            *lock(&self.viewport)
        }

        fn content_type(&self) -> &str {
            &self.content_type
        }

        fn subscribe(&self, sink: EventSink) -> Vec<Subscription> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            lock(&self.sinks).push((id, sink));

            let sinks = self.sinks.clone();
            vec![Subscription::new(move || {
                lock(&sinks).retain(|(sink_id, _)| *sink_id != id);
            })]
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    pub enum Copied {
        Image(Size),
        Text(String),
    }

    /// Remembers what was copied; clones share the record
    #[derive(Clone, Default)]
    pub struct RecordingClipboard {
        copied: Arc<Mutex<Vec<Copied>>>,
        failure: Option<String>,
    }

    impl RecordingClipboard {
        /// Rejects every copy with `message`
        pub fn failing(message: impl Into<String>) -> Self {
            Self {
                failure: Some(message.into()),
                ..Self::default()
            }
        }

        pub fn copied(&self) -> Vec<Copied> {
            lock(&self.copied).clone()
        }

        pub fn images(&self) -> Vec<Size> {
            self.copied()
                .into_iter()
                .filter_map(|c| match c {
                    Copied::Image(size) => Some(size),
                    Copied::Text(_) => None,
                })
                .collect()
        }

        pub fn texts(&self) -> Vec<String> {
            self.copied()
                .into_iter()
                .filter_map(|c| match c {
                    Copied::Text(text) => Some(text),
                    Copied::Image(_) => None,
                })
                .collect()
        }

        fn record(&self, copied: Copied) -> Result<(), String> {
            if let Some(message) = &self.failure {
                return Err(message.clone());
            }
            lock(&self.copied).push(copied);
            Ok(())
        }
    }

    impl Clipboard for RecordingClipboard {
        fn set_image(&mut self, image: &RasterImage) -> Result<(), String> {
            self.record(Copied::Image(image.size()))
        }

        fn set_text(&mut self, text: &str) -> Result<(), String> {
            self.record(Copied::Text(text.to_string()))
        }
    }

    /// Keeps every presented preview; clones share the record
    #[derive(Clone, Default)]
    pub struct RecordingSurface {
        presented: Arc<Mutex<Vec<Preview>>>,
    }

    impl RecordingSurface {
        pub fn count(&self) -> usize {
            lock(&self.presented).len()
        }

        pub fn last(&self) -> Option<Preview> {
            lock(&self.presented).last().cloned()
        }

        pub fn all(&self) -> Vec<Preview> {
            lock(&self.presented).clone()
        }
    }

    impl PreviewSurface for RecordingSurface {
        fn present(&mut self, preview: &Preview) {
            lock(&self.presented).push(preview.clone());
        }
    }
}
