//! Per-view preview session
//!
//! A [`Session`] lives on the affinity context (the thread pumping the
//! [`DispatchQueue`](crate::dispatch::DispatchQueue) its dispatcher came
//! from). Host events become [`Effect`]s; renders run on the render
//! debouncer's worker thread and hop back through the dispatcher, where a
//! result is applied only if its ticket is still the latest one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use flume::Receiver;
use log::{debug, info, warn};

use crate::debounce::Debouncer;
use crate::dispatch::Dispatcher;
use crate::host::{
    DocumentSource, EventSink, HostEvent, HostView, Subscription, is_previewable,
};
use crate::options::{OptionField, Options, VIEWPORT_DEBOUNCE_MS};
use crate::presenter::{
    COPIED_TOOLTIP, COPY_FEEDBACK_DURATION, Clipboard, Preview, PreviewSurface, Presenter,
    SystemClipboard,
};
use crate::raster::Rasterizer;
use crate::render::{CacheHandle, RenderResult, RenderTicket, Renderer, Supersession};

/// Which result kind the visible state came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Applied(Outcome),
    /// Terminal
    Closed,
}

/// Work a host event asks of the session
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ScheduleRender,
    ScheduleReplace,
    ApplyOptions(Options),
    ZoomIn,
    ZoomOut,
    ResetZoom,
    CopyToClipboard,
    Teardown,
}

/// Map one host event to the effects it causes
#[must_use]
pub fn plan(event: &HostEvent) -> Vec<Effect> {
    match event {
        HostEvent::ContentChanged => vec![Effect::ScheduleRender],
        HostEvent::ViewportWidthChanged | HostEvent::ViewportHeightChanged => {
            vec![Effect::ScheduleReplace]
        }
        HostEvent::OptionsChanged { options, field } => {
            let rerender = match field {
                OptionField::PreviewSize => true,
                // Placement and indicators are recomputed when options are applied
                OptionField::PreviewPosition
                | OptionField::PreviewMargin
                | OptionField::ShowErrorIndicator
                | OptionField::ShowLoadingIndicator => false,
                // Read when the next render is scheduled
                OptionField::DebounceDelay | OptionField::RenderTimeout => false,
            };
            let mut effects = vec![Effect::ApplyOptions(options.clone())];
            if rerender {
                effects.push(Effect::ScheduleRender);
            }
            effects
        }
        HostEvent::ZoomIn => vec![Effect::ZoomIn],
        HostEvent::ZoomOut => vec![Effect::ZoomOut],
        HostEvent::PointerLeft => vec![Effect::ResetZoom],
        HostEvent::Clicked => vec![Effect::CopyToClipboard],
        HostEvent::Closed => vec![Effect::Teardown],
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Session {
    view: Arc<dyn HostView>,
    presenter: Arc<Mutex<Presenter>>,
    renderer: Arc<Mutex<Renderer>>,
    cache: CacheHandle,
    supersession: Supersession,
    render_debouncer: Debouncer,
    replace_debouncer: Debouncer,
    feedback_debouncer: Debouncer,
    dispatcher: Dispatcher,
    inbox: Receiver<HostEvent>,
    subscriptions: Vec<Subscription>,
    clipboard: Box<dyn Clipboard>,
    closed: bool,
}

impl Session {
    /// Start a session if the view holds a previewable content type
    pub fn open(
        view: Arc<dyn HostView>,
        options: Options,
        rasterizer: Arc<dyn Rasterizer>,
        dispatcher: Dispatcher,
    ) -> Option<Self> {
        if !is_previewable(view.content_type()) {
            return None;
        }
        Some(Self::new(view, options, rasterizer, dispatcher))
    }

    /// Subscribe to `view` and kick off the first render
    pub fn new(
        view: Arc<dyn HostView>,
        options: Options,
        rasterizer: Arc<dyn Rasterizer>,
        dispatcher: Dispatcher,
    ) -> Self {
        let options = options.clamped();
        let renderer = Renderer::with_timeout(rasterizer, options.render_timeout());
        let presenter = Presenter::new(options, view.viewport());

        let (tx, inbox) = flume::unbounded();
        let subscriptions = view.subscribe(EventSink::new(tx));

        let session = Self {
            presenter: Arc::new(Mutex::new(presenter)),
            cache: renderer.cache_handle(),
            renderer: Arc::new(Mutex::new(renderer)),
            supersession: Supersession::new(),
            render_debouncer: Debouncer::new("render"),
            replace_debouncer: Debouncer::with_affinity("replace", dispatcher.clone()),
            feedback_debouncer: Debouncer::with_affinity("feedback", dispatcher.clone()),
            dispatcher,
            inbox,
            subscriptions,
            clipboard: Box::new(SystemClipboard),
            closed: false,
            view,
        };
        info!(
            "Preview session opened ({} subscriptions)",
            session.subscriptions.len()
        );

        session.schedule_render(Duration::ZERO);
        session
    }

    #[must_use]
    pub fn with_clipboard(mut self, clipboard: Box<dyn Clipboard>) -> Self {
        self.clipboard = clipboard;
        self
    }

    pub fn set_surface(&self, surface: Box<dyn PreviewSurface>) {
        lock(&self.presenter).set_surface(surface);
    }

    /// Handle every host event received so far. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.inbox.try_recv() {
            self.handle(event);
            handled += 1;
        }
        handled
    }

    /// Inject changed options; `field` decides re-render vs re-place
    pub fn options_changed(&mut self, options: Options, field: OptionField) {
        self.handle(HostEvent::OptionsChanged { options, field });
    }

    pub fn handle(&mut self, event: HostEvent) {
        if self.closed {
            return;
        }
        debug!("Host event: {event:?}");
        for effect in plan(&event) {
            self.run(effect);
        }
    }

    fn run(&mut self, effect: Effect) {
        match effect {
            Effect::ScheduleRender => {
                let delay = lock(&self.presenter).options().debounce_delay();
                self.schedule_render(delay);
            }
            Effect::ScheduleReplace => self.schedule_replace(),
            Effect::ApplyOptions(options) => lock(&self.presenter).set_options(options.clamped()),
            Effect::ZoomIn => {
                lock(&self.presenter).zoom_in();
            }
            Effect::ZoomOut => {
                lock(&self.presenter).zoom_out();
            }
            Effect::ResetZoom => {
                lock(&self.presenter).reset_zoom();
            }
            Effect::CopyToClipboard => self.copy_to_clipboard(),
            Effect::Teardown => self.close(),
        }
    }

    /// Supersede older triggers and render after `delay`
    fn schedule_render(&self, delay: Duration) {
        let ticket = self.supersession.issue();
        let options = {
            let mut presenter = lock(&self.presenter);
            presenter.begin_loading();
            presenter.options().clone()
        };

        let view = self.view.clone();
        let renderer = self.renderer.clone();
        let cache = self.cache.clone();
        let presenter = self.presenter.clone();
        let dispatcher = self.dispatcher.clone();

        self.render_debouncer.schedule(delay, move || {
            if ticket.is_superseded() {
                return;
            }
            let text = view.current_text();
            let result = {
                let mut renderer = lock(&renderer);
                renderer.set_timeout(options.render_timeout());
                renderer.render(&text, options.preview_size, &ticket)
            };
            if result == RenderResult::Cancelled {
                return;
            }
            if !dispatcher.post(move || apply_if_current(&presenter, &cache, &ticket, result)) {
                debug!("Affinity queue closed, dropping render result");
            }
        });
    }

    fn schedule_replace(&self) {
        let view = self.view.clone();
        let presenter = self.presenter.clone();
        self.replace_debouncer
            .schedule(Duration::from_millis(VIEWPORT_DEBOUNCE_MS), move || {
                lock(&presenter).set_viewport(view.viewport());
            });
    }

    fn copy_to_clipboard(&mut self) {
        let (bitmap, error) = {
            let presenter = lock(&self.presenter);
            (
                presenter.bitmap().cloned(),
                presenter.last_error().map(str::to_string),
            )
        };

        let copied = match (bitmap, error) {
            (Some(bitmap), _) => bitmap
                .decode()
                .map_err(|e| format!("Failed to decode preview: {e}"))
                .and_then(|image| self.clipboard.set_image(&image)),
            (None, Some(message)) => self.clipboard.set_text(&message),
            (None, None) => return,
        };

        let feedback = match copied {
            Ok(()) => COPIED_TOOLTIP.to_string(),
            Err(e) => {
                warn!("{e}");
                e
            }
        };
        lock(&self.presenter).show_feedback(feedback);

        let presenter = self.presenter.clone();
        self.feedback_debouncer
            .schedule(COPY_FEEDBACK_DURATION, move || {
                lock(&presenter).clear_feedback();
            });
    }

    /// Release subscriptions, stop timers and hide the preview. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.supersession.invalidate();
        self.subscriptions.clear();
        self.render_debouncer.dispose();
        self.replace_debouncer.dispose();
        self.feedback_debouncer.dispose();
        lock(&self.presenter).close();
        info!("Preview session closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        lock(&self.presenter).state()
    }

    #[must_use]
    pub fn preview(&self) -> Preview {
        lock(&self.presenter).preview().clone()
    }

    #[must_use]
    pub fn current_result(&self) -> Option<RenderResult> {
        lock(&self.presenter).current().cloned()
    }

    #[must_use]
    pub fn options(&self) -> Options {
        lock(&self.presenter).options().clone()
    }

    #[must_use]
    pub fn zoom_factor(&self) -> f32 {
        lock(&self.presenter).zoom().factor()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Apply `result` unless a newer trigger arrived. Only an applied success
/// reaches the change detector.
fn apply_if_current(
    presenter: &Mutex<Presenter>,
    cache: &CacheHandle,
    ticket: &RenderTicket,
    result: RenderResult,
) {
    if ticket.is_superseded() {
        debug!(
            "Discarding {} result of superseded render #{}",
            result.kind(),
            ticket.id()
        );
        return;
    }
    cache.commit(&result);
    lock(presenter).apply(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchQueue;
    use crate::geometry::{Point, Size, Viewport};
    use crate::presenter::{COPY_FEEDBACK_OPACITY, PreviewContent};
    use crate::test_utils::fakes::{
        CountingRasterizer, FakeView, RecordingClipboard, RecordingSurface,
    };

    const WAIT: Duration = Duration::from_secs(3);

    /// Block until a worker has posted something to `queue`
    fn wait_until_posted(queue: &DispatchQueue) -> bool {
        let deadline = std::time::Instant::now() + WAIT;
        while queue.is_empty() {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }
    const SQUARE: &str = "<svg width='10' height='10'/>";

    fn fast_options() -> Options {
        Options {
            debounce_delay_ms: 100,
            ..Options::default()
        }
    }

    fn open(
        view: &Arc<FakeView>,
        options: Options,
    ) -> (DispatchQueue, Arc<CountingRasterizer>, Session) {
        let queue = DispatchQueue::new();
        let rasterizer = Arc::new(CountingRasterizer::default());
        let session = Session::new(view.clone(), options, rasterizer.clone(), queue.dispatcher());
        (queue, rasterizer, session)
    }

    #[test]
    fn plan_routes_events() {
        assert_eq!(plan(&HostEvent::ContentChanged), vec![Effect::ScheduleRender]);
        assert_eq!(
            plan(&HostEvent::ViewportHeightChanged),
            vec![Effect::ScheduleReplace]
        );
        assert_eq!(plan(&HostEvent::PointerLeft), vec![Effect::ResetZoom]);
        assert_eq!(plan(&HostEvent::Closed), vec![Effect::Teardown]);
    }

    #[test]
    fn plan_only_rerenders_for_preview_size() {
        let options = Options::default();
        for field in OptionField::ALL {
            let effects = plan(&HostEvent::OptionsChanged {
                options: options.clone(),
                field,
            });
            assert_eq!(effects[0], Effect::ApplyOptions(options.clone()));
            assert_eq!(
                effects.contains(&Effect::ScheduleRender),
                field == OptionField::PreviewSize,
                "{field:?}"
            );
        }
    }

    #[test]
    fn open_renders_immediately() {
        let view = FakeView::new(SQUARE);
        let (queue, rasterizer, session) = open(&view, fast_options());

        assert!(queue.run_until(WAIT, || session.state()
            == SessionState::Applied(Outcome::Success)));
        assert_eq!(rasterizer.calls(), 1);
        assert_eq!(session.preview().size, Size::new(250, 250));
    }

    #[test]
    fn open_skips_unsupported_content_types() {
        let view = FakeView::with_content_type("<svg/>", "rust");
        let queue = DispatchQueue::new();
        let session = Session::open(
            view,
            Options::default(),
            Arc::new(CountingRasterizer::default()),
            queue.dispatcher(),
        );
        assert!(session.is_none());
    }

    #[test]
    fn unchanged_content_does_not_rasterize_again() {
        let view = FakeView::new(SQUARE);
        let (queue, rasterizer, mut session) = open(&view, fast_options());
        assert!(queue.run_until(WAIT, || rasterizer.calls() == 1
            && session.state() == SessionState::Applied(Outcome::Success)));

        view.emit(HostEvent::ContentChanged);
        session.pump();
        assert_eq!(session.state(), SessionState::Loading);

        assert!(queue.run_until(WAIT, || session.state()
            == SessionState::Applied(Outcome::Success)));
        assert_eq!(rasterizer.calls(), 1);
    }

    #[test]
    fn stale_result_is_discarded() {
        let view = FakeView::new(SQUARE);
        let (queue, _rasterizer, session) = open(&view, fast_options());

        // The first render has posted, but the owner has not pumped yet.
        assert!(wait_until_posted(&queue));
        let _newer = session.supersession.issue();
        assert_eq!(queue.run_pending(), 1);

        assert_eq!(session.state(), SessionState::Loading);
        assert!(session.current_result().is_none());
        assert!(session.cache.lock().entry().is_none());
    }

    #[test]
    fn discarded_success_does_not_make_its_content_unchanged() {
        let view = FakeView::new(SQUARE);
        let (queue, rasterizer, mut session) = open(&view, fast_options());
        assert!(queue.run_until(WAIT, || session.state()
            == SessionState::Applied(Outcome::Success)));

        view.set_text("<svg width='20' height='10'/>");
        session.pump();
        assert!(wait_until_posted(&queue));

        // Same text again before the posted success is applied.
        view.emit(HostEvent::ContentChanged);
        session.pump();

        assert!(queue.run_until(WAIT, || session.state()
            == SessionState::Applied(Outcome::Success)
            && session.preview().size == Size::new(250, 125)));
        match session.current_result() {
            Some(RenderResult::Success { width_label, .. }) => assert_eq!(width_label, "20px"),
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(rasterizer.calls(), 3);
    }

    #[test]
    fn viewport_change_replaces_without_rendering() {
        let view = FakeView::new(SQUARE);
        let (queue, rasterizer, mut session) = open(&view, fast_options());
        assert!(queue.run_until(WAIT, || session.preview().is_visible()));

        view.resize(Viewport::new(400.0, 300.0));
        session.pump();
        assert!(queue.run_until(WAIT, || session.preview().position
            == Some(Point { x: 130.0, y: 30.0 })));
        assert_eq!(rasterizer.calls(), 1);
    }

    #[test]
    fn preview_size_change_rerenders() {
        let view = FakeView::new(SQUARE);
        let (queue, rasterizer, mut session) = open(&view, fast_options());
        assert!(queue.run_until(WAIT, || session.preview().is_visible()));

        let options = Options {
            preview_size: 100,
            ..fast_options()
        };
        view.emit(HostEvent::OptionsChanged {
            options,
            field: OptionField::PreviewSize,
        });
        session.pump();

        assert!(queue.run_until(WAIT, || session.preview().size == Size::new(100, 100)));
        assert_eq!(rasterizer.calls(), 2);
    }

    #[test]
    fn margin_change_moves_preview_without_rendering() {
        let view = FakeView::new(SQUARE);
        let (queue, rasterizer, mut session) = open(&view, fast_options());
        assert!(queue.run_until(WAIT, || session.preview().is_visible()));
        let before = session.preview().position;

        let options = Options {
            preview_margin: fast_options().preview_margin + 40,
            ..fast_options()
        };
        session.options_changed(options, OptionField::PreviewMargin);
        assert!(queue.run_until(WAIT, || session.preview().position != before));

        assert_eq!(session.options().preview_margin, fast_options().preview_margin + 40);
        assert_eq!(rasterizer.calls(), 1);
    }

    #[test]
    fn zoom_events_and_pointer_leave() {
        let view = FakeView::new(SQUARE);
        let (queue, _rasterizer, mut session) = open(&view, fast_options());
        assert!(queue.run_until(WAIT, || session.preview().is_visible()));

        view.emit(HostEvent::ZoomIn);
        view.emit(HostEvent::ZoomIn);
        session.pump();
        assert_eq!(session.zoom_factor(), 1.5);
        assert_eq!(session.preview().size, Size::new(375, 375));

        view.emit(HostEvent::PointerLeft);
        session.pump();
        assert_eq!(session.zoom_factor(), 1.0);
    }

    #[test]
    fn click_copies_image_and_restores_feedback() {
        let view = FakeView::new(SQUARE);
        let clipboard = RecordingClipboard::default();
        let (queue, _rasterizer, session) = open(&view, fast_options());
        let mut session = session.with_clipboard(Box::new(clipboard.clone()));
        assert!(queue.run_until(WAIT, || session.preview().is_visible()));

        view.emit(HostEvent::Clicked);
        session.pump();
        assert_eq!(clipboard.images(), vec![Size::new(250, 250)]);
        assert_eq!(session.preview().opacity, COPY_FEEDBACK_OPACITY);
        assert_eq!(session.preview().tooltip.as_deref(), Some(COPIED_TOOLTIP));

        assert!(queue.run_until(WAIT, || session.preview().opacity == 1.0));
    }

    #[test]
    fn click_on_error_copies_message() {
        let view = FakeView::new("<svg><rect></svg>");
        let clipboard = RecordingClipboard::default();
        let (queue, _rasterizer, session) = open(&view, fast_options());
        let mut session = session.with_clipboard(Box::new(clipboard.clone()));
        assert!(queue.run_until(WAIT, || session.preview().content
            == PreviewContent::ErrorIndicator));

        session.handle(HostEvent::Clicked);
        let texts = clipboard.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("parse error"));
    }

    #[test]
    fn close_releases_subscriptions_and_hides() {
        let view = FakeView::new(SQUARE);
        let surface = RecordingSurface::default();
        let (queue, _rasterizer, mut session) = open(&view, fast_options());
        session.set_surface(Box::new(surface.clone()));
        assert!(queue.run_until(WAIT, || session.preview().is_visible()));
        assert_eq!(view.subscriber_count(), 1);

        view.emit(HostEvent::Closed);
        session.pump();

        assert!(session.is_closed());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(view.subscriber_count(), 0);
        assert!(surface.last().is_some_and(|preview| !preview.is_visible()));

        // Later events are ignored
        session.handle(HostEvent::ContentChanged);
        queue.run_for(Duration::from_millis(200));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn dropping_the_session_unsubscribes() {
        let view = FakeView::new(SQUARE);
        let (_queue, _rasterizer, session) = open(&view, fast_options());
        assert_eq!(view.subscriber_count(), 1);
        drop(session);
        assert_eq!(view.subscriber_count(), 0);
    }
}
