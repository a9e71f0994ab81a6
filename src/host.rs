//! Host-side collaborators: document text, viewport, events

use flume::Sender;
use log::debug;

use crate::geometry::Viewport;
use crate::options::{OptionField, Options};

/// Notifications a host delivers to a session
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    ContentChanged,
    ViewportWidthChanged,
    ViewportHeightChanged,
    OptionsChanged {
        options: Options,
        field: OptionField,
    },
    ZoomIn,
    ZoomOut,
    PointerLeft,
    /// Click on the preview image
    Clicked,
    Closed,
}

/// Channel end handed to the host when subscribing
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: Sender<HostEvent>,
}

impl EventSink {
    #[must_use]
    pub fn new(tx: Sender<HostEvent>) -> Self {
        Self { tx }
    }

    /// Deliver an event. Returns false once the session is gone.
    pub fn send(&self, event: HostEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Releases a host subscription when dropped
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Text of the open document.
///
/// Called from render worker threads.
pub trait DocumentSource: Send + Sync {
    fn current_text(&self) -> String;
}

/// An open editor view as seen by a session
pub trait HostView: DocumentSource {
    fn viewport(&self) -> Viewport;

    /// Content type of the open document, e.g. `svg`, `xml`, `html`
    fn content_type(&self) -> &str;

    /// Register `sink` for every [`HostEvent`] this view emits
    fn subscribe(&self, sink: EventSink) -> Vec<Subscription>;
}

/// Whether a view of this content type gets a preview session
#[must_use]
pub fn is_previewable(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    let accepted = matches!(content_type.as_str(), "svg" | "xml" | "html" | "image/svg+xml");
    if !accepted {
        debug!("No preview for content type '{content_type}'");
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscription_releases_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let r = released.clone();
        let sub = Subscription::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_release_does_not_double_release() {
        let released = Arc::new(AtomicUsize::new(0));
        let r = released.clone();
        Subscription::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .release();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sink_reports_closed_receiver() {
        let (tx, rx) = flume::unbounded();
        let sink = EventSink::new(tx);
        assert!(sink.send(HostEvent::ContentChanged));
        drop(rx);
        assert!(!sink.send(HostEvent::ContentChanged));
    }

    #[test]
    fn content_type_recognition() {
        assert!(is_previewable("svg"));
        assert!(is_previewable("XML"));
        assert!(is_previewable("image/svg+xml"));
        assert!(!is_previewable("rust"));
    }
}
