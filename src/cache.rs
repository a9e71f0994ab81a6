//! Content fingerprinting and last-render memo

use crate::geometry::Size;

/// Equality-only digest of document content
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    digest: [u8; 16],
    len: usize,
}

impl Fingerprint {
    /// Digest of the bytes combined with their length
    #[must_use]
    pub fn of(content: &str) -> Self {
        Self {
            digest: md5::compute(content.as_bytes()).0,
            len: content.len(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.digest[..6] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "/{}", self.len)
    }
}

/// Key of the last successful render
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    /// Preview envelope option the render was produced for
    pub preview_size: u32,
}

/// Single-entry memo owned by one session
#[derive(Debug, Default)]
pub struct RenderCache {
    last: Option<(CacheEntry, Size)>,
}

impl RenderCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True only when both the content and the preview size match the last success
    #[must_use]
    pub fn should_skip(&self, fingerprint: &Fingerprint, preview_size: u32) -> bool {
        self.last.as_ref().is_some_and(|(entry, _)| {
            entry.fingerprint == *fingerprint && entry.preview_size == preview_size
        })
    }

    /// Store a successful render. Failed renders must never be recorded.
    pub fn record(&mut self, fingerprint: Fingerprint, preview_size: u32, rendered: Size) {
        self.last = Some((
            CacheEntry {
                fingerprint,
                preview_size,
            },
            rendered,
        ));
    }

    /// Pixel size of the last successful render
    #[must_use]
    pub fn rendered_size(&self) -> Option<Size> {
        self.last.as_ref().map(|(_, size)| *size)
    }

    #[must_use]
    pub fn entry(&self) -> Option<&CacheEntry> {
        self.last.as_ref().map(|(entry, _)| entry)
    }

    pub fn invalidate(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_order_sensitive() {
        assert_ne!(Fingerprint::of("ab"), Fingerprint::of("ba"));
        assert_eq!(Fingerprint::of("<svg/>"), Fingerprint::of("<svg/>"));
    }

    #[test]
    fn fingerprint_tracks_length() {
        let fp = Fingerprint::of("hello");
        assert_eq!(fp.len(), 5);
        assert!(Fingerprint::of("").is_empty());
    }

    #[test]
    fn empty_cache_never_skips() {
        let cache = RenderCache::new();
        assert!(!cache.should_skip(&Fingerprint::of("<svg/>"), 250));
    }

    #[test]
    fn skip_requires_both_fields() {
        let mut cache = RenderCache::new();
        let fp = Fingerprint::of("<svg/>");
        cache.record(fp, 250, Size::new(250, 250));

        assert!(cache.should_skip(&fp, 250));
        assert!(!cache.should_skip(&fp, 300));
        assert!(!cache.should_skip(&Fingerprint::of("<svg />"), 250));
    }

    #[test]
    fn invalidate_clears_entry() {
        let mut cache = RenderCache::new();
        let fp = Fingerprint::of("x");
        cache.record(fp, 100, Size::new(10, 10));
        assert_eq!(cache.rendered_size(), Some(Size::new(10, 10)));

        cache.invalidate();
        assert!(cache.entry().is_none());
        assert!(!cache.should_skip(&fp, 100));
    }
}
