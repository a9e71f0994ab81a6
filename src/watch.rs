//! File-backed host used by the `svgpeek` binary
//!
//! A [`FileView`] plays the editor: its text is the file on disk and a
//! `notify` watcher turns writes into content-changed events. A
//! [`PngSurface`] writes every newly applied preview next to it.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::geometry::{Viewport, dpi_zoom_percent};
use crate::host::{DocumentSource, EventSink, HostEvent, HostView, Subscription};
use crate::options::Options;
use crate::presenter::{Preview, PreviewContent, PreviewSurface};
use crate::render::Bitmap;

pub struct FileView {
    path: PathBuf,
    viewport: Viewport,
    content_type: String,
}

impl FileView {
    pub fn new(path: impl Into<PathBuf>, viewport: Viewport) -> Self {
        let path = path.into();
        let content_type = content_type_for(&path);
        Self {
            path,
            viewport,
            content_type,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lower-cased file extension, e.g. `svg`
#[must_use]
pub fn content_type_for(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

impl DocumentSource for FileView {
    fn current_text(&self) -> String {
        fs::read_to_string(&self.path).unwrap_or_else(|e| {
            warn!("Failed to read {:?}: {e}", self.path);
            String::new()
        })
    }
}

impl HostView for FileView {
    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn subscribe(&self, sink: EventSink) -> Vec<Subscription> {
        let watched = watch_file(&self.path, move || {
            sink.send(HostEvent::ContentChanged);
        });
        match watched {
            Ok(watcher) => vec![Subscription::new(move || drop(watcher))],
            Err(e) => {
                error!("Cannot watch {:?}: {e}", self.path);
                Vec::new()
            }
        }
    }
}

/// Call `on_change` whenever `path` is created or modified.
///
/// Watches the parent directory so editors that save by replacing the file
/// are still noticed.
pub fn watch_file(
    path: &Path,
    on_change: impl Fn() + Send + 'static,
) -> notify::Result<RecommendedWatcher> {
    let target: Option<OsString> = path.file_name().map(OsString::from);
    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        match res {
            Ok(event) => {
                let relevant = event.kind.is_create() || event.kind.is_modify();
                if relevant
                    && event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == target.as_deref())
                {
                    on_change();
                }
            }
            Err(e) => warn!("Watch error: {e}"),
        }
    })?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Scale the preview envelope by the display zoom for `dpi`
#[must_use]
pub fn scale_for_dpi(options: Options, dpi: f32) -> Options {
    let percent = dpi_zoom_percent(dpi);
    let preview_size = (u64::from(options.preview_size) * u64::from(percent) / 100)
        .min(u64::from(u32::MAX)) as u32;
    Options {
        preview_size,
        ..options
    }
    .clamped()
}

/// Writes each new preview image to `output` and reports to `out`
pub struct PngSurface<W: Write + Send> {
    output: PathBuf,
    out: W,
    written: Option<Bitmap>,
    last_report: Option<String>,
}

impl<W: Write + Send> PngSurface<W> {
    pub fn new(output: impl Into<PathBuf>, out: W) -> Self {
        Self {
            output: output.into(),
            out,
            written: None,
            last_report: None,
        }
    }

    fn write_image(&mut self, bitmap: &Bitmap) -> Option<String> {
        if self.written.as_ref() == Some(bitmap) {
            return None;
        }
        self.written = Some(bitmap.clone());

        match fs::write(&self.output, bitmap.png_bytes()) {
            Ok(()) => {
                let size = bitmap.size();
                info!("Wrote {:?} ({}x{})", self.output, size.width, size.height);
                Some(format!(
                    "Wrote {} ({}x{})",
                    self.output.display(),
                    size.width,
                    size.height
                ))
            }
            Err(e) => {
                error!("Failed to write {:?}: {e}", self.output);
                Some(format!("Failed to write {}: {e}", self.output.display()))
            }
        }
    }

    fn report(&mut self, text: String) {
        if self.last_report.as_deref() == Some(text.as_str()) {
            return;
        }
        if let Err(e) = writeln!(self.out, "{text}") {
            warn!("Failed to print preview report: {e}");
        }
        self.last_report = Some(text);
    }
}

impl<W: Write + Send> PreviewSurface for PngSurface<W> {
    fn present(&mut self, preview: &Preview) {
        let tooltip = preview.tooltip.clone().unwrap_or_default();
        let report = match &preview.content {
            PreviewContent::Image(bitmap) => self
                .write_image(bitmap)
                .map(|written| format!("{written}\n{tooltip}")),
            PreviewContent::ErrorIndicator => Some(format!("Error: {tooltip}")),
            PreviewContent::Nothing if preview.loading => None,
            PreviewContent::Nothing => Some("No preview".to_string()),
        };
        if let Some(report) = report {
            self.report(report);
        }
    }
}
