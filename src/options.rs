//! Preview options and their YAML file
//!
//! Options are plain values. A session receives them at construction and
//! again with every change notification; nothing here is global.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::geometry::Corner;

pub const DEFAULT_PREVIEW_SIZE: u32 = 250;
pub const MIN_PREVIEW_SIZE: u32 = 50;
pub const MAX_PREVIEW_SIZE: u32 = 1000;

pub const DEFAULT_PREVIEW_MARGIN: u32 = 20;
pub const MIN_PREVIEW_MARGIN: u32 = 0;
pub const MAX_PREVIEW_MARGIN: u32 = 100;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const MIN_DEBOUNCE_MS: u64 = 100;
pub const MAX_DEBOUNCE_MS: u64 = 2000;
/// Coalescing window for viewport resize bursts
pub const VIEWPORT_DEBOUNCE_MS: u64 = 50;

pub const DEFAULT_RENDER_TIMEOUT_MS: u64 = 5000;
pub const MIN_RENDER_TIMEOUT_MS: u64 = 500;
pub const MAX_RENDER_TIMEOUT_MS: u64 = 60_000;

const OPTIONS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "svgpeek";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Largest width/height of the preview, in pixels
    #[serde(default = "default_preview_size")]
    pub preview_size: u32,

    #[serde(default)]
    pub preview_position: Corner,

    /// Distance from the viewport edges, in pixels
    #[serde(default = "default_preview_margin")]
    pub preview_margin: u32,

    /// Quiet period after the last edit before rendering
    #[serde(default = "default_debounce_delay_ms")]
    pub debounce_delay_ms: u64,

    #[serde(default = "default_true")]
    pub show_error_indicator: bool,

    #[serde(default = "default_true")]
    pub show_loading_indicator: bool,

    #[serde(default = "default_render_timeout_ms")]
    pub render_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_preview_size() -> u32 {
    DEFAULT_PREVIEW_SIZE
}

fn default_preview_margin() -> u32 {
    DEFAULT_PREVIEW_MARGIN
}

fn default_debounce_delay_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_render_timeout_ms() -> u64 {
    DEFAULT_RENDER_TIMEOUT_MS
}

impl Default for Options {
    fn default() -> Self {
        Self {
            preview_size: DEFAULT_PREVIEW_SIZE,
            preview_position: Corner::default(),
            preview_margin: DEFAULT_PREVIEW_MARGIN,
            debounce_delay_ms: DEFAULT_DEBOUNCE_MS,
            show_error_indicator: true,
            show_loading_indicator: true,
            render_timeout_ms: DEFAULT_RENDER_TIMEOUT_MS,
        }
    }
}

/// Identifies which option changed in a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionField {
    PreviewSize,
    PreviewPosition,
    PreviewMargin,
    DebounceDelay,
    ShowErrorIndicator,
    ShowLoadingIndicator,
    RenderTimeout,
}

impl OptionField {
    pub const ALL: [OptionField; 7] = [
        OptionField::PreviewSize,
        OptionField::PreviewPosition,
        OptionField::PreviewMargin,
        OptionField::DebounceDelay,
        OptionField::ShowErrorIndicator,
        OptionField::ShowLoadingIndicator,
        OptionField::RenderTimeout,
    ];
}

impl Options {
    /// Copy with every numeric field forced into its valid range
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.preview_size = self.preview_size.clamp(MIN_PREVIEW_SIZE, MAX_PREVIEW_SIZE);
        self.preview_margin = self
            .preview_margin
            .clamp(MIN_PREVIEW_MARGIN, MAX_PREVIEW_MARGIN);
        self.debounce_delay_ms = self.debounce_delay_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
        self.render_timeout_ms = self
            .render_timeout_ms
            .clamp(MIN_RENDER_TIMEOUT_MS, MAX_RENDER_TIMEOUT_MS);
        self
    }

    #[must_use]
    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    #[must_use]
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    /// Fields whose values differ between `self` and `other`
    #[must_use]
    pub fn diff(&self, other: &Options) -> Vec<OptionField> {
        OptionField::ALL
            .into_iter()
            .filter(|field| match field {
                OptionField::PreviewSize => self.preview_size != other.preview_size,
                OptionField::PreviewPosition => self.preview_position != other.preview_position,
                OptionField::PreviewMargin => self.preview_margin != other.preview_margin,
                OptionField::DebounceDelay => self.debounce_delay_ms != other.debounce_delay_ms,
                OptionField::ShowErrorIndicator => {
                    self.show_error_indicator != other.show_error_indicator
                }
                OptionField::ShowLoadingIndicator => {
                    self.show_loading_indicator != other.show_loading_indicator
                }
                OptionField::RenderTimeout => self.render_timeout_ms != other.render_timeout_ms,
            })
            .collect()
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let options: Options =
            serde_yaml::from_str(content).context("Failed to parse options YAML")?;
        Ok(options.clamped())
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Options file {path:?} not found, using defaults");
            return Ok(Self::default());
        }
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {path:?}"))?;
        let options = Self::from_yaml(&content).with_context(|| format!("In {path:?}"))?;
        debug!("Loaded options from {path:?}");
        Ok(options)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory {parent:?}"))?;
            }
        }
        let content = serde_yaml::to_string(self).context("Failed to serialize options")?;
        fs::write(path, content).with_context(|| format!("Failed to write {path:?}"))?;
        debug!("Saved options to {path:?}");
        Ok(())
    }
}

/// `<config dir>/svgpeek/config.yaml`
pub fn default_options_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(OPTIONS_FILENAME))
}
