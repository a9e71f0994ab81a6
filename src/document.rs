//! SVG document inspection: precondition, parse, root check, intrinsic size

use roxmltree::{Document, Node, ParsingOptions};

use crate::error::PreviewFault;
use crate::geometry::SourceSize;

pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

/// Side length used when neither attributes nor a viewBox give a size
pub const DEFAULT_SIDE_PX: f32 = 300.0;

/// Cheap check run before any parsing
#[must_use]
pub fn looks_like_svg(content: &str) -> bool {
    content.contains("<svg")
}

/// Where an intrinsic dimension came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionSource {
    Attribute,
    ViewBox,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub px: f32,
    pub source: DimensionSource,
    /// Human-readable value shown in the preview tooltip
    pub label: String,
}

impl Dimension {
    fn attribute(px: f32, raw: &str, unit: &str) -> Self {
        let label = if unit.is_empty() || unit == "px" {
            format!("{}px", format_px(px))
        } else {
            raw.trim().to_string()
        };
        Self {
            px,
            source: DimensionSource::Attribute,
            label,
        }
    }

    fn view_box(px: f32) -> Self {
        Self {
            px,
            source: DimensionSource::ViewBox,
            label: format!("{}px (from viewBox)", format_px(px)),
        }
    }

    fn fallback() -> Self {
        Self {
            px: DEFAULT_SIDE_PX,
            source: DimensionSource::Default,
            label: format!("{}px (default)", format_px(DEFAULT_SIDE_PX)),
        }
    }
}

/// A well-formed document with an `<svg>` root
#[derive(Debug, Clone)]
pub struct SvgDocument {
    markup: String,
    pub width: Dimension,
    pub height: Dimension,
}

impl SvgDocument {
    /// Parse and validate `content`
    pub fn parse(content: &str) -> Result<Self, PreviewFault> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(content, options)?;
        let root = doc.root_element();

        let tag = root.tag_name();
        let namespace = tag.namespace();
        if tag.name() != "svg" || namespace.is_some_and(|ns| ns != SVG_NAMESPACE) {
            let found = match namespace {
                Some(ns) if ns != SVG_NAMESPACE => format!("{{{ns}}}{}", tag.name()),
                _ => tag.name().to_string(),
            };
            return Err(PreviewFault::Schema { found });
        }

        let view_box = root.attribute("viewBox").and_then(parse_view_box);
        let width = resolve_dimension(&root, "width", view_box.map(|(w, _)| w));
        let height = resolve_dimension(&root, "height", view_box.map(|(_, h)| h));

        // Renderers ignore un-namespaced roots; editors often omit xmlns.
        let markup = if namespace.is_none() {
            let insert_at = root.range().start + "<svg".len();
            let mut markup = String::with_capacity(content.len() + SVG_NAMESPACE.len() + 10);
            markup.push_str(&content[..insert_at]);
            markup.push_str(&format!(" xmlns=\"{SVG_NAMESPACE}\""));
            markup.push_str(&content[insert_at..]);
            markup
        } else {
            content.to_string()
        };

        Ok(Self {
            markup,
            width,
            height,
        })
    }

    /// Markup handed to the rasterizer, always in the SVG namespace
    #[must_use]
    pub fn markup(&self) -> &str {
        &self.markup
    }

    #[must_use]
    pub fn source_size(&self) -> SourceSize {
        SourceSize::new(self.width.px, self.height.px)
    }
}

fn resolve_dimension(root: &Node, name: &str, from_view_box: Option<f32>) -> Dimension {
    if let Some(raw) = root.attribute(name) {
        if let Some((px, unit)) = parse_length(raw) {
            return Dimension::attribute(px, raw, unit);
        }
    }
    match from_view_box {
        Some(px) => Dimension::view_box(px),
        None => Dimension::fallback(),
    }
}

/// Parse an absolute SVG length into CSS pixels.
///
/// Percentages, unknown units and non-positive values yield `None`.
fn parse_length(raw: &str) -> Option<(f32, &str)> {
    let raw = raw.trim();
    let (number, unit) = raw.split_at(numeric_prefix_len(raw));
    let value: f32 = number.parse().ok()?;
    let unit = unit.trim();

    let px_per_unit = match unit {
        "" | "px" => 1.0,
        "pt" => 4.0 / 3.0,
        "pc" => 16.0,
        "in" => 96.0,
        "cm" => 96.0 / 2.54,
        "mm" => 96.0 / 25.4,
        "em" => 16.0,
        "ex" => 8.0,
        _ => return None,
    };

    let px = value * px_per_unit;
    (px.is_finite() && px > 0.0).then_some((px, unit))
}

/// Length of the leading `[sign] digits [. digits] [e [sign] digits]` run
fn numeric_prefix_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    end = digits_from(end);
    if bytes.get(end) == Some(&b'.') {
        end = digits_from(end + 1);
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        if bytes.get(exp).is_some_and(u8::is_ascii_digit) {
            end = digits_from(exp);
        }
    }
    end
}

fn parse_view_box(raw: &str) -> Option<(f32, f32)> {
    let parts: Vec<f32> = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;

    match parts.as_slice() {
        [_, _, w, h] if *w > 0.0 && *h > 0.0 => Some((*w, *h)),
        _ => None,
    }
}

fn format_px(px: f32) -> String {
    if px.fract() == 0.0 {
        format!("{px:.0}")
    } else {
        let s = format!("{px:.2}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
