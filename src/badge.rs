//! Accessibility status badges.
//!
//! Error counts are bucketed into a [`Severity`] and rendered as a flat,
//! shields-style SVG with the label `accessible`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Label shown on the left half of every badge.
pub const BADGE_LABEL: &str = "accessible";

/// Three-tier bucket derived from an error count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// No errors, or a moderate number (11..=20).
    Yes,
    /// Between 1 and 10 errors.
    Almost,
    /// More than 20 errors.
    No,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Yes => write!(f, "yes"),
            Severity::Almost => write!(f, "almost"),
            Severity::No => write!(f, "no"),
        }
    }
}

/// Classify an error count.
pub fn classify(errors: u64) -> Severity {
    if errors > 20 {
        Severity::No
    } else if errors > 0 && errors <= 10 {
        Severity::Almost
    } else {
        Severity::Yes
    }
}

/// What a badge shows: a classification, or `unknown` when there is no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeStatus {
    Known(Severity),
    Unknown,
}

impl BadgeStatus {
    pub fn from_errors(errors: Option<u64>) -> Self {
        match errors {
            Some(errors) => BadgeStatus::Known(classify(errors)),
            None => BadgeStatus::Unknown,
        }
    }

    pub fn message(&self) -> String {
        match self {
            BadgeStatus::Known(severity) => severity.to_string(),
            BadgeStatus::Unknown => "unknown".to_string(),
        }
    }

    /// Fill color: brightgreen, yellow, red or lightgrey.
    pub fn color_hex(&self) -> &'static str {
        match self {
            BadgeStatus::Known(Severity::Yes) => "#4c1",
            BadgeStatus::Known(Severity::Almost) => "#dfb317",
            BadgeStatus::Known(Severity::No) => "#e05d44",
            BadgeStatus::Unknown => "#9f9f9f",
        }
    }
}

// Verdana 11px averages close to 7px per glyph; pad 10px on each side.
fn text_width(text: &str) -> usize {
    text.chars().count() * 7 + 10
}

/// Render a flat badge as SVG.
pub fn render_svg(status: BadgeStatus) -> String {
    let message = status.message();
    let color = status.color_hex();
    let label_width = text_width(BADGE_LABEL);
    let message_width = text_width(&message);
    let width = label_width + message_width;
    let label_x = label_width / 2;
    let message_x = label_width + message_width / 2;

    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="20" role="img" aria-label="{label}: {message}">
<title>{label}: {message}</title>
<linearGradient id="s" x2="0" y2="100%"><stop offset="0" stop-color="#bbb" stop-opacity=".1"/><stop offset="1" stop-opacity=".1"/></linearGradient>
<clipPath id="r"><rect width="{width}" height="20" rx="3" fill="#fff"/></clipPath>
<g clip-path="url(#r)"><rect width="{label_width}" height="20" fill="#555"/><rect x="{label_width}" width="{message_width}" height="20" fill="{color}"/><rect width="{width}" height="20" fill="url(#s)"/></g>
<g fill="#fff" text-anchor="middle" font-family="Verdana,Geneva,DejaVu Sans,sans-serif" font-size="11"><text x="{label_x}" y="15" fill="#010101" fill-opacity=".3">{label}</text><text x="{label_x}" y="14">{label}</text><text x="{message_x}" y="15" fill="#010101" fill-opacity=".3">{message}</text><text x="{message_x}" y="14">{message}</text></g>
</svg>"##,
        label = BADGE_LABEL,
    )
}
