//! Inline span rendering: backtick code, bold, italic, strikethrough.
//!
//! A single-pass regex substitution, not a full inline parser. Known
//! limitation: no escaping and no nested-emphasis disambiguation; emphasis
//! markers inside code spans win or lose on pattern order alone. Code spans
//! are matched first so their contents are never re-styled.

use once_cell::sync::Lazy;
use regex::Regex;

use super::node::{Element, Node};

struct InlinePattern {
    regex: &'static Lazy<Regex>,
    tag: &'static str,
}

static CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+)`").unwrap());
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*\n]+)\*\*|__([^_\n]+)__").unwrap());
static STRIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~([^~\n]+)~~").unwrap());
static ITALIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*([^*\n]+)\*|_([^_\n]+)_").unwrap());

// Order matters: code first (opaque contents), double markers before single.
const PATTERNS: [InlinePattern; 4] = [
    InlinePattern { regex: &CODE, tag: "code" },
    InlinePattern { regex: &BOLD, tag: "strong" },
    InlinePattern { regex: &STRIKE, tag: "del" },
    InlinePattern { regex: &ITALIC, tag: "em" },
];

/// Render a line of text into a flat list of text and span nodes.
pub(crate) fn render_inline(text: &str) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        // Earliest match across all patterns wins; ties go to pattern order.
        let mut best: Option<(usize, usize, &'static str, String)> = None;
        for pattern in &PATTERNS {
            if let Some(captures) = pattern.regex.captures(rest) {
                let whole = captures.get(0).unwrap();
                let inner = captures
                    .iter()
                    .skip(1)
                    .flatten()
                    .next()
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                let candidate = (whole.start(), whole.end(), pattern.tag, inner);
                if best.as_ref().map_or(true, |b| candidate.0 < b.0) {
                    best = Some(candidate);
                }
            }
        }

        match best {
            Some((start, end, tag, inner)) => {
                if start > 0 {
                    nodes.push(Node::text(&rest[..start]));
                }
                nodes.push(Node::Element(Element::new(tag).with_text(inner)));
                rest = &rest[end..];
            }
            None => {
                nodes.push(Node::text(rest));
                break;
            }
        }
    }

    nodes
}
