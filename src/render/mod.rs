//! Markdown streaming renderer.
//!
//! Parses a complete (or still-growing) text buffer into typed blocks and
//! renders them into an [`Element`] tree, optionally animating text
//! character by character with cooperative cancellation. Progress is
//! signalled only through [`RenderEvent`]s and the root's `data-status`
//! attribute; there is no return value describing what was rendered beyond
//! completed-vs-aborted.

mod blocks;
mod inline;
pub mod node;
mod stream;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use blocks::{normalize, render_block, segment};
use stream::{stream_nodes, StreamSink};

pub use node::{Element, Node};

/// Milestones dispatched while rendering. The shell uses these for
/// auto-scroll and abort-button wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderEvent {
    Started,
    Rendering,
    Complete,
    Aborted,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Add a copy affordance to fenced code blocks.
    pub code_copy: bool,
    /// Emit text character by character instead of whole nodes.
    pub stream_reply: bool,
    /// Cooperative cancellation, checked between streaming batches.
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Completed,
    Aborted,
}

/// Render `text` into `root`.
///
/// The root's `data-status` attribute progresses `parsing` → `rendering` →
/// `renderCompleted` and is then cleared. Aborting leaves already-rendered
/// output in place and fires [`RenderEvent::Aborted`]; it is an outcome,
/// not an error.
pub async fn render(
    text: &str,
    root: &mut Element,
    options: &RenderOptions,
    events: Option<&UnboundedSender<RenderEvent>>,
) -> RenderOutcome {
    let sink = StreamSink {
        events,
        cancel: options.cancel.as_ref(),
    };

    root.set_attr("data-status", "parsing");
    sink.emit(RenderEvent::Started);

    let blocks = segment(&normalize(text));
    debug!(blocks = blocks.len(), streaming = options.stream_reply, "Rendering markdown");

    root.set_attr("data-status", "rendering");

    let mut pending = 0usize;
    for block in &blocks {
        let Some(nodes) = render_block(block, options.code_copy) else {
            // Malformed block (e.g. a one-line table): silently skipped.
            continue;
        };

        for node in &nodes {
            if is_open_details(node) {
                close_open_details(root);
            }
        }

        if options.stream_reply {
            if !stream_nodes(root, &nodes, &sink, &mut pending).await {
                root.remove_attr("data-status");
                sink.emit(RenderEvent::Aborted);
                return RenderOutcome::Aborted;
            }
        } else {
            if sink.cancelled() {
                root.remove_attr("data-status");
                sink.emit(RenderEvent::Aborted);
                return RenderOutcome::Aborted;
            }
            root.children.extend(nodes);
            sink.emit(RenderEvent::Rendering);
        }
    }

    root.set_attr("data-status", "renderCompleted");
    sink.emit(RenderEvent::Complete);
    root.remove_attr("data-status");
    RenderOutcome::Completed
}

fn is_open_details(node: &Node) -> bool {
    node.as_element()
        .map_or(false, |el| el.tag == "details" && el.attr("open").is_some())
}

/// Keep the "thinking" panel singular: opening a new details closes any
/// previously open one in the root.
fn close_open_details(root: &mut Element) {
    for child in &mut root.children {
        if let Node::Element(el) = child {
            if el.tag == "details" {
                el.remove_attr("open");
            }
        }
    }
}
