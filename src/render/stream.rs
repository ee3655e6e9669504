//! Character-streamed node emission.
//!
//! Reproduces a rendered subtree into the live output tree depth-first:
//! elements are cloned attribute-for-attribute as empty shells, text fills
//! in character by character. A rendering event fires every few characters
//! or at a newline, and cancellation is checked at the same points, so an
//! abort lands between batches rather than at the end of the block.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::node::{Element, Node};
use super::RenderEvent;

const BATCH_CHARS: usize = 10;

pub(crate) struct StreamSink<'a> {
    pub events: Option<&'a UnboundedSender<RenderEvent>>,
    pub cancel: Option<&'a CancellationToken>,
}

impl StreamSink<'_> {
    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.map_or(false, |c| c.is_cancelled())
    }

    pub(crate) fn emit(&self, event: RenderEvent) {
        if let Some(tx) = self.events {
            let _ = tx.send(event);
        }
    }
}

/// Append `nodes` under `parent` incrementally. Returns `false` when
/// cancelled part-way; whatever was already emitted stays in place.
pub(crate) fn stream_nodes<'a>(
    parent: &'a mut Element,
    nodes: &'a [Node],
    sink: &'a StreamSink<'a>,
    pending: &'a mut usize,
) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
    Box::pin(async move {
        for node in nodes {
            match node {
                Node::Text(text) => {
                    parent.push(Node::Text(String::new()));
                    let idx = parent.children.len() - 1;
                    for ch in text.chars() {
                        if let Some(Node::Text(buf)) = parent.children.get_mut(idx) {
                            buf.push(ch);
                        }
                        *pending += 1;
                        if *pending >= BATCH_CHARS || ch == '\n' {
                            *pending = 0;
                            sink.emit(RenderEvent::Rendering);
                            tokio::task::yield_now().await;
                            if sink.cancelled() {
                                return false;
                            }
                        }
                    }
                }
                Node::Element(el) => {
                    let mut shell = Element::new(&el.tag);
                    for (name, value) in el.attributes() {
                        shell.set_attr(name, value);
                    }
                    parent.push_element(shell);
                    let idx = parent.children.len() - 1;
                    let Some(Node::Element(child)) = parent.children.get_mut(idx) else {
                        return false;
                    };
                    if !stream_nodes(child, &el.children, sink, pending).await {
                        return false;
                    }
                }
            }
        }
        true
    })
}
