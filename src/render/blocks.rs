//! Block segmentation and block-level rendering.
//!
//! The segmenter is a single pass over lines with one "current open block";
//! each kind has its own close rule (a fence only closes on its closing
//! delimiter, a blockquote on the first line without a `>` prefix, raw HTML
//! on a closing tag). Adjacent raw-HTML blocks are merged afterwards so
//! interleaved markup is not fragmented.

use once_cell::sync::Lazy;
use regex::Regex;

use super::inline::render_inline;
use super::node::{Element, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Fence,
    Think,
    Blockquote,
    List,
    Indented,
    Heading,
    Table,
    Html,
    Hr,
    General,
}

#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub kind: BlockKind,
    pub lines: Vec<String>,
}

impl Block {
    fn new(kind: BlockKind, first_line: &str) -> Self {
        Self {
            kind,
            lines: vec![first_line.to_string()],
        }
    }
}

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.*)$").unwrap());
static HR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(-{3,}|\*{3,}|_{3,})\s*$").unwrap());
static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)(?:[-*+]|\d+[.)])\s+(.*)$").unwrap());
static HTML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*</?[a-zA-Z][a-zA-Z0-9-]*(\s[^>]*)?/?>").unwrap());
static CLOSING_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</[a-zA-Z][a-zA-Z0-9-]*>").unwrap());
static ORDERED_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d+[.)]\s+").unwrap());

fn is_fence_delimiter(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

fn is_table_line(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with('|') || (t.starts_with('+') && t.trim_end().ends_with('+'))
}

fn is_indented(line: &str) -> bool {
    line.starts_with("    ") || line.starts_with('\t')
}

/// The block kind a line would start, used for separator insertion and
/// for closing a paragraph when a block construct follows it directly.
fn block_start_kind(line: &str) -> Option<BlockKind> {
    if is_fence_delimiter(line) {
        Some(BlockKind::Fence)
    } else if line.trim_start().starts_with("<think>") {
        Some(BlockKind::Think)
    } else if HEADING.is_match(line) {
        Some(BlockKind::Heading)
    } else if HR.is_match(line) {
        Some(BlockKind::Hr)
    } else if line.trim_start().starts_with('>') {
        Some(BlockKind::Blockquote)
    } else if is_table_line(line) {
        Some(BlockKind::Table)
    } else if HTML_TAG.is_match(line) {
        Some(BlockKind::Html)
    } else {
        None
    }
}

/// Unify line endings and insert a blank-line separator before a
/// block-starting line that directly follows unrelated content, so adjacent
/// block types cannot merge. Fence interiors are left untouched.
pub(crate) fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out: Vec<String> = Vec::new();
    let mut in_fence = false;

    for line in unified.lines() {
        if in_fence {
            if is_fence_delimiter(line) {
                in_fence = false;
            }
            out.push(line.to_string());
            continue;
        }

        if let Some(kind) = block_start_kind(line) {
            if let Some(prev) = out.last() {
                let prev_kind = block_start_kind(prev);
                if !prev.trim().is_empty() && prev_kind != Some(kind) {
                    out.push(String::new());
                }
            }
            if kind == BlockKind::Fence {
                in_fence = true;
            }
        }
        out.push(line.to_string());
    }

    out.join("\n")
}

/// Split normalized text into typed blocks.
pub(crate) fn segment(text: &str) -> Vec<Block> {
    let lines: Vec<&str> = text.lines().collect();
    let mut blocks: Vec<Block> = Vec::new();
    let mut current: Option<Block> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(block) = current.as_mut() {
            let consumed = match block.kind {
                BlockKind::Fence => {
                    block.lines.push(line.to_string());
                    if is_fence_delimiter(line) {
                        blocks.push(current.take().unwrap());
                    }
                    true
                }
                BlockKind::Think => {
                    block.lines.push(line.to_string());
                    if line.contains("</think>") {
                        blocks.push(current.take().unwrap());
                    }
                    true
                }
                BlockKind::Html => {
                    if line.trim().is_empty() {
                        blocks.push(current.take().unwrap());
                        true
                    } else {
                        block.lines.push(line.to_string());
                        if CLOSING_TAG.is_match(line) {
                            blocks.push(current.take().unwrap());
                        }
                        true
                    }
                }
                BlockKind::Blockquote => {
                    if line.trim_start().starts_with('>') {
                        block.lines.push(line.to_string());
                        true
                    } else {
                        blocks.push(current.take().unwrap());
                        false
                    }
                }
                BlockKind::Table => {
                    if is_table_line(line) {
                        block.lines.push(line.to_string());
                        true
                    } else {
                        blocks.push(current.take().unwrap());
                        false
                    }
                }
                BlockKind::List => {
                    if line.trim().is_empty() {
                        blocks.push(current.take().unwrap());
                        true
                    } else if LIST_ITEM.is_match(line)
                        || line.starts_with(' ')
                        || line.starts_with('\t')
                    {
                        block.lines.push(line.to_string());
                        true
                    } else {
                        blocks.push(current.take().unwrap());
                        false
                    }
                }
                BlockKind::Indented => {
                    if is_indented(line) {
                        block.lines.push(line.to_string());
                        true
                    } else {
                        blocks.push(current.take().unwrap());
                        false
                    }
                }
                BlockKind::General => {
                    if line.trim().is_empty() {
                        blocks.push(current.take().unwrap());
                        true
                    } else if block_start_kind(line).is_some() || LIST_ITEM.is_match(line) {
                        blocks.push(current.take().unwrap());
                        false
                    } else {
                        block.lines.push(line.to_string());
                        true
                    }
                }
                // Single-line kinds never stay open.
                BlockKind::Heading | BlockKind::Hr => unreachable!(),
            };
            if consumed {
                i += 1;
            }
            continue;
        }

        if line.trim().is_empty() {
            i += 1;
            continue;
        }

        match block_start_kind(line) {
            Some(BlockKind::Fence) => current = Some(Block::new(BlockKind::Fence, line)),
            Some(BlockKind::Think) => {
                let block = Block::new(BlockKind::Think, line);
                if line.contains("</think>") {
                    blocks.push(block);
                } else {
                    current = Some(block);
                }
            }
            Some(BlockKind::Heading) => blocks.push(Block::new(BlockKind::Heading, line)),
            Some(BlockKind::Hr) => blocks.push(Block::new(BlockKind::Hr, line)),
            Some(BlockKind::Blockquote) => current = Some(Block::new(BlockKind::Blockquote, line)),
            Some(BlockKind::Table) => current = Some(Block::new(BlockKind::Table, line)),
            Some(BlockKind::Html) => {
                let block = Block::new(BlockKind::Html, line);
                if CLOSING_TAG.is_match(line) {
                    blocks.push(block);
                } else {
                    current = Some(block);
                }
            }
            _ if LIST_ITEM.is_match(line) => current = Some(Block::new(BlockKind::List, line)),
            _ if is_indented(line) => current = Some(Block::new(BlockKind::Indented, line)),
            _ => current = Some(Block::new(BlockKind::General, line)),
        }
        i += 1;
    }

    if let Some(block) = current.take() {
        blocks.push(block);
    }

    merge_html(blocks)
}

/// Collapse runs of consecutive raw-HTML blocks into one.
fn merge_html(blocks: Vec<Block>) -> Vec<Block> {
    let mut merged: Vec<Block> = Vec::new();
    for block in blocks {
        match (merged.last_mut(), block.kind) {
            (Some(prev), BlockKind::Html) if prev.kind == BlockKind::Html => {
                prev.lines.extend(block.lines);
            }
            _ => merged.push(block),
        }
    }
    merged
}

/// Render one block to output nodes. `None` means the block is skipped
/// (e.g. a malformed table with fewer than two lines).
pub(crate) fn render_block(block: &Block, code_copy: bool) -> Option<Vec<Node>> {
    match block.kind {
        BlockKind::Heading => {
            let caps = HEADING.captures(&block.lines[0])?;
            let level = caps.get(1).unwrap().as_str().len();
            let mut heading = Element::new(&format!("h{}", level));
            for node in render_inline(caps.get(2).unwrap().as_str().trim()) {
                heading.push(node);
            }
            Some(vec![Node::Element(heading)])
        }
        BlockKind::Hr => Some(vec![Node::Element(Element::new("hr"))]),
        BlockKind::Fence => Some(vec![Node::Element(render_fence(block, code_copy))]),
        BlockKind::Think => Some(vec![Node::Element(render_think(block))]),
        BlockKind::Blockquote => Some(vec![Node::Element(render_blockquote(&block.lines))]),
        BlockKind::List => Some(vec![Node::Element(render_list(&block.lines))]),
        BlockKind::Indented => {
            let inner: Vec<String> = block
                .lines
                .iter()
                .map(|l| {
                    l.strip_prefix("    ")
                        .or_else(|| l.strip_prefix('\t'))
                        .unwrap_or(l)
                        .to_string()
                })
                .collect();
            let code = Element::new("code").with_text(inner.join("\n"));
            Some(vec![Node::Element(Element::new("pre").with_child(code))])
        }
        BlockKind::Table => render_table(&block.lines).map(|t| vec![Node::Element(t)]),
        BlockKind::Html => {
            let raw = Element::new("raw-html").with_text(block.lines.join("\n"));
            Some(vec![Node::Element(raw)])
        }
        BlockKind::General => {
            let mut p = Element::new("p");
            for (i, line) in block.lines.iter().enumerate() {
                if i > 0 {
                    p.push_element(Element::new("br"));
                }
                for node in render_inline(line) {
                    p.push(node);
                }
            }
            Some(vec![Node::Element(p)])
        }
    }
}

fn render_fence(block: &Block, code_copy: bool) -> Element {
    let opener = block.lines[0].trim_start();
    let language = opener.trim_start_matches(['`', '~']).trim().to_string();

    // Interior: everything between the delimiters.
    let end = if block.lines.len() > 1 && is_fence_delimiter(block.lines.last().unwrap()) {
        block.lines.len() - 1
    } else {
        block.lines.len()
    };
    let body = block.lines[1..end].join("\n");

    let label = if language.is_empty() { "text" } else { &language };
    let mut header = Element::new("div")
        .with_attr("class", "code-header")
        .with_child(
            Element::new("span")
                .with_attr("class", "code-language")
                .with_text(label),
        );
    if code_copy {
        header.push_element(
            Element::new("button")
                .with_attr("class", "copy-code")
                .with_text("Copy"),
        );
    }

    let mut code = Element::new("code").with_text(body);
    if !language.is_empty() {
        code.set_attr("class", &format!("language-{}", language));
    }

    Element::new("div")
        .with_attr("class", "code-block")
        .with_attr("data-language", label)
        .with_child(header)
        .with_child(Element::new("pre").with_child(code))
}

fn render_think(block: &Block) -> Element {
    let joined = block.lines.join("\n");
    let inner = joined
        .trim()
        .trim_start_matches("<think>")
        .trim_end_matches("</think>")
        .trim();

    let mut details = Element::new("details").with_attr("open", "");
    details.push_element(Element::new("summary").with_text("Thinking"));
    let mut p = Element::new("p");
    for (i, line) in inner.lines().enumerate() {
        if i > 0 {
            p.push_element(Element::new("br"));
        }
        for node in render_inline(line) {
            p.push(node);
        }
    }
    details.push_element(p);
    details
}

/// Nested blockquotes by `>` depth: strip one marker level, then recurse on
/// any run of lines that still carries one.
fn render_blockquote(lines: &[String]) -> Element {
    let stripped: Vec<String> = lines
        .iter()
        .map(|l| {
            let t = l.trim_start();
            t.strip_prefix('>')
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
                .unwrap_or(t)
                .to_string()
        })
        .collect();

    let mut quote = Element::new("blockquote");
    let mut run: Vec<String> = Vec::new();
    let mut run_nested = false;

    let flush = |quote: &mut Element, run: &mut Vec<String>, nested: bool| {
        if run.is_empty() {
            return;
        }
        if nested {
            quote.push_element(render_blockquote(run));
        } else {
            let mut p = Element::new("p");
            for (i, line) in run.iter().enumerate() {
                if i > 0 {
                    p.push_element(Element::new("br"));
                }
                for node in render_inline(line) {
                    p.push(node);
                }
            }
            quote.push_element(p);
        }
        run.clear();
    };

    for line in stripped {
        let nested = line.trim_start().starts_with('>');
        if nested != run_nested {
            flush(&mut quote, &mut run, run_nested);
            run_nested = nested;
        }
        run.push(line);
    }
    flush(&mut quote, &mut run, run_nested);
    quote
}

/// Rebuild nesting from indentation: deeper items open a sublist under the
/// previous item.
fn render_list(lines: &[String]) -> Element {
    let mut items: Vec<(usize, bool, String)> = Vec::new();
    for line in lines {
        if let Some(caps) = LIST_ITEM.captures(line) {
            let indent = caps.get(1).unwrap().as_str().replace('\t', "  ").len();
            let ordered = ORDERED_ITEM.is_match(line);
            items.push((indent, ordered, caps.get(2).unwrap().as_str().to_string()));
        } else if let Some(last) = items.last_mut() {
            // Continuation line: folds into the previous item.
            last.2.push(' ');
            last.2.push_str(line.trim());
        }
    }

    if items.is_empty() {
        return Element::new("ul");
    }
    // Seed with the shallowest indent in the block, not the first item's:
    // an item dedented below the opener must land at the top level instead
    // of being dropped when the walk unwinds past it.
    let min_indent = items.iter().map(|(indent, _, _)| *indent).min().unwrap_or(0);
    let mut pos = 0;
    build_list(&items, &mut pos, min_indent)
}

fn build_list(items: &[(usize, bool, String)], pos: &mut usize, indent: usize) -> Element {
    let ordered = items[*pos].1;
    let mut list = Element::new(if ordered { "ol" } else { "ul" });

    while *pos < items.len() {
        let (item_indent, _, ref text) = items[*pos];
        if item_indent < indent {
            break;
        }
        if item_indent > indent {
            let sublist = build_list(items, pos, item_indent);
            match list.children.last_mut().and_then(Node::as_element_mut) {
                Some(li) => li.push_element(sublist),
                None => {
                    let mut li = Element::new("li");
                    li.push_element(sublist);
                    list.push_element(li);
                }
            }
            continue;
        }
        let mut li = Element::new("li");
        for node in render_inline(text) {
            li.push(node);
        }
        list.push_element(li);
        *pos += 1;
    }
    list
}

/// Pipe or `+`-grid tables. Fewer than two lines is malformed: `None`.
fn render_table(lines: &[String]) -> Option<Element> {
    if lines.len() < 2 {
        return None;
    }

    // Grid style: `+---+` separators delimit rows that start with `|`.
    let rows: Vec<&String> = lines
        .iter()
        .filter(|l| l.trim_start().starts_with('|'))
        .collect();
    if rows.is_empty() {
        return None;
    }

    let split_cells = |line: &str| -> Vec<String> {
        line.trim()
            .trim_matches('|')
            .split('|')
            .map(|c| c.trim().to_string())
            .collect()
    };

    let is_separator = |line: &str| {
        let t: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        !t.is_empty() && t.chars().all(|c| matches!(c, '|' | '-' | ':' | '='))
    };

    let header_cells = split_cells(rows[0]);
    let mut header_row = Element::new("tr");
    for cell in &header_cells {
        let mut th = Element::new("th");
        for node in render_inline(cell) {
            th.push(node);
        }
        header_row.push_element(th);
    }
    let thead = Element::new("thead").with_child(header_row);

    let mut tbody = Element::new("tbody");
    for row in rows.iter().skip(1) {
        if is_separator(row) {
            continue;
        }
        let mut tr = Element::new("tr");
        for cell in split_cells(row) {
            let mut td = Element::new("td");
            for node in render_inline(&cell) {
                td.push(node);
            }
            tr.push_element(td);
        }
        tbody.push_element(tr);
    }

    Some(
        Element::new("table")
            .with_child(thead)
            .with_child(tbody),
    )
}
