//! Core engine for a local-LLM page assistant.
//!
//! The UI shell (sidebar, options forms, page DOM) lives elsewhere and
//! talks to this crate over three seams: it submits turns and receives
//! [`types::UiEvent`]s from the [`orchestrator`], answers page-extraction
//! requests through [`tools::PageBridge`], and walks the [`render`] output
//! tree to display assistant replies.

pub mod client;
pub mod config;
pub mod orchestrator;
pub mod render;
pub mod store;
pub mod tools;
pub mod types;
pub mod utils;
