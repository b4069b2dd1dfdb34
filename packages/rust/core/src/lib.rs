//! Core share pipeline for woof-rs.
//!
//! This crate ties together payload preparation (single file or tar.gz
//! bundle) and the one-shot download server into the end-to-end `share`
//! workflow.

pub mod payload;
pub mod pipeline;
