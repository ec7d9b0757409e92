//! webpforge - batch conversion of video clips to animated WebP
//!
//! This library crate exposes the batch runner for integration testing.

pub mod report;
pub mod runner;
