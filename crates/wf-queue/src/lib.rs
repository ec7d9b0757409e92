//! wf-queue: conversion tasks and the queue manager that runs them.
//!
//! [`QueueManager`] owns every [`ConversionTask`]; callers get read-only
//! [`TaskSnapshot`]s, a drain of terminal [`ConversionResult`]s and the
//! event stream from [`QueueManager::subscribe`].

pub mod manager;
pub mod result;
pub mod task;

pub use manager::{CancelOutcome, CancelSummary, QueueManager, QueueStats, ADAPTER_UNAVAILABLE};
pub use result::{ConversionResult, Outcome, ResultRecord};
pub use task::{ConversionTask, ProgressUpdate, TaskSnapshot, TaskState, TaskStatus};
