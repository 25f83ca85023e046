#![forbid(unsafe_code)]

//! vidgrab: analyze social-media video URLs, then download selected entries
//! through a bounded worker pool with live progress.

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fanout;
pub mod models;
pub mod queue;
pub mod ratelimit;
pub mod registry;
pub mod service;
pub mod urls;

#[cfg(test)]
mod fakes;

pub use error::{Error, Result};
