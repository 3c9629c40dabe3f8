//! Application services: sanitizing, rendering, polls, titles and the
//! document lifecycle built on top of them.

pub mod blobs;
pub mod consistency;
pub mod documents;
pub mod error;
pub mod polls;
pub mod render;
pub mod repos;
pub mod resolve;
pub mod sanitize;
pub mod titles;
