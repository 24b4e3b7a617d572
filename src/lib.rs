//! CanvasFlow client engine.
//!
//! Holds multiple conversation threads, streams assistant replies
//! incrementally, and manages a long-running four-image generation task
//! that keeps polling after the user switches conversations. Rendering
//! lives behind [`render::RenderSink`]; persistence behind
//! [`storage::Storage`].

pub mod client;
pub mod error;
pub mod generation;
pub mod models;
pub mod render;
pub mod session;
pub mod sse;
pub mod storage;
pub mod store;
pub mod stream;
