//! NiFi canvas client.
//!
//! Defines the [`Canvas`](canvas::Canvas) collaborator trait the harness
//! drives, plus [`NifiApi`](api::NifiApi), a REST implementation of it
//! on top of [`reqwest`] for a live NiFi instance.

pub mod api;
pub mod canvas;
pub mod config;
pub mod dto;

pub use api::NifiApi;
pub use canvas::{Canvas, CanvasError};
pub use config::{ConfigError, NifiConfig};
