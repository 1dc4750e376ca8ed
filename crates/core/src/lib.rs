//! Shared data model for the NiFi test harness.
//!
//! Holds the canvas handle types, the [`Message`](message::Message)
//! exchanged with a flow under test, and the layout cursor used when
//! placing scaffold components. Zero internal deps so both the REST
//! binding and the harness can use it.

pub mod canvas;
pub mod error;
pub mod location;
pub mod message;
pub mod types;
