//! Test harness for Apache NiFi flows.
//!
//! A [`TestCase`](test_case::TestCase) temporarily rewires a process
//! group so that one HTTP request can be injected at a declared input
//! and the result captured at a declared output. The scaffold is torn
//! down and the original connections restored on every exit path.
//!
//! [`CanvasNavigator`](navigator::CanvasNavigator) locates the
//! components to test by path, much like `cd` and `ls`.

pub mod error;
pub mod navigator;
pub mod probe;
pub mod scaffold;
pub mod session;
pub mod test_case;

pub use error::HarnessError;
pub use navigator::CanvasNavigator;
pub use scaffold::OutputMode;
pub use test_case::{ConnectionPolicy, TestCase};
