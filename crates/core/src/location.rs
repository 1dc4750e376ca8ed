//! Layout cursor for placing components on the canvas.
//!
//! Placement is purely visual; NiFi does not care where a component
//! sits. The scaffold builder advances a [`Location`] as it creates
//! components so the resulting diagram stays readable.

use serde::{Deserialize, Serialize};

/// Vertical distance between consecutive rows of components.
pub const ROW_HEIGHT: f64 = 200.0;

/// Horizontal distance between sibling branches.
pub const COLUMN_WIDTH: f64 = 400.0;

/// Offset applied to ports so they line up with processor centres.
pub const PORT_OFFSET_X: f64 = 50.0;

/// A 2D position on the canvas, serialized the way NiFi's
/// `PositionDTO` expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

impl Location {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Move the cursor down by `dy` pixels.
    pub fn advance_down(&mut self, dy: f64) {
        self.y += dy;
    }

    /// Move the cursor right by `dx` pixels.
    pub fn advance_right(&mut self, dx: f64) {
        self.x += dx;
    }

    /// Move down one row.
    pub fn next_row(&mut self) {
        self.advance_down(ROW_HEIGHT);
    }

    /// Move right one column.
    pub fn next_column(&mut self) {
        self.advance_right(COLUMN_WIDTH);
    }

    /// A copy of this location nudged right by `dx`, leaving the cursor
    /// itself untouched.
    pub fn offset_x(&self, dx: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y,
        }
    }
}
