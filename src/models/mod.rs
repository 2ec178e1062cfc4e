//! Musical primitives: pitch, duration, position, meter map

pub mod duration;
pub mod pitch;
pub mod position;

pub use duration::Duration;
pub use pitch::Pitch;
pub use position::{MeterEntry, MeterMap, Position, PositionError};
