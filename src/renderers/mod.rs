//! Export backends reading Song-IR
//!
//! Every backend consumes the Song-IR and nothing earlier in the
//! pipeline; SMF is the one shipped here.

pub mod midi;
