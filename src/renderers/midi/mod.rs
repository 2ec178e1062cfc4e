//! SMF Format 1 export backend

pub mod vlq;
pub mod writer;

pub use writer::write_smf;
