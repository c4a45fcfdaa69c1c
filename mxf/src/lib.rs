//! SMPTE ST 377 MXF file generation: partitions, structural metadata,
//! indexed essence body, and the muxer that strings them together.
//!
//! The per-codec essence element writers are external; they register
//! themselves through [writer::register] and the muxer resolves one per
//! sink pad. Everything on-disk is KLV coded: 16-byte SMPTE universal
//! label, BER length, value.

pub mod index;
pub mod metadata;
pub mod mux;
pub mod partition;
pub mod types;
pub mod writer;

pub use mux::{MuxOutput, MxfMux, SeekableBuffer};
pub use types::{Ul, Umid, Uuid};
