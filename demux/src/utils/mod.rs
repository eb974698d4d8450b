//! Utility functions and supporting infrastructure.
//!
//! Provides bitstream I/O, CRC validation, codec configuration parsing and
//! error handling shared by the extractors.

pub mod bitstream_io;
pub mod codec;
pub mod crc;
pub mod errors;
