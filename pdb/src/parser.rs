//! Byte-cursor parsing utilities.
//!
//! The wire format parser is defined in `ms_codeview::parser`; this module re-exports it so
//! that callers can write `crate::parser::...` within this crate.

pub use ms_codeview::parser::*;
