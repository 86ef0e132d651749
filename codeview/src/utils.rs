//! Misc utilities

pub mod iter;
