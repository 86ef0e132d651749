//! Type records (the TPI and IPI streams).
//!
//! The wire format for CodeView type records is defined in `ms_codeview::types`; this module
//! re-exports it so that callers can write `crate::types::...` within this crate.

pub use ms_codeview::types::*;

pub mod fields {
    //! Decodes items in a `LF_FIELDLIST` complex list.
    pub use ms_codeview::types::fields::*;
}

pub mod number {
    //! Variable-length numeric leaves.
    pub use ms_codeview::types::number::*;
}

pub mod primitive {
    //! Primitive type indexes.
    pub use ms_codeview::types::primitive::*;
}

pub mod visitor {
    //! Type-index visitation.
    pub use ms_codeview::types::visitor::*;
}
