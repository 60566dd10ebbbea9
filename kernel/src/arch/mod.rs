//! Architecture support
//!
//! Only MIPS is supported. Hosted builds (unit tests) compile the same
//! interfaces against a simulated machine; see the submodules for the split.

pub mod mips;
