//! # Symmetry Module
//!
//! Parsing and application of crystallographic symmetry operators, in three
//! dimensions or in (3 + d)-dimensional superspace for modulated structures.
//!
//! - [`operator`] - A single affine operator parsed from Jones-faithful text
//! - [`engine`] - The operator set: centering, expansion, site multiplicity

pub mod engine;
pub mod operator;
