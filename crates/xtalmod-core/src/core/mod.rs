//! # Core Module
//!
//! The computational core of xtalmod: coordinate frames, symmetry expansion,
//! modulation-wave evaluation, and the importer contract that format readers
//! program against.
//!
//! ## Overview
//!
//! An importer reads lines from a scientific text format, pushes cell
//! parameters into a [`models::cell::UnitCell`], operator strings into a
//! [`symmetry::engine::SymmetryOperatorEngine`], and raw atom records plus
//! modulation coefficients into a [`modulation::engine::ModulationEngine`]
//! and a [`models::frame::StructureCollection`]. A finalization pass then
//! expands symmetry, evaluates every modulation wave at the requested
//! internal phase, and converts all coordinates to Cartesian for display.
//!
//! ## Key Capabilities
//!
//! - **Fractional/Cartesian round trips** with cached transform matrices
//! - **Superspace symmetry** in 3 + d dimensions with deterministic
//!   duplicate-image removal and site multiplicities
//! - **Modulation reconstruction** from Fourier and Legendre series,
//!   crenel and sawtooth occupation windows
//! - **Rigid-body molecular fragments** with proper/improper rotations and
//!   phase re-referencing of cloned modulation waves

pub mod io;
pub mod models;
pub mod modulation;
pub mod symmetry;
