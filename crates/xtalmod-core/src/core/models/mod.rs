//! # Core Models Module
//!
//! Fundamental data structures for crystallographic structure reconstruction.
//!
//! ## Key Components
//!
//! - [`cell`] - Unit cell with cached fractional/Cartesian transforms
//! - [`atom`] - Atom records with superspace coordinates, occupancy, and ADPs
//! - [`frame`] - Frame-based structure collection with one-shot finalization

pub mod atom;
pub mod cell;
pub mod frame;
