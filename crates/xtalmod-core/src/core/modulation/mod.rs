//! # Modulation Module
//!
//! The algorithmic core: reconstruction of occupational, displacive, and
//! thermal-displacement modulation waves for incommensurately modulated
//! structures, including rigid-body molecular fragments whose waves must be
//! re-phased after rotation and translation.
//!
//! - [`wave`] - Structured wave keys and payloads (Fourier, Legendre,
//!   crenel, sawtooth) plus the scalar evaluation helpers
//! - [`engine`] - Wave-vector bookkeeping and per-atom evaluation at an
//!   arbitrary internal phase
//! - [`rigid`] - Rigid-body fragments, rotation building, and the associated
//!   phase corrections

pub mod engine;
pub mod rigid;
pub mod wave;
