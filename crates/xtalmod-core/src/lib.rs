//! # Xtalmod Core Library
//!
//! A library for turning heterogeneous crystallographic text output into a
//! canonical atomic-structure model, with full support for incommensurately
//! modulated structures.
//!
//! ## Architectural Philosophy
//!
//! The library is a set of small engines composed by dependency injection,
//! with a strict separation between parsing and evaluation:
//!
//! - **[`core::models`]: The Foundation.** Unit cells with cached
//!   fractional/Cartesian transforms, atoms with superspace coordinates, and
//!   the frame-based `StructureCollection` that importers fill and finalize.
//!
//! - **[`core::symmetry`]: Equivalent positions.** Jones-faithful operator
//!   parsing, lattice centering, symmetry expansion, and site multiplicities,
//!   in 3 + d dimensions when modulation is present.
//!
//! - **[`core::modulation`]: The Algorithmic Core.** Wave-vector bookkeeping,
//!   occupational/displacive/thermal modulation waves (Fourier, Legendre,
//!   crenel, sawtooth), evaluation at an arbitrary internal phase, and
//!   rigid-body fragments with rotation-aware phase correction.
//!
//! - **[`core::io`]: The Importer Contract.** A strategy trait with an
//!   explicit parser context, plus the reference JANA M50/M40 importer.
//!
//! All engines are plain values owned by one import session; there is no
//! process-wide state. The pipeline is synchronous and single-threaded.

pub mod core;

pub use nalgebra;
