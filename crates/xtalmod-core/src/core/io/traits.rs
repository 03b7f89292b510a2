use crate::core::models::cell::UnitCell;
use crate::core::models::frame::StructureCollection;
use crate::core::modulation::engine::ModulationEngine;
use crate::core::symmetry::engine::SymmetryOperatorEngine;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Mutable state threaded through an import: the engines under
/// construction, the structure collection, and the driver bookkeeping.
///
/// Strategies receive the context explicitly on every call; there is no
/// ambient parser state shared between formats.
#[derive(Debug, Clone)]
pub struct ParserContext {
    /// Structure title, when the format carries one.
    pub title: Option<String>,
    /// Space-group name as written in the source.
    pub space_group: Option<String>,
    /// Modulation dimension d (0 for a conventional structure).
    pub mod_dim: usize,
    /// The unit cell, once its record has been read.
    pub cell: Option<UnitCell>,
    /// Symmetry operators accumulated so far.
    pub symmetry: SymmetryOperatorEngine,
    /// Modulation waves accumulated so far.
    pub modulation: ModulationEngine,
    /// Frames and atoms accumulated so far.
    pub collection: StructureCollection,
    /// Index of the frame currently receiving atoms.
    pub frame: Option<usize>,
    /// Cooperative stop flag; the driver checks it after every line.
    pub continue_parsing: bool,
    /// 1-based number of the line most recently handed to the strategy.
    pub line_number: usize,
}

impl ParserContext {
    /// A fresh context for an unmodulated structure.
    pub fn new() -> Self {
        Self {
            title: None,
            space_group: None,
            mod_dim: 0,
            cell: None,
            symmetry: SymmetryOperatorEngine::new(0),
            modulation: ModulationEngine::new(0),
            collection: StructureCollection::new(),
            frame: None,
            continue_parsing: true,
            line_number: 0,
        }
    }

    /// Switches the context to modulation dimension `d`, rebuilding both
    /// engines. Formats declare d before any operator or wave record, so
    /// nothing accumulated is lost.
    pub fn set_mod_dim(&mut self, d: usize) {
        self.mod_dim = d;
        self.symmetry = SymmetryOperatorEngine::new(d);
        self.modulation = ModulationEngine::new(d);
    }
}

impl Default for ParserContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A line-oriented import strategy for one file format.
///
/// The driver owns the read loop; the strategy sees each line in order and
/// mutates the context. Formats with record state (continuation lines,
/// sub-blocks) keep it in the strategy value itself.
pub trait ImportStrategy {
    /// The strategy's error type.
    type Error: Error + From<io::Error>;

    /// Called once before the first line.
    fn init(&mut self, ctx: &mut ParserContext) -> Result<(), Self::Error>;

    /// Called for every input line while `ctx.continue_parsing` holds.
    fn handle_line(&mut self, line: &str, ctx: &mut ParserContext) -> Result<(), Self::Error>;

    /// Called once after the last line (or after the strategy stopped the
    /// driver), for end-of-input validation and deferred work.
    fn finalize(&mut self, ctx: &mut ParserContext) -> Result<(), Self::Error>;
}

/// Runs a strategy over a reader against an existing context.
///
/// Stops early when the strategy clears `ctx.continue_parsing`, leaving the
/// rest of the reader unconsumed for a follow-up strategy.
///
/// # Errors
///
/// Forwards I/O errors from the reader and the strategy's own errors.
pub fn run_strategy<S: ImportStrategy>(
    strategy: &mut S,
    reader: &mut impl BufRead,
    ctx: &mut ParserContext,
) -> Result<(), S::Error> {
    strategy.init(ctx)?;
    let mut line = String::new();
    while ctx.continue_parsing {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        ctx.line_number += 1;
        strategy.handle_line(line.trim_end_matches(['\r', '\n']), ctx)?;
    }
    strategy.finalize(ctx)
}

/// Runs a default-constructed strategy over a reader with a fresh context.
///
/// # Errors
///
/// See [`run_strategy`].
pub fn read_from<S: ImportStrategy + Default>(
    reader: &mut impl BufRead,
) -> Result<ParserContext, S::Error> {
    let mut ctx = ParserContext::new();
    run_strategy(&mut S::default(), reader, &mut ctx)?;
    Ok(ctx)
}

/// Opens a file and runs a default-constructed strategy over it.
///
/// # Errors
///
/// See [`run_strategy`]; additionally any error opening the file.
pub fn read_from_path<S: ImportStrategy + Default, P: AsRef<Path>>(
    path: P,
) -> Result<ParserContext, S::Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    read_from::<S>(&mut reader)
}
