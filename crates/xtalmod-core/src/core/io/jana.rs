use crate::core::io::traits::{run_strategy, ImportStrategy, ParserContext};
use crate::core::models::atom::Atom;
use crate::core::models::cell::{CellError, UnitCell};
use crate::core::models::frame::StructureError;
use crate::core::modulation::engine::{ModulationError, UnsupportedFeature};
use crate::core::modulation::rigid::{FragmentPosition, RotationConvention, RotationalWave};
use crate::core::modulation::wave::{Axis, AdpComponent, WaveForm, WaveKey, WaveKind};
use crate::core::symmetry::engine::SymmetryError;
use nalgebra::Vector3;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised by the JANA M50/M40 importer.
#[derive(Debug, Error)]
pub enum JanaError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Malformed record content.
    #[error("parse error on line {line}: {kind}")]
    Parse {
        /// 1-based input line number.
        line: usize,
        /// What was wrong with the record.
        kind: JanaParseErrorKind,
    },
    /// A capability the file requests but the importer does not implement.
    #[error("unsupported on line {line}: {feature}")]
    Unsupported {
        /// 1-based input line number.
        line: usize,
        /// The requested capability.
        feature: UnsupportedFeature,
    },
    /// A record required before this point never appeared.
    #[error("missing required record: {0}")]
    MissingRecord(&'static str),
    /// Cell construction failed.
    #[error(transparent)]
    Cell(#[from] CellError),
    /// Symmetry operator parsing or expansion failed.
    #[error(transparent)]
    Symmetry(#[from] SymmetryError),
    /// Modulation cataloging or fragment processing failed.
    #[error(transparent)]
    Modulation(#[from] ModulationError),
    /// Frame assembly failed.
    #[error(transparent)]
    Structure(#[from] StructureError),
}

/// The specific defect inside a [`JanaError::Parse`].
#[derive(Debug, Error)]
pub enum JanaParseErrorKind {
    /// A numeric token that would not parse as a float.
    #[error("invalid float '{value}' in {place}")]
    InvalidFloat {
        /// Which record or field held the token.
        place: &'static str,
        /// The offending text.
        value: String,
    },
    /// A numeric token that would not parse as an integer.
    #[error("invalid integer '{value}' in {place}")]
    InvalidInt {
        /// Which record or field held the token.
        place: &'static str,
        /// The offending text.
        value: String,
    },
    /// A record with fewer tokens than its form requires.
    #[error("record '{0}' is truncated")]
    TruncatedRecord(String),
    /// Input ended while an atom record still expected parameter lines.
    #[error("input ended inside the record for '{0}'")]
    UnterminatedRecord(String),
}

fn column_field(line: &str, start: usize, end: usize) -> &str {
    let end = end.min(line.len());
    if start >= end {
        ""
    } else {
        line.get(start..end).map(str::trim).unwrap_or("")
    }
}

/// The six 9-character float fields every M40 parameter line carries.
/// Unparseable or absent fields are `None`; wave data treats them as zero,
/// record classification branches on them.
fn float_fields(line: &str) -> [Option<f64>; 6] {
    let mut out = [None; 6];
    for (i, slot) in out.iter_mut().enumerate() {
        let text = column_field(line, i * 9, i * 9 + 9);
        *slot = if text.is_empty() { None } else { text.parse().ok() };
    }
    out
}

fn int_field(line: &str, start: usize, end: usize) -> Option<i64> {
    let text = column_field(line, start, end);
    if text.is_empty() {
        None
    } else {
        text.parse().ok()
    }
}

fn count_field(line: &str, start: usize, end: usize) -> usize {
    int_field(line, start, end).unwrap_or(0).max(0) as usize
}

fn flag_field(line: &str, col: usize) -> bool {
    int_field(line, col, col + 1).unwrap_or(0) > 0
}

fn parse_float_token(token: &str, place: &'static str, line: usize) -> Result<f64, JanaError> {
    token.parse().map_err(|_| JanaError::Parse {
        line,
        kind: JanaParseErrorKind::InvalidFloat {
            place,
            value: token.to_string(),
        },
    })
}

/// Per-record modulation bookkeeping shared by atom and position records:
/// the three special-form flags and the occupancy, displacement, and ADP
/// wave counts from the fixed flag columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordCounts {
    /// Crenel occupancy flag (column 60).
    pub special_occ: bool,
    /// Sawtooth displacement flag (column 61).
    pub special_disp: bool,
    /// Special ADP flag (column 62).
    pub special_uij: bool,
    /// Number of occupancy waves.
    pub n_occ: usize,
    /// Number of displacement waves.
    pub n_disp: usize,
    /// Number of ADP waves.
    pub n_uij: usize,
}

impl RecordCounts {
    fn from_line(line: &str) -> Self {
        Self {
            special_occ: flag_field(line, 60),
            special_disp: flag_field(line, 61),
            special_uij: flag_field(line, 62),
            n_occ: count_field(line, 65, 68),
            n_disp: count_field(line, 68, 71),
            n_uij: count_field(line, 71, 74),
        }
    }
}

/// An M40 record-start line, classified at parse time by its shape rather
/// than by sentinel values in the numeric fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRecord {
    /// A free (or molecule-member) atom record.
    Atom {
        /// Atom label from columns 0-9.
        label: String,
        /// Occupancy as stored (divided by site multiplicity).
        occupancy: f64,
        /// Fractional coordinates.
        fractional: Vector3<f64>,
        /// Temperature-parameter type (1 isotropic, 2 anisotropic, 0 TLS).
        t_type: i64,
        /// Wave counts and special-form flags.
        counts: RecordCounts,
    },
    /// A molecule (rigid-body fragment) header.
    FragmentHeader {
        /// Fragment name.
        name: String,
        /// Point-group reference field; anything but "" or "1" is
        /// unsupported.
        point_group: String,
        /// Explicit reference point, when given numerically.
        reference: Option<Vector3<f64>>,
        /// Reference atom label, when the point is given by name.
        ref_atom: Option<String>,
    },
    /// A `pos#` placement record for the preceding fragment.
    Position {
        /// Position name, e.g. "pos#1".
        name: String,
        /// Whether the rotation is improper.
        improper: bool,
        /// Local-coordinate-system type; only 0 (basic) is supported.
        syst_type: i64,
        /// Wave counts and special-form flags.
        counts: RecordCounts,
    },
}

/// Classifies one M40 record-start line.
pub fn classify_record(line: &str) -> ParsedRecord {
    let label = column_field(line, 0, 9).to_string();
    let fields = float_fields(line);
    if label.starts_with("pos#") {
        return ParsedRecord::Position {
            name: label,
            improper: int_field(line, 9, 11) == Some(-1),
            syst_type: int_field(line, 13, 14).unwrap_or(0),
            counts: RecordCounts::from_line(line),
        };
    }
    match fields[2] {
        None => ParsedRecord::FragmentHeader {
            name: label,
            point_group: column_field(line, 12, 18).to_string(),
            reference: match (fields[3], fields[4], fields[5]) {
                (Some(x), Some(y), Some(z)) => Some(Vector3::new(x, y, z)),
                _ => None,
            },
            ref_atom: if fields[4].is_none() {
                let name = column_field(line, 28, 37);
                (!name.is_empty()).then(|| name.to_string())
            } else {
                None
            },
        },
        Some(occupancy) => ParsedRecord::Atom {
            label,
            occupancy,
            fractional: Vector3::new(
                fields[3].unwrap_or(0.0),
                fields[4].unwrap_or(0.0),
                fields[5].unwrap_or(0.0),
            ),
            t_type: int_field(line, 13, 14).unwrap_or(0),
            counts: RecordCounts::from_line(line),
        },
    }
}

/// Strategy for the M50 structure file: cell, dimension, wave vectors,
/// centering, and symmetry operators.
#[derive(Debug, Default)]
pub struct JanaM50Strategy {
    qi_count: u32,
    pending_q: Option<Vector3<f64>>,
}

impl JanaM50Strategy {
    fn handle_record(&mut self, line: &str, ctx: &mut ParserContext) -> Result<(), JanaError> {
        let Some(keyword) = line.get(..3) else {
            return Ok(());
        };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match keyword {
            "tit" => {
                ctx.title = Some(line.get(5..).unwrap_or("").trim().to_string());
            }
            "cel" => {
                if tokens.len() < 7 {
                    return Err(JanaError::Parse {
                        line: ctx.line_number,
                        kind: JanaParseErrorKind::TruncatedRecord("cell".to_string()),
                    });
                }
                let mut p = [0.0; 6];
                for (slot, token) in p.iter_mut().zip(&tokens[1..7]) {
                    *slot = parse_float_token(token, "cell", ctx.line_number)?;
                }
                let cell = UnitCell::from_parameters(p[0], p[1], p[2], p[3], p[4], p[5])?;
                debug!(a = p[0], b = p[1], c = p[2], "cell record");
                ctx.frame = Some(ctx.collection.new_frame(cell.clone()));
                ctx.cell = Some(cell);
            }
            "ndi" => {
                let token = tokens.get(1).copied().unwrap_or("");
                let n: i64 = token.parse().map_err(|_| JanaError::Parse {
                    line: ctx.line_number,
                    kind: JanaParseErrorKind::InvalidInt {
                        place: "ndim",
                        value: token.to_string(),
                    },
                })?;
                if n < 3 {
                    return Err(JanaError::Parse {
                        line: ctx.line_number,
                        kind: JanaParseErrorKind::InvalidInt {
                            place: "ndim",
                            value: token.to_string(),
                        },
                    });
                }
                if let Some(pos) = tokens.iter().position(|t| *t == "ncomp") {
                    let ncomp: i64 = tokens
                        .get(pos + 1)
                        .and_then(|t| t.parse().ok())
                        .unwrap_or(1);
                    if ncomp > 1 {
                        return Err(JanaError::Unsupported {
                            line: ctx.line_number,
                            feature: UnsupportedFeature::CompositeSubsystem,
                        });
                    }
                }
                debug!(ndim = n, "superspace dimension");
                ctx.set_mod_dim((n - 3) as usize);
            }
            "qi " => {
                if tokens.len() < 4 {
                    return Err(JanaError::Parse {
                        line: ctx.line_number,
                        kind: JanaParseErrorKind::TruncatedRecord("qi".to_string()),
                    });
                }
                let q = Vector3::new(
                    parse_float_token(tokens[1], "qi", ctx.line_number)?,
                    parse_float_token(tokens[2], "qi", ctx.line_number)?,
                    parse_float_token(tokens[3], "qi", ctx.line_number)?,
                );
                self.qi_count += 1;
                // the rational part arrives on the following qr record
                self.pending_q = Some(q);
            }
            "lat" => {
                let letter = tokens
                    .get(1)
                    .and_then(|t| t.chars().next())
                    .ok_or_else(|| JanaError::Parse {
                        line: ctx.line_number,
                        kind: JanaParseErrorKind::TruncatedRecord("lattice".to_string()),
                    })?;
                ctx.symmetry.add_lattice_centering(letter)?;
            }
            "sym" => {
                let jones = tokens[1..].join(",");
                ctx.symmetry.add_operator(&jones)?;
            }
            "spg" => {
                ctx.space_group = tokens.get(1).map(|t| t.to_string());
            }
            "end" => {
                ctx.continue_parsing = false;
            }
            "wma" => {
                return Err(JanaError::Unsupported {
                    line: ctx.line_number,
                    feature: UnsupportedFeature::CompositeSubsystem,
                });
            }
            _ => {
                debug!(line, "skipping unrecognized M50 record");
            }
        }
        Ok(())
    }
}

impl ImportStrategy for JanaM50Strategy {
    type Error = JanaError;

    fn init(&mut self, _ctx: &mut ParserContext) -> Result<(), JanaError> {
        Ok(())
    }

    fn handle_line(&mut self, line: &str, ctx: &mut ParserContext) -> Result<(), JanaError> {
        if let Some(q) = self.pending_q.take() {
            if line.starts_with("qr") {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                let mut q = q;
                for (i, token) in tokens.iter().skip(1).take(3).enumerate() {
                    q[i] += parse_float_token(token, "qr", ctx.line_number)?;
                }
                ctx.modulation.add_wave_vector(self.qi_count, q);
                return Ok(());
            }
            ctx.modulation.add_wave_vector(self.qi_count, q);
        }
        if line.len() < 3 {
            return Ok(());
        }
        self.handle_record(line, ctx)
    }

    fn finalize(&mut self, ctx: &mut ParserContext) -> Result<(), JanaError> {
        if let Some(q) = self.pending_q.take() {
            ctx.modulation.add_wave_vector(self.qi_count, q);
        }
        if ctx.cell.is_none() {
            return Err(JanaError::MissingRecord("cell"));
        }
        info!(
            operators = ctx.symmetry.operators().len(),
            mod_dim = ctx.mod_dim,
            space_group = ctx.space_group.as_deref().unwrap_or("?"),
            "M50 read"
        );
        Ok(())
    }
}

#[derive(Debug)]
enum RecordKind {
    FreeAtom {
        atom: Atom,
        t_type: i64,
    },
    Position {
        improper: bool,
        angles_deg: [f64; 3],
        translation: Vector3<f64>,
        rotations: Vec<RotationalWave>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RecordPhase {
    PreAdpSkip,
    Adp,
    PostAdpSkip(usize),
    OccBase,
    OccWave(usize),
    CrenelCenter { index: usize, width: f64 },
    DispWave(usize),
    RotData(usize),
    AdpWaveFirst(usize),
    AdpWaveSecond(usize),
    Done,
}

#[derive(Debug)]
struct ActiveRecord {
    label: String,
    kind: RecordKind,
    counts: RecordCounts,
    phase: RecordPhase,
    adp_first_line: [f64; 6],
}

#[derive(Debug)]
struct MoleculeState {
    name: String,
    reference: Option<Vector3<f64>>,
    ref_atom: Option<String>,
    members: Vec<Atom>,
    begun: bool,
}

/// Strategy for the M40 parameter file: header counts, free atoms with
/// their modulation wave blocks, molecule templates, and `pos#` placements.
#[derive(Debug, Default)]
pub struct JanaM40Strategy {
    started: bool,
    header_read: bool,
    in_wave_section: bool,
    is_axial: bool,
    legendre: bool,
    record: Option<ActiveRecord>,
    molecule: Option<MoleculeState>,
}

impl JanaM40Strategy {
    /// Whether any M40 content was seen; used to decide when to fall back
    /// to a sibling file.
    pub fn saw_data(&self) -> bool {
        self.started
    }

    fn handle_preamble(&mut self, line: &str, ctx: &mut ParserContext) -> Result<(), JanaError> {
        if line.trim().is_empty() {
            return Ok(());
        }
        if !self.started && line.starts_with("command") {
            self.started = true;
            self.in_wave_section = true;
            return Ok(());
        }
        if self.in_wave_section {
            if line.starts_with("end") {
                self.in_wave_section = false;
            } else if line.starts_with("wave") {
                self.handle_wave_record(line, ctx)?;
            }
            return Ok(());
        }
        // header line: free-atom count, group count, rotation key
        let n_free = count_field(line, 0, 5);
        let n_groups = count_field(line, 5, 10);
        self.is_axial = int_field(line, 15, 20) == Some(1);
        self.started = true;
        self.header_read = true;
        info!(n_free, n_groups, axial = self.is_axial, "M40 header");
        Ok(())
    }

    /// A `wave n c1..cd` record: the harmonic n wave vector as a linear
    /// combination of the cell wave vectors.
    fn handle_wave_record(&mut self, line: &str, ctx: &mut ParserContext) -> Result<(), JanaError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let order: u32 = tokens
            .get(1)
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| JanaError::Parse {
                line: ctx.line_number,
                kind: JanaParseErrorKind::TruncatedRecord("wave".to_string()),
            })?;
        let mut q = Vector3::zeros();
        for i in 0..ctx.mod_dim {
            let coefficient = tokens
                .get(2 + i)
                .map(|t| parse_float_token(t, "wave", ctx.line_number))
                .transpose()?
                .unwrap_or(0.0);
            if coefficient != 0.0 {
                q += coefficient * ctx.modulation.wave_vector((i + 1) as u32)?;
            }
        }
        ctx.modulation.add_wave_vector(order, q);
        Ok(())
    }

    fn start_record(&mut self, line: &str, ctx: &mut ParserContext) -> Result<(), JanaError> {
        match classify_record(line) {
            ParsedRecord::FragmentHeader {
                name,
                point_group,
                reference,
                ref_atom,
            } => {
                if !point_group.is_empty() && point_group != "1" {
                    return Err(JanaError::Unsupported {
                        line: ctx.line_number,
                        feature: UnsupportedFeature::PointGroupReference,
                    });
                }
                debug!(name = %name, "fragment header");
                self.molecule = Some(MoleculeState {
                    name,
                    reference,
                    ref_atom,
                    members: Vec::new(),
                    begun: false,
                });
            }
            ParsedRecord::Atom {
                label,
                occupancy,
                fractional,
                t_type,
                counts,
            } => {
                let atom = Atom::new(&label, fractional, occupancy);
                self.record = Some(ActiveRecord {
                    label,
                    kind: RecordKind::FreeAtom { atom, t_type },
                    counts,
                    phase: if t_type > 2 {
                        RecordPhase::PreAdpSkip
                    } else {
                        RecordPhase::Adp
                    },
                    adp_first_line: [0.0; 6],
                });
            }
            ParsedRecord::Position {
                name,
                improper,
                syst_type,
                counts,
            } => {
                if syst_type != 0 {
                    return Err(JanaError::Unsupported {
                        line: ctx.line_number,
                        feature: UnsupportedFeature::LocalCoordinateSystem,
                    });
                }
                let label = match &self.molecule {
                    Some(molecule) => format!("{}_{}", molecule.name, name),
                    None => name.clone(),
                };
                self.record = Some(ActiveRecord {
                    label,
                    kind: RecordKind::Position {
                        improper,
                        angles_deg: [0.0; 3],
                        translation: Vector3::zeros(),
                        rotations: Vec::new(),
                    },
                    counts,
                    phase: RecordPhase::Adp,
                    adp_first_line: [0.0; 6],
                });
            }
        }
        // a record with no parameter lines at all cannot occur; even an
        // unmodulated atom carries its temperature-factor line
        Ok(())
    }

    fn feed_record(
        &mut self,
        mut record: ActiveRecord,
        line: &str,
        ctx: &mut ParserContext,
    ) -> Result<(), JanaError> {
        // JANA marks Legendre displacement blocks with a text tag on a
        // parameter line; the tag line itself carries no data
        if line.contains("Legendre") {
            self.legendre = true;
            self.record = Some(record);
            return Ok(());
        }
        let fields = float_fields(line);
        let value = |i: usize| fields[i].unwrap_or(0.0);

        match record.phase {
            RecordPhase::PreAdpSkip => {
                record.phase = RecordPhase::Adp;
            }
            RecordPhase::Adp => {
                match &mut record.kind {
                    RecordKind::FreeAtom { atom, t_type } => match *t_type {
                        0 => {
                            return Err(JanaError::Unsupported {
                                line: ctx.line_number,
                                feature: UnsupportedFeature::TlsModulation,
                            });
                        }
                        1 => {
                            let u_iso = value(0);
                            if u_iso != 0.0 {
                                atom.adp = Some([u_iso, u_iso, u_iso, 0.0, 0.0, 0.0]);
                            }
                        }
                        _ => {
                            atom.adp =
                                Some([value(0), value(1), value(2), value(3), value(4), value(5)]);
                        }
                    },
                    RecordKind::Position {
                        angles_deg,
                        translation,
                        ..
                    } => {
                        *angles_deg = [value(0), value(1), value(2)];
                        *translation = Vector3::new(value(3), value(4), value(5));
                    }
                }
                let extra = match record.kind {
                    RecordKind::FreeAtom { t_type, .. } if t_type > 2 => (t_type - 1) as usize,
                    _ => 0,
                };
                record.phase = if extra > 0 {
                    RecordPhase::PostAdpSkip(extra)
                } else {
                    self.phase_after_adp(&record, ctx)
                };
            }
            RecordPhase::PostAdpSkip(remaining) => {
                record.phase = if remaining > 1 {
                    RecordPhase::PostAdpSkip(remaining - 1)
                } else {
                    self.phase_after_adp(&record, ctx)
                };
            }
            RecordPhase::OccBase => {
                ctx.modulation.set_occupancy_base(&record.label, value(0));
                record.phase = self.first_occ_phase(&record);
            }
            RecordPhase::OccWave(index) => {
                if record.counts.special_occ {
                    record.phase = RecordPhase::CrenelCenter {
                        index,
                        width: value(0),
                    };
                } else {
                    ctx.modulation.add_wave(
                        WaveKey::new(WaveKind::Occupancy, &record.label, (index + 1) as u32),
                        WaveForm::Fourier {
                            sin: value(0),
                            cos: value(1),
                        },
                    )?;
                    record.phase = self.next_occ_phase(&record, index);
                }
            }
            RecordPhase::CrenelCenter { index, width } => {
                ctx.modulation.add_wave(
                    WaveKey::new(WaveKind::Occupancy, &record.label, 1),
                    WaveForm::Crenel {
                        center: value(0),
                        width,
                    },
                )?;
                record.phase = self.next_occ_phase(&record, index);
            }
            RecordPhase::DispWave(index) => {
                if record.counts.special_disp {
                    let center = value(3);
                    let width = value(4);
                    for axis in Axis::ALL {
                        let amplitude = value(axis.index());
                        if amplitude != 0.0 {
                            ctx.modulation.add_wave(
                                WaveKey::new(WaveKind::Displacement(axis), &record.label, 1),
                                WaveForm::Sawtooth {
                                    center,
                                    width,
                                    amplitude,
                                },
                            )?;
                        }
                    }
                } else if self.legendre {
                    for (offset, order) in [(0, index * 2 + 1), (3, index * 2 + 2)] {
                        for axis in Axis::ALL {
                            let coeff = value(offset + axis.index());
                            if coeff != 0.0 {
                                ctx.modulation.add_wave(
                                    WaveKey::new(
                                        WaveKind::Displacement(axis),
                                        &record.label,
                                        order as u32,
                                    ),
                                    WaveForm::Legendre { coeff },
                                )?;
                            }
                        }
                    }
                } else {
                    // zero-amplitude waves are stored too: existence is the
                    // catalog entry, and rigid-body combination needs it
                    for axis in Axis::ALL {
                        ctx.modulation.add_wave(
                            WaveKey::new(
                                WaveKind::Displacement(axis),
                                &record.label,
                                (index + 1) as u32,
                            ),
                            WaveForm::Fourier {
                                sin: value(axis.index()),
                                cos: value(axis.index() + 3),
                            },
                        )?;
                    }
                }
                record.phase = self.next_disp_phase(&record, index);
            }
            RecordPhase::RotData(index) => {
                if let RecordKind::Position { rotations, .. } = &mut record.kind {
                    rotations.push(RotationalWave {
                        order: (index + 1) as u32,
                        sin: Vector3::new(value(0), value(1), value(2)),
                        cos: Vector3::new(value(3), value(4), value(5)),
                    });
                }
                record.phase = if index + 1 < record.counts.n_disp {
                    RecordPhase::RotData(index + 1)
                } else {
                    RecordPhase::Done
                };
            }
            RecordPhase::AdpWaveFirst(index) => {
                if self.legendre {
                    for component in AdpComponent::ALL {
                        let coeff = value(component.index());
                        if coeff != 0.0 {
                            ctx.modulation.add_wave(
                                WaveKey::new(WaveKind::Adp(component), &record.label, (index + 1) as u32),
                                WaveForm::Legendre { coeff },
                            )?;
                        }
                    }
                    record.phase = self.next_adp_phase(&record, index);
                } else {
                    // first line carries the cosine components
                    record.adp_first_line =
                        [value(0), value(1), value(2), value(3), value(4), value(5)];
                    record.phase = RecordPhase::AdpWaveSecond(index);
                }
            }
            RecordPhase::AdpWaveSecond(index) => {
                if record.counts.special_uij {
                    warn!(label = %record.label, "skipping special ADP modulation block");
                } else {
                    for component in AdpComponent::ALL {
                        ctx.modulation.add_wave(
                            WaveKey::new(WaveKind::Adp(component), &record.label, (index + 1) as u32),
                            WaveForm::Fourier {
                                sin: value(component.index()),
                                cos: record.adp_first_line[component.index()],
                            },
                        )?;
                    }
                }
                record.phase = self.next_adp_phase(&record, index);
            }
            RecordPhase::Done => unreachable!("completed records are not fed lines"),
        }

        if record.phase == RecordPhase::Done {
            self.complete_record(record, ctx)?;
        } else {
            self.record = Some(record);
        }
        Ok(())
    }

    fn phase_after_adp(&self, record: &ActiveRecord, ctx: &ParserContext) -> RecordPhase {
        if ctx.mod_dim == 0 {
            return RecordPhase::Done;
        }
        if record.counts.n_occ > 0 && !record.counts.special_occ {
            RecordPhase::OccBase
        } else {
            self.first_occ_phase(record)
        }
    }

    fn first_occ_phase(&self, record: &ActiveRecord) -> RecordPhase {
        if record.counts.n_occ > 0 {
            RecordPhase::OccWave(0)
        } else {
            self.first_disp_phase(record)
        }
    }

    fn next_occ_phase(&self, record: &ActiveRecord, index: usize) -> RecordPhase {
        if index + 1 < record.counts.n_occ {
            RecordPhase::OccWave(index + 1)
        } else {
            self.first_disp_phase(record)
        }
    }

    fn first_disp_phase(&self, record: &ActiveRecord) -> RecordPhase {
        if record.counts.n_disp > 0 {
            RecordPhase::DispWave(0)
        } else {
            self.after_disp_phase(record)
        }
    }

    fn next_disp_phase(&self, record: &ActiveRecord, index: usize) -> RecordPhase {
        if index + 1 < record.counts.n_disp {
            RecordPhase::DispWave(index + 1)
        } else {
            self.after_disp_phase(record)
        }
    }

    fn after_disp_phase(&self, record: &ActiveRecord) -> RecordPhase {
        match record.kind {
            RecordKind::Position { .. } => {
                if record.counts.n_disp > 0 {
                    RecordPhase::RotData(0)
                } else {
                    RecordPhase::Done
                }
            }
            RecordKind::FreeAtom { .. } => {
                if self.effective_n_uij(record) > 0 {
                    RecordPhase::AdpWaveFirst(0)
                } else {
                    RecordPhase::Done
                }
            }
        }
    }

    fn effective_n_uij(&self, record: &ActiveRecord) -> usize {
        // Legendre ADP blocks are one line per order but twice as many orders
        if self.legendre {
            record.counts.n_uij * 2
        } else {
            record.counts.n_uij
        }
    }

    fn next_adp_phase(&self, record: &ActiveRecord, index: usize) -> RecordPhase {
        if index + 1 < self.effective_n_uij(record) {
            RecordPhase::AdpWaveFirst(index + 1)
        } else {
            RecordPhase::Done
        }
    }

    fn complete_record(
        &mut self,
        record: ActiveRecord,
        ctx: &mut ParserContext,
    ) -> Result<(), JanaError> {
        self.legendre = false;
        match record.kind {
            RecordKind::FreeAtom { atom, .. } => {
                if let Some(molecule) = self.molecule.as_mut().filter(|m| !m.begun) {
                    if molecule.ref_atom.as_deref() == Some(atom.label.as_str()) {
                        molecule.reference = Some(atom.fractional);
                    }
                    debug!(label = %atom.label, molecule = %molecule.name, "template member");
                    molecule.members.push(atom);
                } else {
                    let frame = ctx.frame.ok_or(JanaError::MissingRecord("cell"))?;
                    ctx.collection.add_atom(frame, atom)?;
                }
            }
            RecordKind::Position {
                improper,
                angles_deg,
                translation,
                rotations,
            } => {
                self.place_position(&record.label, improper, angles_deg, translation, rotations, ctx)?;
            }
        }
        Ok(())
    }

    fn place_position(
        &mut self,
        label: &str,
        improper: bool,
        angles_deg: [f64; 3],
        translation: Vector3<f64>,
        rotations: Vec<RotationalWave>,
        ctx: &mut ParserContext,
    ) -> Result<(), JanaError> {
        let Some(molecule) = self.molecule.as_mut() else {
            warn!(position = label, "position record without a molecule; skipped");
            return Ok(());
        };
        if molecule.members.is_empty() {
            warn!(position = label, "position record with no template atoms; skipped");
            return Ok(());
        }
        if !molecule.begun {
            let reference = molecule
                .reference
                .ok_or(JanaError::MissingRecord("molecule reference point"))?;
            ctx.modulation.begin_fragment(&molecule.name, reference);
            for member in &molecule.members {
                ctx.modulation
                    .add_fragment_member(&member.label, member.fractional)?;
            }
            molecule.begun = true;
        }
        // "mol1_pos#2" -> placed labels get the "_2" suffix
        let suffix = label
            .rsplit_once('#')
            .map(|(_, n)| format!("_{n}"))
            .unwrap_or_default();
        let position = FragmentPosition {
            source: label.to_string(),
            suffix,
            translation,
            angles_deg,
            convention: if self.is_axial {
                RotationConvention::Axial
            } else {
                RotationConvention::Euler
            },
            improper,
            rotations,
        };
        let cell = ctx.cell.clone().ok_or(JanaError::MissingRecord("cell"))?;
        let placed = ctx.modulation.apply_fragment_position(&position, &cell)?;
        let frame = ctx.frame.ok_or(JanaError::MissingRecord("cell"))?;
        for p in &placed {
            let Some(template) = molecule.members.iter().find(|m| m.label == p.source) else {
                continue;
            };
            let atom = template.cloned_at(&p.label, p.fractional);
            ctx.collection.add_atom(frame, atom)?;
        }
        info!(position = label, atoms = placed.len(), "fragment position placed");
        Ok(())
    }
}

impl ImportStrategy for JanaM40Strategy {
    type Error = JanaError;

    fn init(&mut self, _ctx: &mut ParserContext) -> Result<(), JanaError> {
        Ok(())
    }

    fn handle_line(&mut self, line: &str, ctx: &mut ParserContext) -> Result<(), JanaError> {
        if !self.header_read {
            return self.handle_preamble(line, ctx);
        }
        if let Some(record) = self.record.take() {
            return self.feed_record(record, line, ctx);
        }
        // between records, only a line starting in column 0 opens a new one
        if line.is_empty() || line.starts_with(' ') || line.starts_with('-') {
            return Ok(());
        }
        self.start_record(line, ctx)
    }

    fn finalize(&mut self, ctx: &mut ParserContext) -> Result<(), JanaError> {
        if let Some(record) = &self.record {
            return Err(JanaError::Parse {
                line: ctx.line_number,
                kind: JanaParseErrorKind::UnterminatedRecord(record.label.clone()),
            });
        }
        if self.started {
            let atoms = ctx
                .frame
                .and_then(|f| ctx.collection.frame(f))
                .map_or(0, |f| f.atoms().len());
            info!(atoms, "M40 read");
        }
        Ok(())
    }
}

/// The JANA M50/M40 file pair.
///
/// The M50 structure file carries the cell, superspace dimension, wave
/// vectors, and symmetry; the M40 parameter file carries atoms, modulation
/// waves, and rigid-body groups. M40 content may be appended to the M50
/// stream after its `end` record, or live in a sibling file.
pub struct JanaFile;

impl JanaFile {
    /// Reads an M50 stream, consuming any appended M40 content.
    ///
    /// # Errors
    ///
    /// Returns [`JanaError`] on I/O failure, malformed records, or
    /// unsupported features.
    pub fn read_from(reader: &mut impl BufRead) -> Result<ParserContext, JanaError> {
        let mut ctx = ParserContext::new();
        run_strategy(&mut JanaM50Strategy::default(), reader, &mut ctx)?;
        ctx.continue_parsing = true;
        run_strategy(&mut JanaM40Strategy::default(), reader, &mut ctx)?;
        Ok(ctx)
    }

    /// Reads an M50 file from disk, then its sibling `.m40` when the M50
    /// itself carried no parameter data.
    ///
    /// # Errors
    ///
    /// Returns [`JanaError`] on I/O failure, malformed records, or
    /// unsupported features.
    pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<ParserContext, JanaError> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let mut ctx = ParserContext::new();
        run_strategy(&mut JanaM50Strategy::default(), &mut reader, &mut ctx)?;
        ctx.continue_parsing = true;
        let mut m40 = JanaM40Strategy::default();
        run_strategy(&mut m40, &mut reader, &mut ctx)?;
        if !m40.saw_data() {
            let sibling = sibling_m40_path(path);
            if sibling.exists() {
                debug!(path = %sibling.display(), "reading sibling M40");
                let mut reader = BufReader::new(File::open(&sibling)?);
                ctx.continue_parsing = true;
                run_strategy(&mut JanaM40Strategy::default(), &mut reader, &mut ctx)?;
            }
        }
        Ok(ctx)
    }
}

fn sibling_m40_path(path: &Path) -> std::path::PathBuf {
    let upper = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.starts_with('M'));
    path.with_extension(if upper { "M40" } else { "m40" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::modulation::engine::AxisFilter;
    use std::io::Write;

    fn fmt9(v: f64) -> String {
        format!("{:>9}", format!("{:.6}", v))
    }

    fn float_line(values: &[f64]) -> String {
        values.iter().map(|v| fmt9(*v)).collect()
    }

    fn atom_line(
        name: &str,
        t_type: i64,
        occ: f64,
        xyz: [f64; 3],
        flags: &str,
        counts: [usize; 3],
    ) -> String {
        let mut line = format!("{name:<9}{:>2}{t_type:>3}", 1);
        line.push_str(&" ".repeat(18 - line.len()));
        line.push_str(&fmt9(occ));
        for v in xyz {
            line.push_str(&fmt9(v));
        }
        line.push_str(&" ".repeat(60 - line.len()));
        line.push_str(flags);
        line.push_str(&" ".repeat(65 - line.len()));
        for c in counts {
            line.push_str(&format!("{c:>3}"));
        }
        line
    }

    fn pos_line(name: &str, improper: bool, counts: [usize; 3]) -> String {
        let sign = if improper { -1 } else { 1 };
        let mut line = format!("{name:<9}{sign:>2}  0");
        line.push_str(&" ".repeat(60 - line.len()));
        line.push_str("000");
        line.push_str(&" ".repeat(65 - line.len()));
        for c in counts {
            line.push_str(&format!("{c:>3}"));
        }
        line
    }

    fn molecule_line(name: &str, reference: [f64; 3]) -> String {
        let mut line = format!("{name:<9}");
        line.push_str(&" ".repeat(27 - line.len()));
        for v in reference {
            line.push_str(&fmt9(v));
        }
        line
    }

    const M50_MODULATED: &str = "\
Version Jana2006
title test structure
cell 5 5 5 90 90 90
esdcell 0.001 0.001 0.001 0 0 0
ndim 4 ncomp 1
qi 0 0 0.3
qr 0 0 0
spgroup P-1(00g) 2 1
lattice P
symmetry x1 x2 x3 x4
symmetry -x1 -x2 -x3 -x4
end
";

    #[test]
    fn m50_records_populate_the_context() {
        let ctx = JanaFile::read_from(&mut M50_MODULATED.as_bytes()).unwrap();
        assert_eq!(ctx.title.as_deref(), Some("test structure"));
        assert_eq!(ctx.space_group.as_deref(), Some("P-1(00g)"));
        assert_eq!(ctx.mod_dim, 1);
        assert_eq!(ctx.symmetry.operators().len(), 2);
        let q = ctx.modulation.wave_vector(1).unwrap();
        assert!((q - Vector3::new(0.0, 0.0, 0.3)).norm() < 1e-12);
        let cell = ctx.cell.unwrap();
        assert!((cell.parameters().a - 5.0).abs() < 1e-12);
    }

    #[test]
    fn m50_without_cell_is_a_missing_record_error() {
        let input = "title no cell here\nend\n";
        let err = JanaFile::read_from(&mut input.as_bytes()).unwrap_err();
        assert!(matches!(err, JanaError::MissingRecord("cell")));
    }

    #[test]
    fn composite_wmatrix_is_unsupported() {
        let input = "cell 5 5 5 90 90 90\nndim 4\nwmatrix\nend\n";
        let err = JanaFile::read_from(&mut input.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            JanaError::Unsupported {
                feature: UnsupportedFeature::CompositeSubsystem,
                ..
            }
        ));
    }

    #[test]
    fn record_classification_is_structural() {
        let atom = atom_line("Na1", 2, 0.5, [0.1, 0.2, 0.3], "000", [1, 1, 0]);
        assert!(matches!(
            classify_record(&atom),
            ParsedRecord::Atom { ref label, t_type: 2, .. } if label == "Na1"
        ));
        let molecule = molecule_line("mol1", [0.25, 0.25, 0.25]);
        assert!(matches!(
            classify_record(&molecule),
            ParsedRecord::FragmentHeader { ref name, reference: Some(_), .. } if name == "mol1"
        ));
        let position = pos_line("pos#1", true, [0, 0, 0]);
        assert!(matches!(
            classify_record(&position),
            ParsedRecord::Position { improper: true, syst_type: 0, .. }
        ));
    }

    fn combined(m40_body: &str) -> String {
        format!("{M50_MODULATED}{m40_body}")
    }

    #[test]
    fn appended_m40_atom_with_fourier_waves() {
        let mut body = String::from("    2    0    0    0\n");
        body.push_str(&atom_line("Na1", 2, 0.5, [0.1, 0.2, 0.3], "000", [1, 1, 0]));
        body.push('\n');
        // anisotropic ADPs
        body.push_str(&float_line(&[0.01, 0.02, 0.03, 0.0, 0.0, 0.0]));
        body.push('\n');
        // occupancy baseline o_0
        body.push_str(&float_line(&[0.848047]));
        body.push('\n');
        // occupancy Fourier wave: sin, cos
        body.push_str(&float_line(&[0.0, 0.1]));
        body.push('\n');
        // displacement Fourier wave: sin xyz then cos xyz
        body.push_str(&float_line(&[0.0, 0.0, 0.1, 0.0, 0.0, 0.0]));
        body.push('\n');
        let ctx = JanaFile::read_from(&mut combined(&body).as_bytes()).unwrap();

        let frame = ctx.collection.frame(0).unwrap();
        assert_eq!(frame.atoms().len(), 1);
        let atom = &frame.atoms()[0];
        assert_eq!(atom.label, "Na1");
        assert!((atom.occupancy - 0.5).abs() < 1e-9);
        assert_eq!(atom.adp.unwrap()[2], 0.03);

        assert!((ctx.modulation.occupancy_base("Na1") - 0.848047).abs() < 1e-9);
        let occ = ctx
            .modulation
            .wave(&WaveKey::new(WaveKind::Occupancy, "Na1", 1))
            .copied()
            .unwrap();
        assert_eq!(occ, WaveForm::Fourier { sin: 0.0, cos: 0.1 });
        let disp_z = ctx
            .modulation
            .wave(&WaveKey::new(WaveKind::Displacement(Axis::Z), "Na1", 1))
            .copied()
            .unwrap();
        assert_eq!(disp_z, WaveForm::Fourier { sin: 0.1, cos: 0.0 });
        // zero-amplitude waves exist as explicit entries
        assert!(ctx
            .modulation
            .wave(&WaveKey::new(WaveKind::Displacement(Axis::X), "Na1", 1))
            .is_some());
    }

    #[test]
    fn crenel_block_reads_width_then_center() {
        let mut body = String::from("    1    0    0    0\n");
        body.push_str(&atom_line("Na1", 2, 0.5, [0.1, 0.2, 0.3], "100", [1, 0, 0]));
        body.push('\n');
        body.push_str(&float_line(&[0.0; 6]));
        body.push('\n');
        body.push_str(&float_line(&[0.312670])); // width
        body.push('\n');
        body.push_str(&float_line(&[0.05])); // center
        body.push('\n');
        let ctx = JanaFile::read_from(&mut combined(&body).as_bytes()).unwrap();
        let wave = ctx
            .modulation
            .wave(&WaveKey::new(WaveKind::Occupancy, "Na1", 1))
            .copied()
            .unwrap();
        match wave {
            WaveForm::Crenel { center, width } => {
                assert!((center - 0.05).abs() < 1e-9);
                assert!((width - 0.312670).abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn adp_waves_read_cos_line_then_sin_line() {
        let mut body = String::from("    1    0    0    0\n");
        body.push_str(&atom_line("Na1", 2, 0.5, [0.1, 0.2, 0.3], "000", [0, 0, 1]));
        body.push('\n');
        body.push_str(&float_line(&[0.01, 0.01, 0.01, 0.0, 0.0, 0.0]));
        body.push('\n');
        body.push_str(&float_line(&[0.002, 0.0, 0.0, 0.0, 0.0, 0.0])); // cos
        body.push('\n');
        body.push_str(&float_line(&[0.001, 0.0, 0.0, 0.0, 0.0, 0.0])); // sin
        body.push('\n');
        let ctx = JanaFile::read_from(&mut combined(&body).as_bytes()).unwrap();
        let wave = ctx
            .modulation
            .wave(&WaveKey::new(
                WaveKind::Adp(AdpComponent::U11),
                "Na1",
                1,
            ))
            .copied()
            .unwrap();
        assert_eq!(wave, WaveForm::Fourier { sin: 0.001, cos: 0.002 });
    }

    #[test]
    fn molecule_position_places_translated_members() {
        let mut body = String::from("    0    1    0    0\n");
        body.push_str(&molecule_line("mol1", [0.25, 0.25, 0.25]));
        body.push('\n');
        body.push_str(&atom_line("C1", 2, 1.0, [0.35, 0.25, 0.25], "000", [0, 0, 0]));
        body.push('\n');
        body.push_str(&float_line(&[0.0; 6]));
        body.push('\n');
        body.push_str(&pos_line("pos#1", false, [0, 0, 0]));
        body.push('\n');
        // angles phi chi psi, then the translation vector
        body.push_str(&float_line(&[0.0, 0.0, 0.0, 0.1, 0.0, 0.0]));
        body.push('\n');
        let ctx = JanaFile::read_from(&mut combined(&body).as_bytes()).unwrap();
        let frame = ctx.collection.frame(0).unwrap();
        assert_eq!(frame.atoms().len(), 1);
        let atom = &frame.atoms()[0];
        assert_eq!(atom.label, "C1_1");
        assert!((atom.fractional - Vector3::new(0.45, 0.25, 0.25)).norm() < 1e-9);
    }

    #[test]
    fn improper_position_inverts_member_offsets() {
        let mut body = String::from("    0    1    0    0\n");
        body.push_str(&molecule_line("mol1", [0.25, 0.25, 0.25]));
        body.push('\n');
        body.push_str(&atom_line("C1", 2, 1.0, [0.35, 0.25, 0.25], "000", [0, 0, 0]));
        body.push('\n');
        body.push_str(&float_line(&[0.0; 6]));
        body.push('\n');
        body.push_str(&pos_line("pos#1", true, [0, 0, 0]));
        body.push('\n');
        body.push_str(&float_line(&[0.0; 6]));
        body.push('\n');
        let ctx = JanaFile::read_from(&mut combined(&body).as_bytes()).unwrap();
        let atom = &ctx.collection.frame(0).unwrap().atoms()[0];
        assert!((atom.fractional - Vector3::new(0.15, 0.25, 0.25)).norm() < 1e-9);
    }

    #[test]
    fn position_with_local_system_is_unsupported() {
        let mut body = String::from("    0    1    0    0\n");
        body.push_str(&molecule_line("mol1", [0.25, 0.25, 0.25]));
        body.push('\n');
        let mut pos = pos_line("pos#1", false, [0, 0, 0]);
        // syst type lives in column 13
        pos.replace_range(13..14, "1");
        body.push_str(&pos);
        body.push('\n');
        let err = JanaFile::read_from(&mut combined(&body).as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            JanaError::Unsupported {
                feature: UnsupportedFeature::LocalCoordinateSystem,
                ..
            }
        ));
    }

    #[test]
    fn point_group_molecule_is_unsupported() {
        let mut body = String::from("    0    1    0    0\n");
        let mut header = molecule_line("mol1", [0.25, 0.25, 0.25]);
        header.replace_range(12..15, "mmm");
        body.push_str(&header);
        body.push('\n');
        let err = JanaFile::read_from(&mut combined(&body).as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            JanaError::Unsupported {
                feature: UnsupportedFeature::PointGroupReference,
                ..
            }
        ));
    }

    #[test]
    fn tls_temperature_factors_are_unsupported() {
        let mut body = String::from("    1    0    0    0\n");
        body.push_str(&atom_line("C1", 0, 1.0, [0.1, 0.2, 0.3], "000", [0, 0, 0]));
        body.push('\n');
        body.push_str(&float_line(&[0.0; 6]));
        body.push('\n');
        let err = JanaFile::read_from(&mut combined(&body).as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            JanaError::Unsupported {
                feature: UnsupportedFeature::TlsModulation,
                ..
            }
        ));
    }

    #[test]
    fn truncated_record_is_reported_at_eof() {
        let mut body = String::from("    1    0    0    0\n");
        body.push_str(&atom_line("Na1", 2, 0.5, [0.1, 0.2, 0.3], "000", [1, 0, 0]));
        body.push('\n');
        // ADP line present but the occupancy block never arrives
        body.push_str(&float_line(&[0.0; 6]));
        body.push('\n');
        let err = JanaFile::read_from(&mut combined(&body).as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            JanaError::Parse {
                kind: JanaParseErrorKind::UnterminatedRecord(_),
                ..
            }
        ));
    }

    #[test]
    fn end_to_end_finalize_reconstructs_modulated_position() {
        let mut body = String::from("    1    0    0    0\n");
        body.push_str(&atom_line("Na1", 2, 1.0, [0.0, 0.0, 0.0], "000", [0, 1, 0]));
        body.push('\n');
        body.push_str(&float_line(&[0.0; 6]));
        body.push('\n');
        body.push_str(&float_line(&[0.0, 0.0, 0.1, 0.0, 0.0, 0.0]));
        body.push('\n');
        let mut ctx = JanaFile::read_from(&mut combined(&body).as_bytes()).unwrap();
        // q = (0,0,0.3); pick t with q.t = 0.25 for a pure sine quarter cycle
        let phase = Vector3::new(0.0, 0.0, 0.25 / 0.3);
        let atoms = ctx
            .collection
            .finalize(0, &ctx.symmetry, &ctx.modulation, &phase, &AxisFilter::all())
            .unwrap();
        // the origin is its own inversion image, so expansion reduces to one
        assert_eq!(atoms.len(), 1);
        assert!((atoms[0].fractional.z - 0.1).abs() < 1e-9);
    }

    #[test]
    fn sibling_m40_file_is_loaded_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let m50_path = dir.path().join("crystal.m50");
        std::fs::write(&m50_path, M50_MODULATED).unwrap();
        let mut m40 = File::create(dir.path().join("crystal.m40")).unwrap();
        let mut body = String::from("    1    0    0    0\n");
        body.push_str(&atom_line("Na1", 2, 0.5, [0.1, 0.2, 0.3], "000", [0, 0, 0]));
        body.push('\n');
        body.push_str(&float_line(&[0.0; 6]));
        body.push('\n');
        m40.write_all(body.as_bytes()).unwrap();
        drop(m40);

        let ctx = JanaFile::read_from_path(&m50_path).unwrap();
        let frame = ctx.collection.frame(0).unwrap();
        assert_eq!(frame.atoms().len(), 1);
        assert_eq!(frame.atoms()[0].label, "Na1");
    }

    #[test]
    fn m40_wave_records_define_higher_harmonics() {
        let mut body = String::from("command begin\n");
        body.push_str("wave 2 2.0\n");
        body.push_str("end\n");
        body.push_str("    1    0    0    0\n");
        body.push_str(&atom_line("Na1", 2, 0.5, [0.1, 0.2, 0.3], "000", [0, 0, 0]));
        body.push('\n');
        body.push_str(&float_line(&[0.0; 6]));
        body.push('\n');
        let ctx = JanaFile::read_from(&mut combined(&body).as_bytes()).unwrap();
        let q2 = ctx.modulation.wave_vector(2).unwrap();
        assert!((q2 - Vector3::new(0.0, 0.0, 0.6)).norm() < 1e-12);
    }
}
