use crate::cli::{InfoArgs, ShowArgs};
use crate::error::{CliError, Result};
use tracing::info;
use xtalmod::core::io::jana::JanaFile;
use xtalmod::core::modulation::engine::AxisFilter;
use xtalmod::core::modulation::wave::Axis;
use xtalmod::nalgebra::Vector3;

pub fn run_show(args: ShowArgs) -> Result<()> {
    let phase = parse_phase(&args.phase)?;
    let axes = match &args.axes {
        Some(text) => parse_axes(text)?,
        None => AxisFilter::all(),
    };

    let mut ctx = JanaFile::read_from_path(&args.input).map_err(|source| CliError::FileParsing {
        path: args.input.clone(),
        source,
    })?;
    let frame = ctx
        .frame
        .ok_or_else(|| CliError::Argument("the input file defines no unit cell".to_string()))?;

    info!(frame, t = ?phase, "expanding structure");
    let atoms = ctx
        .collection
        .finalize(frame, &ctx.symmetry, &ctx.modulation, &phase, &axes)?;

    println!(
        "{:<10} {:<4} {:>9} {:>9} {:>9}  {:>9} {:>9} {:>9}  {:>6}",
        "label", "el", "x", "y", "z", "X/A", "Y/A", "Z/A", "occ"
    );
    for atom in atoms {
        let cart = atom.cartesian.unwrap_or_default();
        println!(
            "{:<10} {:<4} {:>9.5} {:>9.5} {:>9.5}  {:>9.4} {:>9.4} {:>9.4}  {:>6.4}",
            atom.label,
            atom.element,
            atom.fractional.x,
            atom.fractional.y,
            atom.fractional.z,
            cart.x,
            cart.y,
            cart.z,
            atom.occupancy
        );
    }
    println!("{} atoms", atoms.len());
    Ok(())
}

pub fn run_info(args: InfoArgs) -> Result<()> {
    let ctx = JanaFile::read_from_path(&args.input).map_err(|source| CliError::FileParsing {
        path: args.input.clone(),
        source,
    })?;

    if let Some(title) = &ctx.title {
        println!("title        {title}");
    }
    if let Some(group) = &ctx.space_group {
        println!("space group  {group}");
    }
    if let Some(cell) = &ctx.cell {
        let p = cell.parameters();
        println!(
            "cell         a={} b={} c={} alpha={} beta={} gamma={}",
            p.a, p.b, p.c, p.alpha, p.beta, p.gamma
        );
        println!("volume       {:.4} A^3", cell.volume());
    }
    println!("dimension    {} (+{})", 3 + ctx.mod_dim, ctx.mod_dim);
    println!("operators    {}", ctx.symmetry.operators().len());
    for op in ctx.symmetry.operators() {
        println!("  {op}");
    }
    println!("waves        {}", ctx.modulation.waves().count());
    for (key, form) in ctx.modulation.waves() {
        println!("  {key}  {form:?}");
    }
    let sites = ctx
        .frame
        .and_then(|f| ctx.collection.frame(f))
        .map_or(0, |f| f.atoms().len());
    println!("sites        {sites}");
    Ok(())
}

fn parse_phase(text: &str) -> Result<Vector3<f64>> {
    let mut phase = Vector3::zeros();
    for (i, token) in text.split(',').enumerate() {
        if i >= 3 {
            return Err(CliError::Argument(format!(
                "phase '{text}' has more than three components"
            )));
        }
        phase[i] = token.trim().parse().map_err(|_| {
            CliError::Argument(format!("phase component '{}' is not a number", token.trim()))
        })?;
    }
    Ok(phase)
}

fn parse_axes(text: &str) -> Result<AxisFilter> {
    let mut axes = Vec::new();
    for ch in text.chars() {
        match ch.to_ascii_lowercase() {
            'x' => axes.push(Axis::X),
            'y' => axes.push(Axis::Y),
            'z' => axes.push(Axis::Z),
            ',' | ' ' => {}
            other => {
                return Err(CliError::Argument(format!(
                    "'{other}' is not an axis (expected x, y, or z)"
                )));
            }
        }
    }
    Ok(AxisFilter::only(&axes))
}
