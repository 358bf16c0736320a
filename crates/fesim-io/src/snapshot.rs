//! Per-frame state snapshots.
//!
//! A snapshot is a sequential text record written after a frame completes
//! and restorable to resume or replay a run:
//!
//! ```text
//! [frame_index] [N]
//! [X: 3N values]
//! [V: 3N values]
//! [A: 3N values]
//! ```
//!
//! Values are written with Rust's shortest round-trip float formatting, so a
//! save/load cycle reproduces the state bit-exactly. Multiple records may be
//! appended to one stream; `read_record` returns `None` at end of stream.

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use crate::error::{IoError, Result};

/// State of one model after one completed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
    /// Frame index this state belongs to
    pub frame: usize,
    /// Node count N
    pub num_nodes: usize,
    /// Positions, length 3N
    pub positions: Vec<f64>,
    /// Velocities, length 3N
    pub velocities: Vec<f64>,
    /// Accelerations, length 3N
    pub accelerations: Vec<f64>,
}

impl FrameSnapshot {
    /// Check that all three vectors have length 3N.
    pub fn is_consistent(&self) -> bool {
        let n = 3 * self.num_nodes;
        self.positions.len() == n && self.velocities.len() == n && self.accelerations.len() == n
    }
}

/// Write one snapshot record to a stream.
pub fn write_record<W: Write>(writer: &mut W, snapshot: &FrameSnapshot) -> io::Result<()> {
    writeln!(writer, "{} {}", snapshot.frame, snapshot.num_nodes)?;
    write_vector(writer, &snapshot.positions)?;
    write_vector(writer, &snapshot.velocities)?;
    write_vector(writer, &snapshot.accelerations)?;
    Ok(())
}

fn write_vector<W: Write>(writer: &mut W, values: &[f64]) -> io::Result<()> {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            write!(writer, " ")?;
        }
        write!(writer, "{v}")?;
    }
    writeln!(writer)
}

/// Read the next snapshot record from a stream, or `None` at end of stream.
pub fn read_record<R: BufRead>(reader: &mut R) -> Result<Option<FrameSnapshot>> {
    let mut header = String::new();
    if reader.read_line(&mut header)? == 0 {
        return Ok(None);
    }
    let header = header.trim();
    if header.is_empty() {
        return Ok(None);
    }

    let mut parts = header.split_whitespace();
    let frame = parse_field::<usize>(parts.next(), "frame index")?;
    let num_nodes = parse_field::<usize>(parts.next(), "node count")?;

    let positions = read_vector(reader, 3 * num_nodes, "positions")?;
    let velocities = read_vector(reader, 3 * num_nodes, "velocities")?;
    let accelerations = read_vector(reader, 3 * num_nodes, "accelerations")?;

    Ok(Some(FrameSnapshot {
        frame,
        num_nodes,
        positions,
        velocities,
        accelerations,
    }))
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, what: &str) -> Result<T> {
    let raw = field.ok_or_else(|| IoError::Parse(format!("missing {what}")))?;
    raw.parse::<T>()
        .map_err(|_| IoError::Parse(format!("invalid {what}: {raw:?}")))
}

fn read_vector<R: BufRead>(reader: &mut R, len: usize, what: &str) -> Result<Vec<f64>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(IoError::Parse(format!("truncated record: missing {what}")));
    }
    let values = line
        .split_whitespace()
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| IoError::Parse(format!("invalid {what} value: {s:?}")))
        })
        .collect::<Result<Vec<f64>>>()?;
    if values.len() != len {
        return Err(IoError::InvalidData(format!(
            "{what}: expected {len} values, found {}",
            values.len()
        )));
    }
    Ok(values)
}

/// Save a single snapshot to a file, creating parent directories as needed.
pub fn save_snapshot(path: impl AsRef<Path>, snapshot: &FrameSnapshot) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    write_record(&mut file, snapshot)?;
    Ok(())
}

/// Load the first snapshot record from a file.
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<FrameSnapshot> {
    let path = path.as_ref();
    let file = fs::File::open(path)
        .map_err(|_| IoError::FileNotFound(path.display().to_string()))?;
    let mut reader = BufReader::new(file);
    read_record(&mut reader)?
        .ok_or_else(|| IoError::InvalidData(format!("{}: empty snapshot file", path.display())))
}
