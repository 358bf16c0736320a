//! TetGen-style ASCII mesh loading.
//!
//! The solver consumes node positions and tetrahedral connectivity as plain
//! arrays; this module is the external loader that produces them. The format
//! is the TetGen `.node`/`.ele` pair:
//!
//! ```text
//! bar.node:  <N> <dim> <attrs> <markers>     bar.ele:  <M> <nodes_per_tet> <attrs>
//!            <idx> <x> <y> <z> ...                     <idx> <n1> <n2> <n3> <n4> ...
//! ```
//!
//! Node indices may be 0- or 1-based; the base is taken from the first node
//! row and element connectivity is shifted accordingly.

use std::fs;
use std::path::Path;

use crate::error::{IoError, Result};

/// Node positions and tetrahedral connectivity as flat arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshArrays {
    /// Rest positions, one `[x, y, z]` triple per node
    pub positions: Vec<[f64; 3]>,
    /// Tetrahedra as 0-based node index 4-tuples
    pub tets: Vec<[usize; 4]>,
}

/// Load a mesh from `<stem>.node` and `<stem>.ele`.
pub fn load_tet_mesh(stem: impl AsRef<Path>) -> Result<MeshArrays> {
    let stem = stem.as_ref();
    let node_path = stem.with_extension("node");
    let ele_path = stem.with_extension("ele");

    let (positions, index_base) = parse_node_file(&read_to_string(&node_path)?, &node_path)?;
    let tets = parse_ele_file(&read_to_string(&ele_path)?, &ele_path, index_base, positions.len())?;

    Ok(MeshArrays { positions, tets })
}

fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|_| IoError::FileNotFound(path.display().to_string()))
}

fn parse_node_file(text: &str, path: &Path) -> Result<(Vec<[f64; 3]>, usize)> {
    let mut lines = data_lines(text);
    let header = lines
        .next()
        .ok_or_else(|| parse_err(path, "empty node file"))?;
    let count: usize = field(header, 0, path, "node count")?;

    let mut positions = Vec::with_capacity(count);
    let mut index_base = 0usize;
    for (row, line) in lines.take(count).enumerate() {
        let idx: usize = field(line, 0, path, "node index")?;
        if row == 0 {
            index_base = idx;
        }
        let x: f64 = field(line, 1, path, "x coordinate")?;
        let y: f64 = field(line, 2, path, "y coordinate")?;
        let z: f64 = field(line, 3, path, "z coordinate")?;
        positions.push([x, y, z]);
    }

    if positions.len() != count {
        return Err(IoError::InvalidData(format!(
            "{}: header promises {count} nodes, found {}",
            path.display(),
            positions.len()
        )));
    }
    Ok((positions, index_base))
}

fn parse_ele_file(
    text: &str,
    path: &Path,
    index_base: usize,
    num_nodes: usize,
) -> Result<Vec<[usize; 4]>> {
    let mut lines = data_lines(text);
    let header = lines
        .next()
        .ok_or_else(|| parse_err(path, "empty element file"))?;
    let count: usize = field(header, 0, path, "element count")?;
    let nodes_per_tet: usize = field(header, 1, path, "nodes per element")?;
    if nodes_per_tet != 4 {
        return Err(IoError::InvalidData(format!(
            "{}: only 4-node tetrahedra are supported (got {nodes_per_tet})",
            path.display()
        )));
    }

    let mut tets = Vec::with_capacity(count);
    for line in lines.take(count) {
        let mut tet = [0usize; 4];
        for (k, slot) in tet.iter_mut().enumerate() {
            let raw: usize = field(line, k + 1, path, "node reference")?;
            let idx = raw
                .checked_sub(index_base)
                .ok_or_else(|| parse_err(path, "node reference below index base"))?;
            if idx >= num_nodes {
                return Err(IoError::InvalidData(format!(
                    "{}: node reference {raw} out of range ({num_nodes} nodes)",
                    path.display()
                )));
            }
            *slot = idx;
        }
        tets.push(tet);
    }

    if tets.len() != count {
        return Err(IoError::InvalidData(format!(
            "{}: header promises {count} elements, found {}",
            path.display(),
            tets.len()
        )));
    }
    Ok(tets)
}

/// Non-empty, non-comment lines.
fn data_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

fn field<T: std::str::FromStr>(line: &str, pos: usize, path: &Path, what: &str) -> Result<T> {
    let raw = line
        .split_whitespace()
        .nth(pos)
        .ok_or_else(|| parse_err(path, &format!("missing {what}")))?;
    raw.parse::<T>()
        .map_err(|_| parse_err(path, &format!("invalid {what}: {raw:?}")))
}

fn parse_err(path: &Path, msg: &str) -> IoError {
    IoError::Parse(format!("{}: {msg}", path.display()))
}
