//! File-level helpers: format detection, gzip-aware streams and matrix output.
//!
//! Paths equal to `-` stand for stdin / stdout. Compressed input is recognised by
//! the gzip magic bytes, compressed output by a `.gz` extension.

use crate::binary::{self, MAGIC};
use crate::error::Result;
use crate::nwka::{self, NwkaWriter, WriteOptions};
use crate::tree::Tree;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::borrow::Borrow;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// On-disk tree formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeFormat {
    /// Newick or NWKA text, one or more `;`-terminated trees.
    Nwka,
    /// The seekable binary format of [`crate::binary`].
    Binary,
}

/// Guesses the format from the first bytes of a (decompressed) stream.
pub fn detect_format(head: &[u8]) -> TreeFormat {
    if head.starts_with(&MAGIC) {
        TreeFormat::Binary
    } else {
        TreeFormat::Nwka
    }
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Reads every tree from a file in either format, gzip-compressed or not.
///
/// Uncompressed binary files are read with random access; anything arriving
/// through stdin or gzip is buffered in memory first.
pub fn read_trees_file<P: AsRef<Path>>(path: P) -> Result<Vec<Tree>> {
    let path = path.as_ref();
    if is_stdio(path) {
        let mut bytes = Vec::new();
        io::stdin().lock().read_to_end(&mut bytes)?;
        return read_trees_bytes(bytes);
    }

    let mut reader = BufReader::new(File::open(path)?);
    let head = reader.fill_buf()?;
    if head.starts_with(&GZIP_MAGIC) {
        let mut bytes = Vec::new();
        MultiGzDecoder::new(reader).read_to_end(&mut bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "decompressed input");
        return read_trees_bytes(bytes);
    }
    let trees = match detect_format(head) {
        TreeFormat::Binary => binary::read_all_trees(&mut reader)?,
        TreeFormat::Nwka => nwka::read_trees(reader)?,
    };
    Ok(trees)
}

/// Reads every tree from an in-memory file image.
pub fn read_trees_bytes(bytes: Vec<u8>) -> Result<Vec<Tree>> {
    let trees = match detect_format(&bytes) {
        TreeFormat::Binary => binary::read_all_trees(&mut Cursor::new(bytes))?,
        TreeFormat::Nwka => nwka::read_trees(&bytes[..])?,
    };
    Ok(trees)
}

/// Opens `path` for writing: stdout for `-`, gzip-compressed for `.gz` paths.
pub fn create_output<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn Write>> {
    let path = path.as_ref();
    if is_stdio(path) {
        return Ok(Box::new(BufWriter::new(io::stdout())));
    }
    let file = File::create(path)?;
    if path.to_string_lossy().ends_with(".gz") {
        Ok(Box::new(BufWriter::new(GzEncoder::new(file, Compression::default()))))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Writes `trees` to `path` in `format`. `options` applies to text output.
pub fn write_trees_file<P, T>(
    path: P,
    trees: &[T],
    format: TreeFormat,
    options: &WriteOptions,
) -> Result<()>
where
    P: AsRef<Path>,
    T: Borrow<Tree>,
{
    let out = create_output(path)?;
    match format {
        TreeFormat::Nwka => {
            let mut writer = NwkaWriter::new(out, *options);
            for tree in trees {
                writer.write_tree(tree.borrow())?;
            }
            writer.finish()?;
        }
        TreeFormat::Binary => {
            let mut out = binary::write_trees(out, trees, &[])?;
            out.flush()?;
        }
    }
    Ok(())
}

/// Row and column labels for a set of trees: the tree name, or `tree<N>` counting
/// from 1 for unnamed trees.
pub fn tree_labels<T: Borrow<Tree>>(trees: &[T]) -> Vec<String> {
    trees
        .iter()
        .enumerate()
        .map(|(i, tree)| match tree.borrow().name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("tree{}", i + 1),
        })
        .collect()
}

/// Write a labeled square matrix as TSV to a file or stdout.
/// If `path` ends with `.gz`, the output is gzip-compressed.
/// If `path` equals `-`, the matrix is written to stdout (uncompressed).
pub fn write_matrix_tsv<P: AsRef<Path>, T: Display>(
    path: P,
    names: &[String],
    mat: &[Vec<T>],
) -> io::Result<()> {
    let mut out = create_output(path)?;
    write_matrix(&mut out, names, mat)?;
    out.flush()
}

fn write_matrix<W: Write, T: Display>(out: &mut W, names: &[String], mat: &[Vec<T>]) -> io::Result<()> {
    // Header row
    write!(out, "\t")?;
    for (k, name) in names.iter().enumerate() {
        if k > 0 {
            write!(out, "\t")?;
        }
        write!(out, "{name}")?;
    }
    writeln!(out)?;

    // Rows
    for (name, row) in names.iter().zip(mat) {
        write!(out, "{name}")?;
        for val in row {
            write!(out, "\t{val}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}
