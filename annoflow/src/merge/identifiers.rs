//! Run-unique sequence identifiers.
//!
//! Before the first stage every input sequence is renamed to
//! `<prefix><n>` so identifiers are unique across the whole run. The map back
//! to the original names is applied at the user-visible boundary.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::errors::{AnnoflowError, MergeFormatError};

/// Internal identifier → original identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierMap {
    entries: HashMap<String, String>,
}

impl IdentifierMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one mapping.
    pub fn insert(&mut self, internal: impl Into<String>, original: impl Into<String>) {
        self.entries.insert(internal.into(), original.into());
    }

    /// Looks up the original identifier.
    #[must_use]
    pub fn original(&self, internal: &str) -> Option<&str> {
        self.entries.get(internal).map(String::as_str)
    }

    /// Returns the number of mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loads a map written by [`rename_sequences`].
    ///
    /// # Errors
    ///
    /// Returns a merge format error for lines without exactly two columns.
    pub fn load(path: &Path) -> Result<Self, AnnoflowError> {
        let reader = BufReader::new(File::open(path)?);
        let mut map = Self::new();
        for (index, line) in reader.lines().enumerate() {
            let line = checked_line(line, path, index)?;
            if line.is_empty() {
                continue;
            }
            let mut columns = line.split('\t');
            match (columns.next(), columns.next(), columns.next()) {
                (Some(internal), Some(original), None) if !internal.is_empty() => {
                    map.insert(internal, original);
                }
                _ => {
                    return Err(MergeFormatError::new(
                        path,
                        line_number(index),
                        "expected '<internal>\\t<original>'",
                    )
                    .into());
                }
            }
        }
        Ok(map)
    }

    /// Rewrites the first column of a tab-separated file to original names.
    ///
    /// Blank lines are dropped. Returns the number of records written.
    ///
    /// # Errors
    ///
    /// Returns a merge format error for a record whose identifier is unknown.
    pub fn restore_file(&self, input: &Path, output: &Path) -> Result<u64, AnnoflowError> {
        let reader = BufReader::new(File::open(input)?);
        let mut writer = BufWriter::new(File::create(output)?);
        let mut written = 0;

        for (index, line) in reader.lines().enumerate() {
            let line = checked_line(line, input, index)?;
            if line.is_empty() {
                continue;
            }
            let (id, rest) = line.split_once('\t').unwrap_or((line.as_str(), ""));
            let Some(original) = self.original(id) else {
                return Err(MergeFormatError::new(
                    input,
                    line_number(index),
                    format!("identifier '{id}' is not in the identifier map"),
                )
                .into());
            };
            if line.contains('\t') {
                writeln!(writer, "{original}\t{rest}")?;
            } else {
                writeln!(writer, "{original}")?;
            }
            written += 1;
        }

        writer.flush()?;
        debug!(input = %input.display(), output = %output.display(), written, "Restored identifiers");
        Ok(written)
    }
}

/// Renames every FASTA record to `<prefix><n>` and writes the identifier map.
///
/// The original name is the header text up to the first whitespace.
/// Returns the number of records.
///
/// # Errors
///
/// Returns a merge format error for a header with no name.
pub fn rename_sequences(
    input: &Path,
    output: &Path,
    id_map: &Path,
    prefix: &str,
) -> Result<u64, AnnoflowError> {
    let reader = BufReader::new(File::open(input)?);
    let mut fasta = BufWriter::new(File::create(output)?);
    let mut map = BufWriter::new(File::create(id_map)?);
    let mut count: u64 = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = checked_line(line, input, index)?;
        if let Some(header) = line.strip_prefix('>') {
            let Some(original) = header.split_whitespace().next() else {
                return Err(MergeFormatError::new(input, line_number(index), "FASTA header without a name").into());
            };
            count += 1;
            writeln!(fasta, ">{prefix}{count}")?;
            writeln!(map, "{prefix}{count}\t{original}")?;
        } else {
            writeln!(fasta, "{line}")?;
        }
    }

    fasta.flush()?;
    map.flush()?;
    Ok(count)
}

/// Counts the records (header lines) of a FASTA file.
///
/// # Errors
///
/// Returns an IO error if the file cannot be read.
pub fn count_fasta_records(path: &Path) -> Result<u64, AnnoflowError> {
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for line in reader.lines() {
        if line?.starts_with('>') {
            count += 1;
        }
    }
    Ok(count)
}

pub(super) fn line_number(index: usize) -> u64 {
    u64::try_from(index).map_or(u64::MAX, |i| i + 1)
}

/// Unwraps one `lines()` item, reporting undecodable text with its position.
pub(super) fn checked_line(
    line: std::io::Result<String>,
    path: &Path,
    index: usize,
) -> Result<String, AnnoflowError> {
    match line {
        Ok(line) => Ok(line),
        Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
            Err(MergeFormatError::new(path, line_number(index), "invalid UTF-8").into())
        }
        Err(err) => Err(err.into()),
    }
}
