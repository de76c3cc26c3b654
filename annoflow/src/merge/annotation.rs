//! Annotation tables and the sort-merge join that folds them.

use std::cmp::Ordering;
use std::path::Path;

use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};

use crate::errors::{AnnoflowError, MergeFormatError};

/// Name of the first annotation column.
pub const SEQUENCE_ID_COLUMN: &str = "sequence_id";
/// Name of the second annotation column.
pub const HIT_RANK_COLUMN: &str = "hit_rank";

/// One annotation row, keyed by `(sequence_id, hit_rank)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRecord {
    hit_rank: u64,
    fields: Vec<String>,
}

impl AnnotationRecord {
    /// Creates a record from its columns.
    ///
    /// The first column is the sequence identifier; `hit_rank` is the parsed
    /// second column.
    #[must_use]
    pub fn new(hit_rank: u64, fields: Vec<String>) -> Self {
        Self { hit_rank, fields }
    }

    /// Returns the sequence identifier.
    #[must_use]
    pub fn sequence_id(&self) -> &str {
        self.fields.first().map_or("", String::as_str)
    }

    /// Returns the hit rank.
    #[must_use]
    pub fn hit_rank(&self) -> u64 {
        self.hit_rank
    }

    /// Returns every column.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    fn cmp_key(&self, other: &Self) -> Ordering {
        self.sequence_id()
            .cmp(other.sequence_id())
            .then(self.hit_rank.cmp(&other.hit_rank))
    }

    pub(crate) fn set_sequence_id(&mut self, id: &str) {
        if let Some(first) = self.fields.first_mut() {
            *first = id.to_string();
        }
    }
}

/// A parsed annotation table with its records sorted by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationTable {
    header: Vec<String>,
    records: Vec<AnnotationRecord>,
    duplicates: u64,
}

impl AnnotationTable {
    /// Creates a table, sorting the records and keeping the first of any
    /// duplicate key.
    #[must_use]
    pub fn new(header: Vec<String>, mut records: Vec<AnnotationRecord>) -> Self {
        let before = records.len();
        records.sort_by(AnnotationRecord::cmp_key);
        records.dedup_by(|later, earlier| later.cmp_key(earlier) == Ordering::Equal);
        let duplicates = u64::try_from(before - records.len()).unwrap_or(u64::MAX);
        Self {
            header,
            records,
            duplicates,
        }
    }

    /// Reads a tab-separated table with a header row.
    ///
    /// # Errors
    ///
    /// Returns a merge format error for a bad header, a row with the wrong
    /// number of columns or a non-numeric hit rank.
    pub fn read(path: &Path) -> Result<Self, AnnoflowError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_path(path)?;

        let mut rows = reader.records();
        let header: Vec<String> = match rows.next() {
            Some(row) => decoded(path, row)?.iter().map(str::to_string).collect(),
            None => return Err(MergeFormatError::new(path, 1, "missing header row").into()),
        };
        if header.len() < 2 || header[0] != SEQUENCE_ID_COLUMN || header[1] != HIT_RANK_COLUMN {
            return Err(MergeFormatError::new(
                path,
                1,
                format!("header must start with '{SEQUENCE_ID_COLUMN}\\t{HIT_RANK_COLUMN}'"),
            )
            .into());
        }

        let mut records = Vec::new();
        for row in rows {
            let row = decoded(path, row)?;
            records.push(parse_row(path, &row, header.len())?);
        }
        Ok(Self::new(header, records))
    }

    /// Returns the header columns.
    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Returns the records in key order.
    #[must_use]
    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the table has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of duplicate keys dropped while reading.
    #[must_use]
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Number of distinct sequence identifiers.
    #[must_use]
    pub fn distinct_sequences(&self) -> u64 {
        let mut count = 0;
        let mut previous: Option<&str> = None;
        for record in &self.records {
            if previous != Some(record.sequence_id()) {
                count += 1;
                previous = Some(record.sequence_id());
            }
        }
        count
    }

    pub(crate) fn records_mut(&mut self) -> &mut [AnnotationRecord] {
        &mut self.records
    }

    pub(crate) fn into_records(self) -> Vec<AnnotationRecord> {
        self.records
    }

    /// Writes the table, with or without its header row.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be written.
    pub fn write(&self, path: &Path, with_header: bool) -> Result<(), AnnoflowError> {
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(QuoteStyle::Never)
            .flexible(true)
            .from_path(path)?;
        if with_header {
            writer.write_record(&self.header)?;
        }
        for record in &self.records {
            writer.write_record(&record.fields)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn decoded(path: &Path, row: Result<StringRecord, csv::Error>) -> Result<StringRecord, AnnoflowError> {
    row.map_err(|err| match err.kind() {
        csv::ErrorKind::Utf8 { pos, .. } => {
            MergeFormatError::new(path, pos.as_ref().map_or(0, csv::Position::line), "invalid UTF-8").into()
        }
        _ => err.into(),
    })
}

fn parse_row(path: &Path, row: &StringRecord, columns: usize) -> Result<AnnotationRecord, AnnoflowError> {
    let line = row.position().map_or(0, csv::Position::line);
    if row.len() != columns {
        return Err(MergeFormatError::new(
            path,
            line,
            format!("expected {columns} columns, found {}", row.len()),
        )
        .into());
    }
    if row[0].is_empty() {
        return Err(MergeFormatError::new(path, line, "empty sequence identifier").into());
    }
    let hit_rank = row[1].parse::<u64>().map_err(|_| {
        MergeFormatError::new(path, line, format!("hit rank '{}' is not an unsigned integer", &row[1]))
    })?;
    Ok(AnnotationRecord::new(hit_rank, row.iter().map(str::to_string).collect()))
}

/// Result of joining two sorted record lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Joined records, in key order.
    pub records: Vec<AnnotationRecord>,
    /// Keys present on both sides; the left record was kept.
    pub collisions: u64,
}

/// Full outer sort-merge join of two key-sorted record lists.
///
/// When a key occurs on both sides the left record wins.
#[must_use]
pub fn join_sorted(left: Vec<AnnotationRecord>, right: Vec<AnnotationRecord>) -> JoinOutcome {
    let mut records = Vec::with_capacity(left.len() + right.len());
    let mut collisions = 0;
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    loop {
        let ordering = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => l.cmp_key(r),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match ordering {
            Ordering::Less => records.extend(left.next()),
            Ordering::Greater => records.extend(right.next()),
            Ordering::Equal => {
                records.extend(left.next());
                right.next();
                collisions += 1;
            }
        }
    }

    JoinOutcome {
        records,
        collisions,
    }
}
