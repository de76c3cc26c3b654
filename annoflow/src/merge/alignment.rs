//! Alignment record concatenation.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::identifiers::{checked_line, line_number};
use crate::errors::{AnnoflowError, MergeFormatError};

/// Appends every member's alignment records to `output`, in member order.
///
/// Blank lines are dropped. Returns the number of records written.
///
/// # Errors
///
/// Returns a merge format error for a line without a query identifier and an
/// IO error for a missing member.
pub fn concatenate<P: AsRef<Path>>(members: &[P], output: &Path) -> Result<u64, AnnoflowError> {
    let mut writer = BufWriter::new(File::create(output)?);
    let written = copy_records(members, &mut writer)?;
    writer.flush()?;
    Ok(written)
}

/// Checks every record of one alignment file and returns the record count.
///
/// # Errors
///
/// Same as [`concatenate`].
pub fn count_records(path: &Path) -> Result<u64, AnnoflowError> {
    copy_records(&[path], &mut io::sink())
}

fn copy_records<P: AsRef<Path>>(members: &[P], writer: &mut impl Write) -> Result<u64, AnnoflowError> {
    let mut written = 0;

    for member in members {
        let member = member.as_ref();
        let reader = BufReader::new(File::open(member)?);
        for (index, line) in reader.lines().enumerate() {
            let line = checked_line(line, member, index)?;
            if line.is_empty() {
                continue;
            }
            match line.split_once('\t') {
                Some((query, _)) if !query.is_empty() => {}
                _ => {
                    return Err(MergeFormatError::new(
                        member,
                        line_number(index),
                        "expected a tab-separated record starting with the query identifier",
                    )
                    .into());
                }
            }
            writeln!(writer, "{line}")?;
            written += 1;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concatenate_keeps_member_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.tsv");
        let b = dir.path().join("b.tsv");
        let out = dir.path().join("out.tsv");
        std::fs::write(&a, "s1\thitA\t98.1\n\ns2\thitB\t75.0\n").unwrap();
        std::fs::write(&b, "s3\thitC\t60.2\n").unwrap();

        assert_eq!(concatenate(&[&a, &b], &out).unwrap(), 3);
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "s1\thitA\t98.1\ns2\thitB\t75.0\ns3\thitC\t60.2\n"
        );
    }

    #[test]
    fn test_empty_members_produce_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.tsv");
        let out = dir.path().join("out.tsv");
        std::fs::write(&a, "").unwrap();

        assert_eq!(concatenate(&[&a], &out).unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "");
    }

    #[test]
    fn test_line_without_query_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.tsv");
        std::fs::write(&a, "s1\thit\n\tno_query\n").unwrap();

        let err = concatenate(&[&a], &dir.path().join("out.tsv")).unwrap_err();
        assert!(matches!(err, AnnoflowError::MergeFormat(ref e) if e.record == 2 && e.path == a));
    }

    #[test]
    fn test_invalid_utf8_names_member_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.tsv");
        let b = dir.path().join("b.tsv");
        std::fs::write(&a, "s1\thit\n").unwrap();
        std::fs::write(&b, b"s2\thit\nCaf\xe9\thit\n").unwrap();

        match concatenate(&[&a, &b], &dir.path().join("out.tsv")).unwrap_err() {
            AnnoflowError::MergeFormat(e) => {
                assert_eq!(e.path, b);
                assert_eq!(e.record, 2);
                assert_eq!(e.reason, "invalid UTF-8");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_count_records_validates_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.tsv");
        std::fs::write(&a, "s1\thit\n\ns2\thit\n").unwrap();
        assert_eq!(count_records(&a).unwrap(), 2);

        std::fs::write(&a, "s1\thit\nbroken\n").unwrap();
        let err = count_records(&a).unwrap_err();
        assert!(matches!(err, AnnoflowError::MergeFormat(ref e) if e.record == 2));
    }

    #[test]
    fn test_missing_member_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = concatenate(&[dir.path().join("missing.tsv")], &dir.path().join("out.tsv"))
            .unwrap_err();
        assert!(matches!(err, AnnoflowError::Io(_)));
    }
}
