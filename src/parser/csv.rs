use crate::error::{ItemError, ParseError};
use crate::format::strip_bom;
use csv::{ByteRecord, ByteRecordsIntoIter, ReaderBuilder, Trim};
use feed_types::item::RawRecord;
use std::io::Cursor;

pub const DEFAULT_DELIMITER: u8 = b';';
pub const DELIMITER_CANDIDATES: &[u8] = b";,\t|";
const SAMPLE_LINES: usize = 5;

/// Picks the candidate whose header count repeats on most of the following lines.
/// Ties go to the earlier candidate.
pub fn detect_delimiter(data: &[u8]) -> u8 {
    let lines: Vec<&[u8]> = strip_bom(data)
        .split(|b| *b == b'\n')
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
        .filter(|l| !l.is_empty())
        .take(SAMPLE_LINES)
        .collect();
    let Some((header, rows)) = lines.split_first() else {
        return DEFAULT_DELIMITER;
    };
    let count = |line: &[u8], d: u8| line.iter().filter(|b| **b == d).count();
    let mut best: Option<(u8, usize)> = None;
    for &d in DELIMITER_CANDIDATES {
        let expected = count(header, d);
        if expected == 0 {
            continue;
        }
        let score = rows.iter().filter(|row| count(row, d) == expected).count();
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((d, score));
        }
    }
    best.map(|(d, _)| d).unwrap_or(DEFAULT_DELIMITER)
}

pub struct CsvRecords {
    headers: Vec<String>,
    rows: ByteRecordsIntoIter<Cursor<Vec<u8>>>,
    delimiter: u8,
}

impl CsvRecords {
    pub fn new(data: &[u8], delimiter: Option<u8>, has_header: bool) -> Result<Self, ParseError> {
        let data = strip_bom(data);
        let delimiter = delimiter.unwrap_or_else(|| detect_delimiter(data));
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(Cursor::new(data.to_vec()));
        let mut headers = Vec::new();
        if has_header {
            let mut first = ByteRecord::new();
            if reader.read_byte_record(&mut first)? {
                headers = first.iter().map(field_text).collect();
            }
        }
        Ok(Self {
            headers,
            rows: reader.into_byte_records(),
            delimiter,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    fn zip_row(&self, row: &ByteRecord) -> RawRecord {
        if self.headers.is_empty() {
            return row
                .iter()
                .enumerate()
                .map(|(i, f)| (format!("column_{}", i + 1), field_text(f)))
                .collect();
        }
        self.headers
            .iter()
            .zip(row.iter())
            .map(|(h, f)| (h.clone(), field_text(f)))
            .collect()
    }
}

fn field_text(field: &[u8]) -> String {
    String::from_utf8_lossy(field).trim().to_string()
}

impl Iterator for CsvRecords {
    type Item = Result<RawRecord, ItemError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(
            row.map(|row| self.zip_row(&row))
                .map_err(|err| ItemError::Malformed(err.to_string())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistent_delimiter_wins_over_stray_commas() {
        let data = b"a;b;c\n1;Red, large;3\n4;5;6\n7;8,5;9\n";
        assert_eq!(detect_delimiter(data), b';');
    }

    #[test]
    fn detects_tab_and_pipe() {
        assert_eq!(detect_delimiter(b"a\tb\n1\t2\n"), b'\t');
        assert_eq!(detect_delimiter(b"a|b|c\n1|2|3\n"), b'|');
        assert_eq!(detect_delimiter(b"title,price\r\nA,1\r\n"), b',');
        assert_eq!(detect_delimiter(b"single\nvalue\n"), DEFAULT_DELIMITER);
        assert_eq!(detect_delimiter(b""), DEFAULT_DELIMITER);
    }

    #[test]
    fn short_rows_leave_fields_absent_and_long_rows_are_cut() {
        let data = b"\xEF\xBB\xBFname;price;ean\nA;1\nB;2;3;extra\n";
        let records: Vec<_> = CsvRecords::new(data, None, true)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("name"), Some("A"));
        assert_eq!(records[0].get("ean"), None);
        assert_eq!(records[1].len(), 3);
        assert_eq!(records[1].get("ean"), Some("3"));
    }

    #[test]
    fn tolerates_stray_quotes() {
        let records: Vec<_> = CsvRecords::new(b"name;size\nBoard 2\"x4\";12\n", Some(b';'), true)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(records[0].get("name"), Some("Board 2\"x4\""));
        assert_eq!(records[0].get("size"), Some("12"));
    }

    #[test]
    fn headerless_files_use_positional_names() {
        let mut records = CsvRecords::new(b"A;1\nB;2\n", Some(b';'), false).unwrap();
        let first = records.next().unwrap().unwrap();
        assert_eq!(first.get("column_1"), Some("A"));
        assert_eq!(first.get("column_2"), Some("1"));
        assert_eq!(records.count(), 1);
    }
}
