//! CSV reading and source institution detection

use std::io::Read;

use csv::{ByteRecord, ReaderBuilder};
use tracing::{debug, warn};

use crate::config::{IngestConfig, SourceConfig};
use crate::error::{Error, MalformedRowError, Result};
use crate::models::{FailedRow, RawRow};

/// A parsed CSV upload: its headers, every readable data row, and the
/// records that could not be decoded
#[derive(Debug, Clone)]
pub struct CsvBatch {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    /// Records that failed to decode, in file order
    pub unreadable: Vec<FailedRow>,
}

impl CsvBatch {
    /// Every record in the file, readable or not
    pub fn record_count(&self) -> usize {
        self.rows.len() + self.unreadable.len()
    }
}

/// Read a CSV export into raw rows keyed by header
///
/// Only an unreadable header line fails the whole file. A record that is not
/// valid UTF-8, that the CSV parser rejects, or that carries data past the
/// last header column becomes an entry in `unreadable` and reading goes on.
///
/// Rows shorter than the header simply lack the trailing columns; the
/// normalizer reports those as malformed if it needs them.
pub fn read_csv<R: Read>(reader: R) -> Result<CsvBatch> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr
        .byte_headers()?
        .iter()
        .map(|h| {
            std::str::from_utf8(h)
                .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
                .map_err(|e| Error::InvalidData(format!("CSV header is not valid UTF-8: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::new();
    let mut unreadable = Vec::new();
    let mut record = ByteRecord::new();

    loop {
        match rdr.read_byte_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                let line = e
                    .position()
                    .map(|p| p.line())
                    .unwrap_or((rows.len() + unreadable.len()) as u64 + 2);
                warn!("line {}: unreadable CSV record: {}", line, e);
                unreadable.push(FailedRow {
                    row: RawRow::new(line),
                    error: MalformedRowError::UnreadableRecord {
                        reason: e.to_string(),
                    }
                    .into(),
                });
                continue;
            }
        }

        // Skip blank trailing lines some banks append
        if record.iter().all(is_blank) {
            continue;
        }

        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or((rows.len() + unreadable.len()) as u64 + 2);
        match decode_record(&headers, &record, line) {
            Ok(row) => rows.push(row),
            Err(failed) => {
                warn!("line {}: {}", line, failed.error);
                unreadable.push(failed);
            }
        }
    }

    debug!(
        "Read {} rows ({} unreadable) with {} columns",
        rows.len(),
        unreadable.len(),
        headers.len()
    );
    Ok(CsvBatch {
        headers,
        rows,
        unreadable,
    })
}

fn is_blank(field: &[u8]) -> bool {
    field.iter().all(u8::is_ascii_whitespace)
}

/// Decode one record field by field. Undecodable bytes are kept lossily in
/// the failed row so the history shows what the bank sent.
fn decode_record(
    headers: &[String],
    record: &ByteRecord,
    line: u64,
) -> std::result::Result<RawRow, FailedRow> {
    let mut row = RawRow::new(line);
    let mut error = None;

    for (i, field) in record.iter().enumerate() {
        let value = match std::str::from_utf8(field) {
            Ok(value) => value.to_string(),
            Err(e) => {
                error.get_or_insert_with(|| MalformedRowError::UnreadableRecord {
                    reason: format!("field {} is not valid UTF-8: {}", i + 1, e),
                });
                String::from_utf8_lossy(field).into_owned()
            }
        };
        let key = match headers.get(i) {
            Some(header) => header.clone(),
            None if is_blank(field) => continue,
            None => format!("#{}", i + 1),
        };
        row.fields.insert(key, value);
    }

    if error.is_none() && record.iter().skip(headers.len()).any(|f| !is_blank(f)) {
        error = Some(MalformedRowError::ExtraFields {
            expected: headers.len(),
            found: record.len(),
        });
    }

    match error {
        Some(error) => Err(FailedRow {
            row,
            error: error.into(),
        }),
        None => Ok(row),
    }
}

/// Pick the first configured source whose header signature matches
///
/// Returns None if no source recognizes the headers.
pub fn detect_source<'c>(config: &'c IngestConfig, headers: &[String]) -> Option<&'c SourceConfig> {
    let has = |name: &String| headers.iter().any(|h| h == name);

    config.sources.iter().find(|source| {
        let rule = &source.detect;
        !rule.headers.is_empty()
            && rule.headers.iter().all(has)
            && !rule.absent_headers.iter().any(has)
    })
}
