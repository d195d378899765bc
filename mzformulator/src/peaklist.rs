use std::io::prelude::*;

use mzformula::PeakListProvider;
use mzpeaks::CentroidPeak;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PeakListError {
    #[error("Failed to read the peak list: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Malformed peak list line {line}: {message}")]
    Malformed { line: u64, message: String },
}

/// Reads a delimited peak list with an m/z and an abundance column.
///
/// Fields are tab separated unless another delimiter is given. Blank lines, lines
/// starting with `#` and a header line whose first field is not a number are skipped.
/// Any further columns are ignored.
pub struct PeakListReader<R: Read> {
    handle: R,
    delimiter: u8,
}

impl<R: Read> PeakListReader<R> {
    pub fn new(handle: R) -> Self {
        Self {
            handle,
            delimiter: b'\t',
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn parse_record(
        record: &csv::StringRecord,
        line: u64,
        first: bool,
    ) -> Result<Option<(f64, f32)>, PeakListError> {
        if record.iter().all(|field| field.is_empty()) {
            return Ok(None);
        }
        let mz = record.get(0).unwrap_or_default();
        let mz: f64 = match mz.parse() {
            Ok(mz) => mz,
            Err(_) if first => return Ok(None),
            Err(e) => {
                return Err(PeakListError::Malformed {
                    line,
                    message: format!("m/z `{mz}`: {e}"),
                })
            }
        };
        let abundance = match record.get(1).filter(|a| !a.is_empty()) {
            Some(a) => a.parse().map_err(|e| PeakListError::Malformed {
                line,
                message: format!("abundance `{a}`: {e}"),
            })?,
            None => {
                return Err(PeakListError::Malformed {
                    line,
                    message: "missing abundance column".to_string(),
                })
            }
        };
        Ok(Some((mz, abundance)))
    }
}

impl<R: Read> PeakListProvider for PeakListReader<R> {
    type Error = PeakListError;

    fn peaks(&mut self) -> Result<Vec<CentroidPeak>, Self::Error> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .has_headers(false)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(&mut self.handle);

        let mut peaks = Vec::new();
        for (i, record) in csv_reader.records().enumerate() {
            let record = record?;
            let line = record
                .position()
                .map(|p| p.line())
                .unwrap_or(i as u64 + 1);
            if let Some((mz, abundance)) = Self::parse_record(&record, line, i == 0)? {
                let index = peaks.len() as u32;
                peaks.push(CentroidPeak::new(mz, abundance, index));
            }
        }
        debug!("Read {} peaks", peaks.len());
        Ok(peaks)
    }
}
