use std::io::{self, prelude::*};
use std::path::Path;

use serde_json::{Map, Value};

use mzformula::aggregate::UNASSIGNED_LABEL;
use mzformula::elements::ELEMENTS;
use mzformula::{Assignment, AssignmentStatus, FormulaMatch, IonType, SearchSettings};

/// The fixed columns of an export, followed by one column per element or isotope used
pub const COLUMNS: &[&str] = &[
    "Index",
    "m/z",
    "Calculated m/z",
    "Peak Height",
    "Ion Charge",
    "m/z Error (ppm)",
    "Abundance Error (%)",
    "DBE",
    "H/C",
    "O/C",
    "Heteroatom Class",
    "Ion Type",
    "Adduct",
    "Is Isotopologue",
    "Mono Isotopic Index",
    "Molecular Formula",
    "Assignment Status",
];

/// Columns written only when requested, after [`COLUMNS`]
pub const ADDITIONAL_COLUMNS: &[&str] = &[
    "Aromaticity Index",
    "NOSC",
    "Aromaticity Index (modified)",
];

/// One line of an export. Each remaining match of a peak becomes a row, followed by
/// a row for every isotopologue observed for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub index: u32,
    pub mz: f64,
    pub mz_calc: Option<f64>,
    pub abundance: f32,
    pub charge: Option<i32>,
    pub error_ppm: Option<f64>,
    pub abundance_error: Option<f64>,
    pub dbe: Option<f64>,
    pub h_c: Option<f64>,
    pub o_c: Option<f64>,
    pub aromaticity_index: Option<f64>,
    pub nosc: Option<f64>,
    pub aromaticity_index_mod: Option<f64>,
    pub class_label: String,
    pub ion_type: Option<IonType>,
    pub is_isotopologue: bool,
    pub mono_index: Option<u32>,
    pub formula: Option<String>,
    pub status: AssignmentStatus,
    pub counts: Vec<(String, u32)>,
}

impl ExportRow {
    fn unassigned(assignment: &Assignment) -> Self {
        Self {
            index: assignment.peak.index,
            mz: assignment.peak.mz,
            mz_calc: None,
            abundance: assignment.peak.intensity,
            charge: None,
            error_ppm: None,
            abundance_error: None,
            dbe: None,
            h_c: None,
            o_c: None,
            aromaticity_index: None,
            nosc: None,
            aromaticity_index_mod: None,
            class_label: UNASSIGNED_LABEL.to_string(),
            ion_type: None,
            is_isotopologue: false,
            mono_index: None,
            formula: None,
            status: assignment.status,
            counts: Vec::new(),
        }
    }

    fn monoisotopic(assignment: &Assignment, m: &FormulaMatch) -> Self {
        Self {
            index: assignment.peak.index,
            mz: assignment.peak.mz,
            mz_calc: Some(m.mz_calc),
            abundance: assignment.peak.intensity,
            charge: Some(m.charge),
            error_ppm: Some(m.error_ppm),
            abundance_error: None,
            dbe: Some(m.candidate.dbe),
            h_c: Some(m.candidate.h_c),
            o_c: Some(m.candidate.o_c),
            aromaticity_index: Some(m.candidate.composition.aromaticity_index(false)),
            nosc: Some(m.candidate.composition.nosc()),
            aromaticity_index_mod: Some(m.candidate.composition.aromaticity_index(true)),
            class_label: m.class_label().to_string(),
            ion_type: Some(m.ion_type.clone()),
            is_isotopologue: false,
            mono_index: None,
            formula: Some(m.formula()),
            status: assignment.status,
            counts: m
                .candidate
                .composition
                .iter()
                .map(|(e, n)| (e.symbol.to_string(), n))
                .collect(),
        }
    }

    fn isotopologues(assignment: &Assignment, m: &FormulaMatch) -> Vec<Self> {
        m.corroborating()
            .filter_map(|iso| {
                let peak = iso.peak.as_ref()?;
                Some(Self {
                    index: peak.index,
                    mz: peak.mz,
                    mz_calc: Some(iso.mz_calc),
                    abundance: peak.intensity,
                    charge: Some(m.charge),
                    error_ppm: iso.error_ppm,
                    abundance_error: iso.abundance_error,
                    dbe: Some(m.candidate.dbe),
                    h_c: Some(m.candidate.h_c),
                    o_c: Some(m.candidate.o_c),
                    aromaticity_index: Some(m.candidate.composition.aromaticity_index(false)),
                    nosc: Some(m.candidate.composition.nosc()),
                    aromaticity_index_mod: Some(m.candidate.composition.aromaticity_index(true)),
                    class_label: m.class_label().to_string(),
                    ion_type: Some(m.ion_type.clone()),
                    is_isotopologue: true,
                    mono_index: Some(assignment.peak.index),
                    formula: Some(iso.isotopologue.label().to_string()),
                    status: assignment.status,
                    counts: iso.isotopologue.counts(&m.candidate.composition),
                })
            })
            .collect()
    }

    fn count(&self, column: &str) -> Option<u32> {
        self.counts
            .iter()
            .find(|(label, _)| label == column)
            .map(|(_, n)| *n)
    }

    fn values(&self, additional_columns: bool) -> Vec<Value> {
        let mut values = vec![
            self.index.into(),
            self.mz.into(),
            self.mz_calc.into(),
            (self.abundance as f64).into(),
            self.charge.into(),
            self.error_ppm.into(),
            self.abundance_error.into(),
            self.dbe.into(),
            self.h_c.into(),
            self.o_c.into(),
            self.class_label.clone().into(),
            self.ion_type.as_ref().map(|t| t.to_string()).into(),
            self.ion_type
                .as_ref()
                .and_then(|t| t.adduct_element())
                .map(|s| s.to_string())
                .into(),
            u8::from(self.is_isotopologue).into(),
            self.mono_index.into(),
            self.formula.clone().into(),
            self.status.to_string().into(),
        ];
        if additional_columns {
            values.extend([
                self.aromaticity_index.into(),
                self.nosc.into(),
                self.aromaticity_index_mod.into(),
            ]);
        }
        values
    }
}

/// Flatten assignments into rows: assigned peaks in order with their isotopologues
/// inline, then every unassigned peak
pub fn export_rows(assignments: &[Assignment]) -> Vec<ExportRow> {
    let mut rows = Vec::new();
    for assignment in assignments.iter() {
        for m in assignment.matches.iter() {
            rows.push(ExportRow::monoisotopic(assignment, m));
            rows.extend(ExportRow::isotopologues(assignment, m));
        }
    }
    rows.extend(
        assignments
            .iter()
            .filter(|a| a.matches.is_empty())
            .map(ExportRow::unassigned),
    );
    rows
}

/// The element and isotope columns used by `rows`, each element followed by its
/// minor isotopes, in element table order
pub fn element_columns(rows: &[ExportRow]) -> Vec<String> {
    ELEMENTS
        .iter()
        .flat_map(|e| {
            std::iter::once(e.symbol.to_string()).chain(
                e.minor_isotopes()
                    .iter()
                    .map(move |iso| format!("{}{}", iso.neutrons, e.symbol)),
            )
        })
        .filter(|label| rows.iter().any(|r| r.count(label).is_some()))
        .collect()
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        v => v.to_string(),
    }
}

fn header(additional_columns: bool) -> impl Iterator<Item = &'static str> {
    let additional: &[&str] = if additional_columns {
        ADDITIONAL_COLUMNS
    } else {
        &[]
    };
    COLUMNS.iter().chain(additional.iter()).copied()
}

pub fn write_tsv<W: Write>(
    writer: W,
    rows: &[ExportRow],
    additional_columns: bool,
) -> Result<(), csv::Error> {
    let element_columns = element_columns(rows);
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    let mut columns: Vec<&str> = header(additional_columns).collect();
    columns.extend(element_columns.iter().map(String::as_str));
    csv_writer.write_record(&columns)?;
    for row in rows {
        csv_writer.write_record(
            row.values(additional_columns)
                .iter()
                .map(format_value)
                .chain(
                    element_columns
                        .iter()
                        .map(|c| row.count(c).map(|n| n.to_string()).unwrap_or_default()),
                ),
        )?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_json<W: Write>(
    writer: &mut W,
    rows: &[ExportRow],
    additional_columns: bool,
) -> io::Result<()> {
    let element_columns = element_columns(rows);
    let records: Vec<Value> = rows
        .iter()
        .map(|row| {
            let mut record = Map::new();
            for (key, value) in header(additional_columns).zip(row.values(additional_columns)) {
                record.insert(key.to_string(), value);
            }
            for column in element_columns.iter() {
                if let Some(n) = row.count(column) {
                    record.insert(column.clone(), n.into());
                }
            }
            Value::Object(record)
        })
        .collect();
    serde_json::to_writer_pretty(&mut *writer, &records)?;
    writeln!(writer)?;
    Ok(())
}

/// The path of the settings file written alongside an output file
pub fn settings_path(output_file: &Path) -> std::path::PathBuf {
    output_file.with_extension("settings.json")
}

/// Write the search parameters of a run as JSON
pub fn write_settings<W: Write>(writer: &mut W, settings: &SearchSettings) -> io::Result<()> {
    let value = serde_json::json!({
        "mzformulator": option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
        "search": settings,
    });
    serde_json::to_writer_pretty(&mut *writer, &value)?;
    writeln!(writer)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use mzformula::isotopologue::{IsotopologueMatch, IsotopologuePredictor};
    use mzformula::FormulaCandidate;
    use mzpeaks::CentroidPeak;

    use super::*;

    fn assignments() -> Vec<Assignment> {
        let candidate = FormulaCandidate::from_composition("C10H12O2".parse().unwrap());
        let mut m = FormulaMatch::new(candidate, IonType::Protonated, 1, 165.0910, 0.5);
        let isotopologue = IsotopologuePredictor::default()
            .enumerate(&m.candidate.composition, 0.0)
            .into_iter()
            .next()
            .unwrap();
        m.isotopologues.push(IsotopologueMatch {
            isotopologue,
            mz_calc: 166.0943,
            expected_abundance: 108.0,
            peak: Some(CentroidPeak::new(166.0943, 110.0, 1)),
            error_ppm: Some(0.1),
            abundance_error: Some(-1.8),
        });
        vec![
            Assignment::new(CentroidPeak::new(150.0, 5.0, 2), vec![]),
            Assignment::new(CentroidPeak::new(165.0910, 1000.0, 0), vec![m]),
        ]
    }

    #[test]
    fn test_row_order() {
        let rows = export_rows(&assignments());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].index, 0);
        assert!(rows[1].is_isotopologue);
        assert_eq!(rows[1].mono_index, Some(0));
        assert_eq!(rows[1].formula.as_deref(), Some("C9 13C1 H12 O2"));
        assert_eq!(rows[2].class_label, UNASSIGNED_LABEL);
        assert_eq!(element_columns(&rows), vec!["C", "13C", "H", "O"]);
    }

    #[test]
    fn test_write_tsv() {
        let rows = export_rows(&assignments());
        let mut buf = Vec::new();
        write_tsv(&mut buf, &rows, false).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        let header: Vec<_> = lines[0].split('\t').collect();
        assert_eq!(header.len(), COLUMNS.len() + 4);
        assert_eq!(header[COLUMNS.len()], "C");
        let first: Vec<_> = lines[1].split('\t').collect();
        assert_eq!(first[15], "C10H12O2");
        assert_eq!(first[COLUMNS.len()], "10");
        assert_eq!(first[COLUMNS.len() + 1], "");
        let unassigned: Vec<_> = lines[3].split('\t').collect();
        assert_eq!(unassigned[10], UNASSIGNED_LABEL);
        assert_eq!(unassigned[16], "NoAssignmentFound");
    }

    #[test]
    fn test_write_json() {
        let rows = export_rows(&assignments());
        let mut buf = Vec::new();
        write_json(&mut buf, &rows, false).unwrap();
        let value: Value = serde_json::from_slice(&buf).unwrap();
        let records = value.as_array().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["Molecular Formula"], "C10H12O2");
        assert_eq!(records[1]["13C"], 1);
        assert_eq!(records[1]["Is Isotopologue"], 1);
        assert!(records[2]["Calculated m/z"].is_null());
    }

    #[test]
    fn test_additional_columns() {
        let rows = export_rows(&assignments());
        let mut buf = Vec::new();
        write_tsv(&mut buf, &rows, true).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<Vec<_>> = text.lines().map(|l| l.split('\t').collect()).collect();
        let width = COLUMNS.len() + ADDITIONAL_COLUMNS.len();
        assert_eq!(lines[0].len(), width + 4);
        assert_eq!(lines[0][COLUMNS.len()], "Aromaticity Index");
        assert_eq!(lines[0][width], "C");
        // C10H12O2 = 1 + 10 - 2 - 6 over 10 - 2
        let ai: f64 = lines[1][COLUMNS.len()].parse().unwrap();
        assert!((ai - 3.0 / 8.0).abs() < 1e-12);
        assert_eq!(lines[1][width], "10");
        assert_eq!(lines[3][COLUMNS.len() + 1], "");

        let mut buf = Vec::new();
        write_json(&mut buf, &rows, true).unwrap();
        let value: Value = serde_json::from_slice(&buf).unwrap();
        let nosc = value[0]["NOSC"].as_f64().unwrap();
        assert!((nosc - (4.0 - 48.0 / 10.0)).abs() < 1e-12);
        assert!(value[2]["Aromaticity Index (modified)"].is_null());

        let mut buf = Vec::new();
        write_json(&mut buf, &rows, false).unwrap();
        let value: Value = serde_json::from_slice(&buf).unwrap();
        assert!(value[0].get("NOSC").is_none());
    }

    #[test]
    fn test_write_settings() {
        assert_eq!(
            settings_path(Path::new("out/assignments.tsv")),
            Path::new("out/assignments.settings.json")
        );
        let mut buf = Vec::new();
        write_settings(&mut buf, &SearchSettings::default()).unwrap();
        let value: Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(
            value["search"]["max_ppm_error"].as_f64(),
            Some(SearchSettings::default().max_ppm_error)
        );
    }
}
