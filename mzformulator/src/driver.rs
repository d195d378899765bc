use std::fs;
use std::io::{self, prelude::*};
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use mzformula::{
    CacheDescriptor, ClassStatus, FormulaSearchEngine, RunReport, SearchError, SearchResult,
    SearchSettings,
};

use crate::args::{ArgElementRange, ArgErrorMethod, ArgIonType, ArgOutputFormat};
use crate::peaklist::PeakListReader;
use crate::write::{export_rows, settings_path, write_json, write_settings, write_tsv};

#[derive(Debug, Error)]
pub enum MZFormulatorError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to write the assignments: {0}")]
    CsvError(#[from] csv::Error),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("Failed to load the configuration: {0}")]
    Config(#[from] figment::Error),
    #[error("Failed to build the thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Molecular formula assignment of centroided mass spectrum peak lists.
///
/// Read a peak list of m/z and abundance pairs, assign candidate formulas from a
/// persistent formula cache, and write out one row per assignment.
#[derive(Parser, Debug, Deserialize, Serialize)]
#[command(author, version)]
#[serde(default)]
pub struct MZFormulator {
    /// The path to read the peak list from, or if '-' is passed, read from STDIN
    #[arg(default_value = "-")]
    pub input_file: String,

    /// The path to write the assignments to, or if '-' is passed, write to STDOUT
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    /// The path of the formula cache database, created if it does not exist
    #[arg(short = 'c', long = "cache-path", default_value = "molecular_formulas.sqlite")]
    pub cache_path: PathBuf,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzformulator.toml` in the working directory.
    /// Environment variables prefixed with `MZFORMULATOR_` will be read too, with `__`
    /// separating nested keys, e.g. `MZFORMULATOR_SEARCH__MAX_PPM_ERROR`.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(
        short='t',
        long="threads",
        default_value_t=-1,
    )]
    pub threads: i32,

    /// Only populate the formula cache, do not read or search any peaks
    #[arg(long = "prime-only")]
    pub prime_only: bool,

    /// The format to write assignments in
    #[arg(short = 'f', long = "output-format", default_value = "tsv")]
    pub output_format: ArgOutputFormat,

    /// An element's count range denoted (symbol):(min)-(max) or (symbol):(max)
    #[arg(
        short = 'e',
        long = "element-range",
        value_name = "SYMBOL:MIN-MAX",
        long_help = r#"An element's count range denoted (symbol):(min)-(max) or (symbol):(max)

May be passed more than once. When given, these replace the configured element
ranges entirely, so C and H must be included.
"#
    )]
    pub element_ranges: Vec<ArgElementRange>,

    /// The lower bound of the ppm error window
    #[arg(long = "min-ppm-error", allow_hyphen_values = true)]
    pub min_ppm_error: Option<f64>,

    /// The upper bound of the ppm error window
    #[arg(long = "max-ppm-error", allow_hyphen_values = true)]
    pub max_ppm_error: Option<f64>,

    /// How the ppm error window adapts as peaks are assigned
    #[arg(short = 'm', long = "error-method")]
    pub error_method: Option<ArgErrorMethod>,

    /// The ion types to consider, replacing the configured ones when given
    #[arg(short = 'i', long = "ion-type")]
    pub ion_types: Vec<ArgIonType>,

    /// The charge of the ions, negative for negative mode
    #[arg(short = 'z', long = "charge", allow_hyphen_values = true)]
    pub charge: Option<i32>,

    /// Stop at the first candidate found for each peak
    #[arg(long = "first-hit")]
    pub first_hit: bool,

    /// Do not search for isotopologues of matched formulas
    #[arg(long = "no-isotopologues")]
    pub no_isotopologues: bool,

    /// Report every match for each peak instead of selecting the best
    #[arg(long = "no-select")]
    pub no_select: bool,

    /// Also write the aromaticity index, its modified form and the nominal oxidation
    /// state of carbon for each assignment
    #[arg(long = "additional-columns")]
    pub additional_columns: bool,

    #[arg(
        skip,
        help = "The search parameters read from the configuration, before command line overrides"
    )]
    pub search: SearchSettings,
}

impl Default for MZFormulator {
    fn default() -> Self {
        Self {
            input_file: "-".to_string(),
            output_file: PathBuf::from("-"),
            cache_path: PathBuf::from("molecular_formulas.sqlite"),
            log_file: None,
            config_file: None,
            threads: -1,
            prime_only: false,
            output_format: ArgOutputFormat::Tsv,
            element_ranges: Vec::new(),
            min_ppm_error: None,
            max_ppm_error: None,
            error_method: None,
            ion_types: Vec::new(),
            charge: None,
            first_hit: false,
            no_isotopologues: false,
            no_select: false,
            additional_columns: false,
            search: SearchSettings::default(),
        }
    }
}

impl MZFormulator {
    fn create_threadpool(&self) -> Result<rayon::ThreadPool, MZFormulatorError> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        };
        debug!("Using {} cores", num_threads);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?;
        Ok(pool)
    }

    /// The search parameters after applying command line overrides to [`MZFormulator::search`]
    pub fn search_settings(&self) -> SearchSettings {
        let mut settings = self.search.clone();
        if !self.element_ranges.is_empty() {
            settings.element_ranges = self
                .element_ranges
                .iter()
                .cloned()
                .map(Into::into)
                .collect();
        }
        if let Some(v) = self.min_ppm_error {
            settings.min_ppm_error = v;
        }
        if let Some(v) = self.max_ppm_error {
            settings.max_ppm_error = v;
        }
        if let Some(method) = self.error_method {
            settings.error_method = method.into();
        }
        if !self.ion_types.is_empty() {
            settings.ion_modes.protonated = self.ion_types.contains(&ArgIonType::Protonated);
            settings.ion_modes.radical = self.ion_types.contains(&ArgIonType::Radical);
            settings.ion_modes.adduct = self.ion_types.contains(&ArgIonType::Adduct);
        }
        if let Some(charge) = self.charge {
            settings.ion_charge = charge;
        }
        if self.first_hit {
            settings.first_hit = true;
        }
        if self.no_isotopologues {
            settings.search_isotopologues = false;
        }
        if self.no_select {
            settings.select_best = false;
        }
        settings
    }

    pub fn main(&self) -> Result<(), MZFormulatorError> {
        info!(
            "mzformulator v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file);
        info!("Output: {}", self.output_file.display());
        info!("Cache: {}", self.cache_path.display());
        self.create_threadpool()?.install(|| self.run())
    }

    fn open_input(&self) -> io::Result<Box<dyn BufRead>> {
        if self.input_file == "-" {
            Ok(Box::new(io::stdin().lock()))
        } else {
            let handle = fs::File::open(&self.input_file)?;
            Ok(Box::new(io::BufReader::new(handle)))
        }
    }

    fn run(&self) -> Result<(), MZFormulatorError> {
        let settings = self.search_settings();
        match toml::to_string_pretty(&settings) {
            Ok(text) => debug!("Search settings:\n{text}"),
            Err(e) => warn!("Failed to render the search settings: {e}"),
        }

        let input = if self.prime_only {
            None
        } else {
            Some(self.open_input()?)
        };

        let engine = FormulaSearchEngine::open(CacheDescriptor::new(&self.cache_path))?;
        let start = Instant::now();

        let Some(input) = input else {
            let report = engine.prime_cache(&settings)?;
            self.log_failures(&report);
            info!(
                "Cache holds {} formulas after {:0.3} seconds",
                engine.cache().row_count().map_err(SearchError::from)?,
                start.elapsed().as_secs_f64()
            );
            return Ok(());
        };

        let mut reader = PeakListReader::new(input);
        if self.input_file.ends_with(".csv") {
            reader = reader.with_delimiter(b',');
        }
        let result = engine.search_provider(&settings, &mut reader)?;

        self.log_failures(&result.report);
        self.log_class_summaries(&result);
        self.write_output(&result)?;
        self.write_settings(&settings)?;
        info!(
            "Finished in {:0.3} seconds",
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    fn log_failures(&self, report: &RunReport) {
        for class in report.failures() {
            if let ClassStatus::Failed(failure) = &class.status {
                warn!(
                    "Class {} was skipped ({:?}): {}",
                    class.class_label, failure.kind, failure.message
                );
            }
        }
    }

    fn log_class_summaries(&self, result: &SearchResult) {
        let totals = &result.report.totals;
        info!(
            "Peaks: {} | Assigned: {} | Ambiguous: {} | Unresolved: {} | Unassigned: {} | Isotopologues: {}",
            totals.peaks,
            totals.assigned,
            totals.ambiguous,
            totals.unresolved,
            totals.unassigned,
            totals.isotopologues_matched
        );
        for summary in result.by_class().summaries() {
            info!(
                "{}: {} peaks, {:0.2}% of assigned abundance",
                summary.class_label,
                summary.peak_count,
                summary.relative_abundance
            );
        }
    }

    fn write_output(&self, result: &SearchResult) -> Result<(), MZFormulatorError> {
        let rows = export_rows(&result.assignments);
        debug!("Writing {} rows", rows.len());
        let mut writer: Box<dyn Write> = if self.output_file.as_os_str() == "-" {
            Box::new(io::BufWriter::new(io::stdout().lock()))
        } else {
            Box::new(io::BufWriter::new(fs::File::create(&self.output_file)?))
        };
        match self.output_format {
            ArgOutputFormat::Tsv => write_tsv(&mut writer, &rows, self.additional_columns)?,
            ArgOutputFormat::Json => write_json(&mut writer, &rows, self.additional_columns)?,
        }
        writer.flush()?;
        Ok(())
    }

    /// Record the search parameters next to the output file. Nothing is written when
    /// the output goes to STDOUT.
    fn write_settings(&self, settings: &SearchSettings) -> Result<(), MZFormulatorError> {
        if self.output_file.as_os_str() == "-" {
            return Ok(());
        }
        let path = settings_path(&self.output_file);
        debug!("Writing search settings to {}", path.display());
        let mut writer = io::BufWriter::new(fs::File::create(&path)?);
        write_settings(&mut writer, settings)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use mzformula::{ErrorMethod, IonModes};

    use super::*;

    #[test]
    fn test_command_line_overrides() {
        let args = MZFormulator::try_parse_from([
            "mzformulator",
            "peaks.tsv",
            "-e",
            "C:1-20",
            "-e",
            "H:40",
            "--min-ppm-error",
            "-3",
            "-m",
            "symmetrical",
            "-i",
            "radical",
            "-i",
            "adduct",
            "-z",
            "-1",
            "--no-select",
        ])
        .unwrap();
        assert_eq!(args.output_file, PathBuf::from("-"));
        let settings = args.search_settings();
        assert_eq!(settings.element_ranges.len(), 2);
        assert_eq!(settings.element_ranges[1].min, 0);
        assert_eq!(settings.min_ppm_error, -3.0);
        assert_eq!(settings.max_ppm_error, SearchSettings::default().max_ppm_error);
        assert_eq!(settings.error_method, ErrorMethod::Symmetrical);
        assert!(!settings.ion_modes.protonated);
        assert!(settings.ion_modes.radical && settings.ion_modes.adduct);
        assert_eq!(settings.ion_charge, -1);
        assert!(!settings.select_best);
        assert!(settings.search_isotopologues);
    }

    #[test]
    fn test_no_overrides() {
        let args = MZFormulator::try_parse_from(["mzformulator"]).unwrap();
        assert_eq!(args.input_file, "-");
        assert_eq!(args.output_format, ArgOutputFormat::Tsv);
        let settings = args.search_settings();
        assert_eq!(settings, SearchSettings::default());
        assert_eq!(settings.ion_modes, IonModes::default());
    }
}
