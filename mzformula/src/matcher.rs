//! Matching peaks against cached formula candidates under a ppm error window which may
//! adapt as matches accumulate.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use mzpeaks::CentroidPeak;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::assignment::{Assignment, FormulaMatch};
use crate::cache::{CacheError, FormulaCache};
use crate::constraints::{ConstraintError, HeteroatomClass};
use crate::formula::{nominal_mass, ppm_error, FormulaCandidate, IonMode};
use crate::generator::GenerationBounds;
use crate::peaks::SpectrumPeaks;
use crate::settings::{ErrorMethod, SearchSettings};

/// Candidates looked up by class label and nominal neutral mass
pub trait CandidateSource: Sync {
    fn candidates(
        &self,
        class_label: &str,
        nominal_mass: i64,
    ) -> Result<Arc<Vec<FormulaCandidate>>, CacheError>;
}

/// Reads candidates from a [`FormulaCache`], keeping those admissible under the run's
/// bounds and remembering each bucket once read.
#[derive(Debug)]
pub struct CachedCandidates<'a> {
    cache: &'a FormulaCache,
    bounds: GenerationBounds,
    memo: Mutex<HashMap<(String, i64), Arc<Vec<FormulaCandidate>>>>,
}

impl<'a> CachedCandidates<'a> {
    pub fn new(cache: &'a FormulaCache, bounds: GenerationBounds) -> Self {
        Self {
            cache,
            bounds,
            memo: Mutex::default(),
        }
    }
}

impl CandidateSource for CachedCandidates<'_> {
    fn candidates(
        &self,
        class_label: &str,
        nominal_mass: i64,
    ) -> Result<Arc<Vec<FormulaCandidate>>, CacheError> {
        let key = (class_label.to_string(), nominal_mass);
        if let Some(hit) = self
            .memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(hit.clone());
        }
        let found = Arc::new(self.cache.fetch_within(class_label, nominal_mass, &self.bounds)?);
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, found.clone());
        Ok(found)
    }
}

/// An in-memory candidate index, bucketed the same way the cache is
#[derive(Debug, Default, Clone)]
pub struct CandidateIndex {
    buckets: HashMap<(String, i64), Arc<Vec<FormulaCandidate>>>,
}

impl CandidateIndex {
    pub fn new(candidates: impl IntoIterator<Item = FormulaCandidate>) -> Self {
        let mut grouped: HashMap<(String, i64), Vec<FormulaCandidate>> = HashMap::new();
        for c in candidates {
            grouped
                .entry((c.class_label.clone(), c.nominal_mass))
                .or_default()
                .push(c);
        }
        let buckets = grouped
            .into_iter()
            .map(|(k, mut v)| {
                v.sort_by(|a, b| a.mass.total_cmp(&b.mass));
                (k, Arc::new(v))
            })
            .collect();
        Self { buckets }
    }
}

impl CandidateSource for CandidateIndex {
    fn candidates(
        &self,
        class_label: &str,
        nominal_mass: i64,
    ) -> Result<Arc<Vec<FormulaCandidate>>, CacheError> {
        Ok(self
            .buckets
            .get(&(class_label.to_string(), nominal_mass))
            .cloned()
            .unwrap_or_default())
    }
}

/// The ppm error window for the next peak.
///
/// The stateful methods use the configured window until the first match is accepted and
/// a window of `mz_error_range` around their center afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveErrorWindow {
    method: ErrorMethod,
    initial: (f64, f64),
    half_width: f64,
    symmetric_center: f64,
    observed: usize,
    error_sum: f64,
    lowest: f64,
    closest: f64,
}

impl AdaptiveErrorWindow {
    pub fn new(settings: &SearchSettings) -> Self {
        Self {
            method: settings.error_method,
            initial: settings.ppm_bounds(),
            half_width: settings.mz_error_range,
            symmetric_center: settings.mz_error_average,
            observed: 0,
            error_sum: 0.0,
            lowest: f64::INFINITY,
            closest: f64::INFINITY,
        }
    }

    pub fn method(&self) -> ErrorMethod {
        self.method
    }

    /// The number of accepted errors observed so far
    pub fn observed(&self) -> usize {
        self.observed
    }

    /// The error the window is centered on, if it has moved from its initial bounds
    pub fn center(&self) -> Option<f64> {
        match self.method {
            ErrorMethod::None => None,
            ErrorMethod::Symmetrical => Some(self.symmetric_center),
            _ if self.observed == 0 => None,
            ErrorMethod::Distance => Some(self.closest),
            ErrorMethod::Lowest => Some(self.lowest),
            ErrorMethod::Average => Some(self.error_sum / self.observed as f64),
        }
    }

    pub fn bounds(&self) -> (f64, f64) {
        match self.center() {
            Some(center) => (center - self.half_width, center + self.half_width),
            None => self.initial,
        }
    }

    /// Record an accepted match's error
    pub fn observe(&mut self, error_ppm: f64) {
        if !self.method.is_stateful() || !error_ppm.is_finite() {
            return;
        }
        self.observed += 1;
        self.error_sum += error_ppm;
        if error_ppm < self.lowest {
            self.lowest = error_ppm;
        }
        if error_ppm.abs() < self.closest.abs() {
            self.closest = error_ppm;
        }
    }
}

/// Evaluates peaks against candidates for every enabled ion mode and class
pub struct PeakMatcher<'a, S: CandidateSource> {
    settings: &'a SearchSettings,
    classes: &'a [HeteroatomClass],
    ion_modes: Vec<IonMode>,
    source: &'a S,
}

impl<'a, S: CandidateSource> PeakMatcher<'a, S> {
    pub fn new(
        settings: &'a SearchSettings,
        classes: &'a [HeteroatomClass],
        source: &'a S,
    ) -> Result<Self, ConstraintError> {
        let ion_modes = settings.ion_mode_list()?;
        Ok(Self {
            settings,
            classes,
            ion_modes,
            source,
        })
    }

    pub fn ion_modes(&self) -> &[IonMode] {
        &self.ion_modes
    }

    /// Every candidate whose ion is within `window` ppm of `peak`, in ion mode, then
    /// class, then ascending mass order
    pub fn match_peak(
        &self,
        peak: &CentroidPeak,
        window: (f64, f64),
    ) -> Result<Vec<FormulaMatch>, CacheError> {
        let (lo, hi) = window;
        let mut matches = Vec::new();
        if lo > hi {
            return Ok(matches);
        }
        // The calculated m/z values which put the error inside the window
        let mz_low = peak.mz / (1.0 + hi * 1e-6);
        let mz_high = peak.mz / (1.0 + lo * 1e-6);

        for mode in self.ion_modes.iter() {
            let a = mode.neutral_mass(mz_low);
            let b = mode.neutral_mass(mz_high);
            let (mass_low, mass_high) = if a <= b { (a, b) } else { (b, a) };
            let nominal_range = nominal_mass(mass_low)..=nominal_mass(mass_high);
            for class in self.classes {
                for nominal in nominal_range.clone() {
                    let candidates = self.source.candidates(class.label(), nominal)?;
                    for candidate in candidates.iter() {
                        let mz_calc = candidate.mz(mode);
                        let error = ppm_error(peak.mz, mz_calc);
                        if lo <= error && error <= hi {
                            matches.push(FormulaMatch::new(
                                candidate.clone(),
                                mode.ion_type.clone(),
                                mode.charge,
                                mz_calc,
                                error,
                            ));
                            if self.settings.first_hit {
                                return Ok(matches);
                            }
                        }
                    }
                }
            }
        }
        Ok(matches)
    }

    /// Match every peak of `spectrum` in its ascending m/z order.
    ///
    /// Peaks are matched in parallel when the error window does not depend on earlier
    /// peaks and sequentially otherwise.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn match_spectrum(&self, spectrum: &SpectrumPeaks) -> Result<Vec<Assignment>, CacheError> {
        let mut window = AdaptiveErrorWindow::new(self.settings);
        let assignments = if window.method().is_stateful() {
            let mut out = Vec::with_capacity(spectrum.len());
            for peak in spectrum.iter() {
                let bounds = window.bounds();
                let matches = self.match_peak(peak, bounds)?;
                for m in matches.iter() {
                    window.observe(m.error_ppm);
                }
                trace!(
                    "{:0.5} matched {} candidates in ({:0.3}, {:0.3})",
                    peak.mz,
                    matches.len(),
                    bounds.0,
                    bounds.1
                );
                out.push(Assignment::new(peak.clone(), matches));
            }
            out
        } else {
            let bounds = window.bounds();
            spectrum
                .as_slice()
                .par_iter()
                .map(|peak| Ok(Assignment::new(peak.clone(), self.match_peak(peak, bounds)?)))
                .collect::<Result<Vec<_>, CacheError>>()?
        };
        debug!(
            "{} of {} peaks matched at least one candidate",
            assignments.iter().filter(|a| a.is_assigned()).count(),
            assignments.len()
        );
        Ok(assignments)
    }
}
