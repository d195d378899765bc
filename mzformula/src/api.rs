//! High level APIs for running a formula search
use std::fmt::Display;

use mzpeaks::CentroidPeak;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::aggregate::ClassAggregator;
use crate::assignment::Assignment;
use crate::cache::{CacheDescriptor, CacheError, FormulaCache};
use crate::constraints::{ConstraintError, HeteroatomClass};
use crate::generator::{FormulaGenerator, GenerationBounds};
use crate::isotopologue::IsotopologuePredictor;
use crate::matcher::{CachedCandidates, PeakMatcher};
use crate::peaks::{PeakListProvider, SpectrumPeaks};
use crate::report::{ClassReport, RunReport};
use crate::selection::SelectionPolicy;
use crate::settings::SearchSettings;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Invalid search constraints: {0}")]
    Constraint(
        #[source]
        #[from]
        ConstraintError,
    ),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("Failed to read peaks: {0}")]
    PeakList(String),
}

/// The outcome of searching one peak list
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// One entry per valid peak, in ascending m/z order
    pub assignments: Vec<Assignment>,
    pub report: RunReport,
}

impl SearchResult {
    pub fn by_class(&self) -> ClassAggregator<'_> {
        ClassAggregator::new(&self.assignments)
    }

    /// The assignment for the peak with `index`
    pub fn get(&self, index: u32) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.peak.index == index)
    }
}

/// Runs searches against one formula cache
#[derive(Debug)]
pub struct FormulaSearchEngine {
    cache: FormulaCache,
    selection: SelectionPolicy,
}

impl FormulaSearchEngine {
    pub fn new(cache: FormulaCache) -> Self {
        Self {
            cache,
            selection: SelectionPolicy::default(),
        }
    }

    pub fn open(descriptor: CacheDescriptor) -> Result<Self, SearchError> {
        Ok(Self::new(FormulaCache::open(descriptor)?))
    }

    pub fn with_selection_policy(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    pub fn cache(&self) -> &FormulaCache {
        &self.cache
    }

    pub fn selection_policy(&self) -> &SelectionPolicy {
        &self.selection
    }

    /// Make every class `settings` allows available in the cache, generating those not
    /// yet covered. Classes are processed in parallel.
    ///
    /// Returns the classes that can be searched and a report entry for every class.
    #[tracing::instrument(skip_all, level = "debug")]
    fn prepare_classes(
        &self,
        settings: &SearchSettings,
    ) -> Result<(Vec<HeteroatomClass>, GenerationBounds, Vec<ClassReport>), SearchError> {
        settings.validate()?;
        let classes = settings.resolver().resolve()?;
        let bounds = settings.generation_bounds()?;
        debug!("Resolved {} heteroatom classes", classes.len());

        let reports = classes
            .par_iter()
            .map(|class| {
                let outcome = self.cache.ensure_class(class, &bounds, || {
                    FormulaGenerator::new(class, bounds)?.generate()
                });
                ClassReport::from_outcome(class.label(), outcome)
            })
            .collect::<Result<Vec<_>, CacheError>>()?;

        let ready = classes
            .into_iter()
            .zip(reports.iter())
            .filter(|(_, report)| !report.status.is_failed())
            .map(|(class, _)| class)
            .collect();
        Ok((ready, bounds, reports))
    }

    /// Populate the cache for `settings` without searching any peaks
    pub fn prime_cache(&self, settings: &SearchSettings) -> Result<RunReport, SearchError> {
        let (_, _, reports) = self.prepare_classes(settings)?;
        let report = RunReport::new(reports);
        info!("{report}");
        Ok(report)
    }

    /// Assign formulas to `peaks`.
    ///
    /// A class which fails to generate is skipped and reported, the rest of the search
    /// proceeds without it. Failures of the cache itself abort the search.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn search(
        &self,
        settings: &SearchSettings,
        peaks: Vec<CentroidPeak>,
    ) -> Result<SearchResult, SearchError> {
        let (classes, bounds, reports) = self.prepare_classes(settings)?;
        let mut report = RunReport::new(reports);

        let spectrum = SpectrumPeaks::new(peaks);
        let source = CachedCandidates::new(&self.cache, bounds);
        let matcher = PeakMatcher::new(settings, &classes, &source)?;
        let mut assignments = matcher.match_spectrum(&spectrum)?;

        if settings.search_isotopologues {
            let predictor = IsotopologuePredictor::from_settings(settings);
            assignments.par_iter_mut().for_each(|assignment| {
                let peak = &assignment.peak;
                assignment.matches.par_iter_mut().for_each(|m| {
                    m.isotopologues = predictor.corroborate(m, peak, &spectrum);
                });
            });
        }

        let mut matches_per_class: Vec<(String, usize)> = Vec::new();
        for m in assignments.iter().flat_map(|a| a.matches.iter()) {
            match matches_per_class
                .iter_mut()
                .find(|(label, _)| label == m.class_label())
            {
                Some((_, n)) => *n += 1,
                None => matches_per_class.push((m.class_label().to_string(), 1)),
            }
        }

        if settings.select_best {
            assignments = assignments
                .iter()
                .map(|a| self.selection.apply(a))
                .collect();
        }

        report.record_assignments(&assignments, &matches_per_class);
        info!("{report}");
        Ok(SearchResult {
            assignments,
            report,
        })
    }

    /// As [`FormulaSearchEngine::search`], reading the peaks from `provider`
    pub fn search_provider<P: PeakListProvider>(
        &self,
        settings: &SearchSettings,
        provider: &mut P,
    ) -> Result<SearchResult, SearchError>
    where
        P::Error: Display,
    {
        let peaks = provider
            .peaks()
            .map_err(|e| SearchError::PeakList(e.to_string()))?;
        self.search(settings, peaks)
    }
}

/// Assign formulas to `peaks` using the cache described by `descriptor`.
///
/// This is a convenience wrapper around [`FormulaSearchEngine`] for one-off searches.
pub fn search_peaks(
    descriptor: CacheDescriptor,
    settings: &SearchSettings,
    peaks: Vec<CentroidPeak>,
) -> Result<SearchResult, SearchError> {
    FormulaSearchEngine::open(descriptor)?.search(settings, peaks)
}
