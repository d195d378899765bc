//! `mzformula` assigns molecular formulas to the peaks of high resolution mass spectra.
//!
//! Candidate formulas are enumerated per heteroatom class and stored in a persistent
//! [`FormulaCache`](crate::cache::FormulaCache) keyed by class and nominal mass. Each peak
//! is compared against the candidates of every enabled ion mode within a ppm error
//! window, isotopologues are predicted to corroborate the matches, and a
//! [`SelectionPolicy`](crate::selection::SelectionPolicy) reduces each peak's matches to
//! the best ones.
//!
//! The most direct way to run a search is [`FormulaSearchEngine`](crate::api::FormulaSearchEngine).

pub mod aggregate;
pub mod api;
pub mod assignment;
pub mod cache;
pub mod constraints;
pub mod elements;
pub mod formula;
pub mod generator;
pub mod isotopologue;
pub mod matcher;
pub mod peaks;
pub mod report;
pub mod selection;
pub mod settings;

pub use crate::aggregate::{ClassAggregator, ClassSummary};
pub use crate::api::{search_peaks, FormulaSearchEngine, SearchError, SearchResult};
pub use crate::assignment::{Assignment, AssignmentStatus, FormulaMatch};
pub use crate::cache::{CacheDescriptor, CacheError, FormulaCache};
pub use crate::constraints::{ConstraintError, ConstraintResolver, ElementRange, HeteroatomClass};
pub use crate::formula::{Composition, FormulaCandidate, IonMode, IonType};
pub use crate::generator::{FormulaGenerator, GenerationBounds, GenerationError};
pub use crate::isotopologue::{IsotopologueMatch, IsotopologuePredictor};
pub use crate::matcher::{AdaptiveErrorWindow, CandidateSource, PeakMatcher};
pub use crate::peaks::{PeakListProvider, SpectrumPeaks};
pub use crate::report::{ClassReport, ClassStatus, RunReport, RunTotals};
pub use crate::selection::{SelectionCriterion, SelectionPolicy};
pub use crate::settings::{ErrorMethod, IonModes, SearchSettings};
