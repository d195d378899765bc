//! The formulas matched to a peak and what became of them
use std::fmt::Display;

use mzpeaks::CentroidPeak;

use crate::formula::{FormulaCandidate, IonType};
use crate::isotopologue::IsotopologueMatch;

/// A candidate formula whose ion falls within the error window of a peak
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaMatch {
    pub candidate: FormulaCandidate,
    pub ion_type: IonType,
    pub charge: i32,
    /// The theoretical m/z of the ion
    pub mz_calc: f64,
    /// `(observed - calculated) / calculated * 1e6`
    pub error_ppm: f64,
    /// The isotopologues predicted for this formula, matched or not
    pub isotopologues: Vec<IsotopologueMatch>,
}

impl FormulaMatch {
    pub fn new(
        candidate: FormulaCandidate,
        ion_type: IonType,
        charge: i32,
        mz_calc: f64,
        error_ppm: f64,
    ) -> Self {
        Self {
            candidate,
            ion_type,
            charge,
            mz_calc,
            error_ppm,
            isotopologues: Vec::new(),
        }
    }

    pub fn class_label(&self) -> &str {
        &self.candidate.class_label
    }

    pub fn formula(&self) -> String {
        self.candidate.formula()
    }

    /// Whether any predicted isotopologue was found in the spectrum
    pub fn is_corroborated(&self) -> bool {
        self.isotopologues.iter().any(|i| i.is_matched())
    }

    /// The isotopologues found in the spectrum
    pub fn corroborating(&self) -> impl Iterator<Item = &IsotopologueMatch> {
        self.isotopologues.iter().filter(|i| i.is_matched())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignmentStatus {
    /// No candidate was accepted for the peak
    NoAssignmentFound,
    /// Several candidates were accepted and selection was not applied
    Unresolved,
    /// Exactly one candidate remains
    Assigned,
    /// Several candidates remain tied after selection
    AmbiguousAssignment,
}

impl Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A peak and the formulas matched to it
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub peak: CentroidPeak,
    pub matches: Vec<FormulaMatch>,
    pub status: AssignmentStatus,
}

impl Assignment {
    pub fn new(peak: CentroidPeak, matches: Vec<FormulaMatch>) -> Self {
        let status = match matches.len() {
            0 => AssignmentStatus::NoAssignmentFound,
            1 => AssignmentStatus::Assigned,
            _ => AssignmentStatus::Unresolved,
        };
        Self {
            peak,
            matches,
            status,
        }
    }

    pub fn with_status(peak: CentroidPeak, matches: Vec<FormulaMatch>, status: AssignmentStatus) -> Self {
        Self {
            peak,
            matches,
            status,
        }
    }

    /// The assigned formula, when exactly one remains
    pub fn best(&self) -> Option<&FormulaMatch> {
        match self.status {
            AssignmentStatus::Assigned => self.matches.first(),
            _ => None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        !self.matches.is_empty()
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self.status, AssignmentStatus::AmbiguousAssignment)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_match(formula: &str) -> FormulaMatch {
        let candidate = FormulaCandidate::from_composition(formula.parse().unwrap());
        FormulaMatch::new(candidate, IonType::Protonated, 1, 100.0, 0.1)
    }

    #[test]
    fn test_status_from_matches() {
        let peak = CentroidPeak::new(165.0910, 100.0, 0);
        let none = Assignment::new(peak.clone(), vec![]);
        assert_eq!(none.status, AssignmentStatus::NoAssignmentFound);
        assert!(none.best().is_none());
        assert!(!none.is_assigned());

        let one = Assignment::new(peak.clone(), vec![make_match("C10H12O2")]);
        assert_eq!(one.status, AssignmentStatus::Assigned);
        assert_eq!(one.best().unwrap().formula(), "C10H12O2");
        assert_eq!(one.best().unwrap().class_label(), "O2");

        let many = Assignment::new(
            peak.clone(),
            vec![make_match("C10H12O2"), make_match("C9H12N2O1")],
        );
        assert_eq!(many.status, AssignmentStatus::Unresolved);
        assert!(many.best().is_none());
        assert!(many.is_assigned());

        let tied = Assignment::with_status(peak, many.matches, AssignmentStatus::AmbiguousAssignment);
        assert!(tied.is_ambiguous());
        assert_eq!(tied.status.to_string(), "AmbiguousAssignment");
        assert!(!tied.matches[0].is_corroborated());
    }
}
