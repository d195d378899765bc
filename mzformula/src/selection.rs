//! Reducing a peak's matches to the best ones
use std::fmt::Display;

use crate::assignment::{Assignment, AssignmentStatus, FormulaMatch};

/// Absolute ppm errors closer than this are considered equal
pub const ERROR_TIE_TOLERANCE: f64 = 1e-9;

/// One step of a [`SelectionPolicy`]. Each step keeps the matches with the smallest
/// [`key`](SelectionCriterion::key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SelectionCriterion {
    /// Matches with at least one observed isotopologue
    IsotopologueCorroboration,
    /// The smallest absolute ppm error
    LowestAbsoluteError,
    /// The fewest heteroatoms in total
    FewestHeteroatoms,
}

impl SelectionCriterion {
    pub fn key(&self, formula_match: &FormulaMatch) -> f64 {
        match self {
            Self::IsotopologueCorroboration => {
                if formula_match.is_corroborated() {
                    0.0
                } else {
                    1.0
                }
            }
            Self::LowestAbsoluteError => formula_match.error_ppm.abs(),
            Self::FewestHeteroatoms => formula_match.candidate.heteroatom_count() as f64,
        }
    }

    pub fn tolerance(&self) -> f64 {
        match self {
            Self::LowestAbsoluteError => ERROR_TIE_TOLERANCE,
            _ => 0.0,
        }
    }

    /// The positions in `keep` whose matches are best under this criterion
    fn narrow(&self, matches: &[FormulaMatch], keep: Vec<usize>) -> Vec<usize> {
        let best = keep
            .iter()
            .map(|i| self.key(&matches[*i]))
            .fold(f64::INFINITY, f64::min);
        let tol = self.tolerance();
        keep.into_iter()
            .filter(|i| self.key(&matches[*i]) - best <= tol)
            .collect()
    }
}

impl Display for SelectionCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub const DEFAULT_CRITERIA: [SelectionCriterion; 3] = [
    SelectionCriterion::IsotopologueCorroboration,
    SelectionCriterion::LowestAbsoluteError,
    SelectionCriterion::FewestHeteroatoms,
];

/// An ordered list of criteria, each applied only to the matches still tied after the
/// ones before it
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SelectionPolicy {
    pub criteria: Vec<SelectionCriterion>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CRITERIA.to_vec())
    }
}

impl SelectionPolicy {
    pub fn new(criteria: Vec<SelectionCriterion>) -> Self {
        Self { criteria }
    }

    /// The positions of the matches that survive every criterion, in their original order
    pub fn select(&self, matches: &[FormulaMatch]) -> Vec<usize> {
        let mut keep: Vec<usize> = (0..matches.len()).collect();
        for criterion in self.criteria.iter() {
            if keep.len() < 2 {
                break;
            }
            keep = criterion.narrow(matches, keep);
        }
        keep
    }

    /// A new assignment holding only the best matches of `assignment`. Several matches
    /// left tied make the result [`AssignmentStatus::AmbiguousAssignment`].
    pub fn apply(&self, assignment: &Assignment) -> Assignment {
        let keep = self.select(&assignment.matches);
        let matches: Vec<FormulaMatch> = keep
            .into_iter()
            .map(|i| assignment.matches[i].clone())
            .collect();
        let status = match matches.len() {
            0 => AssignmentStatus::NoAssignmentFound,
            1 => AssignmentStatus::Assigned,
            _ => AssignmentStatus::AmbiguousAssignment,
        };
        Assignment::with_status(assignment.peak.clone(), matches, status)
    }
}
