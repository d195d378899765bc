//! What a run did, per class and in total
use std::fmt::Display;
use std::ops::{Add, AddAssign};

use tracing::warn;

use crate::assignment::{Assignment, AssignmentStatus};
use crate::cache::{CacheError, ClassGeneration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The cache has no column for one of the class's elements
    SchemaMismatch,
    /// Generating the class's candidates failed
    Generation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassStatus {
    /// The class was already cached
    Hit,
    /// The class was generated during this run
    Miss,
    /// The class could not be made available and was skipped
    Failed(ClassFailure),
}

impl ClassStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl Display for ClassStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassStatus::Hit => f.write_str("hit"),
            ClassStatus::Miss => f.write_str("miss"),
            ClassStatus::Failed(failure) => write!(f, "failed ({:?}): {}", failure.kind, failure.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassReport {
    pub class_label: String,
    pub status: ClassStatus,
    pub candidates_generated: usize,
    pub rows_inserted: usize,
    /// Matches accepted for this class before selection
    pub matches: usize,
}

impl ClassReport {
    /// Describe the outcome of making a class available. Errors which concern only the
    /// class become a failed report and any other error is returned.
    pub fn from_outcome(
        class_label: &str,
        outcome: Result<ClassGeneration, CacheError>,
    ) -> Result<Self, CacheError> {
        let (status, candidates_generated, rows_inserted) = match outcome {
            Ok(ClassGeneration::Hit) => (ClassStatus::Hit, 0, 0),
            Ok(ClassGeneration::Miss {
                generated,
                inserted,
            }) => (ClassStatus::Miss, generated, inserted),
            Err(e) if e.is_class_local() => {
                warn!("Skipping class {class_label}: {e}");
                let kind = match e {
                    CacheError::SchemaMismatch { .. } => FailureKind::SchemaMismatch,
                    _ => FailureKind::Generation,
                };
                (
                    ClassStatus::Failed(ClassFailure {
                        kind,
                        message: e.to_string(),
                    }),
                    0,
                    0,
                )
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            class_label: class_label.to_string(),
            status,
            candidates_generated,
            rows_inserted,
            matches: 0,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RunTotals {
    pub hits: usize,
    pub misses: usize,
    pub failures: usize,
    pub candidates_generated: usize,
    pub rows_inserted: usize,
    pub peaks: usize,
    pub assigned: usize,
    pub ambiguous: usize,
    pub unresolved: usize,
    pub unassigned: usize,
    pub isotopologues_matched: usize,
}

impl RunTotals {
    pub fn from_class(report: &ClassReport) -> Self {
        let mut totals = Self {
            candidates_generated: report.candidates_generated,
            rows_inserted: report.rows_inserted,
            ..Default::default()
        };
        match report.status {
            ClassStatus::Hit => totals.hits = 1,
            ClassStatus::Miss => totals.misses = 1,
            ClassStatus::Failed(_) => totals.failures = 1,
        }
        totals
    }

    pub fn from_assignment(assignment: &Assignment) -> Self {
        let mut totals = Self {
            peaks: 1,
            isotopologues_matched: assignment
                .matches
                .iter()
                .map(|m| m.corroborating().count())
                .sum(),
            ..Default::default()
        };
        match assignment.status {
            AssignmentStatus::NoAssignmentFound => totals.unassigned = 1,
            AssignmentStatus::Unresolved => totals.unresolved = 1,
            AssignmentStatus::Assigned => totals.assigned = 1,
            AssignmentStatus::AmbiguousAssignment => totals.ambiguous = 1,
        }
        totals
    }

    pub fn sum(self, other: Self) -> Self {
        self + other
    }
}

impl Add for RunTotals {
    type Output = RunTotals;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for RunTotals {
    fn add_assign(&mut self, rhs: Self) {
        self.hits += rhs.hits;
        self.misses += rhs.misses;
        self.failures += rhs.failures;
        self.candidates_generated += rhs.candidates_generated;
        self.rows_inserted += rhs.rows_inserted;
        self.peaks += rhs.peaks;
        self.assigned += rhs.assigned;
        self.ambiguous += rhs.ambiguous;
        self.unresolved += rhs.unresolved;
        self.unassigned += rhs.unassigned;
        self.isotopologues_matched += rhs.isotopologues_matched;
    }
}

/// Per-class outcomes of a run and their totals
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunReport {
    pub classes: Vec<ClassReport>,
    pub totals: RunTotals,
}

impl RunReport {
    pub fn new(classes: Vec<ClassReport>) -> Self {
        let totals = classes
            .iter()
            .map(RunTotals::from_class)
            .fold(RunTotals::default(), RunTotals::sum);
        Self { classes, totals }
    }

    /// Add the outcome of matching `assignments` to the report
    pub fn record_assignments(&mut self, assignments: &[Assignment], matches_per_class: &[(String, usize)]) {
        self.totals += assignments
            .iter()
            .map(RunTotals::from_assignment)
            .fold(RunTotals::default(), RunTotals::sum);
        for (label, n) in matches_per_class {
            if let Some(class) = self.classes.iter_mut().find(|c| &c.class_label == label) {
                class.matches += n;
            }
        }
    }

    pub fn class(&self, class_label: &str) -> Option<&ClassReport> {
        self.classes.iter().find(|c| c.class_label == class_label)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ClassReport> {
        self.classes.iter().filter(|c| c.status.is_failed())
    }

    pub fn has_failures(&self) -> bool {
        self.totals.failures > 0
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let t = &self.totals;
        write!(
            f,
            "{} classes ({} cached, {} generated, {} failed), {} candidates generated, {} rows added; {} peaks: {} assigned, {} ambiguous, {} unresolved, {} unassigned",
            self.classes.len(),
            t.hits,
            t.misses,
            t.failures,
            t.candidates_generated,
            t.rows_inserted,
            t.peaks,
            t.assigned,
            t.ambiguous,
            t.unresolved,
            t.unassigned,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::generator::GenerationError;

    #[test]
    fn test_outcomes() {
        let hit = ClassReport::from_outcome("O1", Ok(ClassGeneration::Hit)).unwrap();
        assert_eq!(hit.status, ClassStatus::Hit);

        let miss = ClassReport::from_outcome(
            "O2",
            Ok(ClassGeneration::Miss {
                generated: 10,
                inserted: 7,
            }),
        )
        .unwrap();
        assert_eq!(miss.rows_inserted, 7);

        let failed = ClassReport::from_outcome(
            "Br1",
            Err(CacheError::SchemaMismatch {
                element: "Br".into(),
                class_label: "Br1".into(),
            }),
        )
        .unwrap();
        assert!(matches!(
            &failed.status,
            ClassStatus::Failed(ClassFailure { kind: FailureKind::SchemaMismatch, .. })
        ));

        let failed = ClassReport::from_outcome(
            "N5",
            Err(CacheError::Generation(GenerationError::CandidateLimitExceeded {
                class_label: "N5".into(),
                limit: 1,
            })),
        )
        .unwrap();
        assert!(failed.status.is_failed());

        let fatal = ClassReport::from_outcome(
            "O3",
            Err(CacheError::CacheUnavailable {
                path: "x".into(),
                reason: "gone".into(),
            }),
        );
        assert!(fatal.is_err());

        let report = RunReport::new(vec![hit, miss, failed]);
        assert_eq!(report.totals.hits, 1);
        assert_eq!(report.totals.misses, 1);
        assert_eq!(report.totals.failures, 1);
        assert_eq!(report.totals.candidates_generated, 10);
        assert_eq!(report.failures().count(), 1);
        assert!(report.has_failures());
        assert_eq!(report.class("O2").unwrap().candidates_generated, 10);
    }
}
