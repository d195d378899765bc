//! Grouping assigned peaks by heteroatom class
use std::collections::BTreeMap;

use crate::assignment::{Assignment, FormulaMatch};

/// The label peaks without any match are grouped under
pub const UNASSIGNED_LABEL: &str = "unassigned";

#[derive(Debug, Clone, PartialEq)]
pub struct ClassSummary {
    pub class_label: String,
    /// The number of distinct peaks with at least one match in the class
    pub peak_count: usize,
    pub total_abundance: f64,
    /// This class's share of the abundance of all classes, in percent
    pub relative_abundance: f64,
}

/// Assignments grouped by the class of each remaining match. A peak left with matches
/// in several classes appears in each of them.
#[derive(Debug, Default, Clone)]
pub struct ClassAggregator<'a> {
    groups: BTreeMap<&'a str, Vec<(&'a Assignment, &'a FormulaMatch)>>,
    unassigned: Vec<&'a Assignment>,
}

impl<'a> ClassAggregator<'a> {
    pub fn new(assignments: &'a [Assignment]) -> Self {
        let mut this = Self::default();
        for assignment in assignments {
            if assignment.matches.is_empty() {
                this.unassigned.push(assignment);
                continue;
            }
            for m in assignment.matches.iter() {
                this.groups
                    .entry(m.class_label())
                    .or_default()
                    .push((assignment, m));
            }
        }
        this
    }

    /// Class labels in sorted order
    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.groups.keys().copied()
    }

    pub fn get(&self, class_label: &str) -> &[(&'a Assignment, &'a FormulaMatch)] {
        self.groups
            .get(class_label)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    pub fn unassigned(&self) -> &[&'a Assignment] {
        &self.unassigned
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn summaries(&self) -> Vec<ClassSummary> {
        let mut out: Vec<ClassSummary> = self
            .groups
            .iter()
            .map(|(label, members)| {
                // A peak's matches in one class are adjacent
                let mut peak_count = 0;
                let mut total_abundance = 0.0;
                let mut last = None;
                for (a, _) in members.iter() {
                    if last == Some(a.peak.index) {
                        continue;
                    }
                    last = Some(a.peak.index);
                    peak_count += 1;
                    total_abundance += a.peak.intensity as f64;
                }
                ClassSummary {
                    class_label: label.to_string(),
                    peak_count,
                    total_abundance,
                    relative_abundance: 0.0,
                }
            })
            .collect();
        let total: f64 = out.iter().map(|s| s.total_abundance).sum();
        if total > 0.0 {
            for s in out.iter_mut() {
                s.relative_abundance = s.total_abundance / total * 100.0;
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use mzpeaks::CentroidPeak;

    use super::*;
    use crate::formula::{FormulaCandidate, IonType};

    fn make(formula: &str) -> FormulaMatch {
        let candidate = FormulaCandidate::from_composition(formula.parse().unwrap());
        FormulaMatch::new(candidate, IonType::Protonated, 1, 100.0, 0.0)
    }

    #[test]
    fn test_grouping() {
        let assignments = vec![
            Assignment::new(CentroidPeak::new(100.0, 30.0, 0), vec![make("C10H12O2")]),
            Assignment::new(CentroidPeak::new(110.0, 10.0, 1), vec![make("C11H14O2")]),
            Assignment::new(
                CentroidPeak::new(120.0, 60.0, 2),
                vec![make("C9H8O3"), make("C12H16O2")],
            ),
            Assignment::new(CentroidPeak::new(130.0, 5.0, 3), vec![]),
        ];
        let agg = ClassAggregator::new(&assignments);
        assert_eq!(agg.labels().collect::<Vec<_>>(), vec!["O2", "O3"]);
        assert_eq!(agg.get("O2").len(), 3);
        assert!(agg.get("N1").is_empty());
        assert_eq!(agg.unassigned().len(), 1);

        let summaries = agg.summaries();
        assert_eq!(summaries[0].peak_count, 3);
        assert_eq!(summaries[0].total_abundance, 100.0);
        assert_eq!(summaries[1].total_abundance, 60.0);
        assert!((summaries[0].relative_abundance - 62.5).abs() < 1e-9);
    }
}
