//! Element count constraints and the heteroatom classes they imply
use std::collections::{BTreeMap, HashSet};
use std::fmt::Display;

use itertools::Itertools;
use thiserror::Error;
use tracing::debug;

use crate::elements::{self, Element};

/// The label given to the class with no heteroatoms
pub const HYDROCARBON_LABEL: &str = "CH";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstraintError {
    #[error("The range for {symbol} has a maximum {max} less than its minimum {min}")]
    InvertedRange { symbol: String, min: i32, max: i32 },
    #[error("The range for {symbol} has a negative bound ({min}, {max})")]
    NegativeBound { symbol: String, min: i32, max: i32 },
    #[error("{0} is not a known element")]
    UnknownElement(String),
    #[error("{0} was given more than one range")]
    DuplicateRange(String),
    #[error("No range was given for {0}, which every formula must have")]
    MissingRange(&'static str),
    #[error("Carbon must be present in every formula, but its minimum was {0}")]
    CarbonRequired(i32),
    #[error("The {name} filter has a maximum {max} less than its minimum {min}")]
    InvertedFilter { name: &'static str, min: f64, max: f64 },
    #[error("The ion charge must not be zero")]
    ZeroCharge,
}

/// An inclusive range of counts an element may take in a formula
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ElementRange {
    pub symbol: String,
    pub min: i32,
    pub max: i32,
}

impl ElementRange {
    pub fn new(symbol: impl Into<String>, min: i32, max: i32) -> Self {
        Self {
            symbol: symbol.into(),
            min,
            max,
        }
    }

    /// Check the range invariants and resolve the element it refers to
    pub fn validate(&self) -> Result<&'static Element, ConstraintError> {
        if self.min < 0 || self.max < 0 {
            return Err(ConstraintError::NegativeBound {
                symbol: self.symbol.clone(),
                min: self.min,
                max: self.max,
            });
        }
        if self.max < self.min {
            return Err(ConstraintError::InvertedRange {
                symbol: self.symbol.clone(),
                min: self.min,
                max: self.max,
            });
        }
        elements::lookup(&self.symbol)
            .ok_or_else(|| ConstraintError::UnknownElement(self.symbol.clone()))
    }

    pub fn contains(&self, count: u32) -> bool {
        (self.min as i64) <= count as i64 && count as i64 <= self.max as i64
    }

    /// Whether this range can contribute the element to any formula
    pub fn is_degenerate(&self) -> bool {
        self.max == 0
    }
}

impl Display for ElementRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.symbol, self.min, self.max)
    }
}

/// A fixed combination of non-C/H element counts which defines a family of formulas.
///
/// The label is the element symbols and counts concatenated in alphabetical order of
/// symbol, e.g. `N1O2`, or [`HYDROCARBON_LABEL`] when no heteroatoms are present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeteroatomClass {
    counts: BTreeMap<&'static str, u32>,
    label: String,
}

impl HeteroatomClass {
    pub fn new<I: IntoIterator<Item = (&'static Element, u32)>>(
        counts: I,
    ) -> Result<Self, ConstraintError> {
        let mut acc = BTreeMap::new();
        for (element, count) in counts {
            if element.symbol == "C" || element.symbol == "H" {
                return Err(ConstraintError::UnknownElement(format!(
                    "{} as a heteroatom",
                    element.symbol
                )));
            }
            if count > 0 {
                *acc.entry(element.symbol).or_default() += count;
            }
        }
        let label = Self::make_label(&acc);
        Ok(Self { counts: acc, label })
    }

    /// The class with no heteroatoms
    pub fn hydrocarbon() -> Self {
        Self {
            counts: BTreeMap::new(),
            label: HYDROCARBON_LABEL.to_string(),
        }
    }

    /// Parse a class label like `N1O2`
    pub fn parse(label: &str) -> Result<Self, ConstraintError> {
        if label == HYDROCARBON_LABEL {
            return Ok(Self::hydrocarbon());
        }
        let mut counts = Vec::new();
        let mut chars = label.char_indices().peekable();
        while let Some((start, c)) = chars.next() {
            if !c.is_ascii_uppercase() {
                return Err(ConstraintError::UnknownElement(label.to_string()));
            }
            let mut sym_end = start + c.len_utf8();
            while let Some((i, c)) = chars.peek().copied() {
                if c.is_ascii_lowercase() {
                    sym_end = i + 1;
                    chars.next();
                } else {
                    break;
                }
            }
            let num_start = sym_end;
            let mut num_end = num_start;
            while let Some((i, c)) = chars.peek().copied() {
                if c.is_ascii_digit() {
                    num_end = i + 1;
                    chars.next();
                } else {
                    break;
                }
            }
            let symbol = &label[start..sym_end];
            let element = elements::lookup(symbol)
                .ok_or_else(|| ConstraintError::UnknownElement(symbol.to_string()))?;
            let count = if num_end > num_start {
                label[num_start..num_end]
                    .parse()
                    .map_err(|_| ConstraintError::UnknownElement(label.to_string()))?
            } else {
                1
            };
            counts.push((element, count));
        }
        Self::new(counts)
    }

    fn make_label(counts: &BTreeMap<&'static str, u32>) -> String {
        if counts.is_empty() {
            HYDROCARBON_LABEL.to_string()
        } else {
            counts.iter().map(|(k, v)| format!("{k}{v}")).join("")
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn get(&self, symbol: &str) -> u32 {
        self.counts.get(symbol).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        self.counts.iter().map(|(k, v)| (*k, *v))
    }

    /// The total number of heteroatoms
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// The number of distinct heteroatoms
    pub fn kinds(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl Display for HeteroatomClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label)
    }
}

/// Resolves per-element count ranges into the heteroatom classes to search.
#[derive(Debug, Clone)]
pub struct ConstraintResolver {
    ranges: Vec<ElementRange>,
    /// The maximum number of distinct heteroatoms a class may contain
    max_heteroatom_kinds: usize,
}

impl ConstraintResolver {
    pub fn new(ranges: Vec<ElementRange>, max_heteroatom_kinds: usize) -> Self {
        Self {
            ranges,
            max_heteroatom_kinds,
        }
    }

    fn find(&self, symbol: &str) -> Option<&ElementRange> {
        self.ranges.iter().find(|r| r.symbol == symbol)
    }

    /// Check every range, rejecting duplicates, and require C and H to be bounded
    pub fn validate(&self) -> Result<(), ConstraintError> {
        let mut seen = HashSet::new();
        for range in self.ranges.iter() {
            range.validate()?;
            if !seen.insert(range.symbol.as_str()) {
                return Err(ConstraintError::DuplicateRange(range.symbol.clone()));
            }
        }
        let carbon = self.find("C").ok_or(ConstraintError::MissingRange("C"))?;
        if carbon.min < 1 {
            return Err(ConstraintError::CarbonRequired(carbon.min));
        }
        self.find("H").ok_or(ConstraintError::MissingRange("H"))?;
        Ok(())
    }

    pub fn carbon_range(&self) -> Result<(u32, u32), ConstraintError> {
        self.validate()?;
        let r = self.find("C").ok_or(ConstraintError::MissingRange("C"))?;
        Ok((r.min as u32, r.max as u32))
    }

    pub fn hydrogen_range(&self) -> Result<(u32, u32), ConstraintError> {
        self.validate()?;
        let r = self.find("H").ok_or(ConstraintError::MissingRange("H"))?;
        Ok((r.min as u32, r.max as u32))
    }

    /// Produce every heteroatom class whose counts are within range and which does not
    /// combine more distinct heteroatoms than allowed.
    ///
    /// Classes are ordered by total heteroatom count, then by label.
    pub fn resolve(&self) -> Result<Vec<HeteroatomClass>, ConstraintError> {
        self.validate()?;
        let mut dimensions: Vec<Vec<(&'static Element, u32)>> = Vec::new();
        for range in self.ranges.iter() {
            if range.symbol == "C" || range.symbol == "H" || range.is_degenerate() {
                continue;
            }
            let element = range.validate()?;
            dimensions.push(
                (range.min as u32..=range.max as u32)
                    .map(|n| (element, n))
                    .collect(),
            );
        }

        let mut classes: Vec<HeteroatomClass> = if dimensions.is_empty() {
            vec![HeteroatomClass::hydrocarbon()]
        } else {
            dimensions
                .into_iter()
                .multi_cartesian_product()
                .map(HeteroatomClass::new)
                .filter_ok(|cls| cls.kinds() <= self.max_heteroatom_kinds)
                .collect::<Result<_, _>>()?
        };
        classes.sort_by(|a, b| {
            a.total()
                .cmp(&b.total())
                .then_with(|| a.label().cmp(b.label()))
        });
        debug!("Resolved {} heteroatom classes", classes.len());
        Ok(classes)
    }
}
