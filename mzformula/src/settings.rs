//! Parameters of a single search run
use std::fmt::Display;

use crate::constraints::{ConstraintError, ConstraintResolver, ElementRange};
use crate::formula::{IonMode, IonType};
use crate::generator::GenerationBounds;

/// How the accepted ppm error window moves as matches accumulate over a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ErrorMethod {
    /// The configured window is used for every peak
    #[default]
    None,
    /// Re-center on the accepted error of smallest magnitude seen so far
    Distance,
    /// Re-center on the lowest signed error seen so far
    Lowest,
    /// Re-center on the running mean of all accepted errors
    Average,
    /// A fixed window around a caller-provided center
    Symmetrical,
}

impl ErrorMethod {
    /// Whether the windows this method produces depend on previously processed peaks
    pub fn is_stateful(&self) -> bool {
        matches!(self, Self::Distance | Self::Lowest | Self::Average)
    }
}

impl Display for ErrorMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Which ion types to consider for every peak
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IonModes {
    pub protonated: bool,
    pub radical: bool,
    pub adduct: bool,
    /// Adduct elements used in positive mode
    pub adduct_atoms_positive: Vec<String>,
    /// Adduct elements used in negative mode
    pub adduct_atoms_negative: Vec<String>,
}

impl Default for IonModes {
    fn default() -> Self {
        Self {
            protonated: true,
            radical: false,
            adduct: false,
            adduct_atoms_positive: vec!["Na".into(), "K".into()],
            adduct_atoms_negative: vec!["Cl".into()],
        }
    }
}

/// All of the parameters which control one search. A value is created per invocation
/// and passed by reference to every component.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SearchSettings {
    /// The lower bound of the ppm error window before any match is accepted
    pub min_ppm_error: f64,
    /// The upper bound of the ppm error window before any match is accepted
    pub max_ppm_error: f64,
    pub error_method: ErrorMethod,
    /// The half-width of re-centered error windows
    pub mz_error_range: f64,
    /// The center of the [`ErrorMethod::Symmetrical`] window
    pub mz_error_average: f64,

    pub min_dbe: f64,
    pub max_dbe: f64,
    pub min_hc: f64,
    pub max_hc: f64,
    pub min_oc: f64,
    pub max_oc: f64,

    pub ion_modes: IonModes,
    pub ion_charge: i32,

    pub element_ranges: Vec<ElementRange>,
    /// The maximum number of distinct heteroatoms a class may contain
    pub max_heteroatom_kinds: usize,
    /// A class whose generation would produce more candidates than this fails
    pub max_candidates_per_class: usize,

    /// Whether to search for isotopologues of every match
    pub search_isotopologues: bool,
    /// The maximum number of minor isotope atoms in one isotopologue
    pub max_isotopologue_substitutions: u32,
    pub min_abun_error: f64,
    pub max_abun_error: f64,
    /// The ratio of the most to the least abundant signal the instrument can observe
    pub dynamic_range: f64,

    /// Stop evaluating a peak once it has one accepted match
    pub first_hit: bool,
    /// Resolve peaks with several matches down to the best ones
    pub select_best: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            min_ppm_error: -10.0,
            max_ppm_error: 10.0,
            error_method: ErrorMethod::None,
            mz_error_range: 1.5,
            mz_error_average: 0.0,
            min_dbe: 0.0,
            max_dbe: 50.0,
            min_hc: 0.3,
            max_hc: 3.0,
            min_oc: 0.0,
            max_oc: 1.2,
            ion_modes: IonModes::default(),
            ion_charge: 1,
            element_ranges: vec![
                ElementRange::new("C", 1, 90),
                ElementRange::new("H", 4, 200),
                ElementRange::new("O", 0, 30),
                ElementRange::new("N", 0, 5),
                ElementRange::new("S", 0, 2),
                ElementRange::new("P", 0, 0),
                ElementRange::new("Cl", 0, 0),
            ],
            max_heteroatom_kinds: 3,
            max_candidates_per_class: 5_000_000,
            search_isotopologues: true,
            max_isotopologue_substitutions: 2,
            min_abun_error: -25.0,
            max_abun_error: 10.0,
            dynamic_range: 1000.0,
            first_hit: false,
            select_best: true,
        }
    }
}

impl SearchSettings {
    pub fn new(element_ranges: Vec<ElementRange>) -> Self {
        Self {
            element_ranges,
            ..Default::default()
        }
    }

    /// Replace the range for `symbol`, or add it if it is not yet bounded
    pub fn set_range(&mut self, symbol: &str, min: i32, max: i32) -> &mut Self {
        if let Some(r) = self.element_ranges.iter_mut().find(|r| r.symbol == symbol) {
            r.min = min;
            r.max = max;
        } else {
            self.element_ranges.push(ElementRange::new(symbol, min, max));
        }
        self
    }

    pub fn resolver(&self) -> ConstraintResolver {
        ConstraintResolver::new(self.element_ranges.clone(), self.max_heteroatom_kinds)
    }

    /// Check every bound and range for consistency
    pub fn validate(&self) -> Result<(), ConstraintError> {
        let filters = [
            ("ppm error", self.min_ppm_error, self.max_ppm_error),
            ("DBE", self.min_dbe, self.max_dbe),
            ("H/C", self.min_hc, self.max_hc),
            ("O/C", self.min_oc, self.max_oc),
            ("abundance error", self.min_abun_error, self.max_abun_error),
        ];
        for (name, min, max) in filters {
            if max < min || min.is_nan() || max.is_nan() {
                return Err(ConstraintError::InvertedFilter { name, min, max });
            }
        }
        if self.ion_charge == 0 {
            return Err(ConstraintError::ZeroCharge);
        }
        self.resolver().validate()?;
        self.ion_mode_list()?;
        Ok(())
    }

    /// The ion modes enabled for this run, in protonated, radical, adduct order
    pub fn ion_mode_list(&self) -> Result<Vec<IonMode>, ConstraintError> {
        let mut ion_types = Vec::new();
        if self.ion_modes.protonated {
            ion_types.push(IonType::Protonated);
        }
        if self.ion_modes.radical {
            ion_types.push(IonType::Radical);
        }
        if self.ion_modes.adduct {
            let atoms = if self.ion_charge > 0 {
                &self.ion_modes.adduct_atoms_positive
            } else {
                &self.ion_modes.adduct_atoms_negative
            };
            ion_types.extend(atoms.iter().cloned().map(IonType::Adduct));
        }
        ion_types
            .into_iter()
            .map(|ion_type| {
                if self.ion_charge == 0 {
                    return Err(ConstraintError::ZeroCharge);
                }
                let unknown = ion_type.adduct_element().unwrap_or_default().to_string();
                IonMode::new(ion_type, self.ion_charge)
                    .ok_or(ConstraintError::UnknownElement(unknown))
            })
            .collect()
    }

    /// The bounds formula generation and cache coverage are computed under
    pub fn generation_bounds(&self) -> Result<GenerationBounds, ConstraintError> {
        let resolver = self.resolver();
        let carbon = resolver.carbon_range()?;
        let hydrogen = resolver.hydrogen_range()?;
        Ok(GenerationBounds {
            carbon,
            hydrogen,
            dbe: (self.min_dbe, self.max_dbe),
            h_c: (self.min_hc, self.max_hc),
            o_c: (self.min_oc, self.max_oc),
            max_candidates: self.max_candidates_per_class,
        })
    }

    /// The ppm error window used before any match adapts it
    pub fn ppm_bounds(&self) -> (f64, f64) {
        (self.min_ppm_error, self.max_ppm_error)
    }
}
