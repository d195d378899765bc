//! Enumeration of the formulas of a heteroatom class
use thiserror::Error;
use tracing::{debug, trace};

use crate::constraints::HeteroatomClass;
use crate::elements::{self, Element};
use crate::formula::{nominal_mass, Composition, FormulaCandidate};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("Class {class_label} would produce more than {limit} candidates")]
    CandidateLimitExceeded { class_label: String, limit: usize },
    #[error("Class {class_label} contains {symbol}, which is not a known element")]
    UnknownElement { class_label: String, symbol: String },
}

/// The C and H count ranges and chemical filters a class is generated under.
///
/// These bounds also describe what a cached generation pass covered, so a later
/// request can be served from the cache when a previous pass's bounds contain it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationBounds {
    pub carbon: (u32, u32),
    pub hydrogen: (u32, u32),
    pub dbe: (f64, f64),
    pub h_c: (f64, f64),
    pub o_c: (f64, f64),
    pub max_candidates: usize,
}

impl GenerationBounds {
    /// Whether every formula admissible under `other` is admissible under `self`
    pub fn contains(&self, other: &GenerationBounds) -> bool {
        self.carbon.0 <= other.carbon.0
            && self.carbon.1 >= other.carbon.1
            && self.hydrogen.0 <= other.hydrogen.0
            && self.hydrogen.1 >= other.hydrogen.1
            && self.dbe.0 <= other.dbe.0
            && self.dbe.1 >= other.dbe.1
            && self.h_c.0 <= other.h_c.0
            && self.h_c.1 >= other.h_c.1
            && self.o_c.0 <= other.o_c.0
            && self.o_c.1 >= other.o_c.1
    }

    /// Whether a candidate passes every count and ratio filter
    pub fn admits(&self, candidate: &FormulaCandidate) -> bool {
        let c = candidate.composition.get("C");
        let h = candidate.composition.get("H");
        let o = candidate.composition.get("O");
        self.carbon.0 <= c
            && c <= self.carbon.1
            && self.hydrogen.0 <= h
            && h <= self.hydrogen.1
            && self.dbe.0 <= candidate.dbe
            && candidate.dbe <= self.dbe.1
            && self.h_c.0 <= candidate.h_c
            && candidate.h_c <= self.h_c.1
            && (o == 0 || (self.o_c.0 <= candidate.o_c && candidate.o_c <= self.o_c.1))
    }
}

/// Enumerates the formulas of one heteroatom class by walking carbon and hydrogen counts.
///
/// Heteroatom counts are fixed by the class. For each carbon count the hydrogen range
/// is first narrowed by the H/C bounds and the maximum DBE, then walked upwards in
/// steps of two with the parity that makes the DBE integral. DBE only falls as hydrogen
/// is added, so the walk ends at the first hydrogen count below the minimum DBE.
#[derive(Debug, Clone)]
pub struct FormulaGenerator<'a> {
    class: &'a HeteroatomClass,
    bounds: GenerationBounds,
    heteroatoms: Vec<(&'static Element, u32)>,
    heteroatom_mass: f64,
    /// `Σ nᵢ(vᵢ - 2)` over the heteroatoms, in half-DBE units
    heteroatom_half_dbe: i64,
    hydrogen_parity: u32,
    oxygen: u32,
}

impl<'a> FormulaGenerator<'a> {
    pub fn new(
        class: &'a HeteroatomClass,
        bounds: GenerationBounds,
    ) -> Result<Self, GenerationError> {
        let mut heteroatoms = Vec::new();
        for (symbol, count) in class.iter() {
            let element =
                elements::lookup(symbol).ok_or_else(|| GenerationError::UnknownElement {
                    class_label: class.label().to_string(),
                    symbol: symbol.to_string(),
                })?;
            heteroatoms.push((element, count));
        }
        let heteroatom_mass = heteroatoms
            .iter()
            .map(|(e, n)| e.monoisotopic_mass() * *n as f64)
            .sum();
        let heteroatom_half_dbe = heteroatoms
            .iter()
            .map(|(e, n)| *n as i64 * (e.valence as i64 - 2))
            .sum();
        let hydrogen_parity = heteroatoms
            .iter()
            .filter(|(e, _)| e.valence % 2 != 0)
            .map(|(_, n)| *n)
            .sum::<u32>()
            % 2;
        Ok(Self {
            class,
            bounds,
            heteroatoms,
            heteroatom_mass,
            heteroatom_half_dbe,
            hydrogen_parity,
            oxygen: class.get("O"),
        })
    }

    /// DBE of a formula with `c` carbons and `h` hydrogens in this class
    #[inline]
    fn dbe(&self, c: u32, h: u32) -> f64 {
        1.0 + (2 * c as i64 - h as i64 + self.heteroatom_half_dbe) as f64 / 2.0
    }

    /// The carbon counts that can satisfy the O/C bounds
    fn carbon_span(&self) -> (u32, u32) {
        let (mut lo, mut hi) = self.bounds.carbon;
        if self.oxygen > 0 {
            let o = self.oxygen as f64;
            let (min_oc, max_oc) = self.bounds.o_c;
            if max_oc > 0.0 {
                lo = lo.max((o / max_oc).floor().max(0.0) as u32);
            } else {
                return (1, 0);
            }
            if min_oc > 0.0 {
                hi = hi.min((o / min_oc).ceil() as u32);
            }
        }
        (lo.max(1), hi)
    }

    /// The first hydrogen count to consider for `c` carbons
    fn hydrogen_start(&self, c: u32) -> u32 {
        let (h_min, _) = self.bounds.hydrogen;
        let by_ratio = (self.bounds.h_c.0 * c as f64).floor().max(0.0) as u32;
        // Hydrogen counts below this have a DBE above the maximum
        let by_dbe = (2.0 * (1.0 - self.bounds.dbe.1) + (2 * c) as f64
            + self.heteroatom_half_dbe as f64)
            .floor()
            .max(0.0) as u32;
        let mut h = h_min.max(by_ratio).max(by_dbe);
        if h % 2 != self.hydrogen_parity {
            h += 1;
        }
        h
    }

    fn hydrogen_stop(&self, c: u32) -> u32 {
        let by_ratio = (self.bounds.h_c.1 * c as f64).ceil();
        if by_ratio >= u32::MAX as f64 {
            self.bounds.hydrogen.1
        } else {
            self.bounds.hydrogen.1.min(by_ratio.max(0.0) as u32)
        }
    }

    fn make_candidate(&self, c: u32, h: u32) -> FormulaCandidate {
        let mut composition = Composition::new();
        composition.set(elements::carbon(), c);
        composition.set(elements::hydrogen(), h);
        for (e, n) in self.heteroatoms.iter() {
            composition.set(e, *n);
        }
        let mass = c as f64 * elements::carbon().monoisotopic_mass()
            + h as f64 * elements::hydrogen().monoisotopic_mass()
            + self.heteroatom_mass;
        FormulaCandidate {
            mass,
            nominal_mass: nominal_mass(mass),
            dbe: self.dbe(c, h),
            h_c: composition.h_c(),
            o_c: composition.o_c(),
            composition,
            class_label: self.class.label().to_string(),
        }
    }

    /// Generate every candidate of the class within bounds.
    ///
    /// Either the complete set is returned or an error, never a partial set.
    #[tracing::instrument(skip_all, level = "debug", fields(class = self.class.label()))]
    pub fn generate(&self) -> Result<Vec<FormulaCandidate>, GenerationError> {
        let mut candidates = Vec::new();
        let (c_lo, c_hi) = self.carbon_span();
        let (min_dbe, _) = self.bounds.dbe;
        let mut visited = 0usize;
        for c in c_lo..=c_hi {
            let h_stop = self.hydrogen_stop(c);
            let mut h = self.hydrogen_start(c);
            while h <= h_stop {
                visited += 1;
                let dbe = self.dbe(c, h);
                if dbe < min_dbe {
                    break;
                }
                let candidate = self.make_candidate(c, h);
                if self.bounds.admits(&candidate) {
                    if candidates.len() >= self.bounds.max_candidates {
                        return Err(GenerationError::CandidateLimitExceeded {
                            class_label: self.class.label().to_string(),
                            limit: self.bounds.max_candidates,
                        });
                    }
                    candidates.push(candidate);
                }
                h += 2;
            }
            trace!("C{c}: {} candidates so far", candidates.len());
        }
        debug!(
            "Generated {} candidates for {} from {visited} visited compositions",
            candidates.len(),
            self.class
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn bounds() -> GenerationBounds {
        GenerationBounds {
            carbon: (1, 50),
            hydrogen: (4, 100),
            dbe: (0.0, 50.0),
            h_c: (0.3, 3.0),
            o_c: (0.0, 1.2),
            max_candidates: 1_000_000,
        }
    }

    /// Walk the whole C/H lattice without pruning
    fn brute_force(class: &HeteroatomClass, bounds: GenerationBounds) -> Vec<String> {
        let gen = FormulaGenerator::new(class, bounds).unwrap();
        let mut out = Vec::new();
        for c in bounds.carbon.0..=bounds.carbon.1 {
            for h in bounds.hydrogen.0..=bounds.hydrogen.1 {
                let dbe = gen.dbe(c, h);
                if dbe.fract() != 0.0 {
                    continue;
                }
                let cand = gen.make_candidate(c, h);
                if bounds.admits(&cand) {
                    out.push(cand.formula());
                }
            }
        }
        out.sort();
        out
    }

    #[test]
    fn test_matches_brute_force() {
        for label in ["CH", "O1", "O4", "N1O2", "N1", "S1", "Cl1", "N2O3S1", "P1O4"] {
            let class = HeteroatomClass::parse(label).unwrap();
            let mut generated: Vec<_> = FormulaGenerator::new(&class, bounds())
                .unwrap()
                .generate()
                .unwrap()
                .into_iter()
                .map(|c| c.formula())
                .collect();
            generated.sort();
            let expected = brute_force(&class, bounds());
            assert!(!expected.is_empty(), "{label}");
            assert_eq!(generated, expected, "{label}");
        }
    }

    #[test]
    fn test_filters_hold() {
        let class = HeteroatomClass::parse("N1O3").unwrap();
        let mut b = bounds();
        b.dbe = (2.0, 10.0);
        b.h_c = (0.8, 2.0);
        b.o_c = (0.1, 0.5);
        let candidates = FormulaGenerator::new(&class, b).unwrap().generate().unwrap();
        assert!(!candidates.is_empty());
        for cand in candidates.iter() {
            assert!(cand.dbe >= 2.0 && cand.dbe <= 10.0);
            assert_eq!(cand.dbe.fract(), 0.0);
            assert!(cand.h_c >= 0.8 && cand.h_c <= 2.0);
            assert!(cand.o_c >= 0.1 && cand.o_c <= 0.5);
            assert_eq!(cand.composition.get("H") % 2, 1);
            assert_eq!(cand.class_label, "N1O3");
            assert_eq!(cand.nominal_mass, cand.mass.floor() as i64);
            assert!((cand.mass - cand.composition.mass()).abs() < 1e-9);
        }
        let again = FormulaGenerator::new(&class, b).unwrap().generate().unwrap();
        assert_eq!(candidates, again);
    }

    #[test]
    fn test_known_formula_present() {
        let class = HeteroatomClass::parse("O6").unwrap();
        let candidates = FormulaGenerator::new(&class, bounds())
            .unwrap()
            .generate()
            .unwrap();
        assert!(candidates.iter().any(|c| c.formula() == "C6H12O6"));
    }

    #[test]
    fn test_candidate_limit() {
        let class = HeteroatomClass::hydrocarbon();
        let mut b = bounds();
        b.max_candidates = 10;
        let err = FormulaGenerator::new(&class, b)
            .unwrap()
            .generate()
            .unwrap_err();
        assert_eq!(
            err,
            GenerationError::CandidateLimitExceeded {
                class_label: "CH".into(),
                limit: 10
            }
        );
    }

    #[test]
    fn test_bounds_containment() {
        let narrow = bounds();
        let mut wide = bounds();
        wide.carbon = (1, 60);
        assert!(wide.contains(&narrow));
        assert!(!narrow.contains(&wide));
        assert!(narrow.contains(&narrow));
    }
}
