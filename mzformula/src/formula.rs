//! Elemental compositions and the formula candidates built from them
use std::fmt::Display;
use std::str::FromStr;

use chemical_elements::{neutral_mass, ChemicalComposition, FormulaParserError};
use thiserror::Error;

use crate::constraints::HeteroatomClass;
use crate::elements::{self, Element, ELECTRON_MASS, PROTON};

#[derive(Debug, Clone, Error)]
pub enum CompositionParseError {
    #[error("{0} is not a supported element")]
    UnknownElement(String),
    #[error("Fixed isotope {0} is not allowed in a composition")]
    FixedIsotope(String),
    #[error("Malformed formula {formula:?}: {source}")]
    Malformed {
        formula: String,
        #[source]
        source: FormulaParserError,
    },
}

/// A full elemental composition, including C and H, over the supported [`elements::ELEMENTS`].
///
/// Compositions compare equal by their element counts, which makes them suitable as the
/// unique identity of a formula. Zero counts are never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Composition {
    inner: ChemicalComposition<'static>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, element: &'static Element, count: u32) {
        let spec = element.specification();
        if count > 0 {
            self.inner.set(spec, count as i32);
        } else if self.inner.get(&spec) != 0 {
            let kept: Vec<_> = self
                .inner
                .iter()
                .filter(|(k, _)| **k != spec)
                .map(|(k, v)| (*k, *v))
                .collect();
            self.inner = ChemicalComposition::from(kept);
        }
    }

    pub fn get(&self, symbol: &str) -> u32 {
        self.inner.get_str(symbol).max(0) as u32
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate over elements and their counts in [`elements::ELEMENTS`] order
    pub fn iter(&self) -> impl Iterator<Item = (&'static Element, u32)> + '_ {
        elements::ELEMENTS.iter().filter_map(|e| {
            let n = self.get(e.symbol);
            if n > 0 {
                Some((e, n))
            } else {
                None
            }
        })
    }

    /// The underlying [`ChemicalComposition`]
    pub fn as_chemical_composition(&self) -> &ChemicalComposition<'static> {
        &self.inner
    }

    /// The monoisotopic neutral mass
    pub fn mass(&self) -> f64 {
        self.inner.mass()
    }

    /// Rings plus double bonds, `1 + Σ nᵢ(vᵢ - 2) / 2` over every element present
    pub fn dbe(&self) -> f64 {
        1.0 + self
            .iter()
            .map(|(e, n)| n as f64 * (e.valence - 2) as f64)
            .sum::<f64>()
            / 2.0
    }

    pub fn h_c(&self) -> f64 {
        ratio(self.get("H"), self.get("C"))
    }

    pub fn o_c(&self) -> f64 {
        ratio(self.get("O"), self.get("C"))
    }

    /// The aromaticity index. With `modified`, oxygen counts as half of its atoms, which
    /// assumes half of the oxygen is bound in carbonyl groups. Zero when either term of the
    /// ratio is not positive.
    pub fn aromaticity_index(&self, modified: bool) -> f64 {
        let [c, h, n, o, s, p] = ["C", "H", "N", "O", "S", "P"].map(|sym| self.get(sym) as f64);
        let o = if modified { 0.5 * o } else { o };
        let numerator = 1.0 + c - o - s - 0.5 * h;
        let denominator = c - o - s - n - p;
        if numerator <= 0.0 || denominator <= 0.0 {
            0.0
        } else {
            numerator / denominator
        }
    }

    /// The nominal oxidation state of carbon, zero for compositions without carbon
    pub fn nosc(&self) -> f64 {
        let [c, h, n, o, s] = ["C", "H", "N", "O", "S"].map(|sym| self.get(sym) as f64);
        if c == 0.0 {
            return 0.0;
        }
        4.0 - (4.0 * c + h - 3.0 * n - 2.0 * o - 2.0 * s) / c
    }

    /// The heteroatom class this composition belongs to
    pub fn heteroatom_class(&self) -> HeteroatomClass {
        // Only C and H are rejected by `HeteroatomClass::new`, and they are filtered here
        HeteroatomClass::new(self.iter().filter(|(e, _)| e.symbol != "C" && e.symbol != "H"))
            .unwrap_or_else(|_| HeteroatomClass::hydrocarbon())
    }

    /// The total number of atoms that are neither C nor H
    pub fn heteroatom_count(&self) -> u32 {
        self.iter()
            .filter(|(e, _)| e.symbol != "C" && e.symbol != "H")
            .map(|(_, n)| n)
            .sum()
    }
}

fn ratio(numerator: u32, denominator: u32) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Formats as a compact Hill-ordered formula with explicit counts, e.g. `C6H12O6`
impl Display for Composition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

/// The element symbols named in `formula`, an uppercase letter and any lowercase letters
/// following it
fn element_symbols(formula: &str) -> impl Iterator<Item = &str> {
    formula
        .match_indices(|c: char| c.is_ascii_uppercase())
        .map(move |(i, _)| {
            let rest = &formula[i..];
            let end = rest[1..]
                .find(|c: char| !c.is_ascii_lowercase())
                .map_or(rest.len(), |e| e + 1);
            &rest[..end]
        })
}

impl FromStr for Composition {
    type Err = CompositionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.split_whitespace().collect();
        if compact.is_empty() {
            return Ok(Composition::new());
        }
        // The formula parser cannot report symbols missing from its periodic table
        if let Some(symbol) = element_symbols(&compact).find(|sym| elements::lookup(sym).is_none())
        {
            return Err(CompositionParseError::UnknownElement(symbol.to_string()));
        }
        let parsed =
            ChemicalComposition::parse(&compact).map_err(|source| CompositionParseError::Malformed {
                formula: s.to_string(),
                source,
            })?;
        let mut comp = Composition::new();
        for (spec, count) in parsed.iter() {
            if spec.isotope != 0 {
                return Err(CompositionParseError::FixedIsotope(spec.to_string()));
            }
            let element = elements::lookup(&spec.element.symbol)
                .ok_or_else(|| CompositionParseError::UnknownElement(spec.element.symbol.clone()))?;
            comp.set(element, (*count).max(0) as u32);
        }
        Ok(comp)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Composition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Composition {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// How a neutral formula becomes a charged ion
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum IonType {
    /// `[M+H]+` or `[M-H]-`
    Protonated,
    /// `M+•` or `M-•`
    Radical,
    /// `[M+X]+` or `[M+X]-` for the named adduct element
    Adduct(String),
}

impl IonType {
    pub fn adduct_element(&self) -> Option<&str> {
        match self {
            IonType::Adduct(sym) => Some(sym.as_str()),
            _ => None,
        }
    }
}

impl Display for IonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IonType::Protonated => f.write_str("protonated"),
            IonType::Radical => f.write_str("radical"),
            IonType::Adduct(_) => f.write_str("adduct"),
        }
    }
}

/// An [`IonType`] paired with the mass each unit of charge carries
#[derive(Debug, Clone, PartialEq)]
pub struct IonMode {
    pub ion_type: IonType,
    pub charge: i32,
    charge_carrier: f64,
}

impl IonMode {
    /// Resolve the charge carrier for an ion type. Returns `None` when an adduct names an
    /// unknown element or `charge` is zero.
    pub fn new(ion_type: IonType, charge: i32) -> Option<Self> {
        if charge == 0 {
            return None;
        }
        let charge_carrier = match &ion_type {
            IonType::Protonated => PROTON,
            IonType::Radical => -ELECTRON_MASS,
            IonType::Adduct(sym) => {
                let adduct = elements::lookup(sym)?.monoisotopic_mass();
                charge.signum() as f64 * adduct - ELECTRON_MASS
            }
        };
        Some(Self {
            ion_type,
            charge,
            charge_carrier,
        })
    }

    /// The m/z of an ion of this mode formed from `mass`
    pub fn mz(&self, mass: f64) -> f64 {
        (mass + self.charge as f64 * self.charge_carrier) / self.charge.abs() as f64
    }

    /// The neutral mass that would produce an ion of this mode at `mz`
    pub fn neutral_mass(&self, mz: f64) -> f64 {
        neutral_mass(mz, self.charge, self.charge_carrier)
    }
}

/// A generated formula and the properties searches filter and bucket it by
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FormulaCandidate {
    pub composition: Composition,
    /// Monoisotopic neutral mass
    pub mass: f64,
    /// `floor(mass)`, the bucket key for lookups
    pub nominal_mass: i64,
    pub dbe: f64,
    pub h_c: f64,
    pub o_c: f64,
    pub class_label: String,
}

impl FormulaCandidate {
    pub fn from_composition(composition: Composition) -> Self {
        let mass = composition.mass();
        let class_label = composition.heteroatom_class().label().to_string();
        Self {
            mass,
            nominal_mass: nominal_mass(mass),
            dbe: composition.dbe(),
            h_c: composition.h_c(),
            o_c: composition.o_c(),
            composition,
            class_label,
        }
    }

    pub fn formula(&self) -> String {
        self.composition.to_string()
    }

    pub fn heteroatom_count(&self) -> u32 {
        self.composition.heteroatom_count()
    }

    pub fn mz(&self, ion_mode: &IonMode) -> f64 {
        ion_mode.mz(self.mass)
    }
}

#[inline]
pub fn nominal_mass(mass: f64) -> i64 {
    mass.floor() as i64
}

/// Signed mass error in parts-per-million of `calculated`
#[inline]
pub fn ppm_error(observed: f64, calculated: f64) -> f64 {
    (observed - calculated) / calculated * 1e6
}
