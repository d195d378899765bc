//! The elements formulas may be built from. Masses and isotope abundances come from
//! [`chemical_elements::PERIODIC_TABLE`]. Only the valence used for DBE calculations is
//! kept here.
use std::fmt::Display;
use std::sync::LazyLock;

use chemical_elements::{ElementSpecification, PERIODIC_TABLE};

pub use chemical_elements::{Isotope, PROTON};

/// The rest mass of an electron in daltons
pub const ELECTRON_MASS: f64 = 0.000_548_579_909_065;

/// The supported elements and their valences, in composition column order
const VALENCES: &[(&str, i32)] = &[
    ("C", 4),
    ("H", 1),
    ("N", 3),
    ("O", 2),
    ("S", 2),
    ("P", 3),
    ("F", 1),
    ("Cl", 1),
    ("Br", 1),
    ("I", 1),
    ("Na", 1),
    ("K", 1),
    ("Si", 4),
];

/// A supported element with its valence. Its stable isotopes are ordered most abundant
/// first, then by mass number.
#[derive(Debug)]
pub struct Element {
    pub symbol: &'static str,
    pub valence: i32,
    entry: &'static chemical_elements::Element,
    isotopes: Vec<&'static Isotope>,
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
    }
}

impl Element {
    fn from_table(symbol: &str, valence: i32) -> Option<Self> {
        let entry = PERIODIC_TABLE.get(symbol)?;
        let mut isotopes: Vec<&'static Isotope> = entry
            .isotopes
            .values()
            .filter(|iso| iso.abundance > 0.0)
            .collect();
        if isotopes.is_empty() {
            return None;
        }
        isotopes.sort_by_key(|iso| (iso.neutrons != entry.most_abundant_isotope, iso.neutrons));
        if isotopes[0].neutrons != entry.most_abundant_isotope {
            return None;
        }
        Some(Self {
            symbol: entry.symbol.as_str(),
            valence,
            entry,
            isotopes,
        })
    }

    #[inline]
    pub fn monoisotopic(&self) -> &Isotope {
        self.isotopes[0]
    }

    #[inline]
    pub fn monoisotopic_mass(&self) -> f64 {
        self.entry.most_abundant_mass
    }

    /// The isotopes other than the most abundant one
    pub fn minor_isotopes(&self) -> &[&'static Isotope] {
        &self.isotopes[1..]
    }

    /// The key this element is stored under in a [`chemical_elements::ChemicalComposition`]
    pub fn specification(&self) -> ElementSpecification<'static> {
        ElementSpecification::new(self.entry, 0)
    }

    /// The position of this element in [`ELEMENTS`], used for ordering
    pub fn position(&self) -> usize {
        ELEMENTS
            .iter()
            .position(|e| e.symbol == self.symbol)
            .unwrap_or(ELEMENTS.len())
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol)
    }
}

/// Every element a formula may contain, in the order used for composition columns
pub static ELEMENTS: LazyLock<Vec<Element>> = LazyLock::new(|| {
    VALENCES
        .iter()
        .filter_map(|(symbol, valence)| Element::from_table(symbol, *valence))
        .collect()
});

/// Look up an element by its symbol, case-sensitive
pub fn lookup(symbol: &str) -> Option<&'static Element> {
    ELEMENTS.iter().find(|e| e.symbol == symbol)
}

#[inline]
pub fn carbon() -> &'static Element {
    &ELEMENTS[0]
}

#[inline]
pub fn hydrogen() -> &'static Element {
    &ELEMENTS[1]
}
