//! Natural-abundance isotopologue prediction and the search for them in a spectrum.
//!
//! An isotopologue is described by how many atoms of each element carry a minor
//! isotope. Its abundance relative to the all-major-isotope (monoisotopic) species is
//! the multinomial probability ratio
//!
//! ```text
//! Π_e  n_e! / ((n_e - K_e)! Π_j k_ej!)  Π_j (a_ej / a_e0)^k_ej
//! ```
//!
//! where `n_e` is the count of element `e`, `k_ej` the number of its atoms carrying
//! minor isotope `j`, `K_e = Σ_j k_ej`, and `a` the natural abundances.
use itertools::Itertools;
use mzpeaks::CentroidPeak;
use tracing::trace;

use crate::assignment::FormulaMatch;
use crate::elements::Element;
use crate::formula::{ppm_error, Composition};
use crate::peaks::SpectrumPeaks;
use crate::settings::SearchSettings;

/// `count` atoms of `element` carrying the isotope with `mass_number`
#[derive(Debug, Clone, PartialEq)]
pub struct IsotopeSubstitution {
    pub element: &'static Element,
    pub mass_number: u16,
    pub count: u32,
}

impl IsotopeSubstitution {
    /// The isotope's column label, e.g. `13C`
    pub fn label(&self) -> String {
        format!("{}{}", self.mass_number, self.element.symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Isotopologue {
    pub substitutions: Vec<IsotopeSubstitution>,
    /// Abundance relative to the monoisotopic species
    pub abundance_ratio: f64,
    /// Mass relative to the monoisotopic species
    pub mass_shift: f64,
    label: String,
}

impl Isotopologue {
    /// A formula string with minor isotopes written after the element they substitute,
    /// e.g. `C9 13C1 H12 O2`
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn substitution_count(&self) -> u32 {
        self.substitutions.iter().map(|s| s.count).sum()
    }

    /// The atom counts of this isotopologue, with minor isotopes under their own label
    pub fn counts(&self, mono: &Composition) -> Vec<(String, u32)> {
        substituted_counts(mono, &self.substitutions)
    }

    fn make_label(mono: &Composition, substitutions: &[IsotopeSubstitution]) -> String {
        substituted_counts(mono, substitutions)
            .into_iter()
            .map(|(label, n)| format!("{label}{n}"))
            .join(" ")
    }
}

/// Each element of `mono` in table order, its count reduced by `substitutions`, followed
/// by the minor isotopes substituting for it
fn substituted_counts(
    mono: &Composition,
    substitutions: &[IsotopeSubstitution],
) -> Vec<(String, u32)> {
    let mut out = Vec::new();
    for (element, n) in mono.iter() {
        let subs: Vec<_> = substitutions
            .iter()
            .filter(|s| s.element.symbol == element.symbol)
            .collect();
        let substituted: u32 = subs.iter().map(|s| s.count).sum();
        if n > substituted {
            out.push((element.symbol.to_string(), n - substituted));
        }
        for s in subs {
            out.push((s.label(), s.count));
        }
    }
    out
}

/// Percent difference of an observed abundance from the expected one,
/// `(theoretical - experimental) / theoretical * 100`
#[inline]
pub fn abundance_error(theoretical: f64, experimental: f64) -> f64 {
    (theoretical - experimental) / theoretical * 100.0
}

/// A predicted isotopologue of a formula match and the peak found for it, if any
#[derive(Debug, Clone, PartialEq)]
pub struct IsotopologueMatch {
    pub isotopologue: Isotopologue,
    pub mz_calc: f64,
    /// The abundance the isotopologue should have given the monoisotopic peak's abundance
    pub expected_abundance: f64,
    pub peak: Option<CentroidPeak>,
    pub error_ppm: Option<f64>,
    pub abundance_error: Option<f64>,
}

impl IsotopologueMatch {
    pub fn is_matched(&self) -> bool {
        self.peak.is_some()
    }
}

/// The ways one element's atoms can carry minor isotopes, up to a budget
#[derive(Debug, Clone)]
struct ElementOption {
    substitutions: Vec<IsotopeSubstitution>,
    total: u32,
    ratio: f64,
    mass_shift: f64,
}

fn element_options(element: &'static Element, n: u32, budget: u32) -> Vec<ElementOption> {
    let mut out = Vec::new();
    let mut counts = vec![0u32; element.minor_isotopes().len()];

    fn recurse(
        element: &'static Element,
        n: u32,
        budget: u32,
        i: usize,
        counts: &mut [u32],
        out: &mut Vec<ElementOption>,
    ) {
        let minors = element.minor_isotopes();
        if i == minors.len() {
            let total: u32 = counts.iter().sum();
            if total == 0 {
                return;
            }
            let major = element.monoisotopic();
            // n! / (n - K)!
            let mut ratio: f64 = (0..total).map(|j| (n - j) as f64).product();
            let mut mass_shift = 0.0;
            let mut substitutions = Vec::new();
            for (iso, k) in minors.iter().zip(counts.iter()) {
                if *k == 0 {
                    continue;
                }
                let k_fact: f64 = (1..=*k).map(|j| j as f64).product();
                ratio *= (iso.abundance / major.abundance).powi(*k as i32) / k_fact;
                mass_shift += (iso.mass - major.mass) * *k as f64;
                substitutions.push(IsotopeSubstitution {
                    element,
                    mass_number: iso.neutrons,
                    count: *k,
                });
            }
            out.push(ElementOption {
                substitutions,
                total,
                ratio,
                mass_shift,
            });
            return;
        }
        let used: u32 = counts[..i].iter().sum();
        let remaining = budget.min(n).saturating_sub(used);
        for k in 0..=remaining {
            counts[i] = k;
            recurse(element, n, budget, i + 1, counts, out);
        }
        counts[i] = 0;
    }

    if counts.is_empty() || element.monoisotopic().abundance <= 0.0 {
        return out;
    }
    recurse(element, n, budget, 0, &mut counts, &mut out);
    out
}

/// Predicts isotopologues for formula matches and looks for them in the spectrum
#[derive(Debug, Clone, PartialEq)]
pub struct IsotopologuePredictor {
    /// The maximum number of minor isotope atoms in one isotopologue
    pub max_substitutions: u32,
    /// Accepted ppm error of an isotopologue peak
    pub ppm_bounds: (f64, f64),
    /// Accepted abundance error, in percent
    pub abundance_error_bounds: (f64, f64),
    pub dynamic_range: f64,
}

impl Default for IsotopologuePredictor {
    fn default() -> Self {
        Self::from_settings(&SearchSettings::default())
    }
}

impl IsotopologuePredictor {
    pub fn new(
        max_substitutions: u32,
        ppm_bounds: (f64, f64),
        abundance_error_bounds: (f64, f64),
        dynamic_range: f64,
    ) -> Self {
        Self {
            max_substitutions,
            ppm_bounds,
            abundance_error_bounds,
            dynamic_range,
        }
    }

    pub fn from_settings(settings: &SearchSettings) -> Self {
        Self::new(
            settings.max_isotopologue_substitutions,
            settings.ppm_bounds(),
            (settings.min_abun_error, settings.max_abun_error),
            settings.dynamic_range,
        )
    }

    /// The smallest abundance ratio worth looking for next to a monoisotopic peak of
    /// `mono_abundance`, in a spectrum whose weakest peak is `spectrum_min_abundance`
    pub fn cutoff(&self, mono_abundance: f64, spectrum_min_abundance: f64) -> f64 {
        let by_range = if self.dynamic_range > 0.0 {
            1.0 / self.dynamic_range
        } else {
            0.0
        };
        let by_spectrum = if mono_abundance > 0.0 {
            spectrum_min_abundance / mono_abundance
        } else {
            f64::INFINITY
        };
        by_range.max(by_spectrum)
    }

    /// Every isotopologue of `composition` with at most `max_substitutions` minor isotope
    /// atoms and an abundance ratio of at least `min_ratio`, most abundant first
    pub fn enumerate(&self, composition: &Composition, min_ratio: f64) -> Vec<Isotopologue> {
        let per_element: Vec<Vec<ElementOption>> = composition
            .iter()
            .map(|(e, n)| element_options(e, n, self.max_substitutions))
            .filter(|opts| !opts.is_empty())
            .collect();

        let mut out = Vec::new();
        let mut chosen: Vec<&ElementOption> = Vec::new();

        fn combine<'a>(
            per_element: &'a [Vec<ElementOption>],
            i: usize,
            budget: u32,
            ratio: f64,
            chosen: &mut Vec<&'a ElementOption>,
            min_ratio: f64,
            mono: &Composition,
            out: &mut Vec<Isotopologue>,
        ) {
            if i == per_element.len() {
                if chosen.is_empty() || ratio < min_ratio {
                    return;
                }
                let substitutions: Vec<IsotopeSubstitution> = chosen
                    .iter()
                    .flat_map(|o| o.substitutions.iter().cloned())
                    .collect();
                let mass_shift = chosen.iter().map(|o| o.mass_shift).sum();
                let label = Isotopologue::make_label(mono, &substitutions);
                out.push(Isotopologue {
                    substitutions,
                    abundance_ratio: ratio,
                    mass_shift,
                    label,
                });
                return;
            }
            // This element keeps all of its atoms at the major isotope
            combine(per_element, i + 1, budget, ratio, chosen, min_ratio, mono, out);
            for opt in per_element[i].iter() {
                if opt.total > budget {
                    continue;
                }
                chosen.push(opt);
                combine(
                    per_element,
                    i + 1,
                    budget - opt.total,
                    ratio * opt.ratio,
                    chosen,
                    min_ratio,
                    mono,
                    out,
                );
                chosen.pop();
            }
        }

        combine(
            &per_element,
            0,
            self.max_substitutions,
            1.0,
            &mut chosen,
            min_ratio,
            composition,
            &mut out,
        );
        out.sort_by(|a, b| b.abundance_ratio.total_cmp(&a.abundance_ratio));
        out
    }

    /// Predict the isotopologues of `formula_match` observed as `mono_peak` and find the
    /// peak in `spectrum` that best corroborates each.
    ///
    /// A peak corroborates an isotopologue when both its ppm error and its abundance error
    /// are in bounds. When several do, the one with the smallest absolute ppm error wins.
    pub fn corroborate(
        &self,
        formula_match: &FormulaMatch,
        mono_peak: &CentroidPeak,
        spectrum: &SpectrumPeaks,
    ) -> Vec<IsotopologueMatch> {
        let mono_abundance = mono_peak.intensity as f64;
        if mono_abundance <= 0.0 {
            return Vec::new();
        }
        let cutoff = self.cutoff(mono_abundance, spectrum.min_abundance() as f64);
        let z = formula_match.charge.unsigned_abs().max(1) as f64;
        let (min_ppm, max_ppm) = self.ppm_bounds;
        let (min_abun, max_abun) = self.abundance_error_bounds;

        let isotopologues = self.enumerate(&formula_match.candidate.composition, cutoff);
        trace!(
            "{} has {} isotopologues above {cutoff:0.4}",
            formula_match.candidate.composition,
            isotopologues.len()
        );
        isotopologues
            .into_iter()
            .map(|isotopologue| {
                let mz_calc = formula_match.mz_calc + isotopologue.mass_shift / z;
                let expected_abundance = isotopologue.abundance_ratio * mono_abundance;
                let best = spectrum
                    .between(mz_calc * (1.0 + min_ppm * 1e-6), mz_calc * (1.0 + max_ppm * 1e-6))
                    .iter()
                    .filter(|p| p.index != mono_peak.index)
                    .filter_map(|p| {
                        let error = ppm_error(p.mz, mz_calc);
                        let abun_error = abundance_error(expected_abundance, p.intensity as f64);
                        if min_ppm <= error
                            && error <= max_ppm
                            && min_abun <= abun_error
                            && abun_error <= max_abun
                        {
                            Some((p, error, abun_error))
                        } else {
                            None
                        }
                    })
                    .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()));
                IsotopologueMatch {
                    isotopologue,
                    mz_calc,
                    expected_abundance,
                    peak: best.map(|(p, ..)| p.clone()),
                    error_ppm: best.map(|(_, e, _)| e),
                    abundance_error: best.map(|(.., a)| a),
                }
            })
            .collect()
    }
}
