//! The experimental peak list a search runs over
use std::convert::Infallible;

use mzpeaks::{CentroidPeak, PeakCollection, PeakSet, Tolerance};
use tracing::warn;

/// A source of centroided peaks, such as a peak list file reader.
pub trait PeakListProvider {
    type Error;

    fn peaks(&mut self) -> Result<Vec<CentroidPeak>, Self::Error>;
}

impl PeakListProvider for Vec<CentroidPeak> {
    type Error = Infallible;

    fn peaks(&mut self) -> Result<Vec<CentroidPeak>, Self::Error> {
        Ok(std::mem::take(self))
    }
}

/// The coarse [`PeakCollection::between`] search is widened by this much so that peaks
/// lying exactly on a bound are found, then trimmed to the exact range
const SEARCH_SLACK_PPM: f64 = 1.0;

/// Peaks ordered by ascending m/z, the order they are matched in.
///
/// Backed by a [`PeakSet`], which sorts the peaks and reassigns each peak's index to its
/// position in that order. That index identifies the peak in results, whatever index it
/// arrived with.
#[derive(Debug, Default, Clone)]
pub struct SpectrumPeaks {
    peaks: PeakSet,
    min_abundance: f32,
}

impl SpectrumPeaks {
    pub fn new(mut peaks: Vec<CentroidPeak>) -> Self {
        let n = peaks.len();
        peaks.retain(|p| p.mz.is_finite() && p.mz > 0.0 && p.intensity.is_finite());
        if peaks.len() != n {
            warn!("Dropped {} peaks with invalid m/z or abundance", n - peaks.len());
        }
        let peaks = PeakSet::new(peaks);
        let min_abundance = peaks
            .iter()
            .map(|p| p.intensity)
            .filter(|i| *i > 0.0)
            .fold(f32::INFINITY, f32::min);
        Self {
            peaks,
            min_abundance: if min_abundance.is_finite() {
                min_abundance
            } else {
                0.0
            },
        }
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CentroidPeak> {
        self.peaks.iter()
    }

    pub fn as_slice(&self) -> &[CentroidPeak] {
        self.peaks.as_slice()
    }

    /// The peak with spectrum index `i`
    pub fn get(&self, i: usize) -> Option<&CentroidPeak> {
        self.peaks.as_slice().get(i)
    }

    /// The smallest non-zero abundance in the spectrum
    pub fn min_abundance(&self) -> f32 {
        self.min_abundance
    }

    /// All peaks with `low <= m/z <= high`
    pub fn between(&self, low: f64, high: f64) -> &[CentroidPeak] {
        if low.is_nan() || high.is_nan() || low > high {
            return &[];
        }
        let found = self
            .peaks
            .between(low, high, Tolerance::PPM(SEARCH_SLACK_PPM));
        let start = found.iter().take_while(|p| p.mz < low).count();
        let end = found.len() - found.iter().rev().take_while(|p| p.mz > high).count();
        &found[start..end.max(start)]
    }
}

impl From<Vec<CentroidPeak>> for SpectrumPeaks {
    fn from(value: Vec<CentroidPeak>) -> Self {
        Self::new(value)
    }
}

impl FromIterator<CentroidPeak> for SpectrumPeaks {
    fn from_iter<T: IntoIterator<Item = CentroidPeak>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
