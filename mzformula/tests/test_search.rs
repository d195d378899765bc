use std::collections::HashMap;

use mzformula::report::FailureKind;
use mzformula::{
    AssignmentStatus, CacheDescriptor, CacheError, ClassStatus, Composition, ElementRange,
    ErrorMethod, FormulaSearchEngine, IonMode, IonType, SearchError, SearchSettings,
};
use mzpeaks::CentroidPeak;

fn small_settings() -> SearchSettings {
    let mut settings = SearchSettings::new(vec![
        ElementRange::new("C", 1, 20),
        ElementRange::new("H", 4, 40),
        ElementRange::new("O", 0, 4),
    ]);
    settings.min_ppm_error = -2.0;
    settings.max_ppm_error = 2.0;
    settings
}

fn protonated_mz(formula: &str) -> f64 {
    let comp: Composition = formula.parse().unwrap();
    IonMode::new(IonType::Protonated, 1).unwrap().mz(comp.mass())
}

fn peaks_for(formulas: &[(&str, f32)]) -> Vec<CentroidPeak> {
    formulas
        .iter()
        .enumerate()
        .map(|(i, (f, abundance))| {
            CentroidPeak::new(protonated_mz(f) * (1.0 + 0.5e-6), *abundance, i as u32)
        })
        .collect()
}

fn open_engine(dir: &tempfile::TempDir) -> FormulaSearchEngine {
    FormulaSearchEngine::open(CacheDescriptor::new(dir.path().join("formulas.db"))).unwrap()
}

#[test_log::test]
fn test_assigns_known_formulas() -> Result<(), SearchError> {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);
    let settings = small_settings();
    let peaks = peaks_for(&[("C10H12O2", 1000.0), ("C6H12O4", 800.0), ("C8H8O3", 600.0)]);

    let result = engine.search(&settings, peaks)?;
    assert_eq!(result.assignments.len(), 3);
    let formulas: HashMap<u32, String> = result
        .assignments
        .iter()
        .map(|a| (a.peak.index, a.best().unwrap().formula()))
        .collect();
    // Indices follow ascending m/z
    assert_eq!(formulas[&0], "C6H12O4");
    assert_eq!(formulas[&1], "C8H8O3");
    assert_eq!(formulas[&2], "C10H12O2");
    for a in result.assignments.iter() {
        assert!((a.best().unwrap().error_ppm - 0.5).abs() < 1e-3);
    }

    assert_eq!(result.report.totals.assigned, 3);
    assert_eq!(result.report.totals.failures, 0);
    assert_eq!(result.report.class("O2").unwrap().matches, 1);

    let by_class = result.by_class();
    assert_eq!(by_class.labels().collect::<Vec<_>>(), vec!["O2", "O3", "O4"]);
    Ok(())
}

#[test_log::test]
fn test_cache_reuse_is_idempotent() -> Result<(), SearchError> {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);
    let settings = small_settings();

    let first = engine.prime_cache(&settings)?;
    assert_eq!(first.totals.hits, 0);
    assert_eq!(first.totals.misses, first.classes.len());
    let rows = engine.cache().row_count()?;
    assert!(rows > 0);
    assert_eq!(first.totals.rows_inserted, rows);

    let second = engine.prime_cache(&settings)?;
    assert_eq!(second.totals.hits, second.classes.len());
    assert_eq!(second.totals.rows_inserted, 0);
    assert_eq!(engine.cache().row_count()?, rows);

    // A new handle on the same file sees the same coverage
    drop(engine);
    let engine = open_engine(&dir);
    let third = engine.prime_cache(&settings)?;
    assert_eq!(third.totals.hits, third.classes.len());
    assert_eq!(engine.cache().row_count()?, rows);
    Ok(())
}

#[test_log::test]
fn test_cache_grows_monotonically() -> Result<(), SearchError> {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);
    let mut settings = SearchSettings::new(vec![
        ElementRange::new("C", 1, 50),
        ElementRange::new("H", 4, 100),
        ElementRange::new("O", 0, 10),
    ]);
    settings.min_dbe = 0.0;
    settings.max_dbe = 50.0;

    engine.prime_cache(&settings)?;
    let labels = engine.cache().class_labels()?;
    assert!(labels
        .iter()
        .all(|l| l == "CH" || (l.starts_with('O') && !l.contains('S'))));
    let before = engine.cache().records()?;

    settings.set_range("S", 0, 2);
    let report = engine.prime_cache(&settings)?;
    assert!(report
        .classes
        .iter()
        .filter(|c| c.status == ClassStatus::Miss)
        .all(|c| c.class_label.contains('S')));

    let after = engine.cache().records()?;
    assert!(after.len() > before.len());
    for (old, new) in before.iter().zip(after.iter()) {
        assert_eq!(old, new);
    }
    assert!(after[before.len()..]
        .iter()
        .all(|r| r.candidate.composition.get("S") > 0));
    Ok(())
}

#[test_log::test]
fn test_schema_mismatch_is_reported_per_class() -> Result<(), SearchError> {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);
    let mut settings = small_settings();
    settings.set_range("Br", 0, 1);

    let peaks = peaks_for(&[("C10H12O2", 1000.0)]);
    let result = engine.search(&settings, peaks.clone())?;
    let failures: Vec<_> = result.report.failures().collect();
    assert!(!failures.is_empty());
    assert!(failures.iter().all(|c| c.class_label.contains("Br")));
    for c in failures.iter() {
        match &c.status {
            ClassStatus::Failed(failure) => assert_eq!(failure.kind, FailureKind::SchemaMismatch),
            _ => unreachable!(),
        }
    }
    assert_eq!(
        result.assignments[0].best().unwrap().formula(),
        "C10H12O2"
    );

    assert!(engine.cache().migrate_add_element("Br")?);
    assert!(!engine.cache().migrate_add_element("Br")?);
    let result = engine.search(&settings, peaks)?;
    assert_eq!(result.report.totals.failures, 0);
    assert_eq!(result.report.class("Br1").unwrap().status, ClassStatus::Miss);
    Ok(())
}

#[test_log::test]
fn test_candidate_limit_fails_class_only() -> Result<(), SearchError> {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);
    let mut settings = small_settings();
    settings.max_candidates_per_class = 10;

    let report = engine.prime_cache(&settings)?;
    assert!(report.totals.failures > 0);
    for c in report.failures() {
        match &c.status {
            ClassStatus::Failed(failure) => assert_eq!(failure.kind, FailureKind::Generation),
            _ => unreachable!(),
        }
        assert_eq!(engine.cache().coverage_count(&c.class_label)?, 0);
    }
    Ok(())
}

#[test_log::test]
fn test_isotopologue_corroboration() -> Result<(), SearchError> {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);
    let settings = small_settings();

    let mono_mz = protonated_mz("C10H12O2");
    let peaks = vec![
        CentroidPeak::new(mono_mz, 10000.0, 0),
        // 10 * 1.07 / 98.93 of the monoisotopic abundance
        CentroidPeak::new(mono_mz + 1.003_354_837_8, 1080.0, 1),
        CentroidPeak::new(protonated_mz("C6H12O4"), 500.0, 2),
    ];
    let result = engine.search(&settings, peaks)?;
    let mono = result.get(1).unwrap();
    assert_eq!(mono.peak.mz, mono_mz);
    let best = mono.best().unwrap();
    assert!(best.is_corroborated());
    let iso = best.corroborating().next().unwrap();
    assert_eq!(iso.isotopologue.label(), "C9 13C1 H12 O2");
    assert_eq!(iso.peak.as_ref().unwrap().index, 2);
    assert!(result.report.totals.isotopologues_matched >= 1);

    let other = result.get(0).unwrap().best().unwrap();
    assert!(!other.is_corroborated());
    Ok(())
}

#[test_log::test]
fn test_adaptive_order_is_fixed() -> Result<(), SearchError> {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);
    let mut settings = small_settings();
    settings.error_method = ErrorMethod::Average;

    let peaks = peaks_for(&[
        ("C10H12O2", 1000.0),
        ("C6H12O4", 800.0),
        ("C8H8O3", 600.0),
        ("C12H16O4", 300.0),
    ]);
    let first = engine.search(&settings, peaks.clone())?;
    let again = engine.search(&settings, peaks.clone())?;
    assert_eq!(first.assignments, again.assignments);

    // Peaks are always matched in ascending m/z order, whatever order they arrive in
    let mut reversed = peaks;
    reversed.reverse();
    let reordered = engine.search(&settings, reversed)?;
    assert_eq!(first.assignments, reordered.assignments);

    let mzs: Vec<f64> = first.assignments.iter().map(|a| a.peak.mz).collect();
    assert!(mzs.windows(2).all(|w| w[0] <= w[1]));
    Ok(())
}

fn peak_at_error(formula: &str, error_ppm: f64, abundance: f32) -> CentroidPeak {
    CentroidPeak::new(protonated_mz(formula) * (1.0 + error_ppm * 1e-6), abundance, 0)
}

#[test_log::test]
fn test_adaptive_window_rejects_later_peak() -> Result<(), SearchError> {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);
    let mut settings = small_settings();
    settings.search_isotopologues = false;
    settings.mz_error_range = 0.5;

    // C6H12O4 has the lower m/z, so its +1.5 ppm error moves the window to (1.0, 2.0)
    // before C10H12O2 is matched at -1.5 ppm, inside the initial (-2.0, 2.0)
    let peaks = vec![
        peak_at_error("C10H12O2", -1.5, 1000.0),
        peak_at_error("C6H12O4", 1.5, 800.0),
    ];

    let fixed = engine.search(&settings, peaks.clone())?;
    assert!(fixed.assignments.iter().all(|a| a.is_assigned()));

    for method in [ErrorMethod::Average, ErrorMethod::Lowest] {
        settings.error_method = method;
        let result = engine.search(&settings, peaks.clone())?;
        let first = result.get(0).unwrap();
        assert_eq!(first.best().unwrap().formula(), "C6H12O4");
        let later = result.get(1).unwrap();
        assert_eq!(later.peak.mz, peaks[0].mz);
        assert!(!later.is_assigned(), "{method:?} accepted {:?}", later.matches);
        assert_eq!(result.report.totals.assigned, 1);
        assert_eq!(result.report.totals.unassigned, 1);

        let again = engine.search(&settings, peaks.clone())?;
        assert_eq!(result.assignments, again.assignments);
        let mut reversed = peaks.clone();
        reversed.reverse();
        let reordered = engine.search(&settings, reversed)?;
        assert_eq!(result.assignments, reordered.assignments);
    }
    Ok(())
}

#[test_log::test]
fn test_first_hit_and_unselected() -> Result<(), SearchError> {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);
    let mut settings = small_settings();
    settings.set_range("N", 0, 2);
    settings.min_ppm_error = -500.0;
    settings.max_ppm_error = 500.0;
    settings.search_isotopologues = false;
    settings.select_best = false;

    let peaks = peaks_for(&[("C10H12O2", 1000.0)]);
    let all = engine.search(&settings, peaks.clone())?;
    let a = &all.assignments[0];
    assert!(a.matches.len() > 1);
    assert_eq!(a.status, AssignmentStatus::Unresolved);

    settings.first_hit = true;
    let first = engine.search(&settings, peaks)?;
    assert_eq!(first.assignments[0].matches.len(), 1);
    Ok(())
}

#[test]
fn test_unavailable_cache() {
    let err = FormulaSearchEngine::open(CacheDescriptor::new(
        "/nonexistent-directory/formulas/cache.db",
    ))
    .unwrap_err();
    assert!(matches!(
        err,
        SearchError::Cache(CacheError::CacheUnavailable { .. })
    ));
}

#[test]
fn test_invalid_constraints() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(&dir);
    let mut settings = small_settings();
    settings.set_range("O", 5, 2);
    let err = engine.search(&settings, Vec::new()).unwrap_err();
    assert!(matches!(err, SearchError::Constraint(_)));
    assert_eq!(engine.cache().row_count().unwrap(), 0);
}
