//! End-to-end analysis scenarios over the in-memory store.

mod common;

use bipv_radiation::batch::{ElementStatus, InvocationOutcome, NoopObserver, RunInputs, RunOutcome, RunStatus};
use bipv_radiation::elements::{BuildingElement, Orientation, WallElement};
use bipv_radiation::solar::PrecisionLevel;
use bipv_radiation::weather::{WeatherSeries, WeatherTimePoint, synthetic_tmy};

#[test]
fn single_south_window_daily_peak() {
    let store = common::memory_store();
    let clock = common::manual_clock();
    let sched = common::scheduler(common::test_config(), &store, &clock);
    let inputs = RunInputs::new(
        vec![BuildingElement::vertical("S1", 180.0, 2.0, 0)],
        Vec::new(),
        common::noon_weather(),
    )
    .expect("valid inputs");

    let report = sched.start(Some("scenario-a"), &inputs, &mut NoopObserver).expect("run");
    assert_eq!(report.outcome, InvocationOutcome::Completed);
    assert_eq!(report.summary.outcome, RunOutcome::FullSuccess);

    let results = store.load_results("scenario-a").expect("results");
    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert!(r.annual_irradiation_kwh_m2.is_finite());
    assert!(r.annual_irradiation_kwh_m2 > 0.0);
    assert_eq!(r.annual_energy_potential_kwh, r.annual_irradiation_kwh_m2 * 2.0);
    assert!((r.tilt_deg - 90.0).abs() < 1e-9);
    assert_eq!(r.orientation, Orientation::South);
}

#[test]
fn north_window_is_excluded_with_reason() {
    let store = common::memory_store();
    let clock = common::manual_clock();
    let sched = common::scheduler(common::test_config(), &store, &clock);
    let inputs = RunInputs::new(
        vec![
            BuildingElement::vertical("N1", 0.0, 2.0, 0),
            BuildingElement::vertical("S1", 180.0, 2.0, 0),
        ],
        Vec::new(),
        common::noon_weather(),
    )
    .expect("valid inputs");

    let report = sched.start(Some("scenario-b"), &inputs, &mut NoopObserver).expect("run");
    let results = store.load_results("scenario-b").expect("results");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].element_id, "S1");

    let summary = report.summary;
    assert_eq!(summary.outcome, RunOutcome::SuccessWithExclusions);
    assert_eq!(summary.elements_processed, 2);
    assert_eq!(summary.excluded.len(), 1);
    assert_eq!(summary.excluded[0].element_id, "N1");
    assert!(summary.excluded[0].reason.contains("North"));
}

#[test]
fn rerunning_completed_run_changes_nothing() {
    let store = common::memory_store();
    let clock = common::manual_clock();
    let sched = common::scheduler(common::test_config(), &store, &clock);
    let inputs = common::south_inputs(25);

    sched.start(Some("idem"), &inputs, &mut NoopObserver).expect("first run");
    let first = store.load_results("idem").expect("results");
    let first_records = store.load_records("idem").expect("records");

    let mut rec = common::Recorder::default();
    let again = sched.start(Some("idem"), &inputs, &mut rec).expect("second run");
    assert_eq!(again.outcome, InvocationOutcome::Completed);
    assert!(rec.visited.is_empty());
    assert_eq!(store.load_results("idem").expect("results"), first);
    assert_eq!(store.load_records("idem").expect("records"), first_records);
    assert_eq!(first.len(), 25);
}

#[test]
fn pause_and_resume_matches_uninterrupted_run() {
    let inputs = common::south_inputs(30);

    let straight_store = common::memory_store();
    let clock = common::manual_clock();
    common::scheduler(common::test_config(), &straight_store, &clock)
        .start(Some("r"), &inputs, &mut NoopObserver)
        .expect("uninterrupted run");

    let store = common::memory_store();
    let sched = common::scheduler(common::test_config(), &store, &clock);
    let control = sched.control();
    let mut pauser = common::observer(move |e| {
        if e.index == 16 {
            control.pause().expect("scheduler alive");
        }
    });
    let first = sched.start(Some("r"), &inputs, &mut pauser).expect("paused run");
    assert_eq!(first.outcome, InvocationOutcome::Paused { next_index: 17 });
    assert_eq!(first.summary.status, RunStatus::Paused);

    let second = sched.resume("r", &inputs, &mut NoopObserver).expect("resumed run");
    assert_eq!(second.outcome, InvocationOutcome::Completed);
    assert_eq!(
        store.load_results("r").expect("results"),
        straight_store.load_results("r").expect("results")
    );
}

#[test]
fn degenerate_element_fails_alone() {
    let store = common::memory_store();
    let clock = common::manual_clock();
    let sched = common::scheduler(common::test_config(), &store, &clock);
    let mut elements = common::south_elements(5);
    elements[2] = elements[2].clone().with_normal([0.0, 0.0, 0.0]);
    let inputs = RunInputs::new(elements, Vec::new(), common::noon_weather()).expect("valid inputs");

    let report = sched.start(Some("iso"), &inputs, &mut NoopObserver).expect("run");
    assert_eq!(report.outcome, InvocationOutcome::Completed);
    assert_eq!(report.summary.outcome, RunOutcome::NeedsRestart);
    assert_eq!(report.summary.failed.len(), 1);
    assert_eq!(report.summary.failed[0].element_id, "E003");
    assert!(report.summary.failed[0].reason.contains("degenerate"));
    assert_eq!(store.load_results("iso").expect("results").len(), 4);
}

#[test]
fn night_only_weather_excludes_everything() {
    let store = common::memory_store();
    let clock = common::manual_clock();
    let mut cfg = common::test_config();
    cfg.analysis.precision = PrecisionLevel::Hourly;
    let sched = common::scheduler(cfg, &store, &clock);
    let weather = WeatherSeries::new(
        (1..=30)
            .map(|d| WeatherTimePoint::new(d, 0, 0.0, 0.0, 0.0))
            .collect(),
    )
    .expect("valid series");
    let inputs = RunInputs::new(common::south_elements(3), Vec::new(), weather).expect("valid inputs");

    let report = sched.start(Some("night"), &inputs, &mut NoopObserver).expect("run");
    assert_eq!(report.summary.excluded.len(), 3);
    assert!(report.summary.excluded.iter().all(|n| n.reason.contains("no daylight")));
    assert_eq!(report.summary.avg_annual_irradiation_kwh_m2, 0.0);
    let records = store.load_records("night").expect("records");
    assert!(records.iter().all(|r| r.status == ElementStatus::Skipped));
}

#[test]
fn coarser_precision_samples_fewer_timesteps() {
    let tmy = synthetic_tmy(47.37, 11);
    let element = BuildingElement::vertical("S1", 180.0, 1.0, 3);
    let mut annual = Vec::new();
    for precision in [PrecisionLevel::Hourly, PrecisionLevel::MonthlyAverage, PrecisionLevel::YearlyAverage] {
        let store = common::memory_store();
        let clock = common::manual_clock();
        let mut cfg = common::test_config();
        cfg.analysis.precision = precision;
        let inputs = RunInputs::new(vec![element.clone()], Vec::new(), tmy.clone()).expect("valid inputs");
        common::scheduler(cfg, &store, &clock)
            .start(Some("p"), &inputs, &mut NoopObserver)
            .expect("run");
        let r = store.load_results("p").expect("results").remove(0);
        let monthly: f64 = r.monthly_irradiation_kwh_m2.iter().sum();
        assert!((monthly - r.annual_irradiation_kwh_m2).abs() < 1e-6 * r.annual_irradiation_kwh_m2.max(1.0));
        annual.push((r.diagnostics.sampled_timesteps, r.annual_irradiation_kwh_m2));
    }
    assert_eq!(annual[0].0, 8760);
    assert_eq!(annual[1].0, 12);
    assert_eq!(annual[2].0, 4);
    assert!(annual.iter().all(|(_, a)| a.is_finite() && *a > 0.0));
}

#[test]
fn walls_lower_results_and_are_reported() {
    let tmy = synthetic_tmy(47.37, 3);
    let element = BuildingElement::vertical("S1", 180.0, 1.0, 1).with_host_wall("H1");
    let walls = vec![
        WallElement::vertical("H1", 180.0, 1, 8.0, 24.0),
        WallElement::vertical("X1", 200.0, 1, 6.0, 18.0),
    ];
    let run = |walls: Vec<WallElement>| {
        let store = common::memory_store();
        let clock = common::manual_clock();
        let mut cfg = common::test_config();
        cfg.analysis.precision = PrecisionLevel::Hourly;
        let inputs = RunInputs::new(vec![element.clone()], walls, tmy.clone()).expect("valid inputs");
        common::scheduler(cfg, &store, &clock)
            .start(Some("w"), &inputs, &mut NoopObserver)
            .expect("run");
        store.load_results("w").expect("results").remove(0)
    };
    let open = run(Vec::new());
    let shaded = run(walls);
    assert!(shaded.annual_irradiation_kwh_m2 < open.annual_irradiation_kwh_m2);
    assert!(shaded.diagnostics.shading_modeled);
    assert!(!open.diagnostics.shading_modeled);
}
