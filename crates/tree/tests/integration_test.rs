//! Integration tests for the full Resource Tree + Observation + Backup Store
//! pipeline, driven entirely through `hub_tree::DataHub`'s public surface
//! (spec.md §8). Unit tests colocated with each module cover a single
//! component in isolation; these exercise a chain of them together, the way
//! `examples/FrancisVarga-stupid-db/crates/segment/tests/integration_test.rs`
//! drives its document store end to end rather than one layer at a time.

use std::path::PathBuf;

use hub_core::collab::testing::FakeClock;
use hub_core::{DataSample, DataType, HubConfig, NullTimerDriver};
use hub_tree::{DataHub, PushResult, Transform};

fn test_backup_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "hub-tree-it-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn hub(backup_root: PathBuf) -> DataHub<FakeClock, NullTimerDriver> {
    hub_with_wall(backup_root, 0.0)
}

fn hub_with_wall(backup_root: PathBuf, wall: f64) -> DataHub<FakeClock, NullTimerDriver> {
    let config = HubConfig {
        profile: String::new(),
        backup_root,
        max_path_len: 256,
        log_level: "info".into(),
    };
    DataHub::with_collaborators(config, FakeClock::new(wall, 0), NullTimerDriver::default())
}

/// Input -> Observation (mean transform, capped buffer) -> Output, with a
/// default synthesized on the Output's route before the Input ever has a
/// current value (spec.md §4.2 "Default application").
#[test]
fn full_chain_input_through_observation_to_output_with_default() {
    let dir = test_backup_dir();
    let mut hub = hub(dir.clone());
    let root = hub.root();

    let output = hub.get_output(root, "/display/avg", DataType::Numeric, "celsius").unwrap();
    hub.set_default(output, DataSample::numeric(0.0, -1.0)).unwrap();

    let input = hub.get_input(root, "/sensors/temp", DataType::Numeric, "celsius").unwrap();
    let obs = hub.get_observation(root, "/obs/avg").unwrap();
    hub.set_transform(obs, Transform::Mean).unwrap();
    hub.set_max_count(obs, 2).unwrap();
    hub.set_source(obs, input).unwrap();
    // The default fires once, synchronously, because /obs/avg has no
    // current value yet when the route is wired up.
    hub.set_source(output, obs).unwrap();
    let (_, default_value) = hub.current_value(output).unwrap();
    assert_eq!(default_value.as_numeric(), Some(-1.0));

    hub.push(input, DataType::Numeric, DataSample::numeric(1.0, 10.0)).unwrap();
    hub.push(input, DataType::Numeric, DataSample::numeric(2.0, 20.0)).unwrap();

    let (_, obs_value) = hub.current_value(obs).unwrap();
    assert_eq!(obs_value.as_numeric(), Some(15.0));
    let (_, out_value) = hub.current_value(output).unwrap();
    assert_eq!(out_value.as_numeric(), Some(15.0), "output follows its source's reported value");

    std::fs::remove_dir_all(&dir).ok();
}

/// JSON extraction feeding a downstream Output: the Output only ever sees
/// the extracted Numeric type, never raw JSON (spec.md §4.4 "JSON
/// extraction", §4.2 step 3 "type mismatch on fixed-type resource").
#[test]
fn json_extraction_retypes_before_reaching_a_fixed_type_output() {
    let dir = test_backup_dir();
    let mut hub = hub(dir.clone());
    let root = hub.root();

    let obs = hub.get_observation(root, "/obs/extracted").unwrap();
    hub.configure_observation(obs, |o| o.json_extraction = Some("reading.value".into())).unwrap();
    let output = hub.get_output(root, "/display/reading", DataType::Numeric, "units").unwrap();
    hub.set_source(output, obs).unwrap();

    let sample = DataSample::json(1.0, r#"{"reading":{"value":42.5}}"#).unwrap();
    let result = hub.push(obs, DataType::Json, sample).unwrap();
    assert_eq!(result, PushResult::Accepted);

    let (t, v) = hub.current_value(output).unwrap();
    assert_eq!(t, DataType::Numeric);
    assert_eq!(v.as_numeric(), Some(42.5));

    std::fs::remove_dir_all(&dir).ok();
}

/// Pushing a Boolean straight into a Numeric Output is dropped, not
/// coerced (spec.md §4.2 step 3).
#[test]
fn fixed_type_output_drops_mismatched_push() {
    let dir = test_backup_dir();
    let mut hub = hub(dir.clone());
    let root = hub.root();
    let output = hub.get_output(root, "/display/flag", DataType::Numeric, "").unwrap();

    let result = hub.push(output, DataType::Boolean, DataSample::boolean(1.0, true)).unwrap();
    assert_eq!(result, PushResult::Dropped);
    assert!(hub.current_value(output).is_none());

    std::fs::remove_dir_all(&dir).ok();
}

/// Orphan sweep removes a backup file whose observation was deleted, but
/// leaves one still wired up to a live, backup-enabled observation alone
/// (spec.md §4.5 "Orphan sweep", invoked on `leave_update_fence`).
#[test]
fn leaving_the_update_fence_sweeps_orphaned_backup_files_only() {
    let dir = test_backup_dir();
    let mut hub = hub(dir.clone());
    let root = hub.root();

    let keep = hub.get_observation(root, "/obs/keep").unwrap();
    hub.set_max_count(keep, 5).unwrap();
    hub.set_backup_period(keep, 1.0).unwrap();
    hub.push(keep, DataType::Numeric, DataSample::numeric(1.0, 1.0)).unwrap();
    let keep_path = hub_backup::path_for(&dir, &["keep".to_string()]);
    assert!(keep_path.exists());

    let drop = hub.get_observation(root, "/obs/drop").unwrap();
    hub.set_max_count(drop, 5).unwrap();
    hub.set_backup_period(drop, 1.0).unwrap();
    hub.push(drop, DataType::Numeric, DataSample::numeric(1.0, 1.0)).unwrap();
    let drop_path = hub_backup::path_for(&dir, &["drop".to_string()]);
    assert!(drop_path.exists());

    hub.delete_entry(drop).unwrap();
    // delete_entry already removes the one backup file it owns; exercise
    // the sweep separately by writing a stray file with no matching entry.
    let stray_path = hub_backup::path_for(&dir, &["never-existed".to_string()]);
    hub_backup::write_backup(&dir, &["never-existed".to_string()], DataType::Numeric, &[])
        .unwrap();
    assert!(stray_path.exists());

    hub.enter_update_fence();
    hub.leave_update_fence().unwrap();

    assert!(keep_path.exists(), "still-active observation's backup must survive the sweep");
    assert!(!stray_path.exists(), "orphaned backup file must be removed");

    std::fs::remove_dir_all(&dir).ok();
}

/// Restoring a backed-up buffer raises `maxCount` to at least the restored
/// count but leaves `backupPeriod` at zero, i.e. restore does not silently
/// re-enable persistence (spec.md §4.5 "Restore").
#[test]
fn restore_raises_max_count_but_does_not_auto_enable_backup_period() {
    let dir = test_backup_dir();
    {
        let mut hub = hub(dir.clone());
        let root = hub.root();
        let obs = hub.get_observation(root, "/obs/series").unwrap();
        hub.set_max_count(obs, 2).unwrap();
        hub.set_backup_period(obs, 1.0).unwrap();
        hub.push(obs, DataType::Numeric, DataSample::numeric(1.0, 1.0)).unwrap();
        hub.clock().advance_millis(1_100);
        hub.push(obs, DataType::Numeric, DataSample::numeric(2.0, 2.0)).unwrap();
        hub.clock().advance_millis(1_100);
        hub.push(obs, DataType::Numeric, DataSample::numeric(3.0, 3.0)).unwrap();
        // maxCount=2 caps the persisted buffer at [2.0, 3.0].
    }

    let mut hub2 = hub(dir.clone());
    let root = hub2.root();
    // A fresh observation with maxCount defaulted to 0 restores to at least
    // the backed-up count.
    let obs = hub2.get_observation(root, "/obs/series").unwrap();
    let (_, current) = hub2.current_value(obs).unwrap();
    assert_eq!(current.as_numeric(), Some(3.0));
    assert_eq!(hub2.query_min(obs, 100.0).unwrap(), 2.0);

    std::fs::remove_dir_all(&dir).ok();
}

/// Aggregate queries honor the 30-year "seconds before now" vs. absolute
/// epoch convention identically (spec.md §4.4 "Aggregate queries"). Sample
/// and wall-clock timestamps are epoch-scale (past the 30-year cutoff) so
/// that an absolute-epoch `start_time` actually falls inside their range.
#[test]
fn aggregate_query_start_time_convention() {
    let dir = test_backup_dir();
    let now = hub_tree::THIRTY_YEARS_SECS + 40.0;
    let mut hub = hub_with_wall(dir.clone(), now);
    let root = hub.root();
    let obs = hub.get_observation(root, "/obs/series").unwrap();
    hub.set_max_count(obs, 10).unwrap();
    for (t, v) in [(now - 30.0, 1.0), (now - 20.0, 2.0), (now - 10.0, 3.0)] {
        hub.push(obs, DataType::Numeric, DataSample::numeric(t, v)).unwrap();
    }

    // "seconds before now": only samples with timestamp >= now-25 qualify,
    // i.e. now-20 and now-10.
    assert_eq!(hub.query_min(obs, 25.0).unwrap(), 2.0);
    // An absolute epoch timestamp (>= 30 years) selects by absolute value
    // instead: everything at or after now-20.
    assert_eq!(hub.query_min(obs, now - 20.0).unwrap(), 2.0);

    std::fs::remove_dir_all(&dir).ok();
}
