use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use laptimer::config::StorageBackend;
use laptimer::logging::init_test_logging;
use laptimer::source::{LineDecoder, ScriptedEvent, ScriptedFeed};
use laptimer::store::{CsvBackend, MemoryBackend, SqliteBackend};
use laptimer::{
    Config, Detection, DetectionToken, Error, LapStore, ListenerOptions, PumpReport, RaceState,
    SignalListener, Timekeeper,
};

fn at(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap()
}

fn token(value: &str) -> DetectionToken {
    DetectionToken::new(value).unwrap()
}

fn ms(delta: Option<TimeDelta>) -> Option<i64> {
    delta.map(|d| d.num_milliseconds())
}

fn fast_listener() -> SignalListener {
    SignalListener::new(ListenerOptions {
        poll_interval: Duration::from_millis(5),
        stop_timeout: Duration::from_secs(2),
        decoder: LineDecoder::tags(),
    })
}

fn memory_keeper() -> (Timekeeper, MemoryBackend) {
    let backend = MemoryBackend::new();
    let store = LapStore::open(Box::new(backend.clone())).unwrap();
    (Timekeeper::new(fast_listener(), store), backend)
}

/// Pump until `done` holds for the accumulated reports, or two seconds pass.
fn pump_until(
    keeper: &mut Timekeeper,
    mut done: impl FnMut(&[PumpReport]) -> bool,
) -> Vec<PumpReport> {
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut reports = Vec::new();
    while Instant::now() < deadline {
        reports.push(keeper.pump().unwrap());
        if done(&reports) {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    reports
}

fn recorded(reports: &[PumpReport]) -> usize {
    reports.iter().map(|r| r.recorded.len()).sum()
}

#[test]
fn test_single_token_lap_sequence_persists() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lap_times.csv");

    let store = LapStore::open(Box::new(CsvBackend::new(&path))).unwrap();
    let mut keeper = Timekeeper::new(fast_listener(), store);
    keeper.start_race();

    let expected = [
        (0, None, None),
        (10_500, Some(10_500), Some(10_500)),
        (19_000, Some(8_500), Some(8_500)),
        (30_000, Some(11_000), Some(8_500)),
    ];
    for (millis, last, best) in expected {
        keeper.process(vec![Detection::at(token("A1"), at(millis))]);
        keeper.store_mut().flush().unwrap();

        let reopened = LapStore::open(Box::new(CsvBackend::new(&path))).unwrap();
        let record = reopened.get(&token("A1")).unwrap();
        assert_eq!(ms(record.last_lap), last, "last lap after t={millis}");
        assert_eq!(ms(record.best_lap), best, "best lap after t={millis}");
        assert_eq!(record.last_seen_at, at(millis));
    }
}

#[test]
fn test_sqlite_store_matches_csv_store() {
    let dir = tempfile::tempdir().unwrap();
    let detections = vec![
        Detection::at(token("A1"), at(0)),
        Detection::at(token("B2"), at(2_000)),
        Detection::at(token("A1"), at(10_500)),
        Detection::at(token("B2"), at(11_250)),
    ];

    let csv = LapStore::open(Box::new(CsvBackend::new(dir.path().join("laps.csv")))).unwrap();
    let sqlite =
        LapStore::open(Box::new(SqliteBackend::open(dir.path().join("laps.db")).unwrap())).unwrap();

    let mut results = Vec::new();
    for store in [csv, sqlite] {
        let mut keeper = Timekeeper::new(fast_listener(), store);
        keeper.start_race();
        keeper.process(detections.clone());
        keeper.shutdown().unwrap();
        results.push(keeper.standings());
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0][0].token.as_str(), "B2");
}

#[test]
fn test_live_detections_become_laps() {
    init_test_logging();
    let (mut keeper, backend) = memory_keeper();
    let feed = ScriptedFeed::new("/dev/ttyUSB0");

    keeper.listen(&feed).unwrap();
    keeper.start_race();

    feed.push_line("1234567890");
    let reports = pump_until(&mut keeper, |reports| recorded(reports) == 1);
    assert_eq!(recorded(&reports), 1);
    assert!(reports.iter().flat_map(|r| &r.recorded).all(|r| r.is_first_pass()));

    thread::sleep(Duration::from_millis(20));
    feed.push_line("1234567890");
    let reports = pump_until(&mut keeper, |reports| recorded(reports) == 1);
    let lap = reports.iter().flat_map(PumpReport::laps).next().unwrap();
    assert!(lap.outcome.duration.unwrap() >= TimeDelta::milliseconds(20));
    assert_eq!(lap.outcome.best, lap.outcome.duration);

    keeper.shutdown().unwrap();
    assert_eq!(backend.saved().len(), 1);
    assert!(!feed.is_open());
}

#[test]
fn test_stopped_race_does_not_touch_records() {
    let (mut keeper, backend) = memory_keeper();
    let feed = ScriptedFeed::new("script");
    keeper.listen(&feed).unwrap();

    keeper.start_race();
    feed.push_line("A1");
    pump_until(&mut keeper, |reports| recorded(reports) == 1);
    let before = keeper.store().snapshot();

    assert!(keeper.stop_race());
    assert_eq!(keeper.race_state(), RaceState::Stopped);
    feed.push_line("A1");
    feed.push_line("B2");
    let reports = pump_until(&mut keeper, |reports| {
        reports.iter().map(|r| r.ignored_stopped).sum::<usize>() == 2
    });

    assert_eq!(reports.iter().map(|r| r.ignored_stopped).sum::<usize>(), 2);
    assert_eq!(keeper.store().snapshot(), before);
    assert_eq!(backend.saved(), before);

    assert!(keeper.start_race());
    assert_eq!(keeper.store().snapshot(), before);
    keeper.shutdown().unwrap();
}

#[test]
fn test_drain_twice_is_empty() {
    let (mut keeper, _) = memory_keeper();
    let feed = ScriptedFeed::new("script");
    feed.push_line("A1");
    feed.push_line("B2");
    keeper.listen(&feed).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while keeper.listener().status().buffered < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(keeper.listener().drain().len(), 2);
    assert!(keeper.listener().drain().is_empty());
    keeper.unlisten().unwrap();
}

#[test]
fn test_unreachable_device() {
    let (mut keeper, _) = memory_keeper();
    let feed = ScriptedFeed::new("/dev/ttyUSB9");
    feed.fail_next_open("No such file or directory");

    let err = keeper.listen(&feed).unwrap_err();
    assert!(matches!(err, Error::Connection { ref address, .. } if address == "/dev/ttyUSB9"));
    assert!(!keeper.listener().is_running());
    assert!(keeper.pump().unwrap().is_empty());
}

#[test]
fn test_unreachable_serial_device_from_config() {
    let mut config = Config::default();
    config.listener.device = "/dev/laptimer-no-such-port".to_string();
    let dir = tempfile::tempdir().unwrap();
    config.storage.path = Some(dir.path().join("laps.csv"));

    let mut keeper = Timekeeper::from_config(&config).unwrap();
    let err = keeper.listen(&config.listener).unwrap_err();
    assert!(err.is_connection_error());
    assert!(err.to_string().contains("/dev/laptimer-no-such-port"));
    assert!(!keeper.listener().is_running());
}

#[test]
fn test_unlisten_leaves_no_worker() {
    let (mut keeper, _) = memory_keeper();
    let feed = ScriptedFeed::new("script");
    keeper.listen(&feed).unwrap();

    let started = Instant::now();
    keeper.unlisten().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!keeper.listener().is_running());
    assert!(!keeper.listener().worker_alive());

    let reads = feed.reads();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(feed.reads(), reads);
}

#[test]
fn test_disconnect_is_surfaced_after_batch() {
    let (mut keeper, backend) = memory_keeper();
    let feed = ScriptedFeed::new("COM3");
    feed.push_line("A1");
    feed.push(ScriptedEvent::Disconnect("device unplugged".to_string()));
    keeper.start_race();
    keeper.listen(&feed).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while keeper.listener().is_running() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }

    let err = keeper.pump().unwrap_err();
    assert!(matches!(err, Error::ConnectionLost { ref address, .. } if address == "COM3"));
    // The line read before the disconnect was recorded and saved.
    assert_eq!(backend.saved().len(), 1);

    // Reported once; the consumer restarts the listener.
    assert!(keeper.pump().unwrap().is_empty());
    feed.push_line("B2");
    keeper.listen(&feed).unwrap();
    let reports = pump_until(&mut keeper, |reports| recorded(reports) == 1);
    assert_eq!(recorded(&reports), 1);
    keeper.shutdown().unwrap();
}

#[test]
fn test_disconnect_wins_over_failed_save() {
    let (mut keeper, backend) = memory_keeper();
    let feed = ScriptedFeed::new("COM3");
    feed.push_line("A1");
    feed.push(ScriptedEvent::Disconnect("device unplugged".to_string()));
    keeper.start_race();
    keeper.listen(&feed).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while keeper.listener().is_running() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }

    backend.fail_saves(true);
    let err = keeper.pump().unwrap_err();
    assert!(matches!(err, Error::ConnectionLost { ref address, .. } if address == "COM3"));
    assert!(keeper.store().get(&token("A1")).is_some());
    assert!(keeper.store().is_dirty());
    assert!(backend.saved().is_empty());

    // The next pump writes the lap and does not report the disconnect again.
    backend.fail_saves(false);
    assert!(keeper.pump().unwrap().is_empty());
    assert!(!keeper.store().is_dirty());
    assert_eq!(backend.saved().len(), 1);
}

#[test]
fn test_persistence_failure_is_retained_and_retried() {
    let (mut keeper, backend) = memory_keeper();
    let feed = ScriptedFeed::new("script");
    keeper.listen(&feed).unwrap();
    keeper.start_race();

    backend.fail_saves(true);
    feed.push_line("A1");
    let deadline = Instant::now() + Duration::from_secs(2);
    let err = loop {
        match keeper.pump() {
            Err(e) => break e,
            Ok(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(5)),
            Ok(_) => panic!("save never failed"),
        }
    };
    assert!(err.is_persistence_error());
    assert!(keeper.store().get(&token("A1")).is_some());
    assert!(keeper.store().is_dirty());

    backend.fail_saves(false);
    keeper.pump().unwrap();
    assert!(!keeper.store().is_dirty());
    assert_eq!(backend.saved().len(), 1);
    keeper.shutdown().unwrap();
}

#[test]
fn test_timekeeper_from_config_uses_session_settings() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.backend = StorageBackend::Sqlite;
    config.storage.path = Some(dir.path().join("laps.db"));
    config.session.dedup_window_ms = 1_000;

    let mut keeper = Timekeeper::from_config(&config).unwrap();
    keeper.start_race();
    let report = keeper.process(vec![
        Detection::at(token("A1"), at(0)),
        Detection::at(token("A1"), at(400)),
        Detection::at(token("A1"), at(9_000)),
    ]);
    assert_eq!(report.deduplicated, 1);
    assert_eq!(report.laps().count(), 1);
    keeper.shutdown().unwrap();

    let reopened = LapStore::open_from_config(&config).unwrap();
    assert_eq!(ms(reopened.get(&token("A1")).unwrap().best_lap), Some(9_000));
}
