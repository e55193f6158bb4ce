// Tests for the watch command

use std::time::Duration;

use opcmon::cli::commands::{watch, WatchOptions};
use opcmon::config::Config;
use opcmon::monitor::MonitoringMode;

fn create_test_config() -> Config {
    let mut config = Config::default();
    config.simulation.publish_interval_ms = 10;
    config.simulation.seed = Some(42);
    config
}

fn options(count: usize, mode: Option<MonitoringMode>, json: bool) -> WatchOptions {
    WatchOptions {
        count,
        mode,
        json,
        idle: Duration::from_millis(500),
    }
}

#[tokio::test]
async fn test_watch_prints_json_lines() {
    let mut out = Vec::new();

    let seen = watch(create_test_config(), options(1, None, true), &mut out)
        .await
        .unwrap();

    assert_eq!(seen, 1);
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1);

    let line: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(line["index"], 0);
    assert_eq!(line["node_id"], "i=2258");
    assert!(line.get("value").is_some());
}

#[tokio::test]
async fn test_watch_prints_text_lines() {
    let mut out = Vec::new();

    let seen = watch(create_test_config(), options(2, None, false), &mut out)
        .await
        .unwrap();

    assert_eq!(seen, 2);
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("[0] i=2258 = "));
    assert!(lines[1].starts_with("[1] ns=1;s=Boiler.Temperature = "));
}

#[tokio::test]
async fn test_watch_stops_when_nothing_is_reported() {
    let mut out = Vec::new();
    let mut opts = options(5, Some(MonitoringMode::Sampling), true);
    opts.idle = Duration::from_millis(100);

    let seen = tokio::time::timeout(
        Duration::from_secs(5),
        watch(create_test_config(), opts, &mut out),
    )
    .await
    .expect("watch did not stop on the idle limit")
    .unwrap();

    assert_eq!(seen, 0);
    assert!(out.is_empty());
}
