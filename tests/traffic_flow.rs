#![forbid(unsafe_code)]

use std::time::Duration;

use tokio::sync::oneshot;

use web_listener::listener::Listener;
use web_listener::traffic::analyser::TrafficAnalyser;
use web_listener::traffic::generator::{send_requests, GeneratorPlan, GeneratorSummary};
use web_listener::utils::config::ServerConfig;
use web_listener::utils::listener_utils::timestamp_in;

#[tokio::test]
async fn generated_traffic_is_logged_and_readable() {
    let tmp = tempfile::tempdir().unwrap();
    let config = ServerConfig::new("127.0.0.1", 0, &tmp.path().join("server.log"));
    let log_file = config.log_file.clone();
    let tz = config.timezone;

    let listener = Listener::bind(config).await.unwrap();
    let port = listener.local_addr().port();
    let (stop, rx) = oneshot::channel::<()>();
    let server = tokio::spawn(listener.run_until(async { let _ = rx.await; }));

    let mut plan = GeneratorPlan::new("127.0.0.1", port);
    plan.total_minutes = 1;
    plan.requests_per_minute = 4;
    plan.min_delay = Duration::ZERO;
    plan.max_delay = Duration::ZERO;
    let summary = send_requests(&plan).await;
    assert_eq!(summary, GeneratorSummary { sent: 4, succeeded: 4, failed: 0 });

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();

    let now = timestamp_in(&tz).naive_local();
    let mut analyser = TrafficAnalyser::new(&log_file, None, None, now).unwrap();
    analyser.validate_log_file().unwrap();
    assert_eq!(analyser.load_log_entries().unwrap().len(), 4);
    let window = analyser.filter_entries_by_time();
    assert_eq!(window.len(), 4);
    assert!(window.iter().all(|e| e.http_code == "200"));
}
