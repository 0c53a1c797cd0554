//! Telemetry publisher integration tests
//!
//! Runs the publisher against the mock transport with tokio's paused clock
//! so schedules of tens of seconds complete instantly and deterministically.


use rumqttc::QoS;
use sensornode::error::NodeError;
use sensornode::observability::NodeMetrics;
use sensornode::testing::MockTransport;
use sensornode::TelemetryPublisher;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::schedule_config;

fn reading_numbers(messages: &[sensornode::testing::PublishedMessage]) -> Vec<u64> {
    messages
        .iter()
        .map(|m| m.payload_json()["reading"].as_u64().unwrap())
        .collect()
}

fn assert_within_a_second(elapsed: Duration, expected: Duration) {
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_secs(1),
        "elapsed {elapsed:?}, expected {expected:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_full_run_publishes_every_reading_then_summary() {
    let config = schedule_config(10, 5000);
    let transport = Arc::new(MockTransport::connected());
    let metrics = Arc::new(NodeMetrics::new());
    let mut publisher = TelemetryPublisher::from_config(transport.clone(), &config, metrics.clone());

    let started = tokio::time::Instant::now();
    let run = publisher.run().await.unwrap();

    // Ten cycles, the last one 45 s after the first
    assert_within_a_second(started.elapsed(), Duration::from_secs(45));
    assert_eq!(run.cycles_published, 10);
    assert!(run.cycles_skipped.is_empty());
    assert_eq!(run.total_published, 20);
    assert_eq!(metrics.publish_count(), 20);

    let temperature = transport.published_on("esp32/sensors/temperature").await;
    let humidity = transport.published_on("esp32/sensors/humidity").await;
    assert_eq!(reading_numbers(&temperature), (1..=10).collect::<Vec<_>>());
    assert_eq!(reading_numbers(&humidity), (1..=10).collect::<Vec<_>>());
    for message in temperature.iter().chain(humidity.iter()) {
        assert_eq!(message.qos, QoS::AtLeastOnce);
        assert!(!message.retain);
        assert_eq!(message.payload_json()["device"], "esp32-qemu-01");
    }

    let status = transport.published_on("esp32/status").await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].payload_json()["status"], "complete");
    assert_eq!(status[0].payload_json()["total_published"], 20);
    assert_eq!(status[0].qos, QoS::AtLeastOnce);
    assert!(status[0].retain);
    assert_eq!(status[0].correlation_id, run.summary_correlation_id);

    // The summary is the last thing published
    let all = transport.get_published_messages().await;
    assert_eq!(all.last().unwrap().topic, "esp32/status");
}

#[tokio::test(start_paused = true)]
async fn test_values_stay_in_sensor_ranges() {
    let config = schedule_config(10, 5000);
    let transport = Arc::new(MockTransport::connected());
    let mut publisher =
        TelemetryPublisher::from_config(transport.clone(), &config, Arc::new(NodeMetrics::new()));

    publisher.run().await.unwrap();

    for message in transport.published_on("esp32/sensors/temperature").await {
        let value = message.payload_json()["value"].as_f64().unwrap();
        assert!((20.0..30.0).contains(&value), "temperature {value}");
        assert_eq!(message.payload_json()["unit"], "C");
    }
    for message in transport.published_on("esp32/sensors/humidity").await {
        let value = message.payload_json()["value"].as_f64().unwrap();
        assert!((40.0..70.0).contains(&value), "humidity {value}");
        assert_eq!(message.payload_json()["unit"], "%");
    }
}

#[tokio::test(start_paused = true)]
async fn test_outage_drops_missed_cycle_and_resumes_on_schedule() {
    let config = schedule_config(10, 5000);
    let transport = Arc::new(MockTransport::connected());
    let mut publisher =
        TelemetryPublisher::from_config(transport.clone(), &config, Arc::new(NodeMetrics::new()));

    // Broker drops the session at 12 s and takes it back at 17 s
    let broker = transport.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        broker.simulate_disconnect("connection reset by peer");
        tokio::time::sleep(Duration::from_secs(5)).await;
        broker.simulate_connack().await;
    });

    let run = publisher.run().await.unwrap();

    assert_eq!(run.cycles_skipped, vec![4]);
    assert_eq!(run.cycles_published, 9);
    assert_eq!(run.total_published, 18);

    let expected: Vec<u64> = (1..=10).filter(|n| *n != 4).collect();
    let temperature = transport.published_on("esp32/sensors/temperature").await;
    assert_eq!(reading_numbers(&temperature), expected);

    let status = transport.published_on("esp32/status").await;
    assert_eq!(status.last().unwrap().payload_json()["total_published"], 18);
}

#[tokio::test(start_paused = true)]
async fn test_outage_longer_than_reconnect_wait_is_fatal() {
    let mut config = schedule_config(10, 5000);
    config.telemetry.reconnect_wait_secs = 30;
    let transport = Arc::new(MockTransport::connected());
    let mut publisher =
        TelemetryPublisher::from_config(transport.clone(), &config, Arc::new(NodeMetrics::new()));

    let broker = transport.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        broker.simulate_disconnect("broker gone");
    });

    let started = tokio::time::Instant::now();
    let result = publisher.run().await;

    assert!(matches!(result, Err(NodeError::ReconnectTimeout(_))));
    assert!(result.unwrap_err().is_fatal());
    // Cycle 4 was due at 15 s and waited the full 30 s
    assert_within_a_second(started.elapsed(), Duration::from_secs(45));
    assert!(transport.published_on("esp32/status").await.is_empty());
    assert_eq!(
        transport.published_on("esp32/sensors/humidity").await.len(),
        3
    );
}

#[tokio::test(start_paused = true)]
async fn test_publisher_waits_for_first_connect() {
    let config = schedule_config(1, 5000);
    let transport = Arc::new(MockTransport::new());
    let mut publisher =
        TelemetryPublisher::from_config(transport.clone(), &config, Arc::new(NodeMetrics::new()));

    let broker = transport.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        broker.simulate_connack().await;
    });

    let run = publisher.run().await.unwrap();
    assert_eq!(run.total_published, 2);
}

#[tokio::test(start_paused = true)]
async fn test_publisher_runs_on_spawned_task() {
    let config = schedule_config(3, 1000);
    let transport = Arc::new(MockTransport::connected());
    let mut publisher =
        TelemetryPublisher::from_config(transport.clone(), &config, Arc::new(NodeMetrics::new()));

    let run = tokio::spawn(async move { publisher.run().await })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(run.cycles_published, 3);
    assert_eq!(run.total_published, 6);
    assert_eq!(transport.published_on("esp32/status").await.len(), 1);
}
