//! Periodic telemetry publishing
//!
//! The publisher runs a fixed number of cycles on a fixed schedule. Each
//! cycle samples every sensor and publishes one reading per metric (QoS 1,
//! not retained). A cycle that finds the session down waits for the session
//! to come back, bounded by the reconnect wait, and is then dropped:
//! publishing resumes at the next scheduled cycle. After the last cycle a
//! retained `complete` summary is published on the status topic.

use super::sensor::{Sensor, SimulatedSensor};
use crate::config::{NodeConfig, TopicsSection};
use crate::error::{NodeError, NodeResult};
use crate::observability::metrics::NodeMetrics;
use crate::protocol::{encode_payload, LifecycleStatus, Reading};
use crate::transport::mqtt::{MqttError, SessionState};
use crate::transport::{CorrelationId, Transport};
use chrono::Utc;
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Publishing parameters
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub device_id: String,
    pub readings: u32,
    pub interval: Duration,
    pub reconnect_wait: Duration,
    pub topics: TopicsSection,
}

impl PublisherSettings {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            device_id: config.device.id.clone(),
            readings: config.telemetry.readings,
            interval: config.telemetry.interval(),
            reconnect_wait: config.telemetry.reconnect_wait(),
            topics: config.topics.clone(),
        }
    }
}

/// Cycle deadlines anchored at the start of the run
///
/// Cycle `n` (1-based) is due at `start + (n - 1) * interval`.
#[derive(Debug, Clone, Copy)]
pub struct CycleSchedule {
    start: Instant,
    interval: Duration,
}

impl CycleSchedule {
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self { start, interval }
    }

    pub fn deadline(&self, cycle: u32) -> Instant {
        self.start + self.interval * cycle.saturating_sub(1)
    }

    /// First cycle after `current` whose deadline has not passed at `now`
    pub fn next_cycle(&self, current: u32, now: Instant) -> u32 {
        if self.interval.is_zero() {
            return current + 1;
        }
        let elapsed = now.saturating_duration_since(self.start).as_nanos();
        let period = self.interval.as_nanos();
        let due = elapsed.div_ceil(period);
        let candidate = u32::try_from(due + 1).unwrap_or(u32::MAX);
        candidate.max(current + 1)
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRun {
    pub cycles_published: u32,
    /// Cycles dropped while the session was down
    pub cycles_skipped: Vec<u32>,
    pub total_published: u64,
    pub summary_correlation_id: CorrelationId,
}

/// Telemetry publishing loop
pub struct TelemetryPublisher<T: Transport> {
    transport: Arc<T>,
    settings: PublisherSettings,
    sensors: Vec<Box<dyn Sensor>>,
    metrics: Arc<NodeMetrics>,
}

impl<T: Transport + 'static> TelemetryPublisher<T> {
    pub fn new(
        transport: Arc<T>,
        settings: PublisherSettings,
        sensors: Vec<Box<dyn Sensor>>,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        Self {
            transport,
            settings,
            sensors,
            metrics,
        }
    }

    /// Publisher with one simulated sensor per configured metric
    pub fn from_config(transport: Arc<T>, config: &NodeConfig, metrics: Arc<NodeMetrics>) -> Self {
        let sensors = config
            .telemetry
            .sensors
            .iter()
            .cloned()
            .map(|sensor| Box::new(SimulatedSensor::new(sensor)) as Box<dyn Sensor>)
            .collect();
        Self::new(transport, PublisherSettings::from_config(config), sensors, metrics)
    }

    /// Run every cycle and publish the summary
    ///
    /// Fails with [`NodeError::ReconnectTimeout`] when the session stays down
    /// longer than the reconnect wait.
    pub async fn run(&mut self) -> NodeResult<PublishRun> {
        let span = crate::telemetry_span!(
            readings = self.settings.readings,
            interval_ms = self.settings.interval.as_millis() as u64
        );
        self.run_cycles().instrument(span).await
    }

    async fn run_cycles(&mut self) -> NodeResult<PublishRun> {
        self.wait_for_session().await?;

        info!(
            topics = ?self.sensors.iter().map(|s| self.settings.topics.telemetry_topic(s.metric())).collect::<Vec<_>>(),
            "Starting sensor publish loop"
        );

        let schedule = CycleSchedule::new(Instant::now(), self.settings.interval);
        let mut total_published = 0u64;
        let mut cycles_published = 0u32;
        let mut cycles_skipped = Vec::new();
        let mut cycle = 1u32;

        while cycle <= self.settings.readings {
            tokio::time::sleep_until(schedule.deadline(cycle)).await;

            let state = self.transport.session_state();
            if state != SessionState::Connected {
                warn!(cycle = cycle, state = ?state, "Session down, waiting to reconnect");
                self.wait_for_session().await?;

                let resume = schedule.next_cycle(cycle, Instant::now());
                for lost in cycle..resume.min(self.settings.readings + 1) {
                    self.metrics.record_cycle_skipped();
                    cycles_skipped.push(lost);
                }
                info!(missed = cycle, resume = resume, "Session restored, resuming schedule");
                cycle = resume;
                continue;
            }

            let published = self.publish_cycle(cycle).await;
            if published > 0 {
                total_published += published;
                cycles_published += 1;
                self.metrics.record_cycle_completed();
            } else {
                warn!(cycle = cycle, "No reading of this cycle was published");
            }
            cycle += 1;
        }

        let summary_correlation_id = self.publish_summary(total_published).await?;
        info!(
            total_published = total_published,
            cycles_skipped = cycles_skipped.len(),
            "Telemetry run complete"
        );

        Ok(PublishRun {
            cycles_published,
            cycles_skipped,
            total_published,
            summary_correlation_id,
        })
    }

    /// Sample every sensor and publish; returns the number accepted
    async fn publish_cycle(&mut self, cycle: u32) -> u64 {
        let mut published = 0;
        for sensor in self.sensors.iter_mut() {
            let reading = Reading {
                device_id: self.settings.device_id.clone(),
                metric: sensor.metric().to_string(),
                unit: sensor.unit().to_string(),
                value: sensor.sample(),
                sequence_number: cycle,
                timestamp: Utc::now(),
            };
            let topic = self.settings.topics.telemetry_topic(&reading.metric);
            let payload = match encode_payload(&reading.to_payload()) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(metric = %reading.metric, "Failed to encode reading: {}", e);
                    continue;
                }
            };

            match self
                .transport
                .publish(&topic, payload, QoS::AtLeastOnce, false)
                .await
            {
                Ok(correlation_id) => {
                    let count = self.metrics.record_telemetry_published();
                    published += 1;
                    info!(
                        cycle = cycle,
                        readings = self.settings.readings,
                        metric = %reading.metric,
                        value = reading.value,
                        unit = %reading.unit,
                        correlation_id = correlation_id,
                        publish_count = count,
                        "Published reading"
                    );
                }
                Err(e) => warn!(cycle = cycle, topic = %topic, "Reading not published: {}", e),
            }
        }
        published
    }

    async fn publish_summary(&self, total_published: u64) -> NodeResult<CorrelationId> {
        if self.transport.session_state() != SessionState::Connected {
            self.wait_for_session().await?;
        }

        let payload = encode_payload(&LifecycleStatus::complete(total_published))
            .map_err(|e| NodeError::TransportError(e.to_string()))?;
        let correlation_id = self
            .transport
            .publish(&self.settings.topics.status, payload, QoS::AtLeastOnce, true)
            .await?;
        debug!(correlation_id = correlation_id, "Published completion summary");
        Ok(correlation_id)
    }

    async fn wait_for_session(&self) -> NodeResult<()> {
        match self
            .transport
            .wait_connected(self.settings.reconnect_wait)
            .await
        {
            Ok(()) => Ok(()),
            Err(MqttError::ConnectTimeout(_)) => {
                Err(NodeError::ReconnectTimeout(self.settings.reconnect_wait))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorConfig;
    use crate::testing::MockTransport;

    fn settings(readings: u32) -> PublisherSettings {
        PublisherSettings {
            device_id: "esp32-qemu-01".to_string(),
            readings,
            interval: Duration::from_secs(5),
            reconnect_wait: Duration::from_secs(30),
            topics: TopicsSection::default(),
        }
    }

    fn sensors() -> Vec<Box<dyn Sensor>> {
        NodeConfig::test_config()
            .telemetry
            .sensors
            .into_iter()
            .enumerate()
            .map(|(i, config)| Box::new(SimulatedSensor::with_seed(config, i as u64)) as Box<dyn Sensor>)
            .collect()
    }

    #[test]
    fn test_schedule_deadlines() {
        let start = Instant::now();
        let schedule = CycleSchedule::new(start, Duration::from_secs(5));
        assert_eq!(schedule.deadline(1), start);
        assert_eq!(schedule.deadline(4), start + Duration::from_secs(15));
    }

    #[test]
    fn test_schedule_next_cycle() {
        let start = Instant::now();
        let schedule = CycleSchedule::new(start, Duration::from_secs(5));

        assert_eq!(schedule.next_cycle(4, start + Duration::from_secs(17)), 5);
        assert_eq!(schedule.next_cycle(4, start + Duration::from_secs(20)), 5);
        assert_eq!(schedule.next_cycle(4, start + Duration::from_secs(21)), 6);
        assert_eq!(schedule.next_cycle(4, start + Duration::from_secs(15)), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_cycle_publishes_every_metric() {
        let transport = Arc::new(MockTransport::connected());
        let metrics = Arc::new(NodeMetrics::new());
        let mut publisher =
            TelemetryPublisher::new(transport.clone(), settings(1), sensors(), metrics.clone());

        let run = publisher.run().await.unwrap();

        assert_eq!(run.total_published, 2);
        let published = transport.get_published_messages().await;
        assert_eq!(published.len(), 3);
        assert_eq!(published[0].topic, "esp32/sensors/temperature");
        assert_eq!(published[1].topic, "esp32/sensors/humidity");
        assert!(published[..2]
            .iter()
            .all(|m| m.qos == QoS::AtLeastOnce && !m.retain));
        assert_eq!(published[0].payload_json()["reading"], 1);
        assert_eq!(published[0].payload_json()["device"], "esp32-qemu-01");
        assert_eq!(metrics.publish_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_connected_times_out() {
        let transport = Arc::new(MockTransport::new());
        let metrics = Arc::new(NodeMetrics::new());
        let mut publisher =
            TelemetryPublisher::new(transport.clone(), settings(3), sensors(), metrics);

        let result = publisher.run().await;

        assert!(matches!(result, Err(NodeError::ReconnectTimeout(d)) if d == Duration::from_secs(30)));
        assert!(transport.get_published_messages().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_stops_run() {
        let transport = Arc::new(MockTransport::new());
        transport.simulate_permanent_failure();
        let mut publisher = TelemetryPublisher::new(
            transport,
            settings(3),
            sensors(),
            Arc::new(NodeMetrics::new()),
        );

        let result = publisher.run().await;
        assert!(matches!(result, Err(NodeError::TransportError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_without_accepted_publish_is_not_counted() {
        let transport = Arc::new(MockTransport::with_failing_publishes());
        let metrics = Arc::new(NodeMetrics::new());
        let mut publisher =
            TelemetryPublisher::new(transport.clone(), settings(3), sensors(), metrics.clone());

        let result = publisher.run().await;

        // The summary is rejected too, which is not fatal
        let error = result.unwrap_err();
        assert!(matches!(error, NodeError::TransportError(_)));
        assert!(!error.is_fatal());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.telemetry.cycles_completed, 0);
        assert_eq!(snapshot.telemetry.publish_count, 0);
        assert!(transport.get_published_messages().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_sensor_set() {
        let transport = Arc::new(MockTransport::connected());
        let sensor = SimulatedSensor::with_seed(
            SensorConfig {
                metric: "pressure".to_string(),
                unit: "hPa".to_string(),
                base: 1000.0,
                spread: 0.0,
            },
            1,
        );
        let mut publisher = TelemetryPublisher::new(
            transport.clone(),
            settings(2),
            vec![Box::new(sensor)],
            Arc::new(NodeMetrics::new()),
        );

        let run = publisher.run().await.unwrap();

        assert_eq!(run.total_published, 2);
        let readings = transport.published_on("esp32/sensors/pressure").await;
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[1].payload_json()["value"], 1000.0);
        assert_eq!(readings[1].payload_json()["unit"], "hPa");
    }
}
