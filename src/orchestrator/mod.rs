//! # Program Orchestrator
//!
//! Runs the gateway cycle:
//!
//! ```text
//! serial_and_publish -> break -> secondary_recording -> (repeat)
//! ```
//!
//! Every phase is bounded by its own timeout and its failure is contained:
//! a phase that fails is logged and reported, and the next phase runs anyway.

pub mod sync;

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, warn};

use crate::data::{AccelRecording, Response, ResponseStatus};
use crate::messenger::{build_message, Messenger};
use crate::recorder::Recorder;
use crate::schedule::Trigger;
use crate::sensor::SerialReceiver;
use crate::store::Store;

pub use sync::{SyncAwareOrchestrator, SyncSettings};

/// Default pause between two cycles
pub const DEFAULT_CYCLE_PAUSE: Duration = Duration::from_millis(100);

/// Stage of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SerialAndPublish,
    Break,
    SecondaryRecording,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::SerialAndPublish => "serial_and_publish",
            Phase::Break => "break",
            Phase::SecondaryRecording => "secondary_recording",
        };
        f.write_str(name)
    }
}

/// How a phase ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Failed(String),
    Skipped(String),
}

/// Outcome and wall time of one phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: Phase,
    pub outcome: PhaseOutcome,
    pub duration: Duration,
}

/// Everything that happened in one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub phases: Vec<PhaseReport>,
    pub duration: Duration,
    /// Set when the whole cycle was skipped before any phase ran
    pub skipped: Option<String>,
}

impl CycleReport {
    pub fn skipped(reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            phases: Vec::new(),
            duration,
            skipped: Some(reason.into()),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    pub fn outcome(&self, phase: Phase) -> Option<&PhaseOutcome> {
        self.phases.iter().find(|p| p.phase == phase).map(|p| &p.outcome)
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}

/// Timing knobs of the cycle
#[derive(Debug, Clone)]
pub struct Timing {
    pub max_serial_timeout: Duration,
    pub break_duration: Duration,
    pub max_cycle_overhead: Duration,
    /// Upper bound on one publish, on top of the messenger's own deadline
    pub publish_timeout: Duration,
    pub cycle_pause: Duration,
}

/// Secondary recording duty
pub struct RecordingPhase {
    recorder: Box<dyn Recorder>,
    hwid: String,
    trigger: Trigger,
}

impl RecordingPhase {
    pub fn new(recorder: Box<dyn Recorder>, hwid: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            recorder,
            hwid: hwid.into(),
            trigger,
        }
    }
}

/// Fixed-phase gateway cycle
pub struct ProgramOrchestrator {
    receiver: SerialReceiver,
    messenger: Box<dyn Messenger>,
    store: Box<dyn Store>,
    recording: Option<RecordingPhase>,
    timing: Timing,
    cycles: u64,
}

impl ProgramOrchestrator {
    pub fn new(
        receiver: SerialReceiver,
        messenger: Box<dyn Messenger>,
        store: Box<dyn Store>,
        timing: Timing,
    ) -> Self {
        Self {
            receiver,
            messenger,
            store,
            recording: None,
            timing,
            cycles: 0,
        }
    }

    /// Enable the secondary recording phase
    pub fn with_recording(mut self, recording: RecordingPhase) -> Self {
        self.recording = Some(recording);
        self
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Longest a cycle is expected to take
    pub fn cycle_budget(&self) -> Duration {
        let recording = self
            .recording
            .as_ref()
            .map(|r| Duration::from_secs(u64::from(r.recorder.duration_s())))
            .unwrap_or(Duration::ZERO);

        self.timing.max_serial_timeout
            + self.timing.break_duration
            + recording
            + self.timing.max_cycle_overhead
    }

    /// Run all phases once, in order
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let started = Instant::now();
        info!("Starting cycle {}", self.cycles);

        let mut phases = Vec::with_capacity(3);

        let phase_start = Instant::now();
        let outcome = self.serial_and_publish().await;
        phases.push(finish(Phase::SerialAndPublish, outcome, phase_start));

        let phase_start = Instant::now();
        sleep(self.timing.break_duration).await;
        phases.push(finish(Phase::Break, PhaseOutcome::Completed, phase_start));

        let phase_start = Instant::now();
        let outcome = self.secondary_recording().await;
        phases.push(finish(Phase::SecondaryRecording, outcome, phase_start));

        let duration = started.elapsed();
        let budget = self.cycle_budget();
        if duration > budget {
            warn!(
                "Cycle {} took {:?}, longer than its {:?} budget",
                self.cycles, duration, budget
            );
        } else {
            info!("Cycle {} finished in {:?}", self.cycles, duration);
        }

        CycleReport {
            phases,
            duration,
            skipped: None,
        }
    }

    /// Run cycles until the task is cancelled
    pub async fn run_forever(&mut self) {
        loop {
            self.run_cycle().await;
            sleep(self.timing.cycle_pause).await;
        }
    }

    async fn serial_and_publish(&mut self) -> PhaseOutcome {
        let output = match self.receiver.acquire(self.timing.max_serial_timeout).await {
            Ok(output) => output,
            Err(e) => return PhaseOutcome::Failed(format!("acquisition: {}", e)),
        };

        // Persist before publishing so a failed publish loses nothing
        self.store.store_sensor_value(&output);

        let message = match build_message(&output) {
            Ok(message) => message,
            Err(e) => return PhaseOutcome::Failed(format!("message: {}", e)),
        };
        self.store.store_message(&message);

        let response = match timeout(self.timing.publish_timeout, self.messenger.send(&message)).await
        {
            Ok(response) => response,
            Err(_) => Response::new(
                &message,
                ResponseStatus::Timeout,
                format!("no response within {:?}", self.timing.publish_timeout),
            ),
        };
        self.store.store_response(&response);

        if response.status().is_success() {
            PhaseOutcome::Completed
        } else {
            PhaseOutcome::Failed(format!(
                "publish {}: {}",
                response.status(),
                response.content()
            ))
        }
    }

    async fn secondary_recording(&mut self) -> PhaseOutcome {
        let Some(recording) = self.recording.as_mut() else {
            return PhaseOutcome::Skipped("recording disabled".to_string());
        };

        let now = Utc::now();
        if !recording.trigger.is_due(now) {
            return PhaseOutcome::Skipped(format!(
                "next recording at {}",
                recording.trigger.next_fire().format("%H:%M:%S")
            ));
        }
        recording.trigger.fire(now);

        let bound = Duration::from_secs(u64::from(recording.recorder.duration_s()))
            + self.timing.max_cycle_overhead;

        match timeout(bound, recording.recorder.record()).await {
            Ok(Ok(result)) => {
                let accel = AccelRecording::from_recording(&result, recording.hwid.as_str());
                self.store.store_accel_recording(&accel);
                PhaseOutcome::Completed
            }
            Ok(Err(e)) => PhaseOutcome::Failed(e.to_string()),
            Err(_) => PhaseOutcome::Failed(format!("recording exceeded {:?}", bound)),
        }
    }
}

fn finish(phase: Phase, outcome: PhaseOutcome, started: Instant) -> PhaseReport {
    let duration = started.elapsed();

    match &outcome {
        PhaseOutcome::Completed => info!(%phase, ?duration, "Phase completed"),
        PhaseOutcome::Failed(detail) => error!(%phase, ?duration, error = %detail, "Phase failed"),
        PhaseOutcome::Skipped(reason) => info!(%phase, ?duration, %reason, "Phase skipped"),
    }

    PhaseReport {
        phase,
        outcome,
        duration,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::{Message, Recording};
    use crate::error::WaspiError;
    use crate::messenger::MockMessenger;
    use crate::recorder::MockRecorder;
    use crate::sensor::{ReceiverSettings, ReportSchema};
    use crate::serial::port_trait::mocks::{MockConnector, MockSerialPort};
    use crate::serial::{Transport, DEFAULT_FRAME_TIMEOUT, DEFAULT_READ_TIMEOUT};
    use crate::store::MockStore;
    use crate::transfer::encoder::encode_packet;
    use crate::transfer::protocol::PERIODIC_REPORT_ID;
    use async_trait::async_trait;
    use chrono::Local;
    use mockall::Sequence;
    use std::path::PathBuf;

    pub(crate) fn timing() -> Timing {
        Timing {
            max_serial_timeout: Duration::from_secs(20),
            break_duration: Duration::from_secs(5),
            max_cycle_overhead: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(10),
            cycle_pause: DEFAULT_CYCLE_PAUSE,
        }
    }

    pub(crate) fn receiver(port: MockSerialPort, hwids: &[&str]) -> SerialReceiver {
        let transport = Transport::new(
            Box::new(MockConnector::new(port)),
            DEFAULT_READ_TIMEOUT,
            DEFAULT_FRAME_TIMEOUT,
        );
        SerialReceiver::new(
            transport,
            ReportSchema::from_hwids(hwids),
            ReceiverSettings::new("/dev/ttyACM0", 115_200),
        )
    }

    pub(crate) fn feed_report(port: &MockSerialPort, values: &[f32]) {
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        port.feed(&encode_packet(PERIODIC_REPORT_ID, &payload).unwrap());
    }

    fn recording() -> Recording {
        Recording {
            path: PathBuf::from("/tmp/20240501_120000.wav"),
            datetime: Local::now(),
            duration: 60,
            samplerate: 16_000,
            channels: 2,
        }
    }

    fn recorder_ok() -> MockRecorder {
        let mut recorder = MockRecorder::new();
        recorder.expect_duration_s().return_const(60u32);
        recorder.expect_record().returning(|| Ok(recording()));
        recorder
    }

    /// Messenger that never answers within the test deadlines
    struct SilentMessenger;

    #[async_trait]
    impl Messenger for SilentMessenger {
        async fn send(&self, message: &Message) -> Response {
            sleep(Duration::from_secs(3600)).await;
            Response::new(message, ResponseStatus::Success, "late")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_decode_and_publish() {
        let port = MockSerialPort::new();
        feed_report(&port, &[21.5, 55.0]);

        let mut seq = Sequence::new();
        let mut store = MockStore::new();
        let mut messenger = MockMessenger::new();

        store
            .expect_store_sensor_value()
            .withf(|output| {
                output.content().len() == 2
                    && output.value("temp_0") == Some(21.5)
                    && output.value("hum_0") == Some(55.0)
            })
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        store
            .expect_store_message()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        messenger
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|message| Response::new(message, ResponseStatus::Success, "ok"));
        store
            .expect_store_response()
            .withf(|response| response.status() == ResponseStatus::Success)
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let mut orchestrator = ProgramOrchestrator::new(
            receiver(port, &["temp_0", "hum_0"]),
            Box::new(messenger),
            Box::new(store),
            timing(),
        );

        let report = orchestrator.run_cycle().await;
        assert_eq!(report.outcome(Phase::SerialAndPublish), Some(&PhaseOutcome::Completed));
        assert_eq!(report.outcome(Phase::Break), Some(&PhaseOutcome::Completed));
        assert!(matches!(
            report.outcome(Phase::SecondaryRecording),
            Some(PhaseOutcome::Skipped(_))
        ));
        assert_eq!(orchestrator.cycles(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_serial_does_not_block_other_phases() {
        let port = MockSerialPort::new();

        let mut store = MockStore::new();
        store.expect_store_accel_recording().times(1).return_const(());

        let mut messenger = MockMessenger::new();
        messenger.expect_send().times(0);

        let mut orchestrator = ProgramOrchestrator::new(
            receiver(port.clone(), &["temp_0"]),
            Box::new(messenger),
            Box::new(store),
            timing(),
        )
        .with_recording(RecordingPhase::new(
            Box::new(recorder_ok()),
            "accel_0",
            Trigger::always(),
        ));

        // The line stays silent for 30 s, well past the 20 s window
        let stall = tokio::spawn(async move {
            sleep(Duration::from_secs(30)).await;
            feed_report(&port, &[1.0]);
        });

        let report = orchestrator.run_cycle().await;

        let serial = report.phase(Phase::SerialAndPublish).unwrap();
        assert!(matches!(serial.outcome, PhaseOutcome::Failed(_)));
        assert!(serial.duration >= Duration::from_secs(20));
        assert!(serial.duration < Duration::from_secs(21));

        let pause = report.phase(Phase::Break).unwrap();
        assert_eq!(pause.outcome, PhaseOutcome::Completed);
        assert_eq!(pause.duration, Duration::from_secs(5));

        assert_eq!(
            report.outcome(Phase::SecondaryRecording),
            Some(&PhaseOutcome::Completed)
        );
        stall.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_publish_still_persists_output() {
        let port = MockSerialPort::new();
        feed_report(&port, &[21.5]);

        let mut store = MockStore::new();
        store.expect_store_sensor_value().times(1).return_const(());
        store.expect_store_message().times(1).return_const(());
        store
            .expect_store_response()
            .withf(|response| response.status() == ResponseStatus::Failed)
            .times(1)
            .return_const(());

        let mut messenger = MockMessenger::new();
        messenger
            .expect_send()
            .returning(|message| Response::new(message, ResponseStatus::Failed, "refused"));

        let mut orchestrator = ProgramOrchestrator::new(
            receiver(port, &["temp_0"]),
            Box::new(messenger),
            Box::new(store),
            timing(),
        );

        let report = orchestrator.run_cycle().await;
        assert!(matches!(
            report.outcome(Phase::SerialAndPublish),
            Some(PhaseOutcome::Failed(detail)) if detail.contains("FAILED")
        ));
        assert_eq!(report.outcome(Phase::Break), Some(&PhaseOutcome::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_timeout_records_timeout_response() {
        let port = MockSerialPort::new();
        feed_report(&port, &[3.0]);

        let mut store = MockStore::new();
        store.expect_store_sensor_value().times(1).return_const(());
        store.expect_store_message().times(1).return_const(());
        store
            .expect_store_response()
            .withf(|response| response.status() == ResponseStatus::Timeout)
            .times(1)
            .return_const(());

        let mut orchestrator = ProgramOrchestrator::new(
            receiver(port, &["temp_0"]),
            Box::new(SilentMessenger),
            Box::new(store),
            timing(),
        );

        let report = orchestrator.run_cycle().await;
        let serial = report.phase(Phase::SerialAndPublish).unwrap();
        assert!(matches!(&serial.outcome, PhaseOutcome::Failed(d) if d.contains("TIMEOUT")));
        assert!(serial.duration < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_failure_is_contained() {
        let mut recorder = MockRecorder::new();
        recorder.expect_duration_s().return_const(60u32);
        recorder
            .expect_record()
            .times(2)
            .returning(|| Err(WaspiError::Recording("device busy".to_string())));

        let mut store = MockStore::new();
        store.expect_store_accel_recording().times(0);

        let mut orchestrator = ProgramOrchestrator::new(
            receiver(MockSerialPort::new(), &["temp_0"]),
            Box::new(MockMessenger::new()),
            Box::new(store),
            timing(),
        )
        .with_recording(RecordingPhase::new(Box::new(recorder), "accel_0", Trigger::always()));

        for _ in 0..2 {
            let report = orchestrator.run_cycle().await;
            assert!(matches!(
                report.outcome(Phase::SecondaryRecording),
                Some(PhaseOutcome::Failed(detail)) if detail.contains("device busy")
            ));
        }
        assert_eq!(orchestrator.cycles(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_not_due_is_skipped() {
        let mut recorder = MockRecorder::new();
        recorder.expect_duration_s().return_const(60u32);
        recorder.expect_record().times(0);

        let now = Utc::now();
        let mut trigger = Trigger::every(Duration::from_secs(3600), now);
        trigger.fire(now);

        let mut orchestrator = ProgramOrchestrator::new(
            receiver(MockSerialPort::new(), &["temp_0"]),
            Box::new(MockMessenger::new()),
            Box::new(MockStore::new()),
            timing(),
        )
        .with_recording(RecordingPhase::new(Box::new(recorder), "accel_0", trigger));

        let report = orchestrator.run_cycle().await;
        assert!(matches!(
            report.outcome(Phase::SecondaryRecording),
            Some(PhaseOutcome::Skipped(_))
        ));
    }

    #[test]
    fn test_cycle_budget() {
        let orchestrator = ProgramOrchestrator::new(
            receiver(MockSerialPort::new(), &["temp_0"]),
            Box::new(MockMessenger::new()),
            Box::new(MockStore::new()),
            timing(),
        );
        assert_eq!(orchestrator.cycle_budget(), Duration::from_secs(30));

        let orchestrator = orchestrator.with_recording(RecordingPhase::new(
            Box::new(recorder_ok()),
            "accel_0",
            Trigger::always(),
        ));
        assert_eq!(orchestrator.cycle_budget(), Duration::from_secs(90));
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(Phase::SerialAndPublish.to_string(), "serial_and_publish");
        assert_eq!(Phase::Break.to_string(), "break");
        assert_eq!(Phase::SecondaryRecording.to_string(), "secondary_recording");
    }
}
