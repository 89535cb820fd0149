//! BarrierController - one barrier's state machine
//!
//! ## Responsibilities
//!
//! - Own the barrier phase (CLOSED -> OPENING -> OPEN -> CLOSING -> CLOSED)
//! - Drive the lane's barrier, LED and buzzer lines
//! - Auto-close after the hold time, exactly once per open
//! - Fail closed on any actuation fault
//!
//! The controller runs as its own task. Lanes talk to it only through
//! `BarrierHandle`; state is published on a watch channel.

mod types;

pub use types::{BarrierPhase, BarrierState, BarrierTiming, OpenOutcome};

use crate::error::{Error, Result};
use crate::models::Direction;
use crate::output_board::{LaneOutputs, LinePurpose};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

const COMMAND_BUFFER: usize = 16;

enum Command {
    Open(oneshot::Sender<Result<OpenOutcome>>),
    DenyFeedback(oneshot::Sender<Result<()>>),
    EmergencyClose(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable command handle
#[derive(Clone)]
pub struct BarrierHandle {
    lane: Direction,
    tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<BarrierState>,
}

impl BarrierHandle {
    pub fn lane(&self) -> Direction {
        self.lane
    }

    /// Open the barrier (only accepted in CLOSED)
    pub async fn open(&self) -> Result<OpenOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Open(reply)).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// Denial tone and red pulse; phase unchanged
    pub async fn deny_feedback(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::DenyFeedback(reply)).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// Force CLOSED now and cancel pending timers (no-op when closed)
    pub async fn emergency_close(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::EmergencyClose(reply)).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// Close and stop the controller task
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(reply)).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> BarrierState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BarrierState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> Error {
        Error::hardware(
            format!("{}.barrier_open", self.lane),
            "barrier controller stopped",
        )
    }
}

/// Controller task state
pub struct BarrierController {
    outputs: LaneOutputs,
    timing: BarrierTiming,
    state: BarrierState,
    state_tx: watch::Sender<BarrierState>,
    settle_at: Option<Instant>,
    auto_close_at: Option<Instant>,
    tone_off_at: Option<Instant>,
    pulse_end_at: Option<Instant>,
}

impl BarrierController {
    /// Spawn the controller task for the lane owning `outputs`
    pub fn spawn(outputs: LaneOutputs, timing: BarrierTiming) -> BarrierHandle {
        let lane = outputs.lane();
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(BarrierState::default());

        let controller = Self {
            outputs,
            timing,
            state: BarrierState::default(),
            state_tx,
            settle_at: None,
            auto_close_at: None,
            tone_off_at: None,
            pulse_end_at: None,
        };
        tokio::spawn(controller.run(rx));

        tracing::info!(
            lane = %lane,
            hold_sec = timing.hold.as_secs(),
            "Barrier controller started"
        );

        BarrierHandle { lane, tx, state_rx }
    }

    fn lane(&self) -> Direction {
        self.outputs.lane()
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        if let Some(e) = self.drive_safe().await {
            self.record_fault(&e);
            self.publish();
        }

        loop {
            let settle_at = self.settle_at;
            let auto_close_at = self.auto_close_at;
            let tone_off_at = self.tone_off_at;
            let pulse_end_at = self.pulse_end_at;

            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Open(reply)) => {
                        let result = self.handle_open().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::DenyFeedback(reply)) => {
                        let result = self.handle_deny().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::EmergencyClose(reply)) => {
                        let result = self.close("emergency").await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown(reply)) => {
                        let _ = self.close("shutdown").await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        let _ = self.close("handles_dropped").await;
                        break;
                    }
                },
                _ = wait_until(settle_at) => self.on_settled(),
                _ = wait_until(auto_close_at) => {
                    self.auto_close_at = None;
                    let _ = self.close("auto").await;
                }
                _ = wait_until(tone_off_at) => {
                    self.tone_off_at = None;
                    if let Err(e) = self.outputs.drive(LinePurpose::Buzzer, false).await {
                        self.handle_fault(&e).await;
                    }
                }
                _ = wait_until(pulse_end_at) => {
                    self.pulse_end_at = None;
                    if let Err(e) = self.restore_indicators().await {
                        self.handle_fault(&e).await;
                    }
                }
            }
        }

        tracing::info!(lane = %self.lane(), "Barrier controller stopped");
    }

    async fn handle_open(&mut self) -> Result<OpenOutcome> {
        if self.state.phase != BarrierPhase::Closed {
            tracing::debug!(
                lane = %self.lane(),
                phase = ?self.state.phase,
                "Open ignored, barrier not closed"
            );
            return Ok(OpenOutcome::Ignored);
        }

        match self.actuate_open().await {
            Ok(()) => Ok(OpenOutcome::Opened),
            Err(e) => {
                self.handle_fault(&e).await;
                Err(e)
            }
        }
    }

    async fn actuate_open(&mut self) -> Result<()> {
        self.pulse_end_at = None;
        self.outputs.drive(LinePurpose::LedStop, false).await?;
        self.outputs.drive(LinePurpose::LedGo, true).await?;
        self.outputs.drive(LinePurpose::Buzzer, true).await?;
        self.extend_tone(self.timing.confirm_tone);

        self.state.phase = BarrierPhase::Opening;
        self.publish();

        self.outputs.drive(LinePurpose::BarrierOpen, true).await?;
        self.state.actuations_since_closed += 1;
        self.state.hardware_fault = None;
        self.settle_at = Some(Instant::now() + self.timing.settle);
        self.publish();

        tracing::info!(lane = %self.lane(), "Barrier opening");
        Ok(())
    }

    fn on_settled(&mut self) {
        self.settle_at = None;
        if self.state.phase != BarrierPhase::Opening {
            return;
        }

        self.state.phase = BarrierPhase::Open;
        self.state.opened_at = Some(Utc::now());
        self.state.open_cycles += 1;
        self.auto_close_at = Some(Instant::now() + self.timing.hold);
        self.publish();

        tracing::info!(
            lane = %self.lane(),
            hold_sec = self.timing.hold.as_secs(),
            "Barrier open"
        );
    }

    async fn handle_deny(&mut self) -> Result<()> {
        let result = async {
            self.outputs.drive(LinePurpose::Buzzer, true).await?;
            self.outputs.drive(LinePurpose::LedGo, false).await?;
            self.outputs.drive(LinePurpose::LedStop, true).await
        }
        .await;

        match result {
            Ok(()) => {
                self.extend_tone(self.timing.deny_tone);
                self.pulse_end_at = Some(Instant::now() + self.timing.deny_tone);
                Ok(())
            }
            Err(e) => {
                self.handle_fault(&e).await;
                Err(e)
            }
        }
    }

    /// OPEN/OPENING -> CLOSING -> CLOSED; timers cancelled
    async fn close(&mut self, reason: &'static str) -> Result<()> {
        self.settle_at = None;
        self.auto_close_at = None;
        self.pulse_end_at = None;

        if self.state.phase == BarrierPhase::Closed {
            if self.tone_off_at.take().is_some() {
                self.outputs.drive(LinePurpose::Buzzer, false).await?;
            }
            return Ok(());
        }

        self.state.phase = BarrierPhase::Closing;
        self.publish();

        let fault = self.drive_safe().await;

        self.state.phase = BarrierPhase::Closed;
        self.state.opened_at = None;
        self.state.close_cycles += 1;
        self.state.actuations_since_closed = 0;
        if let Some(e) = &fault {
            self.record_fault(e);
        }
        self.publish();

        tracing::info!(lane = %self.lane(), reason = reason, "Barrier closed");

        match fault {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drive every line to its closed level; returns the first failure
    async fn drive_safe(&mut self) -> Option<Error> {
        self.tone_off_at = None;
        let mut first = None;
        for (purpose, high) in [
            (LinePurpose::BarrierOpen, false),
            (LinePurpose::LedGo, false),
            (LinePurpose::LedStop, true),
            (LinePurpose::Buzzer, false),
        ] {
            if let Err(e) = self.outputs.drive(purpose, high).await {
                first.get_or_insert(e);
            }
        }
        first
    }

    async fn restore_indicators(&mut self) -> Result<()> {
        let go = self.state.phase.shows_go();
        self.outputs.drive(LinePurpose::LedGo, go).await?;
        self.outputs.drive(LinePurpose::LedStop, !go).await
    }

    /// Any actuation fault ends in CLOSED
    async fn handle_fault(&mut self, error: &Error) {
        self.record_fault(error);
        if self.state.phase == BarrierPhase::Closed {
            if let Some(e) = self.drive_safe().await {
                self.record_fault(&e);
            }
            self.publish();
        } else {
            let _ = self.close("hardware_fault").await;
        }
    }

    fn record_fault(&mut self, error: &Error) {
        tracing::error!(
            lane = %self.lane(),
            alarm = true,
            error_code = error.code(),
            error = %error,
            "Barrier actuation fault"
        );
        self.state.hardware_fault = Some(error.to_string());
    }

    fn extend_tone(&mut self, duration: std::time::Duration) {
        let until = Instant::now() + duration;
        self.tone_off_at = Some(self.tone_off_at.map_or(until, |t| t.max(until)));
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output_board::{LineMap, OutputBoard, SimulatedDriver};
    use std::sync::Arc;
    use std::time::Duration;

    const ENTRY_BARRIER_PIN: u32 = 18;
    const ENTRY_BUZZER_PIN: u32 = 22;
    const ENTRY_LED_STOP_PIN: u32 = 23;

    fn timing() -> BarrierTiming {
        BarrierTiming {
            settle: Duration::from_millis(500),
            hold: Duration::from_secs(15),
            confirm_tone: Duration::from_millis(200),
            deny_tone: Duration::from_secs(1),
        }
    }

    fn controller() -> (Arc<SimulatedDriver>, BarrierHandle) {
        let driver = Arc::new(SimulatedDriver::new());
        let board = Arc::new(OutputBoard::new(driver.clone(), LineMap::default_pins()));
        let outputs = board.claim(Direction::Entry).unwrap();
        (driver, BarrierController::spawn(outputs, timing()))
    }

    async fn wait_phase(handle: &BarrierHandle, phase: BarrierPhase) -> BarrierState {
        let mut rx = handle.subscribe();
        let state = rx.wait_for(|s| s.phase == phase).await.unwrap().clone();
        state
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_then_auto_close() {
        let (driver, barrier) = controller();
        let started = Instant::now();

        assert_eq!(barrier.open().await.unwrap(), OpenOutcome::Opened);
        assert!(driver.level(ENTRY_BARRIER_PIN));

        let open = wait_phase(&barrier, BarrierPhase::Open).await;
        assert_eq!(open.actuations_since_closed, 1);
        assert!(open.opened_at.is_some());

        let closed = wait_phase(&barrier, BarrierPhase::Closed).await;
        assert!(started.elapsed() >= Duration::from_millis(15_500));
        assert_eq!(closed.close_cycles, 1);
        assert_eq!(closed.actuations_since_closed, 0);
        assert!(!driver.level(ENTRY_BARRIER_PIN));
        assert!(driver.level(ENTRY_LED_STOP_PIN));
        assert_eq!(driver.rising_writes(ENTRY_BARRIER_PIN), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_ignored_while_open() {
        let (driver, barrier) = controller();
        barrier.open().await.unwrap();
        assert_eq!(barrier.open().await.unwrap(), OpenOutcome::Ignored);

        wait_phase(&barrier, BarrierPhase::Open).await;
        assert_eq!(barrier.open().await.unwrap(), OpenOutcome::Ignored);
        assert_eq!(driver.rising_writes(ENTRY_BARRIER_PIN), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_close_cancels_auto_close() {
        let (_, barrier) = controller();
        barrier.open().await.unwrap();
        wait_phase(&barrier, BarrierPhase::Open).await;

        barrier.emergency_close().await.unwrap();
        assert_eq!(barrier.state().phase, BarrierPhase::Closed);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(barrier.state().close_cycles, 1);

        // Closing again is a no-op
        barrier.emergency_close().await.unwrap();
        assert_eq!(barrier.state().close_cycles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deny_feedback_keeps_phase() {
        let (driver, barrier) = controller();
        barrier.deny_feedback().await.unwrap();
        assert_eq!(barrier.state().phase, BarrierPhase::Closed);
        assert!(driver.level(ENTRY_BUZZER_PIN));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!driver.level(ENTRY_BUZZER_PIN));
        assert!(driver.level(ENTRY_LED_STOP_PIN));
        assert_eq!(driver.rising_writes(ENTRY_BARRIER_PIN), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_actuation_fault_fails_closed() {
        let (driver, barrier) = controller();
        driver.set_stuck(ENTRY_BARRIER_PIN, true);

        let err = barrier.open().await.unwrap_err();
        assert_eq!(err.code(), "HARDWARE_FAULT");

        let state = barrier.state();
        assert_eq!(state.phase, BarrierPhase::Closed);
        assert_eq!(state.open_cycles, 0);
        assert!(state.hardware_fault.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_open_barrier() {
        let (driver, barrier) = controller();
        barrier.open().await.unwrap();
        barrier.shutdown().await;

        assert!(!driver.level(ENTRY_BARRIER_PIN));
        assert!(!barrier.is_running());
        assert!(barrier.open().await.is_err());
    }
}
