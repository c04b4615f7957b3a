//! Acknowledged pattern delivery and snapshot exchange
//!
//! Publishing is at-most-once, so every pattern frame carries a token the
//! display controller echoes once the frame is on the lights. A frame that
//! is not acknowledged within the per-attempt timeout is published again
//! under a fresh token. Only an ack carrying the token of the latest
//! attempt counts; anything else is stale and dropped.
//!
//! Snapshot requests follow the same shape: request, wait, back off, retry.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout_at, Instant};

use super::messages::{Point, SNAPSHOT_COMMAND};
use crate::config::{CalibrationConfig, TopicConfig};
use crate::error::{CalibrationError, CalibrationResult};
use crate::frame::Frame;
use crate::transport::FrameSink;

/// Source of acknowledgement tokens. Cycles through 1..=255; 0 means
/// "no acknowledgement requested" on the wire and is never handed out.
#[derive(Debug, Default)]
pub struct AckTokens {
    last: u8,
}

impl AckTokens {
    pub fn next_token(&mut self) -> u8 {
        self.last = if self.last == u8::MAX { 1 } else { self.last + 1 };
        self.last
    }
}

/// Where the current step of a run stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Idle,
    AwaitingAck { token: u8, attempt: u32 },
    Acknowledged { token: u8 },
    AwaitingData { attempt: u32 },
    Captured,
    Skipped,
    GaveUp,
}

/// Retry and timeout settings
#[derive(Debug, Clone)]
pub struct ProtocolTiming {
    pub ack_timeout: Duration,
    pub ack_deadline: Duration,
    pub snapshot_timeout: Duration,
    pub snapshot_backoff: Duration,
    pub max_snapshot_attempts: u32,
}

impl From<&CalibrationConfig> for ProtocolTiming {
    fn from(config: &CalibrationConfig) -> Self {
        Self {
            ack_timeout: config.ack_timeout(),
            ack_deadline: config.ack_deadline(),
            snapshot_timeout: config.snapshot_timeout(),
            snapshot_backoff: config.snapshot_backoff(),
            max_snapshot_attempts: config.max_snapshot_attempts,
        }
    }
}

/// Create the channels that carry inbound messages into a run
pub fn inbox() -> (InboxSender, Inbox) {
    let (ack_tx, ack_rx) = mpsc::unbounded_channel();
    let (data_tx, data_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    (
        InboxSender {
            acks: ack_tx,
            data: data_tx,
            cancel: cancel_tx,
        },
        Inbox {
            acks: ack_rx,
            data: data_rx,
            cancel: cancel_rx,
        },
    )
}

/// Feeds acks, coordinate reports and cancellation into a run
#[derive(Debug)]
pub struct InboxSender {
    acks: mpsc::UnboundedSender<u8>,
    data: mpsc::UnboundedSender<Vec<Point>>,
    cancel: watch::Sender<bool>,
}

impl InboxSender {
    /// Returns false once the run has finished
    pub fn ack(&self, ack_id: u8) -> bool {
        self.acks.send(ack_id).is_ok()
    }

    /// Returns false once the run has finished
    pub fn data(&self, points: Vec<Point>) -> bool {
        self.data.send(points).is_ok()
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

/// Receiving side of a run's inbound messages
#[derive(Debug)]
pub struct Inbox {
    acks: mpsc::UnboundedReceiver<u8>,
    data: mpsc::UnboundedReceiver<Vec<Point>>,
    cancel: watch::Receiver<bool>,
}

impl Inbox {
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    async fn cancelled(cancel: &mut watch::Receiver<bool>) {
        if cancel.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Wait until `token` is acknowledged. Returns false if `until` passes first.
    pub async fn wait_for_ack(&mut self, token: u8, until: Instant) -> CalibrationResult<bool> {
        loop {
            tokio::select! {
                biased;
                _ = Self::cancelled(&mut self.cancel) => return Err(CalibrationError::Cancelled),
                received = timeout_at(until, self.acks.recv()) => match received {
                    Err(_) => return Ok(false),
                    Ok(None) => {
                        return Err(CalibrationError::Transport(
                            "acknowledgement channel closed".to_string(),
                        ))
                    }
                    Ok(Some(ack_id)) if ack_id == token => return Ok(true),
                    Ok(Some(stale)) => {
                        tracing::debug!("Ignoring stale ack {} while waiting for {}", stale, token);
                    }
                },
            }
        }
    }

    /// Wait for the next coordinate report. Returns None if `until` passes first.
    pub async fn wait_for_data(&mut self, until: Instant) -> CalibrationResult<Option<Vec<Point>>> {
        tokio::select! {
            biased;
            _ = Self::cancelled(&mut self.cancel) => Err(CalibrationError::Cancelled),
            received = timeout_at(until, self.data.recv()) => match received {
                Err(_) => Ok(None),
                Ok(None) => Err(CalibrationError::Transport("data channel closed".to_string())),
                Ok(Some(points)) => Ok(Some(points)),
            },
        }
    }

    /// Discard coordinate reports that arrived late for an earlier request
    pub fn drain_stale_data(&mut self) -> usize {
        let mut drained = 0;
        while self.data.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    /// Sleep unless the run is cancelled first
    pub async fn sleep(&mut self, duration: Duration) -> CalibrationResult<()> {
        tokio::select! {
            biased;
            _ = Self::cancelled(&mut self.cancel) => Err(CalibrationError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Drives the display controller and the camera client for one run
pub struct Protocol {
    sink: Arc<dyn FrameSink>,
    topics: TopicConfig,
    timing: ProtocolTiming,
    tokens: AckTokens,
    inbox: Inbox,
    state: StepState,
}

impl Protocol {
    pub fn new(sink: Arc<dyn FrameSink>, topics: TopicConfig, timing: ProtocolTiming, inbox: Inbox) -> Self {
        Self {
            sink,
            topics,
            timing,
            tokens: AckTokens::default(),
            inbox,
            state: StepState::Idle,
        }
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    /// Publish a frame without asking for an acknowledgement
    pub fn show(&self, frame: &Frame) -> CalibrationResult<()> {
        let mut frame = frame.clone();
        frame.ack_id = 0;
        self.sink.publish(&self.topics.stream, &frame.encode())
    }

    /// Publish `frame` until the display controller acknowledges it.
    ///
    /// Returns the acknowledged token, or [`CalibrationError::AckDeadline`]
    /// once the overall deadline passes.
    pub async fn display(&mut self, pattern: usize, mut frame: Frame) -> CalibrationResult<u8> {
        let started = Instant::now();
        let deadline = started + self.timing.ack_deadline;
        let mut attempt = 0u32;

        loop {
            let token = self.tokens.next_token();
            attempt += 1;
            self.state = StepState::AwaitingAck { token, attempt };

            frame.ack_id = token;
            if let Err(e) = self.sink.publish(&self.topics.stream, &frame.encode()) {
                tracing::warn!("Failed to publish pattern {}: {}", pattern, e);
            }

            let until = (Instant::now() + self.timing.ack_timeout).min(deadline);
            if self.inbox.wait_for_ack(token, until).await? {
                self.state = StepState::Acknowledged { token };
                tracing::debug!("Pattern {} acknowledged with token {} after {} attempt(s)", pattern, token, attempt);
                return Ok(token);
            }

            if Instant::now() >= deadline {
                self.state = StepState::GaveUp;
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::error!(
                    "Pattern {} not acknowledged after {} attempts, giving up",
                    pattern,
                    attempt
                );
                return Err(CalibrationError::AckDeadline { pattern, waited_ms });
            }

            tracing::warn!(
                "No ack for pattern {} token {} (attempt {}), retransmitting",
                pattern,
                token,
                attempt
            );
        }
    }

    /// Request one snapshot and wait for its coordinates.
    ///
    /// Returns None when every attempt went unanswered; the caller skips
    /// that capture slot.
    pub async fn capture(&mut self, pattern: usize, capture: usize) -> CalibrationResult<Option<Vec<Point>>> {
        let stale = self.inbox.drain_stale_data();
        if stale > 0 {
            tracing::debug!("Dropped {} late coordinate report(s)", stale);
        }

        let max_attempts = self.timing.max_snapshot_attempts;
        for attempt in 1..=max_attempts {
            self.state = StepState::AwaitingData { attempt };
            if let Err(e) = self
                .sink
                .publish(&self.topics.calibrate_server, SNAPSHOT_COMMAND.as_bytes())
            {
                tracing::warn!("Failed to request snapshot: {}", e);
            }

            let until = Instant::now() + self.timing.snapshot_timeout;
            if let Some(points) = self.inbox.wait_for_data(until).await? {
                self.state = StepState::Captured;
                return Ok(Some(points));
            }

            tracing::warn!(
                "No coordinates for pattern {} capture {} (attempt {}/{})",
                pattern,
                capture,
                attempt,
                max_attempts
            );
            if attempt < max_attempts {
                self.inbox.sleep(self.timing.snapshot_backoff).await?;
            }
        }

        self.state = StepState::Skipped;
        tracing::warn!("Skipping pattern {} capture {}", pattern, capture);
        Ok(None)
    }

    /// Sleep unless the run is cancelled first
    pub async fn pause(&mut self, duration: Duration) -> CalibrationResult<()> {
        self.inbox.sleep(duration).await
    }
}
