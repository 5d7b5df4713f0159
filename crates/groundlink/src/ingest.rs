//! # Stats Ingester
//!
//! Connects to the radio-statistics daemon, reads its JSON-lines stream and
//! drives the [`LinkScorer`] once per video-rx record. Every scored sample is
//! handed to an [`Emitter`] immediately, in arrival order.
//!
//! ```text
//! Disconnected ──► Connecting ──► Streaming
//!      ▲               │              │
//!      └──── backoff ◄─┴── I/O error ─┘
//! ```
//!
//! Connection failures are never fatal: the ingester waits for the
//! [`ReconnectPolicy`] delay and tries again, indefinitely. Malformed lines
//! are dropped one at a time without touching the connection. Scoring state
//! (noise filter, keyframe request, video flag) lives in [`LinkSession`] and
//! survives reconnects.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::{Endpoint, ParameterSet};
use crate::emitter::Emitter;
use crate::keyframe::KeyframeRequests;
use crate::scorer::{LinkScorer, ScoredOutput};
use crate::stats::StatsRecord;

/// Delay between reconnect attempts in production.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Upper bound on one connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest stats line kept in memory. Longer lines are dropped up to the
/// next newline.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// How often a blocked read wakes up to check for shutdown.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Granularity of interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

// ─── Reconnect policy ───────────────────────────────────────────────────────

/// Decides how long to wait before the next connection attempt.
pub trait ReconnectPolicy {
    fn next_delay(&mut self) -> Duration;

    /// Called once a connection is established.
    fn reset(&mut self) {}
}

/// Constant delay between attempts.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff(pub Duration);

impl Default for FixedBackoff {
    fn default() -> Self {
        FixedBackoff(RECONNECT_DELAY)
    }
}

impl ReconnectPolicy for FixedBackoff {
    fn next_delay(&mut self) -> Duration {
        self.0
    }
}

// ─── Scoring session ────────────────────────────────────────────────────────

/// What happened to one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// A video-rx record was scored; the output must be emitted.
    Scored(ScoredOutput),
    /// A video-rx record with no packets; nothing to emit.
    Waiting,
    /// Some other record type.
    Ignored,
    /// Not a decodable record.
    Malformed,
}

/// Scoring state carried across lines and reconnects.
pub struct LinkSession {
    scorer: LinkScorer,
    keyframes: KeyframeRequests,
    receiving_video: bool,
    waiting_noted: bool,
}

impl LinkSession {
    pub fn new(params: Arc<ParameterSet>) -> Self {
        let keyframes = KeyframeRequests::new(params.keyframe.idr_max_messages);
        Self {
            scorer: LinkScorer::new(params),
            keyframes,
            receiving_video: false,
            waiting_noted: false,
        }
    }

    pub fn scorer(&self) -> &LinkScorer {
        &self.scorer
    }

    pub fn keyframes(&self) -> &KeyframeRequests {
        &self.keyframes
    }

    pub fn is_receiving_video(&self) -> bool {
        self.receiving_video
    }

    pub fn handle_line(&mut self, line: &str, timestamp: u64) -> LineOutcome {
        match StatsRecord::from_line(line) {
            Ok(record) => self.handle_record(&record, timestamp),
            Err(e) => {
                tracing::trace!(error = %e, "dropping malformed stats line");
                LineOutcome::Malformed
            }
        }
    }

    pub fn handle_record(&mut self, record: &StatsRecord, timestamp: u64) -> LineOutcome {
        if !record.is_video_rx() {
            self.receiving_video = false;
            return LineOutcome::Ignored;
        }

        let sample = record.to_sample();
        let was_receiving = self.receiving_video;
        self.receiving_video = sample.all_packets != 0;

        if !self.receiving_video {
            if !self.waiting_noted {
                tracing::info!("waiting for video stream");
                self.waiting_noted = true;
            }
            return LineOutcome::Waiting;
        }
        self.waiting_noted = false;

        if !was_receiving {
            // Fresh video always gets a keyframe, whatever allow_idr says.
            tracing::info!(antennas = sample.num_antennas, "video stream started");
            self.keyframes.request();
        }

        LineOutcome::Scored(self.scorer.score(&sample, &mut self.keyframes, timestamp))
    }
}

// ─── Ingester ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Disconnected,
    Connecting,
    Streaming,
}

pub struct Ingester<E, R> {
    source: Endpoint,
    session: LinkSession,
    emitter: E,
    policy: R,
    state: IngestState,
    shutdown: Arc<AtomicBool>,
    emitted: u64,
}

impl<E: Emitter, R: ReconnectPolicy> Ingester<E, R> {
    pub fn new(params: Arc<ParameterSet>, emitter: E, policy: R) -> Self {
        Self {
            source: params.stats_source.clone(),
            session: LinkSession::new(params),
            emitter,
            policy,
            state: IngestState::Disconnected,
            shutdown: Arc::new(AtomicBool::new(false)),
            emitted: 0,
        }
    }

    /// Flag that stops [`run`](Self::run) when set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    pub fn session(&self) -> &LinkSession {
        &self.session
    }

    /// Number of messages handed to the emitter so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Connect, stream and reconnect until shutdown is requested.
    pub fn run(&mut self) {
        tracing::info!(source = %self.source, "stats ingester started");

        while !self.shutdown_requested() {
            if let Err(e) = self.connect_and_stream() {
                tracing::warn!(source = %self.source, error = %e, "stats connection lost");
            }
            self.set_state(IngestState::Disconnected);

            if self.shutdown_requested() {
                break;
            }
            let delay = self.policy.next_delay();
            tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting to stats source");
            self.sleep_unless_shutdown(delay);
        }

        tracing::info!(emitted = self.emitted, "stats ingester stopped");
    }

    /// Returns `Ok(())` only when shutdown was requested mid-stream.
    fn connect_and_stream(&mut self) -> anyhow::Result<()> {
        self.set_state(IngestState::Connecting);
        let stream = self.connect()?;
        stream.set_read_timeout(Some(READ_POLL_INTERVAL))?;

        self.set_state(IngestState::Streaming);
        self.policy.reset();
        tracing::info!(source = %self.source, "connected to stats source");

        let mut reader = BufReader::new(stream);
        let mut line = Vec::with_capacity(4096);
        let mut discarding = false;
        loop {
            if self.shutdown_requested() {
                return Ok(());
            }
            // At most one byte past the cap, so an oversized line is
            // detected without buffering the rest of it.
            let budget = (MAX_LINE_LEN + 1).saturating_sub(line.len()).max(1) as u64;
            match (&mut reader).take(budget).read_until(b'\n', &mut line) {
                Ok(0) => anyhow::bail!("stats source closed the connection"),
                Ok(_) => {
                    let complete = line.last() == Some(&b'\n');
                    if !complete && line.len() > MAX_LINE_LEN {
                        if !discarding {
                            tracing::warn!(max = MAX_LINE_LEN, "dropping oversized stats line");
                            discarding = true;
                        }
                        line.clear();
                        continue;
                    }
                    if discarding {
                        // Tail of the oversized line; resync after it.
                        discarding = !complete;
                    } else {
                        // A line without '\n' is the tail before EOF; score
                        // it anyway, the next read reports the close.
                        self.process_line(&line);
                    }
                    line.clear();
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    // Partial data stays in `line` until the newline arrives.
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Try every resolved address of the stats source, each bounded by
    /// [`CONNECT_TIMEOUT`].
    fn connect(&self) -> std::io::Result<TcpStream> {
        let mut last_err = None;
        for addr in (self.source.host.as_str(), self.source.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(
                ErrorKind::AddrNotAvailable,
                format!("no address for {}", self.source),
            )
        }))
    }

    fn process_line(&mut self, raw: &[u8]) {
        let Ok(text) = std::str::from_utf8(raw) else {
            tracing::trace!(len = raw.len(), "dropping non-UTF-8 stats line");
            return;
        };
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        if let LineOutcome::Scored(out) = self.session.handle_line(text, unix_now()) {
            tracing::debug!(
                score = out.final_score,
                penalty = out.penalty,
                fec_change = out.fec_change,
                lost = out.lost_packets,
                fec_rec = out.fec_rec_packets,
                rssi = out.best_rssi,
                snr = out.best_snr,
                antennas = out.num_antennas,
                keyframe = out.keyframe_code.as_deref().unwrap_or("-"),
                noise = self.session.scorer().last_breakdown().filtered_noise,
                "link scored"
            );
            self.emitted += 1;
            if let Err(e) = self.emitter.emit(&out) {
                tracing::debug!(error = %e, "control datagram send failed");
            }
        }
    }

    fn set_state(&mut self, state: IngestState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "ingest state");
            self.state = state;
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    fn sleep_unless_shutdown(&self, total: Duration) {
        let mut left = total;
        while !left.is_zero() && !self.shutdown_requested() {
            let step = left.min(SLEEP_SLICE);
            std::thread::sleep(step);
            left -= step;
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
