use std::{
    net::IpAddr,
    time::{Duration, Instant},
};

use anyhow::Result;
use common::{Logger, Statistics};
use tokio_util::sync::CancellationToken;

use crate::{
    icmp,
    logger::PingResult,
    probe::{ProbeOutcome, ProbeSocket, Prober},
    session::EchoSession,
};

/// Abort the run instead of spinning on a broken socket.
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Validated run parameters, fixed for the lifetime of the run.
pub struct RunConfig {
    pub hostname: String,
    pub addr: IpAddr,
    pub count: Option<u64>,
    pub interval: Duration,
    pub timeout: Duration,
    pub deadline: Option<Duration>,
    pub payload_len: usize,
    pub quiet: bool,
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Finished,
    Interrupted,
}

pub struct RunSummary {
    pub sent: u64,
    pub received: u64,
    pub loss_percent: u32,
    pub elapsed: Duration,
    pub state: RunState,
    pub rtt_stats: Statistics,
}

/// Drives the probe loop: N probes (or unbounded) with the configured
/// interval between probe completions, cooperative cancellation at probe
/// boundaries, and the final summary.
pub(crate) struct RunController<S> {
    cfg: RunConfig,
    session: EchoSession,
    prober: Prober<S>,
    logger: Option<Logger<PingResult>>,
    rtt_stats: Statistics,
    state: RunState,
}

impl<S: ProbeSocket> RunController<S> {
    pub fn new(cfg: RunConfig, socket: S, logger: Option<Logger<PingResult>>) -> Self {
        let prober = Prober::new(socket, cfg.addr, cfg.payload_len, cfg.timeout);
        Self {
            session: EchoSession::new(),
            prober,
            logger,
            rtt_stats: Statistics::new(),
            state: RunState::Idle,
            cfg,
        }
    }

    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RunSummary> {
        self.state = RunState::Running;
        if !self.cfg.quiet {
            println!(
                "PING {} ({}) {}({}) bytes of data",
                self.cfg.hostname,
                self.cfg.addr,
                self.cfg.payload_len,
                // payload + ICMP header + IPv4 header on the wire
                self.cfg.payload_len + icmp::HEADER_LEN + 20,
            );
        }

        let started = Instant::now();
        let mut consecutive_errors = 0u32;
        let mut completed: u64 = 0;

        loop {
            // A probe in flight always runs to completion; cancellation and
            // the deadline are only honored here, between probes.
            if cancel.is_cancelled() {
                self.state = RunState::Interrupted;
                break;
            }
            if let Some(count) = self.cfg.count {
                if completed >= count {
                    self.state = RunState::Finished;
                    break;
                }
            }
            if let Some(deadline) = self.cfg.deadline {
                if started.elapsed() >= deadline {
                    self.state = RunState::Finished;
                    break;
                }
            }

            let sequence = self.session.next_sequence();
            let outcome = self.prober.probe(&mut self.session).await;
            self.session.record(&outcome);
            completed += 1;

            match &outcome {
                ProbeOutcome::Success { rtt, ttl, source } => {
                    consecutive_errors = 0;
                    let rtt_ms = rtt.as_secs_f64() * 1000.0;
                    self.rtt_stats.update(rtt_ms);
                    if !self.cfg.quiet {
                        let ttl_column =
                            ttl.map(|t| t.to_string()).unwrap_or_else(|| "?".to_string());
                        println!(
                            "{} bytes from {} ({}): icmp_seq={} ttl={} time={:.3} ms",
                            self.cfg.payload_len + icmp::HEADER_LEN,
                            self.cfg.hostname,
                            source,
                            sequence,
                            ttl_column,
                            rtt_ms,
                        );
                    }
                    if let Some(logger) = self.logger.as_mut() {
                        logger
                            .log(&PingResult {
                                seq: sequence,
                                ttl: *ttl,
                                rtt_ms,
                                size: self.cfg.payload_len + icmp::HEADER_LEN,
                                src_addr: source.to_string(),
                                dst_addr: self.cfg.addr.to_string(),
                            })
                            .await?;
                    }
                }
                ProbeOutcome::Timeout => {
                    consecutive_errors = 0;
                    if !self.cfg.quiet {
                        println!("Timeout reached");
                    }
                }
                ProbeOutcome::Error(e) => {
                    eprintln!("hookping: probe failed: {e}");
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        eprintln!(
                            "hookping: {} consecutive socket errors, giving up",
                            MAX_CONSECUTIVE_ERRORS
                        );
                        self.state = RunState::Interrupted;
                        break;
                    }
                }
            }

            if self.cfg.count == Some(completed) {
                self.state = RunState::Finished;
                break;
            }

            // Interval is measured from the end of one probe to the start
            // of the next, not wall-clock-periodic.
            tokio::select! {
                _ = tokio::time::sleep(self.cfg.interval) => {}
                _ = cancel.cancelled() => {
                    self.state = RunState::Interrupted;
                    break;
                }
            }
        }

        let summary = self.summary(started.elapsed());
        self.print_summary(&summary);
        Ok(summary)
    }

    fn summary(&self, elapsed: Duration) -> RunSummary {
        let session = &self.session;
        // Every probe ends in exactly one bucket.
        debug_assert_eq!(
            session.sent_count(),
            session.received_count() + session.timed_out_count() + session.errored_count()
        );
        RunSummary {
            sent: session.sent_count(),
            received: session.received_count(),
            loss_percent: session.loss_percent(),
            elapsed,
            state: self.state,
            rtt_stats: self.rtt_stats.clone(),
        }
    }

    fn print_summary(&self, summary: &RunSummary) {
        println!();
        println!("--- {} ping statistics ---", self.cfg.hostname);
        println!(
            "{} packets transmitted, {} received, {}% packet loss, time {} ms",
            summary.sent,
            summary.received,
            summary.loss_percent,
            summary.elapsed.as_millis(),
        );
        if self.cfg.verbose && summary.rtt_stats.samples() > 0 {
            println!("{}", summary.rtt_stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeSocket, Script};

    fn config(count: Option<u64>, interval_ms: u64, timeout_ms: u64) -> RunConfig {
        RunConfig {
            hostname: "localhost".to_string(),
            addr: "127.0.0.1".parse().unwrap(),
            count,
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            deadline: None,
            payload_len: 40,
            quiet: true,
            verbose: false,
        }
    }

    #[tokio::test]
    async fn bounded_run_with_replies() {
        let socket = FakeSocket::new(Script::EchoReply { ttl: 64 });
        let mut controller = RunController::new(config(Some(5), 0, 1000), socket, None);

        let summary = controller.run(CancellationToken::new()).await.unwrap();
        assert_eq!(summary.sent, 5);
        assert_eq!(summary.received, 5);
        assert_eq!(summary.loss_percent, 0);
        assert_eq!(summary.state, RunState::Finished);
        assert_eq!(controller.session.round_trip_times().len(), 5);
        assert_eq!(summary.rtt_stats.samples(), 5);
    }

    #[tokio::test]
    async fn unanswered_run_is_all_loss() {
        let socket = FakeSocket::new(Script::Silent);
        let mut controller = RunController::new(config(Some(3), 0, 200), socket, None);

        let summary = controller.run(CancellationToken::new()).await.unwrap();
        assert_eq!(summary.sent, 3);
        assert_eq!(summary.received, 0);
        assert_eq!(summary.loss_percent, 100);
        assert_eq!(controller.session.timed_out_count(), 3);
    }

    #[tokio::test]
    async fn consecutive_send_errors_abort() {
        let socket = FakeSocket::new(Script::FailSend);
        let mut controller = RunController::new(config(Some(10), 0, 200), socket, None);

        let summary = controller.run(CancellationToken::new()).await.unwrap();
        assert_eq!(summary.sent, 3);
        assert_eq!(controller.session.errored_count(), 3);
        assert_eq!(summary.state, RunState::Interrupted);
    }

    #[tokio::test]
    async fn zero_count_sends_nothing() {
        let socket = FakeSocket::new(Script::EchoReply { ttl: 64 });
        let mut controller = RunController::new(config(Some(0), 0, 200), socket, None);

        let summary = controller.run(CancellationToken::new()).await.unwrap();
        assert_eq!(summary.sent, 0);
        assert_eq!(summary.loss_percent, 0);
    }

    #[tokio::test]
    async fn cancellation_stops_an_unbounded_run() {
        let socket = FakeSocket::new(Script::EchoReply { ttl: 64 });
        // Long interval so cancellation lands in the inter-probe sleep.
        let mut controller = RunController::new(config(None, 10_000, 1000), socket, None);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let summary = controller.run(cancel).await.unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.state, RunState::Interrupted);
    }

    #[tokio::test]
    async fn deadline_bounds_the_run() {
        let socket = FakeSocket::new(Script::EchoReply { ttl: 64 });
        let mut cfg = config(None, 20, 1000);
        cfg.deadline = Some(Duration::from_millis(100));
        let mut controller = RunController::new(cfg, socket, None);

        let summary = controller.run(CancellationToken::new()).await.unwrap();
        assert!(summary.sent >= 1);
        assert_eq!(summary.state, RunState::Finished);
        assert!(summary.elapsed >= Duration::from_millis(100));
    }

    // Needs a raw socket; run with: sudo -E cargo test -- --ignored
    #[tokio::test]
    #[ignore = "requires CAP_NET_RAW"]
    async fn loopback_end_to_end() {
        use common::{AsyncICMPSocket, ICMPSocket};

        let socket = AsyncICMPSocket::new(ICMPSocket::new(None, Some(64)).unwrap()).unwrap();
        let mut controller = RunController::new(config(Some(5), 0, 1000), socket, None);

        let summary = controller.run(CancellationToken::new()).await.unwrap();
        assert_eq!(summary.sent, 5);
        assert_eq!(summary.received, 5);
        assert_eq!(summary.loss_percent, 0);
        assert_eq!(controller.session.round_trip_times().len(), 5);
    }
}
