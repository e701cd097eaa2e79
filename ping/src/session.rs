use std::time::Duration;

use crate::probe::ProbeOutcome;

/// Per-run probe state: the run-scoped identifier, the wrapping sequence
/// counter and the outcome bookkeeping. Owned by the run controller; the
/// prober only bumps the send-side counters.
pub struct EchoSession {
    identifier: u16,
    next_sequence: u16,
    sent_count: u64,
    received_count: u64,
    timed_out_count: u64,
    errored_count: u64,
    round_trip_times: Vec<Duration>,
}

impl EchoSession {
    pub fn new() -> Self {
        Self::with_identifier(rand::random::<u16>())
    }

    pub fn with_identifier(identifier: u16) -> Self {
        Self {
            identifier,
            next_sequence: 0,
            sent_count: 0,
            received_count: 0,
            timed_out_count: 0,
            errored_count: 0,
            round_trip_times: Vec::new(),
        }
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    /// Sequence number the next probe will carry.
    pub fn next_sequence(&self) -> u16 {
        self.next_sequence
    }

    /// Called once per issued send: the send is fire-and-forget, so the
    /// counters advance whether or not a reply ever shows up.
    pub fn mark_sent(&mut self) {
        self.sent_count += 1;
        self.next_sequence = self.next_sequence.wrapping_add(1);
    }

    pub fn record(&mut self, outcome: &ProbeOutcome) {
        match outcome {
            ProbeOutcome::Success { rtt, .. } => {
                self.received_count += 1;
                self.round_trip_times.push(*rtt);
            }
            ProbeOutcome::Timeout => self.timed_out_count += 1,
            ProbeOutcome::Error(_) => self.errored_count += 1,
        }
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count
    }

    pub fn received_count(&self) -> u64 {
        self.received_count
    }

    pub fn timed_out_count(&self) -> u64 {
        self.timed_out_count
    }

    pub fn errored_count(&self) -> u64 {
        self.errored_count
    }

    pub fn round_trip_times(&self) -> &[Duration] {
        &self.round_trip_times
    }

    /// Rounded packet loss percentage; zero when nothing was sent.
    pub fn loss_percent(&self) -> u32 {
        if self.sent_count == 0 {
            return 0;
        }
        let received = self.received_count as f64;
        let sent = self.sent_count as f64;
        (100.0 * (1.0 - received / sent)).round() as u32
    }
}

impl Default for EchoSession {
    fn default() -> Self {
        Self::new()
    }
}
