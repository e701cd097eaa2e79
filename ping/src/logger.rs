use common::Logging;

/// One successfully matched probe, as written to the `--file` CSV log.
#[derive(Debug, Clone, Default)]
pub struct PingResult {
    pub seq: u16,
    pub ttl: Option<u8>,
    pub rtt_ms: f64,
    pub size: usize,
    pub src_addr: String,
    pub dst_addr: String,
}

impl Logging for PingResult {
    fn header() -> String {
        "seq,ttl,rtt_ms,size,src_addr,dst_addr".to_string()
    }

    fn row(&self) -> String {
        format!(
            "{},{},{:.6},{},{},{}",
            self.seq,
            self.ttl.map(|t| t.to_string()).unwrap_or_default(),
            self.rtt_ms,
            self.size,
            self.src_addr,
            self.dst_addr,
        )
    }
}
