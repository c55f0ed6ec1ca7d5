use chrono::Local;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::info;

use crate::engine::Outcome;
use crate::error::DropReason;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

// ==========================================
// Per-queue verdict counters
// ==========================================
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    // reset after every report
    pub mangled_pkts: u64,
    pub passed_pkts: u64,
    pub drop_pkts: u64,
    pub bytes: u64,
    pub drops_by_reason: HashMap<DropReason, u64>,

    // never reset
    pub total_pkts: u64,
}

impl QueueStats {
    fn reset_window(&mut self) {
        self.mangled_pkts = 0;
        self.passed_pkts = 0;
        self.drop_pkts = 0;
        self.bytes = 0;
        self.drops_by_reason.clear();
    }
}

// ==========================================
// Verdict monitor: counts, then reports once a second
// ==========================================
pub struct VerdictMonitor {
    name: String,
    stats: HashMap<u16, QueueStats>,
    last_report: Instant,
}

impl VerdictMonitor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stats: HashMap::new(),
            last_report: Instant::now(),
        }
    }

    pub fn record(&mut self, queue_num: u16, result: &Result<Outcome, DropReason>, pkt_len: usize) {
        let stat = self.stats.entry(queue_num).or_default();
        stat.total_pkts += 1;
        stat.bytes += pkt_len as u64;
        match result {
            Ok(Outcome::Mangled) => stat.mangled_pkts += 1,
            Ok(Outcome::PassedThrough) => stat.passed_pkts += 1,
            Err(reason) => {
                stat.drop_pkts += 1;
                *stat.drops_by_reason.entry(*reason).or_insert(0) += 1;
            }
        }
    }

    #[cfg(test)]
    pub fn stats(&self, queue_num: u16) -> Option<&QueueStats> {
        self.stats.get(&queue_num)
    }

    /// Emits one line per queue and resets the window counters, at most once
    /// per interval. Returns whether a report went out.
    pub fn check_and_report(&mut self) -> bool {
        let elapsed = self.last_report.elapsed();
        if elapsed < REPORT_INTERVAL {
            return false;
        }
        self.report(elapsed);
        true
    }

    fn report(&mut self, elapsed: Duration) {
        let now_str = Local::now().format("%H:%M:%S").to_string();
        let secs = elapsed.as_secs_f64();

        let mut sorted_queues: Vec<_> = self.stats.keys().copied().collect();
        sorted_queues.sort_unstable();

        for q_num in sorted_queues {
            if let Some(stat) = self.stats.get_mut(&q_num) {
                let mbps = (stat.bytes as f64 * 8.0) / 1_000_000.0 / secs;
                let top_drop = stat
                    .drops_by_reason
                    .iter()
                    .max_by_key(|(_, n)| **n)
                    .map(|(reason, _)| reason.to_string())
                    .unwrap_or_default();
                info!(
                    monitor = %self.name,
                    at = %now_str,
                    queue = q_num,
                    mangled = stat.mangled_pkts,
                    passed = stat.passed_pkts,
                    dropped = stat.drop_pkts,
                    mbps,
                    total = stat.total_pkts,
                    top_drop = %top_drop,
                    "verdicts"
                );
                stat.reset_window();
            }
        }

        self.last_report = Instant::now();
    }
}
