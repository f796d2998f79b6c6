//! Running counters describing scanner health.
//!
//! The statistics exist so an integrator can notice under-provisioned
//! queues or a slow consumer: the engine drops events silently by design
//! and this is where those drops become visible.

/// Snapshot of the engine's counters. Returned by value; the engine keeps
/// the live copy behind its critical section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanStatistics {
    pub total_scans: u32,
    pub total_events: u32,
    pub total_errors: u32,
    pub queue_overflows: u32,
    pub max_scan_time_us: u32,
    /// Running weighted average: `avg' = (avg * (n - 1) + sample) / n`.
    pub avg_scan_time_us: u32,
}

impl ScanStatistics {
    pub(crate) fn begin_scan(&mut self) {
        self.total_scans = self.total_scans.wrapping_add(1);
    }

    pub(crate) fn end_scan(&mut self, duration_us: u32) {
        if duration_us > self.max_scan_time_us {
            self.max_scan_time_us = duration_us;
        }

        let n = u64::from(self.total_scans.max(1));
        let weighted = u64::from(self.avg_scan_time_us) * (n - 1) + u64::from(duration_us);
        self.avg_scan_time_us = (weighted / n) as u32;
    }

    pub(crate) fn note_event(&mut self) {
        self.total_events = self.total_events.wrapping_add(1);
    }

    pub(crate) fn note_error(&mut self) {
        self.total_errors = self.total_errors.wrapping_add(1);
    }

    pub(crate) fn note_overflow(&mut self) {
        self.queue_overflows = self.queue_overflows.wrapping_add(1);
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
