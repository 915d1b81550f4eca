//! Shared health state for the /health endpoint.
//! Updated by the cycle runner and the alert consumer.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};

use crate::types::CycleStatus;

#[derive(Default)]
pub struct HealthState {
    /// True while an ingestion cycle is in progress.
    cycle_running: AtomicBool,
    cycles_completed: AtomicU64,
    /// Unix seconds when the last cycle finished (0 = none yet).
    last_cycle_at: AtomicI64,
    /// 0 = none, otherwise 1 + CycleStatus discriminant.
    last_status: AtomicU8,
    alerts_emitted: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle_started(&self) {
        self.cycle_running.store(true, Ordering::Relaxed);
    }

    pub fn cycle_finished(&self, status: CycleStatus, finished_at: i64) {
        let code = match status {
            CycleStatus::Success => 1,
            CycleStatus::Partial => 2,
            CycleStatus::Failed => 3,
        };
        self.last_status.store(code, Ordering::Relaxed);
        self.last_cycle_at.store(finished_at, Ordering::Relaxed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.cycle_running.store(false, Ordering::Relaxed);
    }

    pub fn inc_alerts_emitted(&self) {
        self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle_running(&self) -> bool {
        self.cycle_running.load(Ordering::Relaxed)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn last_cycle_at(&self) -> Option<i64> {
        Some(self.last_cycle_at.load(Ordering::Relaxed)).filter(|t| *t > 0)
    }

    pub fn last_status(&self) -> Option<CycleStatus> {
        match self.last_status.load(Ordering::Relaxed) {
            1 => Some(CycleStatus::Success),
            2 => Some(CycleStatus::Partial),
            3 => Some(CycleStatus::Failed),
            _ => None,
        }
    }

    pub fn alerts_emitted(&self) -> u64 {
        self.alerts_emitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_cycle_lifecycle() {
        let h = HealthState::new();
        assert_eq!(h.last_status(), None);
        assert_eq!(h.last_cycle_at(), None);

        h.cycle_started();
        assert!(h.cycle_running());
        h.cycle_finished(CycleStatus::Partial, 1_792_108_800);
        assert!(!h.cycle_running());
        assert_eq!(h.cycles_completed(), 1);
        assert_eq!(h.last_status(), Some(CycleStatus::Partial));
        assert_eq!(h.last_cycle_at(), Some(1_792_108_800));
    }
}
