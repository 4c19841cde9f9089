//! Periodic transmission scheduler
//!
//! Tasks are plain data checked against a monotonic clock on every tick, so
//! tests drive the scheduler by passing explicit instants.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use canmux_core::CanFrame;

/// A frame resent at a fixed interval while the network is connected
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodicTask {
    pub frame_id: u32,
    pub payload: Vec<u8>,
    pub period_ms: u64,
    pub extended: bool,
    pub enabled: bool,
    #[serde(skip)]
    pub last_sent_at: Option<Instant>,
}

impl PeriodicTask {
    pub fn new(frame_id: u32, payload: impl Into<Vec<u8>>, period_ms: u64, extended: bool) -> Self {
        Self {
            frame_id,
            payload: payload.into(),
            period_ms: period_ms.max(1),
            extended,
            enabled: true,
            last_sent_at: None,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.enabled
            && self
                .last_sent_at
                .map_or(true, |last| now.saturating_duration_since(last) >= self.period())
    }

    pub fn frame(&self) -> CanFrame {
        CanFrame::new(self.frame_id, self.payload.clone(), self.extended)
    }
}

/// Periodic tasks of one network
#[derive(Debug, Clone, Default)]
pub struct PeriodicScheduler {
    tasks: Vec<PeriodicTask>,
    running: bool,
}

impl PeriodicScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task; an existing task with the same frame id is replaced
    pub fn add(&mut self, task: PeriodicTask) {
        match self.tasks.iter_mut().find(|t| t.frame_id == task.frame_id) {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
    }

    pub fn remove(&mut self, frame_id: u32) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.frame_id != frame_id);
        self.tasks.len() != before
    }

    pub fn set_enabled(&mut self, frame_id: u32, enabled: bool) -> bool {
        match self.tasks.iter_mut().find(|t| t.frame_id == frame_id) {
            Some(task) => {
                task.enabled = enabled;
                if enabled {
                    task.last_sent_at = None;
                }
                true
            }
            None => false,
        }
    }

    pub fn tasks(&self) -> &[PeriodicTask] {
        &self.tasks
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start firing; every task is due on the next tick
    pub fn start(&mut self) {
        self.running = true;
        for task in &mut self.tasks {
            task.last_sent_at = None;
        }
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Frames due at `now`, marking their tasks as sent
    pub fn take_due(&mut self, now: Instant) -> Vec<CanFrame> {
        if !self.running {
            return Vec::new();
        }
        self.tasks
            .iter_mut()
            .filter(|task| task.is_due(now))
            .map(|task| {
                task.last_sent_at = Some(now);
                task.frame()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_per_period() {
        let mut scheduler = PeriodicScheduler::new();
        scheduler.add(PeriodicTask::new(0x100, vec![1], 100, false));
        scheduler.start();

        let t0 = Instant::now();
        assert_eq!(scheduler.take_due(t0).len(), 1);
        assert!(scheduler.take_due(t0 + Duration::from_millis(50)).is_empty());
        assert_eq!(scheduler.take_due(t0 + Duration::from_millis(100)).len(), 1);
        assert_eq!(scheduler.take_due(t0 + Duration::from_millis(200)).len(), 1);
    }

    #[test]
    fn test_stopped_scheduler_sends_nothing() {
        let mut scheduler = PeriodicScheduler::new();
        scheduler.add(PeriodicTask::new(0x100, vec![], 10, false));
        assert!(scheduler.take_due(Instant::now()).is_empty());
        scheduler.start();
        scheduler.stop();
        assert!(scheduler.take_due(Instant::now()).is_empty());
    }

    #[test]
    fn test_add_replaces_same_id() {
        let mut scheduler = PeriodicScheduler::new();
        scheduler.add(PeriodicTask::new(0x200, vec![1], 100, false));
        scheduler.add(PeriodicTask::new(0x200, vec![2], 250, false));
        assert_eq!(scheduler.tasks().len(), 1);
        assert_eq!(scheduler.tasks()[0].payload, vec![2]);
        assert_eq!(scheduler.tasks()[0].period_ms, 250);
    }

    #[test]
    fn test_disabled_task_skipped() {
        let mut scheduler = PeriodicScheduler::new();
        scheduler.add(PeriodicTask::new(0x300, vec![], 100, false));
        scheduler.add(PeriodicTask::new(0x301, vec![], 100, false));
        scheduler.start();
        assert!(scheduler.set_enabled(0x300, false));
        assert!(!scheduler.set_enabled(0x999, false));

        let due = scheduler.take_due(Instant::now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, 0x301);
        assert!(scheduler.remove(0x301));
        assert!(!scheduler.remove(0x301));
    }
}
