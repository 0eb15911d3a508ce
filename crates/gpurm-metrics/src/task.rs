//! Scoped task timing

use prometheus::{Histogram, IntGauge};
use std::future::Future;
use std::time::Instant;

/// Tracks one in-flight task
///
/// Creation increments `ai_active_tasks`; drop decrements it and records the
/// elapsed time in `ai_task_duration_seconds`, whether the task finished,
/// failed, panicked or was cancelled.
#[must_use = "the task is only tracked while the timer is alive"]
pub struct TaskTimer {
    active: IntGauge,
    duration: Histogram,
    started: Instant,
}

impl TaskTimer {
    pub(crate) fn start(active: IntGauge, duration: Histogram) -> Self {
        active.inc();
        Self {
            active,
            duration,
            started: Instant::now(),
        }
    }
}

impl Drop for TaskTimer {
    fn drop(&mut self) {
        self.active.dec();
        self.duration
            .observe(self.started.elapsed().as_secs_f64());
    }
}

impl crate::GpuMetrics {
    /// Run `task` while tracking it
    pub async fn track<F: Future>(&self, task: F) -> F::Output {
        let _timer = self.track_task();
        task.await
    }
}

#[cfg(test)]
mod tests {
    use crate::GpuMetrics;
    use std::time::Duration;

    #[test]
    fn test_timer_tracks_active_tasks() {
        let metrics = GpuMetrics::new().unwrap();

        let first = metrics.track_task();
        let second = metrics.track_task();
        assert_eq!(metrics.active_tasks.get(), 2);

        drop(first);
        assert_eq!(metrics.active_tasks.get(), 1);
        drop(second);
        assert_eq!(metrics.active_tasks.get(), 0);
        assert_eq!(metrics.task_duration.get_sample_count(), 2);
    }

    #[tokio::test]
    async fn test_track_future() {
        let metrics = GpuMetrics::new().unwrap();

        let value = metrics.track(async { 7 }).await;
        assert_eq!(value, 7);
        assert_eq!(metrics.active_tasks.get(), 0);
        assert_eq!(metrics.task_duration.get_sample_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_task_is_recorded() {
        let metrics = GpuMetrics::new().unwrap();

        let result: Result<(), &str> = metrics.track(async { Err("inference failed") }).await;
        assert!(result.is_err());
        assert_eq!(metrics.active_tasks.get(), 0);
        assert_eq!(metrics.task_duration.get_sample_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_task_is_recorded() {
        let metrics = GpuMetrics::new().unwrap();

        let slow = metrics.track(tokio::time::sleep(Duration::from_secs(3600)));
        let outcome = tokio::time::timeout(Duration::from_millis(10), slow).await;
        assert!(outcome.is_err());

        assert_eq!(metrics.active_tasks.get(), 0);
        assert_eq!(metrics.task_duration.get_sample_count(), 1);
    }

    #[test]
    fn test_observe_inference() {
        let metrics = GpuMetrics::new().unwrap();
        metrics.observe_inference(Duration::from_millis(40));
        assert_eq!(metrics.inference_time.get_sample_count(), 1);
    }
}
