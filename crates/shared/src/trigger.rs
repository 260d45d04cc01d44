use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::error::AlreadyRunning;
use crate::models::{PipelineRun, Trigger};
use crate::pipeline::Pipeline;
use crate::status::{log_line, LiveStatus, LogLevel};

const DRAIN_POLL: std::time::Duration = std::time::Duration::from_millis(200);

/// Exclusive run slot. `try_acquire` never waits.
#[derive(Debug, Clone, Default)]
pub struct RunSlot {
    busy: Arc<AtomicBool>,
}

/// Held for the duration of one run; releases the slot on drop.
#[derive(Debug)]
pub struct RunPermit {
    busy: Arc<AtomicBool>,
}

impl RunSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Result<RunPermit, AlreadyRunning> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AlreadyRunning)?;
        Ok(RunPermit {
            busy: self.busy.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Single entry point for every trigger path: scheduler, control panel and
/// the command line.
pub struct Controller {
    pipeline: Pipeline,
    slot: RunSlot,
    status: watch::Sender<LiveStatus>,
}

impl Controller {
    pub async fn new(pipeline: Pipeline) -> Self {
        let (status, _) = watch::channel(LiveStatus::default());
        pipeline.sync_ledger_status(&status).await;

        let ledger_degraded = status.borrow().ledger_degraded.clone();
        if let Some(reason) = ledger_degraded {
            log_line(
                &status,
                LogLevel::Error,
                format!("Ledger could not be loaded, duplicates possible: {}", reason),
            );
        }

        Self {
            pipeline,
            slot: RunSlot::new(),
            status,
        }
    }

    /// Run the pipeline now unless another run holds the slot.
    pub async fn run_now(&self, trigger: Trigger) -> Result<PipelineRun, AlreadyRunning> {
        let _permit = match self.slot.try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                info!(?trigger, "Run requested while another is in progress; ignoring");
                log_line(
                    &self.status,
                    LogLevel::Info,
                    format!("{:?} trigger ignored: already running", trigger),
                );
                return Err(e);
            }
        };

        self.status.send_modify(|s| {
            s.running = true;
            s.current = None;
        });

        let run = self.pipeline.run(trigger, &self.status).await;

        let finished = run.clone();
        self.status.send_modify(|s| {
            s.running = false;
            s.current = None;
            s.last = Some(finished);
        });

        Ok(run)
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveStatus> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> LiveStatus {
        self.status.borrow().clone()
    }

    pub fn set_next_scheduled(&self, at: Option<DateTime<Utc>>) {
        self.status.send_modify(|s| s.next_scheduled = at);
    }

    pub fn slot(&self) -> &RunSlot {
        &self.slot
    }

    /// Wait for any in-flight run to finish, then hold the slot so no new
    /// run can start while the process exits.
    pub async fn drain(&self) -> RunPermit {
        let mut waiting = false;
        loop {
            match self.slot.try_acquire() {
                Ok(permit) => return permit,
                Err(_) => {
                    if !waiting {
                        info!("Waiting for the current run to finish before shutting down");
                        waiting = true;
                    }
                    tokio::time::sleep(DRAIN_POLL).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::DedupLedger;
    use crate::models::fixtures::article;
    use crate::pipeline::fakes::*;
    use crate::pipeline::PipelineConfig;

    async fn controller(fetcher: Arc<FakeFetcher>, publisher: Arc<FakePublisher>) -> Controller {
        let pipeline = Pipeline::new(
            PipelineConfig {
                categories: vec!["eng.1".to_string()],
                max_posts: 5,
            },
            fetcher,
            Arc::new(FakeTransformer::default()),
            publisher,
            DedupLedger::open(Box::new(MemoryStore::seeded(&[]))),
        );
        Controller::new(pipeline).await
    }

    #[test]
    fn test_slot_is_exclusive_until_permit_dropped() {
        let slot = RunSlot::new();
        let permit = slot.try_acquire().unwrap();
        assert!(slot.is_busy());
        assert_eq!(slot.try_acquire().unwrap_err(), AlreadyRunning);
        drop(permit);
        assert!(!slot.is_busy());
        assert!(slot.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_trigger_while_busy_does_no_work() {
        let mut fetcher = FakeFetcher::default();
        fetcher
            .by_category
            .insert("eng.1".to_string(), vec![article("a", 1)]);
        let fetcher = Arc::new(fetcher);
        let publisher = Arc::new(FakePublisher::default());
        let controller = controller(fetcher.clone(), publisher.clone()).await;

        // A scheduled run is holding the slot
        let held = controller.slot().try_acquire().unwrap();

        let result = controller.run_now(Trigger::Manual).await;

        assert_eq!(result.unwrap_err(), AlreadyRunning);
        assert!(fetcher.calls.lock().unwrap().is_empty());
        assert!(publisher.posted.lock().unwrap().is_empty());

        drop(held);
        let run = controller.run_now(Trigger::Manual).await.unwrap();
        assert_eq!(run.published_ids(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_drain_waits_for_run_and_blocks_new_ones() {
        let controller = Arc::new(
            controller(
                Arc::new(FakeFetcher::default()),
                Arc::new(FakePublisher::default()),
            )
            .await,
        );
        let in_flight = controller.slot().try_acquire().unwrap();

        let draining = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.drain().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!draining.is_finished());

        drop(in_flight);
        let _held = draining.await.unwrap();

        assert_eq!(
            controller.run_now(Trigger::Scheduled).await.unwrap_err(),
            AlreadyRunning
        );
    }

    #[tokio::test]
    async fn test_finished_run_moves_to_last() {
        let mut fetcher = FakeFetcher::default();
        fetcher
            .by_category
            .insert("eng.1".to_string(), vec![article("a", 1)]);
        let controller =
            controller(Arc::new(fetcher), Arc::new(FakePublisher::default())).await;

        controller.run_now(Trigger::Scheduled).await.unwrap();

        let snapshot = controller.snapshot();
        assert!(!snapshot.running);
        assert!(snapshot.current.is_none());
        assert_eq!(snapshot.last.unwrap().trigger, Trigger::Scheduled);
        assert!(!controller.slot().is_busy());
    }

    #[tokio::test]
    async fn test_second_run_publishes_nothing_new() {
        let mut fetcher = FakeFetcher::default();
        fetcher
            .by_category
            .insert("eng.1".to_string(), vec![article("a", 1), article("b", 2)]);
        let publisher = Arc::new(FakePublisher::default());
        let controller = controller(Arc::new(fetcher), publisher.clone()).await;

        let first = controller.run_now(Trigger::Manual).await.unwrap();
        let second = controller.run_now(Trigger::Manual).await.unwrap();

        assert_eq!(first.published_ids(), vec!["b", "a"]);
        assert!(second.published_ids().is_empty());
        assert_eq!(second.skipped().len(), 2);
        assert_eq!(publisher.posted.lock().unwrap().len(), 2);
    }
}
