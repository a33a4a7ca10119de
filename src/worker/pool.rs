//! The worker pool: concurrent consumers draining the durable queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::github::GitHubApi;
use crate::queue::DurableQueue;

use super::{Disposition, Processor};

/// Sizing and pacing of the worker pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Number of concurrent queue consumers.
    pub workers: usize,
    /// Long-poll window of each `receive` call. Also bounds how long
    /// shutdown waits on an idle worker.
    pub receive_wait: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            receive_wait: Duration::from_secs(1),
        }
    }
}

/// Runs `config.workers` consumers against the queue until `cancel` fires,
/// then waits for all of them to wind down.
pub async fn run_workers<G: GitHubApi + 'static>(
    queue: Arc<DurableQueue>,
    processor: Arc<Processor<G>>,
    config: PoolConfig,
    cancel: CancellationToken,
) {
    let mut set = JoinSet::new();
    for worker_id in 0..config.workers.max(1) {
        set.spawn(worker_loop(
            worker_id,
            Arc::clone(&queue),
            Arc::clone(&processor),
            config,
            cancel.clone(),
        ));
    }
    while let Some(result) = set.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "worker task aborted");
        }
    }
}

#[instrument(skip_all, fields(worker_id))]
async fn worker_loop<G: GitHubApi + 'static>(
    worker_id: usize,
    queue: Arc<DurableQueue>,
    processor: Arc<Processor<G>>,
    config: PoolConfig,
    cancel: CancellationToken,
) {
    info!("worker started");
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = queue.receive(config.receive_wait) => received,
        };
        match received {
            Ok(Some(message)) => match processor.process(&message, &cancel).await {
                Disposition::Ack => {
                    if let Err(e) = queue.ack(&message) {
                        error!(
                            delivery_id = %message.delivery_id(),
                            error = %e,
                            "ack failed, message will redeliver"
                        );
                    }
                }
                Disposition::Retry => {
                    debug!(
                        delivery_id = %message.delivery_id(),
                        "returning message for redelivery"
                    );
                    queue.nack(&message);
                }
            },
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "queue receive failed");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }
    info!("worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use serde_json::json;
    use tokio::time::{sleep, timeout};

    use crate::github::{GitHubApiError, RetryConfig};
    use crate::queue::{EventRecord, QueueConfig};
    use crate::rules::EventMapping;
    use crate::test_utils::MockGitHub;
    use crate::types::DeliveryId;
    use crate::worker::ProcessorConfig;
    use crate::dispatch::{CorrelationConfig, MonitorConfig};

    const MAPPING: &str = r#"
- event_type: pull_request
  actions: [opened]
  repository_patterns:
    - owner: acme
      repository: "*"
      workflows:
        - owner: acme
          repository: ci
          workflow_file: pr-check.yml
          ref: main
"#;

    fn mappings() -> Vec<EventMapping> {
        serde_yaml::from_str(MAPPING).unwrap()
    }

    fn quick_processor_config() -> ProcessorConfig {
        let retry = RetryConfig::new(1, Duration::from_millis(1), Duration::from_millis(2), 2.0);
        ProcessorConfig {
            correlation: CorrelationConfig {
                poll_interval: Duration::from_millis(5),
                timeout: Duration::from_millis(100),
                retry,
            },
            monitor: MonitorConfig {
                poll_interval: Duration::from_millis(5),
                timeout: Duration::from_millis(100),
                retry,
            },
            dispatch_retry: retry,
            report_retry: retry,
            max_concurrent_jobs: 4,
        }
    }

    fn quick_pool_config() -> PoolConfig {
        PoolConfig {
            workers: 2,
            receive_wait: Duration::from_millis(50),
        }
    }

    fn quick_queue_config() -> QueueConfig {
        QueueConfig {
            visibility_timeout: Duration::from_secs(5),
            max_receive_count: 3,
            scan_interval: Duration::from_millis(10),
        }
    }

    fn record(delivery_id: &str) -> EventRecord {
        EventRecord {
            event_type: "pull_request".to_string(),
            action: "opened".to_string(),
            delivery_id: DeliveryId::new(delivery_id),
            payload: json!({
                "action": "opened",
                "repository": {"name": "app", "owner": {"login": "acme"}},
                "pull_request": {
                    "number": 7,
                    "head": {
                        "ref": "feature/x",
                        "sha": "0123456789abcdef0123456789abcdef01234567"
                    }
                },
                "sender": {"login": "octocat"}
            }),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn pool_drains_the_queue_and_acks() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(DurableQueue::open(dir.path(), quick_queue_config()).unwrap());
        for i in 0..3 {
            queue.enqueue(&record(&format!("delivery-{i}"))).unwrap();
        }

        let api = Arc::new(MockGitHub::default());
        let processor = Arc::new(Processor::new(
            Arc::clone(&api),
            mappings(),
            quick_processor_config(),
        ));
        let cancel = CancellationToken::new();
        let pool = tokio::spawn(run_workers(
            Arc::clone(&queue),
            processor,
            quick_pool_config(),
            cancel.clone(),
        ));

        for _ in 0..300 {
            if api.dispatched().len() == 3 && queue.depth().unwrap() == 0 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        timeout(Duration::from_secs(5), pool).await.unwrap().unwrap();

        assert_eq!(api.dispatched().len(), 3);
        assert_eq!(queue.depth().unwrap(), 0);
        assert!(queue.dead_letter_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retrying_message_ends_up_dead_lettered() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(
            DurableQueue::open(
                dir.path(),
                QueueConfig {
                    visibility_timeout: Duration::from_millis(100),
                    max_receive_count: 2,
                    scan_interval: Duration::from_millis(10),
                },
            )
            .unwrap(),
        );
        queue.enqueue(&record("doomed")).unwrap();

        let api = Arc::new(MockGitHub::default());
        // Every dispatch attempt is rejected, so each processing asks for a
        // redelivery until the budget runs out.
        for _ in 0..8 {
            api.script_dispatch(Err(GitHubApiError::permanent_without_source("nope")));
        }
        let processor = Arc::new(Processor::new(
            Arc::clone(&api),
            mappings(),
            quick_processor_config(),
        ));
        let cancel = CancellationToken::new();
        let pool = tokio::spawn(run_workers(
            Arc::clone(&queue),
            processor,
            PoolConfig {
                workers: 1,
                receive_wait: Duration::from_millis(50),
            },
            cancel.clone(),
        ));

        for _ in 0..300 {
            if queue.dead_letter_ids().unwrap().len() == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        timeout(Duration::from_secs(5), pool).await.unwrap().unwrap();

        assert_eq!(
            queue.dead_letter_ids().unwrap(),
            vec![DeliveryId::new("doomed")]
        );
        assert_eq!(queue.depth().unwrap(), 0);
        assert!(api.dispatched().is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_idle_workers() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(DurableQueue::open(dir.path(), quick_queue_config()).unwrap());
        let api = Arc::new(MockGitHub::default());
        let processor = Arc::new(Processor::new(
            Arc::clone(&api),
            mappings(),
            quick_processor_config(),
        ));
        let cancel = CancellationToken::new();
        let pool = tokio::spawn(run_workers(
            queue,
            processor,
            quick_pool_config(),
            cancel.clone(),
        ));

        cancel.cancel();
        timeout(Duration::from_secs(5), pool).await.unwrap().unwrap();
    }
}
