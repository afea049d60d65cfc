//! End-to-end tests for the squall pipeline core.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use squall::metrics::events::FailureStage;
use squall::{
    BoxError, BridgeRuntime, ConnectRecord, InMemoryOffsetManager, MemoryDeadLetterQueue,
    RenoEstimator, RunnerEvent, RunnerName, RuntimeConfig, SinkTask, StaticRunnerSet,
    SubscribeRunnerKeys, TargetRunnerConfig, TransformEngine,
};

mod support {
    use super::*;

    /// Transform chain that forwards every record unchanged.
    pub struct Identity;

    impl TransformEngine for Identity {
        fn transform(&self, record: &ConnectRecord) -> Result<Option<ConnectRecord>, BoxError> {
            Ok(Some(record.clone()))
        }
    }

    /// Transform chain that filters every other record.
    #[derive(Default)]
    pub struct DropEveryOther {
        seen: AtomicUsize,
    }

    impl TransformEngine for DropEveryOther {
        fn transform(&self, record: &ConnectRecord) -> Result<Option<ConnectRecord>, BoxError> {
            if self.seen.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Ok(Some(record.clone()))
            } else {
                Ok(None)
            }
        }
    }

    /// Transform chain that fails on every other record.
    #[derive(Default)]
    pub struct FailEveryOther {
        seen: AtomicUsize,
    }

    impl TransformEngine for FailEveryOther {
        fn transform(&self, record: &ConnectRecord) -> Result<Option<ConnectRecord>, BoxError> {
            if self.seen.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Ok(Some(record.clone()))
            } else {
                Err("schema mismatch".into())
            }
        }
    }

    /// Sink that records every delivered batch.
    #[derive(Default)]
    pub struct CollectingSink {
        batches: Mutex<Vec<Vec<String>>>,
    }

    impl CollectingSink {
        pub fn delivered_ids(&self) -> Vec<String> {
            self.batches.lock().iter().flatten().cloned().collect()
        }

        pub fn delivered_count(&self) -> usize {
            self.batches.lock().iter().map(Vec::len).sum()
        }
    }

    #[async_trait]
    impl SinkTask for CollectingSink {
        async fn put(&self, records: &[ConnectRecord]) -> Result<(), BoxError> {
            let ids = records.iter().map(|r| r.id().to_string()).collect();
            self.batches.lock().push(ids);
            Ok(())
        }
    }

    /// Sink that rejects every batch.
    pub struct FailingSink;

    #[async_trait]
    impl SinkTask for FailingSink {
        async fn put(&self, _records: &[ConnectRecord]) -> Result<(), BoxError> {
            Err("endpoint returned 503".into())
        }
    }

    /// Sink that never completes a delivery.
    pub struct StuckSink;

    #[async_trait]
    impl SinkTask for StuckSink {
        async fn put(&self, _records: &[ConnectRecord]) -> Result<(), BoxError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    /// Test config with short waits so scenarios settle quickly.
    pub fn fast_config() -> RuntimeConfig {
        RuntimeConfig::from_yaml(
            r#"
transform:
  empty_wait_ms: 10
  no_engine_wait_ms: 10
push:
  empty_wait_ms: 10
queue:
  offer_timeout_ms: 50
shutdown:
  worker_join_timeout_ms: 1000
"#,
        )
        .expect("test config")
    }

    pub fn records(runner: &str, count: usize) -> Vec<ConnectRecord> {
        (0..count)
            .map(|i| ConnectRecord::new(runner, format!("{runner}-{i}"), Bytes::from_static(b"{}")))
            .collect()
    }

    pub fn runner_config(
        name: &str,
        transform: Arc<dyn TransformEngine>,
        sink: Arc<dyn SinkTask>,
    ) -> TargetRunnerConfig {
        TargetRunnerConfig::new(SubscribeRunnerKeys::new(name, "test-bus"), transform, sink)
    }

    pub struct Harness {
        pub runtime: BridgeRuntime,
        pub offsets: Arc<InMemoryOffsetManager>,
        pub dlq: Arc<MemoryDeadLetterQueue>,
    }

    pub async fn start(config: RuntimeConfig, runners: Vec<TargetRunnerConfig>) -> Harness {
        let offsets = Arc::new(InMemoryOffsetManager::new());
        let dlq = Arc::new(MemoryDeadLetterQueue::new());
        let runtime = BridgeRuntime::start(
            config.clone(),
            Arc::new(StaticRunnerSet::new(runners)),
            Arc::new(RenoEstimator::new(config.window.bounds())),
            offsets.clone(),
            dlq.clone(),
        )
        .await
        .expect("runtime starts");
        Harness { runtime, offsets, dlq }
    }

    pub async fn wait_until(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + timeout;
        while !cond() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for: {what}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

use support::*;

mod delivery {
    use super::*;

    #[tokio::test]
    async fn test_happy_path_delivers_and_commits_everything() {
        let sink = Arc::new(CollectingSink::default());
        let harness = start(
            fast_config(),
            vec![runner_config("r1", Arc::new(Identity), sink.clone())],
        )
        .await;

        let unrouted = harness.runtime.offer_event_records(records("r1", 10)).await;
        assert!(unrouted.is_empty());

        wait_until("10 records delivered and committed", Duration::from_secs(5), || {
            sink.delivered_count() == 10 && harness.offsets.committed_count() == 10
        })
        .await;

        let mut ids = sink.delivered_ids();
        ids.sort();
        let mut expected: Vec<String> = (0..10).map(|i| format!("r1-{i}")).collect();
        expected.sort();
        assert_eq!(ids, expected, "every record delivered exactly once");
        assert!(harness.dlq.is_empty());

        // Successful batches grow the windows; they must stay clamped.
        let ctx = harness.runtime.context();
        let r1 = RunnerName::new("r1");
        let transform = ctx.transform_metrics(&r1).expect("runner live");
        let push = ctx.push_metrics(&r1).expect("runner live");
        assert!(transform.cwnd >= 1 && transform.cwnd <= 1024);
        assert!(push.cwnd >= 2, "push window grew past its initial value");
        assert!(push.cwnd <= 1024);

        harness.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_sequential_feed_preserves_order() {
        let sink = Arc::new(CollectingSink::default());
        let harness = start(
            fast_config(),
            vec![runner_config("r1", Arc::new(Identity), sink.clone())],
        )
        .await;

        // Feed one record at a time so ordering is observable end to end.
        for (i, record) in records("r1", 5).into_iter().enumerate() {
            harness.runtime.offer_event_records(vec![record]).await;
            wait_until("record delivered", Duration::from_secs(5), || {
                sink.delivered_count() == i + 1
            })
            .await;
        }

        let expected: Vec<String> = (0..5).map(|i| format!("r1-{i}")).collect();
        assert_eq!(sink.delivered_ids(), expected);

        harness.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_transform_drop_commits_without_delivering() {
        let sink = Arc::new(CollectingSink::default());
        let harness = start(
            fast_config(),
            vec![runner_config("r1", Arc::new(DropEveryOther::default()), sink.clone())],
        )
        .await;

        harness.runtime.offer_event_records(records("r1", 10)).await;

        // Half the records are filtered, but a filtered record still counts
        // as definitively handled: all ten end up committed.
        wait_until("5 delivered, 10 committed", Duration::from_secs(5), || {
            sink.delivered_count() == 5 && harness.offsets.committed_count() == 10
        })
        .await;
        assert!(harness.dlq.is_empty());

        harness.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_transform_failure_is_dead_lettered_not_committed() {
        let sink = Arc::new(CollectingSink::default());
        let harness = start(
            fast_config(),
            vec![runner_config("r1", Arc::new(FailEveryOther::default()), sink.clone())],
        )
        .await;

        harness.runtime.offer_event_records(records("r1", 10)).await;

        wait_until("5 delivered, 5 dead-lettered", Duration::from_secs(5), || {
            sink.delivered_count() == 5 && harness.dlq.len() == 5
        })
        .await;

        // Only the delivered half is committed; failures stay uncommitted
        // so the source may redeliver them.
        assert_eq!(harness.offsets.committed_count(), 5);
        for entry in harness.dlq.entries() {
            assert_eq!(entry.stage, FailureStage::Transform);
            assert!(!harness.offsets.is_committed(&entry.record_id));
        }

        harness.runtime.shutdown().await;
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_sink_failure_routes_batch_to_error_handler() {
        let harness = start(
            fast_config(),
            vec![runner_config("r1", Arc::new(Identity), Arc::new(FailingSink))],
        )
        .await;

        harness.runtime.offer_event_records(records("r1", 10)).await;

        wait_until("all 10 dead-lettered", Duration::from_secs(5), || {
            harness.dlq.len() == 10
        })
        .await;

        assert_eq!(harness.offsets.committed_count(), 0, "failed batches never commit");
        for entry in harness.dlq.entries() {
            assert_eq!(entry.stage, FailureStage::Sink);
        }

        // Every batch was a congestion event: the push window has
        // collapsed to the floor by the time the traffic is gone.
        let ctx = harness.runtime.context();
        let r1 = RunnerName::new("r1");
        wait_until("push window collapsed", Duration::from_secs(5), || {
            ctx.push_metrics(&r1).map(|m| m.cwnd) == Some(1)
        })
        .await;
        let push = ctx.push_metrics(&r1).expect("runner live");
        assert_eq!(push.ssthresh, 1);

        harness.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_stuck_sink_overflow_is_dead_lettered() {
        // One executor worker with a one-slot queue and a tiny target
        // queue: a sink that never returns must surface as backpressure
        // drops or executor rejections, not as silent loss or a hang.
        let config = RuntimeConfig::from_yaml(
            r#"
transform:
  empty_wait_ms: 10
  no_engine_wait_ms: 10
push:
  empty_wait_ms: 10
queue:
  offer_timeout_ms: 20
  target_capacity: 1
executor:
  workers: 1
  queue_capacity: 1
shutdown:
  worker_join_timeout_ms: 1000
"#,
        )
        .expect("config");

        let harness = start(
            config,
            vec![runner_config("r1", Arc::new(Identity), Arc::new(StuckSink))],
        )
        .await;

        harness.runtime.offer_event_records(records("r1", 10)).await;

        wait_until("overflow reaches the error handler", Duration::from_secs(5), || {
            harness.dlq.entries().iter().any(|e| {
                e.stage == FailureStage::Queue || e.stage == FailureStage::Executor
            })
        })
        .await;
        assert_eq!(harness.offsets.committed_count(), 0);

        harness.runtime.shutdown().await;
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_update_replaces_sink_without_losing_records() {
        let first_sink = Arc::new(CollectingSink::default());
        let second_sink = Arc::new(CollectingSink::default());
        let harness = start(
            fast_config(),
            vec![runner_config("r1", Arc::new(Identity), first_sink.clone())],
        )
        .await;

        harness.runtime.offer_event_records(records("r1", 20)).await;

        // Let some traffic land on the first sink, then swap mid-stream.
        wait_until("first sink sees traffic", Duration::from_secs(5), || {
            first_sink.delivered_count() > 0
        })
        .await;
        harness
            .runtime
            .apply(RunnerEvent::Update(runner_config(
                "r1",
                Arc::new(Identity),
                second_sink.clone(),
            )))
            .await
            .expect("update");

        wait_until("all 20 delivered across sinks", Duration::from_secs(5), || {
            first_sink.delivered_count() + second_sink.delivered_count() == 20
                && harness.offsets.committed_count() == 20
        })
        .await;

        // No duplicates across the replacement.
        let mut ids = first_sink.delivered_ids();
        ids.extend(second_sink.delivered_ids());
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);

        // The replacement worker serves the new sink from here on.
        let before = second_sink.delivered_count();
        harness
            .runtime
            .offer_event_records(vec![ConnectRecord::new(
                "r1",
                "post-update",
                Bytes::from_static(b"{}"),
            )])
            .await;
        wait_until("post-update record lands on new sink", Duration::from_secs(5), || {
            second_sink.delivered_count() == before + 1
        })
        .await;
        assert_eq!(first_sink.delivered_count() + second_sink.delivered_count(), 21);

        harness.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_dead_letters_drained_records() {
        let sink = Arc::new(CollectingSink::default());
        let harness = start(
            fast_config(),
            vec![runner_config("r1", Arc::new(Identity), sink.clone())],
        )
        .await;

        harness.runtime.offer_event_records(records("r1", 20)).await;
        harness
            .runtime
            .apply(RunnerEvent::Delete(runner_config(
                "r1",
                Arc::new(Identity),
                sink.clone(),
            )))
            .await
            .expect("delete");

        // Whatever was in flight may finish; everything else must be
        // accounted for by the drain policy.
        wait_until("all 20 accounted for", Duration::from_secs(5), || {
            sink.delivered_count() + harness.dlq.len() == 20
        })
        .await;
        assert!(
            harness
                .dlq
                .entries()
                .iter()
                .all(|e| e.stage == FailureStage::Lifecycle),
            "drained records carry the lifecycle stage"
        );

        // No new sink calls begin after the delete has settled.
        let settled = sink.delivered_count();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.delivered_count(), settled);

        assert!(!harness.runtime.context().contains_runner(&RunnerName::new("r1")));

        harness.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_discard_policy_drops_silently() {
        let mut config = fast_config();
        config.shutdown.drain_policy = squall::DrainPolicy::Discard;

        let sink = Arc::new(CollectingSink::default());
        let harness = start(
            config,
            vec![runner_config("r1", Arc::new(Identity), sink.clone())],
        )
        .await;

        harness.runtime.offer_event_records(records("r1", 20)).await;
        harness
            .runtime
            .apply(RunnerEvent::Delete(runner_config(
                "r1",
                Arc::new(Identity),
                sink.clone(),
            )))
            .await
            .expect("delete");

        // Discard: nothing drained reaches the error handler.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(harness.dlq.is_empty());
        assert!(sink.delivered_count() <= 20);

        harness.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_runner_isolation() {
        let sink_a = Arc::new(CollectingSink::default());
        let sink_b = Arc::new(CollectingSink::default());
        let harness = start(
            fast_config(),
            vec![
                runner_config("alpha", Arc::new(Identity), sink_a.clone()),
                runner_config("beta", Arc::new(Identity), sink_b.clone()),
            ],
        )
        .await;

        let mut all = records("alpha", 8);
        all.extend(records("beta", 8));
        harness.runtime.offer_event_records(all).await;

        wait_until("both runners drained", Duration::from_secs(5), || {
            sink_a.delivered_count() == 8 && sink_b.delivered_count() == 8
        })
        .await;

        assert!(sink_a.delivered_ids().iter().all(|id| id.starts_with("alpha-")));
        assert!(sink_b.delivered_ids().iter().all(|id| id.starts_with("beta-")));
        assert!(harness.dlq.is_empty());

        harness.runtime.shutdown().await;
    }
}
