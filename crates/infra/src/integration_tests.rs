//! End-to-end tests across scheduler, coordinator and runners.
//!
//! Verifies:
//! - Dependency order survives a full cron pass
//! - Retry accounting (attempts and applied delays)
//! - Queue messages are finalized exactly once per lifecycle
//! - Single-instance jobs reject concurrent runs without consuming attempts

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use chrono::Utc;
    use serde_json::json;

    use cronq_core::{Job, JobError, JobKind, RetryConfig, RunnerConfig};
    use cronq_events::{BackendMeta, EventBus, InMemoryEventBus, InMemoryQueue, JobEnvelope, JobEvent, Queue, Worker};
    use cronq_observability::{InMemoryLogSink, InMemoryMetrics};

    use crate::jobs::coordinator::ATTEMPTS_TOTAL;
    use crate::jobs::test_support::{RecordingWorker, flaky};
    use crate::jobs::{
        CronRunner, Dispatch, ExecutionContext, FinalizeMode, JobLifecycleCoordinator, JobServices,
        QueueRunner, QueueRunnerConfig, RecordingSleeper, Scheduler,
    };

    fn services_with(config: RunnerConfig, sleeper: Arc<RecordingSleeper>) -> Arc<JobServices> {
        JobServices::builder(config).sleeper(sleeper).build()
    }

    #[test]
    fn cron_pass_runs_dependency_chain_in_order() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let services = services_with(RunnerConfig::default(), sleeper);
        let mut scheduler = Scheduler::new(services.clone());
        scheduler.add(flaky("C", 0).depends_on("A").depends_on("B")).unwrap();
        scheduler.add(flaky("B", 0).depends_on("A")).unwrap();
        scheduler.add(flaky("A", 0)).unwrap();

        let order: Vec<String> = scheduler.execution_order().unwrap().iter().map(Job::name).collect();
        assert_eq!(order, ["A", "B", "C"]);

        let report = CronRunner::new(services).run_pass(&scheduler, Utc::now()).unwrap();
        let ran: Vec<&str> = report.ran.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(ran, ["A", "B", "C"]);
        assert_eq!(report.failed(), 0);
    }

    #[test]
    fn fixed_backoff_records_one_delay_per_retry() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let config = RunnerConfig {
            retry: RetryConfig::fixed(1),
            ..RunnerConfig::default()
        };
        let services = services_with(config, sleeper.clone());
        let coordinator = JobLifecycleCoordinator::new(services);

        let mut job = flaky("fixed", 3).with_max_retries(5);
        let ctx = ExecutionContext::cron()
            .with_max_retries(5)
            .with_retry(RetryConfig::fixed(1));
        let outcome = coordinator.run(&mut job, &ctx).unwrap();

        assert_eq!(outcome.attempts(), 4);
        assert!(!outcome.is_final_failure());
        assert_eq!(outcome.delays(), vec![1, 1, 1]);
        assert_eq!(sleeper.slept_secs(), vec![1, 1, 1]);
        assert_eq!(job.attempts(), 4);
    }

    #[test]
    fn attempt_bounds_hold_for_success_and_exhaustion() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let services = JobServices::builder(RunnerConfig::default())
            .sleeper(Arc::new(RecordingSleeper::new()))
            .metrics(metrics.clone())
            .build();
        let coordinator = JobLifecycleCoordinator::new(services);

        for (k, r) in [(0, 0), (1, 1), (2, 4), (3, 3)] {
            let mut job = flaky(&format!("ok-{k}-{r}"), k);
            let outcome = coordinator
                .run(&mut job, &ExecutionContext::cron().with_max_retries(r))
                .unwrap();
            assert_eq!(outcome.attempts(), k + 1);
            assert!(!outcome.is_final_failure());
        }

        for r in [0, 2, 5] {
            let mut job = flaky(&format!("never-{r}"), u32::MAX);
            let outcome = coordinator
                .run(&mut job, &ExecutionContext::cron().with_max_retries(r))
                .unwrap();
            assert_eq!(outcome.attempts(), r + 1);
            assert!(outcome.is_final_failure());
        }

        // k + 1 per succeeding job, r + 1 per exhausted one.
        assert_eq!(metrics.counter_total(ATTEMPTS_TOTAL), 1 + 2 + 3 + 4 + 1 + 3 + 6);
    }

    #[test]
    fn queue_success_acks_exactly_once() {
        let services = services_with(RunnerConfig::default(), Arc::new(RecordingSleeper::new()));
        let coordinator = JobLifecycleCoordinator::new(services);
        let worker = Arc::new(RecordingWorker::default());

        let mut job = flaky("ack", 1);
        let ctx = ExecutionContext::queue(worker.clone()).with_max_retries(3);
        coordinator.run(&mut job, &ctx).unwrap();

        assert_eq!(worker.removals(), vec![false]);
    }

    #[test]
    fn queue_exhaustion_requeues_exactly_once() {
        let services = services_with(RunnerConfig::default(), Arc::new(RecordingSleeper::new()));
        let coordinator = JobLifecycleCoordinator::new(services);
        let worker = Arc::new(RecordingWorker::default());

        let mut job = flaky("nack", u32::MAX);
        let ctx = ExecutionContext::queue(worker.clone()).with_max_retries(2);
        let outcome = coordinator.run(&mut job, &ctx).unwrap();

        assert_eq!(outcome.attempts(), 3);
        assert!(outcome.is_requeued());
        assert_eq!(worker.removals(), vec![true]);
    }

    #[cfg(unix)]
    #[test]
    fn queue_runner_drains_backend_end_to_end() {
        let log_sink = Arc::new(InMemoryLogSink::new());
        let services = JobServices::builder(RunnerConfig::default())
            .sleeper(Arc::new(RecordingSleeper::new()))
            .log_sink(log_sink.clone())
            .build();
        let queue = InMemoryQueue::arc("default");
        queue
            .enqueue(json!({ "kind": "shell", "name": "hello", "payload": { "command": "echo hello" } }))
            .unwrap();
        queue
            .push_job(&Job::new(JobKind::Command, json!({ "program": "true" })).with_name("noop"))
            .unwrap();

        let runner = QueueRunner::new(
            services,
            queue.clone(),
            QueueRunnerConfig::new("default").with_max_jobs(2),
        );
        let stats = runner.run(&AtomicBool::new(false));

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.succeeded, 2);
        assert!(queue.is_empty("default"));
        assert_eq!(queue.reserved_count(), 0);

        let records = log_sink.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.source == "queue"));
    }

    #[cfg(unix)]
    #[test]
    fn single_attempt_mode_redispatches_until_success() {
        let services = services_with(RunnerConfig::default(), Arc::new(RecordingSleeper::new()));
        let queue = InMemoryQueue::arc("default");
        let dir = std::env::temp_dir().join(format!("cronq-redispatch-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        // Fails until the marker exists, and creates it on the first run.
        let cmd = "if [ -f marker ]; then echo done; else touch marker; exit 1; fi";
        queue
            .push_job(&Job::new(JobKind::Shell, json!({ "command": cmd, "cwd": dir.to_str().unwrap() })))
            .unwrap();

        let runner = QueueRunner::new(
            services,
            queue.clone(),
            QueueRunnerConfig::new("default").with_mode(FinalizeMode::SingleAttempt),
        );
        let Some(Dispatch::Completed(first)) = runner.run_once().unwrap() else {
            panic!("expected completion");
        };
        assert!(!first.result().is_success());
        let Some(Dispatch::Completed(second)) = runner.run_once().unwrap() else {
            panic!("expected completion");
        };
        assert!(second.result().is_success());
        assert_eq!(second.telemetry()[0].attempt, 2);
        assert!(queue.is_empty("default"));

        let stats = runner.stats();
        assert_eq!((stats.succeeded, stats.failed, stats.requeued), (1, 1, 1));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn concurrent_single_instance_run_is_rejected() {
        let services = services_with(RunnerConfig::default(), Arc::new(RecordingSleeper::new()));
        let coordinator = Arc::new(JobLifecycleCoordinator::new(services));

        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        let release_rx = Mutex::new(release_rx);
        let job = Job::closure(json!({ "blocking": true }), move |_, _| {
            let _ = started_tx.lock().unwrap().send(());
            let _ = release_rx.lock().unwrap().recv();
            Ok(None)
        })
        .with_name("exclusive")
        .single_instance(true);

        let mut first = job.clone();
        let runner = coordinator.clone();
        let handle = thread::spawn(move || runner.run(&mut first, &ExecutionContext::cron()));

        started_rx.recv().unwrap();
        let mut second = job.clone();
        let err = coordinator.run(&mut second, &ExecutionContext::cron()).unwrap_err();
        assert_eq!(err, JobError::AlreadyRunning { name: "exclusive".into() });
        assert_eq!(second.attempts(), 0);

        release_tx.send(()).unwrap();
        let outcome = handle.join().unwrap().unwrap();
        assert_eq!(outcome.attempts(), 1);

        // Lock is free again.
        let mut third = job;
        drop(release_tx);
        assert!(coordinator.run(&mut third, &ExecutionContext::cron()).is_ok());
    }

    #[test]
    fn lifecycle_events_reach_subscribers() {
        let bus = Arc::new(InMemoryEventBus::<JobEvent>::new());
        let sub = bus.subscribe();
        let config = RunnerConfig {
            events_enabled: true,
            ..RunnerConfig::default()
        };
        let services = JobServices::builder(config)
            .sleeper(Arc::new(RecordingSleeper::new()))
            .bus(bus.clone())
            .build();

        let mut scheduler = Scheduler::new(services.clone());
        scheduler
            .add(Job::new(JobKind::Event, json!({ "event": "report.ready", "data": { "rows": 3 } })).with_name("announce"))
            .unwrap();
        let report = CronRunner::new(services).run_pass(&scheduler, Utc::now()).unwrap();
        assert_eq!(report.succeeded(), 1);

        let names: Vec<String> = sub.drain().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["job.started", "report.ready", "job.succeeded"]);
    }

    #[test]
    fn envelopes_always_carry_identity() {
        let queue = InMemoryQueue::new("fallback");
        queue.enqueue(json!({ "kind": "shell", "payload": { "command": "true" } })).unwrap();
        queue
            .enqueue(json!({ "kind": "shell", "queue": "fallback", "created_at": 0 }))
            .unwrap();
        queue.push_job(&Job::new(JobKind::Shell, json!({ "command": "true" }))).unwrap();

        while let Some(envelope) = queue.watch("fallback").unwrap() {
            assert!(!envelope.id().is_empty());
            assert!(!envelope.queue().is_empty());
            assert!(envelope.created_at().timestamp() >= 0);
            assert_eq!(envelope.backend(), "memory");
        }

        let job = Job::new(JobKind::Shell, json!({ "command": "true" }));
        assert!(JobEnvelope::from_job(&job, "", BackendMeta::new("memory", "x"), Default::default()).is_err());
    }
}
