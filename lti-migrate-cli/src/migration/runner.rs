//! Run driver
//!
//! Pulls courses from an enumerator and processes them on a bounded number of
//! concurrent workers. A shutdown signal stops new courses from being started;
//! courses already in flight run to completion so no hide is left without its
//! enable.

use futures::StreamExt;
use futures::future;
use log::{debug, error, info, warn};
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use uuid::Uuid;

use crate::api::{CanvasApi, Course};
use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::migration::enumerator::CourseEnumerator;
use crate::migration::executor::MigrationExecutor;
use crate::migration::inspector::{PlacementDecision, PlacementInspector};
use crate::migration::store::{MigrationRecord, MigrationStatus, RecordStore};
use crate::migration::summary::{CourseOutcome, RunSummary};

pub struct MigrationRunner {
    api: Arc<dyn CanvasApi>,
    store: Arc<dyn RecordStore>,
    config: MigrationConfig,
    inspector: PlacementInspector,
    executor: MigrationExecutor,
    run_id: Uuid,
}

impl MigrationRunner {
    pub fn new(api: Arc<dyn CanvasApi>, store: Arc<dyn RecordStore>, config: MigrationConfig) -> Self {
        let run_id = Uuid::new_v4();
        let inspector = PlacementInspector::new(
            api.clone(),
            config.source_tool_id,
            config.target_tool_id,
        );
        let executor = MigrationExecutor::new(
            api.clone(),
            store.clone(),
            config.source_tool_id,
            config.target_tool_id,
            run_id,
        );

        Self {
            api,
            store,
            config,
            inspector,
            executor,
            run_id,
        }
    }

    /// Check the account, terms and tools before touching any course
    pub async fn preflight(&self) -> Result<(), MigrationError> {
        let account_id = self.config.account_id;
        let account = self.api.get_account(account_id).await?;
        info!("Account {}: {}", account.id, account.name);

        for &term_id in &self.config.term_ids {
            let term = self.api.get_term(account_id, term_id).await?;
            info!("Term {}: {}", term.id, term.name);
        }

        let tools = self.api.list_account_tools(account_id).await?;
        let missing: Vec<u64> = [self.config.source_tool_id, self.config.target_tool_id]
            .into_iter()
            .filter(|id| !tools.iter().any(|tool| tool.id == *id))
            .collect();
        if !missing.is_empty() {
            return Err(MigrationError::InvalidToolIds {
                account_id,
                missing,
            });
        }

        for tool in tools.iter().filter(|t| {
            t.id == self.config.source_tool_id || t.id == self.config.target_tool_id
        }) {
            info!("Tool {}: {}", tool.id, tool.name);
        }
        Ok(())
    }

    /// Process every course the enumerator yields until it is exhausted or
    /// `shutdown` resolves.
    ///
    /// An enumeration error stops dispatch, waits for in-flight courses and is
    /// then returned. Per-course errors only show up in the summary.
    pub async fn run<S>(
        &self,
        enumerator: &dyn CourseEnumerator,
        shutdown: S,
    ) -> Result<RunSummary, MigrationError>
    where
        S: Future<Output = ()>,
    {
        let started = Instant::now();
        let workers = self.config.max_workers.max(1);
        let interrupted = AtomicBool::new(false);
        info!(
            "Run {}: enumerating courses from the {} with {} workers{}",
            self.run_id,
            enumerator.source(),
            workers,
            if self.config.dry_run { " (dry run)" } else { "" }
        );

        let shutdown = async {
            shutdown.await;
            interrupted.store(true, Ordering::SeqCst);
            warn!("Interrupt received; finishing in-flight courses");
        };

        // Stop pulling courses after the first enumeration error
        let courses = enumerator
            .courses()
            .take_until(shutdown)
            .scan(false, |failed, item| {
                if *failed {
                    return future::ready(None);
                }
                *failed = item.is_err();
                future::ready(Some(item))
            });

        let mut outcomes = pin!(
            courses
                .map(|item| async move {
                    let course = item?;
                    let outcome = self.process_course(&course).await;
                    Ok::<_, MigrationError>((course, outcome))
                })
                .buffer_unordered(workers)
        );

        let mut summary = RunSummary::default();
        let mut fatal = None;
        while let Some(result) = outcomes.next().await {
            match result {
                Ok((course, outcome)) => {
                    match &outcome {
                        CourseOutcome::Failed { .. } => {
                            error!("Course {} ({}): {}", course.id, course.name, outcome)
                        }
                        _ => info!("Course {} ({}): {}", course.id, course.name, outcome),
                    }
                    summary.record(course.id, &outcome);
                }
                Err(e) => {
                    error!("Course enumeration failed: {}", e);
                    fatal.get_or_insert(e);
                }
            }
        }

        summary.interrupted = interrupted.load(Ordering::SeqCst);
        summary.elapsed = started.elapsed();

        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    async fn process_course(&self, course: &Course) -> CourseOutcome {
        let prior = match self.store.get(course.id).await {
            Ok(prior) => prior,
            Err(error) => {
                return CourseOutcome::Failed {
                    partial: false,
                    error,
                };
            }
        };

        if self.config.trust_records && prior.as_ref().is_some_and(MigrationRecord::is_done) {
            return CourseOutcome::SkippedByRecord;
        }

        let decision = match self.inspector.inspect(course, prior.as_ref()).await {
            Ok(decision) => decision,
            Err(error) => {
                if !self.config.dry_run {
                    self.record_inspection_failure(course.id, &error, prior.as_ref())
                        .await;
                }
                return CourseOutcome::Failed {
                    partial: false,
                    error,
                };
            }
        };
        debug!("Course {}: {}", course.id, decision);

        match decision {
            PlacementDecision::AlreadyMigrated => {
                self.settle(course.id, MigrationStatus::Done, CourseOutcome::AlreadyMigrated)
                    .await
            }
            PlacementDecision::SourceNotPresent => {
                self.settle(course.id, MigrationStatus::Skipped, CourseOutcome::SourceNotPresent)
                    .await
            }
            PlacementDecision::NeedsMigration(plan) if self.config.dry_run => {
                info!(
                    "[dry run] Course {}: {}, target position {:?}",
                    course.id,
                    PlacementDecision::NeedsMigration(plan.clone()),
                    plan.target_position
                );
                CourseOutcome::Planned
            }
            PlacementDecision::NeedsMigration(plan) => match self.executor.execute(&plan).await {
                Ok(()) => CourseOutcome::Migrated,
                Err(error) => {
                    // The executor knows whether the source was hidden; its record says so
                    let partial = match self.store.get(course.id).await {
                        Ok(record) => record.is_some_and(|r| r.is_partial_failure()),
                        Err(_) => error.is_partial(),
                    };
                    CourseOutcome::Failed { partial, error }
                }
            },
        }
    }

    /// Record a terminal decision that needed no changes
    async fn settle(
        &self,
        course_id: u64,
        status: MigrationStatus,
        outcome: CourseOutcome,
    ) -> CourseOutcome {
        if self.config.dry_run {
            return outcome;
        }

        let record = MigrationRecord::new(course_id, self.run_id, status);
        match self.store.put(record).await {
            Ok(()) => outcome,
            Err(error) => CourseOutcome::Failed {
                partial: false,
                error,
            },
        }
    }

    /// Keep a previous partial marker so the course can still be resumed
    async fn record_inspection_failure(
        &self,
        course_id: u64,
        error: &MigrationError,
        prior: Option<&MigrationRecord>,
    ) {
        let mut record = MigrationRecord::new(course_id, self.run_id, MigrationStatus::Failed)
            .with_detail(error.to_string());
        if let Some(prior) = prior.filter(|p| p.is_partial_failure()) {
            record.partial = true;
            record.source_position = prior.source_position;
        }

        if let Err(store_err) = self.store.put(record).await {
            warn!("Course {}: could not record failure: {}", course_id, store_err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::migration::enumerator::ApiEnumerator;
    use crate::migration::store::InMemoryRecordStore;
    use crate::migration::testing::{
        FakeCanvas, SOURCE_TOOL, TARGET_TOOL, course, home_tab, test_config, tool_tab,
    };

    fn runner(canvas: &FakeCanvas, store: Arc<dyn RecordStore>, config: MigrationConfig) -> MigrationRunner {
        MigrationRunner::new(Arc::new(canvas.clone()), store, config)
    }

    async fn run_once(
        canvas: &FakeCanvas,
        store: Arc<dyn RecordStore>,
        config: MigrationConfig,
    ) -> RunSummary {
        let enumerator = ApiEnumerator::new(Arc::new(canvas.clone()), &config);
        runner(canvas, store, config)
            .run(&enumerator, future::pending::<()>())
            .await
            .unwrap()
    }

    /// Store that refuses `failed` records, leaving whatever was there before
    #[derive(Default)]
    struct FailedRecordsRejected {
        inner: InMemoryRecordStore,
    }

    #[async_trait]
    impl RecordStore for FailedRecordsRejected {
        async fn get(&self, course_id: u64) -> Result<Option<MigrationRecord>, MigrationError> {
            self.inner.get(course_id).await
        }

        async fn put(&self, record: MigrationRecord) -> Result<(), MigrationError> {
            if record.status == MigrationStatus::Failed {
                return Err(MigrationError::RecordStore("disk full".to_string()));
            }
            self.inner.put(record).await
        }

        async fn all(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
            self.inner.all().await
        }
    }

    /// Source live in courses 1 and 2, absent from 3; target installed but hidden everywhere
    fn three_courses() -> FakeCanvas {
        let canvas = FakeCanvas::new();
        canvas.add_course(
            course(1),
            vec![home_tab(), tool_tab(SOURCE_TOOL, false, 2), tool_tab(TARGET_TOOL, true, 9)],
        );
        canvas.add_course(
            course(2),
            vec![home_tab(), tool_tab(SOURCE_TOOL, false, 4), tool_tab(TARGET_TOOL, true, 9)],
        );
        canvas.add_course(course(3), vec![home_tab(), tool_tab(TARGET_TOOL, true, 9)]);
        canvas
    }

    #[tokio::test]
    async fn test_migrates_courses_using_the_source_tool() {
        let canvas = three_courses();
        let store = Arc::new(InMemoryRecordStore::new());

        let summary = run_once(&canvas, store.clone(), test_config()).await;

        assert_eq!(summary.migrated, 2);
        assert_eq!(summary.source_not_present, 1);
        assert!(summary.is_success());
        assert_eq!(summary.exit_status(), 0);

        for id in [1, 2] {
            assert!(canvas.placement(id, SOURCE_TOOL).unwrap().hidden);
            assert!(canvas.placement(id, TARGET_TOOL).unwrap().is_visible());
            assert!(store.get(id).await.unwrap().unwrap().is_done());
        }
        assert_eq!(canvas.placement(2, TARGET_TOOL).unwrap().position, Some(4));
        assert!(!canvas.placement(3, TARGET_TOOL).unwrap().is_visible());
        assert_eq!(
            store.get(3).await.unwrap().unwrap().status,
            MigrationStatus::Skipped
        );
    }

    #[tokio::test]
    async fn test_second_run_changes_nothing() {
        let canvas = three_courses();
        let store = Arc::new(InMemoryRecordStore::new());
        run_once(&canvas, store.clone(), test_config()).await;
        canvas.clear_updates();

        let summary = run_once(&canvas, store, test_config()).await;

        assert_eq!(summary.already_migrated, 2);
        assert_eq!(summary.source_not_present, 1);
        assert!(canvas.updates().is_empty());
    }

    #[tokio::test]
    async fn test_failed_enable_is_resumed_on_next_run() {
        let canvas = three_courses();
        canvas.fail_next_update(1, TARGET_TOOL, 500);
        let store = Arc::new(InMemoryRecordStore::new());

        let first = run_once(&canvas, store.clone(), test_config()).await;
        assert_eq!(first.failed, 1);
        assert_eq!(first.partial, 1);
        assert_eq!(first.exit_status(), 1);
        assert!(store.get(1).await.unwrap().unwrap().is_partial_failure());
        assert!(canvas.placement(1, SOURCE_TOOL).unwrap().hidden);

        canvas.clear_updates();
        let second = run_once(&canvas, store.clone(), test_config()).await;

        assert!(second.is_success());
        assert_eq!(second.migrated, 1);
        let updates = canvas.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].course_id, 1);
        assert!(!updates[0].update.hidden);
        assert_eq!(updates[0].update.position, Some(2));
        assert!(store.get(1).await.unwrap().unwrap().is_done());
    }

    #[tokio::test]
    async fn test_unrecorded_failure_after_hide_is_resumed() {
        let canvas = three_courses();
        canvas.fail_next_update(1, TARGET_TOOL, 500);
        let store = Arc::new(FailedRecordsRejected::default());

        let first = run_once(&canvas, store.clone(), test_config()).await;
        assert_eq!(first.failed, 1);
        assert_eq!(first.partial, 1);
        let left = store.get(1).await.unwrap().unwrap();
        assert_eq!(left.status, MigrationStatus::Pending);
        assert!(left.is_partial_failure());
        assert_eq!(left.source_position, Some(2));
        assert!(canvas.placement(1, SOURCE_TOOL).unwrap().hidden);
        assert!(!canvas.placement(1, TARGET_TOOL).unwrap().is_visible());

        canvas.clear_updates();
        let second = run_once(&canvas, store.clone(), test_config()).await;

        assert!(second.is_success());
        assert_eq!(second.migrated, 1);
        assert_eq!(second.source_not_present, 1);
        let updates = canvas.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].course_id, 1);
        assert_eq!(updates[0].update.position, Some(2));
        assert!(canvas.placement(1, TARGET_TOOL).unwrap().is_visible());
    }

    #[tokio::test]
    async fn test_lost_hide_response_is_resumed() {
        let canvas = three_courses();
        canvas.lose_next_update_response(2, SOURCE_TOOL, 504);
        let store = Arc::new(InMemoryRecordStore::new());

        let first = run_once(&canvas, store.clone(), test_config()).await;
        assert_eq!(first.failed, 1);
        assert_eq!(first.partial, 1);
        let left = store.get(2).await.unwrap().unwrap();
        assert_eq!(left.status, MigrationStatus::Failed);
        assert!(left.is_partial_failure());
        assert!(canvas.placement(2, SOURCE_TOOL).unwrap().hidden);

        canvas.clear_updates();
        let second = run_once(&canvas, store.clone(), test_config()).await;

        assert!(second.is_success());
        assert_eq!(second.migrated, 1);
        let updates = canvas.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].course_id, 2);
        assert!(!updates[0].update.hidden);
        assert_eq!(updates[0].update.position, Some(4));
        assert!(store.get(2).await.unwrap().unwrap().is_done());
    }

    #[tokio::test]
    async fn test_trusted_records_skip_inspection() {
        let canvas = three_courses();
        let store = Arc::new(InMemoryRecordStore::new());
        run_once(&canvas, store.clone(), test_config()).await;

        let mut config = test_config();
        config.trust_records = true;
        let summary = run_once(&canvas, store, config).await;

        assert_eq!(summary.skipped_by_record, 2);
        // Course 3 was skipped, not done, so it is inspected again
        assert_eq!(summary.source_not_present, 1);
        assert_eq!(canvas.tab_reads(1), 2);
        assert_eq!(canvas.tab_reads(3), 2);
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_changes() {
        let canvas = three_courses();
        let store = Arc::new(InMemoryRecordStore::new());
        let mut config = test_config();
        config.dry_run = true;

        let summary = run_once(&canvas, store.clone(), config).await;

        assert_eq!(summary.planned, 2);
        assert!(canvas.updates().is_empty());
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_course_errors_do_not_stop_the_run() {
        let canvas = three_courses();
        canvas.fail_tab_listing(2, 401);
        let store = Arc::new(InMemoryRecordStore::new());

        let summary = run_once(&canvas, store.clone(), test_config()).await;

        assert_eq!(summary.migrated, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].0, 2);
        assert_eq!(
            store.get(2).await.unwrap().unwrap().status,
            MigrationStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_fatal() {
        let canvas = three_courses();
        canvas.fail_course_listing(401);
        let config = test_config();
        let enumerator = ApiEnumerator::new(Arc::new(canvas.clone()), &config);

        let err = runner(&canvas, Arc::new(InMemoryRecordStore::new()), config)
            .run(&enumerator, future::pending::<()>())
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::Api(_)));
        assert!(canvas.updates().is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_stops_dispatch() {
        let canvas = three_courses();
        let store = Arc::new(InMemoryRecordStore::new());
        let config = test_config();
        let enumerator = ApiEnumerator::new(Arc::new(canvas.clone()), &config);

        let summary = runner(&canvas, store, config)
            .run(&enumerator, future::ready(()))
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.total(), 0);
        assert!(canvas.updates().is_empty());
        assert_eq!(summary.exit_status(), 1);
    }

    #[tokio::test]
    async fn test_preflight_rejects_missing_tools() {
        let canvas = FakeCanvas::new().with_tools(&[SOURCE_TOOL]);
        let runner = runner(&canvas, Arc::new(InMemoryRecordStore::new()), test_config());

        let err = runner.preflight().await.unwrap_err();
        match err {
            MigrationError::InvalidToolIds {
                account_id,
                missing,
            } => {
                assert_eq!(account_id, 1);
                assert_eq!(missing, vec![TARGET_TOOL]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_preflight_accepts_installed_tools() {
        let canvas = FakeCanvas::new();
        let runner = runner(&canvas, Arc::new(InMemoryRecordStore::new()), test_config());
        runner.preflight().await.unwrap();
    }
}
