//! Migration execution for a single course
//!
//! Hides the source placement, shows the target placement in the source's
//! navigation slot, then re-reads the tabs to confirm. The outcome is written
//! to the record store either way.
//!
//! The `pending` record written before the hide already carries the partial
//! marker, so a course whose failure never reaches the store still resumes at
//! the enable step on the next run.

use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{CanvasApi, TabUpdate};
use crate::error::MigrationError;
use crate::migration::inspector::{MigrationPlan, PlacementInspector};
use crate::migration::store::{MigrationRecord, MigrationStatus, RecordStore};

/// Error from one of the update steps, and whether the source was hidden by then
struct StepFailure {
    error: MigrationError,
    source_hidden: bool,
}

impl StepFailure {
    fn after_hide(error: MigrationError) -> Self {
        Self {
            error,
            source_hidden: true,
        }
    }
}

pub struct MigrationExecutor {
    api: Arc<dyn CanvasApi>,
    store: Arc<dyn RecordStore>,
    inspector: PlacementInspector,
    run_id: Uuid,
}

impl MigrationExecutor {
    pub fn new(
        api: Arc<dyn CanvasApi>,
        store: Arc<dyn RecordStore>,
        source_tool_id: u64,
        target_tool_id: u64,
        run_id: Uuid,
    ) -> Self {
        let inspector = PlacementInspector::new(api.clone(), source_tool_id, target_tool_id);
        Self {
            api,
            store,
            inspector,
            run_id,
        }
    }

    /// Carry out `plan` and record the result.
    ///
    /// The returned error has been recorded as a `failed` record unless the
    /// store refused it, in which case the `pending` record stands.
    pub async fn execute(&self, plan: &MigrationPlan) -> Result<(), MigrationError> {
        let course_id = plan.course_id;
        if plan.is_resume() {
            info!("Course {}: source already hidden, resuming at the enable step", course_id);
        }

        let mut pending = self.record(plan, MigrationStatus::Pending);
        pending.partial = plan.enable_target.is_some();
        self.store.put(pending).await?;

        match self.apply(plan).await {
            Ok(()) => {
                self.store
                    .put(self.record(plan, MigrationStatus::Done))
                    .await?;
                info!("Course {}: replaced tool in course navigation", course_id);
                Ok(())
            }
            Err(StepFailure {
                error,
                source_hidden,
            }) => {
                let mut failed = self
                    .record(plan, MigrationStatus::Failed)
                    .with_detail(error.to_string());
                failed.partial = source_hidden && plan.enable_target.is_some();

                if let Err(store_err) = self.store.put(failed).await {
                    warn!(
                        "Course {}: could not record failure: {}",
                        course_id, store_err
                    );
                }
                Err(error)
            }
        }
    }

    fn record(&self, plan: &MigrationPlan, status: MigrationStatus) -> MigrationRecord {
        let mut record = MigrationRecord::new(plan.course_id, self.run_id, status);
        record.source_position = plan.target_position;
        record
    }

    async fn apply(&self, plan: &MigrationPlan) -> Result<(), StepFailure> {
        let course_id = plan.course_id;

        // Without a hide step the source is already hidden (resume)
        if let Some(source) = &plan.hide_source {
            if let Err(e) = self
                .api
                .update_course_tab(course_id, &source.tab_id, &TabUpdate::hide())
                .await
            {
                let source_hidden = self.hide_landed(course_id).await;
                let error = match &plan.enable_target {
                    Some(_) if source_hidden => MigrationError::PartialMigration {
                        course_id,
                        source_position: plan.target_position,
                        source: e,
                    },
                    _ => e.into(),
                };
                return Err(StepFailure {
                    error,
                    source_hidden,
                });
            }
            info!("Course {}: hid source tab {:?}", course_id, source.label);
        }

        if let Some(target) = &plan.enable_target {
            let update = TabUpdate::show(plan.target_position);
            self.api
                .update_course_tab(course_id, &target.tab_id, &update)
                .await
                .map_err(|source| {
                    StepFailure::after_hide(MigrationError::PartialMigration {
                        course_id,
                        source_position: plan.target_position,
                        source,
                    })
                })?;
            info!(
                "Course {}: enabled target tab {:?} at position {:?}",
                course_id, target.label, plan.target_position
            );
        }

        self.verify(course_id).await.map_err(StepFailure::after_hide)
    }

    /// Whether a hide that answered with an error took effect anyway.
    ///
    /// A lost response can hide the tab without telling us. When the tabs
    /// cannot be read either, assume it did.
    async fn hide_landed(&self, course_id: u64) -> bool {
        match self.inspector.placements(course_id).await {
            Ok((source, _)) => !source.as_ref().is_some_and(|s| s.is_visible()),
            Err(e) => {
                warn!(
                    "Course {}: could not re-read tabs after a failed hide: {}",
                    course_id, e
                );
                true
            }
        }
    }

    async fn verify(&self, course_id: u64) -> Result<(), MigrationError> {
        let (source, target) = self.inspector.placements(course_id).await?;

        if source.as_ref().is_some_and(|s| s.is_visible()) {
            return Err(MigrationError::VerificationFailed {
                course_id,
                detail: "source tool is still visible".to_string(),
            });
        }
        if !target.as_ref().is_some_and(|t| t.is_visible()) {
            return Err(MigrationError::VerificationFailed {
                course_id,
                detail: "target tool is not visible".to_string(),
            });
        }
        Ok(())
    }
}
