//! Placement inspection
//!
//! Reads a course's navigation tabs and decides what, if anything, the
//! executor has to do. Each step of the plan is decided separately so that a
//! course left half-migrated resumes at the step that failed.

use log::debug;
use std::fmt;
use std::sync::Arc;

use crate::api::{CanvasApi, Course, ToolPlacement};
use crate::error::MigrationError;
use crate::migration::store::MigrationRecord;

/// Steps needed to finish migrating one course
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub course_id: u64,
    /// Visible source placement to hide
    pub hide_source: Option<ToolPlacement>,
    /// Target placement to show
    pub enable_target: Option<ToolPlacement>,
    /// Navigation position to give the target, taken from the source
    pub target_position: Option<u32>,
}

impl MigrationPlan {
    /// True when only the enable step remains, i.e. resuming a partial migration
    pub fn is_resume(&self) -> bool {
        self.hide_source.is_none() && self.enable_target.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementDecision {
    /// Target enabled and source hidden or absent
    AlreadyMigrated,
    NeedsMigration(MigrationPlan),
    /// Source not installed in the course, or installed but not in use
    SourceNotPresent,
}

impl fmt::Display for PlacementDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementDecision::AlreadyMigrated => write!(f, "already migrated"),
            PlacementDecision::SourceNotPresent => write!(f, "source tool not present"),
            PlacementDecision::NeedsMigration(plan) => match (&plan.hide_source, &plan.enable_target) {
                (Some(_), Some(_)) => write!(f, "needs migration (hide source, enable target)"),
                (Some(_), None) => write!(f, "needs migration (hide source)"),
                (None, Some(_)) => write!(f, "needs migration (enable target)"),
                (None, None) => write!(f, "needs migration (nothing to do)"),
            },
        }
    }
}

/// Decide from the two placements and the course's previous record.
///
/// A hidden source next to an inactive target normally means the source was
/// never used in the course. Only a recorded partial failure says we hid it
/// ourselves and still owe the enable step.
pub fn decide(
    course_id: u64,
    target_tool_id: u64,
    source: Option<&ToolPlacement>,
    target: Option<&ToolPlacement>,
    prior: Option<&MigrationRecord>,
) -> Result<PlacementDecision, MigrationError> {
    let source_visible = source.is_some_and(ToolPlacement::is_visible);
    let target_visible = target.is_some_and(ToolPlacement::is_visible);

    if target_visible && !source_visible {
        return Ok(PlacementDecision::AlreadyMigrated);
    }

    let resuming = prior.is_some_and(MigrationRecord::is_partial_failure);
    if !source_visible && !(source.is_some() && resuming) {
        return Ok(PlacementDecision::SourceNotPresent);
    }

    let enable_target = if target_visible {
        None
    } else {
        // Never hide the source when there is nothing to replace it with
        let placement = target.ok_or(MigrationError::TargetUnavailable {
            course_id,
            tool_id: target_tool_id,
        })?;
        Some(placement.clone())
    };

    let (hide_source, target_position) = if source_visible {
        let source = source.cloned();
        let position = source.as_ref().and_then(|s| s.position);
        (source, position)
    } else {
        (None, prior.and_then(|r| r.source_position))
    };

    Ok(PlacementDecision::NeedsMigration(MigrationPlan {
        course_id,
        hide_source,
        enable_target,
        target_position,
    }))
}

pub struct PlacementInspector {
    api: Arc<dyn CanvasApi>,
    source_tool_id: u64,
    target_tool_id: u64,
}

impl PlacementInspector {
    pub fn new(api: Arc<dyn CanvasApi>, source_tool_id: u64, target_tool_id: u64) -> Self {
        Self {
            api,
            source_tool_id,
            target_tool_id,
        }
    }

    /// Current source and target placements of a course
    pub async fn placements(
        &self,
        course_id: u64,
    ) -> Result<(Option<ToolPlacement>, Option<ToolPlacement>), MigrationError> {
        let tabs = self.api.list_course_tabs(course_id).await?;
        let placements = ToolPlacement::from_tabs(course_id, &tabs);
        debug!(
            "Course {}: {} tool placements of {} tabs",
            course_id,
            placements.len(),
            tabs.len()
        );

        Ok((
            ToolPlacement::find(&placements, self.source_tool_id).cloned(),
            ToolPlacement::find(&placements, self.target_tool_id).cloned(),
        ))
    }

    pub async fn inspect(
        &self,
        course: &Course,
        prior: Option<&MigrationRecord>,
    ) -> Result<PlacementDecision, MigrationError> {
        let (source, target) = self.placements(course.id).await?;
        decide(
            course.id,
            self.target_tool_id,
            source.as_ref(),
            target.as_ref(),
            prior,
        )
    }
}
