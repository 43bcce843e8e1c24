//! End-of-run accounting

use colored::*;
use std::fmt;
use std::process::ExitCode;
use std::time::Duration;

use crate::error::MigrationError;

/// What happened to one course
#[derive(Debug)]
pub enum CourseOutcome {
    Migrated,
    AlreadyMigrated,
    SourceNotPresent,
    /// Skipped without reading Canvas because a `done` record exists
    SkippedByRecord,
    /// Dry run: migration needed but not performed
    Planned,
    Failed { partial: bool, error: MigrationError },
}

impl fmt::Display for CourseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CourseOutcome::Migrated => write!(f, "migrated"),
            CourseOutcome::AlreadyMigrated => write!(f, "already migrated"),
            CourseOutcome::SourceNotPresent => write!(f, "source tool not present"),
            CourseOutcome::SkippedByRecord => write!(f, "skipped (recorded as done)"),
            CourseOutcome::Planned => write!(f, "would migrate (dry run)"),
            CourseOutcome::Failed { partial: true, error } => write!(f, "partially migrated: {}", error),
            CourseOutcome::Failed { error, .. } => write!(f, "failed: {}", error),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub migrated: usize,
    pub already_migrated: usize,
    pub source_not_present: usize,
    pub skipped_by_record: usize,
    pub planned: usize,
    pub failed: usize,
    /// Subset of `failed` left with the source hidden and the target not enabled
    pub partial: usize,
    /// Failed courses with their error message, in completion order
    pub failures: Vec<(u64, String)>,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn record(&mut self, course_id: u64, outcome: &CourseOutcome) {
        match outcome {
            CourseOutcome::Migrated => self.migrated += 1,
            CourseOutcome::AlreadyMigrated => self.already_migrated += 1,
            CourseOutcome::SourceNotPresent => self.source_not_present += 1,
            CourseOutcome::SkippedByRecord => self.skipped_by_record += 1,
            CourseOutcome::Planned => self.planned += 1,
            CourseOutcome::Failed { partial, error } => {
                self.failed += 1;
                if *partial {
                    self.partial += 1;
                }
                self.failures.push((course_id, error.to_string()));
            }
        }
    }

    pub fn total(&self) -> usize {
        self.migrated
            + self.already_migrated
            + self.source_not_present
            + self.skipped_by_record
            + self.planned
            + self.failed
    }

    /// Every course processed without failure and the run was not interrupted
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.interrupted
    }

    /// 0 on success, 1 when a course failed or the run was interrupted
    pub fn exit_status(&self) -> u8 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    pub fn print(&self) {
        println!();
        println!("{}", "Migration summary".bold());
        println!("  {:<22} {}", "Courses processed:", self.total());
        println!("  {:<22} {}", "Migrated:", self.migrated.to_string().green());
        println!("  {:<22} {}", "Already migrated:", self.already_migrated);
        println!("  {:<22} {}", "Source not present:", self.source_not_present);
        if self.skipped_by_record > 0 {
            println!("  {:<22} {}", "Skipped by record:", self.skipped_by_record);
        }
        if self.planned > 0 {
            println!("  {:<22} {}", "Would migrate:", self.planned.to_string().cyan());
        }

        let failed = if self.failed > 0 {
            self.failed.to_string().red().bold()
        } else {
            self.failed.to_string().normal()
        };
        println!("  {:<22} {}", "Failed:", failed);
        if self.partial > 0 {
            println!(
                "  {:<22} {}",
                "  of which partial:",
                self.partial.to_string().yellow()
            );
        }
        println!("  {:<22} {:.1}s", "Elapsed:", self.elapsed.as_secs_f64());

        if !self.failures.is_empty() {
            println!();
            println!("{}", "Failed courses:".red());
            for (course_id, message) in &self.failures {
                println!("  {} {}", course_id.to_string().bold(), message.dimmed());
            }
        }

        if self.interrupted {
            println!();
            println!(
                "{}",
                "Run interrupted; rerun to process the remaining courses".yellow()
            );
        }
    }
}
