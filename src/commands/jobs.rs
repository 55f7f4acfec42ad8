//! Job queue commands

use crate::engine::Sitemaps;
use crate::error::Result;
use crate::objects::ObjectType;
use crate::provider::JobRunReport;

pub async fn cmd_run_jobs(
    engine: &Sitemaps,
    object_type: Option<ObjectType>,
    subtypes: Option<&[String]>,
) -> Result<Vec<JobRunReport>> {
    engine.run_jobs(object_type, subtypes).await
}

/// Queue a full reindex; `false` when one is already pending
pub async fn cmd_schedule_reindex(
    engine: &Sitemaps,
    object_type: ObjectType,
    subtype: Option<&str>,
) -> Result<bool> {
    engine.schedule_full_reindex(object_type, subtype).await
}

pub fn print_job_reports(reports: &[JobRunReport]) {
    if reports.is_empty() {
        println!("No sitemaps to process.");
        return;
    }

    println!("\n⚙️  Job run\n");
    for report in reports {
        let name = report.subtype.as_deref().unwrap_or("(all)");
        if let Some(error) = &report.error {
            println!("  ✗ {} {}: {}", report.object_type, name, error);
        } else if report.busy {
            println!("  … {} {}: busy, skipped", report.object_type, name);
        } else {
            println!("  ✓ {} {}: {} jobs", report.object_type, name, report.jobs_run);
        }
    }
}
