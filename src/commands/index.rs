//! Bulk index command

use crate::engine::Sitemaps;
use crate::index::IndexReport;
use crate::objects::ObjectType;

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Only this object type; all types when `None`
    pub object_type: Option<ObjectType>,
    pub subtypes: Option<Vec<String>>,
    pub force: bool,
    pub show_progress: bool,
}

pub async fn cmd_index(engine: &Sitemaps, options: IndexOptions) -> Vec<IndexReport> {
    engine
        .index_objects(
            options.object_type,
            options.subtypes.as_deref(),
            options.force,
            options.show_progress,
        )
        .await
}

pub fn print_index_reports(reports: &[IndexReport]) {
    if reports.is_empty() {
        println!("No sitemaps matched.");
        return;
    }

    println!("\n🗺️  Indexing results\n");
    for report in reports {
        let name = report.subtype.as_deref().unwrap_or("(all)");
        match &report.error {
            Some(error) => println!("  ✗ {} {}: {}", report.object_type, name, error),
            None => println!(
                "  ✓ {} {}: {} objects indexed",
                report.object_type, name, report.objects_indexed
            ),
        }
    }
}
