//! Page listing command

use crate::engine::{PageSummary, Sitemaps};
use crate::error::Result;
use crate::objects::ObjectType;

pub async fn cmd_pages(
    engine: &Sitemaps,
    object_type: ObjectType,
    subtype: Option<&str>,
) -> Result<Vec<PageSummary>> {
    engine.pages(object_type, subtype).await
}

pub fn print_pages(pages: &[PageSummary]) {
    if pages.is_empty() {
        println!("Sitemap has no entries.");
        return;
    }

    for page in pages {
        println!(
            "{:>5}  {}  {}",
            page.page,
            page.last_modified.as_deref().unwrap_or("-"),
            page.url
        );
    }
}
