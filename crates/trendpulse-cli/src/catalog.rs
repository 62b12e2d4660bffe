//! Catalog validation.

use std::path::Path;

use trendpulse_core::{CatalogFile, EntityKind};

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct CatalogSummary {
    pub trends: usize,
    pub brands: usize,
    pub styles: usize,
    pub aliases: usize,
}

/// Loads and validates the catalog, printing a per-kind summary.
///
/// # Errors
///
/// Returns an error if the file cannot be read or fails validation.
pub(crate) fn run_catalog(path: &Path) -> anyhow::Result<()> {
    let catalog = trendpulse_core::load_catalog(path)?;
    let summary = summarize(&catalog);
    println!(
        "{}: ok ({} trends, {} brands, {} styles, {} extra aliases)",
        path.display(),
        summary.trends,
        summary.brands,
        summary.styles,
        summary.aliases
    );
    Ok(())
}

pub(crate) fn summarize(catalog: &CatalogFile) -> CatalogSummary {
    catalog
        .entities
        .iter()
        .fold(CatalogSummary::default(), |mut summary, seed| {
            match seed.kind {
                EntityKind::Trend => summary.trends += 1,
                EntityKind::Brand => summary.brands += 1,
                EntityKind::Style => summary.styles += 1,
            }
            summary.aliases += seed.aliases.len();
            summary
        })
}
