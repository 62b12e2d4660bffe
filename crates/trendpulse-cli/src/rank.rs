//! Latest persisted ranking for one entity kind.

use trendpulse_core::{AppConfig, EntityKind};
use trendpulse_db::snapshots::RankedSnapshotRow;

/// # Errors
///
/// Returns an error if the database is not configured or the query fails.
pub(crate) async fn run_rank(
    config: &AppConfig,
    kind: EntityKind,
    limit: i64,
) -> anyhow::Result<()> {
    let pool = trendpulse_db::connect_pool_from_config(config).await?;
    let rows = trendpulse_db::top_snapshots_by_kind(&pool, kind, limit.clamp(1, 1_000)).await?;

    if rows.is_empty() {
        println!("no scored {kind}s yet");
        return Ok(());
    }

    println!("top {kind}s");
    for (index, row) in rows.iter().enumerate() {
        println!("{}", format_row(index + 1, row));
    }
    Ok(())
}

fn format_row(rank: usize, row: &RankedSnapshotRow) -> String {
    format!(
        "{rank:>3}. {:<32} score {:.3}  mentions {:>7}  computed {}",
        row.display_name,
        row.momentum_score,
        row.mention_count_total,
        row.computed_at.format("%Y-%m-%d %H:%M UTC")
    )
}
