use super::*;

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["trendpulse-cli"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn parses_ingest_with_default_top() {
    let cli = Cli::try_parse_from(["trendpulse-cli", "ingest"]).expect("expected valid cli args");
    assert!(matches!(cli.command, Some(Commands::Ingest { top: 10 })));
}

#[test]
fn parses_rank_kind_and_limit() {
    let cli = Cli::try_parse_from(["trendpulse-cli", "rank", "--kind", "brands", "--limit", "5"])
        .expect("expected valid cli args");
    assert!(matches!(
        cli.command,
        Some(Commands::Rank {
            kind: EntityKind::Brand,
            limit: 5
        })
    ));
}

#[test]
fn rank_rejects_unknown_kind() {
    let result = Cli::try_parse_from(["trendpulse-cli", "rank", "--kind", "hashtag"]);
    assert!(result.is_err());
}

#[test]
fn rank_requires_kind() {
    assert!(Cli::try_parse_from(["trendpulse-cli", "rank"]).is_err());
}

#[test]
fn parses_migrate_command() {
    let cli = Cli::try_parse_from(["trendpulse-cli", "migrate"]).expect("expected valid cli args");
    assert!(matches!(cli.command, Some(Commands::Migrate)));
}

#[test]
fn parses_catalog_with_path() {
    let cli = Cli::try_parse_from(["trendpulse-cli", "catalog", "--path", "config/entities.yaml"])
        .expect("expected valid cli args");
    assert!(matches!(
        cli.command,
        Some(Commands::Catalog { path: Some(ref p) }) if p == &PathBuf::from("config/entities.yaml")
    ));
}
