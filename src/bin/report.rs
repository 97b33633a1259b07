use std::path::PathBuf;

use anyhow::{Context, Result};

use royale_tracker::config::ReportConfig;
use royale_tracker::logging::init_tracing;
use royale_tracker::report::{build_report, write_report};
use royale_tracker::store::Store;

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = ReportConfig::from_env().context("read report configuration")?;
    let db_path = parse_path_arg("--db").unwrap_or(cfg.db_path);
    let out_path = parse_path_arg("--out").unwrap_or(cfg.out_path);

    let store = Store::open_read_only(&db_path)
        .with_context(|| format!("open store {}", db_path.display()))?;
    let model = build_report(&store, &cfg.options)?;
    write_report(&out_path, &model)?;

    println!("Report written");
    println!("DB: {}", db_path.display());
    println!("Out: {}", out_path.display());
    println!(
        "Battles: {}  decks: {}  members: {}",
        model.summary.total,
        model.top_decks.len(),
        model.clan_activity.len()
    );
    Ok(())
}

fn parse_path_arg(flag: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&prefix) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == flag {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}
