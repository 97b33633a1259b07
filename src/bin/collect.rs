use std::path::PathBuf;
use std::process::ExitCode;

use tracing::error;

use royale_tracker::api::ApiClient;
use royale_tracker::config::Config;
use royale_tracker::logging::init_tracing;
use royale_tracker::pipeline::{RunOutcome, RunSettings, run_collection};
use royale_tracker::report::write_report;
use royale_tracker::store::Store;

const EXIT_CONFIG: u8 = 1;
const EXIT_STORE: u8 = 3;

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let mut cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Some(db) = parse_path_arg("--db") {
        cfg.db_path = db;
    }
    let report_path = parse_path_arg("--report").or_else(|| {
        has_flag("--report").then(|| cfg.report_path.clone())
    });

    let api = match ApiClient::new(&cfg.api_base_url, &cfg.api_token, cfg.retry) {
        Ok(api) => api,
        Err(err) => {
            error!(%err, "unable to build http client");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let mut store = match Store::open(&cfg.db_path) {
        Ok(store) => store,
        Err(err) => {
            error!(%err, "unable to open store");
            return ExitCode::from(EXIT_STORE);
        }
    };

    match run_collection(&RunSettings::from(&cfg), &api, &mut store) {
        Ok(RunOutcome::Completed(summary)) => {
            println!("Collection run complete");
            println!("DB: {}", cfg.db_path.display());
            println!("Player: {}", cfg.player_tag);
            println!(
                "Battles fetched/inserted/skipped: {}/{}/{}",
                summary.run.battles_fetched, summary.run.battles_inserted, summary.run.battles_skipped
            );
            println!("Clan members upserted: {}", summary.run.members_upserted);
            if let Some(path) = report_path {
                if let Err(err) = write_report(&path, &summary.report) {
                    error!(err = %format!("{err:#}"), "unable to write report");
                    return ExitCode::from(EXIT_STORE);
                }
                println!("Report: {}", path.display());
            }
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Skipped(err)) => {
            println!("Collection run skipped, store unchanged: {err}");
            ExitCode::SUCCESS
        }
        Err(err) => ExitCode::from(err.exit_code() as u8),
    }
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
            if !next.trim().is_empty() && !next.starts_with("--") {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == flag)
}
