use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use scoreboard_ledger::config::{LedgerConfig, init_logging};
use scoreboard_ledger::{BatchSummary, LedgerService, OutcomeKind};

fn main() -> Result<()> {
    init_logging();

    let mut config = LedgerConfig::from_env();
    if let Some(path) = parse_db_path_arg() {
        config = config.with_db_path(path);
    }

    let (urls, files) = parse_inputs();
    if urls.is_empty() && files.is_empty() {
        return Err(anyhow!(
            "usage: ledger_ingest [--db <path>] <image url | image file>..."
        ));
    }

    let service = LedgerService::from_config(&config)?;

    if !urls.is_empty() {
        let summary = service.submit_urls(&urls);
        print_summary("urls", &urls, &summary);
    }
    if !files.is_empty() {
        let mut images = Vec::with_capacity(files.len());
        for path in &files {
            images.push(fs::read(path).with_context(|| format!("read {}", path.display()))?);
        }
        let labels = files
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>();
        let summary = service.submit_images(&images);
        print_summary("files", &labels, &summary);
    }

    Ok(())
}

fn print_summary(kind: &str, labels: &[String], summary: &BatchSummary) {
    println!(
        "Ingest ({kind}): {} recorded, {} duplicate, {} failed",
        summary.succeeded(),
        summary.duplicates(),
        summary.failed()
    );
    for item in &summary.items {
        let label = labels.get(item.index).map(String::as_str).unwrap_or("?");
        match (&item.result, item.kind()) {
            (Ok(id), _) => println!("  #{} {label}: match {id}", item.index + 1),
            (Err(_), OutcomeKind::Duplicate) => println!("  #{} {label}: duplicate", item.index + 1),
            (Err(err), _) => println!("  #{} {label}: {err}", item.index + 1),
        }
    }
}

fn parse_inputs() -> (Vec<String>, Vec<PathBuf>) {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut urls = Vec::new();
    let mut files = Vec::new();
    let mut skip_next = false;
    for arg in &args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--db" {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        if arg.starts_with("http://") || arg.starts_with("https://") {
            urls.push(arg.clone());
        } else {
            files.push(PathBuf::from(arg));
        }
    }
    (urls, files)
}

fn parse_db_path_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--db=") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == "--db"
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}
