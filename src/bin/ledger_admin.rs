use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use scoreboard_ledger::config::{LedgerConfig, init_logging};
use scoreboard_ledger::{LedgerError, LedgerService, PlayerId, SortKey};

const USAGE: &str = "usage: ledger_admin [--db <path>] <command> [args]

commands:
  leaderboard [winrate|kda]
  stats <player name | id>
  history <player id> [limit]
  players
  export <path.xlsx|-> [winrate|kda]
  season-start <YYYY-MM-DD>
  reset-season
  reset-player <name> <YYYY-MM-DD|now>
  delete-match <id> | restore-match <id>
  delete-player <id> | restore-player <id>
  rename-player <id> <new name>
  wipe-all";

fn main() -> Result<()> {
    init_logging();

    let mut config = LedgerConfig::from_env();
    let mut args = std::env::args().skip(1).collect::<Vec<_>>();
    if let Some(path) = take_db_path_arg(&mut args) {
        config = config.with_db_path(path);
    }
    let Some((command, rest)) = args.split_first() else {
        return Err(anyhow!(USAGE));
    };

    let service = LedgerService::from_config(&config)?;
    if let Err(err) = run(&service, command, rest) {
        if let LedgerError::Persistence(_) = err {
            return Err(err.into());
        }
        eprintln!("{}", err.user_message());
        std::process::exit(2);
    }
    Ok(())
}

fn run(service: &LedgerService, command: &str, rest: &[String]) -> scoreboard_ledger::Result<()> {
    let arg = |idx: usize| rest.get(idx).map(String::as_str);
    match command {
        "leaderboard" => {
            let key = sort_key(arg(0))?;
            for row in service.leaderboard(key)? {
                println!(
                    "{:>3}. {:<20} m={:<3} W{}/L{}  wr={:>6.2}%  kda={:.2}",
                    row.rank, row.name, row.matches, row.wins, row.losses, row.win_rate, row.kda
                );
            }
        }
        "stats" => {
            let target = required(arg(0), "player")?;
            let stats = match target.parse::<PlayerId>() {
                Ok(id) => service.player_stats_by_id(id)?,
                Err(_) => service.player_stats_by_name(target)?,
            };
            println!(
                "{} (#{}): {} matches, {}W/{}L, wr={:.2}%, K/D/A {}/{}/{}, kda={:.2}",
                stats.name,
                stats.player_id,
                stats.matches,
                stats.wins,
                stats.losses,
                stats.win_rate(),
                stats.kills,
                stats.deaths,
                stats.assists,
                stats.kda()
            );
        }
        "history" => {
            let id = parse_id(arg(0))?;
            let limit = arg(1).and_then(|raw| raw.parse::<usize>().ok());
            for row in service.player_history(id, limit)? {
                println!(
                    "match {} {} {} {}/{}/{} as {:?}",
                    row.match_id,
                    row.match_created_at.format("%Y-%m-%d %H:%M"),
                    row.result,
                    row.kills,
                    row.deaths,
                    row.assists,
                    row.raw_name
                );
            }
        }
        "players" => {
            for p in service.list_players()? {
                println!("{:>4}  {}", p.id, p.name);
            }
        }
        "export" => {
            let target = required(arg(0), "output path")?;
            let key = sort_key(arg(1))?;
            if target == "-" {
                let bytes = service.leaderboard_workbook(key)?;
                std::io::stdout()
                    .lock()
                    .write_all(&bytes)
                    .context("write workbook to stdout")?;
            } else {
                let path = PathBuf::from(target);
                let written = service.export_leaderboard(&path, key)?;
                println!("Wrote {written} rows to {}", path.display());
            }
        }
        "season-start" => {
            let date = service.set_season_start(required(arg(0), "date")?)?;
            println!("Season starts {}", date.format("%Y-%m-%d"));
        }
        "reset-season" => {
            let date = service.reset_season_now()?;
            println!("Season reset at {}", date.to_rfc3339());
        }
        "reset-player" => {
            let name = required(arg(0), "player name")?;
            let date = service.reset_player(name, required(arg(1), "date")?)?;
            println!("Stats for {name} count from {}", date.to_rfc3339());
        }
        "delete-match" => {
            let id = parse_id(arg(0))?;
            service.delete_match(id)?;
            println!("Match {id} deleted");
        }
        "restore-match" => {
            let id = parse_id(arg(0))?;
            service.restore_match(id)?;
            println!("Match {id} restored");
        }
        "delete-player" => {
            let player = service.delete_player(parse_id(arg(0))?)?;
            println!("Player {} deleted", player.name);
        }
        "restore-player" => {
            let player = service.restore_player(parse_id(arg(0))?)?;
            println!("Player {} restored", player.name);
        }
        "rename-player" => {
            let id = parse_id(arg(0))?;
            let name = rest.get(1..).map(|parts| parts.join(" ")).unwrap_or_default();
            let player = service.rename_player(id, &name)?;
            println!("Player {id} is now {}", player.name);
        }
        "wipe-all" => {
            service.wipe_all()?;
            println!("All data wiped");
        }
        other => {
            return Err(LedgerError::validation(format!("unknown command {other:?}\n{USAGE}")));
        }
    }
    Ok(())
}

fn required<'a>(value: Option<&'a str>, what: &str) -> scoreboard_ledger::Result<&'a str> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| LedgerError::validation(format!("missing {what}")))
}

fn parse_id(value: Option<&str>) -> scoreboard_ledger::Result<i64> {
    let raw = required(value, "id")?;
    raw.trim()
        .parse::<i64>()
        .map_err(|_| LedgerError::validation(format!("invalid id {raw:?}")))
}

fn sort_key(value: Option<&str>) -> scoreboard_ledger::Result<SortKey> {
    match value {
        None => Ok(SortKey::default()),
        Some(raw) => raw.parse::<SortKey>().map_err(LedgerError::validation),
    }
}

fn take_db_path_arg(args: &mut Vec<String>) -> Option<PathBuf> {
    let idx = args
        .iter()
        .position(|arg| arg == "--db" || arg.starts_with("--db="))?;
    let arg = args.remove(idx);
    let path = match arg.strip_prefix("--db=") {
        Some(path) => path.to_string(),
        None if idx < args.len() => args.remove(idx),
        None => return None,
    };
    let trimmed = path.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}
