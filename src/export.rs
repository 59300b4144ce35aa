use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::stats::LeaderboardRow;

const HEADER: [&str; 8] = [
    "Rank", "ID", "Player", "Matches", "Wins", "Losses", "WinRate %", "KDA",
];

pub fn export_leaderboard(path: &Path, rows: &[LeaderboardRow]) -> Result<usize> {
    let mut workbook = build_workbook(rows)?;
    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;
    Ok(rows.len())
}

/// Same workbook as [`export_leaderboard`], returned in memory for callers that
/// attach it to a message instead of writing a file.
pub fn leaderboard_workbook_bytes(rows: &[LeaderboardRow]) -> Result<Vec<u8>> {
    let mut workbook = build_workbook(rows)?;
    workbook.save_to_buffer().context("failed serializing workbook")
}

fn build_workbook(rows: &[LeaderboardRow]) -> Result<Workbook> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Leaderboard")?;
    write_header(sheet)?;
    for (idx, row) in rows.iter().enumerate() {
        write_row(sheet, idx as u32 + 1, row)?;
    }
    Ok(workbook)
}

fn write_header(sheet: &mut Worksheet) -> Result<()> {
    for (col, title) in HEADER.iter().enumerate() {
        sheet
            .write_string(0, col as u16, *title)
            .with_context(|| format!("write header cell {col}"))?;
    }
    Ok(())
}

fn write_row(sheet: &mut Worksheet, line: u32, row: &LeaderboardRow) -> Result<()> {
    let numbers = [
        (0, row.rank as f64),
        (1, row.player_id as f64),
        (3, f64::from(row.matches)),
        (4, f64::from(row.wins)),
        (5, f64::from(row.losses)),
        (6, round2(row.win_rate)),
        (7, round2(row.kda)),
    ];
    for (col, value) in numbers {
        sheet
            .write_number(line, col, value)
            .with_context(|| format!("write cell ({line},{col})"))?;
    }
    sheet
        .write_string(line, 2, &row.name)
        .with_context(|| format!("write cell ({line},2)"))?;
    Ok(())
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
