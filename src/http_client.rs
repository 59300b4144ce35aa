use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::{Client, Response};

const USER_AGENT: &str = concat!("scoreboard_ledger/", env!("CARGO_PKG_VERSION"));

pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build http client")
}

/// Reads a response body, refusing anything larger than `max_bytes`.
pub fn read_capped(resp: Response, max_bytes: usize) -> Result<Vec<u8>> {
    let status = resp.status();
    if !status.is_success() {
        return Err(anyhow!("http {status}"));
    }
    if let Some(len) = resp.content_length()
        && len > max_bytes as u64
    {
        return Err(anyhow!("payload of {len} bytes exceeds limit of {max_bytes}"));
    }
    let mut body = Vec::new();
    resp.take(max_bytes as u64 + 1)
        .read_to_end(&mut body)
        .context("failed reading body")?;
    if body.len() > max_bytes {
        return Err(anyhow!("payload exceeds limit of {max_bytes} bytes"));
    }
    Ok(body)
}
