//! Interactive configuration setup: prompts for the handful of values the
//! daemon cannot reasonably default (bind address, base runtime image,
//! identity provider JWKS URL) and writes a `config.toml`.

use std::io::{self, Write};

use anyhow::Result;

fn prompt(label: &str, default: &str) -> Result<String> {
    print!("{label} [{default}]: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();

    Ok(if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    })
}

pub async fn run() -> Result<()> {
    println!("Clowdy Daemon Configuration\n");

    let host = prompt("API bind host", "0.0.0.0")?;
    let port = prompt("API bind port", "8090")?;
    let base_image = prompt("Base runtime image tag", "clowdy-base-runtime:latest")?;
    let database_path = prompt("SQLite database path", "clowdy-daemon.sqlite3")?;
    let jwks_url = prompt("Identity provider JWKS URL (blank to disable /api/stats)", "")?;
    let max_body_mb = prompt("Gateway max request body size (MiB)", "1")?;

    let jwks_line = if jwks_url.is_empty() {
        String::new()
    } else {
        format!("jwks_url = \"{jwks_url}\"\n")
    };

    let max_body_bytes: u64 = max_body_mb.parse::<u64>().unwrap_or(1) * 1024 * 1024;

    let contents = format!(
        "[api]\nhost = \"{host}\"\nport = {port}\n\n\
         [container]\nbase_image = \"{base_image}\"\n\n\
         [database]\npath = \"{database_path}\"\n\n\
         [identity]\n{jwks_line}\n\
         [gateway]\nmax_body_size_bytes = {max_body_bytes}\n"
    );

    std::fs::write("config.toml", contents)?;
    println!("\nWrote config.toml");

    Ok(())
}
