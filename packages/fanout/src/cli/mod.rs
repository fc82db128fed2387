pub mod listen;

use anyhow::{Context, Result};
use fanout_auth::TokenIssuer;
use std::path::Path;

use crate::config::{AuthConfig, FileConfig, load_config};

pub use listen::ListenOutcome;

/// Mint a token for `username` with the configured signing key.
pub fn token_command(config_path: &Path, username: &str) -> Result<()> {
    let token = issue_token(config_path, username)?;
    println!("{token}");
    Ok(())
}

fn issue_token(config_path: &Path, username: &str) -> Result<String> {
    if username.trim().is_empty() {
        anyhow::bail!("username must not be empty");
    }
    let file_config: FileConfig = load_config(config_path, None)
        .extract()
        .context("Failed to load configuration")?;
    let auth = AuthConfig::from_file(&file_config.auth)?;
    let issuer = TokenIssuer::new(auth.signing_key.as_bytes(), auth.token_ttl)?;
    issuer
        .issue(username)
        .with_context(|| format!("Failed to sign token for {username}"))
}

pub async fn listen_command(url: &str, token: &str) -> Result<()> {
    match listen::listen(url, token).await? {
        ListenOutcome::Closed => eprintln!("[fanout: connection closed]"),
        ListenOutcome::Interrupted => eprintln!("[fanout: disconnected]"),
    }
    Ok(())
}
