// Access token handling. The token itself is issued elsewhere; this module
// only finds it (environment, a dotfile in the home directory, or a hidden
// prompt) and hands back a client that sends it.

use std::io::IsTerminal;
use std::path::Path;

use anyhow::{Context, Result};
use dialoguer::{Confirm, Password};
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::config::ApiConfig;

pub const TOKEN_ENV_VAR: &str = "UPLOAD_ACCESS_TOKEN";

/// Build an [`ApiClient`] carrying a usable access token.
///
/// Tokens are looked up in `UPLOAD_ACCESS_TOKEN`, then in the token file.
/// If neither has one and `allow_prompt` is set on a terminal, the user is
/// asked for it and may store it for next time.
pub fn authenticated_client(config: &ApiConfig, allow_prompt: bool) -> Result<ApiClient> {
    let token = resolve_token(config, allow_prompt)?;
    let client = ApiClient::new(config, &token).context("Failed to build HTTP client")?;
    Ok(client)
}

fn resolve_token(config: &ApiConfig, allow_prompt: bool) -> Result<String> {
    if let Some(token) = non_empty(std::env::var(TOKEN_ENV_VAR).ok()) {
        debug!("using access token from {}", TOKEN_ENV_VAR);
        return Ok(token);
    }

    if let Some(token) = non_empty(load_token(&config.token_path).ok()) {
        debug!(path = %config.token_path.display(), "using stored access token");
        return Ok(token);
    }

    if !allow_prompt || !std::io::stdin().is_terminal() {
        anyhow::bail!(
            "No access token found. Set {} or store one in {}.",
            TOKEN_ENV_VAR,
            config.token_path.display()
        );
    }

    let token: String = Password::new()
        .with_prompt("OAuth access token")
        .interact()
        .context("Failed to read access token")?;
    let remember = Confirm::new()
        .with_prompt(format!("Save token to {}?", config.token_path.display()))
        .default(true)
        .interact()?;
    if remember {
        persist_token(&config.token_path, &token)?;
        info!(path = %config.token_path.display(), "access token saved");
    }
    Ok(token.trim().to_string())
}

fn non_empty(token: Option<String>) -> Option<String> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Persist a token to `path`.
pub fn persist_token(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, token.trim())
        .with_context(|| format!("Failed to write token file {}", path.display()))?;
    Ok(())
}

/// Load a token from `path`.
pub fn load_token(path: &Path) -> Result<String> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read token file {}", path.display()))?;
    Ok(data)
}
