//! Subsonic account stored in the system keyring
//!
//! The whole account lives in one keyring secret as JSON, so a half-written
//! login can never be loaded.

use anyhow::{Context, Result, bail};
use dialoguer::{Input, Password};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use offtune::subsonic::SubsonicClient;

const KEYRING_SERVICE: &str = "offtune";
const KEYRING_ACCOUNT: &str = "subsonic-account";

/// Subsonic server login used for catalog calls and streaming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsonicCredentials {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl SubsonicCredentials {
    pub fn client(&self) -> Result<SubsonicClient> {
        SubsonicClient::new(&self.url, &self.username, &self.password)
    }
}

/// Reduce whatever the user typed to the server root the client expects
///
/// A missing scheme means https. Trailing slashes and a pasted `/rest`
/// endpoint are dropped, query and fragment are rejected.
pub fn normalize_url(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        bail!("Server URL must not be empty");
    }

    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    };
    let parsed = Url::parse(&with_scheme)
        .with_context(|| format!("'{}' is not a valid server URL", input))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("Server URL must use http or https, got {}", parsed.scheme());
    }
    if parsed.host_str().is_none() {
        bail!("Server URL '{}' has no host", input);
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        bail!("Server URL must not carry a query or fragment");
    }

    let mut root = parsed.as_str().trim_end_matches('/').to_string();
    if let Some(stripped) = root.strip_suffix("/rest") {
        root = stripped.to_string();
    }
    Ok(root)
}

/// Reads, verifies and saves the Subsonic account
pub struct AuthManager;

impl AuthManager {
    /// Return the saved account, or log in and save a new one
    ///
    /// Values missing from the command line are prompted for. Nothing is
    /// saved until the server accepts a ping with the new login.
    pub async fn authenticate(
        url: Option<String>,
        username: Option<String>,
        password: Option<String>,
        force: bool,
    ) -> Result<SubsonicCredentials> {
        if force {
            debug!("Replacing any saved offtune account");
        } else if let Ok(creds) = Self::load() {
            info!("Using saved account {} on {}", creds.username, creds.url);
            return Ok(creds);
        }

        let url = match url {
            Some(url) => url,
            None => Input::new()
                .with_prompt("Subsonic server to download from")
                .validate_with(|input: &String| normalize_url(input).map(|_| ()))
                .interact_text()
                .context("Failed to read server URL")?,
        };
        let url = normalize_url(&url)?;

        let username = match username {
            Some(username) => username,
            None => Input::new()
                .with_prompt(format!("Username on {}", url))
                .interact_text()
                .context("Failed to read username")?,
        };

        let password = match password {
            Some(password) => password,
            None => Password::new()
                .with_prompt(format!("Password for {}", username))
                .interact()
                .context("Failed to read password")?,
        };

        let creds = SubsonicCredentials {
            url,
            username,
            password,
        };

        Self::verify(&creds).await?;
        Self::store(&creds)?;

        Ok(creds)
    }

    /// Load the saved account
    pub fn load() -> Result<SubsonicCredentials> {
        let secret = Self::entry()?
            .get_password()
            .context("No offtune account in keyring")?;

        match serde_json::from_str(&secret) {
            Ok(creds) => Ok(creds),
            Err(e) => {
                warn!("Saved offtune account is unreadable: {}", e);
                bail!("Saved offtune account is unreadable, run 'offtune auth --force'")
            }
        }
    }

    /// Save the account as a single keyring secret
    pub fn store(creds: &SubsonicCredentials) -> Result<()> {
        let secret = serde_json::to_string(creds).context("Failed to encode account")?;
        Self::entry()?
            .set_password(&secret)
            .context("Failed to save account in keyring")?;

        info!("Saved account {} on {}", creds.username, creds.url);
        Ok(())
    }

    /// Ping the server with the new login before it is kept
    async fn verify(creds: &SubsonicCredentials) -> Result<()> {
        debug!("Pinging {} as {}", creds.url, creds.username);

        creds
            .client()?
            .ping()
            .await
            .with_context(|| format!("{} rejected the login for {}", creds.url, creds.username))?;

        Ok(())
    }

    fn entry() -> Result<Entry> {
        Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT).context("Failed to access keyring")
    }
}
