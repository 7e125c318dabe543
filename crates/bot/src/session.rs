//! Login and session persistence for the Matrix client.

use std::{
    fs,
    io::IsTerminal as _,
    path::{Path, PathBuf},
};

use anyhow::{Context as _, Result, anyhow};
use matrix_sdk::{
    Client, SessionChange, SessionMeta,
    authentication::{SessionTokens, matrix::MatrixSession},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct LoginOptions {
    pub homeserver: String,
    pub username: String,
    pub password: Option<String>,
    pub store: PathBuf,
    pub session_file: PathBuf,
    pub device_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user_id: String,
    pub device_id: String,
}

impl From<&MatrixSession> for SavedSession {
    fn from(session: &MatrixSession) -> Self {
        Self {
            access_token: session.tokens.access_token.clone(),
            refresh_token: session.tokens.refresh_token.clone(),
            user_id: session.meta.user_id.to_string(),
            device_id: session.meta.device_id.to_string(),
        }
    }
}

impl SavedSession {
    /// # Errors
    ///
    /// Fails when the stored user id is not a valid Matrix user id.
    pub fn into_matrix_session(self) -> Result<MatrixSession> {
        Ok(MatrixSession {
            meta: SessionMeta {
                user_id: self.user_id.parse().context("invalid stored user_id")?,
                device_id: self.device_id.into(),
            },
            tokens: SessionTokens {
                access_token: self.access_token,
                refresh_token: self.refresh_token,
            },
        })
    }
}

/// Build a client and authenticate it, restoring the saved session when there is one.
///
/// # Errors
///
/// Any failure here is fatal for the process: the store can't be created,
/// the homeserver is unreachable, or authentication is rejected.
pub async fn connect(opts: &LoginOptions) -> Result<Client> {
    fs::create_dir_all(&opts.store)
        .with_context(|| format!("creating store directory at {}", opts.store.display()))?;

    let client = Client::builder()
        .homeserver_url(&opts.homeserver)
        .handle_refresh_tokens()
        .sqlite_store(&opts.store, None)
        .build()
        .await
        .context("building matrix client")?;

    if let Some(session) = load_session(&opts.session_file)? {
        info!(user = %session.user_id, "Restoring session");
        client
            .restore_session(session.into_matrix_session()?)
            .await
            .context("restoring session")?;
        info!("Authenticated from stored session");
        persist_token_refreshes(&client, opts.session_file.clone());
        return Ok(client);
    }

    let password = resolve_password(opts)?;
    info!(user = %opts.username, "Logging in");
    let response = client
        .matrix_auth()
        .login_username(&opts.username, &password)
        .initial_device_display_name(&opts.device_name)
        .request_refresh_token()
        .send()
        .await
        .context("login failed")?;

    let session = SavedSession {
        access_token: response.access_token.clone(),
        refresh_token: response.refresh_token.clone(),
        user_id: response.user_id.to_string(),
        device_id: response.device_id.to_string(),
    };
    save_session(&opts.session_file, &session)?;
    info!(user = %session.user_id, device = %session.device_id, "Authenticated");
    persist_token_refreshes(&client, opts.session_file.clone());
    Ok(client)
}

/// Keep the session file in step with refreshed tokens so a restart can restore
/// instead of logging in again.
fn persist_token_refreshes(client: &Client, path: PathBuf) {
    let mut changes = client.subscribe_to_session_changes();
    let client = client.clone();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(SessionChange::TokensRefreshed) => {
                    let Some(session) = client.matrix_auth().session() else {
                        continue;
                    };
                    match save_session(&path, &SavedSession::from(&session)) {
                        Ok(()) => info!(path = %path.display(), "Saved refreshed session tokens"),
                        Err(e) => warn!(error = %format!("{e:#}"), "Failed to save refreshed tokens"),
                    }
                }
                Ok(SessionChange::UnknownToken { soft_logout }) => {
                    error!(
                        soft_logout,
                        path = %path.display(),
                        "Access token rejected; remove the session file and log in again"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed session change notifications");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn resolve_password(opts: &LoginOptions) -> Result<String> {
    if let Some(p) = opts
        .password
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return Ok(p.to_owned());
    }
    if !std::io::stdin().is_terminal() {
        return Err(anyhow!(
            "No MATRIX_PASSWORD provided and no stored session. Set MATRIX_PASSWORD or mount an existing session at {}",
            opts.session_file.display()
        ));
    }
    warn!("No password provided via --password or MATRIX_PASSWORD. Prompting...");
    #[cfg(feature = "rpassword")]
    {
        rpassword::prompt_password("Matrix password:")
            .map_err(|e| anyhow!("Failed to read password: {e}"))
    }
    #[cfg(not(feature = "rpassword"))]
    {
        Err(anyhow!(
            "rpassword feature is not enabled. Cannot prompt for password."
        ))
    }
}

/// # Errors
///
/// Fails when the file exists but can't be read or isn't a saved session.
pub fn load_session(path: &Path) -> Result<Option<SavedSession>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading session file at {}", path.display()))?;
    let session = serde_json::from_str(&data).context("parsing session JSON")?;
    Ok(Some(session))
}

/// # Errors
///
/// Fails when the parent directory or the file can't be written.
pub fn save_session(path: &Path, session: &SavedSession) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(session)?;
    fs::write(path, data).with_context(|| format!("writing session file at {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_session_file_is_none() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(load_session(&tmp.path().join("session.json")).unwrap(), None);
    }

    #[test]
    fn saved_session_loads_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/session.json");
        let session = SavedSession {
            access_token: "tok".to_owned(),
            refresh_token: None,
            user_id: "@bot:example.org".to_owned(),
            device_id: "DEVICE".to_owned(),
        };
        save_session(&path, &session).unwrap();
        assert_eq!(load_session(&path).unwrap(), Some(session));
    }

    #[test]
    fn saved_and_live_sessions_convert_both_ways() {
        let saved = SavedSession {
            access_token: "tok".to_owned(),
            refresh_token: Some("refresh".to_owned()),
            user_id: "@bot:example.org".to_owned(),
            device_id: "DEVICE".to_owned(),
        };
        let live = saved.clone().into_matrix_session().unwrap();
        assert_eq!(live.meta.user_id.as_str(), "@bot:example.org");
        assert_eq!(live.meta.device_id.as_str(), "DEVICE");
        assert_eq!(SavedSession::from(&live), saved);
    }

    #[test]
    fn refreshed_tokens_overwrite_the_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session.json");
        let mut session = SavedSession {
            access_token: "old".to_owned(),
            refresh_token: Some("r1".to_owned()),
            user_id: "@bot:example.org".to_owned(),
            device_id: "DEVICE".to_owned(),
        };
        save_session(&path, &session).unwrap();
        session.access_token = "new".to_owned();
        session.refresh_token = Some("r2".to_owned());
        let refreshed = SavedSession::from(&session.into_matrix_session().unwrap());
        save_session(&path, &refreshed).unwrap();
        let loaded = load_session(&path).unwrap().unwrap();
        assert_eq!(loaded.access_token, "new");
        assert_eq!(loaded.refresh_token.as_deref(), Some("r2"));
    }

    #[test]
    fn bad_user_id_is_rejected() {
        let session = SavedSession {
            access_token: "tok".to_owned(),
            refresh_token: None,
            user_id: "not-a-user".to_owned(),
            device_id: "DEVICE".to_owned(),
        };
        assert!(session.into_matrix_session().is_err());
    }

    #[test]
    fn corrupt_session_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session.json");
        fs::write(&path, "not json").unwrap();
        assert!(load_session(&path).is_err());
    }
}
