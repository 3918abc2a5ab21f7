//! Identity provider credential lookup.
//!
//! Credentials for each provider come from the first source that has them:
//! configuration first, then the `oauth_apps` table. A provider with no
//! credentials anywhere is simply not offered for login.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::CredentialError;

/// Supported identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Discord,
    Google,
}

impl OAuthProvider {
    pub const ALL: [OAuthProvider; 2] = [OAuthProvider::Discord, OAuthProvider::Google];

    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Discord => "discord",
            OAuthProvider::Google => "google",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client id and secret for one provider.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub secret: String,
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// A place credentials may be configured.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Values from flags or environment
    ConfigStore(HashMap<OAuthProvider, OAuthCredentials>),
    /// Rows of the `oauth_apps` table
    DatabaseFallback(SqlitePool),
}

impl CredentialSource {
    pub async fn lookup(
        &self,
        provider: OAuthProvider,
    ) -> Result<Option<OAuthCredentials>, CredentialError> {
        match self {
            CredentialSource::ConfigStore(map) => Ok(map.get(&provider).cloned()),
            CredentialSource::DatabaseFallback(pool) => {
                let row: Option<(String, String)> = sqlx::query_as(
                    "SELECT client_id, secret FROM oauth_apps WHERE provider = ?",
                )
                .bind(provider.as_str())
                .fetch_optional(pool)
                .await?;

                Ok(row
                    .filter(|(id, secret)| !id.is_empty() && !secret.is_empty())
                    .map(|(client_id, secret)| OAuthCredentials { client_id, secret }))
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CredentialSource::ConfigStore(_) => "config",
            CredentialSource::DatabaseFallback(_) => "database",
        }
    }
}

/// Credentials for `provider` from the first source that has them.
pub async fn resolve_credentials(
    sources: &[CredentialSource],
    provider: OAuthProvider,
) -> Result<Option<OAuthCredentials>, CredentialError> {
    for source in sources {
        if let Some(credentials) = source.lookup(provider).await? {
            debug!(provider = %provider, source = source.name(), "Resolved credentials");
            return Ok(Some(credentials));
        }
    }
    Ok(None)
}

/// Providers with credentials in any source.
pub async fn configured_providers(
    sources: &[CredentialSource],
) -> Result<Vec<OAuthProvider>, CredentialError> {
    let mut providers = Vec::new();
    for provider in OAuthProvider::ALL {
        if resolve_credentials(sources, provider).await?.is_some() {
            providers.push(provider);
        }
    }
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn creds(id: &str) -> OAuthCredentials {
        OAuthCredentials {
            client_id: id.to_string(),
            secret: "hunter2".to_string(),
        }
    }

    #[tokio::test]
    async fn test_config_wins_over_database() {
        let catalog = Catalog::in_memory().await.unwrap();
        sqlx::query("INSERT INTO oauth_apps (provider, client_id, secret) VALUES (?, ?, ?), (?, ?, ?)")
            .bind("discord")
            .bind("db-discord")
            .bind("s")
            .bind("google")
            .bind("db-google")
            .bind("s")
            .execute(catalog.pool())
            .await
            .unwrap();

        let sources = vec![
            CredentialSource::ConfigStore(HashMap::from([(
                OAuthProvider::Discord,
                creds("cfg-discord"),
            )])),
            CredentialSource::DatabaseFallback(catalog.pool().clone()),
        ];

        let discord = resolve_credentials(&sources, OAuthProvider::Discord)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(discord.client_id, "cfg-discord");

        let google = resolve_credentials(&sources, OAuthProvider::Google)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(google.client_id, "db-google");
    }

    #[tokio::test]
    async fn test_configured_providers() {
        let catalog = Catalog::in_memory().await.unwrap();
        let sources = vec![
            CredentialSource::ConfigStore(HashMap::new()),
            CredentialSource::DatabaseFallback(catalog.pool().clone()),
        ];
        assert!(configured_providers(&sources).await.unwrap().is_empty());

        sqlx::query("INSERT INTO oauth_apps (provider, client_id, secret) VALUES ('google', 'id', 's')")
            .execute(catalog.pool())
            .await
            .unwrap();
        assert_eq!(
            configured_providers(&sources).await.unwrap(),
            vec![OAuthProvider::Google]
        );
    }

    #[test]
    fn test_debug_hides_secret() {
        let printed = format!("{:?}", creds("abc"));
        assert!(printed.contains("abc"));
        assert!(!printed.contains("hunter2"));
    }
}
