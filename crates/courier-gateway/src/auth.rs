use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;

use courier_db::Database;
use courier_db::models::UserRow;
use courier_types::api::Claims;
use courier_types::models::{UserId, UserProfile};

use crate::error::ChatError;

/// Verifies bearer tokens issued by the identity service and resolves users.
///
/// Verified profiles are mirrored into the local `users` table so that
/// counterparts and senders can be rendered without calling back out.
#[derive(Clone)]
pub struct Authenticator {
    secret: Arc<str>,
    db: Arc<Database>,
}

impl Authenticator {
    pub fn new(secret: &str, db: Arc<Database>) -> Self {
        Self {
            secret: Arc::from(secret),
            db,
        }
    }

    /// Decode and verify a token (signature and expiry).
    pub fn verify(&self, token: &str) -> Result<Claims, ChatError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| ChatError::Authentication(e.to_string()))
    }

    /// Verify `token` and record the caller's profile.
    pub async fn authenticate(&self, token: &str) -> Result<UserProfile, ChatError> {
        let profile = self.verify(token)?.profile();

        let db = self.db.clone();
        let row = UserRow {
            id: profile.id,
            display_name: profile.display_name.clone(),
            avatar_url: profile.avatar_url.clone(),
        };
        tokio::task::spawn_blocking(move || db.upsert_user(&row)).await??;

        debug!("authenticated {} ({})", profile.display_name, profile.id);
        Ok(profile)
    }

    pub async fn lookup_user(&self, id: UserId) -> Result<Option<UserProfile>, ChatError> {
        let db = self.db.clone();
        let row = tokio::task::spawn_blocking(move || db.get_user(id)).await??;
        Ok(row.map(|r| UserProfile {
            id: r.id,
            display_name: r.display_name,
            avatar_url: r.avatar_url,
        }))
    }

    /// Mint a token for `profile`. Real tokens come from the identity service;
    /// this exists for local tooling and tests.
    pub fn issue_token(&self, profile: &UserProfile, ttl: chrono::Duration) -> anyhow::Result<String> {
        let claims = Claims {
            sub: profile.id,
            name: profile.display_name.clone(),
            avatar: profile.avatar_url.clone(),
            exp: (chrono::Utc::now() + ttl).timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        Ok(token)
    }
}
