//! Who is on the other end of a connection.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use serde::Deserialize;

use jukebox_core::models::{AuthRole, Participant, ParticipantId};
use jukebox_core::repository::SessionRepository;

/// Cookie set by the external sign-in flow.
pub const SESSION_COOKIE: &str = "auth_session";

const MAX_NAME_CHARS: usize = 32;

/// Guest parameters, e.g. `/ws?id=abc&name=Ala`
#[derive(Debug, Default, Clone, Deserialize)]
pub struct GuestQuery {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// Everything a resolver may look at.
#[derive(Debug, Default, Clone)]
pub struct Credentials {
    pub session: Option<String>,
    pub guest: GuestQuery,
}

impl Credentials {
    pub fn from_parts(headers: &HeaderMap, guest: GuestQuery) -> Self {
        Self {
            session: session_cookie(headers),
            guest,
        }
    }
}

/// Extract the session token from the `Cookie` header.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|cookie| {
            cookie
                .trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `Ok(None)` means anonymous, which the channel refuses.
    async fn resolve(&self, credentials: &Credentials) -> jukebox_core::Result<Option<Participant>>;
}

/// Looks the session cookie up in the sessions table.
pub struct SessionIdentity {
    sessions: SessionRepository,
}

impl SessionIdentity {
    #[must_use]
    pub const fn new(sessions: SessionRepository) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl IdentityResolver for SessionIdentity {
    async fn resolve(&self, credentials: &Credentials) -> jukebox_core::Result<Option<Participant>> {
        match &credentials.session {
            Some(token) => self.sessions.find_participant(token).await,
            None => Ok(None),
        }
    }
}

/// Trusts whatever id and name the client sends.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuestIdentity;

#[async_trait]
impl IdentityResolver for GuestIdentity {
    async fn resolve(&self, credentials: &Credentials) -> jukebox_core::Result<Option<Participant>> {
        let Some(id) = credentials
            .guest
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            return Ok(None);
        };

        let name: String = credentials
            .guest
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(id)
            .chars()
            .take(MAX_NAME_CHARS)
            .collect();

        Ok(Some(
            Participant::new(ParticipantId::from(id), name).with_role(AuthRole::Guest),
        ))
    }
}
