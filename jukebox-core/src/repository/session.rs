use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::warn;

use crate::models::{AuthRole, Participant, ParticipantId};
use crate::Result;

/// Read-only view of login sessions issued by the external sign-in flow.
#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The participant owning an unexpired session token.
    pub async fn find_participant(&self, token: &str) -> Result<Option<Participant>> {
        let row = sqlx::query(
            r"
            SELECT p.id, p.global_name, p.avatar, p.role
            FROM sessions s
            JOIN participants p ON p.id = s.participant_id
            WHERE s.id = $1 AND s.expires_at > NOW()
            ",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row_to_participant(&row)).transpose()?)
    }
}

fn row_to_participant(row: &PgRow) -> std::result::Result<Participant, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let role: String = row.try_get("role")?;
    let role = role.parse().unwrap_or_else(|err: String| {
        warn!(participant_id = %id, error = %err, "Falling back to guest role");
        AuthRole::Guest
    });

    Ok(Participant::new(ParticipantId::from_string(id), row.try_get::<String, _>("global_name")?)
        .with_avatar(row.try_get("avatar")?)
        .with_role(role))
}
