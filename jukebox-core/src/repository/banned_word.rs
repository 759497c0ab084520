use sqlx::PgPool;

use crate::Result;

/// Moderated title keywords stored in the database.
#[derive(Clone)]
pub struct BannedWordRepository {
    pool: PgPool,
}

impl BannedWordRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let words = sqlx::query_scalar("SELECT word FROM banned_words ORDER BY word ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(words)
    }

    /// Returns false when the word was already present.
    pub async fn add(&self, word: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO banned_words (word) VALUES (LOWER($1)) ON CONFLICT (word) DO NOTHING",
        )
        .bind(word.trim())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove(&self, word: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM banned_words WHERE word = LOWER($1)")
            .bind(word.trim())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
