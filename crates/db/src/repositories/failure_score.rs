use sqlx::{sqlite::SqliteRow, Row};

use underwrite_core::domain::underwriting::FailureScore;

use super::{FailureScoreRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFailureScoreRepository {
    pool: DbPool,
}

impl SqlFailureScoreRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FailureScoreRepository for SqlFailureScoreRepository {
    async fn search(
        &self,
        organisation_name: &str,
    ) -> Result<Vec<FailureScore>, RepositoryError> {
        let needle = organisation_name.trim();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT organisation_name, duns_number, failure_score, commentary, as_of
             FROM dnb_failure_scores
             WHERE instr(lower(organisation_name), lower(?)) > 0
             ORDER BY organisation_name ASC",
        )
        .bind(needle)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(score_from_row).collect()
    }

    async fn save(&self, score: FailureScore) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO dnb_failure_scores (
                organisation_name,
                duns_number,
                failure_score,
                commentary,
                as_of
             ) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(organisation_name) DO UPDATE SET
                duns_number = excluded.duns_number,
                failure_score = excluded.failure_score,
                commentary = excluded.commentary,
                as_of = excluded.as_of",
        )
        .bind(&score.organisation_name)
        .bind(&score.duns_number)
        .bind(i64::from(score.failure_score))
        .bind(&score.commentary)
        .bind(&score.as_of)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn score_from_row(row: SqliteRow) -> Result<FailureScore, RepositoryError> {
    let raw_score: i64 = row.try_get("failure_score")?;
    let failure_score = u8::try_from(raw_score)
        .ok()
        .filter(|score| (1..=100).contains(score))
        .ok_or_else(|| {
            RepositoryError::Decode(format!("failure_score out of range: {raw_score}"))
        })?;

    Ok(FailureScore {
        organisation_name: row.try_get("organisation_name")?,
        duns_number: row.try_get("duns_number")?,
        failure_score,
        commentary: row.try_get("commentary")?,
        as_of: row.try_get("as_of")?,
    })
}
