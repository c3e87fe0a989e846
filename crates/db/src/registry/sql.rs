use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use botforge_core::domain::bot::{BotName, BotRecord, BotState, ContainerRef, Framework, OwnerId};
use botforge_core::lifecycle::check_transition;

use super::{BotRegistry, RegistryError};
use crate::DbPool;

const RECORD_COLUMNS: &str = "id,
                owner_id,
                name,
                description,
                framework,
                container_ref,
                state,
                last_error,
                failed_from,
                generation,
                created_at,
                updated_at";

pub struct SqlBotRegistry {
    pool: DbPool,
}

impl SqlBotRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_live(
        &self,
        owner: &OwnerId,
        name: &BotName,
    ) -> Result<BotRecord, RegistryError> {
        let row = sqlx::query(&format!(
            "SELECT
                {RECORD_COLUMNS}
             FROM bots
             WHERE owner_id = ? AND name = ? AND state != 'removed'",
        ))
        .bind(&owner.0)
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => record_from_row(row),
            None => Err(RegistryError::NotFound { owner: owner.clone(), name: name.clone() }),
        }
    }
}

#[async_trait::async_trait]
impl BotRegistry for SqlBotRegistry {
    async fn get(&self, owner: &OwnerId, name: &BotName) -> Result<BotRecord, RegistryError> {
        self.fetch_live(owner, name).await
    }

    async fn list(&self, owner: &OwnerId) -> Result<Vec<BotRecord>, RegistryError> {
        let rows = sqlx::query(&format!(
            "SELECT
                {RECORD_COLUMNS}
             FROM bots
             WHERE owner_id = ? AND state != 'removed'
             ORDER BY created_at ASC, name ASC",
        ))
        .bind(&owner.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn count_active(&self, owner: &OwnerId) -> Result<u32, RegistryError> {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM bots WHERE owner_id = ? AND state != 'removed'",
        )
        .bind(&owner.0)
        .fetch_one(&self.pool)
        .await?
        .try_get::<i64, _>("count")?;

        parse_u32("count", count)
    }

    async fn create(
        &self,
        owner: &OwnerId,
        name: &BotName,
        description: &str,
        framework: Framework,
        bot_token: &SecretString,
    ) -> Result<BotRecord, RegistryError> {
        use secrecy::ExposeSecret;

        let now = Utc::now();
        let record = BotRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: owner.clone(),
            name: name.clone(),
            description: description.to_string(),
            framework,
            container_ref: None,
            state: BotState::Draft,
            last_error: None,
            failed_from: None,
            created_at: now,
            updated_at: now,
            generation: 0,
        };

        let inserted = sqlx::query(
            "INSERT INTO bots (
                id,
                owner_id,
                name,
                description,
                framework,
                bot_token,
                container_ref,
                state,
                last_error,
                failed_from,
                generation,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, NULL, ?, NULL, NULL, 0, ?, ?)",
        )
        .bind(&record.id)
        .bind(&owner.0)
        .bind(name.as_str())
        .bind(description)
        .bind(framework.as_str())
        .bind(bot_token.expose_secret())
        .bind(BotState::Draft.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(record),
            Err(error) => {
                if let sqlx::Error::Database(db_error) = &error {
                    if db_error.is_unique_violation() {
                        return Err(RegistryError::AlreadyExists {
                            owner: owner.clone(),
                            name: name.clone(),
                        });
                    }
                }
                Err(error.into())
            }
        }
    }

    async fn compare_and_transition(
        &self,
        owner: &OwnerId,
        name: &BotName,
        expected_generation: u32,
        new_state: BotState,
        last_error: Option<&str>,
    ) -> Result<BotRecord, RegistryError> {
        let current = self.fetch_live(owner, name).await?;

        if current.generation != expected_generation {
            return Err(RegistryError::Conflict {
                owner: owner.clone(),
                name: name.clone(),
                expected: expected_generation,
                current: current.generation,
            });
        }

        check_transition(current.state, new_state, current.failed_from)?;

        let now = Utc::now();
        // The generation predicate is what makes the write atomic: the
        // pre-checks above decide which error to report, the UPDATE decides
        // who wins.
        let result = if new_state == BotState::Failed {
            let message = last_error.unwrap_or("unspecified failure");
            sqlx::query(
                "UPDATE bots SET
                    state = ?,
                    last_error = ?,
                    failed_from = ?,
                    generation = generation + 1,
                    updated_at = ?
                 WHERE id = ? AND generation = ?",
            )
            .bind(new_state.as_str())
            .bind(message)
            .bind(current.state.as_str())
            .bind(now.to_rfc3339())
            .bind(&current.id)
            .bind(i64::from(expected_generation))
            .execute(&self.pool)
            .await?
        } else if new_state == BotState::Removed {
            sqlx::query(
                "UPDATE bots SET
                    state = ?,
                    last_error = NULL,
                    failed_from = NULL,
                    container_ref = NULL,
                    generation = generation + 1,
                    updated_at = ?
                 WHERE id = ? AND generation = ?",
            )
            .bind(new_state.as_str())
            .bind(now.to_rfc3339())
            .bind(&current.id)
            .bind(i64::from(expected_generation))
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                "UPDATE bots SET
                    state = ?,
                    last_error = NULL,
                    failed_from = NULL,
                    generation = generation + 1,
                    updated_at = ?
                 WHERE id = ? AND generation = ?",
            )
            .bind(new_state.as_str())
            .bind(now.to_rfc3339())
            .bind(&current.id)
            .bind(i64::from(expected_generation))
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            let latest = self.fetch_live(owner, name).await;
            let current_generation = match latest {
                Ok(record) => record.generation,
                Err(RegistryError::NotFound { .. }) => expected_generation.saturating_add(1),
                Err(other) => return Err(other),
            };
            return Err(RegistryError::Conflict {
                owner: owner.clone(),
                name: name.clone(),
                expected: expected_generation,
                current: current_generation,
            });
        }

        if new_state == BotState::Removed {
            // The row is no longer live; report the final shape directly.
            let mut removed = current;
            removed.state = BotState::Removed;
            removed.last_error = None;
            removed.failed_from = None;
            removed.container_ref = None;
            removed.generation += 1;
            removed.updated_at = now;
            return Ok(removed);
        }

        self.fetch_live(owner, name).await
    }

    async fn record_container_ref(
        &self,
        owner: &OwnerId,
        name: &BotName,
        expected_generation: u32,
        container_ref: &ContainerRef,
    ) -> Result<BotRecord, RegistryError> {
        let current = self.fetch_live(owner, name).await?;

        if current.generation != expected_generation {
            return Err(RegistryError::Conflict {
                owner: owner.clone(),
                name: name.clone(),
                expected: expected_generation,
                current: current.generation,
            });
        }

        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE bots SET
                container_ref = ?,
                generation = generation + 1,
                updated_at = ?
             WHERE id = ? AND generation = ? AND state = 'deploying' AND container_ref IS NULL",
        )
        .bind(container_ref.as_str())
        .bind(now.to_rfc3339())
        .bind(&current.id)
        .bind(i64::from(expected_generation))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either the generation moved, or the ref was already set; both
            // mean the caller's view is stale.
            let latest = self.fetch_live(owner, name).await?;
            return Err(RegistryError::Conflict {
                owner: owner.clone(),
                name: name.clone(),
                expected: expected_generation,
                current: latest.generation,
            });
        }

        self.fetch_live(owner, name).await
    }

    async fn bot_token(
        &self,
        owner: &OwnerId,
        name: &BotName,
    ) -> Result<SecretString, RegistryError> {
        let row = sqlx::query(
            "SELECT bot_token FROM bots
             WHERE owner_id = ? AND name = ? AND state != 'removed'",
        )
        .bind(&owner.0)
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(SecretString::from(row.try_get::<String, _>("bot_token")?)),
            None => Err(RegistryError::NotFound { owner: owner.clone(), name: name.clone() }),
        }
    }

    async fn list_in_states(&self, states: &[BotState]) -> Result<Vec<BotRecord>, RegistryError> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; states.len()].join(", ");
        let sql = format!(
            "SELECT
                {RECORD_COLUMNS}
             FROM bots
             WHERE state IN ({placeholders})
             ORDER BY updated_at ASC",
        );

        let mut query = sqlx::query(&sql);
        for state in states {
            query = query.bind(state.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: SqliteRow) -> Result<BotRecord, RegistryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = BotState::parse(&state_raw)
        .ok_or_else(|| RegistryError::Decode(format!("unknown bot state `{state_raw}`")))?;

    let framework_raw = row.try_get::<String, _>("framework")?;
    let framework = Framework::parse(&framework_raw)
        .ok_or_else(|| RegistryError::Decode(format!("unknown framework `{framework_raw}`")))?;

    let name_raw = row.try_get::<String, _>("name")?;
    let name = BotName::parse(&name_raw)
        .map_err(|error| RegistryError::Decode(format!("invalid stored bot name: {error}")))?;

    let failed_from = row
        .try_get::<Option<String>, _>("failed_from")?
        .map(|value| {
            BotState::parse(&value)
                .ok_or_else(|| RegistryError::Decode(format!("unknown failed_from `{value}`")))
        })
        .transpose()?;

    Ok(BotRecord {
        id: row.try_get("id")?,
        owner_id: OwnerId(row.try_get("owner_id")?),
        name,
        description: row.try_get("description")?,
        framework,
        container_ref: row.try_get::<Option<String>, _>("container_ref")?.map(ContainerRef),
        state,
        last_error: row.try_get("last_error")?,
        failed_from,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        generation: parse_u32("generation", row.try_get("generation")?)?,
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RegistryError> {
    u32::try_from(value).map_err(|_| {
        RegistryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RegistryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RegistryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
