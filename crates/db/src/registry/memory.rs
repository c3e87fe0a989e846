use chrono::Utc;
use secrecy::SecretString;
use tokio::sync::RwLock;
use uuid::Uuid;

use botforge_core::domain::bot::{BotName, BotRecord, BotState, ContainerRef, Framework, OwnerId};
use botforge_core::lifecycle::check_transition;

use super::{BotRegistry, RegistryError};

struct Entry {
    record: BotRecord,
    bot_token: SecretString,
}

/// Registry backed by a plain vector, for tests and the smoke command.
///
/// Removed rows linger as history just like in the SQL store, so name reuse
/// and quota accounting behave identically.
#[derive(Default)]
pub struct InMemoryBotRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryBotRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_live(entry: &Entry, owner: &OwnerId, name: &BotName) -> bool {
    entry.record.state != BotState::Removed
        && entry.record.owner_id == *owner
        && entry.record.name == *name
}

#[async_trait::async_trait]
impl BotRegistry for InMemoryBotRegistry {
    async fn get(&self, owner: &OwnerId, name: &BotName) -> Result<BotRecord, RegistryError> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|entry| is_live(entry, owner, name))
            .map(|entry| entry.record.clone())
            .ok_or_else(|| RegistryError::NotFound { owner: owner.clone(), name: name.clone() })
    }

    async fn list(&self, owner: &OwnerId) -> Result<Vec<BotRecord>, RegistryError> {
        let entries = self.entries.read().await;
        let mut records: Vec<BotRecord> = entries
            .iter()
            .filter(|entry| {
                entry.record.state != BotState::Removed && entry.record.owner_id == *owner
            })
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| a.name.as_str().cmp(b.name.as_str()))
        });
        Ok(records)
    }

    async fn count_active(&self, owner: &OwnerId) -> Result<u32, RegistryError> {
        let entries = self.entries.read().await;
        let count = entries
            .iter()
            .filter(|entry| {
                entry.record.state != BotState::Removed && entry.record.owner_id == *owner
            })
            .count();
        Ok(count as u32)
    }

    async fn create(
        &self,
        owner: &OwnerId,
        name: &BotName,
        description: &str,
        framework: Framework,
        bot_token: &SecretString,
    ) -> Result<BotRecord, RegistryError> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|entry| is_live(entry, owner, name)) {
            return Err(RegistryError::AlreadyExists {
                owner: owner.clone(),
                name: name.clone(),
            });
        }

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
        entries.push(Entry { record: record.clone(), bot_token: bot_token.clone() });
        Ok(record)
    }

    async fn compare_and_transition(
        &self,
        owner: &OwnerId,
        name: &BotName,
        expected_generation: u32,
        new_state: BotState,
        last_error: Option<&str>,
    ) -> Result<BotRecord, RegistryError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|entry| is_live(entry, owner, name))
            .ok_or_else(|| RegistryError::NotFound { owner: owner.clone(), name: name.clone() })?;

        if entry.record.generation != expected_generation {
            return Err(RegistryError::Conflict {
                owner: owner.clone(),
                name: name.clone(),
                expected: expected_generation,
                current: entry.record.generation,
            });
        }

        check_transition(entry.record.state, new_state, entry.record.failed_from)?;

        if new_state == BotState::Failed {
            entry.record.failed_from = Some(entry.record.state);
            entry.record.last_error =
                Some(last_error.unwrap_or("unspecified failure").to_string());
        } else {
            entry.record.failed_from = None;
            entry.record.last_error = None;
            if new_state == BotState::Removed {
                entry.record.container_ref = None;
            }
        }
        entry.record.state = new_state;
        entry.record.generation += 1;
        entry.record.updated_at = Utc::now();
        Ok(entry.record.clone())
    }

    async fn record_container_ref(
        &self,
        owner: &OwnerId,
        name: &BotName,
        expected_generation: u32,
        container_ref: &ContainerRef,
    ) -> Result<BotRecord, RegistryError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|entry| is_live(entry, owner, name))
            .ok_or_else(|| RegistryError::NotFound { owner: owner.clone(), name: name.clone() })?;

        if entry.record.generation != expected_generation
            || entry.record.state != BotState::Deploying
            || entry.record.container_ref.is_some()
        {
            return Err(RegistryError::Conflict {
                owner: owner.clone(),
                name: name.clone(),
                expected: expected_generation,
                current: entry.record.generation,
            });
        }

        entry.record.container_ref = Some(container_ref.clone());
        entry.record.generation += 1;
        entry.record.updated_at = Utc::now();
        Ok(entry.record.clone())
    }

    async fn bot_token(
        &self,
        owner: &OwnerId,
        name: &BotName,
    ) -> Result<SecretString, RegistryError> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|entry| is_live(entry, owner, name))
            .map(|entry| entry.bot_token.clone())
            .ok_or_else(|| RegistryError::NotFound { owner: owner.clone(), name: name.clone() })
    }

    async fn list_in_states(&self, states: &[BotState]) -> Result<Vec<BotRecord>, RegistryError> {
        let entries = self.entries.read().await;
        let mut records: Vec<BotRecord> = entries
            .iter()
            .filter(|entry| states.contains(&entry.record.state))
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use botforge_core::domain::bot::{BotName, BotState, Framework, OwnerId};

    use super::InMemoryBotRegistry;
    use crate::registry::{BotRegistry, RegistryError};

    fn owner() -> OwnerId {
        OwnerId::from("alice")
    }

    fn name(value: &str) -> BotName {
        BotName::parse(value).expect("valid name")
    }

    fn token() -> SecretString {
        SecretString::from("123456789:AAFakeTokenValue42")
    }

    #[tokio::test]
    async fn removed_rows_stay_behind_as_history() {
        let registry = InMemoryBotRegistry::new();
        registry
            .create(&owner(), &name("tracker"), "tracks my habits", Framework::Python, &token())
            .await
            .expect("create");
        registry
            .compare_and_transition(
                &owner(),
                &name("tracker"),
                0,
                BotState::Failed,
                Some("creation abandoned"),
            )
            .await
            .expect("fail");
        registry
            .compare_and_transition(&owner(), &name("tracker"), 1, BotState::Removed, None)
            .await
            .expect("remove");

        // Name is free again; the new record starts a fresh lifecycle.
        let fresh = registry
            .create(&owner(), &name("tracker"), "tracks my habits", Framework::Python, &token())
            .await
            .expect("recreate");
        assert_eq!(fresh.generation, 0);
        assert_eq!(fresh.state, BotState::Draft);

        let removed = registry.list_in_states(&[BotState::Removed]).await.expect("scan");
        assert_eq!(removed.len(), 1);
    }

    #[tokio::test]
    async fn conflicting_writers_see_the_current_generation() {
        let registry = InMemoryBotRegistry::new();
        registry
            .create(&owner(), &name("tracker"), "tracks my habits", Framework::Python, &token())
            .await
            .expect("create");
        registry
            .compare_and_transition(&owner(), &name("tracker"), 0, BotState::Generating, None)
            .await
            .expect("advance");

        let error = registry
            .compare_and_transition(&owner(), &name("tracker"), 0, BotState::Generating, None)
            .await
            .expect_err("stale writer");
        assert!(
            matches!(error, RegistryError::Conflict { expected: 0, current: 1, .. }),
            "got {error}"
        );
    }
}
