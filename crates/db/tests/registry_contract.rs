//! Behavioral contract shared by the SQL and in-memory registries.
//!
//! Every scenario here runs against both backends so the in-memory fake used
//! by orchestrator tests cannot drift from the real store.

use std::sync::Arc;

use secrecy::SecretString;

use botforge_core::domain::bot::{BotName, BotState, ContainerRef, Framework, OwnerId};
use botforge_db::registry::{BotRegistry, InMemoryBotRegistry, RegistryError, SqlBotRegistry};
use botforge_db::{connect_with_settings, migrations};

async fn backends() -> Vec<(&'static str, Arc<dyn BotRegistry>)> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("run migrations");
    vec![
        ("sql", Arc::new(SqlBotRegistry::new(pool)) as Arc<dyn BotRegistry>),
        ("memory", Arc::new(InMemoryBotRegistry::new()) as Arc<dyn BotRegistry>),
    ]
}

fn owner(value: &str) -> OwnerId {
    OwnerId::from(value)
}

fn name(value: &str) -> BotName {
    BotName::parse(value).expect("valid name")
}

fn token() -> SecretString {
    SecretString::from("123456789:AAFakeTokenValue42")
}

async fn create(registry: &dyn BotRegistry, who: &str, bot: &str) {
    registry
        .create(&owner(who), &name(bot), "tracks my habits every day", Framework::Python, &token())
        .await
        .expect("create bot");
}

#[tokio::test]
async fn full_pipeline_walk_behaves_identically() {
    for (label, registry) in backends().await {
        create(registry.as_ref(), "alice", "tracker").await;

        let mut generation = 0;
        for step in [BotState::Generating, BotState::Building, BotState::Deploying] {
            let record = registry
                .compare_and_transition(&owner("alice"), &name("tracker"), generation, step, None)
                .await
                .unwrap_or_else(|error| panic!("{label}: transition to {step}: {error}"));
            assert_eq!(record.state, step, "{label}");
            generation = record.generation;
        }

        let record = registry
            .record_container_ref(
                &owner("alice"),
                &name("tracker"),
                generation,
                &ContainerRef("cid-1".to_string()),
            )
            .await
            .unwrap_or_else(|error| panic!("{label}: record ref: {error}"));
        generation = record.generation;

        let record = registry
            .compare_and_transition(
                &owner("alice"),
                &name("tracker"),
                generation,
                BotState::Running,
                None,
            )
            .await
            .unwrap_or_else(|error| panic!("{label}: go running: {error}"));
        assert_eq!(record.state, BotState::Running, "{label}");
        assert_eq!(record.generation, 5, "{label}");
        assert_eq!(record.container_ref, Some(ContainerRef("cid-1".to_string())), "{label}");
    }
}

#[tokio::test]
async fn unknown_bot_is_not_found() {
    for (label, registry) in backends().await {
        let error = registry
            .get(&owner("alice"), &name("ghost"))
            .await
            .expect_err("missing bot should not resolve");
        assert!(matches!(error, RegistryError::NotFound { .. }), "{label}: got {error}");
    }
}

#[tokio::test]
async fn live_names_are_unique_per_owner_not_globally() {
    for (label, registry) in backends().await {
        create(registry.as_ref(), "alice", "tracker").await;

        let duplicate = registry
            .create(
                &owner("alice"),
                &name("tracker"),
                "a second tracker bot",
                Framework::Nodejs,
                &token(),
            )
            .await
            .expect_err("same owner, same name");
        assert!(matches!(duplicate, RegistryError::AlreadyExists { .. }), "{label}");

        // A different owner is free to pick the same name.
        create(registry.as_ref(), "bob", "tracker").await;
        assert_eq!(registry.count_active(&owner("alice")).await.expect("count"), 1, "{label}");
        assert_eq!(registry.count_active(&owner("bob")).await.expect("count"), 1, "{label}");
    }
}

#[tokio::test]
async fn racing_writers_settle_on_exactly_one_winner() {
    for (label, registry) in backends().await {
        create(registry.as_ref(), "alice", "tracker").await;

        let first = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .compare_and_transition(
                        &owner("alice"),
                        &name("tracker"),
                        0,
                        BotState::Generating,
                        None,
                    )
                    .await
            })
        };
        let second = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .compare_and_transition(
                        &owner("alice"),
                        &name("tracker"),
                        0,
                        BotState::Generating,
                        None,
                    )
                    .await
            })
        };

        let outcomes = [first.await.expect("join"), second.await.expect("join")];
        let wins = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(wins, 1, "{label}: exactly one writer must win the generation race");
        let loss = outcomes.into_iter().find(Result::is_err).expect("one loser");
        assert!(
            matches!(loss, Err(RegistryError::Conflict { .. })),
            "{label}: loser must observe a conflict"
        );

        let record = registry.get(&owner("alice"), &name("tracker")).await.expect("get");
        assert_eq!(record.state, BotState::Generating, "{label}");
        assert_eq!(record.generation, 1, "{label}");
    }
}

#[tokio::test]
async fn retry_context_gates_the_reentry_edge() {
    for (label, registry) in backends().await {
        create(registry.as_ref(), "alice", "tracker").await;
        registry
            .compare_and_transition(
                &owner("alice"),
                &name("tracker"),
                0,
                BotState::Generating,
                None,
            )
            .await
            .expect("enter generating");
        registry
            .compare_and_transition(&owner("alice"), &name("tracker"), 1, BotState::Building, None)
            .await
            .expect("enter building");
        let failed = registry
            .compare_and_transition(
                &owner("alice"),
                &name("tracker"),
                2,
                BotState::Failed,
                Some("image build failed"),
            )
            .await
            .expect("fail");
        assert_eq!(failed.failed_from, Some(BotState::Building), "{label}");

        let wrong = registry
            .compare_and_transition(&owner("alice"), &name("tracker"), 3, BotState::Deploying, None)
            .await
            .expect_err("cannot resume at a different step");
        assert!(matches!(wrong, RegistryError::InvalidTransition(_)), "{label}: got {wrong}");

        let retried = registry
            .compare_and_transition(&owner("alice"), &name("tracker"), 3, BotState::Building, None)
            .await
            .unwrap_or_else(|error| panic!("{label}: retry: {error}"));
        assert_eq!(retried.state, BotState::Building, "{label}");
        assert_eq!(retried.last_error, None, "{label}");
        assert_eq!(retried.failed_from, None, "{label}");
    }
}

#[tokio::test]
async fn container_ref_requires_deploying_and_no_prior_ref() {
    for (label, registry) in backends().await {
        create(registry.as_ref(), "alice", "tracker").await;
        registry
            .compare_and_transition(
                &owner("alice"),
                &name("tracker"),
                0,
                BotState::Generating,
                None,
            )
            .await
            .expect("enter generating");

        let too_early = registry
            .record_container_ref(
                &owner("alice"),
                &name("tracker"),
                1,
                &ContainerRef("cid-early".to_string()),
            )
            .await
            .expect_err("ref outside deploying");
        assert!(matches!(too_early, RegistryError::Conflict { .. }), "{label}: got {too_early}");
    }
}

#[tokio::test]
async fn removal_is_terminal_and_frees_the_slot() {
    for (label, registry) in backends().await {
        create(registry.as_ref(), "alice", "tracker").await;
        registry
            .compare_and_transition(
                &owner("alice"),
                &name("tracker"),
                0,
                BotState::Failed,
                Some("creation abandoned"),
            )
            .await
            .expect("fail");
        registry
            .compare_and_transition(&owner("alice"), &name("tracker"), 1, BotState::Removed, None)
            .await
            .expect("remove");

        let missing = registry.get(&owner("alice"), &name("tracker")).await;
        assert!(matches!(missing, Err(RegistryError::NotFound { .. })), "{label}");
        assert_eq!(registry.count_active(&owner("alice")).await.expect("count"), 0, "{label}");

        // The freed name can be claimed again from scratch.
        create(registry.as_ref(), "alice", "tracker").await;
        let fresh = registry.get(&owner("alice"), &name("tracker")).await.expect("get");
        assert_eq!(fresh.state, BotState::Draft, "{label}");
        assert_eq!(fresh.generation, 0, "{label}");
    }
}

#[tokio::test]
async fn state_scans_cover_every_owner() {
    for (label, registry) in backends().await {
        create(registry.as_ref(), "alice", "tracker").await;
        create(registry.as_ref(), "bob", "echo").await;
        registry
            .compare_and_transition(&owner("bob"), &name("echo"), 0, BotState::Generating, None)
            .await
            .expect("advance bob");

        let drafts =
            registry.list_in_states(&[BotState::Draft]).await.expect("scan drafts");
        assert_eq!(drafts.len(), 1, "{label}");
        assert_eq!(drafts[0].owner_id, owner("alice"), "{label}");

        let in_flight = registry
            .list_in_states(&[BotState::Draft, BotState::Generating])
            .await
            .expect("scan in-flight");
        assert_eq!(in_flight.len(), 2, "{label}");
    }
}
