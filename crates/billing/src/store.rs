//! Team persistence
//!
//! `update` is a compare-and-swap on the `version` column: it succeeds only
//! when the stored version matches the one the caller read, and bumps it.
//! A stale write returns [`BillingError::ConcurrentModification`] so the
//! caller can reload and re-run its guards.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::account::Team;
use crate::error::{BillingError, BillingResult};

#[async_trait]
pub trait TeamStore: Send + Sync {
    async fn find_by_team_id(&self, team_id: &str) -> BillingResult<Option<Team>>;

    async fn get(&self, id: Uuid) -> BillingResult<Team>;

    /// All teams, oldest first
    async fn list(&self) -> BillingResult<Vec<Team>>;

    async fn insert(&self, team: &Team) -> BillingResult<Team>;

    /// Persist `team` if nobody else wrote it since it was read.
    /// Returns the stored record with its new version.
    async fn update(&self, team: &Team) -> BillingResult<Team>;
}

const TEAM_COLUMNS: &str = r#"
    id, team_id, name, domain, activated_user_id, created_at,
    subscribed, subscribed_at, stripe_customer_id,
    subscription_expired_at, subscription_past_due_at,
    subscription_past_due_informed_at, trial_informed_at,
    subscribe_started_at, version
"#;

/// Postgres-backed store
#[derive(Clone)]
pub struct PgTeamStore {
    pool: PgPool,
}

impl PgTeamStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled migrations
    pub async fn migrate(&self) -> BillingResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BillingError::Database(format!("Migration failed: {}", e)))
    }
}

#[async_trait]
impl TeamStore for PgTeamStore {
    async fn find_by_team_id(&self, team_id: &str) -> BillingResult<Option<Team>> {
        let team = sqlx::query_as::<_, Team>(&format!(
            "SELECT {} FROM teams WHERE team_id = $1",
            TEAM_COLUMNS
        ))
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(team)
    }

    async fn get(&self, id: Uuid) -> BillingResult<Team> {
        sqlx::query_as::<_, Team>(&format!("SELECT {} FROM teams WHERE id = $1", TEAM_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("team {}", id)))
    }

    async fn list(&self) -> BillingResult<Vec<Team>> {
        let teams = sqlx::query_as::<_, Team>(&format!(
            "SELECT {} FROM teams ORDER BY created_at ASC",
            TEAM_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(teams)
    }

    async fn insert(&self, team: &Team) -> BillingResult<Team> {
        let inserted = sqlx::query_as::<_, Team>(&format!(
            r#"
            INSERT INTO teams (
                id, team_id, name, domain, activated_user_id, created_at,
                subscribed, subscribed_at, stripe_customer_id,
                subscription_expired_at, subscription_past_due_at,
                subscription_past_due_informed_at, trial_informed_at,
                subscribe_started_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 0)
            RETURNING {}
            "#,
            TEAM_COLUMNS
        ))
        .bind(team.id)
        .bind(&team.team_id)
        .bind(&team.name)
        .bind(&team.domain)
        .bind(&team.activated_user_id)
        .bind(team.created_at)
        .bind(team.subscribed)
        .bind(team.subscribed_at)
        .bind(&team.stripe_customer_id)
        .bind(team.subscription_expired_at)
        .bind(team.subscription_past_due_at)
        .bind(team.subscription_past_due_informed_at)
        .bind(team.trial_informed_at)
        .bind(team.subscribe_started_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(team_id = %inserted.team_id, id = %inserted.id, "Created team");

        Ok(inserted)
    }

    async fn update(&self, team: &Team) -> BillingResult<Team> {
        let updated = sqlx::query_as::<_, Team>(&format!(
            r#"
            UPDATE teams
            SET name = $3,
                domain = $4,
                activated_user_id = $5,
                subscribed = $6,
                subscribed_at = $7,
                stripe_customer_id = $8,
                subscription_expired_at = $9,
                subscription_past_due_at = $10,
                subscription_past_due_informed_at = $11,
                trial_informed_at = $12,
                subscribe_started_at = $13,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            TEAM_COLUMNS
        ))
        .bind(team.id)
        .bind(team.version)
        .bind(&team.name)
        .bind(&team.domain)
        .bind(&team.activated_user_id)
        .bind(team.subscribed)
        .bind(team.subscribed_at)
        .bind(&team.stripe_customer_id)
        .bind(team.subscription_expired_at)
        .bind(team.subscription_past_due_at)
        .bind(team.subscription_past_due_informed_at)
        .bind(team.trial_informed_at)
        .bind(team.subscribe_started_at)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(team) => Ok(team),
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM teams WHERE id = $1)")
                        .bind(team.id)
                        .fetch_one(&self.pool)
                        .await?;

                if exists {
                    tracing::warn!(
                        team_id = %team.team_id,
                        expected_version = team.version,
                        "Team was modified concurrently"
                    );
                    Err(BillingError::ConcurrentModification(team.team_id.clone()))
                } else {
                    Err(BillingError::NotFound(format!("team {}", team.team_id)))
                }
            }
        }
    }
}

/// In-memory store for tests and local runs
#[derive(Clone, Default)]
pub struct InMemoryTeamStore {
    teams: Arc<RwLock<HashMap<Uuid, Team>>>,
}

impl InMemoryTeamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TeamStore for InMemoryTeamStore {
    async fn find_by_team_id(&self, team_id: &str) -> BillingResult<Option<Team>> {
        let teams = self.teams.read().await;
        Ok(teams.values().find(|t| t.team_id == team_id).cloned())
    }

    async fn get(&self, id: Uuid) -> BillingResult<Team> {
        self.teams
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("team {}", id)))
    }

    async fn list(&self) -> BillingResult<Vec<Team>> {
        let mut teams: Vec<Team> = self.teams.read().await.values().cloned().collect();
        teams.sort_by_key(|t| t.created_at);
        Ok(teams)
    }

    async fn insert(&self, team: &Team) -> BillingResult<Team> {
        let mut teams = self.teams.write().await;
        if teams
            .values()
            .any(|t| t.id == team.id || t.team_id == team.team_id)
        {
            return Err(BillingError::Database(format!(
                "team {} already exists",
                team.team_id
            )));
        }

        let mut inserted = team.clone();
        inserted.version = 0;
        teams.insert(inserted.id, inserted.clone());
        Ok(inserted)
    }

    async fn update(&self, team: &Team) -> BillingResult<Team> {
        let mut teams = self.teams.write().await;
        let stored = teams
            .get_mut(&team.id)
            .ok_or_else(|| BillingError::NotFound(format!("team {}", team.team_id)))?;

        if stored.version != team.version {
            return Err(BillingError::ConcurrentModification(team.team_id.clone()));
        }

        let mut next = team.clone();
        next.created_at = stored.created_at;
        next.team_id = stored.team_id.clone();
        next.version = stored.version + 1;
        *stored = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = InMemoryTeamStore::new();
        let team = Team::new("T1", datetime!(2024-03-01 12:00 UTC)).with_name("Team One");
        store.insert(&team).await.unwrap();

        let found = store.find_by_team_id("T1").await.unwrap().unwrap();
        assert_eq!(found.name.as_deref(), Some("Team One"));
        assert_eq!(store.get(team.id).await.unwrap().team_id, "T1");
        assert!(store.find_by_team_id("T2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_team_id_rejected() {
        let store = InMemoryTeamStore::new();
        store
            .insert(&Team::new("T1", datetime!(2024-03-01 12:00 UTC)))
            .await
            .unwrap();

        let err = store
            .insert(&Team::new("T1", datetime!(2024-03-02 12:00 UTC)))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Database(_)));
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = InMemoryTeamStore::new();
        let mut team = store
            .insert(&Team::new("T1", datetime!(2024-03-01 12:00 UTC)))
            .await
            .unwrap();

        team.trial_informed_at = Some(datetime!(2024-03-12 12:00 UTC));
        let updated = store.update(&team).await.unwrap();

        assert_eq!(updated.version, 1);
        assert_eq!(
            store.get(team.id).await.unwrap().trial_informed_at,
            team.trial_informed_at
        );
    }

    #[tokio::test]
    async fn test_stale_update_rejected() {
        let store = InMemoryTeamStore::new();
        let team = store
            .insert(&Team::new("T1", datetime!(2024-03-01 12:00 UTC)))
            .await
            .unwrap();

        let mut first = team.clone();
        first.subscribed = true;
        store.update(&first).await.unwrap();

        let mut stale = team.clone();
        stale.trial_informed_at = Some(datetime!(2024-03-12 12:00 UTC));
        let err = store.update(&stale).await.unwrap_err();
        assert!(matches!(err, BillingError::ConcurrentModification(_)));
    }

    #[tokio::test]
    async fn test_update_missing_team() {
        let store = InMemoryTeamStore::new();
        let err = store
            .update(&Team::new("T1", datetime!(2024-03-01 12:00 UTC)))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_oldest_first() {
        let store = InMemoryTeamStore::new();
        store
            .insert(&Team::new("T2", datetime!(2024-03-02 12:00 UTC)))
            .await
            .unwrap();
        store
            .insert(&Team::new("T1", datetime!(2024-03-01 12:00 UTC)))
            .await
            .unwrap();

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.team_id)
            .collect();
        assert_eq!(ids, vec!["T1", "T2"]);
    }
}
