//! Lifecycle hooks
//!
//! Run the daily / startup check for teams and deliver whatever it raises.
//! A failure for one team is logged and never stops the others.

use crate::account::Team;
use crate::events::BillingEvent;
use crate::notify::{deliver, Notifier};
use crate::subscriptions::SubscriptionService;

/// Result of checking a single team
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Checked {
        team_id: String,
        events: Vec<BillingEvent>,
    },
    Failed {
        team_id: String,
        error: String,
    },
}

impl CheckOutcome {
    pub fn team_id(&self) -> &str {
        match self {
            CheckOutcome::Checked { team_id, .. } | CheckOutcome::Failed { team_id, .. } => team_id,
        }
    }
}

async fn check_team(
    service: &SubscriptionService,
    notifier: &dyn Notifier,
    team: &Team,
) -> CheckOutcome {
    match service.check_stripe_state(team).await {
        Ok(applied) => {
            deliver(notifier, &applied.team, &applied.events, service.config()).await;
            CheckOutcome::Checked {
                team_id: team.team_id.clone(),
                events: applied.events,
            }
        }
        Err(e) => {
            tracing::error!(
                team_id = %team.team_id,
                error = %e,
                "Failed to check billing state"
            );
            CheckOutcome::Failed {
                team_id: team.team_id.clone(),
                error: e.to_string(),
            }
        }
    }
}

/// Called when a team's bot starts
pub async fn on_team_started(
    service: &SubscriptionService,
    notifier: &dyn Notifier,
    team: &Team,
) -> CheckOutcome {
    tracing::debug!(team_id = %team.team_id, "Checking billing state on start");
    check_team(service, notifier, team).await
}

/// Check every team, one at a time
pub async fn check_all(service: &SubscriptionService, notifier: &dyn Notifier) -> Vec<CheckOutcome> {
    let teams = match service.store().list().await {
        Ok(teams) => teams,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list teams for billing check");
            return Vec::new();
        }
    };

    let mut outcomes = Vec::with_capacity(teams.len());
    for team in &teams {
        outcomes.push(check_team(service, notifier, team).await);
    }
    outcomes
}

/// Summarise a check cycle in the log
pub fn log_check_results(outcomes: &[CheckOutcome]) {
    let changed = outcomes
        .iter()
        .filter(|o| matches!(o, CheckOutcome::Checked { events, .. } if !events.is_empty()))
        .count();
    let unchanged = outcomes
        .iter()
        .filter(|o| matches!(o, CheckOutcome::Checked { events, .. } if events.is_empty()))
        .count();
    let errors = outcomes
        .iter()
        .filter(|o| matches!(o, CheckOutcome::Failed { .. }))
        .count();

    tracing::info!(
        changed = changed,
        unchanged = unchanged,
        errors = errors,
        "Billing check cycle complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BillingConfig;
    use crate::gateway::mock::MockGateway;
    use crate::notify::mock::RecordingNotifier;
    use crate::store::{InMemoryTeamStore, TeamStore};
    use std::sync::Arc;
    use time::{Duration, OffsetDateTime};

    fn service(store: Arc<InMemoryTeamStore>, gateway: Arc<MockGateway>) -> SubscriptionService {
        SubscriptionService::new(
            store,
            gateway,
            BillingConfig::default().with_root_url("https://bot.example.com"),
        )
    }

    async fn insert(store: &InMemoryTeamStore, team_id: &str, age_days: i64) -> Team {
        store
            .insert(&Team::new(
                team_id,
                OffsetDateTime::now_utc() - Duration::days(age_days),
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_on_team_started_informs_expiring_trial() {
        let store = Arc::new(InMemoryTeamStore::new());
        let service = service(store.clone(), Arc::new(MockGateway::new()));
        let notifier = RecordingNotifier::new();
        let team = insert(&store, "T1", 13).await;

        let outcome = on_team_started(&service, &notifier, &team).await;

        assert!(matches!(
            outcome,
            CheckOutcome::Checked { ref events, .. } if events.len() == 1
        ));
        assert_eq!(
            notifier.texts(),
            vec!["Your trial subscription expires in 1 day. Subscribe your team at https://bot.example.com/subscribe?team_id=T1.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_check_all_isolates_failures() {
        let store = Arc::new(InMemoryTeamStore::new());
        let gateway = Arc::new(MockGateway::new());
        let service = service(store.clone(), gateway.clone());
        let notifier = RecordingNotifier::new();

        // Subscribed team whose customer lookup fails
        let mut broken = insert(&store, "T_BROKEN", 30).await;
        broken.mark_subscribed(OffsetDateTime::now_utc());
        broken.stripe_customer_id = Some("cus_missing".to_string());
        store.update(&broken).await.unwrap();

        insert(&store, "T_EXPIRING", 12).await;
        insert(&store, "T_FRESH", 1).await;

        let outcomes = check_all(&service, &notifier).await;
        log_check_results(&outcomes);

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(&outcomes[0], CheckOutcome::Failed { team_id, .. } if team_id == "T_BROKEN"));
        assert!(matches!(&outcomes[1], CheckOutcome::Checked { events, .. } if events.len() == 1));
        assert!(matches!(&outcomes[2], CheckOutcome::Checked { events, .. } if events.is_empty()));
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(notifier.sent()[0].0, "T_EXPIRING");
    }

    #[tokio::test]
    async fn test_check_all_is_idempotent() {
        let store = Arc::new(InMemoryTeamStore::new());
        let service = service(store.clone(), Arc::new(MockGateway::new()));
        let notifier = RecordingNotifier::new();
        insert(&store, "T1", 12).await;

        check_all(&service, &notifier).await;
        let second = check_all(&service, &notifier).await;

        assert!(matches!(&second[0], CheckOutcome::Checked { events, .. } if events.is_empty()));
        assert_eq!(notifier.sent().len(), 1);
    }
}
