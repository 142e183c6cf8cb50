//! JSON representations

use serde::Serialize;
use teamsub_billing::{BillingConfig, BillingState, Team};
use time::OffsetDateTime;

#[derive(Debug, Serialize)]
pub struct TeamPresenter {
    pub id: String,
    pub team_id: String,
    pub name: Option<String>,
    pub subscribed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub subscribed_at: Option<OffsetDateTime>,
    /// Only while the team has never subscribed
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub trial_ends_at: Option<OffsetDateTime>,
    pub billing_state: BillingState,
    pub tags: Vec<&'static str>,
}

impl TeamPresenter {
    pub fn new(team: &Team, config: &BillingConfig, now: OffsetDateTime) -> Self {
        Self {
            id: team.id.to_string(),
            team_id: team.team_id.clone(),
            name: team.name.clone(),
            subscribed: team.subscribed,
            subscribed_at: team.subscribed_at,
            trial_ends_at: team.trial_ends_at(config).ok(),
            billing_state: team.billing_state(config, now),
            tags: team.tags(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RootPresenter {
    pub links: RootLinks,
}

#[derive(Debug, Serialize)]
pub struct RootLinks {
    #[serde(rename = "self")]
    pub self_link: String,
    pub subscriptions: String,
    pub teams: String,
    pub commands: String,
}

impl RootPresenter {
    pub fn new(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            links: RootLinks {
                self_link: format!("{}/api", base),
                subscriptions: format!("{}/api/subscriptions", base),
                teams: format!("{}/api/teams/{{team_id}}", base),
                commands: format!("{}/api/commands", base),
            },
        }
    }
}
