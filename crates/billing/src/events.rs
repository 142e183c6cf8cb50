//! Billing events
//!
//! State machine operations return the events they raised instead of
//! delivering them. Callers turn them into chat text with [`BillingEvent::text`].

use serde::Serialize;

use crate::account::Team;
use crate::config::BillingConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingEvent {
    TrialExpiring { remaining_days: i64 },
    Subscribed,
    Unsubscribed,
    SubscriptionExpired,
    SubscriptionPastDue,
}

impl BillingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BillingEvent::TrialExpiring { .. } => "trial_expiring",
            BillingEvent::Subscribed => "subscribed",
            BillingEvent::Unsubscribed => "unsubscribed",
            BillingEvent::SubscriptionExpired => "subscription_expired",
            BillingEvent::SubscriptionPastDue => "subscription_past_due",
        }
    }

    /// Message to post to the team
    pub fn text(&self, team: &Team, config: &BillingConfig) -> String {
        match self {
            BillingEvent::TrialExpiring { remaining_days } => {
                format!("{} {}", trial_status_text(*remaining_days), subscribe_text(team, config))
            }
            BillingEvent::Subscribed => "Your team has been subscribed.".to_string(),
            BillingEvent::Unsubscribed => format!(
                "Your team has been unsubscribed. {}",
                subscribe_text(team, config)
            ),
            BillingEvent::SubscriptionExpired => format!(
                "Your subscription has expired. {}",
                subscribe_text(team, config)
            ),
            BillingEvent::SubscriptionPastDue => format!(
                "Your subscription is past due. {}",
                update_cc_text(team, config)
            ),
        }
    }
}

impl std::fmt::Display for BillingEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub(crate) fn trial_status_text(remaining_days: i64) -> String {
    match remaining_days {
        0 => "Your trial subscription has expired.".to_string(),
        1 => "Your trial subscription expires in 1 day.".to_string(),
        n => format!("Your trial subscription expires in {} days.", n),
    }
}

pub(crate) fn subscribe_text(team: &Team, config: &BillingConfig) -> String {
    format!("Subscribe your team at {}.", config.subscribe_url(&team.team_id))
}

pub(crate) fn update_cc_text(team: &Team, config: &BillingConfig) -> String {
    format!(
        "Update your credit card info at {}.",
        config.subscribe_url(&team.team_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn setup() -> (Team, BillingConfig) {
        (
            Team::new("T1", datetime!(2024-03-01 12:00 UTC)),
            BillingConfig::default().with_root_url("https://bot.example.com"),
        )
    }

    #[test]
    fn test_trial_expiring_text() {
        let (team, config) = setup();
        assert_eq!(
            BillingEvent::TrialExpiring { remaining_days: 3 }.text(&team, &config),
            "Your trial subscription expires in 3 days. Subscribe your team at https://bot.example.com/subscribe?team_id=T1."
        );
        assert_eq!(
            BillingEvent::TrialExpiring { remaining_days: 1 }.text(&team, &config),
            "Your trial subscription expires in 1 day. Subscribe your team at https://bot.example.com/subscribe?team_id=T1."
        );
        assert_eq!(
            BillingEvent::TrialExpiring { remaining_days: 0 }.text(&team, &config),
            "Your trial subscription has expired. Subscribe your team at https://bot.example.com/subscribe?team_id=T1."
        );
    }

    #[test]
    fn test_transition_texts() {
        let (team, config) = setup();
        assert_eq!(
            BillingEvent::Subscribed.text(&team, &config),
            "Your team has been subscribed."
        );
        assert_eq!(
            BillingEvent::Unsubscribed.text(&team, &config),
            "Your team has been unsubscribed. Subscribe your team at https://bot.example.com/subscribe?team_id=T1."
        );
        assert_eq!(
            BillingEvent::SubscriptionExpired.text(&team, &config),
            "Your subscription has expired. Subscribe your team at https://bot.example.com/subscribe?team_id=T1."
        );
        assert_eq!(
            BillingEvent::SubscriptionPastDue.text(&team, &config),
            "Your subscription is past due. Update your credit card info at https://bot.example.com/subscribe?team_id=T1."
        );
    }
}
