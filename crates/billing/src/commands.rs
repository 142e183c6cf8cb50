//! Chat commands: `subscription` and `unsubscribe [<id>]`

use crate::account::Team;
use crate::error::BillingResult;
use crate::events::BillingEvent;
use crate::render::format_amount;
use crate::subscriptions::SubscriptionService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Subscription,
    Unsubscribe { subscription_id: Option<String> },
}

impl ChatCommand {
    /// Parse a message addressed to the bot. Unknown commands yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut words = text.split_whitespace();
        let command = words.next()?.to_lowercase();
        match command.as_str() {
            "subscription" => Some(ChatCommand::Subscription),
            "unsubscribe" => Some(ChatCommand::Unsubscribe {
                subscription_id: words.next().map(str::to_string),
            }),
            _ => None,
        }
    }
}

/// Text to post back, plus any events raised along the way
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub text: String,
    pub events: Vec<BillingEvent>,
}

impl CommandReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            events: Vec::new(),
        }
    }
}

fn is_admin(team: &Team, user_id: &str) -> bool {
    team.activated_user_id.as_deref() == Some(user_id)
}

pub async fn run(
    service: &SubscriptionService,
    team: &Team,
    user_id: &str,
    command: ChatCommand,
) -> BillingResult<CommandReply> {
    match command {
        ChatCommand::Subscription => subscription(service, team, user_id)
            .await
            .map(CommandReply::text),
        ChatCommand::Unsubscribe { subscription_id } => {
            unsubscribe(service, team, user_id, subscription_id.as_deref()).await
        }
    }
}

/// Anyone may ask; only the admin sees invoices and cards
pub async fn subscription(
    service: &SubscriptionService,
    team: &Team,
    user_id: &str,
) -> BillingResult<String> {
    let include_admin_info = is_admin(team, user_id);
    let text = service.subscription_text(team, include_admin_info).await?;
    tracing::info!(
        team_id = %team.team_id,
        user_id = %user_id,
        "SUBSCRIPTION"
    );
    Ok(text)
}

/// Cancel auto-renew once the admin echoes the subscription id back
pub async fn unsubscribe(
    service: &SubscriptionService,
    team: &Team,
    user_id: &str,
    subscription_id: Option<&str>,
) -> BillingResult<CommandReply> {
    if !is_admin(team, user_id) {
        tracing::info!(
            team_id = %team.team_id,
            user_id = %user_id,
            "UNSUBSCRIBE: failed, not admin"
        );
        let text = match &team.activated_user_id {
            Some(admin) => format!("Sorry, only <@{}> can do that.", admin),
            None => "Sorry, only the team admin can do that.".to_string(),
        };
        return Ok(CommandReply::text(text));
    }

    let Some(active) = service.active_subscription(team).await? else {
        tracing::info!(
            team_id = %team.team_id,
            user_id = %user_id,
            "UNSUBSCRIBE: failed, no subscription"
        );
        return Ok(CommandReply::text(
            "You don't have a paid subscription, all set.",
        ));
    };

    let reply = match subscription_id {
        Some(id) if id == active.id => {
            let applied = service.unsubscribe(team).await?;
            tracing::info!(
                team_id = %team.team_id,
                user_id = %user_id,
                subscription_id = %id,
                "UNSUBSCRIBE: canceled"
            );
            CommandReply {
                text: format!(
                    "Successfully canceled auto-renew for {} ({}).",
                    applied.value.plan_name,
                    format_amount(applied.value.plan_amount_cents)
                ),
                events: applied.events,
            }
        }
        Some(id) => CommandReply::text(format!(
            "Sorry, I cannot find a subscription with \"{}\".",
            id
        )),
        None => CommandReply::text(format!("Send \"unsubscribe {}\" to confirm.", active.id)),
    };

    tracing::info!(team_id = %team.team_id, user_id = %user_id, "UNSUBSCRIBE");
    Ok(reply)
}
