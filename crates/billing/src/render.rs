//! Status text for the `subscription` command and API callers

use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::account::Team;
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::{subscribe_text, trial_status_text, update_cc_text};
use crate::gateway::{PaymentSource, ProviderCustomer, ProviderInvoice, ProviderSubscription, SubscriptionStatus};

const DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[month repr:long] [day], [year]");

/// "March 01, 2024"
pub fn format_date(date: OffsetDateTime) -> BillingResult<String> {
    date.format(DATE_FORMAT)
        .map_err(|e| BillingError::Internal(format!("Failed to format date: {}", e)))
}

/// Minor units to dollars: 123456 -> "$1,234.56"
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    let dollars = (cents / 100).to_string();

    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, digit) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

/// Render the team's subscription status, one fact per line.
///
/// `customer` is the provider customer for `team.stripe_customer_id`, fetched
/// by the caller. Admin detail adds invoices, cards on file and the update
/// link.
pub fn subscription_text(
    team: &Team,
    customer: Option<&ProviderCustomer>,
    include_admin_info: bool,
    config: &BillingConfig,
    now: OffsetDateTime,
) -> BillingResult<String> {
    let mut lines = Vec::new();

    if let Some(customer) = customer {
        lines.push(format!("Customer since {}.", format_date(customer.created_at)?));
        if customer.subscriptions.is_empty() {
            lines.push("No active subscriptions.".to_string());
        } else {
            for subscription in &customer.subscriptions {
                lines.push(subscription_line(subscription)?);
            }
            if include_admin_info {
                for invoice in &customer.invoices {
                    lines.push(invoice_line(invoice)?);
                }
                lines.extend(customer.sources.iter().map(source_line));
                lines.push(update_cc_text(team, config));
            }
        }
    } else if let (true, Some(subscribed_at)) = (team.subscribed, team.subscribed_at) {
        lines.push(format!("Subscriber since {}.", format_date(subscribed_at)?));
    } else {
        let remaining = team.remaining_trial_days(config, now)?;
        lines.push(format!(
            "{} {}",
            trial_status_text(remaining),
            subscribe_text(team, config)
        ));
    }

    Ok(lines.join("\n"))
}

pub fn subscription_line(subscription: &ProviderSubscription) -> BillingResult<String> {
    let amount = format_amount(subscription.plan_amount_cents);
    if subscription.status == SubscriptionStatus::Active {
        Ok(format!(
            "Subscribed to {} ({}), will{} auto-renew on {}.",
            subscription.plan_name,
            amount,
            if subscription.cancel_at_period_end { " not" } else { "" },
            format_date(subscription.current_period_end)?
        ))
    } else {
        Ok(format!(
            "{} subscription created {} to {} ({}).",
            subscription.status.title(),
            format_date(subscription.created_at)?,
            subscription.plan_name,
            amount
        ))
    }
}

fn invoice_line(invoice: &ProviderInvoice) -> BillingResult<String> {
    Ok(format!(
        "Invoice for {} on {}, {}.",
        format_amount(invoice.amount_due_cents),
        format_date(invoice.created_at)?,
        if invoice.paid { "paid" } else { "unpaid" }
    ))
}

fn source_line(source: &PaymentSource) -> String {
    format!(
        "On file {} {}, {} ending with {}, expires {}/{}.",
        source.brand,
        source.kind,
        source.name.as_deref().unwrap_or_default(),
        source.last4,
        source.exp_month,
        source.exp_year
    )
}
