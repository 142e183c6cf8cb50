// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries provider messages
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Teamsub Billing
//!
//! Stripe-backed subscription lifecycle for chat teams.
//!
//! ## Features
//!
//! - **Trials**: Free trial measured from team creation, with expiry notices
//! - **Subscriptions**: Subscribe, update card, cancel auto-renew
//! - **Lifecycle checks**: Daily / startup detection of past due and lapsed subscriptions
//! - **Status**: Human-readable subscription status for chat
//! - **Commands**: `subscription` and `unsubscribe` chat commands
//! - **Notifications**: Log or Slack webhook delivery of billing events

pub mod account;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod hooks;
pub mod machine;
pub mod notify;
pub mod render;
pub mod store;
pub mod subscriptions;

// Account
pub use account::{BillingState, Team};

// Client
pub use client::StripeClient;

// Commands
pub use commands::{ChatCommand, CommandReply};

// Config
pub use config::{BillingConfig, DEFAULT_TRIAL_DAYS, MAX_TRIAL_DAYS};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::BillingEvent;

// Gateway
pub use gateway::{
    CreateCustomerParams, PaymentSource, ProviderCustomer, ProviderGateway, ProviderInvoice,
    ProviderSubscription, SubscriptionStatus,
};

// Hooks
pub use hooks::{check_all, log_check_results, on_team_started, CheckOutcome};

// State machine
pub use machine::{StateMachine, Transition};

// Notify
pub use notify::{notifier_for, LogNotifier, Notifier, SlackWebhookNotifier};

// Store
pub use store::{InMemoryTeamStore, PgTeamStore, TeamStore};

// Subscriptions
pub use subscriptions::{Applied, SubscribeParams, SubscriptionService};
