//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("team is already subscribed")]
    AlreadySubscribed,

    #[error("team is not a subscriber")]
    NotSubscribed,

    #[error("a Stripe customer is already registered for this team")]
    CustomerExists,

    #[error("no active Stripe subscription found for this team")]
    MissingStripeCustomer,

    #[error("a subscription for this team is already being created")]
    SubscriptionInProgress,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("concurrent modification of team {0}")]
    ConcurrentModification(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Errors raised by the subscription rules themselves, as opposed to
    /// infrastructure failures.
    pub fn is_domain_error(&self) -> bool {
        matches!(
            self,
            BillingError::AlreadySubscribed
                | BillingError::NotSubscribed
                | BillingError::CustomerExists
                | BillingError::MissingStripeCustomer
                | BillingError::SubscriptionInProgress
        )
    }

    /// Fixed message shown to API callers for domain errors.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            BillingError::AlreadySubscribed => Some("Already Subscribed"),
            BillingError::CustomerExists => Some("Customer Already Registered"),
            BillingError::NotSubscribed => Some("Not a Subscriber"),
            BillingError::MissingStripeCustomer => Some("Missing Stripe Customer"),
            BillingError::SubscriptionInProgress => Some("Subscription In Progress"),
            _ => None,
        }
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => BillingError::NotFound("row not found".to_string()),
            other => BillingError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_classification() {
        assert!(BillingError::AlreadySubscribed.is_domain_error());
        assert!(BillingError::NotSubscribed.is_domain_error());
        assert!(BillingError::CustomerExists.is_domain_error());
        assert!(BillingError::MissingStripeCustomer.is_domain_error());

        assert!(!BillingError::StripeApi("card declined".to_string()).is_domain_error());
        assert!(!BillingError::NotFound("team".to_string()).is_domain_error());
        assert!(!BillingError::Database("timeout".to_string()).is_domain_error());
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            BillingError::AlreadySubscribed.user_message(),
            Some("Already Subscribed")
        );
        assert_eq!(
            BillingError::CustomerExists.user_message(),
            Some("Customer Already Registered")
        );
        assert_eq!(
            BillingError::NotSubscribed.user_message(),
            Some("Not a Subscriber")
        );
        assert_eq!(
            BillingError::MissingStripeCustomer.user_message(),
            Some("Missing Stripe Customer")
        );
        assert_eq!(
            BillingError::SubscriptionInProgress.user_message(),
            Some("Subscription In Progress")
        );
        assert_eq!(BillingError::Internal("x".to_string()).user_message(), None);
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: BillingError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, BillingError::NotFound(_)));
    }
}
