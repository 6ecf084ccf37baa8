use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Token acquisition against the identity provider failed
    #[error("Authentication failed for {resource}: {message}")]
    Authentication { resource: String, message: String },

    /// Interactive sign-in succeeded but the account can see no subscriptions
    #[error("No subscriptions found for the signed-in account")]
    NoSubscriptions,

    /// The interactive subscription prompt got an answer outside the listed range
    #[error("Invalid selection: {input:?} (expected a number between 1 and {max})")]
    InvalidSelection { input: String, max: usize },

    /// A configured subscription id is not visible to the identity
    #[error("Subscription {id} is not accessible to the current identity")]
    UnknownSubscription { id: String },

    /// Listing reservations from the inventory API failed
    #[error("Failed to list reservations: {message}")]
    Inventory { message: String },

    /// A single notification email could not be sent
    #[error("Failed to send mail for reservation {reservation_id}: {message}")]
    Mail { reservation_id: String, message: String },

    /// Posting the run summary to the ingestion endpoint failed
    #[error("Failed to post telemetry: {message}")]
    Telemetry { message: String },

    /// Invalid or inconsistent configuration
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Generic internal error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
