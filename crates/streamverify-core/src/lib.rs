pub mod config;
pub mod record;
pub mod registry;
pub mod request;

pub use config::{ConfigError, VerifierConfig};
pub use record::VerificationRecord;
pub use registry::{CategoryRegistry, VerificationContext};
pub use request::{CompletionRequest, FRAGMENT_DELIMITER, compose_user_message, normalize_fragment};
