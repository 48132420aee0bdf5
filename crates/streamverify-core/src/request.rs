//! Completion request composition.
//!
//! A verification request carries one system message (the category's
//! [`VerificationContext`]) and one user message built from every verifiable
//! text fragment of a group.

use serde::{Deserialize, Serialize};

use crate::registry::VerificationContext;

/// Separator placed between normalised fragments in the user message.
pub const FRAGMENT_DELIMITER: &str = " | ";

/// A chat-style completion request, independent of the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system_message: String,
    pub user_message: String,
    pub temperature: f32,
    pub streaming: bool,
}

impl CompletionRequest {
    /// Build a streaming request for a group's fragments under `context`.
    pub fn for_fragments<S: AsRef<str>>(
        model: &str,
        temperature: f32,
        context: &VerificationContext,
        fragments: &[S],
    ) -> Self {
        Self {
            model: model.to_string(),
            system_message: context.system_message(),
            user_message: compose_user_message(fragments),
            temperature,
            streaming: true,
        }
    }
}

/// Collapse every whitespace run in `fragment` to a single space and trim
/// both ends.
///
/// "  a   b " → "a b", "c\nd" → "c d"
pub fn normalize_fragment(fragment: &str) -> String {
    fragment.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalise each fragment and join them with [`FRAGMENT_DELIMITER`].
///
/// Fragments are kept in document order. A fragment that normalises to the
/// empty string still occupies its slot, so the delimiter count always
/// matches the fragment count.
pub fn compose_user_message<S: AsRef<str>>(fragments: &[S]) -> String {
    fragments
        .iter()
        .map(|f| normalize_fragment(f.as_ref()))
        .collect::<Vec<_>>()
        .join(FRAGMENT_DELIMITER)
}
