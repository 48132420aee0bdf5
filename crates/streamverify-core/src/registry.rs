//! Category registry: which document categories are verifiable, and the
//! instruction the language model receives for each of them.

use std::collections::BTreeMap;

/// Instruction pair sent as the system message of every request for a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationContext {
    general_instruction: String,
    specific_instruction: String,
}

impl VerificationContext {
    pub fn new(
        general_instruction: impl Into<String>,
        specific_instruction: impl Into<String>,
    ) -> Self {
        Self {
            general_instruction: general_instruction.into(),
            specific_instruction: specific_instruction.into(),
        }
    }

    pub fn general_instruction(&self) -> &str {
        &self.general_instruction
    }

    pub fn specific_instruction(&self) -> &str {
        &self.specific_instruction
    }

    /// Specific instruction first, then the general one, with no separator added.
    pub fn system_message(&self) -> String {
        format!("{}{}", self.specific_instruction, self.general_instruction)
    }
}

/// Immutable mapping from category key to specific instruction.
///
/// Built once at startup and shared read-only (typically behind an `Arc`).
#[derive(Debug, Clone, Default)]
pub struct CategoryRegistry {
    general_instruction: String,
    categories: BTreeMap<String, String>,
}

impl CategoryRegistry {
    pub fn new<I, K, V>(general_instruction: impl Into<String>, categories: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            general_instruction: general_instruction.into(),
            categories: categories
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn general_instruction(&self) -> &str {
        &self.general_instruction
    }

    pub fn contains(&self, category: &str) -> bool {
        self.categories.contains_key(category)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Derive the request context for `category`, or `None` if it is not registered.
    pub fn context_for(&self, category: &str) -> Option<VerificationContext> {
        self.categories
            .get(category)
            .map(|specific| VerificationContext::new(&self.general_instruction, specific))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CategoryRegistry {
        CategoryRegistry::new(
            " Answer briefly.",
            [
                ("requirement", "Check this requirement."),
                ("use-case", "Check this use case."),
            ],
        )
    }

    #[test]
    fn specific_precedes_general() {
        let ctx = VerificationContext::new("GENERAL", "SPECIFIC");
        assert_eq!(ctx.system_message(), "SPECIFICGENERAL");
    }

    #[test]
    fn context_for_registered_category() {
        let ctx = registry().context_for("use-case").unwrap();
        assert_eq!(ctx.specific_instruction(), "Check this use case.");
        assert_eq!(ctx.system_message(), "Check this use case. Answer briefly.");
    }

    #[test]
    fn unknown_category_has_no_context() {
        assert!(registry().context_for("actor").is_none());
    }

    #[test]
    fn keys_are_sorted() {
        let reg = registry();
        let keys: Vec<&str> = reg.keys().collect();
        assert_eq!(keys, vec!["requirement", "use-case"]);
        assert_eq!(reg.len(), 2);
        assert!(reg.contains("requirement"));
    }
}
