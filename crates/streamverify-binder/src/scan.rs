//! Locating verification groups in a rendered document.
//!
//! # Tagging convention
//!
//! The host renderer marks up each verifiable container like this:
//!
//! ```text
//! <table class="requirement" data-id="REQ-7">      category class + group id
//!   <tr><td class="verifiable">...</td></tr>        text sent for verification
//!   <button class="verify-button"/>                 optional existing trigger
//!   <div class="verify-output"/>                    optional existing output region
//! </table>
//! ```
//!
//! The category class must be a key of the [`CategoryRegistry`]. The other
//! markers are configurable through [`TaggingConvention`].

use streamverify_core::{CategoryRegistry, VerificationContext};
use tracing::debug;

use crate::document::Element;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggingConvention {
    pub fragment_class: String,
    pub id_attribute: String,
    pub trigger_class: String,
    pub output_class: String,
}

impl Default for TaggingConvention {
    fn default() -> Self {
        Self {
            fragment_class: "verifiable".into(),
            id_attribute: "data-id".into(),
            trigger_class: "verify-button".into(),
            output_class: "verify-output".into(),
        }
    }
}

/// How many triggers a matched container receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupingPolicy {
    /// One trigger per container covering all of its fragments.
    #[default]
    Container,
    /// One trigger per verifiable fragment.
    Fragment,
}

/// Whether a UI handle was found in the document or must be created by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOrigin {
    Existing,
    Created,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationGroup {
    /// Position in scan order; unique within one binding.
    pub index: usize,
    /// Stable host identifier, used for persistence. `None` when the
    /// container carries no identifier.
    pub id: Option<String>,
    pub category: String,
    pub context: VerificationContext,
    /// Raw fragment texts in document order.
    pub fragments: Vec<String>,
    pub trigger: HandleOrigin,
    pub output: HandleOrigin,
}

impl VerificationGroup {
    /// Identifier for display: the host id when present, else `#<index>`.
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("#{}", self.index),
        }
    }
}

/// Find every verification group under `root`.
///
/// Containers are matched by their first class that is a registered
/// category; a matched container is not searched for nested containers.
/// Containers without fragments produce no group.
pub fn scan(
    root: &Element,
    registry: &CategoryRegistry,
    policy: GroupingPolicy,
    convention: &TaggingConvention,
) -> Vec<VerificationGroup> {
    let mut containers = Vec::new();
    collect_containers(root, registry, &mut containers);

    let mut groups = Vec::new();
    for (container, category) in containers {
        let Some(context) = registry.context_for(category) else {
            continue;
        };
        let fragments = container.marked(&convention.fragment_class);
        let container_id = container.attr(&convention.id_attribute);
        if fragments.is_empty() {
            debug!(
                category,
                id = container_id.unwrap_or_default(),
                "container has no verifiable fragments"
            );
            continue;
        }

        match policy {
            GroupingPolicy::Container => {
                groups.push(VerificationGroup {
                    index: groups.len(),
                    id: container_id.map(str::to_string),
                    category: category.to_string(),
                    context,
                    fragments: fragments.iter().map(|f| f.text()).collect(),
                    trigger: origin(container.contains_marked(&convention.trigger_class)),
                    output: origin(container.contains_marked(&convention.output_class)),
                });
            }
            GroupingPolicy::Fragment => {
                for (i, fragment) in fragments.iter().enumerate() {
                    let id = match (fragment.attr(&convention.id_attribute), container_id) {
                        (Some(own), _) => Some(own.to_string()),
                        (None, Some(parent)) => Some(format!("{parent}#{i}")),
                        (None, None) => None,
                    };
                    groups.push(VerificationGroup {
                        index: groups.len(),
                        id,
                        category: category.to_string(),
                        context: context.clone(),
                        fragments: vec![fragment.text()],
                        trigger: HandleOrigin::Created,
                        output: HandleOrigin::Created,
                    });
                }
            }
        }
    }
    groups
}

fn origin(found: bool) -> HandleOrigin {
    if found {
        HandleOrigin::Existing
    } else {
        HandleOrigin::Created
    }
}

fn collect_containers<'a>(
    el: &'a Element,
    registry: &CategoryRegistry,
    out: &mut Vec<(&'a Element, &'a str)>,
) {
    if let Some(category) = el.classes().find(|c| registry.contains(c)) {
        out.push((el, category));
        return;
    }
    for child in el.elements() {
        collect_containers(child, registry, out);
    }
}
