//! Invalidation plan generation.
//!
//! Merges a batch of invalidation messages into one set of actions.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use super::events::{InvalidationEnvelope, InvalidationMessage, ModuleCommand};
use super::keys::DependencyKey;

/// Actions to execute for one batch of invalidation messages.
///
/// Duplicate deliveries of the same message collapse, and repeated targets
/// are applied once.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    /// Hosts whose page directories must be cleared.
    pub hosts: BTreeSet<String>,
    /// Repository branches whose page directories must be cleared.
    pub branches: BTreeSet<(String, String)>,
    /// Dependencies whose cached renders must be evicted.
    pub dependencies: BTreeSet<DependencyKey>,
    /// Module commands seen in the batch.
    pub commands: BTreeSet<&'static str>,
    /// Distinct messages merged into the plan.
    pub message_count: usize,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ messages: {}, hosts: {}, branches: {}, dependencies: {}, commands: {:?} }}",
            self.message_count,
            self.hosts.len(),
            self.branches.len(),
            self.dependencies.len(),
            self.commands,
        )
    }
}

impl InvalidationPlan {
    /// Merge a batch of envelopes, skipping repeated message ids.
    pub fn from_envelopes<I>(envelopes: I) -> Self
    where
        I: IntoIterator<Item = InvalidationEnvelope>,
    {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();

        for envelope in envelopes {
            if seen_ids.insert(envelope.id) {
                plan.add(&envelope.message);
            }
        }
        plan
    }

    /// Plan for a single message.
    pub fn from_message(message: &InvalidationMessage) -> Self {
        let mut plan = Self::default();
        plan.add(message);
        plan
    }

    fn add(&mut self, message: &InvalidationMessage) {
        self.message_count += 1;
        match message {
            InvalidationMessage::Node {
                node_id,
                branch_id,
                repository_id,
                ..
            } => {
                self.branches
                    .insert((repository_id.clone(), branch_id.clone()));
                self.dependencies.insert(DependencyKey::node(node_id));
            }
            InvalidationMessage::Module { command, host } => {
                self.hosts.insert(host.clone());
                self.commands.insert(ModuleCommand::as_str(*command));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.branches.is_empty() && self.dependencies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn envelope(message: InvalidationMessage) -> InvalidationEnvelope {
        InvalidationEnvelope::new(Uuid::new_v4(), message)
    }

    #[test]
    fn empty_batch_yields_empty_plan() {
        let plan = InvalidationPlan::from_envelopes(Vec::new());
        assert!(plan.is_empty());
        assert_eq!(plan.message_count, 0);
    }

    #[test]
    fn duplicate_deliveries_collapse() {
        let message = envelope(InvalidationMessage::node("n1", "repo", "master"));
        let plan = InvalidationPlan::from_envelopes(vec![message.clone(), message]);
        assert_eq!(plan.message_count, 1);
        assert_eq!(plan.dependencies.len(), 1);
    }

    #[test]
    fn node_messages_collect_branches_and_dependencies() {
        let plan = InvalidationPlan::from_envelopes(vec![
            envelope(InvalidationMessage::node("n1", "repo", "master")),
            envelope(InvalidationMessage::node("n2", "repo", "master")),
            envelope(InvalidationMessage::node("n1", "repo", "dev")),
        ]);

        assert_eq!(plan.message_count, 3);
        assert_eq!(plan.branches.len(), 2);
        assert_eq!(
            plan.dependencies,
            BTreeSet::from([DependencyKey::node("n1"), DependencyKey::node("n2")])
        );
        assert!(plan.hosts.is_empty());
    }

    #[test]
    fn module_messages_collect_hosts() {
        let plan = InvalidationPlan::from_envelopes(vec![
            envelope(InvalidationMessage::module(ModuleCommand::Deploy, "a.com")),
            envelope(InvalidationMessage::module(ModuleCommand::Refresh, "a.com")),
            envelope(InvalidationMessage::module(ModuleCommand::Undeploy, "b.com")),
        ]);

        assert_eq!(
            plan.hosts,
            BTreeSet::from(["a.com".to_string(), "b.com".to_string()])
        );
        assert_eq!(plan.commands.len(), 3);
        assert!(plan.to_string().contains("hosts: 2"));
    }
}
