// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Resource registry
//!
//! Static table mapping resource nouns to their verbs, filter schemas and the
//! backend operations that serve them. Built once per invocation by
//! [`build_default_registry`] and handed to the dispatcher explicitly, so
//! tests can construct their own.

pub mod fields;

use serde::Serialize;
use std::collections::HashMap;

use crate::error::UserInputError;
use fields::FilterField;

/// Operation on a noun
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    List,
    View,
    Terminate,
    Delete,
    /// Nested sub-resource access (`run events <id>`)
    Events,
    Logs,
    Steps,
    Stats,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::List => "list",
            Verb::View => "view",
            Verb::Terminate => "terminate",
            Verb::Delete => "delete",
            Verb::Events => "events",
            Verb::Logs => "logs",
            Verb::Steps => "steps",
            Verb::Stats => "stats",
        }
    }

    /// The sub-resource a nested verb resolves to
    pub fn nested_noun(&self) -> Option<&'static str> {
        match self {
            Verb::Events => Some("event"),
            Verb::Logs => Some("log"),
            Verb::Steps => Some("step"),
            Verb::Stats => Some("stats"),
            _ => None,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, Verb::Terminate | Verb::Delete)
    }
}

/// Identifier of a remote operation (query or mutation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OperationId(pub &'static str);

impl OperationId {
    pub const RUNS_LIST: OperationId = OperationId("runs.list");
    pub const RUNS_VIEW: OperationId = OperationId("runs.view");
    pub const RUNS_TERMINATE: OperationId = OperationId("runs.terminate");
    pub const RUNS_DELETE: OperationId = OperationId("runs.delete");
    pub const RUNS_EVENTS: OperationId = OperationId("runs.events");
    pub const RUNS_STEPS: OperationId = OperationId("runs.steps");
    pub const RUNS_STATS: OperationId = OperationId("runs.stats");
    pub const DEPLOYMENTS_LIST: OperationId = OperationId("deployments.list");

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Backend operations bound to a resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Operations {
    pub list: Option<OperationId>,
    pub view: Option<OperationId>,
    pub terminate: Option<OperationId>,
    pub delete: Option<OperationId>,
}

/// Shape a raw backend item is normalized into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Run,
    Event,
    Log,
    Step,
    Stats,
    Deployment,
}

/// Everything the engine needs to know about one noun
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub noun: &'static str,
    pub aliases: &'static [&'static str],
    /// Supported verbs, in help order
    pub verbs: &'static [Verb],
    pub fields: &'static [FilterField],
    pub operations: Operations,
    pub record_kind: RecordKind,
    /// Path of the per-record identity used to suppress duplicates across pages
    pub identity_path: Option<&'static str>,
    /// Field `--since`/`--until` bind to
    pub time_field: Option<&'static str>,
    /// Whether `--follow` is accepted
    pub followable: bool,
    /// Whether list/view need a parent run id
    pub requires_parent: bool,
}

impl ResourceDescriptor {
    pub fn field(&self, name: &str) -> Option<&FilterField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn supports(&self, verb: Verb) -> bool {
        self.verbs.contains(&verb)
    }

    pub fn field_names(&self) -> String {
        if self.fields.is_empty() {
            return "none".to_string();
        }
        self.fields
            .iter()
            .map(|f| f.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Operation bound to a verb on this resource
    pub fn operation_for(&self, verb: Verb) -> Option<OperationId> {
        match verb {
            Verb::List => self.operations.list,
            Verb::View => self.operations.view,
            Verb::Terminate => self.operations.terminate,
            Verb::Delete => self.operations.delete,
            _ => None,
        }
    }
}

/// Registry of all resources exposed by the CLI
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    /// Resources indexed by noun
    by_noun: HashMap<&'static str, ResourceDescriptor>,
    /// Alias to noun mapping
    alias_map: HashMap<String, &'static str>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource; a later descriptor for the same noun replaces the earlier one
    pub fn add(&mut self, descriptor: ResourceDescriptor) {
        for alias in descriptor.aliases {
            self.alias_map.insert(alias.to_string(), descriptor.noun);
        }
        self.alias_map
            .insert(descriptor.noun.to_string(), descriptor.noun);
        self.by_noun.insert(descriptor.noun, descriptor);
    }

    /// Look up a resource by noun or alias
    pub fn get(&self, name: &str) -> Option<&ResourceDescriptor> {
        let noun = self.alias_map.get(&name.to_lowercase())?;
        self.by_noun.get(noun)
    }

    pub fn describe(&self, noun: &str) -> Result<&ResourceDescriptor, UserInputError> {
        self.get(noun).ok_or_else(|| UserInputError::UnknownNoun {
            noun: noun.to_string(),
            available: self.nouns().join(", "),
        })
    }

    pub fn verbs_for(&self, noun: &str) -> Result<&'static [Verb], UserInputError> {
        Ok(self.describe(noun)?.verbs)
    }

    /// Resolve a verb typed by the user against a known noun
    pub fn resolve_verb(&self, noun: &str, verb: &str) -> Result<Verb, UserInputError> {
        let descriptor = self.describe(noun)?;
        let wanted = verb.to_lowercase();
        self.verbs_for(noun)?
            .iter()
            .copied()
            .find(|v| v.as_str() == wanted)
            .ok_or_else(|| UserInputError::UnsupportedVerb {
                noun: descriptor.noun.to_string(),
                verb: verb.to_string(),
                supported: descriptor
                    .verbs
                    .iter()
                    .map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// All nouns, sorted
    pub fn nouns(&self) -> Vec<&'static str> {
        let mut nouns: Vec<_> = self.by_noun.keys().copied().collect();
        nouns.sort_unstable();
        nouns
    }
}

/// Build the registry of every resource runq knows about
pub fn build_default_registry() -> ResourceRegistry {
    use fields::{DEPLOYMENT_FIELDS, EVENT_FIELDS, LOG_FIELDS, RUN_FIELDS, STEP_FIELDS};

    let mut registry = ResourceRegistry::new();

    macro_rules! add_resource {
        (
            $noun:literal, [$($alias:literal),* $(,)?],
            verbs: [$($verb:ident),* $(,)?],
            fields: $fields:expr,
            kind: $kind:ident,
            ops: { $($op:ident: $id:ident),* $(,)? },
            identity: $identity:expr,
            time: $time:expr,
            followable: $follow:literal,
            parent: $parent:literal $(,)?
        ) => {{
            registry.add(ResourceDescriptor {
                noun: $noun,
                aliases: &[$($alias),*],
                verbs: &[$(Verb::$verb),*],
                fields: $fields,
                operations: Operations {
                    $($op: Some(OperationId::$id),)*
                    ..Operations::default()
                },
                record_kind: RecordKind::$kind,
                identity_path: $identity,
                time_field: $time,
                followable: $follow,
                requires_parent: $parent,
            });
        }};
    }

    add_resource!(
        "run", ["runs"],
        verbs: [List, View, Terminate, Delete, Events, Logs, Steps, Stats],
        fields: RUN_FIELDS,
        kind: Run,
        ops: { list: RUNS_LIST, view: RUNS_VIEW, terminate: RUNS_TERMINATE, delete: RUNS_DELETE },
        identity: Some("runId"),
        time: Some("created"),
        followable: false,
        parent: false,
    );

    // Event identity is not unique across retries; the follower dedupes by cursor
    add_resource!(
        "event", ["events", "ev"],
        verbs: [List],
        fields: EVENT_FIELDS,
        kind: Event,
        ops: { list: RUNS_EVENTS },
        identity: None,
        time: Some("timestamp"),
        followable: true,
        parent: true,
    );

    add_resource!(
        "log", ["logs"],
        verbs: [List],
        fields: LOG_FIELDS,
        kind: Log,
        ops: { list: RUNS_EVENTS },
        identity: None,
        time: Some("timestamp"),
        followable: true,
        parent: true,
    );

    add_resource!(
        "step", ["steps"],
        verbs: [List],
        fields: STEP_FIELDS,
        kind: Step,
        ops: { list: RUNS_STEPS },
        identity: Some("stepKey"),
        time: None,
        followable: false,
        parent: true,
    );

    add_resource!(
        "stats", [],
        verbs: [View],
        fields: &[],
        kind: Stats,
        ops: { view: RUNS_STATS },
        identity: None,
        time: None,
        followable: false,
        parent: true,
    );

    add_resource!(
        "deployment", ["deployments", "deploy"],
        verbs: [List],
        fields: DEPLOYMENT_FIELDS,
        kind: Deployment,
        ops: { list: DEPLOYMENTS_LIST },
        identity: Some("deploymentId"),
        time: None,
        followable: false,
        parent: false,
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_by_noun_and_alias() {
        let registry = build_default_registry();
        assert_eq!(registry.describe("run").unwrap().noun, "run");
        assert_eq!(registry.describe("runs").unwrap().noun, "run");
        assert_eq!(registry.describe("EV").unwrap().noun, "event");
    }

    #[test]
    fn test_unknown_noun() {
        let registry = build_default_registry();
        let err = registry.describe("pipelines").unwrap_err();
        match err {
            UserInputError::UnknownNoun { noun, available } => {
                assert_eq!(noun, "pipelines");
                assert!(available.contains("run"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_verbs_for_preserves_order() {
        let registry = build_default_registry();
        let verbs = registry.verbs_for("run").unwrap();
        assert_eq!(verbs[0], Verb::List);
        assert_eq!(verbs[1], Verb::View);
        assert!(verbs.contains(&Verb::Events));
    }

    #[test]
    fn test_unsupported_verb_is_distinct_error() {
        let registry = build_default_registry();
        let err = registry.resolve_verb("event", "delete").unwrap_err();
        assert!(matches!(err, UserInputError::UnsupportedVerb { .. }));
        assert!(err.to_string().contains("supported: list"));

        let err = registry.resolve_verb("nope", "list").unwrap_err();
        assert!(matches!(err, UserInputError::UnknownNoun { .. }));
    }

    #[test]
    fn test_nested_verbs_resolve_to_registered_nouns() {
        let registry = build_default_registry();
        for verb in registry.verbs_for("run").unwrap() {
            if let Some(nested) = verb.nested_noun() {
                let descriptor = registry.describe(nested).unwrap();
                assert!(descriptor.requires_parent, "{nested}");
            }
        }
    }

    #[test]
    fn test_every_verb_has_an_operation() {
        let registry = build_default_registry();
        for noun in registry.nouns() {
            let descriptor = registry.describe(noun).unwrap();
            for verb in descriptor.verbs {
                if verb.nested_noun().is_none() {
                    assert!(
                        descriptor.operation_for(*verb).is_some(),
                        "{noun} {}",
                        verb.as_str()
                    );
                }
            }
        }
    }

    #[test]
    fn test_only_event_streams_are_followable() {
        let registry = build_default_registry();
        assert!(registry.describe("event").unwrap().followable);
        assert!(registry.describe("log").unwrap().followable);
        assert!(!registry.describe("run").unwrap().followable);
    }
}
