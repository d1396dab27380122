// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::Arc;

use fnv::FnvHashMap as HashMap;
use log::debug;

use crate::action::Action;
use crate::command::Command;

///
/// The table of declared Actions, keyed by name.
///
/// The registry is a plain value owned by the embedding application: actions hold no reference
/// back into the engine, and scheduler operations take the registry as an explicit argument.
/// Registering a name that already exists replaces the previous declaration.
///
pub struct ActionRegistry {
    actions: HashMap<String, Arc<Action>>,
    default_environment: Option<String>,
}

impl ActionRegistry {
    pub fn new() -> ActionRegistry {
        ActionRegistry {
            actions: HashMap::default(),
            default_environment: None,
        }
    }

    /// Environment tag stamped onto actions that are registered without one. The loader sets this
    /// while applying one environment's configuration; the engine itself never interprets it.
    pub fn set_default_environment(&mut self, environment: Option<&str>) {
        self.default_environment = environment.map(str::to_string);
    }

    pub fn register(&mut self, mut action: Action) -> Arc<Action> {
        if action.environment.is_none() {
            action.environment = self.default_environment.clone();
        }
        debug!(
            "Registering action '{}' (environment: {:?})",
            action.name, action.environment
        );
        let action = Arc::new(action);
        self.actions.insert(action.name.clone(), action.clone());
        action
    }

    ///
    /// Expand a list of (input, output) file pairs into one Action per pair plus an aggregator
    /// Action named `base_name` that depends on all of them. The aggregator carries the
    /// entrypoint flag and can in turn be used as a dependency of other Actions.
    ///
    pub fn register_action_set(
        &mut self,
        base_name: &str,
        message: Option<&str>,
        file_pairs: &[(String, String)],
        dependencies: &[String],
        is_entrypoint: bool,
        command: Arc<dyn Command>,
    ) -> Arc<Action> {
        let mut action_names = Vec::with_capacity(file_pairs.len());
        for (input_file, output_file) in file_pairs {
            let action_name = format!("{base_name}_{output_file}");
            let mut action = Action::new(&action_name)
                .with_inputs([input_file.clone()])
                .with_outputs([output_file.clone()])
                .with_dependencies(dependencies.iter().cloned());
            if let Some(message) = message {
                action = action.with_message(message);
            }
            action.command = Some(command.clone());
            self.register(action);
            action_names.push(action_name);
        }
        let mut aggregator = Action::new(base_name)
            .with_message(&format!("Action set {base_name}"))
            .with_dependencies(action_names);
        if is_entrypoint {
            aggregator = aggregator.entrypoint();
        }
        self.register(aggregator)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Action>> {
        self.actions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> impl Iterator<Item = &Arc<Action>> {
        self.actions.values()
    }

    /// Actions tagged as user-facing, for discovery by the embedding application.
    pub fn entrypoints(&self) -> impl Iterator<Item = &Arc<Action>> {
        self.actions.values().filter(|a| a.is_entrypoint)
    }
}
