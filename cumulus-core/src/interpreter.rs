//! Interpreter - Execute Effects using a Provider
//!
//! The Interpreter executes Effects contained in a Plan in order,
//! collecting the results. This is where side effects actually occur.

use std::collections::HashMap;

use log::info;

use crate::effect::Effect;
use crate::plan::Plan;
use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::resource::{ResourceId, State};

/// Result of executing each Effect
#[derive(Debug)]
pub enum EffectOutcome {
    /// Read succeeded
    Read { state: State },
    /// Create succeeded
    Created { state: State },
    /// Update succeeded
    Updated { state: State },
    /// Old object deleted and new one created
    Replaced { state: State },
    /// Delete succeeded
    Deleted { id: ResourceId },
    /// Skipped (e.g., dry-run)
    Skipped { reason: String },
}

impl EffectOutcome {
    pub fn state(&self) -> Option<&State> {
        match self {
            EffectOutcome::Read { state }
            | EffectOutcome::Created { state }
            | EffectOutcome::Updated { state }
            | EffectOutcome::Replaced { state } => Some(state),
            EffectOutcome::Deleted { .. } | EffectOutcome::Skipped { .. } => None,
        }
    }

    /// Record this outcome in a table of known states
    pub fn apply_to(&self, states: &mut HashMap<ResourceId, State>) {
        match self {
            EffectOutcome::Deleted { id } => {
                states.remove(id);
            }
            EffectOutcome::Skipped { .. } => {}
            _ => {
                if let Some(state) = self.state() {
                    states.insert(state.id.clone(), state.clone());
                }
            }
        }
    }
}

/// Result of executing the entire Plan
#[derive(Debug)]
pub struct ApplyResult {
    pub outcomes: Vec<Result<EffectOutcome, ProviderError>>,
    pub success_count: usize,
    pub failure_count: usize,
    /// Known states after execution, including states that were not touched
    pub states: HashMap<ResourceId, State>,
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }
}

/// Interpreter configuration
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    /// If true, skip actual side effects
    pub dry_run: bool,
    /// Continue on error
    pub continue_on_error: bool,
}

/// Interpreter that executes Effects using a Provider
pub struct Interpreter<P: Provider> {
    provider: P,
    config: InterpreterConfig,
}

impl<P: Provider> Interpreter<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: InterpreterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Execute a Plan, interpreting all Effects and causing side effects
    pub async fn apply(&self, plan: &Plan) -> ApplyResult {
        self.apply_with_states(plan, HashMap::new()).await
    }

    /// Execute a Plan, resolving references against `states` and the
    /// states produced by earlier Effects
    pub async fn apply_with_states(
        &self,
        plan: &Plan,
        mut states: HashMap<ResourceId, State>,
    ) -> ApplyResult {
        let mut outcomes = Vec::new();
        let mut success_count = 0;
        let mut failure_count = 0;

        for effect in plan.effects() {
            let result = self.execute_effect(effect, &states).await;

            let failed = match &result {
                Ok(outcome) => {
                    success_count += 1;
                    outcome.apply_to(&mut states);
                    false
                }
                Err(_) => {
                    failure_count += 1;
                    true
                }
            };

            outcomes.push(result);
            if failed && !self.config.continue_on_error {
                break;
            }
        }

        ApplyResult {
            outcomes,
            success_count,
            failure_count,
            states,
        }
    }

    /// Execute a single Effect
    pub async fn execute_effect(
        &self,
        effect: &Effect,
        states: &HashMap<ResourceId, State>,
    ) -> ProviderResult<EffectOutcome> {
        if self.config.dry_run {
            return Ok(EffectOutcome::Skipped {
                reason: "dry-run mode".to_string(),
            });
        }

        info!("{}", effect);
        match effect {
            Effect::Read(resource) => {
                let resource = resource.resolve_all_references(states)?;
                let state = self.provider.read_data_source(&resource).await?;
                Ok(EffectOutcome::Read { state })
            }
            Effect::Create(resource) => {
                let resource = resource.resolve_all_references(states)?;
                let state = self.provider.create(&resource).await?;
                Ok(EffectOutcome::Created { state })
            }
            Effect::Update { id, from, to, .. } => {
                let to = to.resolve_all_references(states)?;
                let identifier = require_identifier(id, from)?;
                let state = self.provider.update(id, identifier, from, &to).await?;
                Ok(EffectOutcome::Updated { state })
            }
            Effect::Replace { id, from, to, .. } => {
                let to = to.resolve_all_references(states)?;
                let identifier = require_identifier(id, from)?;
                self.provider.delete(id, identifier, from).await?;
                let state = self.provider.create(&to).await?;
                Ok(EffectOutcome::Replaced { state })
            }
            Effect::Delete { id, from } => {
                let identifier = require_identifier(id, from)?;
                self.provider.delete(id, identifier, from).await?;
                Ok(EffectOutcome::Deleted { id: id.clone() })
            }
        }
    }
}

fn require_identifier<'a>(id: &ResourceId, state: &'a State) -> ProviderResult<&'a str> {
    state.identifier.as_deref().ok_or_else(|| {
        ProviderError::new("Resource has no identifier in state").for_resource(id.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::BoxFuture;
    use crate::resource::{Resource, Value};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestProvider {
        calls: Mutex<Vec<String>>,
    }

    impl TestProvider {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Provider for TestProvider {
        fn name(&self) -> &'static str {
            "test"
        }

        fn resource_types(&self) -> Vec<Box<dyn crate::provider::ResourceType>> {
            vec![]
        }

        fn read(
            &self,
            id: &ResourceId,
            _identifier: Option<&str>,
        ) -> BoxFuture<'_, ProviderResult<State>> {
            let id = id.clone();
            Box::pin(async move { Ok(State::not_found(id)) })
        }

        fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            self.record(format!("create {}", resource.id));
            let result = if resource.id.name == "broken" {
                Err(ProviderError::new("boom").for_resource(resource.id.clone()))
            } else {
                Ok(State::existing(resource.id.clone(), resource.attributes.clone())
                    .with_identifier(format!("{}-id", resource.id.name)))
            };
            Box::pin(async move { result })
        }

        fn update(
            &self,
            id: &ResourceId,
            identifier: &str,
            _from: &State,
            to: &Resource,
        ) -> BoxFuture<'_, ProviderResult<State>> {
            self.record(format!("update {} {}", id, identifier));
            let state = State::existing(id.clone(), to.attributes.clone()).with_identifier(identifier);
            Box::pin(async move { Ok(state) })
        }

        fn delete(
            &self,
            id: &ResourceId,
            identifier: &str,
            _from: &State,
        ) -> BoxFuture<'_, ProviderResult<()>> {
            self.record(format!("delete {} {}", id, identifier));
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn apply_empty_plan() {
        let interpreter = Interpreter::new(TestProvider::default());
        let plan = Plan::new();
        let result = interpreter.apply(&plan).await;

        assert!(result.is_success());
        assert_eq!(result.success_count, 0);
    }

    #[tokio::test]
    async fn apply_create_effect() {
        let interpreter = Interpreter::new(TestProvider::default());
        let mut plan = Plan::new();
        plan.add(Effect::Create(Resource::new("test", "example")));

        let result = interpreter.apply(&plan).await;

        assert!(result.is_success());
        assert_eq!(result.success_count, 1);
        assert!(result.states.contains_key(&ResourceId::new("test", "example")));
    }

    #[tokio::test]
    async fn references_resolved_from_earlier_effects() {
        let interpreter = Interpreter::new(TestProvider::default());
        let vpc = ResourceId::new("ec2.vpc", "main");
        let mut plan = Plan::new();
        plan.add(Effect::Create(Resource::new("ec2.vpc", "main")));
        plan.add(Effect::Create(
            Resource::new("ec2.security_group", "web")
                .with_attribute("vpc_id", Value::ResourceRef(vpc, "id".to_string())),
        ));

        let result = interpreter.apply(&plan).await;
        assert!(result.is_success());
        let sg = &result.states[&ResourceId::new("ec2.security_group", "web")];
        assert_eq!(
            sg.attributes.get("vpc_id"),
            Some(&Value::String("main-id".to_string()))
        );
    }

    #[tokio::test]
    async fn replace_deletes_then_creates() {
        let interpreter = Interpreter::new(TestProvider::default());
        let id = ResourceId::new("ec2.vpc", "main");
        let mut plan = Plan::new();
        plan.add(Effect::Replace {
            id: id.clone(),
            from: State::existing(id.clone(), HashMap::new()).with_identifier("vpc-old"),
            to: Resource::new("ec2.vpc", "main"),
            changed_attributes: vec!["cidr_block".to_string()],
        });

        let result = interpreter.apply(&plan).await;
        assert!(result.is_success());
        let calls = interpreter.provider().calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["delete ec2.vpc.main vpc-old", "create ec2.vpc.main"]);
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let interpreter = Interpreter::new(TestProvider::default());
        let mut plan = Plan::new();
        plan.add(Effect::Create(Resource::new("test", "broken")));
        plan.add(Effect::Create(Resource::new("test", "fine")));

        let result = interpreter.apply(&plan).await;
        assert!(!result.is_success());
        assert_eq!(result.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn continue_on_error_runs_remaining_effects() {
        let config = InterpreterConfig {
            continue_on_error: true,
            ..Default::default()
        };
        let interpreter = Interpreter::new(TestProvider::default()).with_config(config);
        let mut plan = Plan::new();
        plan.add(Effect::Create(Resource::new("test", "broken")));
        plan.add(Effect::Create(Resource::new("test", "fine")));

        let result = interpreter.apply(&plan).await;
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.outcomes.len(), 2);
    }

    #[tokio::test]
    async fn dry_run_skips_effects() {
        let config = InterpreterConfig {
            dry_run: true,
            ..Default::default()
        };
        let interpreter = Interpreter::new(TestProvider::default()).with_config(config);
        let mut plan = Plan::new();
        plan.add(Effect::Create(Resource::new("test", "example")));

        let result = interpreter.apply(&plan).await;

        assert!(result.is_success());
        assert!(matches!(
            result.outcomes[0],
            Ok(EffectOutcome::Skipped { .. })
        ));
        assert!(interpreter.provider().calls.lock().unwrap().is_empty());
    }
}
