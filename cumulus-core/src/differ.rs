//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the desired configuration with the current state fetched from the
//! Provider, and generates a list of required Effects (Plan).

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::effect::Effect;
use crate::plan::Plan;
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::ResourceSchema;

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// A changed attribute cannot be updated in place
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State, schema: Option<&ResourceSchema>) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes, schema);

    if changed.is_empty() {
        return Diff::NoChange(desired.id.clone());
    }

    let force_new = schema.is_some_and(|s| {
        changed
            .iter()
            .any(|name| s.attributes.get(name).is_some_and(|a| a.force_new))
    });

    if force_new {
        Diff::Replace {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state, sorted by name
fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    schema: Option<&ResourceSchema>,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') {
            continue;
        }

        let attr_schema = schema.and_then(|s| s.attributes.get(key));
        if attr_schema.is_some_and(|a| a.is_computed_only()) {
            continue;
        }

        // Unresolved references are only known after apply
        if desired_value.has_reference() {
            changed.push(key.clone());
            continue;
        }

        let same = match (current.get(key), attr_schema) {
            (Some(current_value), Some(a)) => a.values_equal(current_value, desired_value),
            (Some(current_value), None) => current_value == desired_value,
            (None, _) => false,
        };
        if !same {
            changed.push(key.clone());
        }
    }

    // Attributes dropped from the configuration still need to be cleared
    if let Some(schema) = schema {
        for (key, current_value) in current {
            if key.starts_with('_') || desired.contains_key(key) || is_blank(current_value) {
                continue;
            }
            let Some(attr) = schema.attributes.get(key) else {
                continue;
            };
            if attr.computed || attr.default.as_ref() == Some(current_value) {
                continue;
            }
            changed.push(key.clone());
        }
    }

    changed.sort();
    changed
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::List(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
        _ => false,
    }
}

/// Order resources so that every resource comes after the ones it references.
///
/// Resources keep their declaration order where dependencies allow it.
/// References to undeclared resources are ignored here; a cycle yields an error
/// naming the resources involved.
pub fn dependency_order(resources: &[Resource]) -> Result<Vec<&Resource>, String> {
    let declared: HashSet<&ResourceId> = resources.iter().map(|r| &r.id).collect();
    let mut placed: HashSet<&ResourceId> = HashSet::new();
    let mut ordered = Vec::with_capacity(resources.len());

    while ordered.len() < resources.len() {
        let before = ordered.len();
        for resource in resources {
            if placed.contains(&resource.id) {
                continue;
            }
            let ready = resource
                .dependencies()
                .iter()
                .all(|dep| !declared.contains(dep) || placed.contains(dep));
            if ready {
                placed.insert(&resource.id);
                ordered.push(resource);
            }
        }
        if ordered.len() == before {
            let stuck: Vec<String> = resources
                .iter()
                .filter(|r| !placed.contains(&r.id))
                .map(|r| r.id.to_string())
                .collect();
            return Err(format!("Dependency cycle between: {}", stuck.join(", ")));
        }
    }

    Ok(ordered)
}

/// Compute Diff for multiple resources and generate a Plan
///
/// Data sources always produce a Read. Resources present in `current_states`
/// but no longer declared produce a Delete, after all other effects.
pub fn create_plan(
    desired: &[Resource],
    current_states: &HashMap<ResourceId, State>,
    schemas: &HashMap<String, ResourceSchema>,
) -> Result<Plan, String> {
    let mut plan = Plan::new();

    for resource in dependency_order(desired)? {
        if resource.is_data_source() {
            plan.add(Effect::Read(resource.clone()));
            continue;
        }

        let current = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        let resolved = resource.resolve_references(current_states);
        match diff(&resolved, &current, schemas.get(&resource.id.resource_type)) {
            Diff::Create(_) => plan.add(Effect::Create(resource.clone())),
            Diff::Update {
                id,
                from,
                changed_attributes,
                ..
            } => plan.add(Effect::Update {
                id,
                from,
                to: resource.clone(),
                changed_attributes,
            }),
            Diff::Replace {
                id,
                from,
                changed_attributes,
                ..
            } => plan.add(Effect::Replace {
                id,
                from,
                to: resource.clone(),
                changed_attributes,
            }),
            Diff::NoChange(_) => {}
        }
    }

    let declared: HashSet<&ResourceId> = desired.iter().map(|r| &r.id).collect();
    let orphans: BTreeMap<&ResourceId, &State> = current_states
        .iter()
        .filter(|(id, state)| state.exists && !declared.contains(id))
        .collect();
    for (id, state) in orphans.into_iter().rev() {
        plan.add(Effect::Delete {
            id: id.clone(),
            from: state.clone(),
        });
    }

    Ok(plan)
}
