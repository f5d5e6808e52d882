//! Plan and value rendering

use std::collections::{BTreeMap, HashMap};

use colored::{ColoredString, Colorize};
use similar::{ChangeTag, TextDiff};

use cumulus_core::effect::Effect;
use cumulus_core::plan::Plan;
use cumulus_core::resource::{State, Value};
use cumulus_core::schema::ResourceSchema;

pub fn print_plan(plan: &Plan, schemas: &HashMap<String, ResourceSchema>) {
    if plan.mutation_count() == 0 {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        if !effect.is_mutating() {
            continue;
        }
        let schema = schemas.get(&effect.resource_id().resource_type);
        println!("  {} {}", colored_symbol(effect), effect.resource_id());

        match effect {
            Effect::Create(resource) => {
                for (key, value) in sorted(&resource.attributes) {
                    println!(
                        "      {}: {}",
                        key,
                        display_value(schema, key, value)
                    );
                }
            }
            Effect::Update {
                from,
                to,
                changed_attributes,
                ..
            }
            | Effect::Replace {
                from,
                to,
                changed_attributes,
                ..
            } => {
                for key in changed_attributes {
                    print_change(schema, key, from, to.attributes.get(key));
                }
            }
            Effect::Delete { from, .. } => {
                if let Some(identifier) = &from.identifier {
                    println!("      {}", identifier.dimmed());
                }
            }
            Effect::Read(_) => {}
        }
        println!();
    }

    println!("{}", plan.summary().to_string().bold());
}

fn print_change(schema: Option<&ResourceSchema>, key: &str, from: &State, new: Option<&Value>) {
    let old = from.attributes.get(key);
    if !is_sensitive(schema, key)
        && let (Some(Value::String(old)), Some(Value::String(new))) = (old, new)
        && (old.contains('\n') || new.contains('\n'))
    {
        println!("      {}:{}", key, replacement_marker(schema, key));
        print_text_diff(old, new);
        return;
    }
    println!("{}", change_line(schema, key, old, new));
}

/// One `key: old → new` line; a missing side shows as `(none)`
fn change_line(
    schema: Option<&ResourceSchema>,
    key: &str,
    old: Option<&Value>,
    new: Option<&Value>,
) -> String {
    let show = |value: Option<&Value>| match value {
        Some(value) => display_value(schema, key, value),
        None => "(none)".dimmed().to_string(),
    };
    format!(
        "      {}: {} → {}{}",
        key,
        show(old),
        show(new),
        replacement_marker(schema, key)
    )
}

fn replacement_marker(schema: Option<&ResourceSchema>, key: &str) -> String {
    let force_new = schema
        .and_then(|s| s.attributes.get(key))
        .is_some_and(|a| a.force_new);
    if force_new {
        " (forces replacement)".red().to_string()
    } else {
        String::new()
    }
}

fn print_text_diff(old: &str, new: &str) {
    let diff = TextDiff::from_lines(old, new);
    for change in diff.iter_all_changes() {
        let line = change.value().trim_end_matches('\n');
        match change.tag() {
            ChangeTag::Delete => println!("        {}", format!("- {}", line).red()),
            ChangeTag::Insert => println!("        {}", format!("+ {}", line).green()),
            ChangeTag::Equal => println!("          {}", line.dimmed()),
        }
    }
}

fn colored_symbol(effect: &Effect) -> ColoredString {
    match effect {
        Effect::Create(_) => effect.symbol().green().bold(),
        Effect::Update { .. } => effect.symbol().yellow().bold(),
        Effect::Replace { .. } => effect.symbol().magenta().bold(),
        Effect::Delete { .. } => effect.symbol().red().bold(),
        Effect::Read(_) => effect.symbol().normal(),
    }
}

fn is_sensitive(schema: Option<&ResourceSchema>, key: &str) -> bool {
    schema
        .and_then(|s| s.attributes.get(key))
        .is_some_and(|a| a.sensitive)
}

fn display_value(schema: Option<&ResourceSchema>, key: &str, value: &Value) -> String {
    if is_sensitive(schema, key) {
        "(sensitive)".dimmed().to_string()
    } else {
        format_value(value)
    }
}

fn sorted<V>(map: &HashMap<String, V>) -> BTreeMap<&String, &V> {
    map.iter().collect()
}

/// Render a value the way it is written in configuration
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s),
        Value::Int(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::List(items) => {
            let strs: Vec<_> = items.iter().map(format_value).collect();
            format!("[{}]", strs.join(", "))
        }
        Value::Map(map) => {
            let strs: Vec<_> = sorted(map)
                .into_iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v)))
                .collect();
            format!("{{{}}}", strs.join(", "))
        }
        Value::ResourceRef(id, attr) => format!("${{{}.{}}}", id, attr),
    }
}

/// Outcome line for an applied Effect
pub fn format_effect(effect: &Effect) -> String {
    let verb = match effect {
        Effect::Read(_) => "Read",
        Effect::Create(_) => "Create",
        Effect::Update { .. } => "Update",
        Effect::Replace { .. } => "Replace",
        Effect::Delete { .. } => "Delete",
    };
    format!("{} {}", verb, effect.resource_id())
}

/// Print the attributes of a state, hiding sensitive ones
pub fn print_state(state: &State, schema: Option<&ResourceSchema>) {
    println!("  {}", state.id.to_string().bold());
    if let Some(identifier) = &state.identifier {
        println!("      identifier: {}", identifier);
    }
    for (key, value) in sorted(&state.attributes) {
        println!("      {}: {}", key, display_value(schema, key, value));
    }
}
