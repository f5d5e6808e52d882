mod config;
mod display;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;

use cumulus_core::differ::{create_plan, dependency_order};
use cumulus_core::effect::Effect;
use cumulus_core::interpreter::{EffectOutcome, Interpreter};
use cumulus_core::plan::Plan;
use cumulus_core::provider::Provider;
use cumulus_core::resource::{Resource, ResourceId, State};
use cumulus_core::schema::ResourceSchema;
use cumulus_provider_aws::{AwsProvider, schemas};
use cumulus_state::{LockInfo, StateBackend, StateFile, create_backend};

use config::{CumulusConfig, apply_defaults, validate_resources};
use display::{format_effect, print_plan, print_state};

#[derive(Parser)]
#[command(name = "cumulus")]
#[command(about = "Declarative AWS infrastructure with a tracked state file", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "cumulus.json")]
    config: PathBuf,

    /// Verbose logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file
    Validate,
    /// Show execution plan without applying changes
    Plan,
    /// Apply changes to reach the desired state
    Apply {
        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Destroy all resources recorded in state
    Destroy {
        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Re-read every managed resource and update the state file
    Refresh,
    /// Adopt an existing remote object into state
    Import {
        /// Resource type (e.g. s3.bucket)
        resource_type: String,
        /// Name to manage the resource under
        name: String,
        /// Import identifier of the remote object
        id: String,
    },
    /// Show the schema of one resource type, or list all types
    Schema { resource_type: Option<String> },
    /// Release a state lock left behind by an interrupted run
    ForceUnlock { lock_id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let result = match cli.command {
        Commands::Validate => run_validate(&cli.config),
        Commands::Plan => run_plan(&cli.config).await,
        Commands::Apply { auto_approve } => run_apply(&cli.config, auto_approve).await,
        Commands::Destroy { auto_approve } => run_destroy(&cli.config, auto_approve).await,
        Commands::Refresh => run_refresh(&cli.config).await,
        Commands::Import {
            resource_type,
            name,
            id,
        } => run_import(&cli.config, ResourceId::new(resource_type, name), &id).await,
        Commands::Schema { resource_type } => run_schema(resource_type.as_deref()),
        Commands::ForceUnlock { lock_id } => run_force_unlock(&cli.config, &lock_id).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logger(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn get_schemas() -> HashMap<String, ResourceSchema> {
    schemas::all_schemas()
        .into_iter()
        .map(|schema| (schema.resource_type.clone(), schema))
        .collect()
}

/// Validated configuration with schema defaults applied
struct Workspace {
    config: CumulusConfig,
    resources: Vec<Resource>,
    schemas: HashMap<String, ResourceSchema>,
}

fn load_workspace(path: &Path) -> Result<Workspace, String> {
    let config = CumulusConfig::load(path)?;
    let schemas = get_schemas();
    let mut resources = config.resources();
    validate_resources(&resources, &schemas)
        .map_err(|e| format!("Validation failed:\n  {}", e))?;
    apply_defaults(&mut resources, &schemas);
    Ok(Workspace {
        config,
        resources,
        schemas,
    })
}

async fn get_provider(config: &CumulusConfig) -> Result<AwsProvider, String> {
    AwsProvider::new(&config.provider)
        .await
        .map_err(|e| format!("Failed to configure AWS provider: {}", e))
}

fn get_backend(config: &CumulusConfig) -> Result<Box<dyn StateBackend>, String> {
    create_backend(&config.backend).map_err(|e| e.to_string())
}

async fn acquire_lock(backend: &dyn StateBackend, operation: &str) -> Result<LockInfo, String> {
    let lock = backend
        .acquire_lock(operation)
        .await
        .map_err(|e| e.to_string())?;
    log::debug!("Acquired state lock {}", lock);
    Ok(lock)
}

/// Release the lock; a failure here must not hide the operation's own result
async fn release_lock(backend: &dyn StateBackend, lock: &LockInfo) {
    if let Err(e) = backend.release_lock(lock).await {
        eprintln!(
            "{} Failed to release state lock {}: {}",
            "Warning:".yellow().bold(),
            lock.id,
            e
        );
    }
}

async fn read_state_file(backend: &dyn StateBackend) -> Result<StateFile, String> {
    Ok(backend
        .read_state()
        .await
        .map_err(|e| format!("Failed to read state: {}", e))?
        .unwrap_or_default())
}

async fn write_state_file(backend: &dyn StateBackend, state_file: &mut StateFile) -> Result<(), String> {
    backend
        .write_state(state_file)
        .await
        .map_err(|e| format!("Failed to save state: {}", e))
}

/// Re-read every resource recorded in `state_file`.
///
/// Vanished resources are dropped from `state_file`; the states of the
/// remaining ones are returned and recorded.
async fn refresh_states<P: Provider>(
    provider: &P,
    state_file: &mut StateFile,
) -> Result<HashMap<ResourceId, State>, String> {
    let stored: BTreeMap<ResourceId, State> = state_file.states().into_iter().collect();
    let mut current = HashMap::new();

    for (id, stored) in stored {
        let refreshed = provider
            .read(&id, stored.identifier.as_deref())
            .await
            .map_err(|e| format!("Failed to refresh {}: {}", id, e))?;
        let schema = provider.schema(&id.resource_type);
        let refreshed = carry_forward(&stored, refreshed, schema.as_ref());
        if !refreshed.exists {
            log::warn!("{} no longer exists; removing it from state", id);
        }
        state_file.apply_state(&refreshed, provider.name());
        if refreshed.exists {
            current.insert(id, refreshed);
        }
    }

    Ok(current)
}

/// Keep stored configuration-only attributes, such as `force_destroy`.
///
/// Everything else comes from the read, so an attribute the cloud no longer
/// reports shows up as drift.
fn carry_forward(
    stored: &State,
    mut refreshed: State,
    schema: Option<&ResourceSchema>,
) -> State {
    let Some(schema) = schema else {
        return refreshed;
    };
    if refreshed.exists {
        for (key, value) in &stored.attributes {
            if schema.attributes.get(key).is_some_and(|a| a.config_only) {
                refreshed
                    .attributes
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }
    refreshed
}

/// Evaluate the data sources whose arguments are already known
async fn read_data_sources<P: Provider>(
    provider: &P,
    resources: &[Resource],
    states: &mut HashMap<ResourceId, State>,
) -> Result<(), String> {
    for resource in dependency_order(resources)? {
        if !resource.is_data_source() {
            continue;
        }
        let Ok(resolved) = resource.resolve_all_references(states) else {
            log::debug!("{} depends on values known after apply", resource.id);
            continue;
        };
        let state = provider
            .read_data_source(&resolved)
            .await
            .map_err(|e| format!("Failed to read {}: {}", resource.id, e))?;
        states.insert(resource.id.clone(), state);
    }
    Ok(())
}

/// Delete every stored resource, dependents before their dependencies.
///
/// Resources no longer declared go first since their dependencies are unknown.
fn destroy_plan(
    resources: &[Resource],
    current: &HashMap<ResourceId, State>,
) -> Result<Plan, String> {
    let mut plan = Plan::new();
    let declared: HashSet<&ResourceId> = resources.iter().map(|r| &r.id).collect();

    let orphans: BTreeMap<&ResourceId, &State> = current
        .iter()
        .filter(|(id, state)| state.exists && !declared.contains(id))
        .collect();
    for (id, state) in orphans.into_iter().rev() {
        plan.add(Effect::Delete {
            id: id.clone(),
            from: state.clone(),
        });
    }

    for resource in dependency_order(resources)?.into_iter().rev() {
        if resource.is_data_source() {
            continue;
        }
        if let Some(state) = current.get(&resource.id).filter(|s| s.exists) {
            plan.add(Effect::Delete {
                id: resource.id.clone(),
                from: state.clone(),
            });
        }
    }

    Ok(plan)
}

/// Record the result of a mutating Effect in the state file
fn record_outcome(state_file: &mut StateFile, outcome: &EffectOutcome, provider: &str) {
    match outcome {
        EffectOutcome::Deleted { id } => {
            state_file.remove_resource(id);
        }
        _ => {
            if let Some(state) = outcome.state() {
                state_file.apply_state(state, provider);
            }
        }
    }
}

/// Execute Effects one at a time, saving state after each change.
///
/// Stops at the first failure; everything applied before it stays recorded.
async fn execute_plan<P: Provider>(
    interpreter: &Interpreter<P>,
    plan: &Plan,
    mut states: HashMap<ResourceId, State>,
    state_file: &mut StateFile,
    backend: &dyn StateBackend,
) -> Result<usize, String> {
    let provider_name = interpreter.provider().name();
    let mut applied = 0;

    for effect in plan.effects() {
        match interpreter.execute_effect(effect, &states).await {
            Ok(outcome) => {
                outcome.apply_to(&mut states);
                if effect.is_mutating() {
                    record_outcome(state_file, &outcome, provider_name);
                    write_state_file(backend, state_file).await?;
                    println!("  {} {}", "✓".green(), format_effect(effect));
                    applied += 1;
                }
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), format_effect(effect), e);
                return Err(format!(
                    "{} of {} changes applied before the failure",
                    applied,
                    plan.mutation_count()
                ));
            }
        }
    }

    Ok(applied)
}

fn confirm(question: &str) -> Result<bool, String> {
    println!("{}", question.yellow().bold());
    println!("  {}", "Only 'yes' will be accepted to confirm.".yellow());
    print!("\n  Enter a value: ");
    std::io::Write::flush(&mut std::io::stdout()).map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    println!();
    Ok(input.trim() == "yes")
}

fn run_validate(path: &Path) -> Result<(), String> {
    println!("{}", "Validating...".cyan());
    let workspace = load_workspace(path)?;

    println!(
        "{}",
        format!(
            "✓ {} resources validated successfully.",
            workspace.resources.len()
        )
        .green()
        .bold()
    );
    for resource in &workspace.resources {
        println!("  • {}", resource.id);
    }
    Ok(())
}

async fn run_plan(path: &Path) -> Result<(), String> {
    let workspace = load_workspace(path)?;
    let provider = get_provider(&workspace.config).await?;
    let backend = get_backend(&workspace.config)?;

    let mut state_file = read_state_file(&*backend).await?;
    let mut current = refresh_states(&provider, &mut state_file).await?;
    read_data_sources(&provider, &workspace.resources, &mut current).await?;

    let plan = create_plan(&workspace.resources, &current, &workspace.schemas)?;
    print_plan(&plan, &workspace.schemas);
    Ok(())
}

async fn run_apply(path: &Path, auto_approve: bool) -> Result<(), String> {
    let workspace = load_workspace(path)?;
    let provider = get_provider(&workspace.config).await?;
    let backend = get_backend(&workspace.config)?;

    let lock = acquire_lock(&*backend, "apply").await?;
    let result = apply_locked(&workspace, provider, &*backend, auto_approve).await;
    release_lock(&*backend, &lock).await;
    result
}

async fn apply_locked(
    workspace: &Workspace,
    provider: AwsProvider,
    backend: &dyn StateBackend,
    auto_approve: bool,
) -> Result<(), String> {
    let mut state_file = read_state_file(backend).await?;
    let mut current = refresh_states(&provider, &mut state_file).await?;
    read_data_sources(&provider, &workspace.resources, &mut current).await?;

    let plan = create_plan(&workspace.resources, &current, &workspace.schemas)?;
    print_plan(&plan, &workspace.schemas);
    println!();

    if plan.mutation_count() == 0 {
        return write_state_file(backend, &mut state_file).await;
    }

    if !auto_approve && !confirm("Do you want to apply these changes?")? {
        println!("{}", "Apply cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Applying changes...".cyan().bold());
    println!();

    let interpreter = Interpreter::new(provider);
    let applied = execute_plan(&interpreter, &plan, current, &mut state_file, backend)
        .await
        .map_err(|e| format!("Apply failed. {}", e))?;

    println!();
    println!(
        "{}",
        format!("Apply complete! {} changes applied.", applied)
            .green()
            .bold()
    );
    Ok(())
}

async fn run_destroy(path: &Path, auto_approve: bool) -> Result<(), String> {
    let workspace = load_workspace(path)?;
    let provider = get_provider(&workspace.config).await?;
    let backend = get_backend(&workspace.config)?;

    let lock = acquire_lock(&*backend, "destroy").await?;
    let result = destroy_locked(&workspace, provider, &*backend, auto_approve).await;
    release_lock(&*backend, &lock).await;
    result
}

async fn destroy_locked(
    workspace: &Workspace,
    provider: AwsProvider,
    backend: &dyn StateBackend,
    auto_approve: bool,
) -> Result<(), String> {
    let mut state_file = read_state_file(backend).await?;
    let current = refresh_states(&provider, &mut state_file).await?;

    let plan = destroy_plan(&workspace.resources, &current)?;
    if plan.is_empty() {
        println!("{}", "No resources to destroy.".green());
        return write_state_file(backend, &mut state_file).await;
    }

    println!("{}", "Destroy Plan:".red().bold());
    println!();
    print_plan(&plan, &workspace.schemas);
    println!();

    if !auto_approve
        && !confirm("Do you really want to destroy all resources? This action cannot be undone.")?
    {
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Destroying resources...".red().bold());
    println!();

    let interpreter = Interpreter::new(provider);
    let destroyed = execute_plan(&interpreter, &plan, current, &mut state_file, backend)
        .await
        .map_err(|e| format!("Destroy failed. {}", e))?;

    println!();
    println!(
        "{}",
        format!("Destroy complete! {} resources destroyed.", destroyed)
            .green()
            .bold()
    );
    Ok(())
}

async fn run_refresh(path: &Path) -> Result<(), String> {
    let config = CumulusConfig::load(path)?;
    let provider = get_provider(&config).await?;
    let backend = get_backend(&config)?;

    let lock = acquire_lock(&*backend, "refresh").await?;
    let result = async {
        let mut state_file = read_state_file(&*backend).await?;
        let before = state_file.resources.len();
        let current = refresh_states(&provider, &mut state_file).await?;
        write_state_file(&*backend, &mut state_file).await?;
        Ok::<_, String>((before, current.len()))
    }
    .await;
    release_lock(&*backend, &lock).await;

    let (before, after) = result?;
    println!(
        "{}",
        format!("Refreshed {} resources.", after).green().bold()
    );
    if before > after {
        println!(
            "{}",
            format!("{} resources no longer exist and were removed from state.", before - after)
                .yellow()
        );
    }
    Ok(())
}

async fn run_import(path: &Path, id: ResourceId, import_id: &str) -> Result<(), String> {
    let workspace = load_workspace(path)?;
    if !workspace.resources.iter().any(|r| r.id == id) {
        println!(
            "{} {} is not declared in {}; it will be deleted by the next apply.",
            "Warning:".yellow().bold(),
            id,
            path.display()
        );
    }
    let provider = get_provider(&workspace.config).await?;
    let backend = get_backend(&workspace.config)?;

    let lock = acquire_lock(&*backend, "import").await?;
    let result = async {
        let mut state_file = read_state_file(&*backend).await?;
        if state_file.find_resource(&id).is_some() {
            return Err(format!("{} is already managed", id));
        }
        let state = provider
            .import(&id, import_id)
            .await
            .map_err(|e| e.to_string())?;
        state_file.apply_state(&state, provider.name());
        write_state_file(&*backend, &mut state_file).await?;
        Ok::<_, String>(state)
    }
    .await;
    release_lock(&*backend, &lock).await;

    let state = result?;
    println!("{}", "Import successful!".green().bold());
    print_state(&state, workspace.schemas.get(&id.resource_type));
    Ok(())
}

fn run_schema(resource_type: Option<&str>) -> Result<(), String> {
    let schemas: BTreeMap<String, ResourceSchema> = get_schemas().into_iter().collect();

    let Some(resource_type) = resource_type else {
        for (name, schema) in &schemas {
            let kind = if schema.data_source { " (data source)" } else { "" };
            println!("  {}{}", name.bold(), kind.dimmed());
            if let Some(description) = &schema.description {
                println!("      {}", description);
            }
        }
        return Ok(());
    };

    let schema = schemas
        .get(resource_type)
        .ok_or_else(|| format!("Unknown resource type: {}", resource_type))?;
    println!("{}", schema.resource_type.cyan().bold());
    if let Some(description) = &schema.description {
        println!("{}", description);
    }
    println!();

    let attributes: BTreeMap<&String, _> = schema.attributes.iter().collect();
    for (name, attr) in attributes {
        let mut flags = Vec::new();
        if attr.required {
            flags.push("required");
        } else if attr.is_computed_only() {
            flags.push("computed");
        } else if attr.computed {
            flags.push("optional, computed");
        } else {
            flags.push("optional");
        }
        if attr.force_new {
            flags.push("forces replacement");
        }
        if attr.sensitive {
            flags.push("sensitive");
        }
        println!(
            "  {} {} ({})",
            name.bold(),
            attr.attr_type.type_name().dimmed(),
            flags.join(", ")
        );
        if let Some(default) = &attr.default {
            println!("      default: {}", display::format_value(default));
        }
        if let Some(description) = &attr.description {
            println!("      {}", description);
        }
    }
    Ok(())
}

async fn run_force_unlock(path: &Path, lock_id: &str) -> Result<(), String> {
    let config = CumulusConfig::load(path)?;
    let backend = get_backend(&config)?;

    match backend.current_lock().await.map_err(|e| e.to_string())? {
        Some(lock) => println!("Releasing lock {}", lock),
        None => return Err("State is not locked".to_string()),
    }
    backend
        .force_unlock(lock_id)
        .await
        .map_err(|e| e.to_string())?;
    println!("{}", "State unlocked.".green().bold());
    Ok(())
}
