//! ontohub CLI - draft overlay and module derivation for an ontology repository.

use clap::Parser;
use ontohub::action_log;
use ontohub::cli::{
    Cli, Commands, ConfigCommands, DraftCommands, EntityCommands, GraphCommands, ModuleCommands,
    SystemCommands,
};
use ontohub::commands::{self, Output};
use ontohub::config::schema::MAX_DEPTH_RANGE;
use ontohub::config::{ConfigOverrides, OutputFormat, ResolvedConfig, resolve_config};
use ontohub::storage::Storage;
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the tracing filter directive.
const LOG_ENV: &str = "OH_LOG";

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Determine repo path: --repo flag > OH_REPO env > cwd
    let repo_path = resolve_repo_path(cli.repo_path, cli.human_readable);

    let human = cli.human_readable
        || load_config(&repo_path, &ConfigOverrides::default()).output_format()
            == OutputFormat::Human;

    let (cmd_name, args_json) = serialize_command(&cli.command);
    let start = Instant::now();
    let result = run_command(cli.command, &repo_path, human);
    let duration = start.elapsed().as_millis() as u64;

    let (success, error) = match &result {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };
    action_log::log_action(&repo_path, &cmd_name, args_json, success, error, duration);

    if let Err(e) = result {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

/// Diagnostics go to stderr; stdout is reserved for command output.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Resolve the repository path from the explicit flag or the current directory.
///
/// Priority: --repo flag > OH_REPO env var > current working directory
fn resolve_repo_path(explicit_path: Option<PathBuf>, human: bool) -> PathBuf {
    match explicit_path {
        Some(path) => {
            if !path.exists() {
                if human {
                    eprintln!(
                        "Error: Specified repo path does not exist: {}",
                        path.display()
                    );
                } else {
                    eprintln!(
                        "{}",
                        serde_json::json!({
                            "error": format!("Specified repo path does not exist: {}", path.display())
                        })
                    );
                }
                process::exit(1);
            }
            path
        }
        None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Resolved configuration, or defaults before `oh system init`.
fn load_config(repo_path: &Path, overrides: &ConfigOverrides) -> ResolvedConfig {
    let storage = match Storage::open(repo_path) {
        Ok(storage) => storage,
        Err(_) => return ResolvedConfig::default(),
    };
    match resolve_config(&storage, overrides) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable configuration");
            ResolvedConfig::default()
        }
    }
}

fn run_command(command: Commands, repo_path: &Path, human: bool) -> Result<(), ontohub::Error> {
    match command {
        Commands::System { command } => match command {
            SystemCommands::Init => output(&commands::system_init(repo_path)?, human),
            SystemCommands::Status => output(&commands::system_status(repo_path)?, human),
        },

        Commands::Sync { source } => output(&commands::sync(repo_path, source)?, human),

        Commands::Entity { command } => match command {
            EntityCommands::Show {
                entity_type,
                key,
                draft,
            } => output(
                &commands::entity_show(repo_path, draft.as_deref(), entity_type, &key)?,
                human,
            ),
            EntityCommands::List { entity_type, draft } => output(
                &commands::entity_list(repo_path, draft.as_deref(), entity_type)?,
                human,
            ),
            EntityCommands::Members {
                category,
                inherited,
                draft,
            } => output(
                &commands::entity_members(repo_path, draft.as_deref(), &category, inherited)?,
                human,
            ),
        },

        Commands::Draft { command } => match command {
            DraftCommands::Create { title } => {
                output(&commands::draft_create(repo_path, &title)?, human)
            }
            DraftCommands::List { status } => {
                output(&commands::draft_list(repo_path, status)?, human)
            }
            DraftCommands::Show { draft } => output(&commands::draft_show(repo_path, &draft)?, human),
            DraftCommands::Discard { draft } => {
                output(&commands::draft_discard(repo_path, &draft)?, human)
            }
            DraftCommands::Submit { draft } => {
                output(&commands::draft_submit(repo_path, &draft)?, human)
            }
            DraftCommands::New {
                draft,
                entity_type,
                key,
                json,
            } => output(
                &commands::draft_new(repo_path, &draft, entity_type, &key, &json)?,
                human,
            ),
            DraftCommands::Update {
                draft,
                entity_type,
                key,
                patch,
            } => output(
                &commands::draft_update(repo_path, &draft, entity_type, &key, &patch)?,
                human,
            ),
            DraftCommands::Replace {
                draft,
                entity_type,
                key,
                json,
            } => output(
                &commands::draft_replace(repo_path, &draft, entity_type, &key, &json)?,
                human,
            ),
            DraftCommands::Delete {
                draft,
                entity_type,
                key,
            } => output(
                &commands::draft_delete(repo_path, &draft, entity_type, &key)?,
                human,
            ),
            DraftCommands::Revert {
                draft,
                entity_type,
                key,
            } => output(
                &commands::draft_revert(repo_path, &draft, entity_type, &key)?,
                human,
            ),
        },

        Commands::Module { command } => match command {
            ModuleCommands::Derive {
                module,
                draft,
                max_depth,
                provenance,
            } => {
                let config = load_config(repo_path, &depth_overrides(max_depth)?);
                let mut options = config.derivation_options();
                if provenance {
                    options = options.with_provenance();
                }
                output(
                    &commands::module_derive(repo_path, draft.as_deref(), &module, &options)?,
                    human,
                )
            }
            ModuleCommands::Stage {
                draft,
                module,
                max_depth,
            } => {
                let config = load_config(repo_path, &depth_overrides(max_depth)?);
                output(
                    &commands::module_stage(
                        repo_path,
                        &draft,
                        &module,
                        &config.derivation_options(),
                    )?,
                    human,
                )
            }
        },

        Commands::Graph { command } => match command {
            GraphCommands::Neighborhood {
                entity_type,
                key,
                depth,
                draft,
            } => {
                let mut overrides = ConfigOverrides::new();
                if let Some(depth) = depth {
                    overrides = overrides.with_graph_depth(depth);
                }
                let config = load_config(repo_path, &overrides);
                output(
                    &commands::graph_neighborhood(
                        repo_path,
                        draft.as_deref(),
                        entity_type,
                        &key,
                        config.graph_depth.value,
                        &config.derivation_options(),
                    )?,
                    human,
                )
            }
            GraphCommands::Affected { draft } => {
                output(&commands::graph_affected(repo_path, &draft)?, human)
            }
        },

        Commands::Config { command } => match command {
            ConfigCommands::Get { key } => output(&commands::config_get(repo_path, &key)?, human),
            ConfigCommands::Set { key, value, system } => output(
                &commands::config_set(repo_path, &key, &value, system)?,
                human,
            ),
            ConfigCommands::List => output(&commands::config_list(repo_path)?, human),
            ConfigCommands::Show => output(
                &commands::config_show(repo_path, &ConfigOverrides::default())?,
                human,
            ),
        },

        Commands::Log { limit } => output(&commands::log_show(repo_path, limit)?, human),
    }

    Ok(())
}

/// CLI override for the derivation round limit, validated like config values.
fn depth_overrides(max_depth: Option<usize>) -> Result<ConfigOverrides, ontohub::Error> {
    let overrides = ConfigOverrides::new();
    match max_depth {
        Some(depth) if !MAX_DEPTH_RANGE.contains(&depth) => Err(ontohub::Error::InvalidInput(
            format!(
                "max-depth must be {}-{}, got {}",
                MAX_DEPTH_RANGE.start(),
                MAX_DEPTH_RANGE.end(),
                depth
            ),
        )),
        Some(depth) => Ok(overrides.with_max_depth(depth)),
        None => Ok(overrides),
    }
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

/// Serialize command to extract name and arguments for logging.
fn serialize_command(command: &Commands) -> (String, serde_json::Value) {
    use serde_json::json;

    match command {
        Commands::System { command } => match command {
            SystemCommands::Init => ("system init".to_string(), json!({})),
            SystemCommands::Status => ("system status".to_string(), json!({})),
        },

        Commands::Sync { source } => ("sync".to_string(), json!({ "source": source })),

        Commands::Entity { command } => match command {
            EntityCommands::Show {
                entity_type,
                key,
                draft,
            } => (
                "entity show".to_string(),
                json!({ "entity_type": entity_type, "key": key, "draft": draft }),
            ),
            EntityCommands::List { entity_type, draft } => (
                "entity list".to_string(),
                json!({ "entity_type": entity_type, "draft": draft }),
            ),
            EntityCommands::Members {
                category,
                inherited,
                draft,
            } => (
                "entity members".to_string(),
                json!({ "category": category, "inherited": inherited, "draft": draft }),
            ),
        },

        Commands::Draft { command } => match command {
            DraftCommands::Create { title } => {
                ("draft create".to_string(), json!({ "title": title }))
            }
            DraftCommands::List { status } => ("draft list".to_string(), json!({ "status": status })),
            DraftCommands::Show { draft } => ("draft show".to_string(), json!({ "draft": draft })),
            DraftCommands::Discard { draft } => {
                ("draft discard".to_string(), json!({ "draft": draft }))
            }
            DraftCommands::Submit { draft } => {
                ("draft submit".to_string(), json!({ "draft": draft }))
            }
            DraftCommands::New {
                draft,
                entity_type,
                key,
                json: doc,
            } => (
                "draft new".to_string(),
                json!({ "draft": draft, "entity_type": entity_type, "key": key, "json": doc }),
            ),
            DraftCommands::Update {
                draft,
                entity_type,
                key,
                patch,
            } => (
                "draft update".to_string(),
                json!({ "draft": draft, "entity_type": entity_type, "key": key, "patch": patch }),
            ),
            DraftCommands::Replace {
                draft,
                entity_type,
                key,
                json: doc,
            } => (
                "draft replace".to_string(),
                json!({ "draft": draft, "entity_type": entity_type, "key": key, "json": doc }),
            ),
            DraftCommands::Delete {
                draft,
                entity_type,
                key,
            } => (
                "draft delete".to_string(),
                json!({ "draft": draft, "entity_type": entity_type, "key": key }),
            ),
            DraftCommands::Revert {
                draft,
                entity_type,
                key,
            } => (
                "draft revert".to_string(),
                json!({ "draft": draft, "entity_type": entity_type, "key": key }),
            ),
        },

        Commands::Module { command } => match command {
            ModuleCommands::Derive {
                module,
                draft,
                max_depth,
                provenance,
            } => (
                "module derive".to_string(),
                json!({ "module": module, "draft": draft, "max_depth": max_depth, "provenance": provenance }),
            ),
            ModuleCommands::Stage {
                draft,
                module,
                max_depth,
            } => (
                "module stage".to_string(),
                json!({ "draft": draft, "module": module, "max_depth": max_depth }),
            ),
        },

        Commands::Graph { command } => match command {
            GraphCommands::Neighborhood {
                entity_type,
                key,
                depth,
                draft,
            } => (
                "graph neighborhood".to_string(),
                json!({ "entity_type": entity_type, "key": key, "depth": depth, "draft": draft }),
            ),
            GraphCommands::Affected { draft } => {
                ("graph affected".to_string(), json!({ "draft": draft }))
            }
        },

        Commands::Config { command } => match command {
            ConfigCommands::Get { key } => ("config get".to_string(), json!({ "key": key })),
            ConfigCommands::Set { key, value, system } => (
                "config set".to_string(),
                json!({ "key": key, "value": value, "system": system }),
            ),
            ConfigCommands::List => ("config list".to_string(), json!({})),
            ConfigCommands::Show => ("config show".to_string(), json!({})),
        },

        Commands::Log { limit } => ("log".to_string(), json!({ "limit": limit })),
    }
}
