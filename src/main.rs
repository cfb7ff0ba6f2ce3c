//! # Domain Harness CLI (`dom`)
//!
//! Operator interface for inspecting domains, exercising the capability
//! gate, and running retrieval against on-disk index bundles.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dom domains list` | Show the merged domain table |
//! | `dom domains show <slug>` | Show a domain's full resolved details |
//! | `dom check <tool> --domain <slug>` | Ask the gate whether a tool is allowed |
//! | `dom config show` | Show the normalized indexing configuration |
//! | `dom config reload` | Reload configuration and report the restart verdict |
//! | `dom search <query> --domain <slug>` | Retrieve top-N chunks from a domain index |
//!
//! ## Examples
//!
//! ```bash
//! dom domains list --custom ./domains.toml
//! dom check write_file --domain healthcare --path notes/visit.md --content x
//! dom config reload --settings ./settings.toml
//! dom search "prior authorization workflow" --domain healthcare --data-dir ./bundles
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use domain_harness::catalog;
use domain_harness::config::IndexConfigStore;
use domain_harness::embedder::create_embedder;
use domain_harness::gate::{self, ToolInvocation};
use domain_harness::models::{validate_custom_domains, DomainConfig};
use domain_harness::retriever::{DomainRetriever, DEFAULT_TOP_N};
use domain_harness::settings::FileSettings;

/// Domain Harness: domain selection, capability gating, and
/// domain-scoped retrieval for AI coding assistants.
#[derive(Parser)]
#[command(
    name = "dom",
    about = "Domain selection, capability gating, and domain-scoped retrieval",
    version
)]
struct Cli {
    /// Path to a TOML file of custom domain definitions.
    #[arg(long, global = true)]
    custom: Option<PathBuf>,

    /// Path to the persisted settings file (TOML).
    #[arg(long, global = true, default_value = "./settings.toml")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the domain catalog.
    Domains {
        #[command(subcommand)]
        command: DomainCommands,
    },

    /// Ask the capability gate whether a tool invocation is allowed.
    Check {
        /// Tool identifier (e.g. `write_file`).
        tool: String,

        /// Domain slug to check under.
        #[arg(long)]
        domain: String,

        /// Target file path of the invocation.
        #[arg(long)]
        path: Option<String>,

        /// Content payload; marks the invocation as a write.
        #[arg(long)]
        content: Option<String>,
    },

    /// Inspect or reload the indexing configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Retrieve the most relevant chunks for a query.
    Search {
        /// The search query string.
        query: String,

        /// Domain whose index to search.
        #[arg(long, default_value = "general")]
        domain: String,

        /// Directory holding per-domain index bundles.
        #[arg(long, default_value = "./bundles")]
        data_dir: PathBuf,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = DEFAULT_TOP_N)]
        top: usize,
    },
}

#[derive(Subcommand)]
enum DomainCommands {
    /// List all domains, built-in and custom, in merged order.
    List,
    /// Show a domain's full resolved details.
    Show {
        /// Domain slug.
        slug: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the normalized configuration and whether it is usable.
    Show,
    /// Reload the configuration and report the restart verdict.
    Reload,
}

fn load_custom_domains(path: Option<&PathBuf>) -> Result<Option<Vec<DomainConfig>>> {
    let Some(path) = path else {
        return Ok(None);
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read custom domains: {}", path.display()))?;

    #[derive(serde::Deserialize)]
    struct CustomDomainsFile {
        #[serde(default)]
        domains: Vec<DomainConfig>,
    }

    let parsed: CustomDomainsFile =
        toml::from_str(&content).with_context(|| "Failed to parse custom domains file")?;
    validate_custom_domains(&parsed.domains)?;
    Ok(Some(parsed.domains))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let customs = load_custom_domains(cli.custom.as_ref())?;

    match cli.command {
        Commands::Domains { command } => match command {
            DomainCommands::List => {
                let merged = catalog::merge_all(customs.as_deref());
                for domain in &merged {
                    let marker = if catalog::is_custom(&domain.slug, customs.as_deref()) {
                        " (custom)"
                    } else {
                        ""
                    };
                    let group_names: Vec<String> = domain
                        .groups
                        .iter()
                        .map(|g| g.group().to_string())
                        .collect();
                    println!(
                        "{:<14} {}{}\n    groups: {}",
                        domain.slug,
                        domain.name,
                        marker,
                        group_names.join(", ")
                    );
                }
            }
            DomainCommands::Show { slug } => {
                let details = catalog::resolve_full_details(&slug, customs.as_deref(), None, None);
                println!("slug:  {}", details.slug);
                println!("name:  {}", details.name);
                println!("role:  {}", details.role_definition);
                if let Some(when) = &details.when_to_use {
                    if !when.is_empty() {
                        println!("when:  {}", when);
                    }
                }
                for entry in &details.groups {
                    match entry.options().and_then(|o| o.file_regex.as_deref()) {
                        Some(pattern) => println!("group: {} (fileRegex: {})", entry.group(), pattern),
                        None => println!("group: {}", entry.group()),
                    }
                }
            }
        },

        Commands::Check {
            tool,
            domain,
            path,
            content,
        } => {
            let invocation = ToolInvocation {
                path,
                content,
                ..Default::default()
            };
            match gate::is_tool_allowed(
                &tool,
                &domain,
                customs.as_deref(),
                None,
                Some(&invocation),
                None,
            ) {
                Ok(true) => println!("allowed"),
                Ok(false) => {
                    println!("denied");
                    std::process::exit(1);
                }
                Err(violation) => {
                    eprintln!("denied: {}", violation);
                    std::process::exit(1);
                }
            }
        }

        Commands::Config { command } => {
            let settings = Arc::new(FileSettings::load(&cli.settings)?);
            let mut store = IndexConfigStore::new(settings);
            let outcome = store.reload().await;

            match command {
                ConfigCommands::Show => {
                    let config = store.get_config();
                    println!("enabled:      {}", config.is_enabled);
                    println!("provider:     {:?}", config.embedder_provider);
                    println!("model:        {}", config.resolved_model_id());
                    println!(
                        "dimension:    {}",
                        config
                            .resolved_dimension()
                            .map(|d| d.to_string())
                            .unwrap_or_else(|| "unknown".to_string())
                    );
                    println!("store:        {}", config.vector_store_type);
                    println!("store url:    {}", config.vector_store_url);
                    println!("configured:   {}", store.is_configured());
                }
                ConfigCommands::Reload => {
                    println!("configured:       {}", outcome.config.is_configured());
                    println!("requires restart: {}", outcome.requires_restart);
                }
            }
        }

        Commands::Search {
            query,
            domain,
            data_dir,
            top,
        } => {
            let settings = Arc::new(FileSettings::load(&cli.settings)?);
            let mut store = IndexConfigStore::new(settings);
            store.reload().await;

            if !store.is_configured() {
                anyhow::bail!(
                    "Indexing is not configured. Set provider credentials and a vector store in {}.",
                    cli.settings.display()
                );
            }

            let embedder: Arc<dyn domain_harness::embedder::Embedder> =
                Arc::from(create_embedder(store.get_config())?);
            let retriever = DomainRetriever::new(embedder, data_dir);

            let results = retriever.search(&query, &domain, top).await?;
            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }

            for (i, chunk) in results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {}",
                    i + 1,
                    chunk.score,
                    chunk.text.replace('\n', " ").trim()
                );
            }
        }
    }

    Ok(())
}
