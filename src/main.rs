use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skillport_core::envfile::EmbeddingEnvUpdate;
use skillport_core::{Config, EmbeddingProvider, ProviderKind, Settings};
use skillport_skills::{
    FileWatcher, RebuildReport, SearchService, SkillIndex, SkillLoader, SkillRepository,
};
use skillport_tools::{registry_for, SkillContext, Transport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "skillport",
    about = "Hybrid search and loading of agent skills",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/skillport/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Dotenv file with embedding settings
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Override the skills directory
    #[arg(long, global = true)]
    skills_dir: Option<PathBuf>,

    /// Override the index snapshot path
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the skill tools (stdio by default)
    Serve {
        /// Serve over HTTP instead of stdio
        #[arg(long)]
        http: bool,
        /// Bind host
        #[arg(long)]
        host: Option<String>,
        /// Bind port
        #[arg(long)]
        port: Option<u16>,
        /// Ignore the stored index and rebuild from scratch
        #[arg(long)]
        reindex: bool,
        /// Reindex skills when files change
        #[arg(long)]
        watch: bool,
    },

    /// Search skills
    Search {
        query: String,
        /// Maximum number of results
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a skill's instructions
    Show { skill_id: String },

    /// List indexed skills
    List,

    /// Rebuild the index from scratch
    Reindex,

    /// Write embedding settings to the env file
    SetEmbedding {
        /// none, local, openai, openai_compatible, dashscope, zhipu, baidu, tencent
        provider: String,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
    },
}

/// Everything built from a validated configuration.
struct Services {
    index: Arc<SkillIndex>,
    ctx: Arc<SkillContext>,
    report: RebuildReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref(), Some(&cli.env_file))?;
    if let Some(dir) = &cli.skills_dir {
        settings.skills_dir = Some(dir.clone());
    }
    if let Some(path) = &cli.db_path {
        settings.db_path = Some(path.clone());
    }

    // Logs go to stderr so the stdio transport owns stdout.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        match std::env::var("RUST_LOG") {
            Ok(directives) => EnvFilter::new(directives),
            Err(_) => EnvFilter::new(settings.log_level.as_deref().unwrap_or("info")),
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::SetEmbedding {
        provider,
        base_url,
        model,
        api_key,
    } = &cli.command
    {
        return set_embedding(&cli.env_file, provider, base_url, model, api_key);
    }

    let mut config = settings.validate()?;
    tracing::info!(
        "Embedding provider: {}, skills: {}",
        config.embedding.provider(),
        config.skills_dir.display()
    );

    match cli.command {
        Commands::Serve {
            http,
            host,
            port,
            reindex,
            watch,
        } => {
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            let transport = if http { Transport::Http } else { Transport::Stdio };
            let services = bootstrap(&config, reindex).await?;

            let _watcher = if watch {
                let mut watcher = FileWatcher::new(services.index.repository().clone())?;
                watcher.watch(&config.skills_dir)?;
                watcher.spawn_indexer(services.index.clone());
                Some(watcher)
            } else {
                None
            };

            let registry = Arc::new(registry_for(services.ctx.clone(), transport));
            match transport {
                Transport::Http => {
                    let state = skillport_server::AppState::new(
                        config.server.clone(),
                        registry,
                        services.index.clone(),
                    );
                    skillport_server::serve(state).await?;
                }
                Transport::Stdio => skillport_server::serve_stdio(registry).await?,
            }
        }
        Commands::Search { query, limit, json } => {
            let services = bootstrap(&config, false).await?;
            if json {
                let results = services.ctx.search.search(&query, limit).await?;
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                let registry = registry_for(services.ctx, Transport::Stdio);
                let args = serde_json::json!({ "query": query, "limit": limit });
                print_output(registry.execute("search_skills", None, args).await)?;
            }
        }
        Commands::Show { skill_id } => {
            let services = bootstrap(&config, false).await?;
            let registry = registry_for(services.ctx, Transport::Stdio);
            let args = serde_json::json!({ "skill_id": skill_id });
            print_output(registry.execute("load_skill", None, args).await)?;
        }
        Commands::List => {
            let services = bootstrap(&config, false).await?;
            let entries = services.index.snapshot();
            if entries.is_empty() {
                println!("No skills indexed.");
            }
            for entry in entries {
                println!("{}: {}", entry.id, entry.description);
            }
        }
        Commands::Reindex => {
            let services = bootstrap(&config, true).await?;
            let report = &services.report;
            let store = services.index.store_path().unwrap_or(config.index_path.as_path());
            println!(
                "Indexed {} skill(s) into {} ({} skipped)",
                report.total_indexed(),
                store.display(),
                report.skipped
            );
        }
        Commands::SetEmbedding { .. } => unreachable!("handled before validation"),
    }

    Ok(())
}

/// Build the provider, seed and index the skills. Runs only after the
/// configuration validated.
async fn bootstrap(config: &Config, fresh: bool) -> Result<Services> {
    let provider = Arc::new(EmbeddingProvider::from_config(&config.embedding)?);

    let repository = SkillRepository::new(&config.skills_dir);
    repository
        .seed_builtin()
        .with_context(|| format!("Failed to seed {}", config.skills_dir.display()))?;

    let index = SkillIndex::new(repository.clone(), provider).with_store(&config.index_path);
    if !fresh {
        if let Err(e) = index.load_snapshot() {
            tracing::warn!("Ignoring stored index: {}", e);
        }
    }
    let index = Arc::new(index);
    let report = index.rebuild().await?;

    let ctx = SkillContext::new(SearchService::new(index.clone()), SkillLoader::new(repository));
    Ok(Services { index, ctx, report })
}

fn print_output(output: skillport_core::ToolOutput) -> Result<()> {
    let text = output.first_text().unwrap_or_default();
    if output.is_error {
        anyhow::bail!("{}", text.trim_start_matches("Error: "));
    }
    println!("{}", text);
    Ok(())
}

fn set_embedding(
    env_file: &Path,
    provider: &str,
    base_url: &Option<String>,
    model: &Option<String>,
    api_key: &Option<String>,
) -> Result<()> {
    let provider: ProviderKind = provider.parse()?;
    let plan = EmbeddingEnvUpdate::for_provider(
        provider,
        base_url.as_deref(),
        model.as_deref(),
        api_key.as_deref(),
    )?;
    plan.apply(env_file)
        .with_context(|| format!("Failed to update {}", env_file.display()))?;

    println!("Embedding provider set to '{}' in {}", provider, env_file.display());
    for (key, value) in &plan.updates {
        let shown = if key.contains("API_KEY") { "***" } else { value.as_str() };
        println!("  {}={}", key, shown);
    }
    for key in &plan.removals {
        println!("  removed {}", key);
    }
    Ok(())
}
