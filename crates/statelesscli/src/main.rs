// crates/statelesscli/src/main.rs

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use statelesscore::{EndpointRef, FlowSpecification, Payload, ProcessGroup, ProcessorSpec};
use statelessruntime::{BundleResolver, EngineConfig, Outcome, StatelessEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stateless")]
#[command(about = "Stateless flow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one invocation of a flow
    Run {
        /// Path to the engine config JSON file
        #[arg(short, long)]
        config: PathBuf,

        /// File whose bytes become the input payload content
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Input payload attribute, as key=value
        #[arg(short, long = "attr", value_parser = parse_key_value)]
        attrs: Vec<(String, String)>,

        /// Flow parameter value, as name=value
        #[arg(short, long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,

        /// Show debug output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Load, validate and resolve a flow without running it
    Validate {
        /// Path to the engine config JSON file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// List the extension types found in library directories
    Extensions {
        /// Library directory; the first is searched first
        #[arg(short, long = "lib", required = true)]
        libs: Vec<PathBuf>,
    },

    /// Create an example library, flow and engine config
    Init {
        /// Target directory
        #[arg(short, long, default_value = "stateless-example")]
        dir: PathBuf,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            input,
            attrs,
            params,
            verbose,
        } => {
            init_logging(verbose);
            run_flow(&config, input, attrs, params).await?;
        }

        Commands::Validate { config } => {
            init_logging(false);
            validate_flow(&config).await?;
        }

        Commands::Extensions { libs } => {
            init_logging(false);
            list_extensions(&libs).await?;
        }

        Commands::Init { dir } => {
            init_logging(false);
            create_example(&dir).await?;
        }
    }

    Ok(())
}

fn load_config(config_path: &Path) -> Result<EngineConfig> {
    let config = EngineConfig::from_file(config_path)
        .with_context(|| format!("reading config {}", config_path.display()))?;
    tracing::debug!(
        "Config {}: library {}, {} additional, timeout {:?}",
        config_path.display(),
        config.library_directory.display(),
        config.additional_library_directories.len(),
        config.timeout_duration
    );
    Ok(config)
}

async fn run_flow(
    config_path: &Path,
    input: Option<PathBuf>,
    attrs: Vec<(String, String)>,
    params: Vec<(String, String)>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    config.parameters.extend(params);
    let engine = StatelessEngine::new(config, Arc::new(statelessnodes::catalog()));

    let payload = match input {
        Some(path) => {
            let content = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading input {}", path.display()))?;
            Some(Payload::new(content).with_attributes(attrs))
        }
        None if !attrs.is_empty() => Some(Payload::empty().with_attributes(attrs)),
        None => None,
    };

    let result = engine.invoke(payload).await?;

    println!("Invocation {} {:?} in {}ms", result.invocation_id, result.status, result.duration.as_millis());
    for routed in &result.outcomes {
        println!("  {} ({} bytes)", routed.outcome, routed.payload.size());
        for (key, value) in routed.payload.attributes() {
            println!("      {} = {}", key, value);
        }
        if routed.outcome == Outcome::Output {
            if let Some(text) = routed.payload.content_str().filter(|t| t.len() <= 200) {
                println!("      | {}", text.replace('\n', "\n      | "));
            }
        }
    }

    if !result.bulletins.is_empty() {
        println!();
        println!("Bulletins:");
        for bulletin in &result.bulletins {
            println!(
                "  [{}] {} ({}): {}",
                bulletin.severity, bulletin.source_id, bulletin.source_type, bulletin.message
            );
        }
    }

    engine.shutdown().await;
    Ok(())
}

async fn validate_flow(config_path: &Path) -> Result<()> {
    let engine = StatelessEngine::new(load_config(config_path)?, Arc::new(statelessnodes::catalog()));
    let prepared = engine.validate().await?;

    println!("Flow '{}' is valid", prepared.graph.name);
    println!("   Processors: {}", prepared.flow.processors.len());
    println!("   Input ports: {}", prepared.graph.root_input_port_names().join(", "));
    for type_id in prepared.extensions.types() {
        if let Some(bundle) = prepared.extensions.bundle_for(&type_id) {
            println!("   {} <- {}", type_id, bundle.manifest.coordinate());
        }
    }
    for warning in &prepared.extensions.warnings {
        println!("   warning: {}", warning);
    }
    Ok(())
}

async fn list_extensions(libs: &[PathBuf]) -> Result<()> {
    let (primary, additional) = libs
        .split_first()
        .ok_or_else(|| anyhow!("at least one --lib is required"))?;
    let catalog = Arc::new(statelessnodes::catalog());
    let resolver = BundleResolver::new(catalog.clone());
    println!("Compiled-in providers: {}", catalog.keys().join(", "));
    println!();

    for bundle in resolver.discover(primary, additional).await? {
        let available = catalog.provider(&bundle.manifest.provider).is_some();
        println!(
            "{} ({}){}",
            bundle.manifest.coordinate(),
            bundle.directory.display(),
            if available { "" } else { " [provider not compiled in]" }
        );
        for type_id in &bundle.manifest.extensions {
            println!("  - {}", type_id);
        }
    }
    Ok(())
}

async fn create_example(dir: &Path) -> Result<()> {
    let lib = dir.join("lib");
    tokio::fs::create_dir_all(&lib).await?;
    statelessnodes::install_all(&lib).await?;

    let root = ProcessGroup::new("root", "Split Lines")
        .with_input_port("in", "In")
        .with_output_port("out", "Out")
        .with_output_port("failure", "failure")
        .with_processor(
            ProcessorSpec::new("split", "text.split")
                .with_name("Split")
                .with_property("Lines Per Split", "#{Lines Per Split}"),
        )
        .with_processor(ProcessorSpec::new("log", "debug.log").with_property("Log Level", "warn"))
        .connect(EndpointRef::input_port("in"), EndpointRef::processor("split"), Vec::<String>::new())
        .connect(EndpointRef::processor("split"), EndpointRef::processor("log"), ["splits"])
        .connect(EndpointRef::processor("log"), EndpointRef::output_port("out"), ["success"]);
    let spec = FlowSpecification::new("Split Lines", root);
    tokio::fs::write(dir.join("flow.json"), spec.to_json_string()?).await?;

    let config = serde_json::json!({
        "specification": "flow.json",
        "library-directory": "lib",
        "input-port-name": "In",
        "failure-port-names": "failure",
        "timeout-duration": "5 sec",
        "parameters": { "Lines Per Split": "2" },
        "bulletin-level": "WARN"
    });
    tokio::fs::write(dir.join("engine.json"), serde_json::to_string_pretty(&config)?).await?;

    println!("Created example in {}", dir.display());
    println!();
    println!("Run it with:");
    println!("  stateless run --config {} --input <text file>", dir.join("engine.json").display());
    Ok(())
}
