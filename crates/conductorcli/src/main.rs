// crates/conductorcli/src/main.rs

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use conductorcore::ipc::{AutoForwarder, ForwardRules, IpcTransport, ProcessRole, StreamEndpoint};
use conductorcore::{
    ConductorEvent, EventBus, ExecutionGraph, ExecutionId, ExecutionRequest, ExecutionResult, NodeDefinition,
    Params,
};
use conductorruntime::{
    BridgeWorker, ConductorConfig, ConductorRuntime, ExecutionBridge, ExecutionConfig, ExecutionMode, FlowDocument,
    NodeRegistry,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Conductor node graph runner", long_about = None)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file
    Run {
        /// Path to a flow or node definition JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Execute in a child worker process
        #[arg(long)]
        remote: bool,

        #[command(flatten)]
        execution: ExecutionArgs,
    },

    /// Check a flow file for structural problems and unknown node types
    Validate {
        /// Path to a flow or node definition JSON file
        file: PathBuf,
    },

    /// Print the scheduling plan for a flow file
    Analyze {
        /// Path to a flow or node definition JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create an example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },

    /// Serve execution requests over stdin/stdout
    #[command(hide = true)]
    Worker {
        #[command(flatten)]
        execution: ExecutionArgs,
    },
}

#[derive(Args, Clone, Debug, Default)]
struct ExecutionArgs {
    /// Run the nodes of a level concurrently
    #[arg(long)]
    parallel: bool,

    /// Extra attempts per node after a failure
    #[arg(long)]
    retries: Option<u32>,

    /// Per-attempt node timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl ExecutionArgs {
    fn apply(&self, mut config: ExecutionConfig) -> ExecutionConfig {
        if self.parallel {
            config.mode = ExecutionMode::Parallel;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        config
    }

    /// The same flags, for handing to a worker process
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.parallel {
            args.push("--parallel".to_string());
        }
        if let Some(retries) = self.retries {
            args.extend(["--retries".to_string(), retries.to_string()]);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            args.extend(["--timeout-ms".to_string(), timeout_ms.to_string()]);
        }
        args
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout belongs to the IPC stream in worker mode, so logs always go to stderr
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            file,
            input,
            remote,
            execution,
        } => {
            let definition = load_definition(&file)?;
            let inputs = parse_inputs(input.as_deref())?;
            if remote {
                run_remote(definition, inputs, config, cli.config.as_deref(), execution).await?;
            } else {
                run_local(definition, inputs, config, execution).await?;
            }
        }

        Commands::Validate { file } => {
            validate_flow(&file, &config)?;
        }

        Commands::Analyze { file } => {
            analyze_flow(&file, config)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_flow(output)?;
        }

        Commands::Worker { execution } => {
            serve_worker(config, execution).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ConductorConfig> {
    let config = match path {
        Some(path) => ConductorConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ConductorConfig::default(),
    };
    Ok(config.with_env_overrides())
}

/// Accepts either a saved flow document or a bare node definition
fn load_definition(file: &Path) -> Result<NodeDefinition> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let json: serde_json::Value = serde_json::from_str(&raw)?;

    if json.get("definition").is_some() {
        let flow: FlowDocument = serde_json::from_value(json)?;
        println!("📋 Flow: {}", flow.name);
        Ok(flow.definition)
    } else {
        Ok(serde_json::from_value(json)?)
    }
}

fn parse_inputs(input: Option<&str>) -> Result<Params> {
    let Some(input) = input else {
        return Ok(Params::new());
    };
    match serde_json::from_str(input)? {
        serde_json::Value::Object(params) => Ok(params),
        _ => bail!("Input must be a JSON object"),
    }
}

fn build_runtime(config: ConductorConfig) -> ConductorRuntime {
    ConductorRuntime::with_registry(Arc::new(conductornodes::standard_registry()), config)
}

fn print_plan(graph: &ExecutionGraph) {
    println!("   Nodes: {}", graph.node_count());
    println!("   Levels: {}", graph.level_count());
    println!("   Max parallelism: {}", graph.max_parallelism);
    println!("   Total weight: {}", graph.total_weight);
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling execution");
            token.cancel();
        }
    });
}

async fn run_local(
    definition: NodeDefinition,
    inputs: Params,
    config: ConductorConfig,
    execution: ExecutionArgs,
) -> Result<()> {
    let execution_config = execution.apply(config.execution.clone());
    let runtime = build_runtime(config);

    let graph = runtime.analyze(&definition)?;
    println!("🚀 Running {} ({})", definition.id, definition.node_type);
    print_plan(&graph);
    println!();

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        let mut last_reported = -1.0;
        while let Ok(event) = events.recv().await {
            if let ConductorEvent::Progress(progress) = event {
                if (progress.progress - last_reported).abs() >= 1.0 || progress.progress >= 100.0 {
                    last_reported = progress.progress;
                    println!("  📊 {:>5.1}%  {}", progress.progress, progress.message);
                }
            }
        }
    });

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let execution_id = ExecutionId::generate();
    let outcome = runtime
        .execute_with(&definition, inputs, &execution_config, execution_id.clone(), &cancel)
        .await?;

    // Let the last progress lines print
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("   Execution ID: {}", execution_id);
    if let Some(failed) = &outcome.metadata.failed_node {
        println!("   Failed node: {}", failed);
    }
    print_result(&outcome.result)
}

async fn run_remote(
    definition: NodeDefinition,
    inputs: Params,
    config: ConductorConfig,
    config_path: Option<&Path>,
    execution: ExecutionArgs,
) -> Result<()> {
    let exe = std::env::current_exe().context("cannot locate the conductor executable")?;
    let mut command = Command::new(exe);
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    command
        .arg("worker")
        .args(execution.to_args())
        .env(ProcessRole::ENV_VAR, "renderer")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = command.spawn().context("failed to start worker process")?;
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("worker stdout unavailable"))?;
    let stdin = child.stdin.take().ok_or_else(|| anyhow!("worker stdin unavailable"))?;
    tracing::info!(pid = child.id(), "Worker process started");

    let endpoint = StreamEndpoint::spawn(stdout, stdin);
    let transport = Arc::new(IpcTransport::main());
    transport.connect(endpoint)?;

    let bus = EventBus::new(config.event_buffer_size);
    let forwarder = AutoForwarder::new(config.domain.clone(), bus.clone(), transport, ForwardRules::requester())?;
    forwarder.start();

    let bridge = ExecutionBridge::new(bus, config.bridge_timeout());
    bridge.on_progress(|progress| {
        println!("  📊 {:>5.1}%  {}", progress.progress, progress.message);
    });

    let mut request = ExecutionRequest::new(definition, inputs);
    request.options.timeout = Some(config.bridge_timeout_ms);
    println!("🚀 Running {} in worker process (execution {})", request.node_id, request.id);
    println!();

    let handle = bridge.execute_request(request)?;
    let result = tokio::select! {
        result = handle => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping worker");
            forwarder.stop();
            child.kill().await.ok();
            bail!("execution interrupted");
        }
    };

    forwarder.stop();
    drop(bridge);
    child.kill().await.ok();

    let result = result?;
    println!();
    print_result(&result)
}

fn print_result(result: &ExecutionResult) -> Result<()> {
    println!("   Executed: {} nodes in {}ms", result.executed_nodes.len(), result.duration);

    if result.success {
        println!("✨ Execution completed successfully");
        if let Some(data) = &result.data {
            println!();
            println!("📤 Output:");
            println!("{}", serde_json::to_string_pretty(data)?);
        }
        Ok(())
    } else {
        let message = result.error_message().unwrap_or("unknown error");
        println!("💥 Execution failed: {}", message);
        bail!("execution failed: {}", message)
    }
}

async fn serve_worker(config: ConductorConfig, execution: ExecutionArgs) -> Result<()> {
    let mut config = config;
    config.execution = execution.apply(config.execution);
    let domain = config.domain.clone();
    let runtime = Arc::new(build_runtime(config));

    let endpoint = StreamEndpoint::spawn(tokio::io::stdin(), tokio::io::stdout());
    let transport = Arc::new(IpcTransport::renderer(endpoint.clone())?);
    let forwarder = AutoForwarder::new(domain, runtime.event_bus().clone(), transport, ForwardRules::worker())?;
    forwarder.start();

    let worker = BridgeWorker::new(runtime);
    worker.start();
    tracing::info!("Worker ready");

    tokio::select! {
        _ = endpoint.closed() => tracing::info!("Parent closed the connection"),
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    worker.stop();
    forwarder.stop();
    Ok(())
}

fn validate_flow(file: &Path, config: &ConductorConfig) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let definition = load_definition(file)?;
    let runtime = build_runtime(config.clone());
    let graph = runtime.analyze(&definition)?;

    let mut unknown = Vec::new();
    collect_unknown_types(&definition, runtime.registry(), &mut unknown);
    if !unknown.is_empty() {
        for (node_id, node_type) in &unknown {
            println!("   ❌ Node {} has unknown type {}", node_id, node_type);
        }
        bail!("{} node(s) use unknown types", unknown.len());
    }

    println!("✅ Flow is valid:");
    print_plan(&graph);
    Ok(())
}

fn collect_unknown_types(definition: &NodeDefinition, registry: &NodeRegistry, unknown: &mut Vec<(String, String)>) {
    if definition.is_group() {
        for child in &definition.children {
            collect_unknown_types(child, registry, unknown);
        }
    } else if !registry.contains(&definition.node_type) {
        unknown.push((definition.id.to_string(), definition.node_type.clone()));
    }
}

fn analyze_flow(file: &Path, config: ConductorConfig) -> Result<()> {
    let definition = load_definition(file)?;
    let graph = build_runtime(config).analyze(&definition)?;

    println!("🧭 Execution plan for {}", definition.id);
    print_plan(&graph);
    println!();

    for (index, level) in graph.execution_order.iter().enumerate() {
        let names: Vec<String> = level
            .iter()
            .map(|id| match graph.node(id) {
                Some(node) => format!("{} ({}, weight {})", id, node.node_type, node.weight),
                None => id.to_string(),
            })
            .collect();
        println!("  Level {}: {}", index, names.join(", "));
    }

    let path: Vec<&str> = graph.critical_path.iter().map(|id| id.as_str()).collect();
    println!();
    println!("  Critical path: {} (weight {})", path.join(" → "), graph.critical_path_weight);
    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = conductornodes::standard_registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_flow(output: PathBuf) -> Result<()> {
    let definition = NodeDefinition::new("example", "group")
        .with_name("Fetch and log")
        .with_child(
            NodeDefinition::new("fetch", "http.request")
                .with_name("Fetch Data")
                .with_param("method", "GET"),
        )
        .with_child(NodeDefinition::new("wait", "time.delay").with_param("delay_ms", 500))
        .with_child(NodeDefinition::new("log", "debug.log").with_name("Log Response"))
        .with_edge("fetch", "log")
        .with_edge("wait", "log");

    let flow = FlowDocument::new("Example HTTP Flow", definition)
        .with_description("Fetches data from an API and logs the result");

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  conductor run --file {} --input '{{\"url\": \"https://api.github.com/zen\"}}'",
        output.display()
    );

    Ok(())
}
