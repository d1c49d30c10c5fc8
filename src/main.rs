use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use papertrail::config::{load_server_descriptors, Settings};
use papertrail::llm::{ModelClient, OpenAiClient};
use papertrail::manager::{ClientManager, InvocationOutput};
use papertrail::registry::CapabilityKind;
use papertrail::shortcut::{self, ShortcutCommand};
use papertrail::workflow::{ForcedWorkflow, OptionalWorkflow, PipelineOutcome};
use papertrail::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "papertrail")]
#[command(
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), env!("PAPERTRAIL_VERSION_SUFFIX")),
    about = "Multi-server MCP client with a research chat agent",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the server list (default: servers.json)
    #[arg(long, global = true, default_value = "servers.json")]
    servers: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat over all configured servers
    Chat {
        /// Run the fixed search/extract/summarize pipeline instead of
        /// letting the model choose tools
        #[arg(long)]
        forced: bool,
    },

    /// Show connection state and capability counts per server
    Servers,

    /// List every discovered tool
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "papertrail=debug"
    } else {
        "papertrail=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = Settings::load()?;
    let descriptors = load_server_descriptors(&cli.servers)?;

    let manager = Arc::new(ClientManager::new(&settings.limits));
    let report = manager.start(&descriptors).await?;

    for name in &report.connected {
        println!("{} connected to '{}'", "✓".green(), name);
    }
    for (name, error) in &report.failed {
        println!("{} '{}' unavailable: {}", "✗".red(), name, error);
    }
    for collision in &report.collisions {
        println!("{} {}", "!".yellow(), collision);
    }

    let result = match cli.command {
        Commands::Chat { forced } => run_chat(&settings, manager.clone(), forced).await,
        Commands::Servers => run_servers(&manager).await,
        Commands::Tools => run_tools(&manager).await,
    };

    manager.shutdown().await;
    result
}

async fn run_servers(manager: &ClientManager) -> Result<()> {
    for (name, status) in manager.list_servers_status().await {
        let state = if status.connected {
            "connected".green()
        } else {
            "unavailable".red()
        };
        println!("{:<20} {:<12} {} capabilities", name, state, status.capabilities);
    }
    Ok(())
}

async fn run_tools(manager: &ClientManager) -> Result<()> {
    for entry in manager.list(CapabilityKind::Tool).await {
        println!("{} ({})", entry.name.bold(), entry.server);
        if !entry.description.is_empty() {
            println!("  {}", entry.description);
        }
    }
    Ok(())
}

async fn run_chat(settings: &Settings, manager: Arc<ClientManager>, forced: bool) -> Result<()> {
    let model: Arc<dyn ModelClient> = Arc::new(OpenAiClient::new(&settings.model));

    let mut optional = OptionalWorkflow::new(
        model.clone(),
        manager.clone(),
        settings.limits.max_tool_iterations,
    );
    let mut pipeline =
        ForcedWorkflow::new(model, manager.clone(), settings.workflow.clone());

    println!(
        "\n{} mode active. Type your queries, '@name args', '/prompts', or 'quit'.",
        if forced { "Forced tool" } else { "Optional tool" }.bold()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n{} ", "Query:".bold());
        tokio::io::stdout().flush().await?;

        let Some(line) = lines.next_line().await? else {
            break; // EOF
        };

        match shortcut::parse(&line) {
            ShortcutCommand::Empty => continue,
            ShortcutCommand::Quit => break,
            ShortcutCommand::Usage { usage } => println!("{}", usage),
            ShortcutCommand::Unknown { command } => {
                println!("unknown command: {}", command)
            }
            ShortcutCommand::ListPrompts => {
                let prompts = manager.list(CapabilityKind::Prompt).await;
                if prompts.is_empty() {
                    println!("No prompts available.");
                }
                for prompt in prompts {
                    println!("- {}: {}", prompt.name.bold(), prompt.description);
                    for param in &prompt.schema {
                        let marker = if param.required { " (required)" } else { "" };
                        println!("    {}{}", param.name, marker);
                    }
                }
            }
            ShortcutCommand::Prompt { name, tokens } => {
                match manager.prompt_from_tokens(&name, &tokens).await {
                    Ok((args, rendered)) => {
                        println!("Executing prompt '{}'...", name);
                        if forced {
                            // The pipeline wants a topic, not the full
                            // rendered prompt
                            let topic = args
                                .get("topic")
                                .and_then(|v| v.as_str())
                                .map(str::to_string)
                                .unwrap_or_else(|| rendered.rendered());
                            let limit = prompt_result_limit(&args);
                            report_pipeline(pipeline.run_with_limit(&topic, limit).await);
                        } else {
                            run_optional_turn(&mut optional, &rendered.rendered()).await;
                        }
                    }
                    Err(e) => println!("{} {}", "error:".red(), e),
                }
            }
            ShortcutCommand::Capability { name, tokens } => {
                match manager.invoke(&name, &tokens).await {
                    Ok(output) => print_invocation(&name, output),
                    Err(Error::NotFound { .. }) => {
                        // Bare @topic falls back to the topic resource
                        let uri = shortcut::topic_resource_uri(&name);
                        match manager.read_resource(&uri).await {
                            Ok(contents) => {
                                println!("Resource: {}\n{}", uri, contents.to_text())
                            }
                            Err(e) => println!("{} {}", "error:".red(), e),
                        }
                    }
                    Err(e) => println!("{} {}", "error:".red(), e),
                }
            }
            ShortcutCommand::Query(query) => {
                if forced {
                    report_pipeline(pipeline.run(&query).await);
                } else {
                    run_optional_turn(&mut optional, &query).await;
                }
            }
        }
    }

    Ok(())
}

async fn run_optional_turn(workflow: &mut OptionalWorkflow, query: &str) {
    match workflow.run_turn(query).await {
        Ok(outcome) => {
            if outcome.tool_calls_made > 0 {
                println!("({} tool call(s))", outcome.tool_calls_made);
            }
            println!("{}", outcome.text);
        }
        Err(e) => println!("{} {}", "error:".red(), e),
    }
}

/// A bound `num_papers` prompt argument caps the pipeline's search step.
/// Prompt arguments bind as strings, but tolerate a numeric value too.
fn prompt_result_limit(args: &serde_json::Value) -> Option<u32> {
    match args.get("num_papers")? {
        serde_json::Value::String(s) => s.parse().ok(),
        other => other.as_u64().map(|n| n as u32),
    }
}

fn report_pipeline(outcome: PipelineOutcome) {
    match outcome {
        PipelineOutcome::Done { summary, papers } => {
            println!("({} paper(s) analyzed)", papers.len());
            println!("{}", summary);
        }
        PipelineOutcome::Failed { state, error } => {
            println!("{} pipeline failed in {}: {}", "error:".red(), state, error)
        }
    }
}

fn print_invocation(name: &str, output: InvocationOutput) {
    match &output {
        InvocationOutput::Tool(result) if result.is_error => {
            println!("{} tool '{}' reported: {}", "error:".red(), name, result.to_text())
        }
        _ => println!("{}", output.to_text()),
    }
}
