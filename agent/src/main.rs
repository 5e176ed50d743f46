use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kube_agent::mcp::McpClient;

#[derive(Parser)]
#[command(name = "kube-agent")]
#[command(about = "Discover and call tools on MCP servers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// MCP config file (.mcp.json or .mcp.yaml)
    #[arg(long, short, global = true, env = "KUBE_AGENT_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List available tools from MCP servers
    Tools {
        /// Only list tools from a specific server
        #[arg(long)]
        server: Option<String>,
    },
    /// Show configured servers and their connection state
    Servers,
    /// Call a tool directly
    Call {
        /// Tool name
        tool: String,
        /// Arguments as JSON
        #[arg(long, short, conflicts_with = "arg")]
        args: Option<String>,
        /// Single argument as key=value (repeatable)
        #[arg(long, value_parser = parse_key_value)]
        arg: Vec<(String, Value)>,
    },
    /// Probe every server and report its health
    Health {
        /// Try to reconnect servers that are down
        #[arg(long)]
        reconnect: bool,
    },
    /// Run a shell command through a server's shell tool, or locally
    Exec {
        /// Command line, passed to the shell as one string
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
}

/// Parse `key=value`; the value is read as JSON when it parses, else as a string
fn parse_key_value(pair: &str) -> Result<(String, Value), String> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", pair))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{}'", pair));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "kube_agent=debug,info",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let client = McpClient::new(cli.config);
    client.start().await;

    let result = match cli.command {
        Commands::Tools { server } => run_tools(&client, server).await,
        Commands::Servers => run_servers(&client).await,
        Commands::Call { tool, args, arg } => run_call_tool(&client, &tool, args, arg).await,
        Commands::Health { reconnect } => run_health(&client, reconnect).await,
        Commands::Exec { command } => run_exec(&client, &command.join(" ")).await,
    };

    client.stop().await;
    result
}

async fn run_tools(client: &McpClient, server_filter: Option<String>) -> Result<()> {
    let tools = client.tool_infos().await;
    let tools: Vec<_> = match &server_filter {
        Some(s) => tools.into_iter().filter(|t| &t.server == s).collect(),
        None => tools,
    };

    if tools.is_empty() {
        println!("No tools found.");
        if client.registry().is_empty().await {
            println!("Create a .mcp.json or .mcp.yaml to configure MCP servers.");
        }
        return Ok(());
    }

    // tool_infos is grouped by server already
    let mut current: Option<&str> = None;
    for tool in &tools {
        if current != Some(tool.server.as_str()) {
            if current.is_some() {
                println!();
            }
            let count = tools.iter().filter(|t| t.server == tool.server).count();
            println!("=== {} ({} tools) ===", tool.server, count);
            current = Some(tool.server.as_str());
        }
        let desc = tool.description.lines().next().unwrap_or("");
        println!("  {} - {}", tool.name, desc);
    }

    Ok(())
}

async fn run_servers(client: &McpClient) -> Result<()> {
    let servers = client.servers().await;
    if servers.is_empty() {
        println!("No MCP servers configured.");
    }
    for label in servers {
        println!("{}", label);
    }
    Ok(())
}

async fn run_call_tool(
    client: &McpClient,
    tool_name: &str,
    args: Option<String>,
    pairs: Vec<(String, Value)>,
) -> Result<()> {
    let arguments = match args {
        Some(json) => serde_json::from_str(&json).context("Invalid JSON arguments")?,
        None if !pairs.is_empty() => Value::Object(pairs.into_iter().collect::<Map<_, _>>()),
        None => Value::Null,
    };

    let output = client.call_tool_by_name(tool_name, arguments).await?;
    println!("{}", output);
    Ok(())
}

async fn run_health(client: &McpClient, reconnect: bool) -> Result<()> {
    if reconnect {
        let recovered = client.reconnect_failed_servers().await;
        if !recovered.is_empty() {
            println!("Reconnected: {}\n", recovered.join(", "));
        }
    }

    let mut health: Vec<_> = client.health_check().await.into_iter().collect();
    health.sort();

    if health.is_empty() {
        println!("No MCP servers configured.");
        return Ok(());
    }

    let down = health.iter().filter(|(_, ok)| !ok).count();
    for (name, ok) in &health {
        println!("{} {}", if *ok { "✓" } else { "✗" }, name);
    }

    if down > 0 {
        anyhow::bail!("{} of {} MCP servers are down", down, health.len());
    }
    Ok(())
}

async fn run_exec(client: &McpClient, command: &str) -> Result<()> {
    let output = client.exec_shell(command).await?;
    print!("{}", output);
    if !output.ends_with('\n') {
        println!();
    }
    Ok(())
}
