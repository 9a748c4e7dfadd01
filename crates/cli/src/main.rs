use agentchat::agents::{AgentKey, AgentRegistry};
use agentchat::conversation::{Feedback, MessageId, Sender};
use agentchat::dialogue::DialogueController;
use agentchat::transport::HttpTransport;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "agentchat")]
#[command(about = "Agentchat CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Write a default configuration file if none exists.
    Init {
        /// Config file path (default: AGENTCHAT_CONFIG_PATH or ~/.agentchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List the configured agents.
    Agents {
        /// Config file path (default: AGENTCHAT_CONFIG_PATH or ~/.agentchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the widget gateway (HTTP + WebSocket). One widget session per connection.
    Serve {
        /// Config file path (default: AGENTCHAT_CONFIG_PATH or ~/.agentchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// WebSocket and HTTP port (default from config or 15152)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Chat with the agents from the terminal (interactive).
    Chat {
        /// Config file path (default: AGENTCHAT_CONFIG_PATH or ~/.agentchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Agent to start with (support or sales).
        #[arg(long, short, value_name = "AGENT")]
        agent: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("agentchat {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Agents { config }) => {
            if let Err(e) = run_agents(config) {
                log::error!("agents failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, agent }) => {
            if let Err(e) = run_chat(config, agent).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(agentchat::config::default_config_path);
    if agentchat::config::init_config_file(&path)? {
        println!("wrote default configuration to {}", path.display());
    } else {
        println!("configuration already exists at {}", path.display());
    }
    Ok(())
}

fn run_agents(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = agentchat::config::load_config(config_path)?;
    let registry = AgentRegistry::from_config(&config.agents);
    for p in registry.profiles() {
        println!("{:<8} {} (remote id: {})", p.key, p.display_title, p.remote_id);
    }
    Ok(())
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, _) = agentchat::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    log::info!("starting gateway on {}:{}", config.server.bind, config.server.port);
    agentchat::gateway::run_gateway(config).await
}

/// One line of terminal input.
#[derive(Debug, PartialEq, Eq)]
enum ChatCommand {
    Exit,
    Help,
    /// Clear all conversations, as closing the widget does.
    Close,
    Switch(String),
    Rate(MessageId, Feedback),
    /// Send the n-th (1-based) pending suggestion.
    Pick(usize),
    Say(String),
    Unknown(String),
}

fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let Some(rest) = input.strip_prefix('/') else {
        return Some(ChatCommand::Say(input.to_string()));
    };
    let mut parts = rest.split_whitespace();
    let cmd = parts.next().unwrap_or("").to_lowercase();
    let arg = parts.next();
    let rate = |value| {
        arg.and_then(|a| a.parse::<u64>().ok())
            .map(|id| ChatCommand::Rate(MessageId(id), value))
    };
    let parsed = match cmd.as_str() {
        "exit" | "quit" => Some(ChatCommand::Exit),
        "help" => Some(ChatCommand::Help),
        "close" => Some(ChatCommand::Close),
        "switch" => arg.map(|a| ChatCommand::Switch(a.to_string())),
        "up" => rate(Feedback::Positive),
        "down" => rate(Feedback::Negative),
        n => n.parse::<usize>().ok().filter(|&n| n > 0).map(ChatCommand::Pick),
    };
    Some(parsed.unwrap_or_else(|| ChatCommand::Unknown(input.to_string())))
}

const CHAT_HELP: &str = "commands: /switch <support|sales>, /<n> send suggestion n, /up <id>, /down <id>, /close, /exit";

/// Print agent messages not yet shown for `key`, then its pending suggestions.
async fn render(
    controller: &DialogueController,
    key: AgentKey,
    shown: &mut HashMap<AgentKey, usize>,
) {
    let snapshot = controller.snapshot(key).await;
    let seen = shown.entry(key).or_insert(0);
    if *seen > snapshot.messages.len() {
        *seen = 0;
    }
    for m in &snapshot.messages[*seen..] {
        if m.sender == Sender::Agent {
            println!("< [{}] {}  (#{})", snapshot.title, m.text, m.id.0);
        }
    }
    *seen = snapshot.messages.len();
    for (i, s) in snapshot.pending_suggestions.iter().enumerate() {
        println!("  /{} {}", i + 1, s);
    }
}

async fn run_chat(config_path: Option<PathBuf>, agent: Option<String>) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, _) = agentchat::config::load_config(config_path)?;
    let endpoint = agentchat::config::resolve_endpoint(&config);
    let timeout = Duration::from_secs(config.transport.timeout_secs.max(1));
    let transport = HttpTransport::new(endpoint, timeout)?;
    let controller = DialogueController::new(
        AgentRegistry::from_config(&config.agents),
        Arc::new(transport),
    );
    let mut current = match agent {
        Some(a) => a.parse::<AgentKey>()?,
        None => AgentKey::default(),
    };
    let mut shown = HashMap::new();
    controller.activate(current).await;
    println!("{}", CHAT_HELP);
    render(&controller, current, &mut shown).await;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "[{}]> ", current)?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let Some(command) = parse_command(&line) else {
            continue;
        };
        match command {
            ChatCommand::Exit => break,
            ChatCommand::Help => println!("{}", CHAT_HELP),
            ChatCommand::Unknown(input) => eprintln!("unknown command: {}", input),
            ChatCommand::Close => {
                controller.close().await;
                shown.clear();
                controller.activate(current).await;
                render(&controller, current, &mut shown).await;
            }
            ChatCommand::Switch(name) => match name.parse::<AgentKey>() {
                Ok(key) => {
                    current = key;
                    controller.activate(key).await;
                    render(&controller, key, &mut shown).await;
                }
                Err(e) => eprintln!("{}", e),
            },
            ChatCommand::Rate(id, value) => {
                if !controller.set_feedback(current, id, value).await {
                    eprintln!("no agent message #{} in this conversation", id.0);
                }
            }
            ChatCommand::Pick(n) => {
                let snapshot = controller.snapshot(current).await;
                match snapshot.pending_suggestions.get(n - 1) {
                    Some(text) => {
                        println!("> {}", text);
                        controller.submit(current, text).await;
                        render(&controller, current, &mut shown).await;
                    }
                    None => eprintln!("no suggestion {}", n),
                }
            }
            ChatCommand::Say(text) => {
                controller.submit(current, &text).await;
                render(&controller, current, &mut shown).await;
            }
        }
    }

    Ok(())
}
