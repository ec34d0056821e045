//! `synapse-cli` – Synapse vehicle bridge
//!
//! This binary hosts the topic bus and the TCP bridge.  It:
//!
//! 1. Initialises tracing (optionally exporting spans over OTLP).
//! 2. Loads `~/.synapse/config.toml` (or `$SYNAPSE_CONFIG`), falling back to
//!    defaults, then applies `SYNAPSE_*` environment overrides.
//! 3. Binds the bridge port and serves one client at a time until Ctrl-C.
//!
//! Subcommands:
//!
//! | Command | Effect |
//! |---|---|
//! | `synapse` / `synapse serve` | Run the bridge. |
//! | `synapse init` | Write the default config file. |
//! | `synapse topics` | Print the topic catalog and the configured routes. |

mod config;

use colored::Colorize;
use tracing::{error, info};

use synapse_middleware::{Bridge, Direction, Topics};
use synapse_runtime::telemetry::init_tracing;
use synapse_types::SynapseError;

fn main() {
    let guard = init_tracing("synapse");
    if guard.is_exporting() {
        info!("exporting spans over OTLP");
    }

    let command = std::env::args().nth(1);
    match command.as_deref() {
        None | Some("serve") => serve(),
        Some("init") => init(),
        Some("topics") => topics(),
        Some("help" | "-h" | "--help") => print_usage(),
        Some(other) => {
            eprintln!("{}: unknown command `{}`", "error".red().bold(), other);
            print_usage();
            std::process::exit(2);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn serve() {
    print_banner();

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            std::process::exit(1);
        }
    };
    println!(
        "  Config: {}",
        config::config_path().display().to_string().bold()
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_bridge(cfg)) {
        error!(error = %e, "bridge stopped");
        println!("{}: {}", "Bridge error".red(), e);
        std::process::exit(1);
    }
}

async fn run_bridge(cfg: config::Config) -> Result<(), SynapseError> {
    let topics = Topics::new();
    let mut bridge = Bridge::new(&topics, cfg.to_bridge_config())?;
    let mut listener = bridge.bind().await?;

    println!(
        "  Listening on port {}  (Ctrl-C to stop)\n",
        cfg.port.to_string().bold().cyan()
    );

    let outcome = tokio::select! {
        () = bridge.run(&mut listener) => Ok(()),
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| SynapseError::Transport(format!("ctrl-c handler: {e}")))
        }
    };

    if outcome.is_ok() {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
    }
    let stats = bridge.stats();
    info!(
        connections = stats.connections,
        frames_in = stats.frames_in,
        frames_out = stats.frames_out,
        heartbeats = stats.heartbeats,
        decode_faults = stats.decode_faults,
        transport_errors = stats.transport_errors,
        "bridge shut down"
    );
    outcome
}

fn init() {
    let path = config::config_path();
    if path.exists() {
        println!(
            "  Config already exists at {}; leaving it untouched.",
            path.display().to_string().bold()
        );
        return;
    }
    match config::save(&config::Config::default()) {
        Ok(path) => println!(
            "  {} Config saved to {}",
            "✓".green().bold(),
            path.display().to_string().bold()
        ),
        Err(e) => {
            println!("{}: {}", "Error saving config".red(), e);
            std::process::exit(1);
        }
    }
}

fn topics() {
    let cfg = config::load().unwrap_or_else(|e| {
        println!("{}: {}", "Config error".red(), e);
        println!("  Using default configuration.");
        config::Config::default()
    });

    let topics = Topics::new();
    println!("  {}", "Topics".bold());
    for info in topics.info() {
        println!("    {:<16} {}", info.name, info.kind.to_string().dimmed());
    }

    println!("\n  {}", "Bridge routes".bold());
    for route in &cfg.routes {
        let arrow = match route.direction {
            Direction::Inbound => "network → bus".green(),
            Direction::Outbound => "bus → network".cyan(),
        };
        println!("    {:<16} {:<18} {}", route.topic, route.kind.to_string(), arrow);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   _____                              "#.bold().cyan());
    println!("{}", r#"  / ___/__  ______  ____ _____  ________"#.bold().cyan());
    println!("{}", r#"  \__ \/ / / / __ \/ __ `/ __ \/ ___/ _ \"#.bold().cyan());
    println!("{}", r#" ___/ / /_/ / / / / /_/ / /_/ (__  )  __/"#.bold().cyan());
    println!("{}", r#"/____/\__, /_/ /_/\__,_/ .___/____/\___/ "#.bold().cyan());
    println!("{}", r#"     /____/           /_/               "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Synapse".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Vehicle topic bus and network bridge");
    println!();
}

fn print_usage() {
    println!("Usage: synapse [serve | init | topics | help]");
}
