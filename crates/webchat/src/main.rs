use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use webchat::config::{load_config, Config};
use webchat::eval::{self, EvalStage};
use webchat_core::{AgentMode, ChatEngine, SearchOutcome};

#[derive(Parser, Debug)]
#[command(name = "webchat")]
#[command(about = "Terminal chat with a local model, augmented by live web search", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v warn, -vv info, -vvv debug, -vvvv trace). RUST_LOG wins.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Log line format (logs always go to stderr).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    /// Config file (default: $WEBCHAT_CONFIG, else <config_dir>/webchat/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive chat loop (`exit` quits, `/reset` clears history).
    Chat(TurnArgs),
    /// Send one prompt and stream the reply to stdout.
    Ask {
        #[command(flatten)]
        turn: TurnArgs,
        /// The prompt (multiple words are joined with spaces).
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    /// Run only the search-augmentation pipeline and print what it produced (json).
    Search {
        /// Agent mode: explicit|conditional
        #[arg(long)]
        mode: Option<AgentMode>,
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    /// Replay labelled prompts through a helper stage and print a summary (json).
    Eval {
        /// Stage to evaluate: decide|query
        #[arg(value_enum)]
        stage: EvalStage,
        /// Cases: a `webchat_eval_cases` JSON fixture, or one prompt per line.
        #[arg(long)]
        cases: PathBuf,
        /// Times each case is run; consistency needs at least 2.
        #[arg(long, default_value_t = 5)]
        epochs: usize,
        /// Also write the summary to this path.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the resolved configuration (toml).
    Config,
    /// Print version info (json).
    Version,
}

#[derive(clap::Args, Debug)]
struct TurnArgs {
    /// Agent mode: explicit|conditional
    #[arg(long)]
    mode: Option<AgentMode>,
    /// Disable the web-search agent for this session.
    #[arg(long)]
    no_search: bool,
}

impl TurnArgs {
    fn apply(&self, cfg: &mut Config) {
        if let Some(mode) = self.mode {
            cfg.agent.mode = mode;
        }
        if self.no_search {
            cfg.agent.enabled = false;
        }
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

/// Optional `KEY=VALUE` env file named by `WEBCHAT_ENV_FILE`.
///
/// Never overrides variables already present in the process environment and
/// never logs values.
fn load_env_file() {
    let Ok(p) = std::env::var("WEBCHAT_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v.trim());
        }
    }
}

fn print_sources(outcome: &SearchOutcome) {
    if outcome.used && !outcome.source_urls.is_empty() {
        println!("\n\n[#] Web search context from:");
        for (i, url) in outcome.source_urls.iter().enumerate() {
            println!("[{}] - {}", i + 1, url);
        }
    }
}

/// Send one message and stream the reply to stdout.
async fn run_turn(engine: &ChatEngine, prompt: &str, banner: bool) -> Result<()> {
    let reply = engine.process_message(prompt).await?;
    let mut stream = reply.stream;
    let mut first = true;
    let mut stdout = std::io::stdout();
    while let Some(frag) = stream.next().await {
        let frag = frag.context("model reply stream failed")?;
        if first && banner {
            write!(stdout, "\n[#] Assistant: ")?;
        }
        first = false;
        write!(stdout, "{frag}")?;
        stdout.flush()?;
    }
    print_sources(&reply.outcome);
    Ok(())
}

async fn chat_loop(engine: ChatEngine) -> Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("[>] User: ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            println!();
            return Ok(());
        };
        let prompt = line.trim();
        if prompt.eq_ignore_ascii_case("exit") {
            return Ok(());
        }
        if prompt.is_empty() {
            continue;
        }
        if prompt == "/reset" {
            engine.reset().await;
            println!("[#] History cleared.\n");
            continue;
        }
        if let Err(e) = run_turn(&engine, prompt, true).await {
            tracing::error!(error = %format!("{e:#}"), "chat turn failed");
            eprintln!("\n[!] {e:#}");
        }
        println!("\n");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    let cli = Cli::parse();
    init_tracing(&cli);

    match &cli.command {
        Commands::Version => {
            let v = serde_json::json!({
                "schema_version": 1,
                "name": "webchat",
                "version": env!("CARGO_PKG_VERSION"),
            });
            println!("{v}");
        }
        Commands::Eval {
            stage,
            cases,
            epochs,
            out,
        } => {
            let cfg = load_config(cli.config.as_deref())?;
            let cases = eval::load_cases(cases, *stage)?;
            let client = webchat_local::http_client()?;
            let summary = eval::eval_stage(&cfg, &client, *stage, &cases, *epochs).await?;
            let pretty = serde_json::to_string_pretty(&summary)?;
            if let Some(out) = out {
                eval::ensure_parent_dir(out)?;
                std::fs::write(out, format!("{pretty}\n"))
                    .with_context(|| format!("write {}", out.display()))?;
            }
            println!("{pretty}");
        }
        Commands::Config => {
            let cfg = load_config(cli.config.as_deref())?;
            print!("{}", toml::to_string_pretty(&cfg.resolved())?);
        }
        Commands::Chat(turn) => {
            let mut cfg = load_config(cli.config.as_deref())?;
            turn.apply(&mut cfg);
            let client = webchat_local::http_client()?;
            chat_loop(webchat::build_engine(&cfg, &client)).await?;
        }
        Commands::Ask { turn, prompt } => {
            let mut cfg = load_config(cli.config.as_deref())?;
            turn.apply(&mut cfg);
            let client = webchat_local::http_client()?;
            let engine = webchat::build_engine(&cfg, &client);
            run_turn(&engine, &prompt.join(" "), false).await?;
            println!();
        }
        Commands::Search { mode, prompt } => {
            let mut cfg = load_config(cli.config.as_deref())?;
            if let Some(mode) = mode {
                cfg.agent.mode = *mode;
            }
            let client = webchat_local::http_client()?;
            let agent = webchat::build_agent(&cfg, &client);
            let v = match agent.run(&prompt.join(" ")).await {
                Ok(a) => serde_json::json!({
                    "used": a.used,
                    "query": a.content,
                    "urls": a.sources,
                }),
                Err(e) => serde_json::json!({
                    "used": false,
                    "error": e.to_string(),
                }),
            };
            println!("{v}");
        }
    }
    Ok(())
}
