//! # Desk Assist CLI (`assist`)
//!
//! Command-line front end for the assistant core. It stands in for the
//! desktop window: every command maps onto one public operation of
//! [`desk_assist::assistant::Assistant`].
//!
//! ## Usage
//!
//! ```bash
//! assist --config ./config/assist.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `assist init` | Create (or open) the index store |
//! | `assist ask "<prompt>"` | Answer one prompt |
//! | `assist chat` | Answer prompts read from stdin, keeping history |
//! | `assist ingest <folder/pattern>` | Load local documents into the index |
//! | `assist ingest --url <url>` | Crawl a site into the index |
//! | `assist query "<question>"` | Answer from the index alone |
//! | `assist reset` | Remove every record of the collection |
//! | `assist models` | List model ids offered by the API |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use desk_assist::assistant::{AskOptions, Assistant, AssistantReply};
use desk_assist::config::{self, Config};
use desk_assist::speech::CommandSpeaker;

/// Desk Assist CLI: a function-calling LLM assistant with a local retrieval
/// index.
#[derive(Parser)]
#[command(name = "assist", version, about = "Desk Assist: LLM assistant with functions and retrieval")]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file is not an error at the default location; built-in
    /// defaults are used instead.
    #[arg(long, global = true, default_value = "./config/assist.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index store if needed and report its size.
    Init,

    /// Answer a single prompt.
    Ask {
        prompt: String,
        #[command(flatten)]
        flags: PromptFlags,
        /// Continue the previous conversation.
        #[arg(long)]
        keep_history: bool,
        /// Write a chart or generated image to this file.
        #[arg(long)]
        image_out: Option<PathBuf>,
        /// Use this model instead of the configured one.
        #[arg(long)]
        model: Option<String>,
        /// Sampling temperature in [0, 1].
        #[arg(long)]
        temperature: Option<f32>,
    },

    /// Read prompts from stdin, one per line, keeping history.
    Chat {
        #[command(flatten)]
        flags: PromptFlags,
    },

    /// Load documents into the index.
    ///
    /// LOCATION is a folder, or a folder followed by a glob, e.g.
    /// `./docs/**/*.md`.
    Ingest {
        #[arg(required_unless_present = "url", conflicts_with = "url")]
        location: Option<String>,
        /// Crawl this site instead of reading files.
        #[arg(long)]
        url: Option<String>,
        /// Link depth to follow from the root page.
        #[arg(long, requires = "url")]
        max_depth: Option<usize>,
    },

    /// Answer a question from the index alone.
    Query { question: String },

    /// Remove every record of the configured collection.
    Reset {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },

    /// List the models available to the API key.
    Models,
}

#[derive(Args)]
struct PromptFlags {
    /// Let the model call functions.
    #[arg(long)]
    functions: bool,
    /// Try the retrieval index first.
    #[arg(long)]
    context: bool,
    /// Speak plain answers with the configured speech command.
    #[arg(long)]
    speak: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,desk_assist=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new("./config/assist.toml") {
        tracing::debug!("no config file, using defaults");
        return Ok(Config::default());
    }
    config::load_config(path)
}

fn enable_speech(assistant: &mut Assistant, config: &Config) -> Result<()> {
    match CommandSpeaker::from_config(&config.speech) {
        Some(speaker) => assistant.enable_voice(Box::new(speaker)),
        None => bail!("Speech is not configured, set [speech].command"),
    }
}

fn print_reply(reply: &AssistantReply) {
    if !reply.response.is_empty() {
        println!("{}", reply.response.trim_end());
    }
    eprintln!("{}", reply.status);
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = load(&cli.config)?;
    let mut assistant = Assistant::from_config(&cfg)?;

    match cli.command {
        Commands::Init => {
            let count = assistant
                .open_index()
                .await
                .map_err(|e| anyhow::anyhow!("Storage error: {}", e))?;
            println!("Storage initialized, loaded {} pages", count);
        }
        Commands::Ask {
            prompt,
            flags,
            keep_history,
            image_out,
            model,
            temperature,
        } => {
            if let Some(model) = model {
                assistant.set_model(&model).await?;
            }
            if let Some(temperature) = temperature {
                assistant.set_temperature(temperature)?;
            }
            if flags.speak {
                enable_speech(&mut assistant, &cfg)?;
            }

            let options = AskOptions {
                use_context: flags.context,
                use_functions: flags.functions,
                keep_history,
                speak: flags.speak,
            };
            let reply = assistant.ask(&prompt, options).await;
            print_reply(&reply);

            match (image_out, &reply.image) {
                (Some(path), Some(image)) => {
                    std::fs::write(&path, image)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!("Image written to {}", path.display());
                }
                (Some(_), None) => eprintln!("No image produced"),
                _ => {}
            }
        }
        Commands::Chat { flags } => {
            if flags.speak {
                enable_speech(&mut assistant, &cfg)?;
            }
            let options = AskOptions {
                use_context: flags.context,
                use_functions: flags.functions,
                keep_history: true,
                speak: flags.speak,
            };
            for line in io::stdin().lock().lines() {
                let line = line?;
                match line.trim() {
                    "exit" | "quit" => break,
                    "" => continue,
                    prompt => print_reply(&assistant.ask(prompt, options).await),
                }
            }
        }
        Commands::Ingest {
            location,
            url,
            max_depth,
        } => {
            let result = match (location, url) {
                (_, Some(url)) => assistant.ingest_url(&url, max_depth).await,
                (Some(location), None) => assistant.ingest_folder(&location).await,
                (None, None) => bail!("Either a location or --url is required"),
            };
            match result {
                Ok(added) => println!("Loaded {} page(s)", added),
                Err(e) => bail!("Storage error: {}", e),
            }
        }
        Commands::Query { question } => {
            let answer = assistant.query_index(&question).await?;
            println!("{}", answer.answer);
            if !answer.sources.is_empty() {
                println!("Sources: {}", answer.sources);
            }
            eprintln!("{} token(s) used", answer.tokens_used);
        }
        Commands::Reset { yes } => {
            if !yes && !confirm("Remove every record from the index?")? {
                println!("Reset cancelled");
                return Ok(());
            }
            let removed = assistant
                .reset_index()
                .await
                .map_err(|e| anyhow::anyhow!("Storage error: {}", e))?;
            println!("Reset is complete, {} record(s) removed", removed);
        }
        Commands::Models => {
            for model in assistant.available_models().await? {
                println!("{}", model);
            }
        }
    }

    assistant.disable_voice();
    Ok(())
}
