//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod ask;
pub mod chat;
pub mod settings;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::ask::run_ask;
use crate::cli::chat::run_chat;
use crate::cli::settings::SettingRegistry;
use crate::core::backend::GeminiBackend;
use crate::core::config::{path_display, Config};
use crate::core::profile::TARGET_INSTITUTIONS;
use crate::core::providers::ConfigurationError;

#[derive(Parser)]
#[command(name = "mathlogos")]
#[command(about = "A math essay exam tutor in your terminal, powered by Gemini")]
#[command(
    long_about = "MathLogos coaches students preparing for Korean university math essay \
exams. It streams answers from the Gemini API, accepts photos of written solutions, \
and tailors its guidance to a student profile.\n\n\
Environment Variables:\n\
  GEMINI_API_KEY    Your Gemini API key (API_KEY is accepted as a fallback)\n\
  GEMINI_BASE_URL   Custom API base URL (optional)\n\
  RUST_LOG          Diagnostic log filter, written to stderr (default: warn)\n\n\
Chat commands:\n\
  /attach <path>... Stage images for the next message\n\
  /profile          Show the student profile\n\
  /help             List every command"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model to use instead of the configured one
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Append a plain-text transcript to the specified file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Configuration file to use instead of the platform default
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Start the interactive chat (default)
    Chat,
    /// Ask a single question and print the answer
    Ask {
        /// Image of a written solution to include (repeatable)
        #[arg(short = 'i', long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
        /// Wait for the complete answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
        /// The question
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Set configuration values, or list them when no key is given
    Set {
        /// Configuration key to set
        key: Option<String>,
        /// Value to set for the key (can be multiple words)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset configuration values
    Unset {
        /// Configuration key to unset
        key: String,
    },
    /// List the built-in target institutions
    Institutions,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Set { key, value } => {
            let mut config = Config::load(config_path)?;
            let registry = SettingRegistry::new();
            let Some(key) = key else {
                println!("{}", registry.format_all(&config));
                return Ok(());
            };
            match registry.set(&key, &value, &mut config) {
                Ok(message) => {
                    let saved = config.save(config_path)?;
                    println!("{message}");
                    println!("   (saved to {})", path_display(saved));
                }
                Err(err) => {
                    err.print();
                    std::process::exit(err.exit_code());
                }
            }
            Ok(())
        }
        Commands::Unset { key } => {
            let mut config = Config::load(config_path)?;
            match SettingRegistry::new().unset(&key, &mut config) {
                Ok(message) => {
                    config.save(config_path)?;
                    println!("{message}");
                }
                Err(err) => {
                    err.print();
                    std::process::exit(err.exit_code());
                }
            }
            Ok(())
        }
        Commands::Institutions => {
            for institution in TARGET_INSTITUTIONS {
                println!("{institution}");
            }
            Ok(())
        }
        Commands::Ask {
            images,
            no_stream,
            prompt,
        } => {
            let config = Config::load(config_path)?;
            let backend = backend_or_exit(&config);
            run_ask(backend, &config, args.model.as_deref(), prompt, images, no_stream).await
        }
        Commands::Chat => {
            let config = Config::load(config_path)?;
            let backend = backend_or_exit(&config);
            run_chat(backend, &config, args.model.as_deref(), args.log).await
        }
    }
}

fn backend_or_exit(config: &Config) -> GeminiBackend {
    match GeminiBackend::from_env(config.base_url.as_deref()) {
        Ok(backend) => backend,
        Err(err) => exit_with_configuration_error(&err),
    }
}

pub(crate) fn exit_with_configuration_error(err: &ConfigurationError) -> ! {
    eprintln!("{err}");
    let fixes = err.quick_fixes();
    if !fixes.is_empty() {
        eprintln!();
        eprintln!("💡 Quick fixes:");
        for fix in fixes {
            eprintln!("  • {fix}");
        }
    }
    std::process::exit(err.exit_code());
}
