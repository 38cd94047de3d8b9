//! One-shot "ask" command

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::cli::exit_with_configuration_error;
use crate::core::attachment::ImageAttachment;
use crate::core::backend::GenerativeBackend;
use crate::core::config::Config;
use crate::core::session::{AiSessionClient, SessionError};

pub async fn run_ask<B: GenerativeBackend>(
    backend: B,
    config: &Config,
    model: Option<&str>,
    prompt: Vec<String>,
    images: Vec<PathBuf>,
    no_stream: bool,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() && images.is_empty() {
        eprintln!("Usage: mathlogos ask [--image PATH]... <prompt>");
        std::process::exit(1);
    }

    let mut payloads = Vec::with_capacity(images.len());
    for path in &images {
        match ImageAttachment::from_path(path) {
            Ok(image) => payloads.push(image.base64_payload().to_string()),
            Err(err) => {
                eprintln!("❌ {err}");
                std::process::exit(1);
            }
        }
    }

    let mut client = AiSessionClient::new(backend, config.session_settings(model));
    let mut out = io::stdout();
    match ask(&mut client, &prompt, &payloads, no_stream, &mut out).await {
        Ok(()) => Ok(()),
        Err(SessionError::Configuration(err)) => exit_with_configuration_error(&err),
        Err(SessionError::Transport(err)) => {
            eprintln!("\n\n❌ Error: {err}");
            std::process::exit(1);
        }
    }
}

/// Writes the reply to `out`, fragment by fragment unless `no_stream` is set.
async fn ask<B: GenerativeBackend, W: Write>(
    client: &mut AiSessionClient<B>,
    prompt: &str,
    images: &[String],
    no_stream: bool,
    out: &mut W,
) -> Result<(), SessionError> {
    if no_stream {
        let reply = client.send(prompt, images).await?;
        writeln!(out, "{reply}").ok();
        return Ok(());
    }

    let mut stream = client.send_stream(prompt, images).await?;
    while let Some(fragment) = stream.next().await {
        write!(out, "{}", fragment?).ok();
        out.flush().ok();
    }
    writeln!(out).ok();
    Ok(())
}
