//! Plain-text chat transcripts written with `--log`.

use crate::core::message::{ChatMessage, Role};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct TranscriptLog {
    file_path: Option<PathBuf>,
    is_active: bool,
}

impl TranscriptLog {
    /// Opens (creating if needed) the transcript at `path`. `None` disables logging.
    pub fn new(path: Option<PathBuf>) -> io::Result<Self> {
        if let Some(path) = &path {
            Self::test_file_access(path)?;
        }
        Ok(TranscriptLog {
            is_active: path.is_some(),
            file_path: path,
        })
    }

    pub fn toggle_logging(&mut self, pause_message: &str) -> Result<String, String> {
        let Some(path) = self.file_path.clone() else {
            return Err("No transcript file. Start with --log <file> to enable logging.".into());
        };
        if self.is_active {
            // Record the pause before going quiet.
            self.log_note(pause_message).map_err(|err| err.to_string())?;
            self.is_active = false;
            Ok(format!("Logging paused (file: {})", path.display()))
        } else {
            self.is_active = true;
            Ok(format!("Logging resumed to: {}", path.display()))
        }
    }

    /// Appends a finished message. Empty model messages are skipped.
    pub fn log_message(&self, message: &ChatMessage, user_label: &str) -> io::Result<()> {
        match message.role {
            Role::User => {
                let mut content = format!("{user_label}: {}", message.text);
                if message.has_attachments() {
                    content.push_str(&format!(" [{} image(s)]", message.attachments.len()));
                }
                self.write_entry(&content)
            }
            Role::Model if message.text.is_empty() => Ok(()),
            Role::Model => self.write_entry(&message.text),
            Role::System => self.log_note(&message.text),
        }
    }

    /// Appends a `## `-prefixed note line.
    pub fn log_note(&self, note: &str) -> io::Result<()> {
        self.write_entry(&format!("## {note}"))
    }

    fn write_entry(&self, content: &str) -> io::Result<()> {
        let Some(file_path) = self.file_path.as_ref().filter(|_| self.is_active) else {
            return Ok(());
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);

        for line in content.lines() {
            writeln!(writer, "{line}")?;
        }
        // Blank line between entries.
        writeln!(writer)?;
        writer.flush()
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn status_string(&self) -> String {
        let file_name = |path: &Path| {
            path.file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned()
        };
        match (&self.file_path, self.is_active) {
            (None, _) => "disabled".to_string(),
            (Some(path), true) => format!("active ({})", file_name(path)),
            (Some(path), false) => format!("paused ({})", file_name(path)),
        }
    }

    fn test_file_access(path: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.flush()
    }
}
