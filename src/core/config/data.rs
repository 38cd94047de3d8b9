use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::constants::{DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_TEMPERATURE};
use crate::core::profile::StudentProfile;
use crate::core::session::SessionSettings;

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Gemini model id (e.g., "gemini-3-pro-preview")
    pub model: Option<String>,
    /// Sampling temperature for conversational turns
    pub temperature: Option<f32>,
    /// API root; `GEMINI_BASE_URL` takes precedence when set
    pub base_url: Option<String>,
    /// Replaces the built-in coaching instruction
    pub system_instruction: Option<String>,
    /// Profile the chat starts with
    pub profile: Option<StudentProfile>,
}

impl Config {
    /// Session settings from this config, with an optional model override
    /// from the command line.
    pub fn session_settings(&self, model_override: Option<&str>) -> SessionSettings {
        let model = model_override
            .map(str::to_string)
            .or_else(|| self.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        SessionSettings {
            model,
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            system_instruction: self
                .system_instruction
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
        }
    }

    /// The configured profile, with invalid fields replaced by defaults.
    pub fn starting_profile(&self) -> StudentProfile {
        self.profile
            .clone()
            .map(StudentProfile::validated)
            .unwrap_or_default()
    }

    pub fn profile_mut(&mut self) -> &mut StudentProfile {
        self.profile.get_or_insert_with(StudentProfile::default)
    }
}

pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
