//! Settings management for CLI set/unset commands.
//!
//! Each configuration key has a [`SettingHandler`]. Handlers mutate an
//! in-memory [`Config`]; the caller loads and saves the file around them.

pub mod error;

pub use error::SettingError;

use crate::core::config::data::Config;
use crate::core::profile::{StudentProfile, PROFICIENCY_TIERS};

/// Handles one configuration key.
pub trait SettingHandler: Send + Sync {
    /// Returns the configuration key this handler manages.
    fn key(&self) -> &'static str;

    /// Sets the value from the words following the key. Returns a success message.
    fn set(&self, args: &[String], config: &mut Config) -> Result<String, SettingError>;

    /// Clears the value. Returns a success message.
    fn unset(&self, config: &mut Config) -> String;

    /// Formats the current value for `mathlogos set` output.
    fn format(&self, config: &Config) -> String;
}

fn success_set(key: &str, value: &str) -> String {
    format!("✅ Set {key} to: {value}")
}

fn success_unset(key: &str) -> String {
    format!("✅ Unset {key}")
}

fn format_optional(key: &str, value: Option<&str>) -> String {
    format!("  {key}: {}", value.unwrap_or("(unset)"))
}

fn joined(args: &[String]) -> Option<String> {
    let value = args.join(" ").trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// A free-form string setting stored directly on [`Config`].
struct StringHandler {
    key: &'static str,
    example: &'static str,
    field: fn(&mut Config) -> &mut Option<String>,
    read: fn(&Config) -> Option<&str>,
}

impl SettingHandler for StringHandler {
    fn key(&self) -> &'static str {
        self.key
    }

    fn set(&self, args: &[String], config: &mut Config) -> Result<String, SettingError> {
        let value = joined(args).ok_or(SettingError::MissingArgs {
            hint: "Specify a value for the key:",
            example: self.example,
        })?;
        let message = success_set(self.key, &value);
        *(self.field)(config) = Some(value);
        Ok(message)
    }

    fn unset(&self, config: &mut Config) -> String {
        *(self.field)(config) = None;
        success_unset(self.key)
    }

    fn format(&self, config: &Config) -> String {
        format_optional(self.key, (self.read)(config))
    }
}

struct TemperatureHandler;

impl SettingHandler for TemperatureHandler {
    fn key(&self) -> &'static str {
        "temperature"
    }

    fn set(&self, args: &[String], config: &mut Config) -> Result<String, SettingError> {
        let input = joined(args).ok_or(SettingError::MissingArgs {
            hint: "Specify a temperature between 0.0 and 2.0:",
            example: "mathlogos set temperature 0.7",
        })?;
        let temperature = input
            .parse::<f32>()
            .ok()
            .filter(|t| (0.0..=2.0).contains(t))
            .ok_or_else(|| SettingError::InvalidValue {
                key: "temperature",
                input: input.clone(),
                hint: "Use a number between 0.0 and 2.0.",
            })?;
        config.temperature = Some(temperature);
        Ok(success_set(self.key(), &temperature.to_string()))
    }

    fn unset(&self, config: &mut Config) -> String {
        config.temperature = None;
        success_unset(self.key())
    }

    fn format(&self, config: &Config) -> String {
        let value = config.temperature.map(|t| t.to_string());
        format_optional(self.key(), value.as_deref())
    }
}

/// A single-valued profile field. Unsetting restores the default profile's value.
struct ProfileFieldHandler {
    key: &'static str,
    example: &'static str,
    field: fn(&mut StudentProfile) -> &mut String,
    allowed: Option<&'static [&'static str]>,
}

impl SettingHandler for ProfileFieldHandler {
    fn key(&self) -> &'static str {
        self.key
    }

    fn set(&self, args: &[String], config: &mut Config) -> Result<String, SettingError> {
        let value = joined(args).ok_or(SettingError::MissingArgs {
            hint: "Specify a value for the profile field:",
            example: self.example,
        })?;
        if let Some(allowed) = self.allowed {
            if !allowed.contains(&value.as_str()) {
                return Err(SettingError::InvalidValue {
                    key: self.key,
                    input: value,
                    hint: "Proficiency tiers run from 1 (highest) to 9.",
                });
            }
        }
        let message = success_set(self.key, &value);
        *(self.field)(config.profile_mut()) = value;
        Ok(message)
    }

    fn unset(&self, config: &mut Config) -> String {
        let mut defaults = StudentProfile::default();
        *(self.field)(config.profile_mut()) = std::mem::take((self.field)(&mut defaults));
        success_unset(self.key)
    }

    fn format(&self, config: &Config) -> String {
        let mut profile = config.starting_profile();
        format!("  {}: {}", self.key, (self.field)(&mut profile))
    }
}

struct TargetsHandler;

impl SettingHandler for TargetsHandler {
    fn key(&self) -> &'static str {
        "targets"
    }

    /// Takes a comma-separated institution list.
    fn set(&self, args: &[String], config: &mut Config) -> Result<String, SettingError> {
        let input = joined(args).ok_or(SettingError::MissingArgs {
            hint: "Specify target institutions separated by commas:",
            example: "mathlogos set targets Yonsei University, KAIST",
        })?;
        let profile = config.profile_mut();
        profile.target_institutions = input.split(',').map(|t| t.trim().to_string()).collect();
        *profile = std::mem::take(profile).normalized();
        let listed = profile.target_institutions.join(", ");
        Ok(success_set(self.key(), &listed))
    }

    fn unset(&self, config: &mut Config) -> String {
        config.profile_mut().target_institutions.clear();
        success_unset(self.key())
    }

    fn format(&self, config: &Config) -> String {
        let profile = config.starting_profile();
        let listed = profile.target_institutions.join(", ");
        format_optional(self.key(), (!listed.is_empty()).then_some(listed.as_str()))
    }
}

pub struct SettingRegistry {
    handlers: Vec<Box<dyn SettingHandler>>,
}

impl Default for SettingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingRegistry {
    pub fn new() -> Self {
        let handlers: Vec<Box<dyn SettingHandler>> = vec![
            Box::new(StringHandler {
                key: "model",
                example: "mathlogos set model gemini-2.5-pro",
                field: |config| &mut config.model,
                read: |config| config.model.as_deref(),
            }),
            Box::new(TemperatureHandler),
            Box::new(StringHandler {
                key: "base-url",
                example: "mathlogos set base-url https://generativelanguage.googleapis.com/v1beta",
                field: |config| &mut config.base_url,
                read: |config| config.base_url.as_deref(),
            }),
            Box::new(StringHandler {
                key: "system-instruction",
                example: "mathlogos set system-instruction You are a patient calculus tutor.",
                field: |config| &mut config.system_instruction,
                read: |config| config.system_instruction.as_deref(),
            }),
            Box::new(ProfileFieldHandler {
                key: "name",
                example: "mathlogos set name Kim",
                field: |profile| &mut profile.name,
                allowed: None,
            }),
            Box::new(ProfileFieldHandler {
                key: "grade",
                example: "mathlogos set grade 11",
                field: |profile| &mut profile.grade,
                allowed: None,
            }),
            Box::new(ProfileFieldHandler {
                key: "tier",
                example: "mathlogos set tier 3",
                field: |profile| &mut profile.proficiency_tier,
                allowed: Some(PROFICIENCY_TIERS),
            }),
            Box::new(TargetsHandler),
        ];
        Self { handlers }
    }

    pub fn get(&self, key: &str) -> Option<&dyn SettingHandler> {
        self.handlers
            .iter()
            .find(|handler| handler.key() == key)
            .map(|handler| handler.as_ref())
    }

    pub fn set(&self, key: &str, args: &[String], config: &mut Config) -> Result<String, SettingError> {
        self.get(key)
            .ok_or_else(|| SettingError::UnknownKey(key.to_string()))?
            .set(args, config)
    }

    pub fn unset(&self, key: &str, config: &mut Config) -> Result<String, SettingError> {
        Ok(self
            .get(key)
            .ok_or_else(|| SettingError::UnknownKey(key.to_string()))?
            .unset(config))
    }

    /// One line per key with its current value.
    pub fn format_all(&self, config: &Config) -> String {
        self.handlers
            .iter()
            .map(|handler| handler.format(config))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
