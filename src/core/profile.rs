//! The active student profile and the greeting derived from it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

/// Institutions offered by the profile editor.
pub const TARGET_INSTITUTIONS: &[&str] = &[
    "Seoul National University",
    "Yonsei University",
    "Korea University",
    "Sungkyunkwan University",
    "Hanyang University",
    "Sogang University",
    "Chung-Ang University",
    "Kyung Hee University",
    "Ewha Womans University",
    "KAIST",
    "POSTECH",
];

/// Grade choices offered by the profile editor. Free-form values are accepted.
pub const GRADES: &[&str] = &["12", "11", "repeat"];

pub const PROFICIENCY_TIERS: &[&str] = &["1", "2", "3", "4", "5", "6", "7", "8", "9"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentProfile {
    pub name: String,
    pub grade: String,
    pub proficiency_tier: String,
    #[serde(default)]
    pub target_institutions: Vec<String>,
}

impl Default for StudentProfile {
    fn default() -> Self {
        Self {
            name: "Kim".to_string(),
            grade: "12".to_string(),
            proficiency_tier: "2".to_string(),
            target_institutions: vec![
                "Yonsei University".to_string(),
                "Hanyang University".to_string(),
            ],
        }
    }
}

impl PartialEq for StudentProfile {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.grade == other.grade
            && self.proficiency_tier == other.proficiency_tier
            && self.institution_set() == other.institution_set()
    }
}

impl Eq for StudentProfile {}

impl StudentProfile {
    fn institution_set(&self) -> BTreeSet<&str> {
        self.target_institutions.iter().map(String::as_str).collect()
    }

    pub fn targets(&self, institution: &str) -> bool {
        self.target_institutions.iter().any(|t| t == institution)
    }

    /// Adds the institution if absent, removes it if present.
    pub fn toggle_institution(&mut self, institution: &str) {
        if self.targets(institution) {
            self.target_institutions.retain(|t| t != institution);
        } else {
            self.target_institutions.push(institution.to_string());
        }
    }

    /// Drops blank and repeated institutions, keeping first occurrences.
    pub fn normalized(mut self) -> Self {
        let mut seen = BTreeSet::new();
        self.target_institutions
            .retain(|t| !t.trim().is_empty() && seen.insert(t.clone()));
        self
    }

    /// Normalizes institutions and replaces a blank name or grade, or a tier
    /// outside 1-9, with the default profile's value.
    pub fn validated(self) -> Self {
        let defaults = StudentProfile::default();
        let mut profile = self.normalized();
        if profile.name.trim().is_empty() {
            warn!("profile name is empty; using {:?}", defaults.name);
            profile.name = defaults.name;
        }
        if profile.grade.trim().is_empty() {
            warn!("profile grade is empty; using {:?}", defaults.grade);
            profile.grade = defaults.grade;
        }
        if !PROFICIENCY_TIERS.contains(&profile.proficiency_tier.trim()) {
            warn!(
                "profile tier {:?} is not between 1 and 9; using {:?}",
                profile.proficiency_tier, defaults.proficiency_tier
            );
            profile.proficiency_tier = defaults.proficiency_tier;
        } else {
            profile.proficiency_tier = profile.proficiency_tier.trim().to_string();
        }
        profile
    }

    fn institutions_display(&self) -> String {
        if self.target_institutions.is_empty() {
            "your target universities".to_string()
        } else {
            self.target_institutions.join(", ")
        }
    }

    /// Locally templated opening message. No provider call is involved.
    pub fn greeting(&self) -> String {
        format!(
            "Welcome, {name}. I'm your math essay coach.\n\
             You're in grade {grade} with a math proficiency tier of {tier}.\n\
             Ask me anything about preparing for the math essay exams at [{institutions}], \
             or share photos of your own written solutions and I'll review them. \
             You can attach several photos at once.",
            name = self.name,
            grade = self.grade,
            tier = self.proficiency_tier,
            institutions = self.institutions_display(),
        )
    }

    /// Profile summary appended to the tutor's system instruction.
    pub fn instruction_context(&self) -> String {
        format!(
            "Student profile: name {}, grade {}, math proficiency tier {} (1 is highest). \
             Target institutions: {}.",
            self.name,
            self.grade,
            self.proficiency_tier,
            self.institutions_display()
        )
    }
}

/// Holds the single active profile. Writes replace it wholesale.
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    current: StudentProfile,
    revision: u64,
}

impl ProfileStore {
    pub fn new(profile: StudentProfile) -> Self {
        Self {
            current: profile.normalized(),
            revision: 0,
        }
    }

    pub fn current(&self) -> &StudentProfile {
        &self.current
    }

    /// Bumped on every write that actually changed the profile.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Replaces the profile. Returns whether anything changed.
    pub fn replace(&mut self, profile: StudentProfile) -> bool {
        let profile = profile.normalized();
        if profile == self.current {
            return false;
        }
        self.current = profile;
        self.revision += 1;
        true
    }

    pub fn update(&mut self, edit: impl FnOnce(&mut StudentProfile)) -> bool {
        let mut next = self.current.clone();
        edit(&mut next);
        self.replace(next)
    }
}
