//! Line-oriented chat REPL.
//!
//! Input lines become controller [`Intent`]s; controller events are rendered
//! as they arrive, so streamed replies appear fragment by fragment.

use std::error::Error;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::core::attachment::ImageAttachment;
use crate::core::backend::GenerativeBackend;
use crate::core::config::Config;
use crate::core::controller::{ConversationController, Intent};
use crate::core::conversation::{ControllerEvent, TurnState};
use crate::core::message::{ChatMessage, Role};
use crate::core::profile::{ProfileStore, StudentProfile, GRADES, PROFICIENCY_TIERS, TARGET_INSTITUTIONS};
use crate::core::session::AiSessionClient;
use crate::utils::logging::TranscriptLog;

const HELP_TEXT: &str = "\
Commands:
  /attach <path>...   Stage images (png, jpg, gif, webp, heic) for the next message
  /detach <n>         Unstage the n-th staged image
  /name <name>        Change the student name
  /grade <grade>      Change the grade (12, 11, repeat)
  /tier <1-9>         Change the math proficiency tier (1 is highest)
  /target <n|name>    Toggle a target institution (see /profile for the list)
  /profile            Show the current profile and institution list
  /log                Pause or resume the transcript (requires --log)
  /help               Show this help
  /quit               Leave the chat
Anything else is sent as a message. An empty line sends staged images alone.";

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Message(String),
    Attach(Vec<PathBuf>),
    /// Zero-based index of the staged image to drop.
    Detach(usize),
    Name(String),
    Grade(String),
    Tier(String),
    Target(String),
    Profile,
    Log,
    Help,
    Quit,
    Invalid(String),
}

/// Parses one input line. Lines not starting with `/` are messages.
pub fn parse_line(line: &str) -> ReplCommand {
    let trimmed = line.trim();
    let Some(command) = trimmed.strip_prefix('/') else {
        return ReplCommand::Message(line.to_string());
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    let required = |build: fn(String) -> ReplCommand, usage: &str| {
        if rest.is_empty() {
            ReplCommand::Invalid(format!("Usage: {usage}"))
        } else {
            build(rest.to_string())
        }
    };

    match name.to_ascii_lowercase().as_str() {
        "attach" if rest.is_empty() => ReplCommand::Invalid("Usage: /attach <path>...".into()),
        "attach" => ReplCommand::Attach(rest.split_whitespace().map(PathBuf::from).collect()),
        "detach" => match rest.parse::<usize>() {
            Ok(n) if n > 0 => ReplCommand::Detach(n - 1),
            _ => ReplCommand::Invalid("Usage: /detach <n>, counting from 1".into()),
        },
        "name" => required(ReplCommand::Name, "/name <name>"),
        "grade" => required(ReplCommand::Grade, "/grade <grade>"),
        "tier" => required(ReplCommand::Tier, "/tier <1-9>"),
        "target" => required(ReplCommand::Target, "/target <n|name>"),
        "profile" => ReplCommand::Profile,
        "log" => ReplCommand::Log,
        "help" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        other => ReplCommand::Invalid(format!("Unknown command: /{other}. Type /help.")),
    }
}

/// Resolves a 1-based list number or a case-insensitive institution name.
/// Names already on the profile match too, so configured custom targets can
/// be toggled off.
fn resolve_institution(input: &str, profile: &StudentProfile) -> Option<String> {
    if let Ok(n) = input.parse::<usize>() {
        return n
            .checked_sub(1)
            .and_then(|i| TARGET_INSTITUTIONS.get(i))
            .map(|name| name.to_string());
    }
    TARGET_INSTITUTIONS
        .iter()
        .copied()
        .chain(profile.target_institutions.iter().map(String::as_str))
        .find(|name| name.eq_ignore_ascii_case(input))
        .map(str::to_string)
}

fn format_size(bytes: usize) -> String {
    const KIB: f64 = 1024.0;
    let value = bytes as f64;
    if value < KIB {
        format!("{bytes} B")
    } else if value < KIB * KIB {
        format!("{:.1} KB", value / KIB)
    } else {
        format!("{:.1} MB", value / (KIB * KIB))
    }
}

/// One-line confirmation for a freshly staged image.
fn describe_attachment(path: &Path, image: &ImageAttachment) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    format!(
        "📎 {name} ({}, ~{})",
        image.declared_mime_type().unwrap_or("unknown type"),
        format_size(image.approx_size_bytes())
    )
}

fn profile_summary(profile: &StudentProfile) -> String {
    let mut text = format!(
        "Name: {}\nGrade: {}\nProficiency tier: {}\nTarget institutions:\n",
        profile.name, profile.grade, profile.proficiency_tier
    );
    for (i, institution) in TARGET_INSTITUTIONS.iter().enumerate() {
        let mark = if profile.targets(institution) { "x" } else { " " };
        text.push_str(&format!("  [{mark}] {:>2}. {institution}\n", i + 1));
    }
    text
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

struct Repl<W: Write> {
    out: W,
    intents: Option<mpsc::UnboundedSender<Intent>>,
    profile: StudentProfile,
    transcript: TranscriptLog,
    busy: bool,
    reply: Option<String>,
}

impl<W: Write> Repl<W> {
    fn new(out: W, intents: mpsc::UnboundedSender<Intent>, profile: StudentProfile, transcript: TranscriptLog) -> Self {
        Self {
            out,
            intents: Some(intents),
            profile,
            transcript,
            busy: false,
            reply: None,
        }
    }

    fn send(&self, intent: Intent) {
        if let Some(tx) = &self.intents {
            // The controller only stops after the sender is dropped.
            let _ = tx.send(intent);
        }
    }

    fn close_input(&mut self) {
        self.intents = None;
    }

    fn edit_profile(&mut self, edit: impl FnOnce(&mut StudentProfile)) {
        edit(&mut self.profile);
        self.send(Intent::EditProfile(self.profile.clone()));
    }

    fn handle_line(&mut self, line: &str) -> io::Result<Flow> {
        match parse_line(line) {
            ReplCommand::Message(text) => {
                self.send(Intent::SetInput(text));
                self.send(Intent::Send);
            }
            ReplCommand::Attach(paths) => {
                for path in paths {
                    match ImageAttachment::from_path(&path) {
                        Ok(image) => {
                            writeln!(self.out, "{}", describe_attachment(&path, &image))?;
                            self.send(Intent::Attach(image));
                        }
                        Err(err) => writeln!(self.out, "❌ {err}")?,
                    }
                }
            }
            ReplCommand::Detach(index) => self.send(Intent::RemoveAttachment(index)),
            ReplCommand::Name(name) => self.edit_profile(|p| p.name = name),
            ReplCommand::Grade(grade) => {
                if !GRADES.contains(&grade.as_str()) {
                    writeln!(self.out, "ℹ️  Using custom grade '{grade}'.")?;
                }
                self.edit_profile(|p| p.grade = grade);
            }
            ReplCommand::Tier(tier) => {
                if PROFICIENCY_TIERS.contains(&tier.as_str()) {
                    self.edit_profile(|p| p.proficiency_tier = tier);
                } else {
                    writeln!(self.out, "❌ Tier must be between 1 and 9.")?;
                }
            }
            ReplCommand::Target(input) => match resolve_institution(&input, &self.profile) {
                Some(institution) => self.edit_profile(|p| p.toggle_institution(&institution)),
                None => writeln!(self.out, "❌ Unknown institution '{input}'. See /profile.")?,
            },
            ReplCommand::Profile => write!(self.out, "{}", profile_summary(&self.profile))?,
            ReplCommand::Log => {
                let message = self
                    .transcript
                    .toggle_logging("Transcript paused")
                    .unwrap_or_else(|err| err);
                writeln!(self.out, "{message}")?;
            }
            ReplCommand::Help => writeln!(self.out, "{HELP_TEXT}")?,
            ReplCommand::Quit => return Ok(Flow::Quit),
            ReplCommand::Invalid(message) => writeln!(self.out, "{message}")?,
        }
        self.out.flush()?;
        Ok(Flow::Continue)
    }

    fn log(&self, message: &ChatMessage) {
        if let Err(err) = self.transcript.log_message(message, &self.profile.name) {
            warn!("failed to write transcript: {err}");
        }
    }

    fn print_message(&mut self, message: &ChatMessage) -> io::Result<()> {
        match message.role {
            Role::User => Ok(()),
            Role::Model | Role::System => writeln!(self.out, "{}\n", message.text),
        }
    }

    fn render(&mut self, event: ControllerEvent) -> io::Result<()> {
        match event {
            ControllerEvent::ConversationReset { messages } => {
                writeln!(self.out, "── Profile updated; starting a new conversation ──")?;
                if let Err(err) = self.transcript.log_note("Profile updated; new conversation") {
                    warn!("failed to write transcript: {err}");
                }
                for message in &messages {
                    self.print_message(message)?;
                    self.log(message);
                }
            }
            ControllerEvent::MessageAppended { message, .. } => {
                if message.is_model() && message.text.is_empty() && self.busy {
                    self.reply = Some(String::new());
                } else {
                    self.print_message(&message)?;
                    self.log(&message);
                }
            }
            ControllerEvent::FragmentAppended { fragment, .. } => {
                if let Some(reply) = self.reply.as_mut() {
                    reply.push_str(&fragment);
                }
                write!(self.out, "{fragment}")?;
            }
            ControllerEvent::AttachmentsChanged { count } => {
                if !self.busy {
                    writeln!(self.out, "📎 {count} image(s) staged")?;
                }
            }
            ControllerEvent::InputChanged { .. } => {}
            ControllerEvent::StateChanged(state) => {
                self.busy = matches!(state, TurnState::Sending | TurnState::Streaming);
                if matches!(state, TurnState::Idle | TurnState::Failed) {
                    if let Some(reply) = self.reply.take() {
                        if !reply.is_empty() {
                            writeln!(self.out, "\n")?;
                            self.log(&ChatMessage::model(reply));
                        }
                    }
                }
            }
            ControllerEvent::SendRejected => {
                writeln!(self.out, "\n⏳ Still answering; wait for the reply to finish.")?;
            }
        }
        self.out.flush()
    }
}

pub async fn run_chat<B: GenerativeBackend>(
    backend: B,
    config: &Config,
    model: Option<&str>,
    log: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let transcript = TranscriptLog::new(log)?;
    let profile = config.starting_profile();
    let client = AiSessionClient::new(backend, config.session_settings(model));
    let mut controller = ConversationController::new(client, ProfileStore::new(profile.clone()));
    let mut events = controller.subscribe();

    let (intents_tx, intents_rx) = mpsc::unbounded_channel();
    let mut repl = Repl::new(io::stdout(), intents_tx, profile, transcript);

    eprintln!("🚀 Starting MathLogos ({})", controller.client().settings().model);
    eprintln!("💡 Type /help for commands, /quit to leave");
    for message in controller.messages() {
        repl.print_message(message)?;
        repl.log(message);
    }
    repl.out.flush()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let run = controller.run(intents_rx);
    tokio::pin!(run);

    loop {
        tokio::select! {
            _ = &mut run => break,
            Some(event) = events.recv() => repl.render(event)?,
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if repl.handle_line(&line)? == Flow::Quit {
                        return Ok(());
                    }
                }
                None => {
                    stdin_open = false;
                    repl.close_input();
                }
            },
        }
    }

    while let Ok(event) = events.try_recv() {
        repl.render(event)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::test_profile;

    fn repl() -> (Repl<Vec<u8>>, mpsc::UnboundedReceiver<Intent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transcript = TranscriptLog::new(None).unwrap();
        (Repl::new(Vec::new(), tx, test_profile(), transcript), rx)
    }

    fn output(repl: &Repl<Vec<u8>>) -> String {
        String::from_utf8(repl.out.clone()).unwrap()
    }

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(
            parse_line("What is a limit?"),
            ReplCommand::Message("What is a limit?".to_string())
        );
        assert_eq!(parse_line(""), ReplCommand::Message(String::new()));
    }

    #[test]
    fn slash_commands_parse_their_arguments() {
        assert_eq!(
            parse_line("/attach a.png  b.jpg"),
            ReplCommand::Attach(vec![PathBuf::from("a.png"), PathBuf::from("b.jpg")])
        );
        assert_eq!(parse_line("/detach 2"), ReplCommand::Detach(1));
        assert!(matches!(parse_line("/detach 0"), ReplCommand::Invalid(_)));
        assert_eq!(parse_line("/name  Lee Min"), ReplCommand::Name("Lee Min".to_string()));
        assert_eq!(parse_line("/TIER 3"), ReplCommand::Tier("3".to_string()));
        assert!(matches!(parse_line("/grade"), ReplCommand::Invalid(_)));
        assert_eq!(parse_line("/quit"), ReplCommand::Quit);
        assert!(matches!(parse_line("/dance"), ReplCommand::Invalid(_)));
    }

    #[test]
    fn institutions_resolve_by_number_or_name() {
        let profile = test_profile();
        assert_eq!(
            resolve_institution("1", &profile).as_deref(),
            Some(TARGET_INSTITUTIONS[0])
        );
        assert_eq!(resolve_institution("kaist", &profile).as_deref(), Some("KAIST"));
        assert_eq!(resolve_institution("0", &profile), None);
        assert_eq!(resolve_institution("Hogwarts", &profile), None);
    }

    #[test]
    fn custom_targets_on_the_profile_can_be_toggled_off() {
        let (mut repl, mut rx) = repl();
        assert_eq!(
            resolve_institution("a university", &repl.profile).as_deref(),
            Some("A University")
        );

        repl.handle_line("/target a university").unwrap();
        match rx.try_recv().unwrap() {
            Intent::EditProfile(profile) => assert!(profile.target_institutions.is_empty()),
            other => panic!("unexpected intent {other:?}"),
        }
        assert!(!output(&repl).contains("Unknown institution"));
    }

    #[test]
    fn staged_images_are_described_with_type_and_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("page1.JPG");
        std::fs::write(&path, vec![0u8; 3 * 1024]).unwrap();

        let (mut repl, mut rx) = repl();
        repl.handle_line(&format!("/attach {}", path.display())).unwrap();

        assert!(matches!(rx.try_recv().unwrap(), Intent::Attach(_)));
        assert_eq!(output(&repl), "📎 page1.JPG (image/jpeg, ~3.0 KB)\n");
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(2 * 1024 * 1024), "2.0 MB");
    }

    #[test]
    fn messages_become_input_then_send() {
        let (mut repl, mut rx) = repl();
        assert_eq!(repl.handle_line("hello").unwrap(), Flow::Continue);
        assert_eq!(rx.try_recv().unwrap(), Intent::SetInput("hello".to_string()));
        assert_eq!(rx.try_recv().unwrap(), Intent::Send);
    }

    #[test]
    fn profile_edits_send_the_whole_profile() {
        let (mut repl, mut rx) = repl();
        repl.handle_line("/target KAIST").unwrap();
        repl.handle_line("/tier 11").unwrap();

        match rx.try_recv().unwrap() {
            Intent::EditProfile(profile) => {
                assert!(profile.targets("A University"));
                assert!(profile.targets("KAIST"));
            }
            other => panic!("unexpected intent {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        assert!(output(&repl).contains("Tier must be between 1 and 9"));
    }

    #[test]
    fn missing_image_files_are_reported() {
        let (mut repl, mut rx) = repl();
        repl.handle_line("/attach /definitely/not/here.png").unwrap();
        assert!(rx.try_recv().is_err());
        assert!(output(&repl).starts_with("❌"));
    }

    #[test]
    fn streamed_reply_renders_fragments() {
        let (mut repl, _rx) = repl();
        repl.render(ControllerEvent::StateChanged(TurnState::Sending)).unwrap();
        repl.render(ControllerEvent::MessageAppended {
            index: 1,
            message: ChatMessage::user("hi", Vec::new()),
        })
        .unwrap();
        repl.render(ControllerEvent::AttachmentsChanged { count: 0 }).unwrap();
        repl.render(ControllerEvent::MessageAppended {
            index: 2,
            message: ChatMessage::model(""),
        })
        .unwrap();
        for fragment in ["Hel", "lo"] {
            repl.render(ControllerEvent::FragmentAppended {
                index: 2,
                fragment: fragment.to_string(),
            })
            .unwrap();
        }
        repl.render(ControllerEvent::StateChanged(TurnState::Idle)).unwrap();

        assert_eq!(output(&repl), "Hello\n\n");
        assert!(repl.reply.is_none());
    }

    #[test]
    fn quit_stops_the_loop() {
        let (mut repl, _rx) = repl();
        assert_eq!(repl.handle_line("/quit").unwrap(), Flow::Quit);
    }
}
