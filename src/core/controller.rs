//! Conversation controller.
//!
//! Owns the session client, the conversation state and the active profile,
//! and drives one turn at a time. Presentation code either calls the methods
//! directly or feeds [`Intent`]s to [`ConversationController::run`].

use std::future;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::attachment::{ImageAttachment, PendingAttachments};
use crate::core::backend::GenerativeBackend;
use crate::core::constants::APOLOGY_TEXT;
use crate::core::conversation::{ControllerEvent, Conversation, Turn, TurnState};
use crate::core::message::ChatMessage;
use crate::core::profile::{ProfileStore, StudentProfile};
use crate::core::session::{AiSessionClient, SessionError};

/// User intents issued by a presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    SetInput(String),
    Send,
    Attach(ImageAttachment),
    RemoveAttachment(usize),
    EditProfile(StudentProfile),
}

pub struct ConversationController<B> {
    client: AiSessionClient<B>,
    conversation: Conversation,
    profile: ProfileStore,
    base_instruction: String,
    greeted_revision: Option<u64>,
    config_error_reported: bool,
}

impl<B: GenerativeBackend> ConversationController<B> {
    /// Builds the controller and shows the greeting for `profile`.
    pub fn new(client: AiSessionClient<B>, profile: ProfileStore) -> Self {
        let base_instruction = client.settings().system_instruction.clone();
        let mut controller = Self {
            client,
            conversation: Conversation::new(),
            profile,
            base_instruction,
            greeted_revision: None,
            config_error_reported: false,
        };
        controller.sync_profile();
        controller
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ControllerEvent> {
        self.conversation.subscribe()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.conversation.messages()
    }

    pub fn pending_attachments(&self) -> &PendingAttachments {
        self.conversation.pending()
    }

    pub fn input(&self) -> &str {
        self.conversation.input()
    }

    pub fn state(&self) -> TurnState {
        self.conversation.state()
    }

    pub fn profile(&self) -> &StudentProfile {
        self.profile.current()
    }

    pub fn client(&self) -> &AiSessionClient<B> {
        &self.client
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.conversation.set_input(text);
    }

    pub fn attach(&mut self, image: ImageAttachment) {
        self.conversation.attach(image);
    }

    pub fn remove_attachment(&mut self, index: usize) -> bool {
        self.conversation.remove_attachment(index)
    }

    /// Replaces the profile. A real change regreets and resets the provider
    /// session; during a turn that happens once the turn is over.
    pub fn update_profile(&mut self, profile: StudentProfile) -> bool {
        let changed = self.profile.replace(profile);
        if changed {
            self.sync_profile();
        }
        changed
    }

    pub fn edit_profile(&mut self, edit: impl FnOnce(&mut StudentProfile)) -> bool {
        let changed = self.profile.update(edit);
        if changed {
            self.sync_profile();
        }
        changed
    }

    fn sync_profile(&mut self) {
        if self.conversation.is_busy() {
            return;
        }
        let revision = self.profile.revision();
        if self.greeted_revision == Some(revision) {
            return;
        }

        let profile = self.profile.current();
        let instruction = format!(
            "{}\n\n{}",
            self.base_instruction,
            profile.instruction_context()
        );
        self.client.set_system_instruction(instruction);
        self.conversation.reset_with_greeting(profile.greeting());
        self.greeted_revision = Some(revision);
        debug!(revision, "profile applied; conversation reset to greeting");
    }

    /// Sends the current input and staged images, streaming the reply into
    /// the log. Returns false when nothing was sent.
    pub async fn send(&mut self) -> bool {
        self.run_turn(None).await
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> bool {
        self.set_input(text);
        self.send().await
    }

    /// Processes intents until the channel closes. Intents that arrive while
    /// a reply streams are applied immediately, except sends, which are
    /// rejected.
    pub async fn run(mut self, mut intents: mpsc::UnboundedReceiver<Intent>) -> Self {
        while let Some(intent) = intents.recv().await {
            match intent {
                Intent::Send => {
                    self.run_turn(Some(&mut intents)).await;
                }
                Intent::EditProfile(profile) => {
                    self.update_profile(profile);
                }
                other => apply_side_intent(&mut self.conversation, &mut self.profile, other),
            }
        }
        self
    }

    async fn run_turn(&mut self, intents: Option<&mut mpsc::UnboundedReceiver<Intent>>) -> bool {
        let Some(turn) = self.conversation.begin_turn() else {
            return false;
        };
        debug!(
            chars = turn.text.len(),
            images = turn.images.len(),
            "starting turn"
        );

        let Self {
            client,
            conversation,
            profile,
            config_error_reported,
            ..
        } = self;
        drive_turn(
            client,
            conversation,
            profile,
            config_error_reported,
            intents,
            turn,
        )
        .await;

        self.sync_profile();
        true
    }
}

fn apply_side_intent(conversation: &mut Conversation, profile: &mut ProfileStore, intent: Intent) {
    match intent {
        Intent::SetInput(text) => conversation.set_input(text),
        Intent::Attach(image) => conversation.attach(image),
        Intent::RemoveAttachment(index) => {
            conversation.remove_attachment(index);
        }
        Intent::EditProfile(next) => {
            profile.replace(next);
        }
        Intent::Send => conversation.reject_send(),
    }
}

async fn next_intent(intents: &mut Option<&mut mpsc::UnboundedReceiver<Intent>>) -> Option<Intent> {
    match intents {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

async fn drive_turn<B: GenerativeBackend>(
    client: &mut AiSessionClient<B>,
    conversation: &mut Conversation,
    profile: &mut ProfileStore,
    config_error_reported: &mut bool,
    mut intents: Option<&mut mpsc::UnboundedReceiver<Intent>>,
    turn: Turn,
) {
    let opening = client.send_stream(&turn.text, &turn.images);
    tokio::pin!(opening);

    let opened = loop {
        tokio::select! {
            result = &mut opening => break result,
            intent = next_intent(&mut intents) => match intent {
                Some(intent) => apply_side_intent(conversation, profile, intent),
                None => intents = None,
            },
        }
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(err) => {
            report_failure(conversation, config_error_reported, err);
            return;
        }
    };
    debug!(path = ?stream.path(), "reply stream opened");
    conversation.mark_streaming();

    let mut fragments = 0usize;
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(fragment)) => {
                    fragments += 1;
                    conversation.append_fragment(&fragment);
                }
                Some(Err(err)) => {
                    report_failure(conversation, config_error_reported, err.into());
                    return;
                }
                None => break,
            },
            intent = next_intent(&mut intents) => match intent {
                Some(intent) => apply_side_intent(conversation, profile, intent),
                None => intents = None,
            },
        }
    }

    debug!(fragments, "reply complete");
    conversation.finish_turn();
}

fn report_failure(conversation: &mut Conversation, config_error_reported: &mut bool, err: SessionError) {
    match err {
        SessionError::Configuration(err) if !*config_error_reported => {
            warn!("session configuration error: {err}");
            *config_error_reported = true;
            conversation.fail_turn(ChatMessage::system(err.to_string()));
        }
        err => {
            warn!("turn failed: {err}");
            conversation.fail_turn(ChatMessage::model(APOLOGY_TEXT));
        }
    }
}
