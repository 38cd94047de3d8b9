//! Conversation state: the message log, staged attachments, the input line
//! and the per-turn state machine.
//!
//! Every mutation is announced to subscribers as a [`ControllerEvent`] so a
//! presentation layer can re-render without reaching into this state.

use tokio::sync::mpsc;
use tracing::debug;

use crate::core::attachment::{ImageAttachment, PendingAttachments};
use crate::core::message::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    /// The user turn is logged and the request is on its way.
    Sending,
    /// Fragments are being appended to the trailing model message.
    Streaming,
    /// The turn failed; an apology is being logged before returning to idle.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// The log was replaced wholesale.
    ConversationReset { messages: Vec<ChatMessage> },
    MessageAppended { index: usize, message: ChatMessage },
    /// `fragment` was appended to the text of the message at `index`.
    FragmentAppended { index: usize, fragment: String },
    AttachmentsChanged { count: usize },
    InputChanged { text: String },
    StateChanged(TurnState),
    /// A send arrived while a reply was still in flight and was dropped.
    SendRejected,
}

/// What a turn hands to the session client.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub text: String,
    /// Raw base64 image payloads, data-URL headers stripped.
    pub images: Vec<String>,
}

#[derive(Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    pending: PendingAttachments,
    input: String,
    state: TurnState,
    streaming_index: Option<usize>,
    subscribers: Vec<mpsc::UnboundedSender<ControllerEvent>>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ControllerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, event: ControllerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn pending(&self) -> &PendingAttachments {
        &self.pending
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, TurnState::Sending | TurnState::Streaming)
    }

    fn set_state(&mut self, state: TurnState) {
        if self.state != state {
            self.state = state;
            self.notify(ControllerEvent::StateChanged(state));
        }
    }

    fn push(&mut self, message: ChatMessage) -> usize {
        self.messages.push(message.clone());
        let index = self.messages.len() - 1;
        self.notify(ControllerEvent::MessageAppended { index, message });
        index
    }

    /// Replaces the log with a single greeting from the model.
    pub fn reset_with_greeting(&mut self, greeting: String) {
        self.messages = vec![ChatMessage::model(greeting)];
        self.streaming_index = None;
        let messages = self.messages.clone();
        self.notify(ControllerEvent::ConversationReset { messages });
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
        let text = self.input.clone();
        self.notify(ControllerEvent::InputChanged { text });
    }

    pub fn attach(&mut self, image: ImageAttachment) {
        self.pending.attach(image);
        let count = self.pending.len();
        self.notify(ControllerEvent::AttachmentsChanged { count });
    }

    /// Unstages the image at `index`; out-of-range indices are ignored.
    pub fn remove_attachment(&mut self, index: usize) -> bool {
        if self.pending.remove(index).is_none() {
            return false;
        }
        let count = self.pending.len();
        self.notify(ControllerEvent::AttachmentsChanged { count });
        true
    }

    pub fn reject_send(&mut self) {
        debug!(state = ?self.state, "send ignored while a reply is in flight");
        self.notify(ControllerEvent::SendRejected);
    }

    /// Starts a turn from the current input and staged images.
    ///
    /// Returns `None` while a reply is in flight, or when there is neither
    /// text nor an image to send.
    pub fn begin_turn(&mut self) -> Option<Turn> {
        if self.is_busy() {
            self.reject_send();
            return None;
        }
        if self.input.trim().is_empty() && self.pending.is_empty() {
            return None;
        }

        let text = std::mem::take(&mut self.input);
        let attachments = self.pending.take();
        let images = attachments
            .iter()
            .map(|image| image.base64_payload().to_string())
            .collect();

        self.set_state(TurnState::Sending);
        self.push(ChatMessage::user(text.clone(), attachments));
        self.notify(ControllerEvent::InputChanged {
            text: String::new(),
        });
        self.notify(ControllerEvent::AttachmentsChanged { count: 0 });
        let placeholder = self.push(ChatMessage::model(String::new()));
        self.streaming_index = Some(placeholder);

        Some(Turn { text, images })
    }

    pub fn mark_streaming(&mut self) {
        if self.streaming_index.is_some() {
            self.set_state(TurnState::Streaming);
        }
    }

    /// Appends a fragment to the in-progress model message.
    pub fn append_fragment(&mut self, fragment: &str) {
        let Some(index) = self.streaming_index else {
            return;
        };
        if let Some(message) = self.messages.get_mut(index) {
            message.text.push_str(fragment);
            self.notify(ControllerEvent::FragmentAppended {
                index,
                fragment: fragment.to_string(),
            });
        }
    }

    pub fn finish_turn(&mut self) {
        self.streaming_index = None;
        self.set_state(TurnState::Idle);
    }

    /// Logs `notice` as a new message after the placeholder and returns to idle.
    pub fn fail_turn(&mut self, notice: ChatMessage) {
        self.streaming_index = None;
        self.set_state(TurnState::Failed);
        self.push(notice);
        self.set_state(TurnState::Idle);
    }

    /// Text of the model reply currently being streamed.
    pub fn streaming_text(&self) -> Option<&str> {
        self.streaming_index
            .and_then(|index| self.messages.get(index))
            .map(|message| message.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;
    use crate::utils::test_utils::test_image;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ControllerEvent>) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn empty_send_is_a_silent_no_op() {
        let mut conversation = Conversation::new();
        conversation.reset_with_greeting("hello".to_string());
        let mut rx = conversation.subscribe();

        conversation.set_input("   ");
        drain(&mut rx);
        assert!(conversation.begin_turn().is_none());

        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.state(), TurnState::Idle);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn begin_turn_logs_user_message_and_placeholder() {
        let mut conversation = Conversation::new();
        conversation.set_input("look at these");
        conversation.attach(test_image("AAA"));
        conversation.attach(test_image("BBB"));

        let turn = conversation.begin_turn().expect("turn");
        assert_eq!(turn.text, "look at these");
        assert_eq!(turn.images, vec!["AAA".to_string(), "BBB".to_string()]);

        let messages = conversation.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].attachments, vec![test_image("AAA"), test_image("BBB")]);
        assert_eq!(messages[1].role, Role::Model);
        assert!(messages[1].text.is_empty());

        assert!(conversation.pending().is_empty());
        assert_eq!(conversation.input(), "");
        assert_eq!(conversation.state(), TurnState::Sending);
    }

    #[test]
    fn image_only_turns_are_allowed() {
        let mut conversation = Conversation::new();
        conversation.attach(test_image("AAA"));
        let turn = conversation.begin_turn().expect("turn");
        assert_eq!(turn.text, "");
        assert_eq!(turn.images.len(), 1);
    }

    #[test]
    fn second_turn_is_rejected_while_busy() {
        let mut conversation = Conversation::new();
        conversation.set_input("first");
        conversation.begin_turn().expect("turn");
        conversation.mark_streaming();
        let mut rx = conversation.subscribe();

        conversation.set_input("second");
        assert!(conversation.begin_turn().is_none());
        assert_eq!(conversation.messages().len(), 2);
        assert_eq!(conversation.input(), "second");
        assert!(drain(&mut rx).contains(&ControllerEvent::SendRejected));
    }

    #[test]
    fn send_is_rejected_before_the_first_fragment() {
        let mut conversation = Conversation::new();
        conversation.set_input("first");
        conversation.begin_turn().expect("turn");
        let mut rx = conversation.subscribe();
        assert_eq!(conversation.state(), TurnState::Sending);

        conversation.set_input("second");
        assert!(conversation.begin_turn().is_none());
        assert_eq!(conversation.state(), TurnState::Sending);
        assert_eq!(conversation.messages().len(), 2);
        assert_eq!(conversation.input(), "second");
        assert!(drain(&mut rx).contains(&ControllerEvent::SendRejected));
    }

    #[test]
    fn fragments_accumulate_in_order() {
        let mut conversation = Conversation::new();
        conversation.set_input("hi");
        conversation.begin_turn().expect("turn");
        conversation.mark_streaming();
        let mut rx = conversation.subscribe();

        conversation.append_fragment("Hel");
        conversation.append_fragment("lo");
        assert_eq!(conversation.streaming_text(), Some("Hello"));
        conversation.finish_turn();

        assert_eq!(conversation.messages()[1].text, "Hello");
        assert_eq!(conversation.state(), TurnState::Idle);
        assert_eq!(
            drain(&mut rx),
            vec![
                ControllerEvent::FragmentAppended {
                    index: 1,
                    fragment: "Hel".to_string()
                },
                ControllerEvent::FragmentAppended {
                    index: 1,
                    fragment: "lo".to_string()
                },
                ControllerEvent::StateChanged(TurnState::Idle),
            ]
        );
    }

    #[test]
    fn failed_turn_appends_notice_after_placeholder() {
        let mut conversation = Conversation::new();
        conversation.set_input("hi");
        conversation.begin_turn().expect("turn");
        conversation.mark_streaming();
        conversation.append_fragment("par");
        let mut rx = conversation.subscribe();

        conversation.fail_turn(ChatMessage::model("sorry"));

        let messages = conversation.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].text, "par");
        assert_eq!(messages[2].text, "sorry");
        assert_eq!(conversation.state(), TurnState::Idle);

        let events = drain(&mut rx);
        assert_eq!(events.first(), Some(&ControllerEvent::StateChanged(TurnState::Failed)));
        assert_eq!(events.last(), Some(&ControllerEvent::StateChanged(TurnState::Idle)));

        conversation.append_fragment("late");
        assert_eq!(conversation.messages()[1].text, "par");
    }

    #[test]
    fn greeting_reset_replaces_the_log() {
        let mut conversation = Conversation::new();
        conversation.set_input("hi");
        conversation.begin_turn().expect("turn");
        conversation.finish_turn();

        conversation.reset_with_greeting("welcome back".to_string());
        assert_eq!(conversation.messages(), &[ChatMessage::model("welcome back")]);
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let mut conversation = Conversation::new();
        let rx = conversation.subscribe();
        drop(rx);
        conversation.set_input("x");
        assert!(conversation.subscribers.is_empty());
    }
}
