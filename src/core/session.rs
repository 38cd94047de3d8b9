//! AI session client.
//!
//! Turns `(text, images)` into provider calls. Text-only turns run on a
//! long-lived [`ChatSession`] whose history grows with every completed
//! exchange. Turns that carry images are sent as one-shot multimodal requests:
//! the provider's chat sessions cannot hold inline binary data, so those turns
//! neither read nor extend the session history.

use std::error::Error;
use std::fmt;
use tracing::debug;

use crate::api::{Content, GenerateContentRequest, GenerationConfig, Part};
use crate::core::backend::GenerativeBackend;
use crate::core::chat_stream::{FragmentStream, TransportError};
use crate::core::constants::{
    DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_TEMPERATURE, IMAGE_MIME_TYPE,
};
use crate::core::providers::ConfigurationError;

#[derive(Debug)]
pub enum SessionError {
    Configuration(ConfigurationError),
    Transport(TransportError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Configuration(err) => write!(f, "{err}"),
            SessionError::Transport(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SessionError::Configuration(err) => Some(err),
            SessionError::Transport(err) => Some(err),
        }
    }
}

impl From<ConfigurationError> for SessionError {
    fn from(err: ConfigurationError) -> Self {
        SessionError::Configuration(err)
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(err)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub model: String,
    pub temperature: f32,
    pub system_instruction: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl SessionSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.model.trim().is_empty() {
            return Err(ConfigurationError::empty_model());
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigurationError::invalid_temperature(self.temperature));
        }
        Ok(())
    }
}

/// Which request shape a turn was sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPath {
    /// Sent on the running session, extending its history.
    Session,
    /// Stateless multimodal request carrying inline images.
    OneShot,
}

/// Provider-side conversational context. Instruction and temperature are
/// fixed for the lifetime of the session.
#[derive(Debug, Clone)]
pub struct ChatSession {
    model: String,
    system_instruction: String,
    temperature: f32,
    history: Vec<Content>,
}

impl ChatSession {
    fn new(settings: &SessionSettings) -> Self {
        Self {
            model: settings.model.clone(),
            system_instruction: settings.system_instruction.clone(),
            temperature: settings.temperature,
            history: Vec::new(),
        }
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    fn request_with(&self, user: &Content) -> GenerateContentRequest {
        let mut contents = self.history.clone();
        contents.push(user.clone());
        GenerateContentRequest {
            model: self.model.clone(),
            contents,
            system_instruction: Some(Content::instruction(&self.system_instruction)),
            generation_config: Some(GenerationConfig {
                temperature: Some(self.temperature),
            }),
        }
    }

    fn record(&mut self, user: Content, reply: String) {
        self.history.push(user);
        self.history.push(Content::model_text(reply));
    }
}

struct PendingCommit<'a> {
    session: &'a mut ChatSession,
    user: Content,
    reply: String,
}

/// Fragments of one reply, in emission order.
///
/// For session turns the exchange is written to the session history once the
/// stream is exhausted without error.
pub struct ResponseStream<'a> {
    inner: FragmentStream,
    path: RequestPath,
    commit: Option<PendingCommit<'a>>,
}

impl<'a> ResponseStream<'a> {
    pub fn path(&self) -> RequestPath {
        self.path
    }

    pub async fn next(&mut self) -> Option<Result<String, TransportError>> {
        match self.inner.next().await {
            Some(Ok(fragment)) => {
                if let Some(commit) = self.commit.as_mut() {
                    commit.reply.push_str(&fragment);
                }
                Some(Ok(fragment))
            }
            Some(Err(err)) => {
                self.commit = None;
                Some(Err(err))
            }
            None => {
                if let Some(commit) = self.commit.take() {
                    commit.session.record(commit.user, commit.reply);
                }
                None
            }
        }
    }
}

pub struct AiSessionClient<B> {
    backend: B,
    settings: SessionSettings,
    session: Option<ChatSession>,
}

impl<B: GenerativeBackend> AiSessionClient<B> {
    pub fn new(backend: B, settings: SessionSettings) -> Self {
        Self {
            backend,
            settings,
            session: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn session(&self) -> Option<&ChatSession> {
        self.session.as_ref()
    }

    /// Creates the session handle unless one already exists.
    pub fn ensure_session(&mut self) -> Result<(), ConfigurationError> {
        self.ensure_session_mut().map(|_| ())
    }

    fn ensure_session_mut(&mut self) -> Result<&mut ChatSession, ConfigurationError> {
        if self.session.is_none() {
            self.settings.validate()?;
            debug!(
                model = %self.settings.model,
                temperature = self.settings.temperature,
                "creating chat session"
            );
        }
        Ok(self
            .session
            .get_or_insert_with(|| ChatSession::new(&self.settings)))
    }

    /// Drops the session handle; the next send creates a fresh one.
    pub fn reset_session(&mut self) {
        if self.session.take().is_some() {
            debug!("chat session reset");
        }
    }

    /// Changes the instruction used for future sessions, resetting the current
    /// one if the instruction differs.
    pub fn set_system_instruction(&mut self, instruction: String) {
        if self.settings.system_instruction != instruction {
            self.settings.system_instruction = instruction;
            self.reset_session();
        }
    }

    fn one_shot_request(&self, text: &str, images: &[String]) -> GenerateContentRequest {
        let mut parts = Vec::with_capacity(images.len() + 1);
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
        parts.extend(
            images
                .iter()
                .map(|data| Part::inline_data(IMAGE_MIME_TYPE, data.as_str())),
        );
        GenerateContentRequest {
            model: self.settings.model.clone(),
            contents: vec![Content::user(parts)],
            system_instruction: Some(Content::instruction(&self.settings.system_instruction)),
            generation_config: None,
        }
    }

    /// Sends a turn and waits for the full reply. Returns an empty string when
    /// the provider produced no text.
    pub async fn send(&mut self, text: &str, images: &[String]) -> Result<String, SessionError> {
        self.ensure_session()?;

        if !images.is_empty() {
            debug!(images = images.len(), "one-shot multimodal request");
            let request = self.one_shot_request(text, images);
            return Ok(self.backend.generate(request).await?.text());
        }

        let user = Content::user(vec![Part::text(text)]);
        let request = self.ensure_session_mut()?.request_with(&user);
        let reply = self.backend.generate(request).await?.text();
        self.ensure_session_mut()?.record(user, reply.clone());
        Ok(reply)
    }

    /// Sends a turn and returns its reply as a stream of fragments.
    pub async fn send_stream(
        &mut self,
        text: &str,
        images: &[String],
    ) -> Result<ResponseStream<'_>, SessionError> {
        self.ensure_session()?;

        if !images.is_empty() {
            debug!(images = images.len(), "one-shot multimodal stream");
            let request = self.one_shot_request(text, images);
            let inner = self.backend.generate_stream(request).await?;
            return Ok(ResponseStream {
                inner,
                path: RequestPath::OneShot,
                commit: None,
            });
        }

        let user = Content::user(vec![Part::text(text)]);
        let request = self.ensure_session_mut()?.request_with(&user);
        let inner = self.backend.generate_stream(request).await?;
        let session = self.ensure_session_mut()?;
        Ok(ResponseStream {
            inner,
            path: RequestPath::Session,
            commit: Some(PendingCommit {
                session,
                user,
                reply: String::new(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ROLE_MODEL;
    use crate::utils::test_utils::{CallKind, ScriptedBackend, ScriptedReply};

    fn client(backend: ScriptedBackend) -> AiSessionClient<ScriptedBackend> {
        AiSessionClient::new(backend, SessionSettings::default())
    }

    async fn collect(stream: &mut ResponseStream<'_>) -> Result<String, TransportError> {
        let mut text = String::new();
        while let Some(item) = stream.next().await {
            text.push_str(&item?);
        }
        Ok(text)
    }

    #[test]
    fn ensure_session_is_idempotent() {
        let mut client = client(ScriptedBackend::new());
        assert!(client.session().is_none());
        client.ensure_session().unwrap();
        client.ensure_session().unwrap();
        let session = client.session().unwrap();
        assert_eq!(session.temperature(), DEFAULT_TEMPERATURE);
        assert_eq!(session.system_instruction(), DEFAULT_SYSTEM_INSTRUCTION);
        assert!(session.history().is_empty());
    }

    #[test]
    fn invalid_settings_fail_session_creation() {
        let settings = SessionSettings {
            temperature: 3.5,
            ..SessionSettings::default()
        };
        let mut client = AiSessionClient::new(ScriptedBackend::new(), settings);
        let err = client.ensure_session().unwrap_err();
        assert_eq!(err, ConfigurationError::invalid_temperature(3.5));
        assert!(client.session().is_none());

        let settings = SessionSettings {
            model: " ".to_string(),
            ..SessionSettings::default()
        };
        let mut client = AiSessionClient::new(ScriptedBackend::new(), settings);
        assert_eq!(
            client.ensure_session().unwrap_err(),
            ConfigurationError::empty_model()
        );
    }

    #[tokio::test]
    async fn text_turns_extend_the_session_history() {
        let backend = ScriptedBackend::new();
        backend.push_reply(ScriptedReply::fragments(&["Hel", "lo"]));
        backend.push_reply(ScriptedReply::fragments(&["again"]));
        let mut client = client(backend);

        let mut stream = client.send_stream("hi", &[]).await.unwrap();
        assert_eq!(stream.path(), RequestPath::Session);
        assert_eq!(collect(&mut stream).await.unwrap(), "Hello");
        drop(stream);

        let history = client.session().unwrap().history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].joined_text(), "hi");
        assert_eq!(history[1].role.as_deref(), Some(ROLE_MODEL));
        assert_eq!(history[1].joined_text(), "Hello");

        let reply = client.send("and now?", &[]).await.unwrap();
        assert_eq!(reply, "again");

        let requests = client.backend().requests();
        assert_eq!(requests[1].0, CallKind::Generate);
        assert_eq!(requests[1].1.contents.len(), 3);
        assert_eq!(
            requests[1].1.generation_config,
            Some(GenerationConfig {
                temperature: Some(DEFAULT_TEMPERATURE)
            })
        );
        assert_eq!(client.session().unwrap().history().len(), 4);
    }

    #[tokio::test]
    async fn image_turns_bypass_the_session() {
        let backend = ScriptedBackend::new();
        backend.push_reply(ScriptedReply::fragments(&["looks right"]));
        let mut client = client(backend);

        let images = vec!["QUJD".to_string(), "REVG".to_string()];
        let mut stream = client.send_stream("check", &images).await.unwrap();
        assert_eq!(stream.path(), RequestPath::OneShot);
        assert_eq!(collect(&mut stream).await.unwrap(), "looks right");
        drop(stream);

        assert!(client.session().unwrap().history().is_empty());

        let requests = client.backend().requests();
        let (kind, request) = &requests[0];
        assert_eq!(*kind, CallKind::Stream);
        assert_eq!(request.contents.len(), 1);
        let parts = &request.contents[0].parts;
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].text.as_deref(), Some("check"));
        for (part, data) in parts[1..].iter().zip(&images) {
            let blob = part.inline_data.as_ref().unwrap();
            assert_eq!(blob.mime_type, IMAGE_MIME_TYPE);
            assert_eq!(&blob.data, data);
        }
        assert!(request.generation_config.is_none());
        assert!(request.system_instruction.is_some());
    }

    #[tokio::test]
    async fn failed_stream_leaves_history_untouched() {
        let backend = ScriptedBackend::new();
        backend.push_reply(ScriptedReply::Fragments(vec![
            Ok("partial".to_string()),
            Err(TransportError::Stream("reset".to_string())),
        ]));
        let mut client = client(backend);

        let mut stream = client.send_stream("hi", &[]).await.unwrap();
        assert!(collect(&mut stream).await.is_err());
        drop(stream);
        assert!(client.session().unwrap().history().is_empty());
    }

    #[tokio::test]
    async fn refused_request_propagates_transport_error() {
        let backend = ScriptedBackend::new();
        backend.push_reply(ScriptedReply::Refuse(TransportError::Status {
            code: 500,
            body: "boom".to_string(),
        }));
        let mut client = client(backend);

        let err = client.send("hi", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Transport(TransportError::Status { code: 500, .. })
        ));
    }

    #[tokio::test]
    async fn empty_provider_reply_is_an_empty_string() {
        let backend = ScriptedBackend::new();
        backend.push_reply(ScriptedReply::Fragments(Vec::new()));
        let mut client = client(backend);
        assert_eq!(client.send("hi", &[]).await.unwrap(), "");
    }

    #[test]
    fn changing_the_instruction_resets_the_session() {
        let mut client = client(ScriptedBackend::new());
        client.ensure_session().unwrap();

        client.set_system_instruction(DEFAULT_SYSTEM_INSTRUCTION.to_string());
        assert!(client.session().is_some());

        client.set_system_instruction("new rules".to_string());
        assert!(client.session().is_none());
        client.ensure_session().unwrap();
        assert_eq!(client.session().unwrap().system_instruction(), "new rules");
    }
}
