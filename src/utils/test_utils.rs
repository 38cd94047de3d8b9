use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::api::{Candidate, Content, GenerateContentRequest, GenerateContentResponse};
use crate::core::attachment::ImageAttachment;
use crate::core::backend::GenerativeBackend;
use crate::core::chat_stream::{FragmentStream, StreamSender, TransportError};
use crate::core::profile::StudentProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Generate,
    Stream,
}

pub enum ScriptedReply {
    Fragments(Vec<Result<String, TransportError>>),
    Refuse(TransportError),
}

impl ScriptedReply {
    pub fn fragments(parts: &[&str]) -> Self {
        ScriptedReply::Fragments(parts.iter().map(|p| Ok(p.to_string())).collect())
    }
}

/// Replays queued replies and records every request. An empty queue answers "ok".
#[derive(Default)]
pub struct ScriptedBackend {
    requests: Mutex<Vec<(CallKind, GenerateContentRequest)>>,
    replies: Mutex<VecDeque<ScriptedReply>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<(CallKind, GenerateContentRequest)> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, kind: CallKind, request: GenerateContentRequest) -> ScriptedReply {
        self.requests.lock().unwrap().push((kind, request));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedReply::fragments(&["ok"]))
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn generate(
        &self,
        request: GenerateContentRequest,
    ) -> Result<GenerateContentResponse, TransportError> {
        match self.next_reply(CallKind::Generate, request) {
            ScriptedReply::Refuse(err) => Err(err),
            ScriptedReply::Fragments(items) => {
                let text = items.into_iter().collect::<Result<String, _>>()?;
                let candidates = if text.is_empty() {
                    Vec::new()
                } else {
                    vec![Candidate {
                        content: Some(Content::model_text(text)),
                        finish_reason: Some("STOP".to_string()),
                    }]
                };
                Ok(GenerateContentResponse { candidates })
            }
        }
    }

    async fn generate_stream(
        &self,
        request: GenerateContentRequest,
    ) -> Result<FragmentStream, TransportError> {
        match self.next_reply(CallKind::Stream, request) {
            ScriptedReply::Refuse(err) => Err(err),
            ScriptedReply::Fragments(items) => Ok(FragmentStream::from_fragments(items)),
        }
    }
}

/// Hands out a single stream whose fragments the test feeds by hand.
pub struct ChannelBackend {
    stream: Mutex<Option<FragmentStream>>,
    requests: Mutex<Vec<GenerateContentRequest>>,
}

impl ChannelBackend {
    pub fn new() -> (Self, StreamSender) {
        let (sender, stream) = FragmentStream::channel();
        (
            Self {
                stream: Mutex::new(Some(stream)),
                requests: Mutex::new(Vec::new()),
            },
            sender,
        )
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerativeBackend for ChannelBackend {
    async fn generate(
        &self,
        _request: GenerateContentRequest,
    ) -> Result<GenerateContentResponse, TransportError> {
        Err(TransportError::Request("not scripted".to_string()))
    }

    async fn generate_stream(
        &self,
        request: GenerateContentRequest,
    ) -> Result<FragmentStream, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.stream
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::Request("stream already taken".to_string()))
    }
}

pub fn test_profile() -> StudentProfile {
    StudentProfile {
        name: "Kim".to_string(),
        grade: "12".to_string(),
        proficiency_tier: "2".to_string(),
        target_institutions: vec!["A University".to_string()],
    }
}

pub fn test_image(tag: &str) -> ImageAttachment {
    ImageAttachment::from_data_url(format!("data:image/jpeg;base64,{tag}"))
}
