//! Session capture and replay for chat clients
//!
//! `ChatClientRecorder` decorates a client. In record mode it forwards calls
//! and captures each (messages, result) exchange, flushing them to a JSON
//! session file. In replay mode it loads the session file and serves the
//! captured exchanges back in order, verifying that each call's messages
//! match the recorded ones, so sessions re-run without network access.

use crate::client::{ChatClient, StreamEvent};
use crate::config::{ModelInfo, RecorderMode};
use crate::logger::Logger;
use crate::message::{CreateResult, Message};
use crate::{Error, Result};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One captured request/response exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordedTurn {
    messages: Vec<Message>,
    result: CreateResult,
    /// Whether the original call was streamed
    #[serde(default)]
    streamed: bool,
}

/// Recording decorator over a chat client
pub struct ChatClientRecorder {
    inner: Box<dyn ChatClient>,
    mode: RecorderMode,
    session_path: PathBuf,
    turns: Arc<Mutex<Vec<RecordedTurn>>>,
    cursor: AtomicUsize,
    logger: Arc<dyn Logger>,
}

impl ChatClientRecorder {
    /// Wrap a client. Replay mode loads the session file immediately.
    pub fn new(
        inner: Box<dyn ChatClient>,
        mode: RecorderMode,
        session_path: PathBuf,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let turns = match mode {
            RecorderMode::Record => Vec::new(),
            RecorderMode::Replay => {
                let text = std::fs::read_to_string(&session_path)?;
                serde_json::from_str(&text)?
            }
        };
        logger.info(&format!(
            "Recorder session: {} ({} mode)",
            session_path.display(),
            mode.as_str()
        ));
        Ok(Self {
            inner,
            mode,
            session_path,
            turns: Arc::new(Mutex::new(turns)),
            cursor: AtomicUsize::new(0),
            logger,
        })
    }

    /// Number of captured or loaded exchanges
    pub fn turn_count(&self) -> usize {
        self.turns.lock().unwrap().len()
    }

    /// Persist the captured session to the session file
    pub fn save(&self) -> Result<()> {
        let turns = self.turns.lock().unwrap();
        let json = serde_json::to_string_pretty(&*turns)?;
        if let Some(parent) = self.session_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.session_path, json)?;
        Ok(())
    }

    fn next_turn(&self, messages: &[Message]) -> Result<RecordedTurn> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let turns = self.turns.lock().unwrap();
        let turn = turns.get(index).cloned().ok_or_else(|| {
            Error::Recording(format!("session exhausted after {} turns", turns.len()))
        })?;
        if turn.messages != messages {
            return Err(Error::Recording(format!(
                "messages for turn {} do not match the recorded session",
                index
            )));
        }
        Ok(turn)
    }
}

#[async_trait::async_trait]
impl ChatClient for ChatClientRecorder {
    async fn create(&self, messages: &[Message]) -> Result<CreateResult> {
        match self.mode {
            RecorderMode::Record => {
                let result = self.inner.create(messages).await?;
                self.turns.lock().unwrap().push(RecordedTurn {
                    messages: messages.to_vec(),
                    result: result.clone(),
                    streamed: false,
                });
                Ok(result)
            }
            RecorderMode::Replay => Ok(self.next_turn(messages)?.result),
        }
    }

    fn create_stream(
        &self,
        messages: &[Message],
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>> {
        match self.mode {
            RecorderMode::Record => {
                let mut inner_stream = self.inner.create_stream(messages);
                let turns = Arc::clone(&self.turns);
                let messages = messages.to_vec();

                Box::pin(async_stream::stream! {
                    use futures::StreamExt;

                    let mut content = String::new();
                    let mut usage = None;

                    while let Some(event) = inner_stream.next().await {
                        match event {
                            Ok(event) => {
                                content.push_str(&event.delta);
                                let done = event.done;
                                if done {
                                    usage = event.usage.clone();
                                }
                                yield Ok(event);
                                if done {
                                    break;
                                }
                            }
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }

                    turns.lock().unwrap().push(RecordedTurn {
                        messages,
                        result: CreateResult {
                            content,
                            usage: usage.unwrap_or_default(),
                            finish_reason: None,
                        },
                        streamed: true,
                    });
                })
            }
            RecorderMode::Replay => {
                let turn = self.next_turn(messages);
                Box::pin(async_stream::stream! {
                    match turn {
                        Ok(turn) => {
                            yield Ok(StreamEvent {
                                delta: turn.result.content.clone(),
                                done: false,
                                usage: None,
                            });
                            yield Ok(StreamEvent {
                                delta: String::new(),
                                done: true,
                                usage: Some(turn.result.usage.clone()),
                            });
                        }
                        Err(e) => yield Err(e),
                    }
                })
            }
        }
    }

    fn resolved_model(&self) -> &str {
        self.inner.resolved_model()
    }

    fn model_info(&self) -> &ModelInfo {
        self.inner.model_info()
    }
}

impl Drop for ChatClientRecorder {
    /// Best-effort flush of a record-mode session
    fn drop(&mut self) {
        if self.mode == RecorderMode::Record {
            if let Err(e) = self.save() {
                self.logger
                    .info(&format!("failed to flush recorder session: {}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::BufferLogger;
    use crate::message::Usage;

    /// Client stub that answers every request with a fixed completion
    struct StaticClient {
        model: String,
        info: ModelInfo,
        reply: String,
    }

    impl StaticClient {
        fn boxed(reply: &str) -> Box<dyn ChatClient> {
            Box::new(Self {
                model: "gpt-4.1".to_string(),
                info: ModelInfo::default(),
                reply: reply.to_string(),
            })
        }

        fn result(&self) -> CreateResult {
            CreateResult {
                content: self.reply.clone(),
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
                finish_reason: Some("stop".to_string()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatClient for StaticClient {
        async fn create(&self, _messages: &[Message]) -> Result<CreateResult> {
            Ok(self.result())
        }

        fn create_stream(
            &self,
            _messages: &[Message],
        ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>> {
            let result = self.result();
            Box::pin(async_stream::stream! {
                yield Ok(StreamEvent { delta: result.content.clone(), done: false, usage: None });
                yield Ok(StreamEvent { delta: String::new(), done: true, usage: Some(result.usage.clone()) });
            })
        }

        fn resolved_model(&self) -> &str {
            &self.model
        }

        fn model_info(&self) -> &ModelInfo {
            &self.info
        }
    }

    fn session_file(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }

    #[tokio::test]
    async fn test_record_then_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = session_file(&dir, "session.json");
        let logger = Arc::new(BufferLogger::new());
        let messages = vec![Message::user("What is a quokka?")];

        let recorder = ChatClientRecorder::new(
            StaticClient::boxed("A small wallaby."),
            RecorderMode::Record,
            path.clone(),
            Arc::clone(&logger) as Arc<dyn Logger>,
        )
        .unwrap();

        let recorded = recorder.create(&messages).await.unwrap();
        assert_eq!(recorded.content, "A small wallaby.");
        assert_eq!(recorder.turn_count(), 1);
        recorder.save().unwrap();

        // Replay against a client that would answer differently; the recorded
        // response must win and the inner client must not be consulted.
        let replayer = ChatClientRecorder::new(
            StaticClient::boxed("WRONG"),
            RecorderMode::Replay,
            path,
            Arc::clone(&logger) as Arc<dyn Logger>,
        )
        .unwrap();

        let replayed = replayer.create(&messages).await.unwrap();
        assert_eq!(replayed, recorded);
    }

    #[tokio::test]
    async fn test_replay_rejects_mismatched_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = session_file(&dir, "session.json");
        let logger = Arc::new(BufferLogger::new());

        let recorder = ChatClientRecorder::new(
            StaticClient::boxed("hi"),
            RecorderMode::Record,
            path.clone(),
            Arc::clone(&logger) as Arc<dyn Logger>,
        )
        .unwrap();
        recorder.create(&[Message::user("original")]).await.unwrap();
        recorder.save().unwrap();

        let replayer = ChatClientRecorder::new(
            StaticClient::boxed("hi"),
            RecorderMode::Replay,
            path,
            Arc::clone(&logger) as Arc<dyn Logger>,
        )
        .unwrap();

        let err = replayer
            .create(&[Message::user("different")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Recording(_)));
    }

    #[tokio::test]
    async fn test_replay_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let path = session_file(&dir, "session.json");
        let logger = Arc::new(BufferLogger::new());
        let messages = vec![Message::user("once")];

        let recorder = ChatClientRecorder::new(
            StaticClient::boxed("hi"),
            RecorderMode::Record,
            path.clone(),
            Arc::clone(&logger) as Arc<dyn Logger>,
        )
        .unwrap();
        recorder.create(&messages).await.unwrap();
        recorder.save().unwrap();

        let replayer = ChatClientRecorder::new(
            StaticClient::boxed("hi"),
            RecorderMode::Replay,
            path,
            Arc::clone(&logger) as Arc<dyn Logger>,
        )
        .unwrap();

        replayer.create(&messages).await.unwrap();
        let err = replayer.create(&messages).await.unwrap_err();
        assert!(matches!(err, Error::Recording(ref m) if m.contains("exhausted")));
    }

    #[tokio::test]
    async fn test_streaming_record_and_replay() {
        use futures::StreamExt;

        let dir = tempfile::tempdir().unwrap();
        let path = session_file(&dir, "session.json");
        let logger = Arc::new(BufferLogger::new());
        let messages = vec![Message::user("stream it")];

        let recorder = ChatClientRecorder::new(
            StaticClient::boxed("chunked reply"),
            RecorderMode::Record,
            path.clone(),
            Arc::clone(&logger) as Arc<dyn Logger>,
        )
        .unwrap();

        let mut stream = recorder.create_stream(&messages);
        let mut recorded = String::new();
        while let Some(event) = stream.next().await {
            let event = event.unwrap();
            recorded.push_str(&event.delta);
            if event.done {
                break;
            }
        }
        drop(stream);
        assert_eq!(recorded, "chunked reply");
        assert_eq!(recorder.turn_count(), 1);
        recorder.save().unwrap();

        let replayer = ChatClientRecorder::new(
            StaticClient::boxed("WRONG"),
            RecorderMode::Replay,
            path,
            Arc::clone(&logger) as Arc<dyn Logger>,
        )
        .unwrap();

        let mut stream = replayer.create_stream(&messages);
        let mut replayed = String::new();
        let mut usage = None;
        while let Some(event) = stream.next().await {
            let event = event.unwrap();
            replayed.push_str(&event.delta);
            if event.done {
                usage = event.usage.clone();
                break;
            }
        }
        assert_eq!(replayed, "chunked reply");
        assert_eq!(usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_replay_requires_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(BufferLogger::new());
        let missing = session_file(&dir, "missing.json");

        let err = ChatClientRecorder::new(
            StaticClient::boxed("hi"),
            RecorderMode::Replay,
            missing,
            logger as Arc<dyn Logger>,
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_drop_flushes_record_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = session_file(&dir, "flushed.json");
        let logger = Arc::new(BufferLogger::new());
        let messages = vec![Message::user("flush me")];

        {
            let recorder = ChatClientRecorder::new(
                StaticClient::boxed("persisted"),
                RecorderMode::Record,
                path.clone(),
                Arc::clone(&logger) as Arc<dyn Logger>,
            )
            .unwrap();
            recorder.create(&messages).await.unwrap();
        }

        assert!(path.exists());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("persisted"));
    }
}
