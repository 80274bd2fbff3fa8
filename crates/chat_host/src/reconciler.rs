//! The stream reconciler: folds an ordered sequence of response
//! fragments into the loading placeholder message, with exactly one
//! transition to a terminal non-loading state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use shared::gateway_api::StreamChunk;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::conversation::{Conversation, UpdateOptions};

/// Counter owned by the controller, bumped whenever the active mode
/// changes or a conversation is cleared. Tickets issued before a bump go
/// stale, which stops in-flight streams from writing into state that no
/// longer belongs to them.
#[derive(Debug, Clone, Default)]
pub struct ModeEpoch(Arc<AtomicU64>);

impl ModeEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn ticket(&self) -> StreamTicket {
        StreamTicket {
            epoch: Arc::clone(&self.0),
            issued: self.0.load(Ordering::SeqCst),
        }
    }
}

/// A claim on the epoch at the time a request started.
#[derive(Debug, Clone)]
pub struct StreamTicket {
    epoch: Arc<AtomicU64>,
    issued: u64,
}

impl StreamTicket {
    pub fn is_live(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) == self.issued
    }
}

/// Advisory hook invoked after every write the reconciler performs
/// (intermediate or final). Used for persistence and display refresh;
/// has no effect on data correctness.
pub trait WriteObserver {
    fn message_updated(&mut self, conversation: &Conversation);
}

/// Observer that does nothing.
pub struct NoopObserver;

impl WriteObserver for NoopObserver {
    fn message_updated(&mut self, _conversation: &Conversation) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Sequence exhausted normally; message finalized.
    Completed,
    /// Sequence raised an error; accumulated text kept, diagnostic
    /// suffix appended, message finalized. No retry.
    Failed(String),
    /// Ticket went stale mid-stream; no further writes were performed
    /// and the terminal transition is left to whoever owns the
    /// conversation now.
    Cancelled,
}

/// Drain `rx` into the message `message_id`, which must already be
/// present with `is_loading = true`. Text accumulates by appending each
/// fragment onto whatever the placeholder started with; a fragment's
/// non-empty sources replace the last-known value (last-fragment-wins).
pub async fn reconcile(
    conversation: &mut Conversation,
    message_id: &str,
    rx: &mut UnboundedReceiver<StreamChunk>,
    ticket: &StreamTicket,
    observer: &mut dyn WriteObserver,
) -> StreamOutcome {
    let mut accumulated = conversation
        .get(message_id)
        .map(|m| m.text.clone())
        .unwrap_or_default();
    let mut final_sources = None;

    loop {
        let chunk = rx.recv().await;
        if !ticket.is_live() {
            tracing::debug!(message_id, "stream superseded, dropping remaining fragments");
            return StreamOutcome::Cancelled;
        }
        match chunk {
            Some(StreamChunk::Delta { text, sources }) => {
                accumulated.push_str(&text);
                if sources.is_some() {
                    final_sources = sources;
                }
                conversation.update(
                    message_id,
                    accumulated.clone(),
                    UpdateOptions {
                        sources: final_sources.clone(),
                        finished_loading: false,
                        ..Default::default()
                    },
                );
                observer.message_updated(conversation);
            }
            Some(StreamChunk::Error(message)) => {
                accumulated.push_str(&format!("\n\n[ERROR: {}]", message));
                conversation.update(
                    message_id,
                    accumulated,
                    UpdateOptions {
                        sources: final_sources,
                        finished_loading: true,
                        ..Default::default()
                    },
                );
                observer.message_updated(conversation);
                return StreamOutcome::Failed(message);
            }
            // A closed channel without a Done marker counts as normal
            // exhaustion; zero fragments finalize an empty message.
            Some(StreamChunk::Done) | None => {
                conversation.update(
                    message_id,
                    accumulated,
                    UpdateOptions {
                        sources: final_sources,
                        finished_loading: true,
                        ..Default::default()
                    },
                );
                observer.message_updated(conversation);
                return StreamOutcome::Completed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::AppendOptions;
    use shared::chat::{AppMode, ChatRole, GroundingSource};
    use tokio::sync::mpsc;

    fn placeholder(conversation: &mut Conversation) -> String {
        conversation.append(
            ChatRole::Ai,
            "",
            AppendOptions {
                is_loading: true,
                ..Default::default()
            },
        )
    }

    fn source(uri: &str) -> GroundingSource {
        GroundingSource {
            uri: Some(uri.to_string()),
            title: None,
        }
    }

    /// Records the loading flag after every write, to check that the
    /// terminal transition happens exactly once.
    struct FlagRecorder {
        id: String,
        flags: Vec<bool>,
    }

    impl WriteObserver for FlagRecorder {
        fn message_updated(&mut self, conversation: &Conversation) {
            self.flags
                .push(conversation.get(&self.id).unwrap().is_loading);
        }
    }

    #[tokio::test]
    async fn concatenates_fragments_in_order() {
        let mut conversation = Conversation::new(AppMode::LuaChat);
        let id = placeholder(&mut conversation);
        let (tx, mut rx) = mpsc::unbounded_channel();
        for text in ["Hi", " there"] {
            tx.send(StreamChunk::Delta {
                text: text.into(),
                sources: None,
            })
            .unwrap();
        }
        tx.send(StreamChunk::Done).unwrap();
        drop(tx);

        let ticket = ModeEpoch::new().ticket();
        let outcome =
            reconcile(&mut conversation, &id, &mut rx, &ticket, &mut NoopObserver).await;

        assert_eq!(outcome, StreamOutcome::Completed);
        let msg = conversation.get(&id).unwrap();
        assert_eq!(msg.text, "Hi there");
        assert!(!msg.is_loading);
    }

    #[tokio::test]
    async fn terminal_transition_happens_exactly_once() {
        let mut conversation = Conversation::new(AppMode::LuaChat);
        let id = placeholder(&mut conversation);
        let (tx, mut rx) = mpsc::unbounded_channel();
        for text in ["a", "b", "c"] {
            tx.send(StreamChunk::Delta {
                text: text.into(),
                sources: None,
            })
            .unwrap();
        }
        tx.send(StreamChunk::Done).unwrap();
        drop(tx);

        let mut recorder = FlagRecorder {
            id: id.clone(),
            flags: Vec::new(),
        };
        let ticket = ModeEpoch::new().ticket();
        reconcile(&mut conversation, &id, &mut rx, &ticket, &mut recorder).await;

        assert_eq!(recorder.flags, vec![true, true, true, false]);
    }

    #[tokio::test]
    async fn zero_fragments_finalize_empty() {
        let mut conversation = Conversation::new(AppMode::LuaChat);
        let id = placeholder(&mut conversation);
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamChunk>();
        drop(tx);

        let ticket = ModeEpoch::new().ticket();
        let outcome =
            reconcile(&mut conversation, &id, &mut rx, &ticket, &mut NoopObserver).await;

        assert_eq!(outcome, StreamOutcome::Completed);
        let msg = conversation.get(&id).unwrap();
        assert_eq!(msg.text, "");
        assert!(!msg.is_loading);
    }

    #[tokio::test]
    async fn last_nonempty_sources_win() {
        let mut conversation = Conversation::new(AppMode::GeneralChat);
        let id = placeholder(&mut conversation);
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(StreamChunk::Delta {
            text: "a".into(),
            sources: Some(vec![source("https://one")]),
        })
        .unwrap();
        tx.send(StreamChunk::Delta {
            text: "b".into(),
            sources: None,
        })
        .unwrap();
        tx.send(StreamChunk::Delta {
            text: "".into(),
            sources: Some(vec![source("https://two"), source("https://three")]),
        })
        .unwrap();
        tx.send(StreamChunk::Done).unwrap();
        drop(tx);

        let ticket = ModeEpoch::new().ticket();
        reconcile(&mut conversation, &id, &mut rx, &ticket, &mut NoopObserver).await;

        let msg = conversation.get(&id).unwrap();
        assert_eq!(msg.text, "ab");
        let sources = msg.sources.as_ref().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].uri.as_deref(), Some("https://two"));
    }

    #[tokio::test]
    async fn error_appends_suffix_and_keeps_text() {
        let mut conversation = Conversation::new(AppMode::LuaChat);
        let id = placeholder(&mut conversation);
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(StreamChunk::Delta {
            text: "partial answer".into(),
            sources: None,
        })
        .unwrap();
        tx.send(StreamChunk::Error("connection reset".into())).unwrap();
        drop(tx);

        let ticket = ModeEpoch::new().ticket();
        let outcome =
            reconcile(&mut conversation, &id, &mut rx, &ticket, &mut NoopObserver).await;

        assert_eq!(outcome, StreamOutcome::Failed("connection reset".into()));
        let msg = conversation.get(&id).unwrap();
        assert_eq!(msg.text, "partial answer\n\n[ERROR: connection reset]");
        assert!(!msg.is_loading);
    }

    #[tokio::test]
    async fn stale_ticket_stops_writes_without_finalizing() {
        let mut conversation = Conversation::new(AppMode::LuaChat);
        let id = placeholder(&mut conversation);
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(StreamChunk::Delta {
            text: "first".into(),
            sources: None,
        })
        .unwrap();

        let epoch = ModeEpoch::new();
        let ticket = epoch.ticket();

        // Apply the first fragment, then invalidate and send more.
        let outcome = {
            let chunk = rx.recv().await.unwrap();
            if let StreamChunk::Delta { text, .. } = chunk {
                conversation.update(&id, text, Default::default());
            }
            epoch.bump();
            tx.send(StreamChunk::Delta {
                text: " second".into(),
                sources: None,
            })
            .unwrap();
            tx.send(StreamChunk::Done).unwrap();
            drop(tx);
            reconcile(&mut conversation, &id, &mut rx, &ticket, &mut NoopObserver).await
        };

        assert_eq!(outcome, StreamOutcome::Cancelled);
        let msg = conversation.get(&id).unwrap();
        // Nothing past the pre-cancellation write landed, and the stale
        // reconciler performed no terminal transition.
        assert_eq!(msg.text, "first");
        assert!(msg.is_loading);
    }

    #[tokio::test]
    async fn accumulation_appends_to_placeholder_text() {
        let mut conversation = Conversation::new(AppMode::LuaChat);
        let id = conversation.append(
            ChatRole::Ai,
            "seed:",
            AppendOptions {
                is_loading: true,
                ..Default::default()
            },
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(StreamChunk::Delta {
            text: " tail".into(),
            sources: None,
        })
        .unwrap();
        tx.send(StreamChunk::Done).unwrap();
        drop(tx);

        let ticket = ModeEpoch::new().ticket();
        reconcile(&mut conversation, &id, &mut rx, &ticket, &mut NoopObserver).await;

        assert_eq!(conversation.get(&id).unwrap().text, "seed: tail");
    }
}
