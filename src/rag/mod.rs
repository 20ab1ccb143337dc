//! C5 — Model manager: retrieval-augmented generation plus asynchronous
//! self-reflection.
//!
//! Reflection runs off a bounded task queue with a graceful-drain shutdown
//! rather than a fire-and-forget task, implemented here with an mpsc channel
//! and a background worker task.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::memory::MemoryManager;
use crate::model::{ChatModelClient, Message};
use crate::store::Namespace;

const SELF_REFLECTION_PROMPT: &str = "You are reviewing the preceding interaction. \
Summarize what went well, what was uncertain, and one concrete improvement for next time. \
Be terse.";

const DEFAULT_QUEUE_CAPACITY: usize = 64;

struct ReflectionJob {
    namespace: Namespace,
    interaction_text: String,
}

pub struct ModelManager {
    chat: Arc<dyn ChatModelClient>,
    memory: Arc<MemoryManager>,
    reflection_tx: Mutex<Option<mpsc::Sender<ReflectionJob>>>,
    reflection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ModelManager {
    pub fn new(chat: Arc<dyn ChatModelClient>, memory: Arc<MemoryManager>) -> Arc<Self> {
        Self::with_queue_capacity(chat, memory, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(chat: Arc<dyn ChatModelClient>, memory: Arc<MemoryManager>, capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(capacity);
        let worker_chat = chat.clone();
        let worker_memory = memory.clone();
        let handle = tokio::spawn(reflection_worker(rx, worker_chat, worker_memory));
        Arc::new(Self {
            chat,
            memory,
            reflection_tx: Mutex::new(Some(tx)),
            reflection_handle: Mutex::new(Some(handle)),
        })
    }

    #[instrument(skip(self, prompt, metadata), fields(component = "model_manager"))]
    pub async fn generate(
        &self,
        prompt: &str,
        namespace: Option<&Namespace>,
        metadata: Option<Value>,
        top_k: usize,
        reward: Option<f64>,
    ) -> Result<String> {
        let augmented = match namespace {
            Some(namespace) => {
                let results = self.memory.retrieve_semantic(namespace, prompt, top_k, None).await?;
                if results.is_empty() {
                    prompt.to_string()
                } else {
                    let context: String = results
                        .iter()
                        .filter_map(|r| r.value.get("text").and_then(|v| v.as_str()))
                        .collect::<Vec<_>>()
                        .join("\n");
                    format!("{context}\n{prompt}")
                }
            }
            None => prompt.to_string(),
        };

        let messages = vec![Message::user(augmented.clone())];
        let completion = self.chat.invoke(&messages).await?;

        if let Some(namespace) = namespace {
            let interaction = format!("Prompt: {prompt} Response: {completion}");
            self.memory
                .save_semantic(namespace, "last_query", &interaction, metadata, None, reward)
                .await?;
            self.schedule_reflection(namespace.clone(), interaction).await;
        }

        Ok(completion)
    }

    /// Enqueues a reflection job without blocking `generate`'s return. A
    /// full queue drops the job and logs — reflection is best-effort.
    async fn schedule_reflection(&self, namespace: Namespace, interaction_text: String) {
        let guard = self.reflection_tx.lock().await;
        let Some(tx) = guard.as_ref() else {
            warn!("reflection queue already shut down, dropping job");
            return;
        };
        if let Err(e) = tx.try_send(ReflectionJob { namespace, interaction_text }) {
            warn!(error = %e, "reflection queue full or closed, dropping job");
        }
    }

    /// Closes the queue and waits up to `timeout` for the worker to drain
    /// in-flight jobs before giving up.
    pub async fn shutdown(&self, timeout: Duration) {
        self.reflection_tx.lock().await.take();
        let Some(handle) = self.reflection_handle.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!("reflection worker drained cleanly"),
            Ok(Err(e)) => error!(error = %e, "reflection worker panicked"),
            Err(_) => warn!("reflection worker did not drain within timeout"),
        }
    }
}

async fn reflection_worker(mut rx: mpsc::Receiver<ReflectionJob>, chat: Arc<dyn ChatModelClient>, memory: Arc<MemoryManager>) {
    while let Some(job) = rx.recv().await {
        if let Err(e) = run_reflection(&chat, &memory, job).await {
            warn!(error = %e, "self-reflection failed");
        }
    }
}

async fn run_reflection(chat: &Arc<dyn ChatModelClient>, memory: &Arc<MemoryManager>, job: ReflectionJob) -> Result<()> {
    let messages = vec![Message::system(SELF_REFLECTION_PROMPT), Message::user(job.interaction_text.clone())];
    let response = chat.invoke(&messages).await?;
    memory
        .save_episode(
            &job.namespace,
            "last_query:reflection",
            json!({ "reflection": response }),
            Some(json!({ "type": "self_reflection" })),
            Some(json!({ "reflected_text": job.interaction_text })),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicEmbeddingClient;
    use crate::model::EchoChatModel;
    use crate::store::{InMemoryStore, Store};
    use std::time::Duration;

    fn manager() -> (Arc<ModelManager>, Arc<MemoryManager>) {
        let embeddings = Arc::new(DeterministicEmbeddingClient::new(32));
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(Some(embeddings.clone())));
        let memory = Arc::new(MemoryManager::new(store, embeddings, 100));
        let chat: Arc<dyn ChatModelClient> = Arc::new(EchoChatModel::default());
        (ModelManager::new(chat, memory.clone()), memory)
    }

    #[tokio::test]
    async fn generate_without_namespace_skips_retrieval_and_persistence() {
        let (manager, _memory) = manager();
        let completion = manager.generate("hello", None, None, 5, None).await.unwrap();
        assert!(completion.contains("hello"));
        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn generate_with_namespace_persists_last_query() {
        let (manager, memory) = manager();
        let namespace = ("t1".to_string(), "session".to_string());
        manager.generate("propose X", Some(&namespace), None, 5, None).await.unwrap();
        let results = memory.retrieve_semantic(&namespace, "propose X", 1, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].value["text"].as_str().unwrap().contains("propose X"));
        manager.shutdown(Duration::from_secs(1)).await;
    }
}
