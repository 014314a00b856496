//! Long-term memory distillation (§9.2). On `DistillMemory`, drains the
//! unarchived conversation history one session at a time, asks the LLM to
//! extract durable facts from it, and writes each fact back through
//! [`PersistenceStore`] before marking the session processed. A session
//! that fails to distill is skipped, not retried forever -- the next
//! `DistillMemory` tick will simply find it still unprocessed if the
//! failure was transient, or the operator can inspect `conversation_history`
//! directly if it is not.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buddy::adapters::output::persistence::PersistenceStore;
use crate::buddy::adapters::traits::OutputAdapter;
use crate::buddy::event::{Event, OutputKind};
use crate::buddy::llm::LlmClient;
use crate::buddy::queue::PriorityQueue;
use crate::buddy::router::RouteTarget;

const SESSION_BATCH_SIZE: usize = 200;
const FACT_EXTRACTION_INSTRUCTION: &str = "Estrai i fatti duraturi e rilevanti da questa conversazione. \
    Rispondi solo con un array JSON di stringhe, una per fatto. Se non ci sono fatti utili, rispondi con [].";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FactsResponse {
    List(Vec<String>),
    Wrapped { facts: Vec<String> },
}

const HANDLED: &[OutputKind] = &[OutputKind::DistillMemory];

pub struct DistillerAdapter {
    id: &'static str,
    queue: Arc<PriorityQueue>,
    store: Arc<PersistenceStore>,
    llm: Arc<dyn LlmClient>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DistillerAdapter {
    pub fn new(store: Arc<PersistenceStore>, llm: Arc<dyn LlmClient>) -> Self {
        DistillerAdapter {
            id: "distiller",
            queue: Arc::new(PriorityQueue::new(16)),
            store,
            llm,
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    fn parse_facts(raw: &str) -> Vec<String> {
        let trimmed = raw.trim();
        let cleaned = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .unwrap_or(trimmed)
            .trim_end_matches("```")
            .trim();
        match serde_json::from_str::<FactsResponse>(cleaned) {
            Ok(FactsResponse::List(facts)) | Ok(FactsResponse::Wrapped { facts }) => facts,
            Err(e) => {
                warn!(error = %e, raw = %raw, "failed to parse distilled facts, skipping session");
                Vec::new()
            }
        }
    }

    async fn distill_once(store: &PersistenceStore, llm: &dyn LlmClient) {
        let rows = match store.fetch_unprocessed_history(SESSION_BATCH_SIZE) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "failed to read unprocessed history");
                return;
            }
        };
        if rows.is_empty() {
            return;
        }

        let transcript = rows
            .iter()
            .map(|row| format!("{}: {}", row.role, row.text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("{FACT_EXTRACTION_INSTRUCTION}\n\n{transcript}");

        let facts = match llm.send(&prompt).await {
            crate::buddy::llm::LlmOutcome::Reply(text) => DistillerAdapter::parse_facts(&text),
            crate::buddy::llm::LlmOutcome::ValidationError(msg) | crate::buddy::llm::LlmOutcome::ProviderError(msg) => {
                warn!(error = %msg, "distillation LLM call failed, session left unprocessed");
                return;
            }
        };

        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        for fact in &facts {
            if let Err(e) = store.save_fact(None, None, None, fact, now) {
                warn!(error = %e, "failed to persist a distilled fact");
            }
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        if let Err(e) = store.mark_history_processed(&ids) {
            warn!(error = %e, "failed to mark session processed after distillation");
        }
    }
}

impl RouteTarget for DistillerAdapter {
    fn name(&self) -> &str {
        self.id
    }

    fn offer(&self, event: Event) -> bool {
        self.queue.offer(event)
    }
}

#[async_trait]
impl OutputAdapter for DistillerAdapter {
    fn id(&self) -> &'static str {
        self.id
    }

    fn handled_kinds(&self) -> &'static [OutputKind] {
        HANDLED
    }

    async fn start(&self) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel mutex poisoned") = Some(cancel.clone());

        let queue = self.queue.clone();
        let store = self.store.clone();
        let llm = self.llm.clone();

        let handle = tokio::spawn(async move {
            loop {
                let _event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = queue.dequeue() => event,
                };
                DistillerAdapter::distill_once(&store, llm.as_ref()).await;
            }
            debug!("distiller worker stopped");
        });

        *self.task.lock().expect("task mutex poisoned") = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(cancel) = self.cancel.lock().expect("cancel mutex poisoned").take() {
            cancel.cancel();
        }
        if let Some(handle) = self.task.lock().expect("task mutex poisoned").take() {
            handle.await.ok();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buddy::event::EventContent;
    use crate::buddy::llm::test_support::FakeLlmClient;

    #[test]
    fn parses_a_bare_json_array() {
        let facts = DistillerAdapter::parse_facts(r#"["ama il jazz", "vive a Roma"]"#);
        assert_eq!(facts, vec!["ama il jazz".to_string(), "vive a Roma".to_string()]);
    }

    #[test]
    fn parses_a_fenced_json_array() {
        let facts = DistillerAdapter::parse_facts("```json\n[\"ama il jazz\"]\n```");
        assert_eq!(facts, vec!["ama il jazz".to_string()]);
    }

    #[test]
    fn malformed_response_yields_no_facts() {
        assert!(DistillerAdapter::parse_facts("not json at all").is_empty());
    }

    #[tokio::test]
    async fn distill_once_persists_facts_and_marks_processed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PersistenceStore::open(dir.path()));
        store.save_history("user", "mi piace il jazz", 1.0).unwrap();
        store.save_history("assistant", "bello!", 1.5).unwrap();

        let llm = FakeLlmClient::new(r#"["ama il jazz"]"#);
        let adapter = DistillerAdapter::new(store.clone(), Arc::new(llm));
        adapter.start().await.unwrap();

        let trigger = Event::output(OutputKind::DistillMemory, EventContent::Empty);
        assert!(adapter.offer(trigger));
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;

        assert!(store.fetch_unprocessed_history(10).unwrap().is_empty());
        adapter.stop().await.unwrap();
    }
}
