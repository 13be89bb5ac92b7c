//! Durable conversation records.
//!
//! Subscribes to the store's finalized-turn event and saves snapshots in
//! the background: fire-and-forget, logged on failure, never blocking or
//! rolling back the live conversation. A session's first completed turn
//! creates a record (named asynchronously by the title endpoint); later
//! turns update it in place.

use murmur_core::conversation::{ApiMessage, ConversationStore, FinalizedTurn, MessageRole};
use murmur_core::error::{MurmurError, Result};
use murmur_core::memory::{Memory, MemoryRepository};
use murmur_interaction::naming::NamingGateway;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;

/// Callback for persistence failures, for UI notification.
pub type PersistenceErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Background persistence of conversation snapshots.
pub struct MemoryService {
    repository: Arc<dyn MemoryRepository>,
    naming: Arc<dyn NamingGateway>,
    error_callback: StdRwLock<Option<PersistenceErrorCallback>>,
}

impl MemoryService {
    pub fn new(
        repository: Arc<dyn MemoryRepository>,
        naming: Arc<dyn NamingGateway>,
    ) -> Arc<Self> {
        Arc::new(Self {
            repository,
            naming,
            error_callback: StdRwLock::new(None),
        })
    }

    /// Registers a callback invoked on save failures, in addition to the
    /// log line. Failures never propagate further.
    pub fn set_error_callback(&self, callback: PersistenceErrorCallback) {
        *self
            .error_callback
            .write()
            .expect("callback lock poisoned") = Some(callback);
    }

    /// Hooks this service onto a store's finalized-turn event. Saves run
    /// as spawned tasks so the send path never waits on persistence.
    pub fn attach(self: &Arc<Self>, store: &Arc<ConversationStore>) {
        let service = Arc::downgrade(self);
        let store_ref = Arc::downgrade(store);
        store.set_on_message_finalized(Arc::new(move |turn| {
            let Some(service) = service.upgrade() else {
                return;
            };
            let store = store_ref.upgrade();
            tokio::spawn(async move {
                service.persist_turn(turn, store).await;
            });
        }));
    }

    /// Saves one finalized snapshot, creating or updating its record.
    pub(crate) async fn persist_turn(
        &self,
        turn: FinalizedTurn,
        store: Option<Arc<ConversationStore>>,
    ) {
        if turn.messages.is_empty() {
            return;
        }
        match &turn.memory_id {
            Some(memory_id) => self.update_record(memory_id, &turn).await,
            None => {
                let record = Memory::new(&turn.session_id, turn.messages.clone());
                if let Err(err) = self.repository.put(&record).await {
                    self.report(format!("failed to save the conversation: {err}"));
                    return;
                }
                tracing::debug!(
                    target: "memory_store",
                    "created record {} for session {}",
                    record.memory_id,
                    record.session_id
                );
                if let Some(store) = store {
                    // only link the record if the session is still active;
                    // a detached save after a switch must not relink the
                    // new session to the old conversation
                    if store.session().await.session_id() == turn.session_id {
                        store
                            .set_active_memory_id(Some(record.memory_id.clone()))
                            .await;
                    }
                }
                self.name_record(record).await;
            }
        }
    }

    async fn update_record(&self, memory_id: &str, turn: &FinalizedTurn) {
        let existing = match self.repository.get_all().await {
            Ok(all) => all.into_iter().find(|m| m.memory_id == memory_id),
            Err(err) => {
                self.report(format!("failed to load conversation records: {err}"));
                return;
            }
        };

        // keep the generated name and pin state across updates; recreate
        // the record if it was deleted underneath us
        let mut record = existing.unwrap_or_else(|| Memory {
            memory_id: memory_id.to_string(),
            ..Memory::new(&turn.session_id, Vec::new())
        });
        record.session_id = turn.session_id.clone();
        record.messages = turn.messages.clone();
        record.timestamp = chrono::Utc::now().timestamp_millis();

        if let Err(err) = self.repository.put(&record).await {
            self.report(format!("failed to save the conversation: {err}"));
        }
    }

    async fn name_record(&self, mut record: Memory) {
        let messages: Vec<ApiMessage> = record
            .messages
            .iter()
            .filter(|m| m.role != MessageRole::System && !m.content.trim().is_empty())
            .map(|m| ApiMessage::new(m.role, m.content.trim()))
            .collect();

        match self.naming.generate_title(&messages, &record.memory_id).await {
            Ok(title) if !title.trim().is_empty() => {
                record.name = title.trim().to_string();
                if let Err(err) = self.repository.put(&record).await {
                    self.report(format!("failed to store the generated title: {err}"));
                }
            }
            Ok(_) => {}
            Err(err) => {
                // the record stays usable under its placeholder name
                tracing::warn!(target: "memory_store", "title generation failed: {err}");
            }
        }
    }

    /// All records, pinned first, newest first within each group.
    pub async fn list(&self) -> Result<Vec<Memory>> {
        let mut all = self
            .repository
            .get_all()
            .await
            .map_err(|err| MurmurError::data_access(err.to_string()))?;
        all.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.timestamp.cmp(&a.timestamp))
        });
        Ok(all)
    }

    /// Deletes one record.
    pub async fn delete(&self, memory_id: &str) -> Result<()> {
        self.repository
            .delete(memory_id)
            .await
            .map_err(|err| MurmurError::data_access(err.to_string()))
    }

    /// Deletes every record.
    pub async fn delete_all(&self) -> Result<()> {
        self.repository
            .clear()
            .await
            .map_err(|err| MurmurError::data_access(err.to_string()))
    }

    /// Flips a record's pin state.
    pub async fn toggle_pinned(&self, memory_id: &str) -> Result<()> {
        let all = self
            .repository
            .get_all()
            .await
            .map_err(|err| MurmurError::data_access(err.to_string()))?;
        let mut record = all
            .into_iter()
            .find(|m| m.memory_id == memory_id)
            .ok_or_else(|| MurmurError::not_found("memory", memory_id))?;
        record.is_pinned = !record.is_pinned;
        self.repository
            .put(&record)
            .await
            .map_err(|err| MurmurError::data_access(err.to_string()))
    }

    fn report(&self, message: String) {
        tracing::error!(target: "memory_store", "{message}");
        let callback = self
            .error_callback
            .read()
            .expect("callback lock poisoned")
            .clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result as AnyResult, anyhow};
    use murmur_core::assistant::{AssistantProfile, AssistantRepository};
    use murmur_core::conversation::{ChatMessage, MessageRole, NewMessage};
    use murmur_core::memory::UNNAMED_MEMORY;
    use murmur_interaction::gateway::GatewayError;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct EmptyAssistants;

    #[async_trait::async_trait]
    impl AssistantRepository for EmptyAssistants {
        async fn get_all(&self) -> murmur_core::Result<Vec<AssistantProfile>> {
            Ok(vec![])
        }

        async fn find_by_id(
            &self,
            _assistant_id: &str,
        ) -> murmur_core::Result<Option<AssistantProfile>> {
            Ok(None)
        }
    }

    struct MapRepository {
        records: Mutex<HashMap<String, Memory>>,
        fail_puts: bool,
    }

    impl MapRepository {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(HashMap::new()),
                fail_puts: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(HashMap::new()),
                fail_puts: true,
            })
        }

        fn snapshot(&self) -> Vec<Memory> {
            self.records.lock().unwrap().values().cloned().collect()
        }
    }

    #[async_trait::async_trait]
    impl MemoryRepository for MapRepository {
        async fn get_all(&self) -> AnyResult<Vec<Memory>> {
            Ok(self.snapshot())
        }

        async fn put(&self, memory: &Memory) -> AnyResult<()> {
            if self.fail_puts {
                return Err(anyhow!("disk full"));
            }
            self.records
                .lock()
                .unwrap()
                .insert(memory.memory_id.clone(), memory.clone());
            Ok(())
        }

        async fn delete(&self, memory_id: &str) -> AnyResult<()> {
            self.records.lock().unwrap().remove(memory_id);
            Ok(())
        }

        async fn clear(&self) -> AnyResult<()> {
            self.records.lock().unwrap().clear();
            Ok(())
        }
    }

    struct StubNaming {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl NamingGateway for StubNaming {
        async fn generate_title(
            &self,
            _messages: &[ApiMessage],
            _memory_id: &str,
        ) -> std::result::Result<String, GatewayError> {
            if self.fail {
                Err(GatewayError::Parse("no title".to_string()))
            } else {
                Ok("Generated title".to_string())
            }
        }

        async fn generate_name(
            &self,
            _instructions: &str,
        ) -> std::result::Result<String, GatewayError> {
            Ok("Helper".to_string())
        }
    }

    fn turn(memory_id: Option<String>) -> FinalizedTurn {
        FinalizedTurn {
            session_id: "main".to_string(),
            memory_id,
            messages: vec![
                ChatMessage::user("hello", None),
                ChatMessage::new(MessageRole::Assistant, "hi there"),
            ],
        }
    }

    #[tokio::test]
    async fn first_turn_creates_and_names_a_record() {
        let repository = MapRepository::new();
        let service = MemoryService::new(repository.clone(), Arc::new(StubNaming { fail: false }));

        service.persist_turn(turn(None), None).await;

        let records = repository.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session_id, "main");
        assert_eq!(records[0].name, "Generated title");
        assert_eq!(records[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn failed_naming_keeps_the_placeholder_name() {
        let repository = MapRepository::new();
        let service = MemoryService::new(repository.clone(), Arc::new(StubNaming { fail: true }));

        service.persist_turn(turn(None), None).await;

        let records = repository.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, UNNAMED_MEMORY);
    }

    #[tokio::test]
    async fn later_turns_update_in_place_preserving_name_and_pin() {
        let repository = MapRepository::new();
        let service = MemoryService::new(repository.clone(), Arc::new(StubNaming { fail: false }));

        let mut existing = Memory::new("main", vec![ChatMessage::user("old", None)]);
        existing.name = "Kept name".to_string();
        existing.is_pinned = true;
        repository.put(&existing).await.unwrap();

        service
            .persist_turn(turn(Some(existing.memory_id.clone())), None)
            .await;

        let records = repository.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].memory_id, existing.memory_id);
        assert_eq!(records[0].name, "Kept name");
        assert!(records[0].is_pinned);
        assert_eq!(records[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn save_failure_is_reported_and_non_fatal() {
        let repository = MapRepository::failing();
        let service = MemoryService::new(repository, Arc::new(StubNaming { fail: false }));

        let reported: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        service.set_error_callback(Arc::new(move |message| {
            sink.lock().unwrap().push(message);
        }));

        service.persist_turn(turn(None), None).await;

        let reported = reported.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].contains("disk full"));
    }

    #[tokio::test]
    async fn toggle_pinned_flips_the_flag() {
        let repository = MapRepository::new();
        let service = MemoryService::new(repository.clone(), Arc::new(StubNaming { fail: false }));

        let record = Memory::new("main", vec![ChatMessage::user("hi", None)]);
        repository.put(&record).await.unwrap();

        service.toggle_pinned(&record.memory_id).await.unwrap();
        assert!(repository.snapshot()[0].is_pinned);

        service.toggle_pinned(&record.memory_id).await.unwrap();
        assert!(!repository.snapshot()[0].is_pinned);

        let missing = service.toggle_pinned("nope").await;
        assert!(matches!(missing, Err(MurmurError::NotFound { .. })));
    }

    #[tokio::test]
    async fn list_orders_pinned_then_newest() {
        let repository = MapRepository::new();
        let service = MemoryService::new(repository.clone(), Arc::new(StubNaming { fail: false }));

        let old = Memory {
            timestamp: 100,
            ..Memory::new("main", vec![ChatMessage::user("a", None)])
        };
        let new = Memory {
            timestamp: 200,
            ..Memory::new("main", vec![ChatMessage::user("b", None)])
        };
        let pinned = Memory {
            timestamp: 50,
            is_pinned: true,
            ..Memory::new("main", vec![ChatMessage::user("c", None)])
        };
        for record in [&old, &new, &pinned] {
            repository.put(record).await.unwrap();
        }

        let listed = service.list().await.unwrap();
        assert_eq!(listed[0].memory_id, pinned.memory_id);
        assert_eq!(listed[1].memory_id, new.memory_id);
        assert_eq!(listed[2].memory_id, old.memory_id);
    }

    #[tokio::test]
    async fn attached_service_saves_when_a_turn_finalizes() {
        let repository = MapRepository::new();
        let store = Arc::new(ConversationStore::new(
            Arc::new(EmptyAssistants),
            Arc::new(murmur_core::memory::NoOpMemoryRepository),
        ));
        let service = MemoryService::new(repository.clone(), Arc::new(StubNaming { fail: false }));
        service.attach(&store);

        store
            .add_message(NewMessage::new(MessageRole::User, "hello"))
            .await
            .unwrap();
        let mut pending = NewMessage::new(MessageRole::Assistant, "");
        pending.is_loading = true;
        let assistant = store.add_message(pending).await.unwrap().unwrap();
        store
            .set_message_content(&assistant.id, "finished reply")
            .await
            .unwrap();
        store
            .update_message_loading_state(&assistant.id, false)
            .await
            .unwrap();

        // the save runs on a spawned task; give it a moment
        for _ in 0..50 {
            if !repository.snapshot().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let records = repository.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].messages.len(), 2);
        assert_eq!(store.active_memory_id().await, Some(records[0].memory_id.clone()));
    }
}
