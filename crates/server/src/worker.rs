//! The actor worker: one serial execution context per (user, actor,
//! conversation).
//!
//! The worker owns everything that must happen in order for its
//! conversation: queued inputs, the single in-flight agent run, event
//! fan-out, and buffer persistence. Independent workers run in parallel;
//! within one worker the drain loop and the agent run never overlap.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ema_agent::{Agent, RunContext};
use ema_core::{
    ActorEvent, ActorKey, ActorStatus, AgentEvent, AgentEventSink, BufferMessage,
    ConversationBuffer, Content, Error, EventBus, LlmClient, MemoryArchive, MemoryItem, Result,
    ToolContext, ToolRegistry,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Placeholder substituted with the rendered conversation buffer.
pub const MEMORY_BUFFER_TOKEN: &str = "{MEMORY_BUFFER}";

/// Everything needed to bring a worker up.
pub struct WorkerParams {
    pub key: ActorKey,
    pub user_name: String,
    pub actor_name: String,
    pub conversation: Arc<dyn ConversationBuffer>,
    pub short_term: Arc<dyn MemoryArchive>,
    pub long_term: Arc<dyn MemoryArchive>,
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<ToolRegistry>,
    pub system_prompt_template: String,
    pub max_steps: u32,
    pub memory_window: usize,
}

enum WriteRequest {
    Message(BufferMessage),
    /// Resolves once every earlier write has settled
    Barrier(oneshot::Sender<()>),
}

/// A per-conversation facade over the agent loop.
pub struct ActorWorker {
    key: ActorKey,
    user_name: String,
    actor_name: String,

    status: Mutex<ActorStatus>,
    queue: Mutex<VecDeque<BufferMessage>>,
    /// Re-entrancy guard: one drain loop per worker
    processing: AtomicBool,
    /// Whether the current run has delivered a reply. Written only by the
    /// run's own event sink, read when the run completes.
    has_reply_in_run: AtomicBool,
    /// Whether the next drain should extend the previous run's state.
    /// Written only at run completion, consumed at the next drain.
    resume_after_abort: AtomicBool,
    saved_context: tokio::sync::Mutex<Option<RunContext>>,
    current_cancel: Mutex<Option<CancellationToken>>,

    events: EventBus<ActorEvent>,
    writer: mpsc::Sender<WriteRequest>,

    conversation: Arc<dyn ConversationBuffer>,
    short_term: Arc<dyn MemoryArchive>,
    long_term: Arc<dyn MemoryArchive>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    tool_context: ToolContext,

    system_prompt_template: String,
    max_steps: u32,
    memory_window: usize,
}

impl ActorWorker {
    /// Construct the worker and start its write pipeline.
    pub fn spawn(params: WorkerParams) -> Arc<Self> {
        let (writer, rx) = mpsc::channel(256);

        let tool_context = ToolContext {
            user_id: params.key.user_id,
            actor_id: params.key.actor_id,
            conversation_id: params.key.conversation_id,
            user_name: params.user_name.clone(),
            short_term: params.short_term.clone(),
            long_term: params.long_term.clone(),
        };

        let worker = Arc::new(Self {
            key: params.key,
            user_name: params.user_name,
            actor_name: params.actor_name,
            status: Mutex::new(ActorStatus::Idle),
            queue: Mutex::new(VecDeque::new()),
            processing: AtomicBool::new(false),
            has_reply_in_run: AtomicBool::new(false),
            resume_after_abort: AtomicBool::new(false),
            saved_context: tokio::sync::Mutex::new(None),
            current_cancel: Mutex::new(None),
            events: EventBus::default(),
            writer,
            conversation: params.conversation.clone(),
            short_term: params.short_term,
            long_term: params.long_term,
            llm: params.llm,
            tools: params.tools,
            tool_context,
            system_prompt_template: params.system_prompt_template,
            max_steps: params.max_steps,
            memory_window: params.memory_window,
        });

        tokio::spawn(run_writer(params.conversation, rx, params.key));
        worker
    }

    pub fn key(&self) -> ActorKey {
        self.key
    }

    pub fn status(&self) -> ActorStatus {
        *self.status.lock().unwrap()
    }

    pub fn is_busy(&self) -> bool {
        self.status() != ActorStatus::Idle
    }

    /// The worker's event stream.
    pub fn events(&self) -> &EventBus<ActorEvent> {
        &self.events
    }

    /// Accept user inputs for processing.
    ///
    /// Inputs are validated synchronously, queued, and persisted through
    /// the write pipeline. A run already in flight is asked to abort; its
    /// completion drains the enlarged queue. Whether the next run resumes
    /// the aborted state is decided by the run itself when it completes
    /// (see `run_batch`), so a reply racing this call can never be
    /// double-processed.
    pub async fn work(self: &Arc<Self>, inputs: Vec<Content>) -> Result<()> {
        if inputs.is_empty() {
            return Err(Error::Validation("work requires at least one input".into()));
        }
        if inputs.iter().any(|c| !c.is_text()) {
            return Err(Error::Validation(
                "only text contents are supported".into(),
            ));
        }

        let message = BufferMessage::user(&self.user_name, inputs);
        self.queue.lock().unwrap().push_back(message.clone());
        self.enqueue_write(message).await;

        if self.is_busy() {
            let cancel = self.current_cancel.lock().unwrap().clone();
            if let Some(cancel) = cancel {
                debug!(actor = %self.key, "Aborting in-flight run for new input");
                cancel.cancel();
            }
        }

        self.spawn_process_queue();
        Ok(())
    }

    /// Keyword search over the long-term memory archive.
    pub async fn search(&self, keywords: &[String]) -> Result<Vec<MemoryItem>> {
        Ok(self.long_term.search(keywords, 10).await?)
    }

    pub async fn add_short_term_memory(&self, content: &str) -> Result<i64> {
        Ok(self.short_term.add(content).await?)
    }

    pub async fn add_long_term_memory(&self, content: &str) -> Result<i64> {
        Ok(self.long_term.add(content).await?)
    }

    /// Wait until every write enqueued so far has settled.
    pub async fn flush_writes(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writer.send(WriteRequest::Barrier(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn enqueue_write(&self, message: BufferMessage) {
        if self
            .writer
            .send(WriteRequest::Message(message))
            .await
            .is_err()
        {
            warn!(actor = %self.key, "Write pipeline closed; dropping buffer write");
        }
    }

    fn set_status(&self, status: ActorStatus) {
        *self.status.lock().unwrap() = status;
        self.events.publish(ActorEvent::Message {
            content: format!("Actor status: {status}."),
        });
    }

    fn spawn_process_queue(self: &Arc<Self>) {
        let worker = self.clone();
        tokio::spawn(async move { worker.process_queue().await });
    }

    /// Drain the input queue, one agent run per drained batch.
    ///
    /// Guarded so at most one drain loop is active per worker; a loop that
    /// finds the queue refilled right after releasing the guard retakes it.
    async fn process_queue(self: Arc<Self>) {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        loop {
            loop {
                let batch: Vec<BufferMessage> = {
                    let mut queue = self.queue.lock().unwrap();
                    queue.drain(..).collect()
                };
                if batch.is_empty() {
                    break;
                }
                self.run_batch(batch).await;
            }

            if !self.resume_after_abort.load(Ordering::SeqCst) {
                self.set_status(ActorStatus::Idle);
            }
            self.processing.store(false, Ordering::SeqCst);

            // Inputs that arrived between the final drain and the guard
            // release are picked up here instead of waiting for new work
            if self.queue.lock().unwrap().is_empty() {
                break;
            }
            if self
                .processing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                break;
            }
        }
    }

    async fn run_batch(self: &Arc<Self>, batch: Vec<BufferMessage>) {
        // The upcoming run has produced nothing yet, and it must be
        // abortable from the moment the worker reads as busy
        self.has_reply_in_run.store(false, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        *self.current_cancel.lock().unwrap() = Some(cancel.clone());
        self.set_status(ActorStatus::Preparing);

        let resuming = self.resume_after_abort.swap(false, Ordering::SeqCst);
        let mut saved = self.saved_context.lock().await;
        let mut ctx = match saved.take() {
            Some(mut previous) if resuming => {
                debug!(actor = %self.key, "Resuming aborted run with new inputs");
                previous.append_user_messages(batch);
                previous
            }
            _ => self.build_context(batch).await,
        };
        drop(saved);

        self.set_status(ActorStatus::Running);

        info!(actor = %self.key, messages = ctx.messages.len(), "Launching agent run");
        let agent = Agent::new(self.llm.clone(), self.max_steps);
        let sink = WorkerSink {
            worker: self.clone(),
        };
        agent.run(&mut ctx, cancel.clone(), &sink).await;

        *self.current_cancel.lock().unwrap() = None;

        // The resume decision happens here, strictly after the run's last
        // event: pick the state back up only when the run was aborted by a
        // newer `work` call and never delivered a reply. Both facts are
        // settled once `run` has returned, so no concurrent `work` or
        // reply can flip the outcome afterwards.
        let resume =
            cancel.is_cancelled() && !self.has_reply_in_run.load(Ordering::SeqCst);
        self.resume_after_abort.store(resume, Ordering::SeqCst);
        if resume {
            *self.saved_context.lock().await = Some(ctx);
        }
    }

    async fn build_context(&self, batch: Vec<BufferMessage>) -> RunContext {
        // Settle pending writes so the prompt reads a consistent buffer
        self.flush_writes().await;
        let system_prompt = self.assemble_system_prompt().await;
        RunContext::new(
            system_prompt,
            batch,
            self.tools.clone(),
            self.tool_context.clone(),
        )
    }

    /// Substitute the rendered recent-conversation buffer into the system
    /// prompt template. An empty buffer renders as `None.`; a template
    /// without the placeholder is returned unchanged.
    async fn assemble_system_prompt(&self) -> String {
        let template = &self.system_prompt_template;
        if !template.contains(MEMORY_BUFFER_TOKEN) {
            return template.clone();
        }

        let recent = match self.conversation.recent(self.memory_window).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(actor = %self.key, error = %e, "Reading conversation buffer failed");
                Vec::new()
            }
        };

        let rendered = if recent.is_empty() {
            "None.".to_string()
        } else {
            recent
                .iter()
                .map(|m| format!("[{}] {}: {}", format_time(m.time), m.name, m.text()))
                .collect::<Vec<_>>()
                .join("\n")
        };

        template.replace(MEMORY_BUFFER_TOKEN, &rendered)
    }
}

fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Single consumer of the write pipeline: writes land in enqueue order, a
/// failure is logged and acknowledged before the next write proceeds.
async fn run_writer(
    conversation: Arc<dyn ConversationBuffer>,
    mut rx: mpsc::Receiver<WriteRequest>,
    key: ActorKey,
) {
    while let Some(request) = rx.recv().await {
        match request {
            WriteRequest::Message(message) => {
                if let Err(e) = conversation.append(&message).await {
                    warn!(actor = %key, error = %e, "Buffer write failed");
                }
            }
            WriteRequest::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Observes the run the worker owns, ahead of any subscriber.
struct WorkerSink {
    worker: Arc<ActorWorker>,
}

#[async_trait]
impl AgentEventSink for WorkerSink {
    async fn emit(&self, event: AgentEvent) {
        if let AgentEvent::EmaReplyReceived { reply } = &event {
            let worker = &self.worker;
            // The run has produced a visible reply: record it for the
            // resume decision at run end, and make the reply durable
            // before subscribers see it
            worker.has_reply_in_run.store(true, Ordering::SeqCst);
            let message = BufferMessage::actor(&worker.actor_name, &reply.response);
            worker.enqueue_write(message).await;
        }
        self.worker.events.publish(ActorEvent::Agent { event });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ema_core::{GenerateRequest, LlmError, LlmResponse, Message};
    use ema_store::{ConversationStore, KeywordArchive, MemoryStore};

    /// Always replies with plain text, no tool calls.
    struct TextClient;

    #[async_trait]
    impl LlmClient for TextClient {
        fn name(&self) -> &str {
            "text"
        }
        async fn generate(
            &self,
            _request: GenerateRequest,
            _cancel: CancellationToken,
        ) -> std::result::Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                message: Message::model("ok"),
                finish_reason: "stop".into(),
                total_tokens: None,
            })
        }
    }

    fn worker() -> Arc<ActorWorker> {
        worker_with_template("You are Ema.\n{MEMORY_BUFFER}")
    }

    fn worker_with_template(template: &str) -> Arc<ActorWorker> {
        let store = Arc::new(MemoryStore::new());
        let key = ActorKey {
            user_id: 1,
            actor_id: 2,
            conversation_id: 3,
        };
        ActorWorker::spawn(WorkerParams {
            key,
            user_name: "Alice".into(),
            actor_name: "Ema".into(),
            conversation: Arc::new(ConversationStore::new(store.clone(), key.conversation_id)),
            short_term: Arc::new(KeywordArchive::short_term(
                store.clone(),
                key.user_id,
                key.actor_id,
            )),
            long_term: Arc::new(KeywordArchive::long_term(
                store.clone(),
                key.user_id,
                key.actor_id,
            )),
            llm: Arc::new(TextClient),
            tools: Arc::new(ToolRegistry::new()),
            system_prompt_template: template.into(),
            max_steps: 5,
            memory_window: 10,
        })
    }

    #[tokio::test]
    async fn empty_inputs_rejected_without_state_change() {
        let worker = worker();
        let err = worker.work(vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!worker.is_busy());
        worker.flush_writes().await;
        let recent = worker.conversation.recent(10).await.unwrap();
        assert!(recent.is_empty());
    }

    #[tokio::test]
    async fn non_text_inputs_rejected() {
        let worker = worker();
        let err = worker
            .work(vec![Content::Image {
                url: "x://y".into(),
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn empty_buffer_renders_as_none() {
        let worker = worker();
        let prompt = worker.assemble_system_prompt().await;
        assert_eq!(prompt, "You are Ema.\nNone.");
    }

    #[tokio::test]
    async fn buffer_renders_one_line_per_message() {
        let worker = worker();
        worker
            .conversation
            .append(&BufferMessage::user("Alice", vec![Content::text("hello")]))
            .await
            .unwrap();
        worker
            .conversation
            .append(&BufferMessage::actor("Ema", "hi there"))
            .await
            .unwrap();

        let prompt = worker.assemble_system_prompt().await;
        let buffer = prompt.strip_prefix("You are Ema.\n").unwrap();
        let lines: Vec<&str> = buffer.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Alice: hello"));
        assert!(lines[1].contains("Ema: hi there"));
        assert!(lines[0].starts_with('['));
    }

    #[tokio::test]
    async fn template_without_token_is_unchanged() {
        let worker = worker_with_template("Just a prompt.");
        let prompt = worker.assemble_system_prompt().await;
        assert_eq!(prompt, "Just a prompt.");
    }

    #[tokio::test]
    async fn work_persists_input_and_returns_to_idle() {
        let worker = worker();
        worker.work(vec![Content::text("hello")]).await.unwrap();

        // Wait for the run to settle
        let mut rx = worker.events().subscribe();
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            let event = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .expect("run settles")
                .unwrap();
            if let ActorEvent::Agent {
                event: AgentEvent::RunFinished { .. },
            } = event
            {
                break;
            }
        }

        worker.flush_writes().await;
        let recent = worker.conversation.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].text(), "hello");
    }

    #[tokio::test]
    async fn memory_delegation_roundtrip() {
        let worker = worker();
        worker.add_long_term_memory("likes green tea").await.unwrap();
        worker.add_short_term_memory("we just met").await.unwrap();

        let found = worker.search(&["tea".into()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].content.contains("green tea"));
    }
}
