use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use futures::future::join_all;
use streamverify_client::{CompletionSource, Progress, TransportError};
use streamverify_core::{CategoryRegistry, CompletionRequest};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::document::Element;
use crate::error::BinderError;
use crate::scan::{GroupingPolicy, TaggingConvention, VerificationGroup, scan};
use crate::sink::VerificationSink;

/// Text shown in an output region when verification fails.
pub const FAILURE_PLACEHOLDER: &str = "Verification failed: the language model could not be reached.";

/// Model parameters applied to every request a binding issues.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSettings {
    pub model: String,
    pub temperature: f32,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            model: "local-model".into(),
            temperature: 0.7,
        }
    }
}

/// Presentation state of a group's trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Busy,
}

/// Content of a group's output region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputState {
    Idle,
    Streaming(String),
    Done(String),
    Failed(String),
}

/// What an activation did.
#[derive(Debug)]
pub enum Activation {
    Completed(String),
    Failed(TransportError),
    /// The group already had a request in flight.
    Ignored,
}

/// Scans documents and wires each group to a completion source.
pub struct VerificationBinder {
    client: Arc<dyn CompletionSource>,
    registry: Arc<CategoryRegistry>,
    settings: RequestSettings,
    convention: TaggingConvention,
}

impl VerificationBinder {
    pub fn new(client: Arc<dyn CompletionSource>, registry: Arc<CategoryRegistry>) -> Self {
        Self {
            client,
            registry,
            settings: RequestSettings::default(),
            convention: TaggingConvention::default(),
        }
    }

    pub fn with_settings(mut self, settings: RequestSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_convention(mut self, convention: TaggingConvention) -> Self {
        self.convention = convention;
        self
    }

    pub fn registry(&self) -> &CategoryRegistry {
        &self.registry
    }

    /// Attach a trigger and an output region to every group found under `root`.
    pub fn bind(
        &self,
        root: &Element,
        policy: GroupingPolicy,
        sink: Option<Arc<dyn VerificationSink>>,
    ) -> Binding {
        let groups = scan(root, &self.registry, policy, &self.convention);
        info!(groups = groups.len(), ?policy, "bound verification groups");
        Binding {
            groups: groups
                .into_iter()
                .map(|group| {
                    Arc::new(BoundGroup::new(
                        group,
                        self.client.clone(),
                        self.settings.clone(),
                        sink.clone(),
                    ))
                })
                .collect(),
        }
    }
}

/// The groups bound for one document. Dropping it tears them down.
pub struct Binding {
    groups: Vec<Arc<BoundGroup>>,
}

impl Binding {
    pub fn groups(&self) -> &[Arc<BoundGroup>] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group(&self, index: usize) -> Result<&Arc<BoundGroup>, BinderError> {
        self.groups.get(index).ok_or(BinderError::UnknownGroup(index))
    }

    /// Look a group up by its host identifier.
    pub fn find(&self, id: &str) -> Option<&Arc<BoundGroup>> {
        self.groups
            .iter()
            .find(|g| g.group().id.as_deref() == Some(id))
    }

    /// Fire the trigger of group `index`.
    pub async fn activate(&self, index: usize) -> Result<Activation, BinderError> {
        Ok(self.group(index)?.activate().await)
    }

    /// Fire every trigger at once; requests run concurrently.
    pub async fn activate_all(&self) -> Vec<Activation> {
        join_all(self.groups.iter().map(|g| g.activate())).await
    }
}

/// A verification group together with its trigger and output region.
pub struct BoundGroup {
    group: VerificationGroup,
    client: Arc<dyn CompletionSource>,
    settings: RequestSettings,
    sink: Option<Arc<dyn VerificationSink>>,
    busy: AtomicBool,
    trigger: watch::Sender<TriggerState>,
    output: watch::Sender<OutputState>,
}

impl BoundGroup {
    fn new(
        group: VerificationGroup,
        client: Arc<dyn CompletionSource>,
        settings: RequestSettings,
        sink: Option<Arc<dyn VerificationSink>>,
    ) -> Self {
        Self {
            group,
            client,
            settings,
            sink,
            busy: AtomicBool::new(false),
            trigger: watch::Sender::new(TriggerState::Idle),
            output: watch::Sender::new(OutputState::Idle),
        }
    }

    pub fn group(&self) -> &VerificationGroup {
        &self.group
    }

    pub fn trigger_state(&self) -> TriggerState {
        *self.trigger.borrow()
    }

    pub fn output(&self) -> OutputState {
        self.output.borrow().clone()
    }

    pub fn subscribe_trigger(&self) -> watch::Receiver<TriggerState> {
        self.trigger.subscribe()
    }

    pub fn subscribe_output(&self) -> watch::Receiver<OutputState> {
        self.output.subscribe()
    }

    /// The request this group sends when triggered.
    pub fn request(&self) -> CompletionRequest {
        CompletionRequest::for_fragments(
            &self.settings.model,
            self.settings.temperature,
            &self.group.context,
            &self.group.fragments,
        )
    }

    /// Run one verification for this group.
    ///
    /// Ignored while a previous activation is still running. The trigger is
    /// back to idle when this returns, or if the future is dropped early.
    pub async fn activate(&self) -> Activation {
        let label = self.group.label();
        let Some(_busy) = BusyGuard::acquire(&self.busy, &self.trigger) else {
            debug!(group = %label, "activation ignored, request in flight");
            return Activation::Ignored;
        };

        self.output.send_replace(OutputState::Streaming(String::new()));
        let mut progress = self.client.submit(self.request());

        let mut outcome = Ok(String::new());
        while let Some(item) = progress.next().await {
            match item {
                Ok(Progress::Partial(text)) => {
                    self.output.send_replace(OutputState::Streaming(text.clone()));
                    outcome = Ok(text);
                }
                Ok(Progress::Final(text)) => {
                    outcome = Ok(text);
                    break;
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        match outcome {
            Ok(text) => {
                self.output.send_replace(OutputState::Done(text.clone()));
                info!(group = %label, chars = text.len(), "verification complete");
                self.persist(&text).await;
                Activation::Completed(text)
            }
            Err(e) => {
                error!(group = %label, status = ?e.status(), error = %e, "verification failed");
                self.output
                    .send_replace(OutputState::Failed(FAILURE_PLACEHOLDER.to_string()));
                Activation::Failed(e)
            }
        }
    }

    async fn persist(&self, text: &str) {
        let (Some(sink), Some(id)) = (&self.sink, &self.group.id) else {
            return;
        };
        if let Err(e) = sink.persist(id, text).await {
            warn!(group = %id, error = %e, "failed to persist verification");
        }
    }
}

/// Marks a group busy for its lifetime.
struct BusyGuard<'a> {
    busy: &'a AtomicBool,
    trigger: &'a watch::Sender<TriggerState>,
}

impl<'a> BusyGuard<'a> {
    fn acquire(busy: &'a AtomicBool, trigger: &'a watch::Sender<TriggerState>) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        trigger.send_replace(TriggerState::Busy);
        Some(Self { busy, trigger })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.trigger.send_replace(TriggerState::Idle);
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_xhtml;
    use crate::sink::MemorySink;
    use async_stream::stream;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use streamverify_client::ProgressStream;
    use streamverify_core::compose_user_message;
    use tokio::sync::Notify;

    const DOC: &str = r#"<html><body>
  <table class="requirement" data-id="REQ-1">
    <tr><td class="verifiable">  a   b </td></tr>
    <tr><td class="verifiable">c
d</td></tr>
  </table>
  <table class="use-case" data-id="UC-1">
    <tr><td class="verifiable">Operator logs in</td></tr>
  </table>
  <table class="use-case">
    <tr><td class="verifiable">No id here</td></tr>
  </table>
</body></html>"#;

    enum Script {
        Reply(Vec<&'static str>),
        /// Streams the user message back word by word.
        Echo,
        Fail(u16),
    }

    struct ScriptedSource {
        script: Script,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedSource {
        fn new(script: Script) -> Self {
            Self {
                script,
                gate: None,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn gated(script: Script, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(script)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CompletionSource for ScriptedSource {
        fn submit(&self, request: CompletionRequest) -> ProgressStream {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.clone();
            let (deltas, fail): (Vec<String>, _) = match &self.script {
                Script::Reply(deltas) => (deltas.iter().map(|d| d.to_string()).collect(), None),
                Script::Echo => (
                    request
                        .user_message
                        .split_inclusive(' ')
                        .map(str::to_string)
                        .collect(),
                    None,
                ),
                Script::Fail(status) => (Vec::new(), Some(*status)),
            };
            self.requests.lock().unwrap().push(request);
            Box::pin(stream! {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                if let Some(status) = fail {
                    yield Err(TransportError::Status { status, body: String::new() });
                    return;
                }
                let mut text = String::new();
                for delta in deltas {
                    text.push_str(&delta);
                    yield Ok(Progress::Partial(text.clone()));
                    tokio::task::yield_now().await;
                }
                yield Ok(Progress::Final(text));
            })
        }
    }

    fn registry() -> Arc<CategoryRegistry> {
        Arc::new(CategoryRegistry::new(
            " Reply briefly.",
            [("requirement", "Check requirement."), ("use-case", "Check use case.")],
        ))
    }

    fn bind(
        source: Arc<ScriptedSource>,
        sink: Option<Arc<dyn VerificationSink>>,
    ) -> Binding {
        let root = parse_xhtml(DOC).unwrap();
        VerificationBinder::new(source, registry())
            .with_settings(RequestSettings {
                model: "m".into(),
                temperature: 0.1,
            })
            .bind(&root, GroupingPolicy::Container, sink)
    }

    #[tokio::test]
    async fn completes_and_persists() {
        let source = Arc::new(ScriptedSource::new(Script::Reply(vec!["Fine", "."])));
        let sink = Arc::new(MemorySink::new());
        let binding = bind(source.clone(), Some(sink.clone()));
        assert_eq!(binding.len(), 3);

        let outcome = binding.activate(0).await.unwrap();
        assert!(matches!(outcome, Activation::Completed(ref t) if t == "Fine."));

        let group = binding.group(0).unwrap();
        assert_eq!(group.output(), OutputState::Done("Fine.".into()));
        assert_eq!(group.trigger_state(), TriggerState::Idle);
        assert_eq!(sink.get("REQ-1").unwrap().output, "Fine.");

        let sent = source.requests.lock().unwrap()[0].clone();
        assert_eq!(sent.user_message, "a b | c d");
        assert_eq!(sent.system_message, "Check requirement. Reply briefly.");
        assert_eq!(sent.model, "m");
        assert!(sent.streaming);
    }

    #[tokio::test]
    async fn output_shows_progress_in_order() {
        let source = Arc::new(ScriptedSource::new(Script::Reply(vec!["a", "b", "c"])));
        let binding = bind(source, None);
        let group = binding.group(1).unwrap().clone();
        let mut rx = group.subscribe_output();

        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                let done = matches!(state, OutputState::Done(_));
                seen.push(state);
                if done {
                    break;
                }
            }
            seen
        });

        group.activate().await;
        let seen = watcher.await.unwrap();
        assert_eq!(seen.last(), Some(&OutputState::Done("abc".into())));
        let mut previous = String::new();
        for state in &seen {
            let text = match state {
                OutputState::Streaming(t) | OutputState::Done(t) => t.clone(),
                other => panic!("unexpected state {other:?}"),
            };
            assert!(text.starts_with(&previous));
            previous = text;
        }
    }

    #[tokio::test]
    async fn reactivation_while_busy_is_ignored() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource::gated(
            Script::Reply(vec!["ok"]),
            gate.clone(),
        ));
        let binding = bind(source.clone(), None);
        let group = binding.group(0).unwrap().clone();

        let first = group.activate();
        tokio::pin!(first);
        assert!(futures::poll!(&mut first).is_pending());
        assert_eq!(group.trigger_state(), TriggerState::Busy);

        assert!(matches!(group.activate().await, Activation::Ignored));
        assert_eq!(source.calls(), 1);

        gate.notify_one();
        assert!(matches!(first.await, Activation::Completed(ref t) if t == "ok"));
        assert_eq!(source.calls(), 1);
        assert_eq!(group.trigger_state(), TriggerState::Idle);

        // Idle again, so a new activation goes through.
        gate.notify_one();
        assert!(matches!(group.activate().await, Activation::Completed(_)));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn failure_shows_placeholder_and_restores_trigger() {
        let source = Arc::new(ScriptedSource::new(Script::Fail(500)));
        let sink = Arc::new(MemorySink::new());
        let binding = bind(source, Some(sink.clone()));

        let outcome = binding.activate(0).await.unwrap();
        match outcome {
            Activation::Failed(e) => assert_eq!(e.status(), Some(500)),
            other => panic!("expected failure, got {other:?}"),
        }
        let group = binding.group(0).unwrap();
        assert_eq!(
            group.output(),
            OutputState::Failed(FAILURE_PLACEHOLDER.to_string())
        );
        assert_eq!(group.trigger_state(), TriggerState::Idle);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn dropped_activation_restores_trigger() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource::gated(Script::Reply(vec!["x"]), gate));
        let binding = bind(source, None);
        let group = binding.group(0).unwrap();
        {
            let pending = group.activate();
            tokio::pin!(pending);
            assert!(futures::poll!(&mut pending).is_pending());
            assert_eq!(group.trigger_state(), TriggerState::Busy);
        }
        assert_eq!(group.trigger_state(), TriggerState::Idle);
    }

    #[tokio::test]
    async fn groups_without_id_skip_persistence() {
        let source = Arc::new(ScriptedSource::new(Script::Reply(vec!["done"])));
        let sink = Arc::new(MemorySink::new());
        let binding = bind(source, Some(sink.clone()));
        let outcomes = binding.activate_all().await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| matches!(o, Activation::Completed(_))));
        let ids: Vec<String> = sink.records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["REQ-1".to_string(), "UC-1".to_string()]);
    }

    #[tokio::test]
    async fn unknown_group_index() {
        let source = Arc::new(ScriptedSource::new(Script::Reply(vec![])));
        let binding = bind(source, None);
        assert!(matches!(
            binding.activate(9).await,
            Err(BinderError::UnknownGroup(9))
        ));
        assert!(binding.find("UC-1").is_some());
        assert!(binding.find("nope").is_none());
    }

    #[tokio::test]
    async fn concurrent_groups_do_not_share_output() {
        let source = Arc::new(ScriptedSource::new(Script::Echo));
        let root = parse_xhtml(DOC).unwrap();
        let binding = VerificationBinder::new(source.clone(), registry()).bind(
            &root,
            GroupingPolicy::Fragment,
            None,
        );
        assert_eq!(binding.len(), 4);
        binding.activate_all().await;
        let users: Vec<String> = source
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.user_message.clone())
            .collect();
        assert_eq!(users.len(), 4);
        assert!(users.contains(&"a b".to_string()));
        assert!(users.contains(&"c d".to_string()));
        for group in binding.groups() {
            let own = compose_user_message(&group.group().fragments);
            assert_eq!(group.output(), OutputState::Done(own));
        }
        let outputs: std::collections::BTreeSet<String> = binding
            .groups()
            .iter()
            .filter_map(|g| match g.output() {
                OutputState::Done(text) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(outputs.len(), 4);
    }
}
