use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

use super::bridge::ContextBridge;
use super::loader::{RecordingLoader, TEMPLATE_SUFFIX};
use super::resolver::{
    eval_with_loop_count, evaluate_while_condition, is_truthy, resolve_value, value_to_text,
};
use super::store::{ParameterSet, PersistentStore};
use crate::browser::{
    pick_selector, pick_single, ElementHandle, ExecutionContext, ResolvedSelector, WaitTimeout,
    POLL_INTERVAL,
};
use crate::error::{ReplayError, Result};
use crate::models::{CustomStepKind, Recording, ReplayRun, Step, StepKind};

/// Fixed bound for the document readiness wait after navigation.
const DOCUMENT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for `waitFor*` steps that don't specify one.
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Callback receiving `echo` output: (context prefix, rendered content).
pub type OutputFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

fn default_output() -> OutputFn {
    Arc::new(|context, message| tracing::info!("{} {}", context, message))
}

/// Translate a step's timeout field into a wait bound: unset means the
/// default, zero or negative means wait without bound.
fn wait_timeout(step_timeout: Option<i64>) -> Option<Duration> {
    match step_timeout {
        None => Some(DEFAULT_WAIT_TIMEOUT),
        Some(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
        Some(_) => None,
    }
}

fn map_wait_err(err: anyhow::Error) -> ReplayError {
    match err.downcast::<WaitTimeout>() {
        Ok(timeout) => ReplayError::Timeout(timeout.to_string()),
        Err(other) => ReplayError::Driver(other),
    }
}

/// Wait steps block on the first selector only; the remaining entries are
/// recorder-provided alternatives for element lookup steps.
fn first_selector(step: &Step) -> Result<ResolvedSelector> {
    let entry = step
        .selectors
        .first()
        .ok_or_else(|| ReplayError::InvalidStep("wait step requires selectors".into()))?;
    pick_selector(std::slice::from_ref(entry))
}

/// The step interpreter.
///
/// One engine instance is bound to one execution context for the duration
/// of a session. `replay` walks a recording's steps strictly in sequence;
/// nested replays (`customStep: replay`, `while` sub-steps) are synchronous
/// in-stack recursive calls sharing the persistent store and receiving the
/// parameter set by value.
pub struct ReplayEngine {
    ctx: Arc<dyn ExecutionContext>,
    bridge: ContextBridge,
    loader: RecordingLoader,
    env_params: ParameterSet,
    store: PersistentStore,
    delay_ms: u64,
    delay_factor: u64,
    snapshot_dir: Option<PathBuf>,
    output: OutputFn,
}

impl ReplayEngine {
    pub fn new(
        ctx: Arc<dyn ExecutionContext>,
        loader: RecordingLoader,
        env_params: ParameterSet,
        store: PersistentStore,
    ) -> Self {
        Self {
            ctx,
            bridge: ContextBridge::new(),
            loader,
            env_params,
            store,
            delay_ms: 500,
            delay_factor: 1,
            snapshot_dir: None,
            output: default_output(),
        }
    }

    /// Inter-step delay is `delay_ms * delay_factor`; a zero factor
    /// disables the delay entirely.
    pub fn with_delays(mut self, delay_ms: u64, delay_factor: u64) -> Self {
        self.delay_ms = delay_ms;
        self.delay_factor = delay_factor;
        self
    }

    /// Enable per-step diagnostic screenshots into the given directory.
    pub fn with_screenshots(mut self, dir: PathBuf) -> Self {
        self.snapshot_dir = Some(dir);
        self
    }

    pub fn with_output(mut self, output: OutputFn) -> Self {
        self.output = output;
        self
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    pub fn loader(&self) -> &RecordingLoader {
        &self.loader
    }

    pub fn bridge(&self) -> &ContextBridge {
        &self.bridge
    }

    /// Load a recording by name and replay it.
    pub async fn replay_named(&mut self, name: &str, params: ParameterSet) -> Result<Value> {
        let recording = self.load_recording(name, &params).await?;
        self.replay(&recording, params).await
    }

    /// Replay a loaded recording. Boxed so nested replays can recurse.
    pub fn replay<'a>(
        &'a mut self,
        recording: &'a Recording,
        params: ParameterSet,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        Box::pin(self.replay_inner(recording, params))
    }

    async fn replay_inner(
        &mut self,
        recording: &Recording,
        mut params: ParameterSet,
    ) -> Result<Value> {
        let mut run = ReplayRun::new(recording.title.clone(), recording.steps.len());
        run.start();
        tracing::info!(
            "replaying: {} ({} steps)...",
            recording.title,
            recording.steps.len()
        );

        let mut result = Value::Null;

        for (index, step) in recording.steps.iter().enumerate() {
            if let Err(err) = self.run_step(index, step, &mut params, &mut result).await {
                run.fault(err.to_string());
                tracing::error!(run_id = %run.id, "replay faulted at step {}: {}", index + 1, err);
                return Err(err);
            }
            run.current_step = index + 1;
        }

        run.complete();
        tracing::debug!(
            "params after replay: {}",
            serde_json::Value::Object(params.clone())
        );
        let failures = self.bridge.sync_failures();
        if failures > 0 {
            tracing::debug!(run_id = %run.id, "bridge sync failures so far: {}", failures);
        }

        Ok(result)
    }

    /// One full per-step cycle: inject, screenshot, dispatch, asserted
    /// events, delay, pull & merge, re-inject and read the result slot.
    async fn run_step(
        &mut self,
        index: usize,
        step: &Step,
        params: &mut ParameterSet,
        result: &mut Value,
    ) -> Result<()> {
        self.inject(params).await?;
        self.screenshot(index, step.kind_label(), false).await;

        tracing::info!("step {}: {}", index + 1, step.kind_label());
        self.execute_step(step, params).await?;

        self.check_asserted_events(step).await?;

        if self.delay_factor > 0 {
            sleep(Duration::from_millis(self.delay_ms * self.delay_factor)).await;
        }

        if let Some(pulled) = self.bridge.pull_parameters(self.ctx.as_ref()).await {
            params.extend(pulled);
        }
        if let Some(pulled) = self.bridge.pull_store(self.ctx.as_ref()).await {
            self.store.merge(pulled);
        }

        self.inject(params).await?;
        if let Some(value) = self.bridge.read_result(self.ctx.as_ref()).await {
            *result = value;
        }

        self.screenshot(index, step.kind_label(), true).await;
        Ok(())
    }

    /// Reinstall the support interface and push the current parameter and
    /// store state into the context.
    async fn inject(&self, params: &ParameterSet) -> Result<()> {
        let ctx = self.ctx.as_ref();
        self.bridge.ensure_support_interface(ctx).await?;
        self.bridge.push_parameters(ctx, params).await?;
        self.bridge.push_store(ctx, &self.store).await?;
        Ok(())
    }

    async fn execute_step(&mut self, step: &Step, params: &ParameterSet) -> Result<()> {
        match &step.kind {
            StepKind::SetViewport => {
                let width = step
                    .width
                    .ok_or_else(|| ReplayError::InvalidStep("setViewport requires width".into()))?;
                let height = step
                    .height
                    .ok_or_else(|| ReplayError::InvalidStep("setViewport requires height".into()))?;
                self.ctx.set_viewport(width, height).await?;
            }

            StepKind::Navigate => {
                let raw = step
                    .url
                    .as_deref()
                    .ok_or_else(|| ReplayError::InvalidStep("navigate requires url".into()))?;
                let resolved = resolve_value(raw, &self.env_params, self.ctx.as_ref()).await?;
                let wait_ready = step
                    .parameters
                    .get("waitForReady")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                self.goto(&value_to_text(&resolved), params, wait_ready).await?;
            }

            StepKind::Click => {
                let selector = pick_selector(&step.selectors)?;
                let handle = self.find(&selector).await?;
                self.ctx.click(&handle).await?;
            }

            StepKind::Change => {
                let raw = step.value.clone().unwrap_or_default();
                let resolved = resolve_value(&raw, &self.env_params, self.ctx.as_ref()).await?;
                let text = value_to_text(&resolved);

                let selector = pick_selector(&step.selectors)?;
                let handle = self.find(&selector).await?;
                self.ctx.clear(&handle).await?;
                if !text.is_empty() {
                    tracing::debug!("sending value into {}", selector);
                    self.ctx.send_keys(&handle, &text).await?;
                }
            }

            StepKind::KeyDown => {
                let key = step
                    .key
                    .as_deref()
                    .ok_or_else(|| ReplayError::InvalidStep("keyDown requires key".into()))?;
                tracing::debug!("sending key: {}", key);
                self.ctx.send_key(key).await?;
            }

            StepKind::Focus => {
                return Err(ReplayError::NotImplemented("focus".into()));
            }

            StepKind::WaitForElement => {
                let selector = first_selector(step)?;
                let visible = step.visible.unwrap_or(false);
                self.ctx
                    .wait_for_element(&selector, visible, wait_timeout(step.timeout))
                    .await
                    .map_err(map_wait_err)?;
            }

            StepKind::WaitForVisibility => {
                let selector = first_selector(step)?;
                self.ctx
                    .wait_for_element(&selector, true, wait_timeout(step.timeout))
                    .await
                    .map_err(map_wait_err)?;
            }

            StepKind::WaitForExpression => {
                let expression = step.expression.as_deref().ok_or_else(|| {
                    ReplayError::InvalidStep("waitForExpression requires expression".into())
                })?;
                self.wait_for_expression(expression, wait_timeout(step.timeout))
                    .await?;
            }

            StepKind::Assert => {
                let expected = step
                    .text
                    .as_deref()
                    .ok_or_else(|| ReplayError::InvalidStep("assert requires text".into()))?;
                let selector = pick_selector(&step.selectors)?;
                let handle = self.find(&selector).await?;
                let actual = self.ctx.text(&handle).await?;
                if actual != expected {
                    return Err(ReplayError::AssertionFailed(format!(
                        "Expected text: {}, Actual text: {}",
                        expected, actual
                    )));
                }
            }

            StepKind::CustomStep => {
                self.execute_custom(step, params).await?;
            }

            StepKind::Unknown(raw) => {
                tracing::warn!("Unsupported step type: {}", raw);
            }
        }

        Ok(())
    }

    async fn execute_custom(&mut self, step: &Step, params: &ParameterSet) -> Result<()> {
        let Some(name) = &step.name else {
            tracing::warn!("custom step without a name, skipping");
            return Ok(());
        };
        tracing::debug!("executing custom step: {:?}", name);

        match name {
            CustomStepKind::Js => {
                let script = step
                    .parameters
                    .get("script")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .or_else(|| step.source.clone())
                    .or_else(|| step.target.clone())
                    .ok_or_else(|| ReplayError::InvalidStep("js step requires a script".into()))?;
                self.ctx.run_script(&script).await?;
            }

            CustomStepKind::Clear => {
                let target = step
                    .target
                    .as_deref()
                    .ok_or_else(|| ReplayError::InvalidStep("clear requires target".into()))?;
                let selector = pick_single(target)?;
                let handle = self.find(&selector).await?;
                self.ctx.clear(&handle).await?;
            }

            CustomStepKind::Sleep => {
                let raw = step
                    .target
                    .as_deref()
                    .ok_or_else(|| ReplayError::InvalidStep("sleep requires target".into()))?;
                let seconds: u64 = raw.trim().parse().map_err(|_| {
                    ReplayError::InvalidStep(format!("sleep target is not a number: {}", raw))
                })?;
                sleep(Duration::from_secs(seconds)).await;
            }

            CustomStepKind::Echo => {
                let mut prefix = String::from("echo:");
                if let Some(title) = &step.title {
                    prefix.push_str(title);
                }
                let expr = step
                    .source
                    .as_deref()
                    .or(step.target.as_deref())
                    .ok_or_else(|| ReplayError::InvalidStep("echo requires an expression".into()))?;
                let value = resolve_value(expr, &self.env_params, self.ctx.as_ref()).await?;
                (self.output)(&prefix, &value_to_text(&value));
            }

            CustomStepKind::Replay => {
                let target = step
                    .target
                    .as_deref()
                    .ok_or_else(|| ReplayError::InvalidStep("replay requires target".into()))?
                    .to_string();
                self.replay_named(&target, params.clone()).await?;
            }

            CustomStepKind::WaitForVisibility => {
                let target = step
                    .target
                    .as_deref()
                    .ok_or_else(|| {
                        ReplayError::InvalidStep("waitForVisibility requires target".into())
                    })?;
                let selector = pick_single(target)?;
                self.ctx
                    .wait_for_element(&selector, true, None)
                    .await
                    .map_err(map_wait_err)?;
                tracing::debug!("{} became visible", target);
            }

            CustomStepKind::WaitForDocumentReady => {
                self.wait_for_document_ready().await?;
            }

            CustomStepKind::WaitForRedirect => {
                let url = step
                    .url
                    .as_deref()
                    .ok_or_else(|| {
                        ReplayError::InvalidStep("waitForRedirect requires url".into())
                    })?
                    .trim()
                    .to_string();
                let mut countdown = step.timeout.unwrap_or(i64::MAX);

                tracing::info!("Waiting for URL: {} ...", url);
                loop {
                    sleep(Duration::from_secs(1)).await;
                    countdown -= 1;
                    if self.ctx.current_url().await? == url {
                        break;
                    }
                    if countdown <= 0 {
                        return Err(ReplayError::Timeout(format!(
                            "waiting for redirect to {}",
                            url
                        )));
                    }
                }
            }

            CustomStepKind::While => {
                self.execute_while(step, params).await?;
            }

            CustomStepKind::Unknown(raw) => {
                tracing::warn!("Unsupported custom step: {}", raw);
            }
        }

        Ok(())
    }

    /// `while` loop: re-evaluate the condition (loop counter exposed to the
    /// script) and run the optional inline script and sub-steps each round.
    /// No iteration cap; the recording author owns termination.
    async fn execute_while(&mut self, step: &Step, params: &ParameterSet) -> Result<()> {
        let Some(condition) = step.target.clone() else {
            tracing::warn!("while step without a condition target never runs");
            return Ok(());
        };

        let inline_js = step
            .parameters
            .get("javascript")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let entries: Vec<Value> = match step.parameters.get("steps") {
            Some(Value::String(name)) => vec![Value::String(name.clone())],
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        };

        let mut loop_count = 0u64;
        while evaluate_while_condition(&condition, loop_count, self.ctx.as_ref()).await? {
            if let Some(js) = &inline_js {
                tracing::debug!("executing loop body script");
                self.ctx.run_script(js).await?;
            }

            for entry in &entries {
                match entry {
                    Value::String(name) => {
                        self.replay_named(name, params.clone()).await?;
                    }
                    other => {
                        let recording = Recording::from_value(other.clone())?;
                        self.replay(&recording, params.clone()).await?;
                    }
                }
            }

            loop_count += 1;
        }

        Ok(())
    }

    /// Navigate and re-establish the support interface in the fresh
    /// document. Navigation is the sole document-transition step.
    async fn goto(&self, url: &str, params: &ParameterSet, wait_ready: bool) -> Result<()> {
        tracing::info!("navigating to: {}...", url);
        self.ctx.navigate(url).await?;

        if wait_ready {
            self.wait_for_document_ready().await?;
        }

        self.inject(params).await?;
        Ok(())
    }

    async fn wait_for_document_ready(&self) -> Result<()> {
        tracing::debug!("waiting for document ready...");
        let deadline = Instant::now() + DOCUMENT_READY_TIMEOUT;

        loop {
            // Errors here mean the document is still transitioning
            let ready = self
                .ctx
                .run_script("document.readyState === \"complete\"")
                .await
                .unwrap_or(Value::Bool(false));
            if ready == Value::Bool(true) {
                tracing::debug!("document ready");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ReplayError::Timeout("waiting for document ready".into()));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_expression(
        &self,
        expression: &str,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut loop_count = 0u64;

        loop {
            let value =
                eval_with_loop_count(self.ctx.as_ref(), expression, loop_count).await?;
            if is_truthy(&value) {
                return Ok(());
            }
            loop_count += 1;

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(ReplayError::Timeout(format!(
                        "waiting for expression: {}",
                        expression
                    )));
                }
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn check_asserted_events(&self, step: &Step) -> Result<()> {
        for event in &step.asserted_events {
            if event.event_type != "navigation" {
                continue;
            }

            let current_url = self.ctx.current_url().await?;
            let current_title = self.ctx.current_title().await?;

            if let Some(url) = event.url.as_deref().filter(|u| !u.is_empty()) {
                // A pending redirect also trips this; recordings should use
                // waitForRedirect before asserting in that case
                if current_url != url {
                    return Err(ReplayError::AssertionFailed(format!(
                        "Navigation assertion failed. Expected URL: {}, Actual URL: {}",
                        url, current_url
                    )));
                }
            }
            if let Some(title) = event.title.as_deref().filter(|t| !t.is_empty()) {
                if current_title != title {
                    return Err(ReplayError::AssertionFailed(format!(
                        "Navigation assertion failed. Expected title: {}, Actual title: {}",
                        title, current_title
                    )));
                }
            }
        }
        Ok(())
    }

    async fn find(&self, selector: &ResolvedSelector) -> Result<ElementHandle> {
        self.ctx
            .find_element(selector)
            .await
            .map_err(|_| ReplayError::SelectorNotFound(selector.to_string()))
    }

    async fn load_recording(&self, name: &str, params: &ParameterSet) -> Result<Recording> {
        let render_context = if name.ends_with(TEMPLATE_SUFFIX) {
            self.template_context(params).await
        } else {
            Value::Null
        };
        self.loader.load(name, &render_context)
    }

    /// Context object handed to the template engine when rendering a
    /// templated recording.
    async fn template_context(&self, params: &ParameterSet) -> Value {
        let jsparams = self
            .bridge
            .pull_parameters(self.ctx.as_ref())
            .await
            .unwrap_or_default();
        json!({
            "params": Value::Object(params.clone()),
            "env": Value::Object(self.env_params.clone()),
            "store": self.store.to_value(),
            "jsparams": Value::Object(jsparams),
        })
    }

    /// Diagnostic screenshot, keyed by step index and kind. A no-op unless
    /// enabled; never fatal.
    async fn screenshot(&self, index: usize, label: &str, after: bool) {
        let Some(dir) = &self.snapshot_dir else { return };

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!("Failed to create snapshot dir {}: {}", dir.display(), e);
            return;
        }

        let suffix = if after { "_after" } else { "" };
        let file = format!(
            "{}_{}_{}{}.png",
            chrono::Utc::now().timestamp(),
            index + 1,
            label,
            suffix
        );
        let path = dir.join(file);
        if let Err(e) = self.ctx.take_screenshot(&path).await {
            tracing::warn!("Failed to capture screenshot {}: {}", path.display(), e);
        }
    }
}
