use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;

use super::engine::{OutputFn, ReplayEngine};
use super::loader::{RecordingLoader, TemplateEngine};
use super::store::{ParameterSet, PersistentStore, STORE_FILE};
use crate::browser::{CdpContext, ExecutionContext};
use crate::config::Config;
use crate::error::Result;

/// Session controller: owns the execution context handle, the environment
/// parameters and the persistent-store lifecycle (load at open, save at
/// close). Everything else is delegated to the engine.
pub struct ReplaySession {
    ctx: Arc<CdpContext>,
    engine: ReplayEngine,
    store_path: PathBuf,
    closed: bool,
}

impl ReplaySession {
    /// Launch the browser, index the recordings and restore the store.
    pub async fn open(
        config: &Config,
        env_params: ParameterSet,
        templates: Option<Arc<dyn TemplateEngine>>,
        output: Option<OutputFn>,
    ) -> Result<Self> {
        let ctx = Arc::new(CdpContext::new());
        ctx.launch(config.headless, config.viewport).await?;

        let mut loader = RecordingLoader::new(templates);
        for dir in &config.base_dirs {
            loader.scan(dir)?;
        }

        let store_path = config
            .base_dirs
            .first()
            .map(|dir| dir.join(STORE_FILE))
            .unwrap_or_else(|| PathBuf::from(STORE_FILE));
        let store = PersistentStore::load(&store_path)?;

        let mut engine = ReplayEngine::new(
            Arc::clone(&ctx) as Arc<dyn ExecutionContext>,
            loader,
            env_params,
            store,
        )
        .with_delays(config.delay_ms, config.delay_factor);

        if config.screenshots {
            engine = engine.with_screenshots(config.snapshot_dir.clone());
        }
        if let Some(output) = output {
            engine = engine.with_output(output);
        }

        Ok(Self {
            ctx,
            engine,
            store_path,
            closed: false,
        })
    }

    /// Replay a recording by indexed name.
    pub async fn replay(&mut self, name: &str, params: ParameterSet) -> Result<Value> {
        self.engine.replay_named(name, params).await
    }

    pub fn recordings(&self) -> Vec<String> {
        self.engine
            .loader()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn sync_failures(&self) -> u64 {
        self.engine.bridge().sync_failures()
    }

    /// Fetch a URL's rendered body text (plain-text exports). Navigates
    /// without the readiness wait and gives the document a short settle
    /// delay instead.
    pub async fn download_text(&mut self, url: &str, target: Option<&Path>) -> Result<String> {
        self.ctx.navigate(url).await?;
        sleep(Duration::from_secs(3)).await;

        let value = self.ctx.run_script("document.body.innerText").await?;
        let text = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };

        if let Some(path) = target {
            tokio::fs::write(path, &text).await?;
        }
        Ok(text)
    }

    /// Save the store and release the browser. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        self.engine.store().save(&self.store_path)?;
        tracing::info!("Closing session...");
        self.ctx.close().await?;
        self.closed = true;
        Ok(())
    }
}
