use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::store::{ParameterSet, PersistentStore};
use crate::browser::ExecutionContext;

/// In-context variable holding the transient parameter structure. The
/// persistent store and the result slot travel inside it under reserved
/// keys so all three categories share one channel.
pub const PARAMS_VAR: &str = "__recplayParams";
pub const STORE_KEY: &str = "__store";
pub const RESULT_KEY: &str = "__result";

/// Support interface installed into every document the engine touches.
/// Provides parameter I/O, store I/O, the result slot and table extraction
/// to scripts running inside the page.
const SUPPORT_INTERFACE: &str = r#"
(() => {
    if (typeof window.__recplayParams === 'undefined') {
        window.__recplayParams = {};
    }

    window.__recplayGetParam = (key) => window.__recplayParams[key];
    window.__recplaySetParam = (key, value) => { window.__recplayParams[key] = value; };

    window.__recplaySetResult = (result) => { window.__recplayParams['__result'] = result; };
    window.__recplayGetResult = () => window.__recplayParams['__result'];

    window.__recplaySetStore = (store) => { window.__recplayParams['__store'] = store; };
    window.__recplayGetStore = () => window.__recplayParams['__store'];

    window.__recplayStoreSet = (key, value) => {
        const store = window.__recplayGetStore() || {};
        store[key] = value;
        window.__recplaySetStore(store);
        return window.__recplayStoreGet(key) === value;
    };
    window.__recplayStoreGet = (key, fallback) => {
        const store = window.__recplayGetStore() || {};
        const value = store[key];
        return value === undefined ? fallback : value;
    };

    // Structured table extraction. `headers` maps column index to a name
    // (rows become objects); input/select cells contribute their current
    // value instead of their text.
    window.__recplayTableToArray = (table, headers, skipRows, withCells) => {
        if (typeof table === 'string') {
            table = document.querySelector(table);
        }
        const rows = [];
        for (let i = skipRows || 0; i < table.rows.length; i++) {
            const row = table.rows[i];
            const out = headers ? {} : [];
            for (let j = 0; j < row.cells.length; j++) {
                const cell = row.cells[j];
                let value = null;
                const input = cell.querySelector('input, select');
                if (input && input.tagName === 'INPUT') {
                    value = input.value;
                } else if (input && input.tagName === 'SELECT') {
                    value = input.selectedOptions[0].label;
                } else {
                    value = cell.innerText;
                }
                if (withCells) {
                    value = { cell: cell, cellIndex: j, valueParsed: value };
                }
                if (headers) {
                    out[headers[j] !== undefined ? headers[j] : j] = value;
                } else {
                    out.push(value);
                }
            }
            rows.push(out);
        }
        return rows;
    };

    return true;
})()
"#;

/// JSON-quote a string for embedding into a script.
pub(crate) fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

struct SupportScript {
    name: String,
    body: String,
    fingerprint: String,
}

/// Keeps the support interface and the current parameter/store state
/// present in the execution context, without re-sending unchanged content.
///
/// Each script's content fingerprint is recorded inside the page itself
/// (the injection ledger), so navigation implicitly invalidates it and the
/// next `ensure_support_interface` call reinstalls everything.
pub struct ContextBridge {
    scripts: Vec<SupportScript>,
    sync_failures: AtomicU64,
}

impl ContextBridge {
    pub fn new() -> Self {
        Self::with_scripts(vec![("interface".to_string(), SUPPORT_INTERFACE.to_string())])
    }

    /// Bridge over a custom support script set (additional helper scripts
    /// are injected in order, after their predecessors).
    pub fn with_scripts(scripts: Vec<(String, String)>) -> Self {
        let scripts = scripts
            .into_iter()
            .map(|(name, body)| {
                let fingerprint = fingerprint(&body);
                SupportScript {
                    name,
                    body,
                    fingerprint,
                }
            })
            .collect();
        Self {
            scripts,
            sync_failures: AtomicU64::new(0),
        }
    }

    /// Content fingerprints of the configured support scripts.
    pub fn fingerprints(&self) -> Vec<&str> {
        self.scripts
            .iter()
            .map(|s| s.fingerprint.as_str())
            .collect()
    }

    /// Name of the in-page ledger flag for one script fingerprint.
    pub fn ledger_flag(fingerprint: &str) -> String {
        format!("window.__recplayInjected_{}", fingerprint)
    }

    /// Install any support script whose fingerprint is absent from the
    /// in-page injection ledger. Idempotent and cheap once installed.
    pub async fn ensure_support_interface(&self, ctx: &dyn ExecutionContext) -> Result<()> {
        for script in &self.scripts {
            let flag = Self::ledger_flag(&script.fingerprint);
            let check = format!("{} === true", flag);
            if ctx.run_script(&check).await? == Value::Bool(true) {
                continue;
            }

            tracing::debug!("injecting support script: {}", script.name);
            ctx.run_script(&script.body).await?;
            ctx.run_script(&format!("{} = true", flag)).await?;
        }
        Ok(())
    }

    /// Assign the transient parameter structure in-context. Skipped when
    /// there is nothing to push.
    pub async fn push_parameters(
        &self,
        ctx: &dyn ExecutionContext,
        params: &ParameterSet,
    ) -> Result<()> {
        if params.is_empty() {
            return Ok(());
        }

        let encoded = Value::Object(params.clone());
        tracing::debug!("pushing parameters ({} keys)", params.len());
        ctx.run_script(&format!("window.{} = {}", PARAMS_VAR, encoded))
            .await?;
        Ok(())
    }

    /// Assign the persistent store into its reserved key. Always pushed.
    pub async fn push_store(
        &self,
        ctx: &dyn ExecutionContext,
        store: &PersistentStore,
    ) -> Result<()> {
        tracing::debug!("pushing store");
        ctx.run_script(&format!("window.__recplaySetStore({})", store.to_value()))
            .await?;
        Ok(())
    }

    /// Read back the transient parameter structure. A failed read (context
    /// mid-navigation, interface not yet reinstalled) is counted and leaves
    /// host state untouched for this cycle.
    pub async fn pull_parameters(&self, ctx: &dyn ExecutionContext) -> Option<ParameterSet> {
        match ctx.run_script(&format!("window.{}", PARAMS_VAR)).await {
            Ok(Value::Object(map)) => {
                tracing::debug!("pulled {} parameter keys", map.len());
                Some(map)
            }
            Ok(_) => None,
            Err(e) => {
                self.sync_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Failed to pull parameters from context: {}", e);
                None
            }
        }
    }

    /// Read back the persistent store's in-context copy.
    pub async fn pull_store(&self, ctx: &dyn ExecutionContext) -> Option<ParameterSet> {
        let script = "window.__recplayGetStore ? window.__recplayGetStore() : null";
        match ctx.run_script(script).await {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => None,
            Err(e) => {
                self.sync_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Failed to pull store from context: {}", e);
                None
            }
        }
    }

    /// Read the reserved result slot. `None` means the read itself failed;
    /// an unset slot reads as `Some(Null)`.
    pub async fn read_result(&self, ctx: &dyn ExecutionContext) -> Option<Value> {
        let script = "window.__recplayGetResult ? window.__recplayGetResult() : null";
        match ctx.run_script(script).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.sync_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Failed to read result from context: {}", e);
                None
            }
        }
    }

    /// Number of pull/read cycles that failed and were recovered by leaving
    /// host state stale. Observability only.
    pub fn sync_failures(&self) -> u64 {
        self.sync_failures.load(Ordering::Relaxed)
    }
}

impl Default for ContextBridge {
    fn default() -> Self {
        Self::new()
    }
}

fn fingerprint(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprints_are_stable_and_distinct() {
        let a = fingerprint("let a = 1;");
        let b = fingerprint("let b = 2;");
        assert_eq!(a, fingerprint("let a = 1;"));
        assert_ne!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn ledger_flag_names_are_valid_identifiers() {
        let flag = ContextBridge::ledger_flag(&fingerprint("x"));
        assert!(flag.starts_with("window.__recplayInjected_"));
        assert!(flag
            .trim_start_matches("window.")
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn js_str_quotes_safely() {
        assert_eq!(js_str("plain"), "\"plain\"");
        assert_eq!(js_str("with \"quotes\""), "\"with \\\"quotes\\\"\"");
    }
}
