use serde_json::Value;

use super::bridge::{js_str, PARAMS_VAR};
use super::store::ParameterSet;
use crate::browser::ExecutionContext;
use crate::error::Result;

/// Resolve a step value that may be a literal or a deferred expression.
///
/// Scheme prefixes are checked in fixed precedence order, first match wins:
/// `javascript:` evaluates in-context, `param:` reads the read-only
/// environment parameter set, `jsparam:` reads the in-context transient
/// parameters directly, `env:` reads a process environment variable,
/// `file:` reads raw file contents. Anything else is returned unchanged.
pub async fn resolve_value(
    raw: &str,
    env_params: &ParameterSet,
    ctx: &dyn ExecutionContext,
) -> Result<Value> {
    if let Some(script) = raw.strip_prefix("javascript:") {
        return Ok(ctx.run_script(script.trim_start()).await?);
    }
    if let Some(name) = raw.strip_prefix("param:") {
        return Ok(env_params.get(name).cloned().unwrap_or(Value::Null));
    }
    if let Some(name) = raw.strip_prefix("jsparam:") {
        let script = format!("window.{}[{}]", PARAMS_VAR, js_str(name));
        return Ok(ctx.run_script(&script).await?);
    }
    if let Some(name) = raw.strip_prefix("env:") {
        return Ok(match std::env::var(name) {
            Ok(value) => Value::String(value),
            Err(_) => Value::Null,
        });
    }
    if let Some(path) = raw.strip_prefix("file:") {
        return Ok(Value::String(tokio::fs::read_to_string(path).await?));
    }

    Ok(Value::String(raw.to_string()))
}

/// Render a resolved value as text input (for `change` values and URLs).
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Evaluate a script with the loop counter exposed as
/// `window.__recplayLoopCount`.
pub async fn eval_with_loop_count(
    ctx: &dyn ExecutionContext,
    script: &str,
    loop_count: u64,
) -> Result<Value> {
    ctx.run_script(&format!("window.__recplayLoopCount = {}", loop_count))
        .await?;
    Ok(ctx.run_script(script).await?)
}

/// Evaluate a `while` condition. Only `javascript:`-prefixed conditions
/// execute; anything else is unconditionally false so a malformed recording
/// cannot loop by accident.
pub async fn evaluate_while_condition(
    condition: &str,
    loop_count: u64,
    ctx: &dyn ExecutionContext,
) -> Result<bool> {
    let Some(script) = condition.strip_prefix("javascript:") else {
        tracing::warn!(
            "while condition without javascript: prefix never runs: {}",
            condition
        );
        return Ok(false);
    };

    let result = eval_with_loop_count(ctx, script.trim_start(), loop_count).await?;
    let truthy = is_truthy(&result);
    tracing::debug!("while condition {} => {}", script.trim(), truthy);
    Ok(truthy)
}

/// JavaScript-style truthiness for values coming back over the boundary.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
