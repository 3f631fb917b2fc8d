use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named, ordered sequence of steps describing a browser interaction.
///
/// Recordings are authored externally (Chrome-style recorder exports plus
/// hand-written control-flow steps) and must replay unmodified, so every
/// field here round-trips through serde without loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_title() -> String {
    "unnamed".to_string()
}

/// Top-level step discriminator. Unrecognized kinds from newer recorders
/// deserialize into `Unknown` carrying the raw name and re-serialize as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    SetViewport,
    Navigate,
    Click,
    Change,
    KeyDown,
    Focus,
    WaitForElement,
    WaitForVisibility,
    WaitForExpression,
    Assert,
    CustomStep,
    #[serde(untagged)]
    Unknown(String),
}

/// Sub-dispatch names for `customStep`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CustomStepKind {
    Js,
    Clear,
    Sleep,
    Echo,
    Replay,
    WaitForVisibility,
    WaitForDocumentReady,
    WaitForRedirect,
    While,
    #[serde(untagged)]
    Unknown(String),
}

/// One selector list entry. Recorders emit either a bare string or an array
/// of equivalent selectors; arrays contribute their first element.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectorEntry {
    One(String),
    Many(Vec<String>),
}

impl SelectorEntry {
    pub fn primary(&self) -> Option<&str> {
        match self {
            SelectorEntry::One(s) => Some(s.as_str()),
            SelectorEntry::Many(list) => list.first().map(|s| s.as_str()),
        }
    }
}

/// Post-condition attached to a step, checked after the step executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertedEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// One unit of recorded action or control flow.
///
/// The discriminator is `kind`; the remaining fields are the common optional
/// payload shared across kinds (`target` in particular is overloaded per
/// kind: a value expression, a selector, a sleep duration, a recording name
/// or a loop condition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<SelectorEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Custom step discriminator (only meaningful for `customStep`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<CustomStepKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Milliseconds for `waitFor*` kinds, seconds for `waitForRedirect`.
    /// Zero or negative means wait without bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(
        rename = "assertedEvents",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub asserted_events: Vec<AssertedEvent>,
}

impl Step {
    /// Kind label for logging and screenshot file names.
    pub fn kind_label(&self) -> &str {
        match &self.kind {
            StepKind::SetViewport => "setViewport",
            StepKind::Navigate => "navigate",
            StepKind::Click => "click",
            StepKind::Change => "change",
            StepKind::KeyDown => "keyDown",
            StepKind::Focus => "focus",
            StepKind::WaitForElement => "waitForElement",
            StepKind::WaitForVisibility => "waitForVisibility",
            StepKind::WaitForExpression => "waitForExpression",
            StepKind::Assert => "assert",
            StepKind::CustomStep => "customStep",
            StepKind::Unknown(raw) => raw.as_str(),
        }
    }
}

impl Recording {
    /// Parse a recording from raw JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Parse a recording from an already-decoded JSON value. A bare array is
    /// accepted as a step list with a synthetic title.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::Array(steps) => {
                let steps = steps
                    .into_iter()
                    .map(serde_json::from_value)
                    .collect::<Result<Vec<Step>, _>>()?;
                Ok(Recording {
                    title: "inline".to_string(),
                    steps,
                })
            }
            other => serde_json::from_value(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_RECORDING: &str = r##"{
        "title": "login",
        "steps": [
            { "type": "setViewport", "width": 1200, "height": 900 },
            {
                "type": "navigate",
                "url": "https://panel.example/login",
                "assertedEvents": [
                    { "type": "navigation", "url": "https://panel.example/login", "title": "Login" }
                ]
            },
            {
                "type": "change",
                "value": "param:username",
                "selectors": [["#user"], ["xpath//input[@id='user']"]]
            },
            { "type": "click", "selectors": ["#submit"] },
            { "type": "hoverMaybe", "selectors": ["#menu"] }
        ]
    }"##;

    #[test]
    fn parses_chrome_recorder_format() {
        let recording = Recording::from_json(CHROME_RECORDING).unwrap();
        assert_eq!(recording.title, "login");
        assert_eq!(recording.steps.len(), 5);
        assert_eq!(recording.steps[0].kind, StepKind::SetViewport);
        assert_eq!(recording.steps[0].width, Some(1200));
        assert_eq!(recording.steps[1].asserted_events.len(), 1);
        assert_eq!(
            recording.steps[2].selectors[0].primary(),
            Some("#user")
        );
        assert_eq!(
            recording.steps[4].kind,
            StepKind::Unknown("hoverMaybe".to_string())
        );
    }

    #[test]
    fn unknown_kind_round_trips() {
        let recording = Recording::from_json(CHROME_RECORDING).unwrap();
        let json = serde_json::to_string(&recording).unwrap();
        let again = Recording::from_json(&json).unwrap();
        assert_eq!(
            again.steps[4].kind,
            StepKind::Unknown("hoverMaybe".to_string())
        );
        assert_eq!(again.steps[1].asserted_events[0].url.as_deref(),
            Some("https://panel.example/login"));
    }

    #[test]
    fn custom_step_names_parse() {
        let step: Step = serde_json::from_str(
            r#"{ "type": "customStep", "name": "while", "target": "javascript: false" }"#,
        )
        .unwrap();
        assert_eq!(step.kind, StepKind::CustomStep);
        assert_eq!(step.name, Some(CustomStepKind::While));

        let step: Step = serde_json::from_str(
            r#"{ "type": "customStep", "name": "frobnicate" }"#,
        )
        .unwrap();
        assert_eq!(
            step.name,
            Some(CustomStepKind::Unknown("frobnicate".to_string()))
        );
    }

    #[test]
    fn bare_step_array_parses_as_inline_recording() {
        let value: Value =
            serde_json::from_str(r##"[{ "type": "click", "selectors": ["#ok"] }]"##).unwrap();
        let recording = Recording::from_value(value).unwrap();
        assert_eq!(recording.title, "inline");
        assert_eq!(recording.steps.len(), 1);
    }
}
