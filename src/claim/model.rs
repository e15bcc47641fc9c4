//! Pin claim data model.
//!
//! The wire form mirrors the PinClaim resource: `inputSpec` and `outputSpec`
//! both exist on the wire, but only the one matching `mode` means anything.
//! [`ClaimSpec`] folds them into a single [`PinBehavior`] variant during
//! deserialization so the inactive half never reaches the engine.

use super::duration::{parse_duration, parse_optional_duration};
use super::status::PinClaimStatus;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use strum::{Display, EnumString};

/// Electrical mode a claim puts the pin in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    /// Input with pull-up; idles high.
    InputHigh,
    /// Input with pull-down; idles low.
    InputLow,
    Output,
}

impl Mode {
    pub fn is_input(self) -> bool {
        matches!(self, Mode::InputHigh | Mode::InputLow)
    }
}

/// Signal edge a digital trigger reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum TriggerType {
    Analog,
    Digital,
}

/// Relative slack applied to band edges.
const BAND_EPSILON: f64 = 1e-9;

/// A voltage with a symmetric tolerance band around it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PinValue {
    pub voltage: f64,
    #[serde(default)]
    pub tolerance: f64,
}

impl PinValue {
    pub fn new(voltage: f64, tolerance: f64) -> Self {
        Self { voltage, tolerance }
    }

    /// Whether `voltage` falls inside `[voltage - tolerance, voltage + tolerance]`.
    ///
    /// Both ends are inclusive. The bounds get a few ULPs of slack so that
    /// `3.4` is inside `3.3 ± 0.1` even though `3.4 - 3.3 > 0.1` in f64.
    pub fn contains(&self, voltage: f64) -> bool {
        let low = self.voltage - self.tolerance;
        let high = self.voltage + self.tolerance;
        let slack = BAND_EPSILON * low.abs().max(high.abs()).max(1.0);
        voltage >= low - slack && voltage <= high + slack
    }
}

/// Where an admitted action is delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionTarget {
    Hook(String),
    Job(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_template: Option<serde_json::Value>,
    /// Minimum spacing between two fires of this action, in seconds.
    #[serde(default)]
    pub cooldown: u64,
}

impl Action {
    fn hook(&self) -> Option<&str> {
        self.hook_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    fn job(&self) -> Option<&serde_json::Value> {
        self.job_template.as_ref().filter(|t| match t {
            serde_json::Value::Null => false,
            serde_json::Value::Object(map) => !map.is_empty(),
            _ => true,
        })
    }

    /// Resolved delivery target. The hook wins when both are set.
    pub fn target(&self) -> Option<ActionTarget> {
        match (self.hook(), self.job()) {
            (Some(url), _) => Some(ActionTarget::Hook(url.to_string())),
            (None, Some(template)) => Some(ActionTarget::Job(template.clone())),
            (None, None) => None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.hook().is_some() && self.job().is_some()
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub target: PinValue,
    #[serde(rename = "type")]
    pub kind: TriggerType,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default)]
    pub continuous_interval: String,
}

impl Trigger {
    /// Re-fire period for continuous triggers, `None` for edge triggers.
    pub fn repeat_interval(&self) -> Result<Option<Duration>, String> {
        if !self.continuous {
            return Ok(None);
        }
        let interval = parse_duration(&self.continuous_interval).map_err(|e| e.to_string())?;
        if interval.is_zero() {
            return Err("interval must be greater than zero".to_string());
        }
        Ok(Some(interval))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub on_change: bool,
    #[serde(default, rename = "hookURL")]
    pub hook_url: String,
}

impl Report {
    /// Periodic emission interval; an empty string means none.
    pub fn period(&self) -> Result<Option<Duration>, String> {
        match parse_optional_duration(&self.interval).map_err(|e| e.to_string())? {
            Some(d) if d.is_zero() => Err("interval must be greater than zero".to_string()),
            other => Ok(other),
        }
    }

    /// A report with no interval and no on-change flag never emits.
    pub fn emits(&self) -> bool {
        !self.interval.trim().is_empty() || self.on_change
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSpec {
    pub edge: Edge,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub reports: Vec<Report>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub source: String,
}

impl OutputSpec {
    /// Resolve `source` to a voltage: a logic level or a literal number.
    pub fn resolve(&self, logic_high: f64) -> Result<f64, ConfigError> {
        let source = self.source.trim();
        match source.to_ascii_lowercase().as_str() {
            "high" | "on" | "1" | "true" => Ok(logic_high),
            "low" | "off" | "0" | "false" => Ok(0.0),
            _ => source
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(|| ConfigError::InvalidOutputSource {
                    value: self.source.clone(),
                }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PinBehavior {
    Input(InputSpec),
    Output(OutputSpec),
}

/// Desired state of one claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawClaimSpec", into = "RawClaimSpec")]
pub struct ClaimSpec {
    pub pin: String,
    pub mode: Mode,
    pub behavior: PinBehavior,
}

impl ClaimSpec {
    pub fn input(pin: impl Into<String>, mode: Mode, input: InputSpec) -> Self {
        Self {
            pin: pin.into(),
            mode,
            behavior: PinBehavior::Input(input),
        }
    }

    pub fn output(pin: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            pin: pin.into(),
            mode: Mode::Output,
            behavior: PinBehavior::Output(OutputSpec {
                source: source.into(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClaimSpec {
    pin: String,
    mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input_spec: Option<InputSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_spec: Option<OutputSpec>,
}

impl TryFrom<RawClaimSpec> for ClaimSpec {
    type Error = ConfigError;

    fn try_from(raw: RawClaimSpec) -> Result<Self, Self::Error> {
        let behavior = match (raw.mode.is_input(), raw.input_spec, raw.output_spec) {
            (true, Some(input), _) => PinBehavior::Input(input),
            (false, _, Some(output)) => PinBehavior::Output(output),
            (true, None, _) => {
                return Err(ConfigError::ModeMismatch {
                    mode: raw.mode.to_string(),
                    reason: "inputSpec is required for input modes".to_string(),
                });
            }
            (false, _, None) => {
                return Err(ConfigError::ModeMismatch {
                    mode: raw.mode.to_string(),
                    reason: "outputSpec is required for output modes".to_string(),
                });
            }
        };
        Ok(Self {
            pin: raw.pin,
            mode: raw.mode,
            behavior,
        })
    }
}

impl From<ClaimSpec> for RawClaimSpec {
    fn from(spec: ClaimSpec) -> Self {
        let (input_spec, output_spec) = match spec.behavior {
            PinBehavior::Input(input) => (Some(input), None),
            PinBehavior::Output(output) => (None, Some(output)),
        };
        Self {
            pin: spec.pin,
            mode: spec.mode,
            input_spec,
            output_spec,
        }
    }
}

/// Identity of a claim: the pin it binds and the mode it binds it in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClaimId {
    pub pin: String,
    pub mode: Mode,
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pin, self.mode)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinClaim {
    /// Resource name, if the claim came from a named object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub spec: ClaimSpec,
    #[serde(default)]
    pub status: PinClaimStatus,
}

impl PinClaim {
    pub fn new(spec: ClaimSpec) -> Self {
        Self {
            name: None,
            spec,
            status: PinClaimStatus::default(),
        }
    }

    pub fn id(&self) -> ClaimId {
        ClaimId {
            pin: self.spec.pin.clone(),
            mode: self.spec.mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_band_is_inclusive() {
        let target = PinValue::new(3.3, 0.1);
        assert!(target.contains(3.3));
        assert!(target.contains(3.35));
        assert!(target.contains(3.21));
        assert!(!target.contains(3.0));
        assert!(!target.contains(3.5));
    }

    #[test]
    fn test_band_endpoints_are_both_inside() {
        let target = PinValue::new(3.3, 0.1);
        assert!(target.contains(3.2));
        assert!(target.contains(3.4));
        assert!(!target.contains(3.1999));
        assert!(!target.contains(3.4001));

        let exact = PinValue::new(1.8, 0.0);
        assert!(exact.contains(1.8));
        assert!(!exact.contains(1.8001));

        let around_zero = PinValue::new(0.0, 0.3);
        assert!(around_zero.contains(-0.3));
        assert!(around_zero.contains(0.3));
    }

    #[test]
    fn test_input_claim_deserializes_into_input_behavior() {
        let claim: PinClaim = serde_json::from_value(json!({
            "spec": {
                "pin": "17",
                "mode": "input_low",
                "inputSpec": {
                    "edge": "rising",
                    "triggers": [{
                        "target": {"voltage": 3.3, "tolerance": 0.1},
                        "type": "Digital",
                        "actions": [{"hookUrl": "http://hooks.local/fire", "cooldown": 5}],
                        "continuous": false,
                        "continuousInterval": ""
                    }],
                    "reports": [{"type": "state", "interval": "30s", "onChange": true, "hookURL": "http://hooks.local/report"}]
                },
                "outputSpec": {"source": "high"}
            }
        }))
        .unwrap();

        assert_eq!(claim.id().to_string(), "17/input_low");
        let PinBehavior::Input(input) = &claim.spec.behavior else {
            panic!("expected input behavior");
        };
        assert_eq!(input.edge, Edge::Rising);
        assert_eq!(input.triggers[0].kind, TriggerType::Digital);
        assert_eq!(input.triggers[0].actions[0].cooldown, 5);
        assert!(input.reports[0].on_change);
    }

    #[test]
    fn test_input_mode_without_input_spec_is_rejected() {
        let result: Result<ClaimSpec, _> = serde_json::from_value(json!({
            "pin": "4",
            "mode": "input_high",
            "outputSpec": {"source": "high"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_edge_is_rejected() {
        let result: Result<InputSpec, _> = serde_json::from_value(json!({"edge": "sideways"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_output_claim_serializes_only_output_spec() {
        let spec = ClaimSpec::output("4", "high");
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["outputSpec"]["source"], "high");
        assert!(value.get("inputSpec").is_none());
    }

    #[test]
    fn test_action_target_prefers_hook() {
        let action = Action {
            hook_url: Some("http://hooks.local/a".into()),
            job_template: Some(json!({"spec": {}})),
            cooldown: 0,
        };
        assert!(action.is_ambiguous());
        assert_eq!(
            action.target(),
            Some(ActionTarget::Hook("http://hooks.local/a".into()))
        );

        let job_only = Action {
            hook_url: Some("  ".into()),
            job_template: Some(json!({"spec": {}})),
            cooldown: 0,
        };
        assert!(!job_only.is_ambiguous());
        assert!(matches!(job_only.target(), Some(ActionTarget::Job(_))));

        let empty = Action {
            hook_url: None,
            job_template: Some(json!({})),
            cooldown: 0,
        };
        assert_eq!(empty.target(), None);
    }

    #[test]
    fn test_output_source_resolution() {
        let out = |s: &str| OutputSpec { source: s.into() };
        assert_eq!(out("HIGH").resolve(3.3), Ok(3.3));
        assert_eq!(out("off").resolve(3.3), Ok(0.0));
        assert_eq!(out("1.8").resolve(3.3), Ok(1.8));
        assert!(out("blink").resolve(3.3).is_err());
        assert!(out("-1").resolve(3.3).is_err());
    }

    #[test]
    fn test_trigger_repeat_interval() {
        let mut trigger = Trigger {
            target: PinValue::new(1.0, 0.1),
            kind: TriggerType::Analog,
            actions: vec![],
            continuous: false,
            continuous_interval: "garbage".into(),
        };
        assert_eq!(trigger.repeat_interval(), Ok(None));

        trigger.continuous = true;
        assert!(trigger.repeat_interval().is_err());

        trigger.continuous_interval = "1s".into();
        assert_eq!(trigger.repeat_interval(), Ok(Some(Duration::from_secs(1))));

        trigger.continuous_interval = "0s".into();
        assert!(trigger.repeat_interval().is_err());
    }
}
