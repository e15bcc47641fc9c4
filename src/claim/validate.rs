//! Static checks over a claim spec.

use super::model::{ClaimSpec, PinBehavior};
use crate::error::ConfigError;

impl ConfigError {
    /// Whether the problem stops the whole monitor rather than one trigger.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ConfigError::InvalidContinuousInterval { .. })
    }
}

/// Every configuration problem in `spec`, in declaration order.
///
/// `logic_high` is needed to resolve output sources.
pub fn validate(spec: &ClaimSpec, logic_high: f64) -> Vec<ConfigError> {
    let mut problems = Vec::new();

    match &spec.behavior {
        PinBehavior::Input(input) => {
            if !spec.mode.is_input() {
                problems.push(ConfigError::ModeMismatch {
                    mode: spec.mode.to_string(),
                    reason: "input behavior on an output mode".to_string(),
                });
            }
            for (t, trigger) in input.triggers.iter().enumerate() {
                if trigger.target.tolerance < 0.0 || trigger.target.tolerance.is_nan() {
                    problems.push(ConfigError::NegativeTolerance {
                        trigger: t,
                        tolerance: trigger.target.tolerance,
                    });
                }
                if let Err(reason) = trigger.repeat_interval() {
                    problems.push(ConfigError::InvalidContinuousInterval {
                        trigger: t,
                        value: trigger.continuous_interval.clone(),
                        reason,
                    });
                }
                for (a, action) in trigger.actions.iter().enumerate() {
                    if action.target().is_none() {
                        problems.push(ConfigError::ActionWithoutDelivery {
                            trigger: t,
                            action: a,
                        });
                    }
                }
            }
            for (r, report) in input.reports.iter().enumerate() {
                if let Err(reason) = report.period() {
                    problems.push(ConfigError::InvalidReportInterval {
                        report: r,
                        value: report.interval.clone(),
                        reason,
                    });
                }
                if report.emits() && report.hook_url.trim().is_empty() {
                    problems.push(ConfigError::ReportWithoutHook { report: r });
                }
            }
        }
        PinBehavior::Output(output) => {
            if spec.mode.is_input() {
                problems.push(ConfigError::ModeMismatch {
                    mode: spec.mode.to_string(),
                    reason: "output behavior on an input mode".to_string(),
                });
            }
            if let Err(e) = output.resolve(logic_high) {
                problems.push(e);
            }
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::model::{
        Action, Edge, InputSpec, Mode, PinValue, Report, Trigger, TriggerType,
    };

    fn hook_action() -> Action {
        Action {
            hook_url: Some("http://hooks.local/a".into()),
            job_template: None,
            cooldown: 0,
        }
    }

    fn trigger(tolerance: f64, continuous: bool, interval: &str, actions: Vec<Action>) -> Trigger {
        Trigger {
            target: PinValue::new(3.3, tolerance),
            kind: TriggerType::Analog,
            actions,
            continuous,
            continuous_interval: interval.into(),
        }
    }

    #[test]
    fn test_valid_input_claim_has_no_problems() {
        let spec = ClaimSpec::input(
            "17",
            Mode::InputLow,
            InputSpec {
                edge: Edge::Both,
                triggers: vec![trigger(0.1, true, "1s", vec![hook_action()])],
                reports: vec![Report {
                    kind: "state".into(),
                    interval: "".into(),
                    on_change: false,
                    hook_url: "".into(),
                }],
            },
        );
        assert!(validate(&spec, 3.3).is_empty());
    }

    #[test]
    fn test_collects_every_problem() {
        let spec = ClaimSpec::input(
            "17",
            Mode::InputHigh,
            InputSpec {
                edge: Edge::Rising,
                triggers: vec![
                    trigger(-0.5, false, "", vec![hook_action()]),
                    trigger(
                        0.1,
                        true,
                        "often",
                        vec![Action {
                            hook_url: None,
                            job_template: None,
                            cooldown: 3,
                        }],
                    ),
                ],
                reports: vec![Report {
                    kind: "state".into(),
                    interval: "10x".into(),
                    on_change: true,
                    hook_url: "".into(),
                }],
            },
        );

        let problems = validate(&spec, 3.3);
        assert_eq!(problems.len(), 5);
        assert!(matches!(
            problems[0],
            ConfigError::NegativeTolerance { trigger: 0, .. }
        ));
        assert!(matches!(
            problems[1],
            ConfigError::InvalidContinuousInterval { trigger: 1, .. }
        ));
        assert!(!problems[1].is_fatal());
        assert!(matches!(
            problems[2],
            ConfigError::ActionWithoutDelivery {
                trigger: 1,
                action: 0
            }
        ));
        assert!(matches!(
            problems[3],
            ConfigError::InvalidReportInterval { report: 0, .. }
        ));
        assert_eq!(problems[4], ConfigError::ReportWithoutHook { report: 0 });
    }

    #[test]
    fn test_output_source_checked() {
        assert!(validate(&ClaimSpec::output("4", "high"), 3.3).is_empty());
        let problems = validate(&ClaimSpec::output("4", "blink"), 3.3);
        assert!(matches!(
            problems[..],
            [ConfigError::InvalidOutputSource { .. }]
        ));
    }
}
