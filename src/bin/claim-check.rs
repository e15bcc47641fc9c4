//! Validates a claims file without touching hardware.
//!
//! Usage:
//!   claim-check claims.json
//!
//! Prints every configuration problem per claim and exits non-zero if any
//! claim would be refused at start.

use clap::Parser;
use pinclaim_agent::claim::{PinBehavior, PinClaim, Trigger, validate};
use pinclaim_agent::config::{Config, load_dotenv};
use pinclaim_agent::repository::load_claims;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "claim-check")]
#[command(about = "Check pin claims for configuration problems")]
struct Cli {
    /// JSON file holding the claims
    claims: PathBuf,

    /// Voltage a logic-high output resolves to (overrides PINCLAIM_LOGIC_HIGH_VOLTS)
    #[arg(long)]
    logic_high: Option<f64>,
}

fn main() -> ExitCode {
    load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let logic_high = cli
        .logic_high
        .unwrap_or_else(|| Config::from_env().sampling.logic_high_volts);

    let claims = match load_claims(&cli.claims) {
        Ok(claims) => claims,
        Err(e) => {
            eprintln!("{}: {}", cli.claims.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let mut refused = 0;
    let mut pins: HashMap<String, String> = HashMap::new();
    for claim in &claims {
        let id = claim.id();
        let label = match &claim.name {
            Some(name) => format!("{name} ({id})"),
            None => id.to_string(),
        };

        let mut fatal = false;
        let mut lines = Vec::new();
        if let Some(existing) = pins.insert(id.pin.clone(), label.clone()) {
            fatal = true;
            lines.push(format!("error: pin {} is also claimed by {}", id.pin, existing));
        }
        for problem in validate(&claim.spec, logic_high) {
            let level = if problem.is_fatal() { "error" } else { "warning" };
            fatal |= problem.is_fatal();
            lines.push(format!("{level}: {problem}"));
        }
        for (t, trigger) in claim_triggers(claim).iter().enumerate() {
            for (a, action) in trigger.actions.iter().enumerate() {
                if action.is_ambiguous() {
                    lines.push(format!(
                        "warning: trigger {t} action {a}: both hookUrl and jobTemplate set; hookUrl is used"
                    ));
                }
            }
        }

        if lines.is_empty() {
            println!("ok      {label}");
        } else {
            println!("{}  {label}", if fatal { "refused" } else { "ok     " });
            for line in lines {
                println!("          {line}");
            }
        }
        if fatal {
            refused += 1;
        }
    }

    println!("{} claim(s) checked, {} refused", claims.len(), refused);
    if refused > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn claim_triggers(claim: &PinClaim) -> &[Trigger] {
    match &claim.spec.behavior {
        PinBehavior::Input(input) => &input.triggers,
        PinBehavior::Output(_) => &[],
    }
}
