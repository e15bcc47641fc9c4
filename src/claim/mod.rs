//! Pin claims: what an operator declares about a pin, and what the agent
//! reports back.

pub mod duration;
pub mod model;
pub mod status;
pub mod validate;

pub use duration::{parse_duration, parse_optional_duration};
pub use model::{
    Action, ActionTarget, ClaimId, ClaimSpec, Edge, InputSpec, Mode, OutputSpec, PinBehavior,
    PinClaim, PinValue, Report, Trigger, TriggerType,
};
pub use status::{Condition, ConditionStatus, PinClaimStatus};
pub use validate::validate;
