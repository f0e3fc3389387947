//! Timing repair after an invocation, shared by both run policies.
//!
//! Nothing here touches the clock or the sink; callers pass `now` in and act on
//! the returned [`Repair`].

use super::EarlyFailure;
use crate::error::FatalError;
use crate::timing::TimingInfo;

/// Check the timing a successful invocation left behind.
///
/// A missing respond time is taken from the last respond time when one was
/// reported. Anything else missing or inverted is a bug in the operation.
pub fn validate_completion(timing: &mut TimingInfo, operation: &str) -> Result<(), FatalError> {
    let Some(invoke) = timing.invoke_time() else {
        return Err(FatalError::new(format!(
            "operation {} returned without an invoke time, manually timed operations must call record_time",
            operation
        )));
    };
    let respond = match timing.respond_time() {
        Some(respond) => respond,
        None => match timing.last_respond_time() {
            Some(last) => {
                timing.set_respond_time(last);
                last
            }
            None => {
                return Err(FatalError::new(format!(
                    "operation {} returned without a respond time",
                    operation
                )))
            }
        },
    };
    if respond < invoke {
        return Err(FatalError::new(format!(
            "operation {} responded at {} before its invoke time {}",
            operation, respond, invoke
        )));
    }
    Ok(())
}

/// What the thread loop does with a failed, non-fatal invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repair {
    /// Drop the iteration entirely: no phase accounting, no sink calls.
    pub skip: bool,
    /// The scheduling delay of this iteration can be recorded.
    pub delay_valid: bool,
    /// A last respond time was promoted to the respond time.
    pub open_request: bool,
}

/// Make the timing of a failed invocation consistent.
///
/// `previous` holds the start and end of the slot's previous invocation, used
/// by policies that reuse them when the failure happened before the intended
/// invoke time.
pub fn repair_failed(
    timing: &mut TimingInfo,
    now_ns: i64,
    rule: EarlyFailure,
    previous: (i64, i64),
) -> Repair {
    let mut repair = Repair {
        skip: false,
        delay_valid: true,
        open_request: false,
    };

    if !timing.has_respond_time() {
        if let Some(last) = timing.last_respond_time() {
            timing.set_respond_time(last);
            repair.open_request = true;
        }
    }

    match timing.invoke_time() {
        None => {
            repair.delay_valid = false;
            let early = timing
                .intended_invoke_time()
                .is_some_and(|intended| now_ns < intended);
            match (early, rule) {
                (true, EarlyFailure::Skip) => repair.skip = true,
                (true, EarlyFailure::ReusePrevious) => {
                    timing.set_invoke_time(previous.0);
                    timing.set_respond_time(previous.1);
                }
                (false, _) => {
                    timing.set_invoke_time(now_ns);
                    timing.set_respond_time(now_ns);
                }
            }
        }
        Some(_) if !timing.has_respond_time() => timing.set_respond_time(now_ns),
        Some(_) => {}
    }

    if let (Some(invoke), Some(respond)) = (timing.invoke_time(), timing.respond_time()) {
        if respond < invoke {
            timing.set_respond_time(invoke);
        }
    }
    repair
}
