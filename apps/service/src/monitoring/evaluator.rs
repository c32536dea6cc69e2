use super::types::{Check, CheckState, Evaluation, Outcome};

/// Map a probe outcome and the check's prior state to a new state.
///
/// A check is up only when the probe got a response without a network error
/// and the response code is one of the check's success codes. An alert is
/// wanted only when the state flips on a check that has been evaluated before.
pub fn evaluate(prior: &Check, outcome: &Outcome) -> Evaluation {
    let state = match (&outcome.network_error, outcome.response_code) {
        (None, Some(code)) if prior.success_codes.contains(&code) => CheckState::Up,
        _ => CheckState::Down,
    };

    let should_alert = prior.last_checked.is_some() && state != prior.state;

    Evaluation { state, should_alert }
}
