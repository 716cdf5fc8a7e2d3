use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

use crate::error::Ineligible;
use crate::queue::TaskStatus;

/// Decide whether a task can be attached to.
///
/// The task must have been created with `features.interactive = true` and its
/// last run must be running, or completed less than `grace` ago.
pub fn check_eligibility(
    task: &Value,
    status: &TaskStatus,
    now: DateTime<Utc>,
    grace: Duration,
) -> Result<(), Ineligible> {
    let features = task
        .get("payload")
        .and_then(|payload| payload.get("features"))
        .ok_or(Ineligible::MissingInteractive)?;
    let interactive = features
        .get("interactive")
        .ok_or(Ineligible::MissingInteractive)?;
    if interactive.as_bool() != Some(true) {
        return Err(Ineligible::InteractiveDisabled);
    }

    let run = status.runs.last().ok_or(Ineligible::NoRuns)?;
    let not_connectable = Ineligible::NotConnectable {
        grace_minutes: i64::try_from(grace.as_secs() / 60).unwrap_or(i64::MAX),
    };
    match run.state.as_str() {
        "running" => Ok(()),
        "completed" => {
            let grace = TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX);
            let deadline = run
                .resolved
                .map(|resolved| resolved.checked_add_signed(grace).unwrap_or(DateTime::<Utc>::MAX_UTC));
            match deadline {
                Some(deadline) if deadline > now => Ok(()),
                _ => Err(not_connectable),
            }
        }
        _ => Err(not_connectable),
    }
}
