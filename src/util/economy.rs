//! The flag/hint economy: submission cooldown, exactly-once-correct
//! scoring, derived balances and hint purchases. Every read-modify-write
//! on a team's durable state happens under that team's store lock.

use std::time::Duration;

use chrono::Utc;
use log::debug;

use crate::models::{HintPurchase, Submission, Task, TaskId};
use crate::store::ContentStore;
use crate::util::api_util::APIError;
use crate::util::cipher_util::flag_matches;

/// Enforces the per-team minimum submission interval and stamps the
/// current time as the team's last submission. The interval is global per
/// team across all tasks. The stamp is written before any flag is
/// evaluated, so wrong and erroring submissions consume the cooldown too.
pub async fn enforce_cooldown(
    store: &ContentStore,
    interval: Duration,
    team: &str,
) -> Result<(), APIError> {
    let lock = store.team_lock(team).await;
    let _guard = lock.lock().await;

    let now = Utc::now();
    let min = chrono::Duration::seconds(interval.as_secs() as i64);
    if let Some(last) = store.last_submission(team).await? {
        let elapsed = now - last;
        if elapsed < min {
            let retry_after = (min - elapsed).num_seconds().max(1);
            debug!("Throttling submission by {team}, retry after {retry_after}s");
            return Err(APIError::TooFrequentSubmissions { retry_after });
        }
    }
    store.set_last_submission(team, now).await
}

/// Evaluates the task's flag checkers in declaration order, stopping at
/// the first match. A `program` checker reached before any match aborts
/// with `NotImplemented` instead of guessing.
pub fn evaluate_flags(task: &Task, submission: &str) -> Result<bool, APIError> {
    for spec in &task.flags {
        if flag_matches(spec, submission)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Appends a submission row. A correct submission that already exists for
/// this (team, task) pair makes any further submission for the pair raise
/// `TaskAlreadySolved` — the guard that prevents double-scoring.
pub async fn add_submission(
    store: &ContentStore,
    team: &str,
    task: TaskId,
    flag: &str,
    correct: bool,
    points: i64,
) -> Result<(), APIError> {
    let lock = store.team_lock(team).await;
    let _guard = lock.lock().await;

    if store.has_correct_submission(team, task).await? {
        return Err(APIError::TaskAlreadySolved);
    }
    store
        .append_submission(&Submission {
            team: team.to_string(),
            task,
            flag: flag.to_string(),
            correct,
            points,
            time: Utc::now(),
        })
        .await
}

/// The team's derived balance: awarded points minus hint spend. The one
/// formula behind both the team's own view and the public scoreboard.
/// When the result gates a purchase the caller holds the team lock.
pub async fn team_points(store: &ContentStore, team: &str) -> Result<i64, APIError> {
    let awarded: i64 = store
        .submissions_for(team)
        .await?
        .iter()
        .map(|s| s.points)
        .sum();
    let spent: i64 = store
        .hint_purchases_for(team)
        .await?
        .iter()
        .map(|p| p.cost)
        .sum();
    Ok(awarded - spent)
}

/// Returns the hint text, charging the team on first access. A hint the
/// team already holds is served again at no cost; the balance check and
/// the purchase row are one critical section, so two concurrent purchases
/// cannot both spend the same points.
pub async fn access_hint(
    store: &ContentStore,
    task: &Task,
    hexid: &str,
    team: &str,
) -> Result<String, APIError> {
    let Some(hint) = task.hint(hexid) else {
        return Err(APIError::HintNotFound);
    };

    let lock = store.team_lock(team).await;
    let _guard = lock.lock().await;

    if store.hint_purchased(team, task.id, hexid).await? {
        return Ok(hint.text.clone());
    }
    if team_points(store, team).await? < hint.cost {
        return Err(APIError::NotEnoughPoints);
    }
    store
        .append_hint_purchase(&HintPurchase {
            team: team.to_string(),
            task: task.id,
            hexid: hexid.to_string(),
            cost: hint.cost,
            time: Utc::now(),
        })
        .await?;
    Ok(hint.text.clone())
}
