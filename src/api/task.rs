//! Player-facing operations: viewing a task, submitting a flag, buying a
//! hint. Transport-independent — a web layer maps these to routes and is
//! responsible for authenticating the `Team` it passes in.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::hierarchy;
use crate::models::{Task, TaskId, Team};
use crate::util::api_util::{APIError, APIRequest};
use crate::util::cipher_util::{derive_token, is_hint_hexid};
use crate::util::economy;
use crate::App;

const FLAG_LENGTH_LIMIT_BYTES: usize = 256;

/// Resolves the team's generation token for a task and serves the cached
/// or freshly generated instance.
pub async fn generated_for_team(
    app: &App,
    team: &Team,
    task_id: TaskId,
) -> Result<Task, APIError> {
    let raw = app.cache.get_task(task_id).await?;
    let task_seed = hierarchy::resolve_task_seed(&app.store, &raw).await?;
    let global_seed = app.store.global_seed().await?;
    let token = derive_token(&team.seed, &task_seed, &global_seed);
    app.engine.get_generated_task(task_id, &token).await
}

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    pub task_id: TaskId,
}

impl APIRequest for TaskQuery {
    fn ok(&self) -> bool {
        self.task_id > 0
    }
}

#[derive(Debug, Serialize)]
pub struct HintView {
    pub hexid: String,
    pub cost: i64,
    /// Present only once the team has purchased the hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// The public projection of a generated task: flag checkers stripped,
/// hint texts withheld until purchased.
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub id: TaskId,
    pub title: String,
    pub text: String,
    pub value: i64,
    pub labels: Vec<String>,
    pub group: i32,
    pub order: i32,
    pub hints: Vec<HintView>,
}

impl TaskView {
    fn strip(task: Task, purchased: &HashSet<String>) -> Self {
        Self {
            id: task.id,
            title: task.title,
            text: task.text,
            value: task.value,
            labels: task.labels.into_iter().collect(),
            group: task.group,
            order: task.order,
            hints: task
                .hints
                .into_iter()
                .map(|h| HintView {
                    text: purchased.contains(&h.hexid).then_some(h.text),
                    hexid: h.hexid,
                    cost: h.cost,
                })
                .collect(),
        }
    }
}

pub async fn get_task(app: &App, team: &Team, query: &TaskQuery) -> Result<TaskView, APIError> {
    query.sanity()?;
    let generated = generated_for_team(app, team, query.task_id).await?;
    let purchased: HashSet<String> = app
        .store
        .hint_purchases_for(&team.name)
        .await?
        .into_iter()
        .filter(|p| p.task == generated.id)
        .map(|p| p.hexid)
        .collect();
    Ok(TaskView::strip(generated, &purchased))
}

#[derive(Debug, Deserialize)]
pub struct SubmitFlagRequest {
    pub task_id: TaskId,
    pub flag: String,
}

impl APIRequest for SubmitFlagRequest {
    fn ok(&self) -> bool {
        self.task_id > 0 && !self.flag.is_empty() && self.flag.len() <= FLAG_LENGTH_LIMIT_BYTES
    }
}

#[derive(Debug, Serialize)]
pub enum SubmitFlagResponse {
    Correct { task_id: TaskId, points: i64 },
    Wrong { task_id: TaskId },
}

/// Submits a flag. The cooldown is consumed before the flag is looked at;
/// the first correct submission scores, any later submission for a solved
/// task raises `TaskAlreadySolved`.
pub async fn submit_flag(
    app: &App,
    team: &Team,
    request: &SubmitFlagRequest,
) -> Result<SubmitFlagResponse, APIError> {
    request.sanity()?;
    if !app.store.task_exists(request.task_id).await {
        return Err(APIError::TaskNotFound);
    }

    economy::enforce_cooldown(
        &app.store,
        app.settings.min_submission_interval,
        &team.name,
    )
    .await?;

    let generated = generated_for_team(app, team, request.task_id).await?;
    let correct = economy::evaluate_flags(&generated, &request.flag)?;
    let points = if correct { generated.value } else { 0 };

    economy::add_submission(
        &app.store,
        &team.name,
        request.task_id,
        &request.flag,
        correct,
        points,
    )
    .await?;
    app.cache.invalidate_scoreboard().await;

    Ok(if correct {
        SubmitFlagResponse::Correct {
            task_id: request.task_id,
            points,
        }
    } else {
        SubmitFlagResponse::Wrong {
            task_id: request.task_id,
        }
    })
}

#[derive(Debug, Deserialize)]
pub struct AccessHintRequest {
    pub task_id: TaskId,
    pub hexid: String,
}

impl APIRequest for AccessHintRequest {
    fn ok(&self) -> bool {
        self.task_id > 0 && is_hint_hexid(&self.hexid)
    }
}

#[derive(Debug, Serialize)]
pub struct AccessHintResponse {
    pub text: String,
    pub new_balance: i64,
}

pub async fn access_hint(
    app: &App,
    team: &Team,
    request: &AccessHintRequest,
) -> Result<AccessHintResponse, APIError> {
    request.sanity()?;
    let generated = generated_for_team(app, team, request.task_id).await?;
    let text = economy::access_hint(&app.store, &generated, &request.hexid, &team.name).await?;
    app.cache.invalidate_scoreboard().await;
    let new_balance = economy::team_points(&app.store, &team.name).await?;
    Ok(AccessHintResponse { text, new_balance })
}
