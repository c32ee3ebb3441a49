//! Public standings and a team's own score, both served from the cached
//! scoreboard derivation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::Team;
use crate::util::api_util::APIError;
use crate::util::stat::{fetch_team_score, ScoreboardEntry};
use crate::App;

#[derive(Debug, Serialize)]
pub struct ScoreboardResponse {
    pub entries: Vec<ScoreboardEntry>,
    pub time: DateTime<Utc>,
}

pub async fn scoreboard(app: &App) -> Result<ScoreboardResponse, APIError> {
    let snapshot = app.cache.scoreboard().await?;
    Ok(ScoreboardResponse {
        entries: snapshot.entries.clone(),
        time: snapshot.time,
    })
}

#[derive(Debug, Serialize)]
pub struct TeamScoreResponse {
    pub team: String,
    pub points: i64,
    pub solves: usize,
    pub time: DateTime<Utc>,
}

pub async fn team_score(app: &App, team: &Team) -> Result<TeamScoreResponse, APIError> {
    let (points, solves) = fetch_team_score(&app.store, &team.name).await?;
    Ok(TeamScoreResponse {
        team: team.name.clone(),
        points,
        solves,
        time: Utc::now(),
    })
}
