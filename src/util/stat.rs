use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::ContentStore;
use crate::util::api_util::APIError;
use crate::util::economy::team_points;

#[derive(Debug, Clone, Serialize)]
pub struct ScoreboardEntry {
    pub team: String,
    pub points: i64,
    pub solves: usize,
}

/// A timestamped standings snapshot. Points come from the same derivation
/// the economy uses, so the public board and a team's own view agree.
#[derive(Debug, Clone, Serialize)]
pub struct Scoreboard {
    pub entries: Vec<ScoreboardEntry>,
    pub time: DateTime<Utc>,
}

pub async fn fetch_scoreboard(store: &ContentStore) -> Result<Scoreboard, APIError> {
    let mut entries = Vec::new();
    for team in store.list_teams().await? {
        let (points, solves) = fetch_team_score(store, &team.name).await?;
        entries.push(ScoreboardEntry {
            team: team.name,
            points,
            solves,
        });
    }
    entries.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.team.cmp(&b.team)));
    Ok(Scoreboard {
        entries,
        time: Utc::now(),
    })
}

pub async fn fetch_team_score(
    store: &ContentStore,
    team: &str,
) -> Result<(i64, usize), APIError> {
    let points = team_points(store, team).await?;
    let solves = store
        .submissions_for(team)
        .await?
        .iter()
        .filter(|s| s.correct)
        .count();
    Ok((points, solves))
}
