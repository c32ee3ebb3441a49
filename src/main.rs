//! Pre-generation tool: materializes every (team, task) instance in
//! advance so the first request of the competition never pays generation
//! latency. By default only Absent/Stale instances are generated; pass
//! `--force` to regenerate everything.

use std::env;
use std::process::exit;

use log::{error, info};

use taskhost::generators::GeneratorRegistry;
use taskhost::hierarchy::resolve_task_seed;
use taskhost::util::api_util::APIError;
use taskhost::util::cipher_util::derive_token;
use taskhost::{App, Settings};

fn fail(e: APIError) -> ! {
    error!("Pre-generation aborted: {e}");
    exit(1);
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help") {
        println!("Usage: {} [--force]", args[0]);
        println!("Generates all tasks for all teams in advance");
        println!();
        println!("Options:");
        println!("  --force   Regenerate even if generated tasks are up-to-date");
        exit(1);
    }
    let force = args.iter().any(|a| a == "--force");

    let app = App::new(Settings::from_env(), GeneratorRegistry::with_builtins());

    let teams = app.store.list_teams().await.unwrap_or_else(|e| fail(e));
    let tasks = app.store.list_tasks().await.unwrap_or_else(|e| fail(e));
    let global_seed = app.store.global_seed().await.unwrap_or_else(|e| fail(e));
    info!(
        "Pre-generating {} tasks for {} teams",
        tasks.len(),
        teams.len()
    );

    let mut generated = 0usize;
    let mut failed = 0usize;
    for team in &teams {
        for task in &tasks {
            let token = match resolve_task_seed(&app.store, task).await {
                Ok(task_seed) => derive_token(&team.seed, &task_seed, &global_seed),
                Err(e) => {
                    error!("Cannot resolve seed of task {}: {e}", task.id);
                    failed += 1;
                    continue;
                }
            };
            let result = if force {
                app.engine.generate(task.id, &token).await
            } else {
                app.engine.get_generated_task(task.id, &token).await
            };
            match result {
                Ok(_) => generated += 1,
                Err(e) => {
                    error!(
                        "Generation failed for task {} team {:?}: {e}",
                        task.id, team.name
                    );
                    failed += 1;
                }
            }
        }
    }

    info!("Done: {generated} instances ready, {failed} failures");
    if failed > 0 {
        exit(1);
    }
}
