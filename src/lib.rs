pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod events;
pub mod gateway;
pub mod locks;
pub mod logging;
pub mod models;
pub mod state;

pub use commands::{CommandError, CommandResult, TaskCommands};
pub use config::{Config, ConfigError};
pub use events::{StatePayload, StoreEvent};
pub use gateway::{ApiError, Gateway, RemoteError, RestGateway};
pub use models::{
    NewTask, Privacy, SettingsPatch, Task, TaskPatch, TaskStatus, Theme, UserSettings,
    ValidationError,
};
pub use state::{AppState, SubscriptionId};

#[cfg(all(feature = "app", not(test)))]
use std::sync::Arc;

/// Runs one command of the `taskflow` binary. Logging is set up by the caller,
/// which keeps the logger alive until the outcome has been logged.
#[cfg(all(feature = "app", not(test)))]
pub async fn run(
    data_dir: &std::path::Path,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    use cli::CliCommand;

    let command = cli::parse_args(args)?;
    let config = Config::load(data_dir)?;
    let gateway = RestGateway::new(&config)?;
    let commands = TaskCommands::new(Arc::new(gateway), AppState::default());

    commands.load_state().await?;
    let settings = commands.state().settings();
    let tz = calendar::resolve_timezone(&settings.timezone);

    match command {
        CliCommand::Summary => {
            let summary = dashboard::summarize(&commands.state().tasks(), chrono::Utc::now(), tz);
            println!("Hello, {}", settings.name);
            println!(
                "{} tasks: {} todo, {} in progress, {} done",
                summary.total, summary.todo, summary.in_progress, summary.done
            );
            print_section("Due today", &summary.due_today, tz);
            print_section("Overdue", &summary.overdue, tz);
        }
        CliCommand::Day(date) => {
            print_section(&date.format("%A, %B %-d, %Y").to_string(), &commands.state().tasks_on(date), tz);
        }
        CliCommand::Add(title) => {
            let task = commands.create_task(NewTask::new(title)).await?;
            println!("created {}", task.id);
        }
        CliCommand::Done(id) => {
            let task = commands
                .update_task(&id, TaskPatch::default().with_status(TaskStatus::Done))
                .await?;
            println!("{} -> {}", task.id, task.status.as_str());
        }
        CliCommand::Remove(id) => {
            commands.delete_task(&id).await?;
            println!("deleted {id}");
        }
    }
    Ok(())
}

#[cfg(all(feature = "app", not(test)))]
fn print_section(heading: &str, tasks: &[Task], tz: chrono_tz::Tz) {
    println!();
    println!("{heading} ({})", tasks.len());
    for task in tasks {
        let due = task
            .deadline
            .map(|deadline| deadline.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  [{:<11}] {:<16} {}  ({})", task.status.as_str(), due, task.title, task.id);
    }
}
