use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lms_core::model::{CourseId, DefaultFocusMode, FocusMode, LessonId, StudentId};
use services::{
    AppServices, AppServicesError, ClientConfig, Clock, ConfigError, ProgressError,
    TracingToastSink,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Services(#[from] AppServicesError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error("invalid --db value: {raw}")]
    InvalidDbUrl { raw: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "lms-client", about = "Course progress, lesson focus and notification sync")]
struct Cli {
    #[arg(long, env = "LMS_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Push endpoint; without it notifications are polled.
    #[arg(long, env = "LMS_WS_URL")]
    ws_url: Option<String>,

    #[arg(long, env = "LMS_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    #[arg(long = "db", env = "LMS_DB_URL")]
    db_url: Option<String>,

    #[arg(long, env = "LMS_POLL_INTERVAL_SECS")]
    poll_interval_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync and print one course's progress.
    Progress {
        course_id: CourseId,
        student_id: StudentId,
    },
    /// Mark a lesson complete or incomplete.
    Toggle {
        lesson_id: LessonId,
        #[arg(action = clap::ArgAction::Set)]
        completed: bool,
        /// Act on behalf of a child account.
        #[arg(long)]
        child: Option<StudentId>,
    },
    /// Drop locally cached progress for one course, or all courses.
    Clear { course_id: Option<CourseId> },
    /// Show or change lesson focus settings.
    Focus {
        #[command(subcommand)]
        command: Option<FocusCommand>,
    },
    /// Follow notifications until Ctrl-C.
    Watch,
}

#[derive(Subcommand, Debug)]
enum FocusCommand {
    Show,
    SetMode {
        mode: FocusMode,
    },
    /// Set the learner preference; omit the mode to clear it.
    SetPreference {
        mode: Option<FocusMode>,
    },
    Admin {
        default_mode: DefaultFocusMode,
        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        allow_user_choice: bool,
    },
    Reset,
}

impl Cli {
    fn client_config(&self) -> Result<ClientConfig, CliError> {
        let db_url = self
            .db_url
            .clone()
            .map(normalize_sqlite_url)
            .transpose()?;
        let poll_interval = self.poll_interval_secs.map(|secs| secs.to_string());

        let config = ClientConfig::from_lookup(|name| match name {
            "LMS_API_BASE_URL" => self.api_base_url.clone(),
            "LMS_WS_URL" => self.ws_url.clone(),
            "LMS_API_TOKEN" => self.api_token.clone(),
            "LMS_DB_URL" => db_url.clone(),
            "LMS_POLL_INTERVAL_SECS" => poll_interval.clone(),
            _ => None,
        })?;
        Ok(config)
    }
}

fn normalize_sqlite_url(raw: String) -> Result<String, CliError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CliError::InvalidDbUrl { raw });
    }
    if trimmed == "sqlite::memory:" || trimmed.starts_with("sqlite://") {
        return Ok(trimmed.to_owned());
    }

    let path = Path::new(trimmed.strip_prefix("sqlite:").unwrap_or(trimmed));
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    Ok(format!("sqlite://{}", absolute.display()))
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), CliError> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| CliError::InvalidDbUrl {
            raw: db_url.to_owned(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(CliError::InvalidDbUrl {
            raw: db_url.to_owned(),
        });
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = cli.client_config()?;
    prepare_sqlite_file(&config.db_url)?;
    let app = AppServices::from_config(&config, Clock::System).await?;

    match cli.command {
        Command::Progress {
            course_id,
            student_id,
        } => {
            let progress = app
                .progress()
                .initialize_course_progress(&course_id, &student_id)
                .await?;
            println!(
                "{}: {}/{} lessons ({}%)",
                progress.course_id(),
                progress.completed_lessons(),
                progress.total_lessons(),
                progress.progress_percentage()
            );
            let mut lessons: Vec<_> = progress.lessons().values().collect();
            lessons.sort_by(|a, b| a.lesson_id.cmp(&b.lesson_id));
            for lesson in lessons {
                let mark = if lesson.completed { "x" } else { " " };
                println!("  [{mark}] {}", lesson.lesson_id);
            }
        }
        Command::Toggle {
            lesson_id,
            completed,
            child,
        } => {
            let progress = app
                .progress()
                .update_lesson_completion(&lesson_id, completed, child.as_ref())
                .await?;
            println!(
                "{lesson_id} -> {}; {} now {}% complete",
                if completed { "completed" } else { "not completed" },
                progress.course_id(),
                progress.progress_percentage()
            );
        }
        Command::Clear { course_id } => {
            let store = app.progress();
            match course_id {
                Some(course_id) => store.clear_course_progress(&course_id).await,
                None => store.clear_all_progress().await,
            }
            println!("cached courses: {}", store.course_ids().len());
        }
        Command::Focus { command } => {
            let focus = app.lesson_focus();
            match command.unwrap_or(FocusCommand::Show) {
                FocusCommand::Show => {}
                FocusCommand::SetMode { mode } => focus.set_focus_mode(mode).await,
                FocusCommand::SetPreference { mode } => focus.set_user_preference(mode).await,
                FocusCommand::Admin {
                    default_mode,
                    allow_user_choice,
                } => focus.set_admin_settings(default_mode, allow_user_choice).await,
                FocusCommand::Reset => focus.reset().await,
            }
            let state = focus.snapshot();
            println!("current mode: {}", focus.get_current_mode());
            println!("  focus mode:        {}", state.focus_mode());
            println!(
                "  user preference:   {}",
                state
                    .user_preference()
                    .map_or_else(|| "none".to_owned(), |mode| mode.to_string())
            );
            println!("  admin default:     {}", state.admin_default_mode());
            println!("  user may choose:   {}", focus.can_user_choose());
        }
        Command::Watch => {
            let coordinator = app
                .notification_coordinator(Arc::new(TracingToastSink), None)
                .spawn();
            let mut status = coordinator.subscribe();
            info!(status = %coordinator.status(), "watching notifications; Ctrl-C to stop");
            loop {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        result?;
                        break;
                    }
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = *status.borrow_and_update();
                        info!(status = %current, "connection status changed");
                    }
                }
            }
            coordinator.shutdown().await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_db_paths_become_absolute_urls() {
        let url = normalize_sqlite_url("data/lms.sqlite3".into()).unwrap();
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/lms.sqlite3"));
        assert_eq!(
            normalize_sqlite_url("sqlite::memory:".into()).unwrap(),
            "sqlite::memory:"
        );
        assert!(normalize_sqlite_url("  ".into()).is_err());
    }

    #[test]
    fn cli_flags_feed_client_config() {
        let cli = Cli::parse_from([
            "lms-client",
            "--api-base-url",
            "https://lms.test/api",
            "--db",
            "sqlite::memory:",
            "--poll-interval-secs",
            "12",
            "toggle",
            "lesson-1",
            "true",
            "--child",
            "kid-7",
        ]);
        let config = cli.client_config().unwrap();
        assert_eq!(config.api_base_url, "https://lms.test/api");
        assert_eq!(config.db_url, "sqlite::memory:");
        assert_eq!(config.poll_interval, std::time::Duration::from_secs(12));
        assert!(matches!(
            cli.command,
            Command::Toggle { completed: true, child: Some(_), .. }
        ));
    }

    #[test]
    fn focus_subcommands_parse_modes() {
        let cli = Cli::parse_from([
            "lms-client",
            "focus",
            "admin",
            "classic",
            "--allow-user-choice",
            "false",
        ]);
        assert!(matches!(
            cli.command,
            Command::Focus {
                command: Some(FocusCommand::Admin {
                    default_mode: DefaultFocusMode::Classic,
                    allow_user_choice: false,
                })
            }
        ));
    }
}
