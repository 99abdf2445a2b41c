//! # Excerpt Courier CLI (`courier`)
//!
//! The `courier` binary is the primary interface for Excerpt Courier. It
//! provides commands for database initialization, library inspection,
//! document selection, on-demand delivery, schedule management, and running
//! the long-lived service (HTTP API + delivery scheduler).
//!
//! ## Usage
//!
//! ```bash
//! courier --config ./config/courier.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `courier init` | Create the SQLite database and run schema migrations |
//! | `courier library` | List library files and their processing state |
//! | `courier select <user> <name>` | Select a document for a user (processes it once) |
//! | `courier next <user>` | Deliver the next excerpt to a user now |
//! | `courier schedule set <user> ...` | Set a recurring delivery schedule |
//! | `courier schedule show <user>` | Show a user's schedule |
//! | `courier schedule pause <user>` | Pause automatic deliveries |
//! | `courier schedule resume <user>` | Resume automatic deliveries |
//! | `courier serve` | Run the HTTP API and the delivery scheduler |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! courier init --config ./config/courier.toml
//!
//! # See what is available
//! courier library
//!
//! # Start reading: select a document and get the first excerpt
//! courier select 42 "Walden"
//! courier next 42
//!
//! # Daily excerpt at 08:00 Berlin time
//! courier schedule set 42 --at 08:00 --frequency daily --timezone Europe/Berlin
//!
//! # Run the service
//! courier serve
//! ```

use std::sync::Arc;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use excerpt_courier::app::App;
use excerpt_courier::config;
use excerpt_courier::deliver::Delivered;
use excerpt_courier::migrate;
use excerpt_courier::server;

/// Excerpt Courier — delivers bite-sized reading excerpts from PDF/EPUB
/// documents over a messaging channel, on demand or on a personal schedule.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/courier.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "courier",
    about = "Excerpt Courier — scheduled reading excerpts over a messaging channel",
    version,
    long_about = "Excerpt Courier turns PDF and EPUB documents into ordered, bite-sized \
    excerpts and delivers them to users over a messaging channel, either on demand or on a \
    recurring per-user schedule with full timezone support."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/courier.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// excerpts, users, user_progress, schedules). Idempotent — running it
    /// multiple times is safe.
    Init,

    /// List library files and their processing state.
    Library,

    /// Select a document for a user.
    ///
    /// Processes the document if its content has not been seen before
    /// (identical bytes under any filename reuse the cached result) and
    /// resets the user's position to the beginning.
    Select {
        /// The user's chat id.
        user: i64,
        /// Document display name (filename without extension) or filename.
        name: String,
    },

    /// Deliver the next excerpt to a user now.
    ///
    /// Bypasses the schedule's due-time check but shares the same delivery
    /// path, so an on-demand send suppresses a redundant automatic delivery
    /// in the same window.
    Next {
        /// The user's chat id.
        user: i64,
    },

    /// Manage a user's delivery schedule.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Run the long-lived service: HTTP command API plus the delivery
    /// scheduler poll loop.
    Serve,
}

/// Schedule management subcommands.
#[derive(Subcommand)]
enum ScheduleAction {
    /// Set or replace the user's schedule. Also reactivates a paused one.
    Set {
        /// The user's chat id.
        user: i64,
        /// Local delivery time, HH:MM.
        #[arg(long)]
        at: String,
        /// Delivery frequency: daily, twice_daily, or weekly.
        #[arg(long, default_value = "daily")]
        frequency: String,
        /// IANA timezone name, e.g. Europe/Berlin.
        #[arg(long, default_value = "UTC")]
        timezone: String,
    },
    /// Show the user's schedule.
    Show {
        /// The user's chat id.
        user: i64,
    },
    /// Pause automatic deliveries (on-demand `next` keeps working).
    Pause {
        /// The user's chat id.
        user: i64,
    },
    /// Resume automatic deliveries.
    Resume {
        /// The user's chat id.
        user: i64,
    },
}

fn print_delivered(outcome: Delivered) {
    match outcome {
        Delivered::Excerpt {
            position,
            total,
            completed,
        } => {
            if completed {
                println!("delivered excerpt {position}/{total} — document completed");
            } else {
                println!("delivered excerpt {position}/{total}");
            }
        }
        Delivered::NoFurtherContent => println!("no further content"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("excerpt_courier=info")),
        )
        .init();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Library => {
            let app = App::connect(cfg).await?;
            let entries = app.list_library().await?;
            if entries.is_empty() {
                println!("library is empty");
            }
            for entry in entries {
                let state = match (entry.state, entry.excerpt_count) {
                    (Some(state), Some(count)) => format!("{state}, {count} excerpts"),
                    (Some(state), None) => state.to_string(),
                    (None, _) => "unprocessed".to_string(),
                };
                println!(
                    "{}  [{}] {}  ({})",
                    entry.display_name, entry.format, entry.size, state
                );
            }
        }
        Commands::Select { user, name } => {
            let app = App::connect(cfg).await?;
            let selected = app.select(user, &name).await?;
            println!(
                "selected '{}' for user {} ({} excerpts)",
                selected.display_name, user, selected.excerpt_count
            );
        }
        Commands::Next { user } => {
            let app = App::connect(cfg).await?;
            print_delivered(app.deliver_now(user).await?);
        }
        Commands::Schedule { action } => {
            let app = App::connect(cfg).await?;
            match action {
                ScheduleAction::Set {
                    user,
                    at,
                    frequency,
                    timezone,
                } => {
                    let schedule = app.set_schedule(user, &at, &frequency, &timezone).await?;
                    println!(
                        "schedule set for user {user}: {} {} ({})",
                        schedule.time_of_day,
                        schedule.frequency.as_str(),
                        schedule.timezone
                    );
                }
                ScheduleAction::Show { user } => match app.get_schedule(user).await? {
                    Some(s) => {
                        let status = if s.active { "active" } else { "paused" };
                        println!(
                            "user {user}: {} {} ({}) — {status}",
                            s.time_of_day,
                            s.frequency.as_str(),
                            s.timezone
                        );
                        if let Some(last) = s.last_delivery_at {
                            if let Some(dt) = chrono::DateTime::from_timestamp(last, 0) {
                                println!("last delivery: {}", dt.format("%Y-%m-%d %H:%M UTC"));
                            }
                        }
                    }
                    None => println!("no schedule set for user {user}"),
                },
                ScheduleAction::Pause { user } => {
                    app.pause_schedule(user).await?;
                    println!("paused deliveries for user {user}");
                }
                ScheduleAction::Resume { user } => {
                    app.resume_schedule(user).await?;
                    println!("resumed deliveries for user {user}");
                }
            }
        }
        Commands::Serve => {
            migrate::run_migrations(&cfg).await?;
            let app = Arc::new(App::connect(cfg).await?);
            let scheduler = app.scheduler();
            let scheduler_task = tokio::spawn(scheduler.run());

            tokio::select! {
                result = server::run_server(app) => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                }
            }
            scheduler_task.abort();
        }
    }

    Ok(())
}
