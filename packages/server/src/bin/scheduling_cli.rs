//! Operator CLI for the scheduling core
//!
//! Every command prints one JSON object on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scheduling_core::common::{
    CoreError, ErrorKind, LessonId, PageRequest, Shortfall, TemplateApplicationId, TemplateId,
    UserId,
};
use scheduling_core::domains::{bookings, identity, ledger, templates};
use scheduling_core::kernel::{run_migrations, ServerDeps};
use scheduling_core::Config;

#[derive(Parser)]
#[command(name = "scheduling_cli")]
#[command(about = "Operator CLI for bookings, credits and weekly templates")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,

    /// Show a user's balance
    Balance {
        #[arg(long)]
        user: UserId,
    },

    /// Show a user's ledger history, newest first
    History {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        limit: Option<i64>,
        /// Cursor returned by the previous page
        #[arg(long)]
        after: Option<String>,
    },

    /// Credit a gateway payment (idempotent per payment id)
    Credit {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        payment_id: String,
    },

    /// Manually adjust a balance
    Adjust {
        #[arg(long)]
        user: UserId,
        #[arg(long, allow_hyphen_values = true)]
        delta: i64,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        actor: UserId,
        #[arg(long)]
        allow_negative: bool,
    },

    /// Check a user's ledger against the stored balance
    Audit {
        #[arg(long)]
        user: UserId,
    },

    /// Book a student into a lesson
    Book {
        #[arg(long)]
        student: UserId,
        #[arg(long)]
        lesson: LessonId,
        /// Defaults to the student
        #[arg(long)]
        actor: Option<UserId>,
    },

    /// Cancel a student's booking (refunds what was charged)
    CancelBooking {
        #[arg(long)]
        student: UserId,
        #[arg(long)]
        lesson: LessonId,
        #[arg(long)]
        actor: Option<UserId>,
    },

    /// Re-activate a cancelled booking
    Reactivate {
        #[arg(long)]
        student: UserId,
        #[arg(long)]
        lesson: LessonId,
        #[arg(long)]
        actor: Option<UserId>,
    },

    /// Cancel a lesson, refunding every active booking
    CancelLesson {
        #[arg(long)]
        lesson: LessonId,
        #[arg(long)]
        actor: UserId,
    },

    /// Store a template from a JSON file ({"name": .., "slots": [..]})
    CreateTemplate {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        actor: Option<UserId>,
    },

    /// Apply a template to the week starting on a Monday
    ApplyTemplate {
        #[arg(long)]
        template: TemplateId,
        #[arg(long)]
        week: NaiveDate,
        #[arg(long)]
        actor: UserId,
    },

    /// Show what apply-template would do
    PreviewTemplate {
        #[arg(long)]
        template: TemplateId,
        #[arg(long)]
        week: NaiveDate,
    },

    /// Roll back a template application
    Rollback {
        #[arg(long)]
        application: TemplateApplicationId,
        #[arg(long)]
        actor: UserId,
    },

    /// Lesson, booking and credit totals for a week
    WeekStats {
        #[arg(long)]
        week: NaiveDate,
    },

    /// Template applications recorded for a week
    Applications {
        #[arg(long)]
        week: NaiveDate,
    },

    /// Link an external messaging identity to a user
    Link {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        external_id: String,
        /// JSON object stored with the link
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Remove a user's external identity link
    Unlink {
        #[arg(long)]
        user: UserId,
    },

    /// Find a link by external id or by user
    Lookup {
        #[arg(long, conflicts_with = "user")]
        external_id: Option<String>,
        #[arg(long)]
        user: Option<UserId>,
    },
}

// ============================================================================
// JSON Response Types
// ============================================================================

#[derive(Serialize)]
struct Response<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorResponse>,
}

#[derive(Serialize)]
struct ErrorResponse {
    kind: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    shortfalls: Vec<Shortfall>,
}

fn output<T: Serialize>(resp: &Response<T>) -> Result<()> {
    println!("{}", serde_json::to_string(resp)?);
    Ok(())
}

/// Prints the outcome of a core call; core errors are reported as JSON, not
/// as a process error.
fn report<T: Serialize>(result: Result<T, CoreError>) -> Result<bool> {
    match result {
        Ok(data) => {
            output(&Response {
                success: true,
                data: Some(data),
                error: None,
            })?;
            Ok(true)
        }
        Err(e) => {
            output(&Response::<()> {
                success: false,
                data: None,
                error: Some(ErrorResponse {
                    kind: e.kind(),
                    message: e.to_string(),
                    shortfalls: e.shortfalls().to_vec(),
                }),
            })?;
            Ok(false)
        }
    }
}

#[derive(Serialize)]
struct BalanceResponse {
    user_id: UserId,
    balance: i64,
}

#[derive(Serialize)]
struct UnlinkResponse {
    user_id: UserId,
    removed: bool,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scheduling_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let deps = ServerDeps::connect(config).await?;

    let ok = run(cli.command, &deps).await?;
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn run(command: Commands, deps: &ServerDeps) -> Result<bool> {
    let ctx = deps.op_context();

    match command {
        Commands::Migrate => {
            run_migrations(&deps.db_pool).await?;
            tracing::info!("Migrations complete");
            report(Ok::<_, CoreError>("migrated"))
        }
        Commands::Balance { user } => report(
            ledger::get_balance(user, deps)
                .await
                .map(|balance| BalanceResponse {
                    user_id: user,
                    balance,
                }),
        ),
        Commands::History { user, limit, after } => report(
            ledger::get_history(user, PageRequest { limit, after }, deps).await,
        ),
        Commands::Credit {
            user,
            amount,
            payment_id,
        } => report(ledger::credit_purchase(&ctx, user, amount, &payment_id, deps).await),
        Commands::Adjust {
            user,
            delta,
            reason,
            actor,
            allow_negative,
        } => report(
            ledger::admin_adjust(&ctx, user, delta, &reason, actor, allow_negative, deps).await,
        ),
        Commands::Audit { user } => report(ledger::audit_user(user, deps).await),
        Commands::Book {
            student,
            lesson,
            actor,
        } => report(
            bookings::create_booking(&ctx, student, lesson, actor.unwrap_or(student), deps).await,
        ),
        Commands::CancelBooking {
            student,
            lesson,
            actor,
        } => report(
            bookings::cancel_booking(&ctx, student, lesson, actor.unwrap_or(student), deps).await,
        ),
        Commands::Reactivate {
            student,
            lesson,
            actor,
        } => report(
            bookings::reactivate_booking(&ctx, student, lesson, actor.unwrap_or(student), deps)
                .await,
        ),
        Commands::CancelLesson { lesson, actor } => {
            report(bookings::cancel_lesson(&ctx, lesson, actor, deps).await)
        }
        Commands::CreateTemplate { file, actor } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let template: templates::NewTemplate =
                serde_json::from_str(&raw).context("Template file is not valid JSON")?;
            report(templates::LessonTemplate::save(template, actor, &deps.db_pool).await)
        }
        Commands::ApplyTemplate {
            template,
            week,
            actor,
        } => report(templates::apply_template(&ctx, template, week, actor, deps).await),
        Commands::PreviewTemplate { template, week } => {
            report(templates::preview_apply(template, week, deps).await)
        }
        Commands::Rollback { application, actor } => {
            report(templates::rollback_application(&ctx, application, actor, deps).await)
        }
        Commands::WeekStats { week } => report(templates::get_week_stats(week, deps).await),
        Commands::Applications { week } => {
            report(templates::list_applications_for_week(week, deps).await)
        }
        Commands::Link {
            user,
            external_id,
            metadata,
        } => {
            let metadata = match metadata {
                Some(raw) => serde_json::from_str(&raw).context("--metadata is not valid JSON")?,
                None => serde_json::json!({}),
            };
            report(identity::link_atomic(&ctx, user, &external_id, metadata, deps).await)
        }
        Commands::Unlink { user } => report(
            identity::unlink(&ctx, user, deps)
                .await
                .map(|removed| UnlinkResponse {
                    user_id: user,
                    removed,
                }),
        ),
        Commands::Lookup { external_id, user } => match (external_id, user) {
            (Some(external_id), _) => {
                report(identity::find_by_external_id(&external_id, deps).await)
            }
            (None, Some(user)) => report(identity::find_by_user(user, deps).await),
            (None, None) => anyhow::bail!("lookup needs --external-id or --user"),
        },
    }
}
