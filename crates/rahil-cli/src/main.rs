//! Rahil - command-line client for the Rahil attendance service.
//!
//! Log in once, then check in and out, submit requests and browse history.
//! The session survives restarts and expired access tokens are renewed
//! automatically.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rahil_core::models::{HistoryEntry, HistoryKind, ProfileUpdate, RequestKind, UserProfile};
use rahil_core::{AttendanceService, Config, Coordinates, NewAccount, SessionManager};

// ============================================================================
// Constants
// ============================================================================

const ENV_EMAIL: &str = "RAHIL_EMAIL";
const ENV_PASSWORD: &str = "RAHIL_PASSWORD";

// ============================================================================
// Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "rahil")]
#[command(author, version, about = "Command-line client for the Rahil attendance service")]
#[command(after_help = "Environment: RAHIL_BASE_URL, RAHIL_EMAIL, RAHIL_PASSWORD, RUST_LOG")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and register this device
    Login {
        /// Account email; defaults to RAHIL_EMAIL or the last one used
        email: Option<String>,
    },
    /// Create an account and log in
    Signup {
        email: String,
        name: String,
        position: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the local session state
    Status,
    /// Fetch and show your profile
    Profile,
    /// Renew the access token now
    Refresh,
    /// Register this installation again
    RegisterDevice,
    /// Record a check-in
    CheckIn {
        #[arg(allow_negative_numbers = true, value_parser = latitude)]
        lat: f64,
        #[arg(allow_negative_numbers = true, value_parser = longitude)]
        lng: f64,
    },
    /// Record a check-out
    CheckOut {
        #[arg(allow_negative_numbers = true, value_parser = latitude)]
        lat: f64,
        #[arg(allow_negative_numbers = true, value_parser = longitude)]
        lng: f64,
    },
    /// Submit a leave, overtime, holiday work or promotion request
    Request {
        /// leave, overtime, holiday-work or promotion
        #[arg(value_parser = request_kind)]
        kind: RequestKind,
        /// Day the request is for (YYYY-MM-DD)
        #[arg(value_parser = request_date)]
        date: DateTime<Utc>,
        #[arg(required = true)]
        reason: Vec<String>,
    },
    /// List your requests
    Requests,
    /// Show attendance and requests, newest first
    History,
    /// Change a profile field
    UpdateProfile {
        #[command(subcommand)]
        field: ProfileField,
    },
    /// Upload a profile image
    UploadImage { path: PathBuf },
}

#[derive(Subcommand)]
enum ProfileField {
    Name { value: String },
    Position { value: String },
    Email { value: String },
    /// Read the new password from a prompt; logs out afterwards
    Password,
}

/// Initialize the tracing subscriber for logging.
///
/// Console output goes to stderr, filtered by RUST_LOG (default warn).
/// The same events are written to a daily log file in the data directory.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let appender = Config::data_dir().ok().and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("rahil")
            .filename_suffix("log")
            .build(dir.join("logs"))
            .ok()
    });
    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let _guard = init_tracing();

    if let Err(e) = run(cli).await {
        debug!(error = ?e, "Command failed");
        match e.downcast_ref::<rahil_core::Error>() {
            Some(err) => eprintln!("Error: {}", err.user_message()),
            None => eprintln!("Error: {:#}", e),
        }
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

// ============================================================================
// Wiring
// ============================================================================

struct App {
    config: Config,
    session: SessionManager,
    attendance: AttendanceService,
}

impl App {
    fn new() -> Result<Self> {
        let mut config = Config::load()?;
        if config.ensure_installation_id() {
            config.save().context("Failed to save installation id")?;
        }
        config.apply_env();

        let device = config.device_identity();
        let store = config.credential_store()?;
        let api = config.api_client()?;
        info!(base_url = api.base_url(), backend = ?config.credential_backend, "Client ready");

        let session = SessionManager::new(api, store, device);
        let attendance = AttendanceService::new(session.clone());
        Ok(Self {
            config,
            session,
            attendance,
        })
    }

    /// Persist the last used email without the environment overrides
    fn remember_email(&self, email: &str) -> Result<()> {
        let mut stored = Config::load()?;
        stored.last_email = Some(email.to_string());
        stored.save()
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run(cli: Cli) -> Result<()> {
    let app = App::new()?;
    match cli.command {
        Commands::Login { email } => login(&app, email).await,
        Commands::Signup {
            email,
            name,
            position,
        } => signup(&app, &email, &name, &position).await,
        Commands::Logout => {
            app.session.logout().await?;
            println!("Logged out");
            Ok(())
        }
        Commands::Status => status(&app).await,
        Commands::Profile => {
            let user = app.session.fetch_profile().await?;
            print_profile(&user);
            Ok(())
        }
        Commands::Refresh => {
            app.session.refresh_tokens().await?;
            println!("Session renewed");
            Ok(())
        }
        Commands::RegisterDevice => {
            let device_id = app.session.register_device().await?;
            println!("Device registered (id {})", device_id);
            Ok(())
        }
        Commands::CheckIn { lat, lng } => {
            app.attendance.check_in(Coordinates::new(lat, lng)?).await?;
            println!("Checked in");
            Ok(())
        }
        Commands::CheckOut { lat, lng } => {
            app.attendance.check_out(Coordinates::new(lat, lng)?).await?;
            println!("Checked out");
            Ok(())
        }
        Commands::Request { kind, date, reason } => {
            let created = app
                .attendance
                .create_request(kind, &reason.join(" "), date)
                .await?;
            println!("Request #{} submitted ({})", created.id, created.status);
            Ok(())
        }
        Commands::Requests => list_requests(&app).await,
        Commands::History => history(&app).await,
        Commands::UpdateProfile { field } => update_profile(&app, field).await,
        Commands::UploadImage { path } => upload_image(&app, &path).await,
    }
}

async fn login(app: &App, email: Option<String>) -> Result<()> {
    let email = match email
        .or_else(|| std::env::var(ENV_EMAIL).ok())
        .or_else(|| app.config.last_email.clone())
    {
        Some(email) => email,
        None => prompt_line("Email: ")?,
    };
    let password = read_password("Password: ")?;

    app.session.login(&email, &password).await?;
    if let Err(e) = app.remember_email(&email.trim().to_lowercase()) {
        debug!(error = %e, "Could not save last email");
    }

    match app.session.user().await {
        Some(user) => println!("Logged in as {}", user.display_name()),
        None => println!("Logged in"),
    }
    Ok(())
}

async fn signup(app: &App, email: &str, name: &str, position: &str) -> Result<()> {
    let password = read_password("Choose a password: ")?;
    let account = NewAccount {
        email: email.to_string(),
        password,
        name: name.to_string(),
        position: position.to_string(),
    };

    app.session.signup(&account).await?;
    println!("Account created, logged in as {}", account.email.trim().to_lowercase());
    Ok(())
}

async fn status(app: &App) -> Result<()> {
    let session = app.session.snapshot().await;
    if !session.is_logged_in() {
        println!("Not logged in");
        return Ok(());
    }

    match &session.user {
        Some(user) => print_profile(user),
        None => println!("Logged in (profile not cached)"),
    }
    match session.device_id {
        Some(id) => println!("Device:    {}", id),
        None => println!("Device:    not registered"),
    }
    println!("Server:    {}", app.session.api().base_url());
    Ok(())
}

async fn list_requests(app: &App) -> Result<()> {
    let requests = app.attendance.fetch_requests().await?;
    if requests.is_empty() {
        println!("No requests");
    }
    for request in requests {
        println!(
            "#{:<5} {}  {:<13} {:<10} {}",
            request.id,
            request.date.format("%Y-%m-%d"),
            request.kind,
            request.status,
            request.reason
        );
    }
    Ok(())
}

async fn history(app: &App) -> Result<()> {
    let entries = app.attendance.fetch_history().await?;
    if entries.is_empty() {
        println!("No history yet");
    }
    for entry in &entries {
        println!("{}", format_history_entry(entry));
    }
    Ok(())
}

async fn update_profile(app: &App, field: ProfileField) -> Result<()> {
    let mut update = ProfileUpdate::default();
    match field {
        ProfileField::Name { value } => update.name = Some(value),
        ProfileField::Position { value } => update.position = Some(value),
        ProfileField::Email { value } => update.email = Some(value.trim().to_lowercase()),
        ProfileField::Password => update.password = Some(read_password("New password: ")?),
    }

    app.session.update_profile(&update).await?;
    if update.changes_password() {
        println!("Password changed. Please log in again.");
    } else {
        println!("Profile updated");
    }
    Ok(())
}

async fn upload_image(app: &App, path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid file name: {}", path.display()))?;

    let url = app.session.upload_profile_image(filename, bytes).await?;
    println!("Image uploaded: {}", url);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn latitude(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|_| format!("invalid latitude '{}'", raw))?;
    if !(-90.0..=90.0).contains(&value) {
        return Err(format!("latitude must be between -90 and 90, got {}", value));
    }
    Ok(value)
}

fn longitude(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|_| format!("invalid longitude '{}'", raw))?;
    if !(-180.0..=180.0).contains(&value) {
        return Err(format!("longitude must be between -180 and 180, got {}", value));
    }
    Ok(value)
}

fn request_kind(raw: &str) -> Result<RequestKind, String> {
    raw.parse()
}

/// Midnight UTC of the given day
fn request_date(raw: &str) -> Result<DateTime<Utc>, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| format!("invalid date '{}', expected YYYY-MM-DD", raw))
}

fn read_password(prompt: &str) -> Result<String> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        return Ok(password);
    }
    rpassword::prompt_password(prompt).context("Failed to read password")
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn print_profile(user: &UserProfile) {
    println!("Name:      {}", user.display_name());
    println!("Email:     {}", user.email);
    if let Some(position) = user.position.as_deref().filter(|p| !p.is_empty()) {
        println!("Position:  {}", position);
    }
    if let Some(url) = user.image_url.as_deref().filter(|u| !u.is_empty()) {
        println!("Image:     {}", url);
    }
    match (user.last_attendance(), user.last_status_at) {
        (Some(status), Some(at)) => println!(
            "Status:    {} since {}",
            status,
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        ),
        (Some(status), None) => println!("Status:    {}", status),
        (None, _) => println!("Status:    no attendance yet"),
    }
}

fn format_history_entry(entry: &HistoryEntry) -> String {
    let time = entry.time.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    match &entry.kind {
        HistoryKind::Attendance {
            direction,
            device_id,
        } => format!("{}  {:<8} device {}", time, direction, device_id),
        HistoryKind::Request {
            kind,
            reason,
            status,
        } => format!("{}  {:<8} {} ({}): {}", time, "REQUEST", kind, status, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_check_in_accepts_negative_coordinates() {
        let cli = Cli::try_parse_from(["rahil", "check-in", "-33.87", "-151.2"]).unwrap();
        match cli.command {
            Commands::CheckIn { lat, lng } => {
                assert_eq!(lat, -33.87);
                assert_eq!(lng, -151.2);
            }
            _ => panic!("expected check-in"),
        }
        assert!(Cli::try_parse_from(["rahil", "check-out", "95", "51"]).is_err());
        assert!(Cli::try_parse_from(["rahil", "check-out", "north", "51"]).is_err());
        assert!(Cli::try_parse_from(["rahil", "check-out", "35"]).is_err());
    }

    #[test]
    fn test_request_arguments() {
        let cli = Cli::try_parse_from([
            "rahil", "request", "holiday-work", "2026-02-01", "release", "weekend",
        ])
        .unwrap();
        match cli.command {
            Commands::Request { kind, date, reason } => {
                assert_eq!(kind, RequestKind::HolidayWork);
                assert_eq!(date, Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
                assert_eq!(reason.join(" "), "release weekend");
            }
            _ => panic!("expected request"),
        }
        assert!(Cli::try_parse_from(["rahil", "request", "vacation", "2026-02-01", "x"]).is_err());
        assert!(Cli::try_parse_from(["rahil", "request", "leave", "02/01/2026", "x"]).is_err());
        assert!(Cli::try_parse_from(["rahil", "request", "leave", "2026-02-01"]).is_err());
    }

    #[test]
    fn test_update_profile_password_takes_no_value() {
        let cli = Cli::try_parse_from(["rahil", "update-profile", "password"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::UpdateProfile {
                field: ProfileField::Password
            }
        ));
        assert!(Cli::try_parse_from(["rahil", "update-profile", "password", "secret"]).is_err());
        assert!(Cli::try_parse_from(["rahil", "update-profile", "name"]).is_err());
    }

    #[test]
    fn test_format_attendance_entry() {
        let entry = HistoryEntry {
            time: Utc.with_ymd_and_hms(2026, 1, 20, 8, 0, 0).unwrap(),
            kind: HistoryKind::Attendance {
                direction: "IN".into(),
                device_id: 42,
            },
        };
        let line = format_history_entry(&entry);
        assert!(line.contains("IN"));
        assert!(line.ends_with("device 42"));
    }

}
