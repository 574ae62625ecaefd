use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_store::{default_data_dir, AttendanceLedger, RecordFilter, TIMESTAMP_FORMAT};

// `#[zbus::proxy]` generates both `TrackerProxy` (async) and
// `TrackerProxyBlocking`. Only the async variant is used here.
#[zbus::proxy(
    interface = "org.rollcall.Tracker1",
    default_service = "org.rollcall.Tracker1",
    default_path = "/org/rollcall/Tracker1"
)]
trait Tracker {
    async fn status(&self) -> zbus::Result<String>;
    async fn snapshot(&self) -> zbus::Result<String>;
    async fn reset_session(&self) -> zbus::Result<String>;
    async fn recent_records(&self, limit: u32) -> zbus::Result<String>;
    async fn start_enrollment(&self, name: &str, target: u32) -> zbus::Result<bool>;
    async fn cancel_enrollment(&self) -> zbus::Result<bool>;
    async fn list_people(&self) -> zbus::Result<String>;
    async fn remove_person(&self, name: &str) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Attendance ledger path (defaults to ROLLCALL_LEDGER_PATH, then the XDG data dir)
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show attendance records from the ledger
    Records {
        /// Earliest date to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Latest date to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Case-insensitive name substring
        #[arg(long)]
        name: Option<String>,
    },
    /// Export filtered records to a new CSV file
    Export {
        /// Destination file
        dest: PathBuf,
        /// Earliest date to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Latest date to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Case-insensitive name substring
        #[arg(long)]
        name: Option<String>,
    },
    /// Show ledger statistics
    Summary,
    /// Show daemon status
    Status,
    /// Show live display labels for the current session
    Snapshot,
    /// Show the most recent records via the daemon
    Recent {
        /// Maximum rows to show
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Discard the current session and start a fresh one
    Reset,
    /// Begin enrollment for a person (captures come from the camera tool)
    Enroll {
        /// Person's name
        name: String,
        /// Samples to collect (0 = daemon default)
        #[arg(long, default_value_t = 0)]
        samples: u32,
    },
    /// Cancel the enrollment in progress
    CancelEnrollment,
    /// List enrolled people
    List,
    /// Remove an enrolled person
    Remove {
        /// Person's name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Records { from, to, name } => {
            cmd_records(ledger_path(cli.ledger), from, to, name)
        }
        Commands::Export {
            dest,
            from,
            to,
            name,
        } => cmd_export(ledger_path(cli.ledger), dest, from, to, name),
        Commands::Summary => cmd_summary(ledger_path(cli.ledger)),
        Commands::Status => cmd_status().await,
        Commands::Snapshot => cmd_snapshot().await,
        Commands::Recent { limit } => cmd_recent(limit).await,
        Commands::Reset => cmd_reset().await,
        Commands::Enroll { name, samples } => cmd_enroll(&name, samples).await,
        Commands::CancelEnrollment => cmd_cancel_enrollment().await,
        Commands::List => cmd_list().await,
        Commands::Remove { name } => cmd_remove(&name).await,
    }
}

fn ledger_path(overridden: Option<PathBuf>) -> PathBuf {
    overridden
        .or_else(|| std::env::var("ROLLCALL_LEDGER_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| default_data_dir().join("attendance.csv"))
}

async fn daemon_proxy() -> Result<TrackerProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let proxy = TrackerProxy::new(&conn)
        .await
        .context("connecting to rollcalld (is it running?)")?;
    Ok(proxy)
}

fn cmd_records(
    path: PathBuf,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    name: Option<String>,
) -> Result<()> {
    if !path.exists() {
        println!("No attendance ledger at {}", path.display());
        return Ok(());
    }
    // Read-only view; never creates or repairs the file.
    let ledger = AttendanceLedger::open_readonly(&path);
    let records = ledger.read_filtered(&RecordFilter { from, to, name })?;

    if records.is_empty() {
        println!("No matching records");
        return Ok(());
    }

    println!("{:<20} {:<12} {}", "Name", "Emotion", "Timestamp");
    println!("{}", "-".repeat(52));
    for record in &records {
        println!(
            "{:<20} {:<12} {}",
            record.name,
            record.emotion,
            record.timestamp.format(TIMESTAMP_FORMAT)
        );
    }
    println!();
    println!("{} record(s)", records.len());
    Ok(())
}

fn cmd_export(
    path: PathBuf,
    dest: PathBuf,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    name: Option<String>,
) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("no attendance ledger at {}", path.display());
    }
    let ledger = AttendanceLedger::open_readonly(&path);
    let count = ledger.export(&RecordFilter { from, to, name }, &dest)?;
    println!("Exported {} record(s) to {}", count, dest.display());
    Ok(())
}

fn cmd_summary(path: PathBuf) -> Result<()> {
    if !path.exists() {
        println!("No attendance ledger at {}", path.display());
        return Ok(());
    }
    let ledger = AttendanceLedger::open_readonly(&path);
    let summary = ledger.summarize(Local::now().date_naive())?;

    println!("Total records:       {}", summary.total_records);
    println!("Unique people:       {}", summary.unique_people);
    println!("Today's attendance:  {}", summary.today_count);
    match &summary.most_common_emotion {
        Some(emotion) => println!("Most common emotion: {emotion}"),
        None => println!("Most common emotion: n/a"),
    }
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let proxy = daemon_proxy().await?;
    let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;

    println!("rollcalld {}", field_str(&status, "version"));
    println!("Session:         {}", field_str(&status, "session_id"));
    println!("Started at:      {}", field_str(&status, "session_started_at"));
    println!("Debounce:        {} ms", status["debounce_ms"]);
    println!("Tracked now:     {}", status["tracked"]);
    println!("Logged:          {}", status["logged"]);
    println!("Pending lookups: {}", status["pending_lookups"]);
    println!("Dropped writes:  {}", status["dropped_writes"]);
    println!("Enrolled people: {}", status["enrolled_people"]);
    Ok(())
}

async fn cmd_snapshot() -> Result<()> {
    let proxy = daemon_proxy().await?;
    let labels: BTreeMap<String, String> = serde_json::from_str(&proxy.snapshot().await?)?;

    if labels.is_empty() {
        println!("Nobody tracked in the current session");
        return Ok(());
    }

    println!("{:<20} {}", "Name", "Display");
    println!("{}", "-".repeat(32));
    for (name, label) in &labels {
        println!("{name:<20} {label}");
    }
    Ok(())
}

async fn cmd_recent(limit: u32) -> Result<()> {
    let proxy = daemon_proxy().await?;
    let rows: Vec<serde_json::Value> = serde_json::from_str(&proxy.recent_records(limit).await?)?;

    if rows.is_empty() {
        println!("No records yet");
        return Ok(());
    }

    println!("{:<20} {:<12} {}", "Name", "Emotion", "Timestamp");
    println!("{}", "-".repeat(52));
    for row in &rows {
        println!(
            "{:<20} {:<12} {}",
            field_str(row, "name"),
            field_str(row, "emotion"),
            field_str(row, "timestamp")
        );
    }
    Ok(())
}

async fn cmd_reset() -> Result<()> {
    let proxy = daemon_proxy().await?;
    let session = proxy.reset_session().await?;
    println!("Session reset; new session {session}");
    Ok(())
}

async fn cmd_enroll(name: &str, samples: u32) -> Result<()> {
    let proxy = daemon_proxy().await?;
    proxy.start_enrollment(name, samples).await?;
    println!("Enrollment started for {name}");
    println!("Captures come from the camera collaborator; progress is reported there.");
    Ok(())
}

async fn cmd_cancel_enrollment() -> Result<()> {
    let proxy = daemon_proxy().await?;
    if proxy.cancel_enrollment().await? {
        println!("Enrollment cancelled");
    } else {
        println!("No enrollment in progress");
    }
    Ok(())
}

async fn cmd_list() -> Result<()> {
    let proxy = daemon_proxy().await?;
    let people: Vec<serde_json::Value> = serde_json::from_str(&proxy.list_people().await?)?;

    if people.is_empty() {
        println!("No people enrolled");
        return Ok(());
    }

    println!("{:<20} {:<8} {}", "Name", "Samples", "Enrolled At");
    println!("{}", "-".repeat(56));
    for person in &people {
        println!(
            "{:<20} {:<8} {}",
            field_str(person, "name"),
            person["samples"].as_u64().unwrap_or(0),
            field_str(person, "enrolled_at")
        );
    }
    Ok(())
}

async fn cmd_remove(name: &str) -> Result<()> {
    let proxy = daemon_proxy().await?;
    if proxy.remove_person(name).await? {
        println!("Removed {name}");
    } else {
        println!("{name} is not enrolled");
    }
    Ok(())
}

fn field_str<'a>(value: &'a serde_json::Value, key: &str) -> &'a str {
    value[key].as_str().unwrap_or("?")
}
