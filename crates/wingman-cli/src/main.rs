use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;
use wingman_core::{
    format_iso_date, parse_iso_date, EntityKind, FieldSet, RecordId, DEFAULT_MILESTONE_RANGE_DAYS,
};
use wingman_sync::{SyncCoordinator, WingmanConfig, DEFAULT_DATABASE_FILE};

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const RESERVED_TIP_KEYS: [&str; 3] = ["id", "date", "text"];

#[derive(Debug, Parser)]
#[command(name = "wm")]
#[command(about = "WingmanEM direct reports and management tips")]
struct Cli {
    #[arg(long, env = "WINGMAN_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_DATABASE_FILE)]
    db_file: String,

    #[arg(long)]
    busy_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn config(&self) -> WingmanConfig {
        let mut config = WingmanConfig::in_dir(&self.data_dir);
        config.database_file.clone_from(&self.db_file);
        if let Some(busy_timeout_ms) = self.busy_timeout_ms {
            config.busy_timeout_ms = busy_timeout_ms;
        }
        config
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    Report {
        #[command(subcommand)]
        command: Box<ReportCommand>,
    },
    Tip {
        #[command(subcommand)]
        command: Box<TipCommand>,
    },
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ReportCommand {
    Add(ReportAddArgs),
    Update(ReportUpdateArgs),
    Delete(IdArgs),
    Purge(PurgeArgs),
    List,
    Milestones(MilestoneArgs),
}

#[derive(Debug, Subcommand)]
enum TipCommand {
    Add(TipAddArgs),
    Update(TipUpdateArgs),
    Delete(IdArgs),
    Purge(PurgeArgs),
    List,
}

#[derive(Debug, Subcommand)]
enum SyncCommand {
    Status,
    Resync(ResyncArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    Check,
    Backup(DbBackupArgs),
    Restore(DbRestoreArgs),
}

#[derive(Debug, Args)]
struct ReportFields {
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
    #[arg(long = "street-address-1")]
    street_address_1: Option<String>,
    #[arg(long = "street-address-2")]
    street_address_2: Option<String>,
    #[arg(long)]
    city: Option<String>,
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    zipcode: Option<String>,
    #[arg(long)]
    country: Option<String>,
    #[arg(long)]
    birthday: Option<String>,
    #[arg(long)]
    hire_date: Option<String>,
    #[arg(long)]
    current_role: Option<String>,
    #[arg(long)]
    role_start_date: Option<String>,
    #[arg(long)]
    partner_name: Option<String>,
}

impl ReportFields {
    fn into_field_set(self) -> FieldSet {
        let mut fields = FieldSet::new();
        for (name, value) in [
            ("first_name", self.first_name),
            ("last_name", self.last_name),
            ("street_address_1", self.street_address_1),
            ("street_address_2", self.street_address_2),
            ("city", self.city),
            ("state", self.state),
            ("zipcode", self.zipcode),
            ("country", self.country),
            ("birthday", self.birthday),
            ("hire_date", self.hire_date),
            ("current_role", self.current_role),
            ("role_start_date", self.role_start_date),
            ("partner_name", self.partner_name),
        ] {
            if let Some(value) = value {
                fields.insert(name.to_string(), Some(value));
            }
        }
        fields
    }
}

#[derive(Debug, Args)]
struct ReportAddArgs {
    #[command(flatten)]
    fields: ReportFields,
    #[arg(long, default_value_t = false)]
    allow_duplicate: bool,
}

#[derive(Debug, Args)]
struct ReportUpdateArgs {
    #[arg(long)]
    id: i64,
    #[command(flatten)]
    fields: ReportFields,
    #[arg(long = "clear", value_name = "FIELD")]
    clear: Vec<String>,
}

#[derive(Debug, Args)]
struct TipAddArgs {
    #[arg(long)]
    text: String,
    /// Defaults to today (UTC).
    #[arg(long)]
    date: Option<String>,
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
    meta: Vec<(String, String)>,
    #[arg(long, default_value_t = false)]
    allow_duplicate: bool,
}

#[derive(Debug, Args)]
struct TipUpdateArgs {
    #[arg(long)]
    id: i64,
    #[arg(long)]
    text: Option<String>,
    #[arg(long)]
    date: Option<String>,
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
    meta: Vec<(String, String)>,
    #[arg(long = "clear", value_name = "FIELD")]
    clear: Vec<String>,
}

#[derive(Debug, Args)]
struct IdArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Args)]
struct PurgeArgs {
    #[arg(long, default_value_t = false)]
    yes: bool,
}

#[derive(Debug, Args)]
struct MilestoneArgs {
    #[arg(long, default_value_t = DEFAULT_MILESTONE_RANGE_DAYS)]
    days: u32,
    /// Defaults to today (UTC).
    #[arg(long)]
    today: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    DirectReport,
    ManagementTip,
}

impl From<KindArg> for EntityKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::DirectReport => Self::DirectReport,
            KindArg::ManagementTip => Self::ManagementTip,
        }
    }
}

#[derive(Debug, Args)]
struct ResyncArgs {
    #[arg(long, value_enum)]
    kind: KindArg,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbRestoreArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(format!("expected KEY=VALUE, got {raw:?}"));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("metadata key is empty in {raw:?}"));
    }
    if RESERVED_TIP_KEYS.contains(&key) {
        return Err(format!("`{key}` is a tip field, not metadata"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("WINGMAN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn today() -> time::Date {
    OffsetDateTime::now_utc().date()
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.config();
    tracing::debug!(data_dir = %config.data_dir.display(), database = %config.database_file, "opening stores");

    let (mut coordinator, startup) = SyncCoordinator::open(&config)
        .with_context(|| format!("failed to open stores in {}", config.data_dir.display()))?;

    match cli.command {
        Command::Report { command } => run_report(*command, &mut coordinator),
        Command::Tip { command } => run_tip(*command, &mut coordinator),
        Command::Sync { command } => match command {
            SyncCommand::Status => {
                let kinds = coordinator.status()?;
                emit_json(serde_json::json!({
                    "consistent": startup.is_consistent()
                        && kinds.iter().all(|kind| kind.divergence.is_empty()),
                    "startup": startup,
                    "kinds": kinds
                }))
            }
            SyncCommand::Resync(args) => {
                let kind = EntityKind::from(args.kind);
                let written = coordinator.resync_mirror(kind)?;
                emit_json(serde_json::json!({
                    "kind": kind,
                    "records_written": written,
                    "file_mirror_path": coordinator.mirror_path(kind)
                }))
            }
        },
        Command::Db { command } => run_db(command, &mut coordinator),
    }
}

fn run_report(command: ReportCommand, coordinator: &mut SyncCoordinator) -> Result<()> {
    const KIND: EntityKind = EntityKind::DirectReport;
    match command {
        ReportCommand::Add(args) => {
            let fields = args.fields.into_field_set();
            run_add(coordinator, KIND, &fields, args.allow_duplicate)
        }
        ReportCommand::Update(args) => {
            let mut fields = args.fields.into_field_set();
            clear_fields(&mut fields, args.clear);
            run_update(coordinator, KIND, args.id, &fields)
        }
        ReportCommand::Delete(args) => run_delete(coordinator, KIND, args.id),
        ReportCommand::Purge(args) => run_purge(coordinator, KIND, args.yes),
        ReportCommand::List => run_list(coordinator, KIND),
        ReportCommand::Milestones(args) => {
            let today = match args.today.as_deref() {
                Some(raw) => parse_iso_date(raw)
                    .with_context(|| format!("--today is not an ISO 8601 date: {raw:?}"))?,
                None => today(),
            };
            let milestones = coordinator.milestones(today, args.days);
            emit_json(serde_json::json!({
                "today": format_iso_date(today),
                "range_days": args.days,
                "milestones": milestones
            }))
        }
    }
}

fn run_tip(command: TipCommand, coordinator: &mut SyncCoordinator) -> Result<()> {
    const KIND: EntityKind = EntityKind::ManagementTip;
    match command {
        TipCommand::Add(args) => {
            let mut fields = FieldSet::new();
            fields.insert("text".to_string(), Some(args.text));
            let date = args.date.unwrap_or_else(|| format_iso_date(today()));
            fields.insert("date".to_string(), Some(date));
            for (key, value) in args.meta {
                fields.insert(key, Some(value));
            }
            run_add(coordinator, KIND, &fields, args.allow_duplicate)
        }
        TipCommand::Update(args) => {
            let mut fields = FieldSet::new();
            if let Some(text) = args.text {
                fields.insert("text".to_string(), Some(text));
            }
            if let Some(date) = args.date {
                fields.insert("date".to_string(), Some(date));
            }
            for (key, value) in args.meta {
                fields.insert(key, Some(value));
            }
            clear_fields(&mut fields, args.clear);
            run_update(coordinator, KIND, args.id, &fields)
        }
        TipCommand::Delete(args) => run_delete(coordinator, KIND, args.id),
        TipCommand::Purge(args) => run_purge(coordinator, KIND, args.yes),
        TipCommand::List => run_list(coordinator, KIND),
    }
}

fn clear_fields(fields: &mut FieldSet, clear: Vec<String>) {
    for field in clear {
        fields.insert(field, None);
    }
}

fn run_add(
    coordinator: &mut SyncCoordinator,
    kind: EntityKind,
    fields: &FieldSet,
    allow_duplicate: bool,
) -> Result<()> {
    if !allow_duplicate {
        if let Some(existing) = coordinator.find_duplicate(kind, fields)? {
            bail!("{kind} {} already exists with the same content; pass --allow-duplicate to add it anyway", existing.id());
        }
    }
    let record = coordinator.create(kind, fields)?;
    emit_json(serde_json::json!({ "kind": kind, "record": record }))
}

fn run_update(coordinator: &mut SyncCoordinator, kind: EntityKind, id: i64, fields: &FieldSet) -> Result<()> {
    if fields.is_empty() {
        bail!("nothing to update for {kind} {id}; pass at least one field or --clear");
    }
    let record = coordinator.update(kind, RecordId(id), fields)?;
    emit_json(serde_json::json!({ "kind": kind, "record": record }))
}

fn run_delete(coordinator: &mut SyncCoordinator, kind: EntityKind, id: i64) -> Result<()> {
    let deleted = coordinator.delete(kind, RecordId(id))?;
    emit_json(serde_json::json!({ "kind": kind, "deleted_id": deleted }))
}

fn run_purge(coordinator: &mut SyncCoordinator, kind: EntityKind, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("refusing to purge every {kind} without --yes");
    }
    let removed = coordinator.purge(kind)?;
    emit_json(serde_json::json!({ "kind": kind, "removed": removed }))
}

fn run_list(coordinator: &SyncCoordinator, kind: EntityKind) -> Result<()> {
    let listing = coordinator.list(kind)?;
    let divergence = listing.divergence();
    emit_json(serde_json::json!({
        "kind": kind,
        "file_mirror": listing.file_mirror,
        "relational": listing.relational,
        "divergence": divergence
    }))
}

fn run_db(command: DbCommand, coordinator: &mut SyncCoordinator) -> Result<()> {
    match command {
        DbCommand::Check => {
            let report = coordinator.integrity_check()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
        }
        DbCommand::Backup(args) => {
            coordinator.backup_database(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": args.out,
                "status": "ok"
            }))
        }
        DbCommand::Restore(args) => {
            let report = coordinator.restore_database(&args.input)?;
            emit_json(serde_json::json!({
                "restored_from": args.input,
                "consistent": report.is_consistent(),
                "startup": report
            }))
        }
    }
}
