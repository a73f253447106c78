use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use workledger::{
    ActorRef, AuditAction, AuditEventFilters, AuditEventRepository, Event, EventFilters, Ledger,
    LedgerConfig, Level, OperationalEventFilters, OperationalEventRepository, ScopeId, TxContext,
    core::format_timestamp, ident,
};

#[derive(Parser)]
#[command(name = "workledger")]
#[command(about = "Operator tooling for the workflow ledger database")]
struct Cli {
    /// Database file
    #[arg(long, global = true, conflicts_with = "url")]
    db: Option<PathBuf>,

    /// Connection string, e.g. sqlite:///var/lib/orc/ledger.db?busy_timeout_ms=5000
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or migrate the schema
    Init,
    /// Audit events
    Audit {
        #[command(subcommand)]
        action: AuditCommand,
    },
    /// Operational events
    Ops {
        #[command(subcommand)]
        action: OpsCommand,
    },
    /// Audit and operational events together, newest first
    Events {
        #[command(subcommand)]
        action: EventsCommand,
    },
    /// Show the identifier each sequence would hand out next
    Ids,
    /// Delete events older than the given age
    Prune {
        #[arg(long)]
        days: i64,
    },
}

#[derive(Subcommand)]
enum AuditCommand {
    List(AuditListArgs),
    Show { id: String },
}

#[derive(Args)]
struct AuditListArgs {
    #[arg(long)]
    scope: Option<String>,
    #[arg(long)]
    entity_type: Option<String>,
    #[arg(long)]
    entity_id: Option<String>,
    #[arg(long)]
    actor: Option<String>,
    #[arg(long)]
    action: Option<String>,
    #[arg(long)]
    source: Option<String>,
    #[arg(long, default_value_t = 50)]
    limit: usize,
}

#[derive(Subcommand)]
enum EventsCommand {
    List(EventListArgs),
    /// Look up a WE- or OE- event
    Show { id: String },
}

#[derive(Args)]
struct EventListArgs {
    /// all, audit or ops
    #[arg(long, default_value = "all")]
    kind: String,
    #[arg(long)]
    scope: Option<String>,
    #[arg(long)]
    actor: Option<String>,
    #[arg(long)]
    entity_id: Option<String>,
    #[arg(long)]
    source: Option<String>,
    #[arg(long)]
    level: Option<String>,
    #[arg(long, default_value_t = 50)]
    limit: usize,
}

#[derive(Subcommand)]
enum OpsCommand {
    List {
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        level: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    Emit {
        #[arg(long)]
        source: String,
        #[arg(long, default_value = "info")]
        level: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        actor: Option<String>,
        /// Payload entry as key=value; repeatable
        #[arg(long = "data")]
        data: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ledger = open(&cli).await?;

    match cli.command {
        Command::Init => {
            println!("{}", ledger.config().to_url());
            println!("{}", ledger.stats());
        }
        Command::Audit { action } => match action {
            AuditCommand::List(args) => list_audit(&ledger, args).await?,
            AuditCommand::Show { id } => {
                let record = AuditEventRepository::new()
                    .get(ledger.pool().as_ref(), &id)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
        },
        Command::Ops { action } => match action {
            OpsCommand::List {
                scope,
                actor,
                source,
                level,
                limit,
            } => {
                let filters = OperationalEventFilters {
                    scope_id: scope.map(ScopeId::new),
                    actor_id: actor.map(ActorRef::new),
                    source,
                    level: level.as_deref().map(str::parse::<Level>).transpose()?,
                    limit: Some(limit),
                };
                let records = OperationalEventRepository::new()
                    .list(ledger.pool().as_ref(), &filters)
                    .await?;
                for record in records {
                    println!(
                        "{}\t{}\t{}\t{}\t{}\t{}",
                        record.id,
                        format_timestamp(record.timestamp),
                        record.level,
                        record.source,
                        record.message,
                        record.data_json
                    );
                }
            }
            OpsCommand::Emit {
                source,
                level,
                message,
                actor,
                data,
            } => {
                let level: Level = level.parse()?;
                let data = parse_data(&data)?;
                let ctx = match actor {
                    Some(actor) => TxContext::for_actor(ActorRef::new(actor)),
                    None => TxContext::new(),
                };
                let events = ledger.events().clone();
                let id = ledger
                    .run_exclusive(&ctx, |tx| async move {
                        events
                            .emit_operational(&tx, &source, level, &message, &data)
                            .await
                    })
                    .await?;
                println!("{}", id);
            }
        },
        Command::Events { action } => match action {
            EventsCommand::List(args) => list_events(&ledger, args).await?,
            EventsCommand::Show { id } => {
                let event = ledger.get_event(&id).await?;
                println!("{}", serde_json::to_string_pretty(&event)?);
            }
        },
        Command::Ids => {
            for seq in ident::SEQUENCES {
                let next = seq.peek(ledger.pool().as_ref()).await?;
                println!("{}\t{}", seq.table, next);
            }
        }
        Command::Prune { days } => {
            let report = ledger.retention().prune(days).await?;
            println!("{}", report);
        }
    }

    Ok(())
}

async fn open(cli: &Cli) -> Result<Ledger> {
    let config = match (&cli.db, &cli.url) {
        (Some(path), _) => LedgerConfig::new(path),
        (None, Some(url)) => LedgerConfig::from_url(url)?,
        (None, None) => return Err(anyhow!("either --db or --url is required")),
    };
    // Operator commands are short-lived and single-threaded.
    let config = config
        .max_connections(2)
        .connect_timeout(Duration::from_secs(10));

    Ledger::open(config)
        .await
        .with_context(|| format!("failed to open ledger at {}", cli_target(cli)))
}

fn cli_target(cli: &Cli) -> String {
    cli.db
        .as_ref()
        .map(|p| p.display().to_string())
        .or_else(|| cli.url.clone())
        .unwrap_or_default()
}

async fn list_audit(ledger: &Ledger, args: AuditListArgs) -> Result<()> {
    let filters = AuditEventFilters {
        scope_id: args.scope.map(ScopeId::new),
        entity_type: args.entity_type,
        entity_id: args.entity_id,
        actor_id: args.actor.map(ActorRef::new),
        action: args
            .action
            .as_deref()
            .map(str::parse::<AuditAction>)
            .transpose()?,
        source: args.source,
        limit: Some(args.limit),
    };

    let records = AuditEventRepository::new()
        .list(ledger.pool().as_ref(), &filters)
        .await?;
    for record in records {
        let change = match &record.field_name {
            Some(field) => format!(
                "{}: {} -> {}",
                field,
                record.old_value.as_deref().unwrap_or(""),
                record.new_value.as_deref().unwrap_or("")
            ),
            None => String::new(),
        };
        println!(
            "{}\t{}\t{}\t{}\t{} {}\t{}",
            record.id,
            format_timestamp(record.timestamp),
            record.actor_id.as_ref().map(|a| a.as_str()).unwrap_or("-"),
            record.action,
            record.entity_type,
            record.entity_id,
            change
        );
    }
    Ok(())
}

async fn list_events(ledger: &Ledger, args: EventListArgs) -> Result<()> {
    let filters = EventFilters {
        kind: args.kind.parse()?,
        scope_id: args.scope.map(ScopeId::new),
        actor_id: args.actor.map(ActorRef::new),
        entity_id: args.entity_id,
        source: args.source,
        level: args.level.as_deref().map(str::parse::<Level>).transpose()?,
        limit: Some(args.limit),
    };

    for event in ledger.list_events(&filters).await? {
        let summary = match &event {
            Event::Audit(record) => {
                format!("{} {} {}", record.action, record.entity_type, record.entity_id)
            }
            Event::Operational(record) => format!("{} {}", record.level, record.message),
        };
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            event.id(),
            format_timestamp(event.timestamp()),
            event.kind(),
            event.actor_id().map(|a| a.as_str()).unwrap_or("-"),
            event.source(),
            summary
        );
    }
    Ok(())
}

fn parse_data(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow!("payload entry '{}' is not key=value", pair))
        })
        .collect()
}
