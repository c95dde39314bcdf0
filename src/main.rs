use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper::clock::SystemClock;
use gatekeeper::config::{self, Config};
use gatekeeper::notification::webhook::WebhookNotifier;
use gatekeeper::store::memory::MemoryStore;
use gatekeeper::store::postgres::PgStore;
use gatekeeper::{api, AppState, Gatekeeper};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export is opt-in; without an endpoint only the fmt layer runs.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "gatekeeper"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gatekeeper=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
        Some(cli::Commands::Migrate) => {
            let db = connect_required(&cfg).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Some(cli::Commands::Approval { command }) => {
            let gatekeeper = persistent_gatekeeper(&cfg).await?;
            handle_approval_command(&gatekeeper, command).await
        }
        Some(cli::Commands::Settings { command }) => {
            let gatekeeper = persistent_gatekeeper(&cfg).await?;
            handle_settings_command(&gatekeeper, command).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn connect_required(cfg: &Config) -> anyhow::Result<PgStore> {
    let url = cfg
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for this command")?;
    PgStore::connect(url).await
}

/// CLI commands always go to Postgres: an in-memory store would vanish on exit.
async fn persistent_gatekeeper(cfg: &Config) -> anyhow::Result<Gatekeeper> {
    let db = Arc::new(connect_required(cfg).await?);
    Ok(Gatekeeper::new(
        db.clone(),
        db,
        Arc::new(SystemClock),
        cfg.approval_policy(),
        cfg.admin_users.clone(),
    ))
}

async fn build_gatekeeper(cfg: &Config) -> anyhow::Result<Gatekeeper> {
    let policy = cfg.approval_policy();
    let clock = Arc::new(SystemClock);

    let gatekeeper = match cfg.database_url.as_deref() {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let db = Arc::new(PgStore::connect(url).await?);
            tracing::info!("Running migrations...");
            db.migrate().await?;
            Gatekeeper::new(db.clone(), db, clock, policy, cfg.admin_users.clone())
        }
        None => {
            tracing::warn!("DATABASE_URL not set; approvals and settings are kept in memory only");
            let store = Arc::new(MemoryStore::new());
            Gatekeeper::new(store.clone(), store, clock, policy, cfg.admin_users.clone())
        }
    };

    if cfg.webhook_urls.is_empty() {
        return Ok(gatekeeper);
    }
    let notifier = WebhookNotifier::new(cfg.webhook_urls.clone(), cfg.webhook_secret.clone())?;
    tracing::info!(urls = cfg.webhook_urls.len(), "webhook notifications enabled");
    Ok(gatekeeper.with_notifier(Arc::new(notifier)))
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let gatekeeper = build_gatekeeper(&cfg).await?;
    tracing::info!(
        required_approvers = gatekeeper.policy().required_approvers,
        validity_secs = gatekeeper.policy().validity_window.num_seconds(),
        "approval policy loaded"
    );

    let state = Arc::new(AppState::new(gatekeeper, cfg));
    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Gatekeeper listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_approval_command(
    gatekeeper: &Gatekeeper,
    cmd: cli::ApprovalCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::ApprovalCommands::Request {
            kind,
            subject,
            requestor,
            reason,
            approvers,
        } => {
            let request = gatekeeper
                .request_approval(&kind, &subject, &requestor, &reason, &approvers)
                .await?;
            println!("Approval requested.");
            println!("  ID:      {}", request.id);
            println!("  Subject: {}", request.subject);
            println!("  Created: {}", request.created_at.to_rfc3339());
        }
        cli::ApprovalCommands::Grant {
            kind,
            subject,
            requestor,
            approver,
            justification,
        } => {
            let grant = gatekeeper
                .grant_approval(&kind, &subject, &requestor, &approver, justification.as_deref())
                .await?;
            println!("Approval {} granted by {}.", grant.approval_id, grant.approver);
        }
        cli::ApprovalCommands::List {
            kind,
            requestor,
            offset,
            count,
        } => {
            let views = gatekeeper
                .list_approvals(&requestor, &kind, offset, count)
                .await?;
            if views.is_empty() {
                println!("No approvals.");
            } else {
                println!("{:<38} {:<28} {:<8} {:<7} CREATED", "ID", "SUBJECT", "STATUS", "GRANTS");
                for v in views {
                    println!(
                        "{:<38} {:<28} {:<8} {:<7} {}",
                        v.id,
                        v.subject.to_string(),
                        v.validity.as_str(),
                        v.grant_count,
                        v.created_at.to_rfc3339()
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_settings_command(
    gatekeeper: &Gatekeeper,
    cmd: cli::SettingsCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::SettingsCommands::Get { identity } => {
            let settings = gatekeeper.get_settings(&identity).await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        cli::SettingsCommands::Set {
            caller,
            user,
            mode,
            canary_mode,
            docs_location,
        } => {
            let target = user.unwrap_or_else(|| caller.clone());
            let settings = cli::settings_from_args(mode, canary_mode, docs_location);
            gatekeeper.set_settings(&caller, &target, settings).await?;
            println!("Settings for {} updated.", target);
        }
    }
    Ok(())
}
