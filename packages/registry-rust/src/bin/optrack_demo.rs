//! Runs one async tool call end to end: submit, execute in the background,
//! poll until resolved, fetch the payload, and shut the reaper down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use optrack_core::Arguments;
use optrack_registry::{
    ClientOperationManager, RegistryConfig, RequestContext, RequestId, ServerOperationManager,
};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "optrack-demo", about = "Submit and poll an async tool call")]
struct Args {
    /// Interval between reaper passes, in milliseconds.
    #[arg(long, env = "OPTRACK_CLEANUP_INTERVAL_MS", default_value_t = 60_000)]
    cleanup_interval_ms: u64,
    /// Keep-alive for the submitted operation, in seconds.
    #[arg(long, env = "OPTRACK_KEEP_ALIVE_SECS", default_value_t = 3600)]
    keep_alive_secs: u64,
    /// Simulated execution time of the tool, in milliseconds.
    #[arg(long, default_value_t = 500)]
    work_ms: u64,
    /// Poll interval, in milliseconds.
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,
    #[arg(long, default_value_t = 1)]
    a: i64,
    #[arg(long, default_value_t = 2)]
    b: i64,
    /// Emit logs as JSON.
    #[arg(long, env = "OPTRACK_JSON_LOGS")]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

struct Session {
    id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = RegistryConfig {
        cleanup_interval_ms: args.cleanup_interval_ms,
        ..RegistryConfig::default()
    };
    let server = Arc::new(ServerOperationManager::new(config.clone())?);
    let client = ClientOperationManager::new(config)?;
    server.start()?;

    let session = Arc::new(Session {
        id: "demo-session".to_string(),
    });
    let mut arguments = Arguments::new();
    arguments.insert("a".into(), json!(args.a));
    arguments.insert("b".into(), json!(args.b));

    let operation = server.create_operation(
        "sum",
        arguments,
        Some(args.keep_alive_secs),
        Some(session.id.clone()),
    )?;
    client.track_operation(operation.token.clone(), "sum", Some(operation.keep_alive));
    info!(tool = %operation.tool_name, "submitted async tool call");

    let ctx: RequestContext<Session, _, ()> =
        RequestContext::new(RequestId::from(1), Arc::clone(&server), session, ())
            .with_operation(operation.token.clone());
    let work = Duration::from_millis(args.work_ms);
    let executor = tokio::spawn(async move {
        let Some(token) = ctx.operation_token.clone() else {
            return;
        };
        if !ctx.operation_manager.mark_working(&token) {
            return;
        }
        tokio::time::sleep(work).await;
        let total = ctx.operation().and_then(|op| {
            let a = op.arguments.get("a")?.as_i64()?;
            let b = op.arguments.get("b")?.as_i64()?;
            a.checked_add(b)
        });
        let resolved = match total {
            Some(total) => ctx.complete(json!({ "total": total })),
            None => ctx.fail("arguments a and b must be integers whose sum fits in i64"),
        };
        if !resolved {
            warn!("operation was resolved elsewhere before the tool finished");
        }
    });

    let poll = Duration::from_millis(args.poll_ms);
    let snapshot = loop {
        let snapshot = server
            .check_status(&operation.token)
            .context("operation disappeared while polling")?;
        info!(status = %snapshot.status, "polled");
        if snapshot.status.is_terminal() {
            break snapshot;
        }
        tokio::time::sleep(poll).await;
    };
    executor.await.context("tool executor panicked")?;

    let tool = client.get_tool_name(&operation.token).unwrap_or_default();
    match server.operation_payload(&operation.token) {
        Ok(payload) => println!("{tool} -> {payload}"),
        Err(e) => println!("{tool} -> {} ({e})", snapshot.status),
    }
    client.untrack(&operation.token);

    server.shutdown().await;
    Ok(())
}
