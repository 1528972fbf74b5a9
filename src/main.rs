use std::env;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use bet_sync::csv::{read_transactions, write_payments, write_transactions, write_users};
use bet_sync::store::FileMedium;
use bet_sync::{Config, DurableStore, LocalBus, Origin, SyncEngine, SyncEventType, WriteOutcome};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: bet-sync <store-dir> [transactions|payments|users|stats|import <file.csv>]";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(dir) = args.first() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    let config = match env::var("BET_SYNC_CONFIG") {
        Ok(path) => match Config::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        Err(_) => Config::default(),
    };

    let medium = match FileMedium::open(dir) {
        Ok(medium) => Arc::new(medium),
        Err(e) => {
            error!(dir = %dir, reason = %e, "cannot open store directory");
            return ExitCode::FAILURE;
        }
    };
    let bus = Arc::new(LocalBus::new());
    let store = DurableStore::new(medium, bus.clone(), config.store);

    let result = match args.get(1).map(String::as_str) {
        None | Some("transactions") => write_transactions(io::stdout().lock(), &store.transactions()),
        Some("payments") => write_payments(io::stdout().lock(), &store.pending_payments()),
        Some("users") => write_users(io::stdout().lock(), &store.users()),
        Some("stats") => {
            let collection = store.load();
            println!("transactions,{}", collection.transactions.len());
            println!("pendingPayments,{}", collection.pending_payments.len());
            println!("users,{}", collection.users.len());
            if let Some(at) = collection.last_updated {
                println!("lastUpdated,{}", bet_sync::instant::format_instant(at));
            }
            Ok(())
        }
        Some("import") => {
            let Some(path) = args.get(2) else {
                eprintln!("{USAGE}");
                return ExitCode::FAILURE;
            };
            let engine = SyncEngine::new(config.sync, bus);
            return import(&store, &engine, path).await;
        }
        Some(other) => {
            eprintln!("unknown command '{other}'\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Store every valid row, queue a sync event for each new one, and drain the queue.
async fn import(store: &DurableStore, engine: &SyncEngine, path: &str) -> ExitCode {
    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }
    let rows = match read_transactions(path) {
        Ok(rows) => rows,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let (mut inserted, mut duplicates, mut rejected) = (0, 0, 0);
    for row in rows {
        let tx = match row {
            Ok(tx) => tx,
            Err(e) => {
                warn!("{e}");
                rejected += 1;
                continue;
            }
        };
        let data = match serde_json::to_value(&tx) {
            Ok(data) => data,
            Err(e) => {
                warn!(id = %tx.id, reason = %e, "cannot encode transaction");
                rejected += 1;
                continue;
            }
        };
        match store.add_transaction(tx.clone()) {
            WriteOutcome::Inserted(outcome) if outcome.is_committed() => {
                inserted += 1;
                if let Err(e) =
                    engine.submit(SyncEventType::TransactionAdded, tx.user_id, data, Origin::Local)
                {
                    warn!("{e}");
                }
            }
            WriteOutcome::Duplicate => duplicates += 1,
            _ => rejected += 1,
        }
    }
    // a run triggered by submit may hold the busy flag; wait it out
    while engine.stats().pending > 0 {
        engine.process_pending().await;
        tokio::task::yield_now().await;
    }

    let stats = engine.stats();
    println!(
        "imported {inserted}, duplicates {duplicates}, rejected {rejected}, synced {}",
        stats.synced
    );
    ExitCode::SUCCESS
}
