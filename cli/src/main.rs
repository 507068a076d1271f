//! chainreplica CLI — inspect and drive a SQLite-backed replica.
//!
//! Usage:
//! ```bash
//! chainreplica publish ./replica.db subscribe:abcd:1700000000
//! chainreplica status  ./replica.db
//! chainreplica parse   unsubscribe:abcd
//! chainreplica info
//! ```

use std::env;
use std::process;

use chainreplica_core::{decode_checkpoint, Database, DataStoreConfig, SubEvent};
use chainreplica_storage::SqliteDatabase;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("chainreplica {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        "config" => cmd_config(),
        "parse" => match args.get(2) {
            Some(payload) => {
                cmd_parse(payload);
                Ok(())
            }
            None => usage_error("parse <payload>"),
        },
        "publish" => match (args.get(2), args.get(3)) {
            (Some(db), Some(payload)) => cmd_publish(db, payload).await,
            _ => usage_error("publish <db> <payload>"),
        },
        "status" => match args.get(2) {
            Some(db) => cmd_status(db).await,
            None => usage_error("status <db>"),
        },
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainreplica {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-aware replication of namespaced chain data\n");
    println!("USAGE:");
    println!("    chainreplica <COMMAND>\n");
    println!("COMMANDS:");
    println!("    info                    Show ChainReplica configuration info");
    println!("    config                  Print the default data store config as JSON");
    println!("    parse <payload>         Parse a control message");
    println!("    publish <db> <payload>  Queue a control message for a SQLite replica");
    println!("    status <db>             List the namespaces a SQLite replica tracks");
    println!("    version                 Print version");
    println!("    help                    Print this help");
}

fn usage_error(usage: &str) -> Result<(), Box<dyn std::error::Error>> {
    Err(format!("usage: chainreplica {usage}").into())
}

fn cmd_info() {
    let config = DataStoreConfig::default();
    println!("ChainReplica v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default chain: {}", config.chain.name);
    println!("  Default maturity delay: {} blocks", config.chain.maturity_delay);
    println!("  Default replication mode: {:?}", config.replication);
    println!("  Record format: specifier (16 B) | namespace (4 B) | payload");
    println!("  Control messages: subscribe:<ns>[:<start>], unsubscribe:<ns>");
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
}

fn cmd_config() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(&DataStoreConfig::default())?);
    Ok(())
}

fn cmd_parse(payload: &str) {
    match SubEvent::parse(payload) {
        Some(ev) => println!("{:?} {} start={}  ({ev})", ev.action, ev.namespace, ev.start),
        None => println!("rejected"),
    }
}

async fn cmd_publish(path: &str, payload: &str) -> Result<(), Box<dyn std::error::Error>> {
    if SubEvent::parse(payload).is_none() {
        return Err(format!("not a valid control message: {payload}").into());
    }
    let db = SqliteDatabase::open(path).await?;
    db.publish_control(payload).await?;
    db.close().await?;
    println!("queued {payload}");
    Ok(())
}

async fn cmd_status(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = SqliteDatabase::open(path).await?;
    let managers = db.load_managers().await?;
    if managers.is_empty() {
        println!("No namespaces tracked");
    }
    for (namespace, checkpoint) in managers {
        let records = db.data_count(namespace).await?;
        match decode_checkpoint(&checkpoint) {
            Ok((state, pending)) => {
                println!("{namespace}");
                println!("  Block height:    {}", state.block_height);
                println!("  Next data id:    {}", state.data_id);
                println!("  Records stored:  {records}");
                println!("  Pending blocks:  {}", pending.len());
                println!("  Subscribe start: {}", state.subscribe_start);
                println!("  Last change:     {}", state.recent_change_id);
            }
            Err(e) => println!("{namespace}\n  unreadable checkpoint: {e}"),
        }
    }

    let queued = db.pending_control().await?;
    if !queued.is_empty() {
        println!("Queued control messages: {}", queued.join(", "));
    }
    db.close().await?;
    Ok(())
}
