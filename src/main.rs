//! keyshard - threshold custody for blockchain signing keys

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use keyshard::{
    chain::RpcBroadcaster,
    config::{Args, Command},
    custodial_keys::CustodyService,
    db::MongoClient,
    stores::{MongoCustodyRecordStore, MongoShareStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Logs go to stderr; stdout carries command output
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("keyshard={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  keyshard - threshold key custody");
    info!("======================================");
    info!("Shares: {} (threshold {})", args.total_shares, args.threshold);
    info!("Store A: {} / {}", args.store_a.store_a_uri, args.store_a.store_a_db);
    info!("Store B: {} / {}", args.store_b.store_b_uri, args.store_b.store_b_db);
    info!("RPC: {}", args.rpc_url);
    info!("======================================");

    let config = args.custody_config()?;

    // Custody records live beside store A
    let mongo_a = MongoClient::new(&args.store_a.store_a_uri, &args.store_a.store_a_db)
        .await
        .context("store A connection failed")?;
    let store_a = MongoShareStore::connect(&mongo_a).await?;
    let records = MongoCustodyRecordStore::connect(&mongo_a).await?;

    let mongo_b = MongoClient::new(&args.store_b.store_b_uri, &args.store_b.store_b_db)
        .await
        .context("store B connection failed")?;
    let store_b = MongoShareStore::connect(&mongo_b).await?;

    let broadcaster = RpcBroadcaster::new(&args.rpc_url, args.confirm_timeout());
    let service = CustodyService::new(
        config,
        Arc::new(store_a),
        Arc::new(store_b),
        Arc::new(records),
    )?
    .with_broadcaster(Arc::new(broadcaster));

    let request_id = Uuid::new_v4();
    let span = info_span!("command", request_id = %request_id);
    let output = run(&service, args.command).instrument(span).await;

    match output {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            if e.is_retriable() {
                warn!("Command failed (retriable): {}", e);
            } else {
                error!("Command failed: {}", e);
            }
            std::process::exit(2);
        }
    }
}

async fn run(service: &CustodyService, command: Command) -> keyshard::Result<serde_json::Value> {
    let value = match command {
        Command::Provision { user_id } => serde_json::to_value(service.provision(&user_id).await?),
        Command::PublicKey { user_id } => Ok(serde_json::json!({
            "publicKey": service.get_public_key(&user_id).await?,
        })),
        Command::Sign {
            user_id,
            message_hex,
        } => {
            let message = decode_message(&message_hex)?;
            serde_json::to_value(service.sign_transaction(&user_id, &message).await?)
        }
        Command::Submit {
            user_id,
            message_hex,
        } => {
            let message = decode_message(&message_hex)?;
            serde_json::to_value(service.submit_transaction(&user_id, &message).await?)
        }
    };

    value.map_err(|e| keyshard::CustodyError::Config(format!("failed to encode output: {e}")))
}

fn decode_message(message_hex: &str) -> keyshard::Result<Vec<u8>> {
    hex::decode(message_hex.trim())
        .map_err(|e| keyshard::CustodyError::InvalidInput(format!("message is not valid hex: {e}")))
}
