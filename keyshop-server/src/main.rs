// keyshop-server/src/main.rs

use clap::Parser;
use dotenv::dotenv;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use keyshop_core::eventbus::ShopEvent;
use keyshop_core::Error;

mod context;
use context::ServerContext;

#[derive(Parser, Debug, Clone)]
#[command(name = "keyshop")]
#[command(author, version, about = "keyshop - card inventory and order fulfillment engine")]
pub struct Args {
    /// Postgres connection URL.
    #[arg(long, default_value = "postgres://keyshop@localhost:5432/keyshop")]
    pub db_url: String,

    /// Port for the payment notify endpoint.
    #[arg(long, default_value = "8080")]
    pub notify_port: u16,

    /// Seconds between expiry sweeps.
    #[arg(long, default_value = "60")]
    pub sweep_interval_secs: u64,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("keyshop=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub).expect("Failed to set global subscriber");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_tracing();
    let args = Args::parse();
    info!(
        "keyshop starting. notify_port={}, sweep_interval={}s",
        args.notify_port, args.sweep_interval_secs
    );

    if let Err(e) = run_server(args).await {
        error!("Server error: {:?}", e);
    }
    info!("Main finished. Goodbye!");
    Ok(())
}

async fn run_server(args: Args) -> Result<(), Error> {
    let ctx = ServerContext::new(&args).await?;
    info!(
        "reservation TTL {}s, {} admin user(s) configured",
        ctx.config.reservation_ttl.num_seconds(),
        ctx.config.admin_usernames.len()
    );

    // Drain side-effect events into the log; email/notification transports
    // hang off this same subscription in deployments that have them.
    let mut events = ctx.event_bus.subscribe(None).await;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                ShopEvent::OrderDelivered { order_id, email, .. } => {
                    info!(%order_id, ?email, "event: order delivered");
                }
                ShopEvent::PaymentCaptured { order_id, amount, .. } => {
                    info!(%order_id, %amount, "event: payment captured");
                }
                ShopEvent::StockDepleted { order_id, product_id } => {
                    info!(%order_id, %product_id, "event: paid order awaiting stock");
                }
                ShopEvent::Tick => {}
            }
        }
    });

    // Ctrl-C signals shutdown through the event bus.
    let eb_clone = ctx.event_bus.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {:?}", e);
        }
        info!("Ctrl-C detected; shutting down...");
        eb_clone.shutdown();
    });

    let mut shutdown_rx = ctx.event_bus.shutdown_rx.clone();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(10)) => {
                ctx.event_bus.publish(ShopEvent::Tick).await;
            }
            Ok(_) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Shutdown signaled; exiting server loop.");
                    break;
                }
            }
        }
    }

    ctx.shutdown().await;
    Ok(())
}
