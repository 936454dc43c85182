use std::env;

use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let mut args = env::args().skip(1);
    let cmd = args.next().unwrap_or_default();
    if cmd != "serve" {
        eprintln!("Usage: attendwatch serve [--config <path>]");
        std::process::exit(2);
    }

    let mut config_path: Option<String> = None;
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(v) = args.next() {
                config_path = Some(v);
            }
        }
    }

    let cfg = match attendwatch_config::load(config_path.as_deref()) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(if cfg.logging.debug { "debug" } else { "info" });
    info!(
        listen_addr = %cfg.server.listen_addr,
        idle_ms = cfg.monitor.idle_ms,
        business_hours = %format!(
            "{}h-{}h {}",
            cfg.business_hours.start_hour, cfg.business_hours.end_hour, cfg.business_hours.timezone
        ),
        "starting attendwatch"
    );

    if let Err(e) = attendwatch_server::serve(cfg).await {
        eprintln!("server exited with error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("attendwatch={level},warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
