//! frerorchd entry point.
//!
//! Runs the FRER engine against the simulated switch. Notifications (JSON,
//! one per line) are read from stdin and delivered to the engine, for
//! example:
//!
//! ```text
//! {"type":"port_link","port":3,"link":false}
//! ```

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use sonic_frerorch::config::{self, DEFAULT_CONFIG_PATH};
use sonic_frerorch::daemon::{OrchDaemon, OrchDaemonConfig};
use sonic_frerorch::frer::FrerOrch;
use sonic_frerorch::sim::SimSwitch;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// SONiC FRER (IEEE 802.1CB) orchestration daemon
#[derive(Parser, Debug)]
#[command(name = "frerorchd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Log as JSON through tracing-subscriber
    #[arg(long)]
    log_json: bool,

    /// Heartbeat interval in milliseconds, overrides the configuration file
    #[arg(long)]
    heartbeat_interval: Option<u64>,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = config::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config))?;
    if let Some(ms) = args.heartbeat_interval {
        config.heartbeat_interval_ms = ms;
    }

    info!("Heartbeat interval: {}ms", config.heartbeat_interval_ms);
    info!("Simulated switch: {:?}", config.sim);

    let sim = Arc::new(SimSwitch::new(config.sim));
    let orch = FrerOrch::new(config.frer.clone(), sim.clone(), sim.clone(), sim.clone());

    let caps = orch.capabilities();
    info!(
        "FRER capabilities: {} instances, {} egress ports, {} cstreams, {} mstreams",
        caps.inst_cnt_max, caps.egress_port_cnt_max, caps.rcvy_cstream_cnt_max, caps.rcvy_mstream_cnt_max
    );

    // Persisted configuration is applied before the engine is started.
    for (inst, conf) in &config.instances {
        if let Err(e) = orch.conf_set(*inst, conf) {
            warn!("Instance {}: configuration rejected: {}", inst, e);
        }
    }

    for port in 0..config.sim.port_cnt {
        orch.port_link_change(port, true);
    }
    orch.start();

    let mut daemon = OrchDaemon::new(OrchDaemonConfig {
        heartbeat_interval_ms: config.heartbeat_interval_ms,
        ..OrchDaemonConfig::default()
    });
    daemon.register_orch(Box::new(orch));

    let stop = daemon.stop_handle();
    let shutdown_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received SIGINT, shutting down gracefully...");
                stop.stop();
            }
            Err(err) => {
                error!("Failed to listen for ctrl-c: {}", err);
            }
        }
    });

    let tx = daemon.notification_sender();
    let stdin_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });

    daemon.run().await;

    shutdown_handle.abort();
    stdin_handle.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.log_json {
        sonic_frerorch::audit::init_json_logging(&args.log_level);
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
            .init();
    }

    info!("Starting frerorchd");

    match run(args).await {
        Ok(()) => {
            info!("frerorchd shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("frerorchd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
