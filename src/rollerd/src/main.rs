// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Daemon that rolls autoscaling groups onto their current launch spec.

use std::process;
use std::sync::Arc;

use aws_config::BehaviorVersion;
use clap::Parser;
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use roller::controller::Roller;
use roller::provider::ReadinessGate;
use roller_aws::AwsCloudProvider;
use roller_kubernetes::{DrainParams, KubernetesGate};

use crate::config::Config;

mod config;


#[derive(Debug, Parser)]
#[clap(name = "rollerd", about = "Rolls autoscaling groups onto their current launch spec.")]
struct Args {
    /// Log at debug level.
    #[clap(long)]
    debug: bool,
    /// Log in a human-readable format instead of JSON.
    #[clap(long)]
    human: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args);

    if let Err(err) = run().await {
        eprintln!("rollerd: fatal: {:#}", err);
        process::exit(1);
    }
}

fn init_tracing(args: &Args) {
    let default_level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if args.human {
        fmt.init();
    } else {
        fmt.json().init();
    }
}

async fn run() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let gate = KubernetesGate::maybe_new(
        config.require_kubernetes,
        DrainParams {
            ignore_daemonsets: config.ignore_daemonsets,
            delete_local_data: config.delete_local_data,
            force: true,
        },
    )
    .await?;
    let gate: Option<Arc<dyn ReadinessGate>> = match gate {
        Some(gate) => {
            info!("workload readiness gate enabled");
            Some(Arc::new(gate))
        }
        None => {
            info!("no cluster configuration found; relying on cloud health alone");
            None
        }
    };

    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let provider = Arc::new(AwsCloudProvider::new(&aws_config));

    info!(
        groups = ?config.groups,
        check_delay_secs = config.check_delay.as_secs(),
        "starting rolling-update loop"
    );
    let mut roller = Roller::new(provider, gate, config.groups, config.check_delay);
    roller.run().await;
    Ok(())
}
