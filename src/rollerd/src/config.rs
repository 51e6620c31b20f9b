// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Environment configuration for rollerd.

use std::env;
use std::time::Duration;

use anyhow::{bail, Context};

/// Seconds between adjustment passes when `ROLLER_CHECK_DELAY` is unset.
const DEFAULT_CHECK_DELAY_SECS: u64 = 30;

/// Runtime configuration, read once at startup from `ROLLER_*` environment
/// variables.
#[derive(Clone, Debug)]
pub struct Config {
    /// The autoscaling groups to manage.
    pub groups: Vec<String>,
    /// Time between adjustment passes.
    pub check_delay: Duration,
    /// Skip DaemonSet-managed pods when draining.
    pub ignore_daemonsets: bool,
    /// Evict pods with emptyDir volumes when draining.
    pub delete_local_data: bool,
    /// Insist on a cluster connection even when not running in one.
    pub require_kubernetes: bool,
}

impl Config {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Config, anyhow::Error> {
        Ok(Config {
            groups: parse_group_list(env::var("ROLLER_ASG").ok().as_deref())?,
            check_delay: parse_check_delay(env::var("ROLLER_CHECK_DELAY").ok().as_deref())?,
            ignore_daemonsets: default_true(env::var("ROLLER_IGNORE_DAEMONSETS").ok().as_deref()),
            delete_local_data: default_true(env::var("ROLLER_DELETE_LOCAL_DATA").ok().as_deref()),
            require_kubernetes: env::var("ROLLER_KUBERNETES").as_deref() == Ok("true"),
        })
    }
}

fn parse_group_list(value: Option<&str>) -> Result<Vec<String>, anyhow::Error> {
    let groups: Vec<String> = value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| name.to_owned())
        .collect();
    if groups.is_empty() {
        bail!("at least one autoscaling group must be named in ROLLER_ASG");
    }
    Ok(groups)
}

fn parse_check_delay(value: Option<&str>) -> Result<Duration, anyhow::Error> {
    let secs = match value {
        None => DEFAULT_CHECK_DELAY_SECS,
        Some(raw) => raw
            .parse()
            .with_context(|| format!("ROLLER_CHECK_DELAY is not parsable: {}", raw))?,
    };
    Ok(Duration::from_secs(secs))
}

/// The `ROLLER_*` boolean convention: anything but the literal string
/// `"false"` (including unset) means true.
fn default_true(value: Option<&str>) -> bool {
    value != Some("false")
}
