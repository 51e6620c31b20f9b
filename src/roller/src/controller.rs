// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The rolling-update control loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::classify::{classify, Classified};
use crate::error::CloudError;
use crate::model::GroupSnapshot;
use crate::plan::plan_group;
use crate::provider::{CloudProvider, ReadinessGate};

/// The tag that tells the workload autoscaler to leave a group's nodes
/// alone while a rolling pass is replacing them.
pub const SCALE_DOWN_DISABLED_TAG: &str =
    "cluster-autoscaler.kubernetes.io/scale-down-disabled";

/// The rolling-update controller.
///
/// Owns the per-group record of pre-pass desired capacities and drives one
/// [`tick`](Roller::tick) per `check_delay`. All cloud and workload access
/// goes through the injected provider and gate; the controller itself holds
/// no credentials and persists nothing.
#[derive(Debug)]
pub struct Roller {
    provider: Arc<dyn CloudProvider>,
    gate: Option<Arc<dyn ReadinessGate>>,
    groups: Vec<String>,
    check_delay: Duration,
    /// Desired capacity of each group as it was before the current rolling
    /// pass began. Zero (or absent) means no pass is in progress.
    original_desired: BTreeMap<String, i64>,
}

impl Roller {
    /// Creates a controller managing the named groups.
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        gate: Option<Arc<dyn ReadinessGate>>,
        groups: Vec<String>,
        check_delay: Duration,
    ) -> Roller {
        Roller {
            provider,
            gate,
            groups,
            check_delay,
            original_desired: BTreeMap::new(),
        }
    }

    /// The recorded pre-pass desired capacity for `group`, or zero if no
    /// pass is in progress.
    pub fn original_desired(&self, group: &str) -> i64 {
        self.original_desired.get(group).copied().unwrap_or(0)
    }

    /// Runs the loop forever. Tick-level errors are logged and the loop
    /// carries on; nothing here terminates the process.
    pub async fn run(&mut self) {
        loop {
            if let Err(err) = self.tick().await {
                warn!("error adjusting autoscaling groups: {err}");
            }
            info!("sleeping {}s", self.check_delay.as_secs());
            tokio::time::sleep(self.check_delay).await;
        }
    }

    /// Performs one adjustment pass over all managed groups.
    ///
    /// Per-group failures are logged and skip only that group; an error
    /// return means the tick could not proceed at all (the group describe or
    /// the hostname resolution failed).
    pub async fn tick(&mut self) -> Result<(), CloudError> {
        let groups = self.provider.describe_groups(&self.groups).await?;

        // Classify every group up front. Steady groups are untagged and
        // handled inline; groups with outdated instances are tagged and
        // recorded for planning.
        let mut active: Vec<(&GroupSnapshot, Classified<'_>)> = Vec::new();
        for group in &groups {
            let classified = match classify(&*self.provider, group).await {
                Ok(classified) => classified,
                Err(err) => {
                    warn!(group = %group.name, "skipping group this tick: {err}");
                    continue;
                }
            };
            if classified.outdated.is_empty() {
                self.finish_pass(group).await;
                continue;
            }
            debug!(
                group = %group.name,
                outdated = classified.outdated.len(),
                up_to_date = classified.up_to_date.len(),
                "group has outdated instances"
            );
            self.begin_pass(group).await;
            active.push((group, classified));
        }

        if active.is_empty() {
            info!("all autoscaling groups are up to date");
            return Ok(());
        }

        // One hostname lookup covers every instance we may consult below.
        let ids: Vec<String> = active
            .iter()
            .flat_map(|(group, _)| group.instance_ids())
            .collect();
        let hostnames = self.provider.describe_hostnames(&ids).await?;
        let hostname_map: BTreeMap<String, String> =
            ids.into_iter().zip(hostnames).collect();

        let mut outcomes = Vec::new();
        for (group, classified) in &active {
            let original_desired = self.original_desired(&group.name);
            let plan = match plan_group(
                group,
                classified,
                &hostname_map,
                self.gate.as_deref(),
                original_desired,
            )
            .await
            {
                Ok(plan) => plan,
                Err(err) => {
                    warn!(group = %group.name, "skipping group this tick: {err}");
                    continue;
                }
            };
            outcomes.push((*group, plan));
        }

        // Commit: registry first, then capacity changes, then terminations.
        for (group, plan) in &outcomes {
            self.original_desired
                .insert(group.name.clone(), plan.original_desired);
        }
        for (group, plan) in &outcomes {
            if plan.desired != group.desired_capacity {
                info!(
                    group = %group.name,
                    desired = plan.desired,
                    "adjusting desired capacity"
                );
                if let Err(err) = self
                    .provider
                    .set_desired_capacity(&group.name, plan.desired)
                    .await
                {
                    warn!(group = %group.name, "failed to set desired capacity: {err}");
                }
            }
        }
        for (group, plan) in &outcomes {
            if let Some(id) = &plan.terminate {
                info!(group = %group.name, instance = %id, "terminating outdated instance");
                if let Err(err) = self.provider.terminate_instance(id).await {
                    warn!(group = %group.name, "failed to terminate instance {id}: {err}");
                }
            }
        }
        Ok(())
    }

    /// Marks a pass in progress: tag the group (propagating to instances it
    /// launches) and its current instances so the workload autoscaler does
    /// not scale the new nodes away mid-pass.
    async fn begin_pass(&self, group: &GroupSnapshot) {
        if let Err(err) = self
            .provider
            .tag_group(&group.name, SCALE_DOWN_DISABLED_TAG, "true")
            .await
        {
            warn!(group = %group.name, "failed to tag group: {err}");
        }
        let ids = group.instance_ids();
        if ids.is_empty() {
            return;
        }
        if let Err(err) = self
            .provider
            .tag_instances(&ids, SCALE_DOWN_DISABLED_TAG, "true")
            .await
        {
            warn!(group = %group.name, "failed to tag instances: {err}");
        }
    }

    /// A group with nothing outdated: hand its nodes back to the workload
    /// autoscaler and, if a pass was in progress, restore the pre-pass
    /// target and clear the marker.
    async fn finish_pass(&mut self, group: &GroupSnapshot) {
        if let Err(err) = self
            .provider
            .untag_group(&group.name, SCALE_DOWN_DISABLED_TAG)
            .await
        {
            warn!(group = %group.name, "failed to untag group: {err}");
        }
        let ids = group.instance_ids();
        if !ids.is_empty() {
            if let Err(err) = self
                .provider
                .untag_instances(&ids, SCALE_DOWN_DISABLED_TAG)
                .await
            {
                warn!(group = %group.name, "failed to untag instances: {err}");
            }
        }

        let original_desired = self.original_desired(&group.name);
        if original_desired == 0 {
            return;
        }
        info!(
            group = %group.name,
            desired = original_desired,
            "rolling pass complete; restoring desired capacity"
        );
        match self
            .provider
            .set_desired_capacity(&group.name, original_desired)
            .await
        {
            Ok(()) => {
                self.original_desired.insert(group.name.clone(), 0);
            }
            Err(err) => {
                // Leave the marker in place so the restore is retried next
                // tick.
                warn!(group = %group.name, "failed to restore desired capacity: {err}");
            }
        }
    }
}
