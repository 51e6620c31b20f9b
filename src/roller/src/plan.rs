// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The per-group decision ladder.

use std::collections::BTreeMap;

use crate::classify::Classified;
use crate::error::PlanError;
use crate::model::GroupSnapshot;
use crate::provider::ReadinessGate;

/// What one tick should do to one group.
///
/// The plan carries the full next state, not a delta: `desired` and
/// `original_desired` are the values the group's target size and pass marker
/// should hold after the tick, whether or not they changed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Plan {
    /// The desired capacity the group should have.
    pub desired: i64,
    /// The value to record as the group's pre-pass desired capacity. Zero
    /// means no pass is in progress.
    pub original_desired: i64,
    /// An outdated instance to terminate this tick, if the group is ready
    /// for one.
    pub terminate: Option<String>,
}

/// Computes the next action for one group.
///
/// `original_desired` is the group's entry in the pass registry: the desired
/// capacity it had before the current rolling pass began, or zero if no pass
/// is in progress. The ladder, first match wins:
///
/// 1. Nothing outdated: restore the pre-pass target if a pass was running,
///    otherwise leave everything alone.
/// 2. No pass in progress: record today's target and grow by one.
/// 3. Fewer healthy instances than the pre-pass target plus one: hold.
/// 4. Any up-to-date instance unhealthy at the cloud layer: hold.
/// 5. Any up-to-date host unready at the workload layer: hold.
/// 6. Drain the first outdated instance and emit it for termination.
///
/// Termination does not decrement desired capacity, so the group replaces
/// the victim on its current spec and the ladder converges.
pub async fn plan_group(
    group: &GroupSnapshot,
    classified: &Classified<'_>,
    hostnames: &BTreeMap<String, String>,
    gate: Option<&dyn ReadinessGate>,
    original_desired: i64,
) -> Result<Plan, PlanError> {
    let desired = group.desired_capacity;

    if classified.outdated.is_empty() {
        if original_desired > 0 {
            return Ok(Plan {
                desired: original_desired,
                original_desired: 0,
                terminate: None,
            });
        }
        return Ok(Plan {
            desired,
            original_desired: 0,
            terminate: None,
        });
    }

    if original_desired == 0 {
        return Ok(Plan {
            desired: desired + 1,
            original_desired: desired,
            terminate: None,
        });
    }

    let hold = Plan {
        desired,
        original_desired,
        terminate: None,
    };

    let healthy = group
        .instances
        .iter()
        .filter(|i| i.health.is_healthy())
        .count();
    let healthy = i64::try_from(healthy).unwrap_or(i64::MAX);
    if healthy < original_desired + 1 {
        return Ok(hold);
    }

    if classified
        .up_to_date
        .iter()
        .any(|i| !i.health.is_healthy())
    {
        return Ok(hold);
    }

    if let Some(gate) = gate {
        let ids: Vec<String> = classified.up_to_date.iter().map(|i| i.id.clone()).collect();
        let hosts: Vec<String> = ids
            .iter()
            .map(|id| hostnames.get(id).cloned().unwrap_or_default())
            .collect();
        let unready = gate
            .unready_count(&hosts, &ids)
            .await
            .map_err(PlanError::Readiness)?;
        if unready > 0 {
            return Ok(hold);
        }
    }

    let candidate = classified.outdated[0].id.clone();
    if let Some(gate) = gate {
        let host = hostnames.get(&candidate).cloned().unwrap_or_default();
        gate.prepare_termination(&[host], &[candidate.clone()])
            .await
            .map_err(PlanError::PrepareTermination)?;
    }

    Ok(Plan {
        desired,
        original_desired,
        terminate: Some(candidate),
    })
}
