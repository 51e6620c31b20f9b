// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Domain model for managed autoscaling groups.
//!
//! These types mirror the slice of the cloud API the roller consumes, without
//! exposing SDK types to the rest of the crate. Backend crates convert their
//! native representations into these snapshots at the boundary.

/// Instance health as reported by the cloud's autoscaling layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HealthState {
    /// The instance passed its most recent health check.
    Healthy,
    /// Anything else the cloud may report.
    Unhealthy,
}

impl HealthState {
    /// The health status string the autoscaling API uses for healthy
    /// instances.
    pub const HEALTHY: &'static str = "Healthy";

    /// Parses a cloud-reported health status string.
    pub fn from_cloud_status(status: &str) -> HealthState {
        if status == Self::HEALTHY {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        }
    }

    /// Reports whether this is [`HealthState::Healthy`].
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }
}

/// A reference to a launch template, as attached to a group or an instance.
///
/// Either `id` or `name` identifies the template. `version` may be a literal
/// version number or one of the `$Default`/`$Latest` sentinels, which only
/// resolve against a [`LaunchTemplate`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LaunchTemplateRef {
    /// The template id, if set.
    pub id: Option<String>,
    /// The template name, if set.
    pub name: Option<String>,
    /// The version in use, if set.
    pub version: Option<String>,
}

/// A launch template resolved through the cloud API.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchTemplate {
    /// The template id.
    pub id: String,
    /// The template name.
    pub name: String,
    /// The version number `$Default` resolves to.
    pub default_version: i64,
    /// The version number `$Latest` resolves to.
    pub latest_version: i64,
}

/// How a group or instance is provisioned.
///
/// Groups carry exactly one of the two mechanisms; when the cloud reports
/// both, templates take precedence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LaunchSpec {
    /// A versioned launch template.
    Template(LaunchTemplateRef),
    /// A launch configuration, identified by name only.
    Configuration(String),
}

/// A point-in-time snapshot of one instance in a group.
#[derive(Clone, Debug)]
pub struct InstanceSnapshot {
    /// The opaque instance identifier.
    pub id: String,
    /// Cloud-reported health.
    pub health: HealthState,
    /// The spec the instance was provisioned from. Absent on instances that
    /// predate the group's template adoption.
    pub launch_spec: Option<LaunchSpec>,
}

/// A point-in-time snapshot of one managed autoscaling group.
#[derive(Clone, Debug)]
pub struct GroupSnapshot {
    /// The group's stable name.
    pub name: String,
    /// The group's current target size.
    pub desired_capacity: i64,
    /// The group's instances, in listing order.
    pub instances: Vec<InstanceSnapshot>,
    /// The spec new instances are provisioned from.
    pub launch_spec: Option<LaunchSpec>,
}

impl GroupSnapshot {
    /// The ids of all instances in the group, in listing order.
    pub fn instance_ids(&self) -> Vec<String> {
        self.instances.iter().map(|i| i.id.clone()).collect()
    }
}
