// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Conversions from SDK types to the roller's domain model.

use anyhow::anyhow;
use aws_sdk_autoscaling::types::{AutoScalingGroup, LaunchTemplateSpecification};
use aws_sdk_ec2::types::Reservation;

use roller::error::CloudError;
use roller::model::{
    GroupSnapshot, HealthState, InstanceSnapshot, LaunchSpec, LaunchTemplate, LaunchTemplateRef,
};

pub(crate) fn group_snapshot(group: &AutoScalingGroup) -> GroupSnapshot {
    GroupSnapshot {
        name: group.auto_scaling_group_name().unwrap_or_default().to_owned(),
        desired_capacity: i64::from(group.desired_capacity().unwrap_or(0)),
        instances: group
            .instances()
            .iter()
            .map(|instance| InstanceSnapshot {
                id: instance.instance_id().unwrap_or_default().to_owned(),
                health: HealthState::from_cloud_status(
                    instance.health_status().unwrap_or_default(),
                ),
                launch_spec: launch_spec(
                    instance.launch_template(),
                    instance.launch_configuration_name(),
                ),
            })
            .collect(),
        launch_spec: launch_spec(group.launch_template(), group.launch_configuration_name()),
    }
}

/// Builds the launch spec for a group or instance. Launch templates take
/// precedence when the cloud reports both mechanisms.
pub(crate) fn launch_spec(
    template: Option<&LaunchTemplateSpecification>,
    configuration: Option<&str>,
) -> Option<LaunchSpec> {
    if let Some(template) = template {
        return Some(LaunchSpec::Template(LaunchTemplateRef {
            id: template.launch_template_id().map(|id| id.to_owned()),
            name: template.launch_template_name().map(|name| name.to_owned()),
            version: template.version().map(|version| version.to_owned()),
        }));
    }
    configuration.map(|name| LaunchSpec::Configuration(name.to_owned()))
}

pub(crate) fn launch_template(template: &aws_sdk_ec2::types::LaunchTemplate) -> LaunchTemplate {
    LaunchTemplate {
        id: template.launch_template_id().unwrap_or_default().to_owned(),
        name: template.launch_template_name().unwrap_or_default().to_owned(),
        default_version: template.default_version_number().unwrap_or(0),
        latest_version: template.latest_version_number().unwrap_or(0),
    }
}

/// Orders resolved private DNS names to match the requested ids. The API
/// groups instances by reservation in an order of its own choosing.
pub(crate) fn hostnames_in_order(
    ids: &[String],
    reservations: &[Reservation],
) -> Result<Vec<String>, CloudError> {
    let mut by_id = std::collections::BTreeMap::new();
    for reservation in reservations {
        for instance in reservation.instances() {
            if let (Some(id), Some(hostname)) =
                (instance.instance_id(), instance.private_dns_name())
            {
                by_id.insert(id.to_owned(), hostname.to_owned());
            }
        }
    }
    ids.iter()
        .map(|id| {
            by_id
                .get(id)
                .cloned()
                .ok_or_else(|| CloudError::Other(anyhow!("no reservation for instance {}", id)))
        })
        .collect()
}

pub(crate) fn capacity_i32(desired: i64) -> Result<i32, CloudError> {
    i32::try_from(desired)
        .map_err(|_| CloudError::Other(anyhow!("desired capacity {} out of range", desired)))
}
