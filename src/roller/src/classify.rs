// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Partitioning a group's instances into outdated and up-to-date sets.

use crate::error::CloudError;
use crate::model::{GroupSnapshot, InstanceSnapshot, LaunchSpec, LaunchTemplate, LaunchTemplateRef};
use crate::provider::CloudProvider;

/// The result of classifying a group's instances against its launch spec.
#[derive(Debug)]
pub struct Classified<'a> {
    /// Instances provisioned from a spec other than the group's current one,
    /// in listing order.
    pub outdated: Vec<&'a InstanceSnapshot>,
    /// Instances provisioned from the group's current spec, in listing
    /// order.
    pub up_to_date: Vec<&'a InstanceSnapshot>,
}

impl Classified<'_> {
    fn new() -> Classified<'static> {
        Classified {
            outdated: Vec::new(),
            up_to_date: Vec::new(),
        }
    }
}

/// Partitions `group`'s instances by whether they match its launch spec.
///
/// Template-based groups need the template resolved through `provider` so
/// that the `$Default`/`$Latest` version sentinels compare correctly; two
/// instances may name the same template and version string yet run different
/// template versions, or different strings yet the same version.
pub async fn classify<'a>(
    provider: &dyn CloudProvider,
    group: &'a GroupSnapshot,
) -> Result<Classified<'a>, CloudError> {
    match &group.launch_spec {
        Some(LaunchSpec::Template(spec)) => {
            let template = provider.launch_template(spec).await?;
            Ok(classify_by_template(group, spec, &template))
        }
        Some(LaunchSpec::Configuration(name)) => Ok(classify_by_configuration(group, name)),
        None => Err(CloudError::InvalidLaunchSpec(format!(
            "group {} has neither a launch template nor a launch configuration",
            group.name
        ))),
    }
}

fn classify_by_template<'a>(
    group: &'a GroupSnapshot,
    group_spec: &LaunchTemplateRef,
    template: &LaunchTemplate,
) -> Classified<'a> {
    let mut classified = Classified::new();
    for instance in &group.instances {
        let up_to_date = match &instance.launch_spec {
            Some(LaunchSpec::Template(instance_spec)) => {
                instance_spec.name == group_spec.name
                    && instance_spec.id == group_spec.id
                    && versions_match(
                        template,
                        group_spec.version.as_deref(),
                        instance_spec.version.as_deref(),
                    )
            }
            // No template, or a launch configuration while the group moved
            // to templates.
            _ => false,
        };
        if up_to_date {
            classified.up_to_date.push(instance);
        } else {
            classified.outdated.push(instance);
        }
    }
    classified
}

fn classify_by_configuration<'a>(group: &'a GroupSnapshot, name: &str) -> Classified<'a> {
    let mut classified = Classified::new();
    for instance in &group.instances {
        let up_to_date = matches!(
            &instance.launch_spec,
            Some(LaunchSpec::Configuration(instance_name)) if instance_name == name
        );
        if up_to_date {
            classified.up_to_date.push(instance);
        } else {
            classified.outdated.push(instance);
        }
    }
    classified
}

/// Reports whether two launch template version strings denote the same
/// version of `template`.
///
/// The `$Default` and `$Latest` sentinels resolve to the template's current
/// default and latest version numbers; any other string is compared
/// literally. An absent version only equals another absent version.
pub fn versions_match(template: &LaunchTemplate, a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => resolve_version(template, a) == resolve_version(template, b),
        _ => false,
    }
}

fn resolve_version(template: &LaunchTemplate, version: &str) -> String {
    match version {
        "$Default" => template.default_version.to_string(),
        "$Latest" => template.latest_version.to_string(),
        other => other.to_string(),
    }
}
