// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! AWS implementation of the roller's cloud capabilities.
//!
//! Autoscaling group operations go through the Auto Scaling API; hostname
//! resolution, instance tagging, and launch template lookups go through EC2.
//! Faults the Auto Scaling API reports as self-clearing (scaling activity in
//! progress, resource contention) are classified as
//! [`CloudError::Transient`] so the controller retries them on the next
//! tick.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_autoscaling::types::Tag;
use aws_types::SdkConfig;
use tracing::debug;

use roller::error::CloudError;
use roller::model::{GroupSnapshot, LaunchTemplate, LaunchTemplateRef};
use roller::provider::CloudProvider;

mod convert;

/// The resource type the Auto Scaling tagging APIs expect for groups.
const GROUP_RESOURCE_TYPE: &str = "auto-scaling-group";

/// How often and how patiently to retry removing a group tag the cloud
/// still considers in use.
const UNTAG_ATTEMPTS: u32 = 3;
const UNTAG_RETRY_DELAY: Duration = Duration::from_millis(300);

/// A [`CloudProvider`] backed by the AWS Auto Scaling and EC2 APIs.
#[derive(Debug, Clone)]
pub struct AwsCloudProvider {
    autoscaling: aws_sdk_autoscaling::Client,
    ec2: aws_sdk_ec2::Client,
}

impl AwsCloudProvider {
    /// Constructs a provider from shared AWS configuration. Credentials and
    /// region come from the environment, as with any other SDK client.
    pub fn new(config: &SdkConfig) -> AwsCloudProvider {
        AwsCloudProvider {
            autoscaling: aws_sdk_autoscaling::Client::new(config),
            ec2: aws_sdk_ec2::Client::new(config),
        }
    }

    fn group_tag(group: &str, key: &str, value: Option<&str>) -> Result<Tag, CloudError> {
        let mut builder = Tag::builder()
            .key(key)
            .resource_id(group)
            .resource_type(GROUP_RESOURCE_TYPE)
            .propagate_at_launch(true);
        if let Some(value) = value {
            builder = builder.value(value);
        }
        builder
            .build()
            .map_err(|err| CloudError::Other(anyhow!(err).context("building group tag")))
    }
}

#[async_trait]
impl CloudProvider for AwsCloudProvider {
    async fn describe_groups(&self, names: &[String]) -> Result<Vec<GroupSnapshot>, CloudError> {
        let output = self
            .autoscaling
            .describe_auto_scaling_groups()
            .set_auto_scaling_group_names(Some(names.to_vec()))
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_invalid_next_token() || err.is_resource_contention_fault() {
                    CloudError::Transient(err.to_string())
                } else {
                    CloudError::Other(anyhow!(err).context("describing autoscaling groups"))
                }
            })?;
        Ok(output
            .auto_scaling_groups()
            .iter()
            .map(convert::group_snapshot)
            .collect())
    }

    async fn describe_hostnames(&self, ids: &[String]) -> Result<Vec<String>, CloudError> {
        let output = self
            .ec2
            .describe_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .send()
            .await
            .map_err(|err| {
                CloudError::Other(
                    anyhow!(err.into_service_error())
                        .context(format!("describing instances {:?}", ids)),
                )
            })?;
        if output.reservations().is_empty() {
            return Err(CloudError::Other(anyhow!(
                "no reservations returned for instances {:?}",
                ids
            )));
        }
        convert::hostnames_in_order(ids, output.reservations())
    }

    async fn set_desired_capacity(&self, group: &str, desired: i64) -> Result<(), CloudError> {
        self.autoscaling
            .set_desired_capacity()
            .auto_scaling_group_name(group)
            .desired_capacity(convert::capacity_i32(desired)?)
            .honor_cooldown(true)
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_scaling_activity_in_progress_fault()
                    || err.is_resource_contention_fault()
                {
                    CloudError::Transient(err.to_string())
                } else {
                    CloudError::Other(
                        anyhow!(err).context(format!("setting desired capacity on {}", group)),
                    )
                }
            })?;
        Ok(())
    }

    async fn terminate_instance(&self, id: &str) -> Result<(), CloudError> {
        self.autoscaling
            .terminate_instance_in_auto_scaling_group()
            .instance_id(id)
            // The group launches the replacement on its current spec.
            .should_decrement_desired_capacity(false)
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_scaling_activity_in_progress_fault()
                    || err.is_resource_contention_fault()
                {
                    CloudError::Transient(err.to_string())
                } else {
                    CloudError::Other(anyhow!(err).context(format!("terminating instance {}", id)))
                }
            })?;
        Ok(())
    }

    async fn tag_group(&self, group: &str, key: &str, value: &str) -> Result<(), CloudError> {
        let tag = AwsCloudProvider::group_tag(group, key, Some(value))?;
        self.autoscaling
            .create_or_update_tags()
            .tags(tag)
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_resource_contention_fault() {
                    CloudError::Transient(err.to_string())
                } else {
                    CloudError::Other(anyhow!(err).context(format!("tagging group {}", group)))
                }
            })?;
        Ok(())
    }

    async fn untag_group(&self, group: &str, key: &str) -> Result<(), CloudError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let tag = AwsCloudProvider::group_tag(group, key, None)?;
            let err = match self.autoscaling.delete_tags().tags(tag).send().await {
                Ok(_) => return Ok(()),
                Err(err) => err.into_service_error(),
            };
            // The cloud holds the tag briefly while a scaling activity
            // references it.
            if err.is_resource_in_use_fault() && attempt < UNTAG_ATTEMPTS {
                debug!(group, attempt, "group tag in use; retrying untag");
                tokio::time::sleep(UNTAG_RETRY_DELAY).await;
                continue;
            }
            return Err(if err.is_resource_contention_fault() {
                CloudError::Transient(err.to_string())
            } else {
                CloudError::Other(anyhow!(err).context(format!("untagging group {}", group)))
            });
        }
    }

    async fn tag_instances(
        &self,
        ids: &[String],
        key: &str,
        value: &str,
    ) -> Result<(), CloudError> {
        let tag = aws_sdk_ec2::types::Tag::builder().key(key).value(value).build();
        self.ec2
            .create_tags()
            .set_resources(Some(ids.to_vec()))
            .tags(tag)
            .send()
            .await
            .map_err(|err| {
                CloudError::Other(
                    anyhow!(err.into_service_error())
                        .context(format!("tagging instances {:?}", ids)),
                )
            })?;
        Ok(())
    }

    async fn untag_instances(&self, ids: &[String], key: &str) -> Result<(), CloudError> {
        let tag = aws_sdk_ec2::types::Tag::builder().key(key).build();
        self.ec2
            .delete_tags()
            .set_resources(Some(ids.to_vec()))
            .tags(tag)
            .send()
            .await
            .map_err(|err| {
                CloudError::Other(
                    anyhow!(err.into_service_error())
                        .context(format!("untagging instances {:?}", ids)),
                )
            })?;
        Ok(())
    }

    async fn launch_template(
        &self,
        template: &LaunchTemplateRef,
    ) -> Result<LaunchTemplate, CloudError> {
        let mut request = self.ec2.describe_launch_templates();
        match template {
            LaunchTemplateRef { id: Some(id), .. } if !id.is_empty() => {
                request = request.launch_template_ids(id);
            }
            LaunchTemplateRef {
                name: Some(name), ..
            } if !name.is_empty() => {
                request = request.launch_template_names(name);
            }
            _ => {
                return Err(CloudError::InvalidLaunchSpec(
                    "launch template reference names neither an id nor a name".into(),
                ));
            }
        }
        let output = request.send().await.map_err(|err| {
            CloudError::Other(
                anyhow!(err.into_service_error()).context("describing launch templates"),
            )
        })?;
        let resolved = output.launch_templates().first().ok_or_else(|| {
            CloudError::InvalidLaunchSpec(format!(
                "no launch template found for {:?} / {:?}",
                template.id, template.name
            ))
        })?;
        Ok(convert::launch_template(resolved))
    }
}
