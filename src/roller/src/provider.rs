// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Capability traits implemented by backend crates.

use std::fmt;

use async_trait::async_trait;

use crate::error::CloudError;
use crate::model::{GroupSnapshot, LaunchTemplate, LaunchTemplateRef};

/// The narrow slice of the cloud's autoscaling and compute APIs the roller
/// consumes.
///
/// All operations are synchronous from the caller's perspective: they return
/// once the cloud has acknowledged the request, not once its effect (e.g. a
/// replacement instance launching) is visible. Transient failures are
/// reported as [`CloudError::Transient`], never swallowed, so the controller
/// can skip the affected group for the tick.
#[async_trait]
pub trait CloudProvider: fmt::Debug + Send + Sync {
    /// Describes the named groups. Groups that do not exist are absent from
    /// the result.
    async fn describe_groups(&self, names: &[String]) -> Result<Vec<GroupSnapshot>, CloudError>;

    /// Resolves instance ids to private DNS hostnames, in the same order as
    /// `ids`. It is an error for any id to be unknown to the cloud.
    async fn describe_hostnames(&self, ids: &[String]) -> Result<Vec<String>, CloudError>;

    /// Sets the group's desired capacity, honoring its cooldown.
    async fn set_desired_capacity(&self, group: &str, desired: i64) -> Result<(), CloudError>;

    /// Terminates an instance without decrementing its group's desired
    /// capacity, so the group promptly launches a replacement on the current
    /// spec.
    async fn terminate_instance(&self, id: &str) -> Result<(), CloudError>;

    /// Creates or updates a tag on the group. The tag propagates to
    /// instances the group launches afterwards.
    async fn tag_group(&self, group: &str, key: &str, value: &str) -> Result<(), CloudError>;

    /// Removes a tag from the group.
    async fn untag_group(&self, group: &str, key: &str) -> Result<(), CloudError>;

    /// Creates or updates a tag on each of the given instances.
    async fn tag_instances(&self, ids: &[String], key: &str, value: &str)
        -> Result<(), CloudError>;

    /// Removes a tag from each of the given instances.
    async fn untag_instances(&self, ids: &[String], key: &str) -> Result<(), CloudError>;

    /// Resolves a launch template reference to the template's current state.
    ///
    /// Fails with [`CloudError::InvalidLaunchSpec`] if the reference names
    /// neither an id nor a name, or if the lookup returns nothing.
    async fn launch_template(
        &self,
        template: &LaunchTemplateRef,
    ) -> Result<LaunchTemplate, CloudError>;
}

/// An optional collaborator that knows whether hosts are ready to serve
/// workloads and how to clear workloads off a host before termination.
///
/// Both operations take parallel `hostnames`/`ids` slices; entries at the
/// same index describe the same instance. Implementations key on whichever
/// identifier their orchestrator uses for node names.
#[async_trait]
pub trait ReadinessGate: fmt::Debug + Send + Sync {
    /// Returns how many of the given hosts are present in the cluster but
    /// not ready. Hosts the cluster has never heard of are not counted: a
    /// replacement instance that has not yet joined is the surge-wait
    /// phase's problem, not unreadiness.
    async fn unready_count(
        &self,
        hostnames: &[String],
        ids: &[String],
    ) -> Result<usize, anyhow::Error>;

    /// Cordons and drains the given hosts, blocking until their workloads
    /// have been evicted. A failure aborts the tick's termination step.
    async fn prepare_termination(
        &self,
        hostnames: &[String],
        ids: &[String],
    ) -> Result<(), anyhow::Error>;
}
