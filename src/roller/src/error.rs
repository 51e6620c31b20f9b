// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Error types for the rolling-update loop.

use thiserror::Error;

/// An error returned by a [`CloudProvider`](crate::provider::CloudProvider)
/// operation.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The cloud reported a condition expected to clear on its own, such as
    /// a scaling activity in progress or resource contention. The affected
    /// group is skipped for the current tick and retried on the next one.
    #[error("transient cloud error: {0}")]
    Transient(String),
    /// A group's launch spec could not be resolved: the template reference
    /// named neither an id nor a name, or the lookup came back empty.
    #[error("invalid launch spec: {0}")]
    InvalidLaunchSpec(String),
    /// Any other failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// An error produced while planning a single group.
///
/// Both variants leave the group's pass untouched: the planner holds desired
/// capacity and the pass marker at their current values and emits no
/// termination for the tick.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The readiness gate failed to report how many replacement hosts are
    /// still unready.
    #[error("checking readiness of replacement hosts: {0}")]
    Readiness(#[source] anyhow::Error),
    /// The readiness gate failed to drain the termination candidate.
    #[error("preparing host for termination: {0}")]
    PrepareTermination(#[source] anyhow::Error),
}
