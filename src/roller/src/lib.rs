// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Rolling replacement of outdated instances in cloud autoscaling groups.
//!
//! When the launch template or launch configuration of an autoscaling group
//! changes, instances that were provisioned from the previous spec keep
//! running until something recycles them. The [`controller::Roller`] is that
//! something: a closed loop that, once per tick, grows each affected group by
//! one instance, waits for the replacement to become healthy at both the
//! cloud layer and (optionally) the workload layer, then drains and
//! terminates one outdated instance, repeating until the group has converged
//! on its current spec.
//!
//! The crate is deliberately backend-free. Cloud access goes through the
//! [`provider::CloudProvider`] trait and workload readiness through
//! [`provider::ReadinessGate`]; the `roller-aws` and `roller-kubernetes`
//! crates supply the production implementations. Partitioning instances into
//! outdated and up-to-date sets lives in [`classify`], and the per-group
//! decision ladder in [`plan`].

pub mod classify;
pub mod controller;
pub mod error;
pub mod model;
pub mod plan;
pub mod provider;
