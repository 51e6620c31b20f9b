// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Kubernetes readiness gate for the roller.
//!
//! Replacement instances are not useful until their node has joined the
//! cluster and reports `Ready`, and outdated instances should not be
//! terminated while pods are still scheduled on them. This crate implements
//! both halves of the [`ReadinessGate`] contract against the Kubernetes API:
//! readiness by listing nodes, termination preparation by cordoning the node
//! and draining its pods.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tracing::{debug, info};

use roller::provider::ReadinessGate;

mod drain;

pub use drain::DrainParams;

/// A [`ReadinessGate`] backed by a Kubernetes cluster.
pub struct KubernetesGate {
    client: Client,
    drain: DrainParams,
}

impl fmt::Debug for KubernetesGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubernetesGate")
            .field("client", &"...")
            .field("drain", &self.drain)
            .finish()
    }
}

impl KubernetesGate {
    /// Connects to the cluster the process is running in, if any.
    ///
    /// In-cluster configuration is preferred. When absent, a kubeconfig
    /// (honoring `KUBECONFIG`, defaulting to `~/.kube/config`) is used only
    /// if `require_out_of_cluster` is set; otherwise no gate is constructed
    /// and the roller trusts cloud health alone.
    pub async fn maybe_new(
        require_out_of_cluster: bool,
        drain: DrainParams,
    ) -> Result<Option<KubernetesGate>, anyhow::Error> {
        let config = match Config::incluster() {
            Ok(config) => config,
            Err(_) if !require_out_of_cluster => return Ok(None),
            Err(_) => Config::from_kubeconfig(&KubeConfigOptions::default())
                .await
                .context("loading kubeconfig")?,
        };
        let client = Client::try_from(config).context("building kubernetes client")?;
        Ok(Some(KubernetesGate { client, drain }))
    }

    /// Constructs a gate from an existing client.
    pub fn new(client: Client, drain: DrainParams) -> KubernetesGate {
        KubernetesGate { client, drain }
    }
}

#[async_trait]
impl ReadinessGate for KubernetesGate {
    async fn unready_count(
        &self,
        hostnames: &[String],
        _ids: &[String],
    ) -> Result<usize, anyhow::Error> {
        let wanted: BTreeSet<&str> = hostnames.iter().map(|h| h.as_str()).collect();
        // Node names cannot be filtered server-side, and filtering on the
        // kubernetes.io/hostname label is unsafe because kubelets may run
        // with --hostname-override. List everything and filter here.
        let nodes: Api<Node> = Api::all(self.client.clone());
        let nodes = nodes
            .list(&ListParams::default())
            .await
            .context("listing cluster nodes")?;
        let unready = unready_in(&nodes.items, &wanted);
        debug!(unready, hosts = hostnames.len(), "checked node readiness");
        Ok(unready)
    }

    async fn prepare_termination(
        &self,
        hostnames: &[String],
        _ids: &[String],
    ) -> Result<(), anyhow::Error> {
        for hostname in hostnames {
            info!(node = hostname.as_str(), "draining node before termination");
            drain::drain_node(&self.client, hostname, &self.drain).await?;
        }
        Ok(())
    }
}

/// Counts the nodes in `nodes` that are named in `wanted` and are not ready.
///
/// A node that has not reported conditions yet is not counted: the planner's
/// surge-wait phase already covers nodes that have not finished joining.
fn unready_in(nodes: &[Node], wanted: &BTreeSet<&str>) -> usize {
    nodes
        .iter()
        .filter(|node| {
            let name = node.metadata.name.as_deref().unwrap_or_default();
            wanted.contains(name) && node_unready(node)
        })
        .count()
}

fn node_unready(node: &Node) -> bool {
    let conditions = match node.status.as_ref().and_then(|s| s.conditions.as_ref()) {
        Some(conditions) => conditions,
        None => return false,
    };
    conditions
        .iter()
        .any(|condition| condition.type_ == "Ready" && condition.status != "True")
}
