// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Cordon-and-drain of cluster nodes.

use std::time::Duration;

use anyhow::{bail, Context};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, EvictParams, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

/// The annotation the kubelet places on mirror pods for static manifests.
const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// How often to re-check whether evicted pods are gone.
const EVICTION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Policy knobs for a drain.
#[derive(Clone, Copy, Debug)]
pub struct DrainParams {
    /// Leave DaemonSet-managed pods alone rather than failing the drain.
    /// Their controller would immediately reschedule them anyway.
    pub ignore_daemonsets: bool,
    /// Evict pods that use emptyDir volumes, accepting the loss of their
    /// local data. When unset such pods fail the drain.
    pub delete_local_data: bool,
    /// Evict pods that no controller would recreate. When unset such pods
    /// fail the drain.
    pub force: bool,
}

/// Cordons `node_name` and evicts its pods, blocking until the evicted pods
/// are gone. The pod grace periods are the pods' own; nothing here imposes a
/// deadline, so a misbehaving workload can hold the drain (and the tick) for
/// as long as its disruption budget allows.
pub(crate) async fn drain_node(
    client: &Client,
    node_name: &str,
    params: &DrainParams,
) -> Result<(), anyhow::Error> {
    let nodes: Api<Node> = Api::all(client.clone());
    nodes
        .get(node_name)
        .await
        .with_context(|| format!("getting node {}", node_name))?;
    cordon(&nodes, node_name).await?;

    let pods: Api<Pod> = Api::all(client.clone());
    let on_node = pods
        .list(&ListParams::default().fields(&format!("spec.nodeName={}", node_name)))
        .await
        .with_context(|| format!("listing pods on node {}", node_name))?;

    let mut evicted = Vec::new();
    for pod in on_node.items {
        if should_evict(&pod, params)? {
            evicted.push(pod);
        }
    }

    for pod in &evicted {
        let namespace = pod.namespace().unwrap_or_else(|| "default".to_owned());
        let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
        debug!(
            pod = pod.name_any().as_str(),
            namespace = namespace.as_str(),
            "evicting pod"
        );
        api.evict(&pod.name_any(), &EvictParams::default())
            .await
            .with_context(|| format!("evicting pod {}/{}", namespace, pod.name_any()))?;
    }

    await_deletion(client, &evicted).await?;
    info!(node = node_name, evicted = evicted.len(), "node drained");
    Ok(())
}

/// Marks the node unschedulable so nothing lands on it mid-drain.
async fn cordon(nodes: &Api<Node>, node_name: &str) -> Result<(), anyhow::Error> {
    let patch = serde_json::json!({"spec": {"unschedulable": true}});
    nodes
        .patch(node_name, &PatchParams::default(), &Patch::Strategic(patch))
        .await
        .with_context(|| format!("cordoning node {}", node_name))?;
    Ok(())
}

/// Decides whether a pod should be evicted, or errors if the drain policy
/// forbids touching it.
fn should_evict(pod: &Pod, params: &DrainParams) -> Result<bool, anyhow::Error> {
    // Mirror pods belong to the kubelet, not the API server; eviction
    // cannot remove them.
    if pod.annotations().contains_key(MIRROR_POD_ANNOTATION) {
        return Ok(false);
    }

    // Pods that already ran to completion need no eviction.
    let phase = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref());
    if matches!(phase, Some("Succeeded") | Some("Failed")) {
        return Ok(false);
    }

    let owners = pod.owner_references();
    if owners.iter().any(|owner| owner.kind == "DaemonSet") {
        if params.ignore_daemonsets {
            return Ok(false);
        }
        bail!(
            "pod {} is managed by a DaemonSet and daemonsets are not ignored",
            pod.name_any()
        );
    }

    if has_local_storage(pod) && !params.delete_local_data {
        bail!(
            "pod {} has local storage and deleting local data is disabled",
            pod.name_any()
        );
    }

    if owners.is_empty() && !params.force {
        bail!(
            "pod {} is not managed by a controller and force is disabled",
            pod.name_any()
        );
    }

    Ok(true)
}

fn has_local_storage(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .map_or(false, |volumes| {
            volumes.iter().any(|volume| volume.empty_dir.is_some())
        })
}

/// Blocks until every evicted pod has left the API server (or has been
/// replaced by a new pod of the same name).
async fn await_deletion(client: &Client, pods: &[Pod]) -> Result<(), anyhow::Error> {
    for pod in pods {
        let namespace = pod.namespace().unwrap_or_else(|| "default".to_owned());
        let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
        let name = pod.name_any();
        let uid = pod.uid();
        loop {
            match api
                .get_opt(&name)
                .await
                .with_context(|| format!("checking eviction of pod {}/{}", namespace, name))?
            {
                None => break,
                Some(current) if current.uid() != uid => break,
                Some(_) => tokio::time::sleep(EVICTION_POLL_INTERVAL).await,
            }
        }
    }
    Ok(())
}
