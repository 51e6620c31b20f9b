// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! End-to-end simulation of rolling passes against an in-memory cloud.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use roller::controller::{Roller, SCALE_DOWN_DISABLED_TAG};
use roller::error::CloudError;
use roller::model::{
    GroupSnapshot, HealthState, InstanceSnapshot, LaunchSpec, LaunchTemplate, LaunchTemplateRef,
};
use roller::provider::{CloudProvider, ReadinessGate};

#[derive(Debug, Clone)]
struct FakeInstance {
    id: String,
    healthy: bool,
    version: String,
    tags: BTreeMap<String, String>,
}

#[derive(Debug)]
struct FakeGroup {
    desired: i64,
    instances: Vec<FakeInstance>,
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    groups: BTreeMap<String, FakeGroup>,
    counter: u64,
    max_desired: i64,
    events: Vec<String>,
}

/// An in-memory stand-in for the cloud. Between ticks it behaves like an
/// autoscaling group: any capacity shortfall is made up with fresh, healthy
/// instances on the latest template version.
#[derive(Debug)]
struct FakeCloud {
    template: LaunchTemplate,
    state: Mutex<State>,
}

impl FakeCloud {
    fn new(groups: BTreeMap<String, FakeGroup>) -> FakeCloud {
        FakeCloud {
            template: LaunchTemplate {
                id: "lt-1".into(),
                name: "workers".into(),
                default_version: 5,
                latest_version: 5,
            },
            state: Mutex::new(State {
                groups,
                ..Default::default()
            }),
        }
    }

    fn spec(version: &str) -> LaunchSpec {
        LaunchSpec::Template(LaunchTemplateRef {
            id: Some("lt-1".into()),
            name: Some("workers".into()),
            version: Some(version.into()),
        })
    }

    fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

#[async_trait]
impl CloudProvider for FakeCloud {
    async fn describe_groups(&self, names: &[String]) -> Result<Vec<GroupSnapshot>, CloudError> {
        let mut state = self.state.lock().unwrap();
        let latest = self.template.latest_version.to_string();
        let mut snapshots = Vec::new();
        for name in names {
            if !state.groups.contains_key(name) {
                continue;
            }
            // The autoscaler launches replacements between ticks.
            loop {
                let group = &state.groups[name];
                if i64::try_from(group.instances.len()).unwrap() >= group.desired {
                    break;
                }
                state.counter += 1;
                let id = format!("i-new-{}", state.counter);
                let group = state.groups.get_mut(name).unwrap();
                let tags = group.tags.clone();
                group.instances.push(FakeInstance {
                    id,
                    healthy: true,
                    version: latest.clone(),
                    tags,
                });
            }
            let group = &state.groups[name];
            snapshots.push(GroupSnapshot {
                name: name.clone(),
                desired_capacity: group.desired,
                instances: group
                    .instances
                    .iter()
                    .map(|i| InstanceSnapshot {
                        id: i.id.clone(),
                        health: if i.healthy {
                            HealthState::Healthy
                        } else {
                            HealthState::Unhealthy
                        },
                        launch_spec: Some(FakeCloud::spec(&i.version)),
                    })
                    .collect(),
                launch_spec: Some(FakeCloud::spec("$Latest")),
            });
        }
        Ok(snapshots)
    }

    async fn describe_hostnames(&self, ids: &[String]) -> Result<Vec<String>, CloudError> {
        let state = self.state.lock().unwrap();
        ids.iter()
            .map(|id| {
                let known = state
                    .groups
                    .values()
                    .any(|g| g.instances.iter().any(|i| &i.id == id));
                if known {
                    Ok(format!("ip-{}.internal", id))
                } else {
                    Err(CloudError::Other(anyhow!("no reservation for {}", id)))
                }
            })
            .collect()
    }

    async fn set_desired_capacity(&self, group: &str, desired: i64) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("set_desired:{}:{}", group, desired));
        state.max_desired = state.max_desired.max(desired);
        state.groups.get_mut(group).unwrap().desired = desired;
        Ok(())
    }

    async fn terminate_instance(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("terminate:{}", id));
        for group in state.groups.values_mut() {
            group.instances.retain(|i| i.id != id);
        }
        Ok(())
    }

    async fn tag_group(&self, group: &str, key: &str, value: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("tag_group:{}", group));
        state
            .groups
            .get_mut(group)
            .unwrap()
            .tags
            .insert(key.into(), value.into());
        Ok(())
    }

    async fn untag_group(&self, group: &str, key: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("untag_group:{}", group));
        state.groups.get_mut(group).unwrap().tags.remove(key);
        Ok(())
    }

    async fn tag_instances(
        &self,
        ids: &[String],
        key: &str,
        value: &str,
    ) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        for group in state.groups.values_mut() {
            for instance in &mut group.instances {
                if ids.contains(&instance.id) {
                    instance.tags.insert(key.into(), value.into());
                }
            }
        }
        Ok(())
    }

    async fn untag_instances(&self, ids: &[String], key: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        for group in state.groups.values_mut() {
            for instance in &mut group.instances {
                if ids.contains(&instance.id) {
                    instance.tags.remove(key);
                }
            }
        }
        Ok(())
    }

    async fn launch_template(
        &self,
        template: &LaunchTemplateRef,
    ) -> Result<LaunchTemplate, CloudError> {
        if template.id.is_none() && template.name.is_none() {
            return Err(CloudError::InvalidLaunchSpec(
                "launch template reference has neither id nor name".into(),
            ));
        }
        Ok(self.template.clone())
    }
}

fn outdated_group(n: usize, desired: i64) -> FakeGroup {
    FakeGroup {
        desired,
        instances: (0..n)
            .map(|i| FakeInstance {
                id: format!("i-old-{}", i),
                healthy: true,
                version: "3".into(),
                tags: BTreeMap::new(),
            })
            .collect(),
        tags: BTreeMap::new(),
    }
}

fn roller(cloud: Arc<FakeCloud>, gate: Option<Arc<dyn ReadinessGate>>) -> Roller {
    Roller::new(
        cloud,
        gate,
        vec!["g1".into()],
        Duration::from_secs(30),
    )
}

#[tokio::test]
async fn a_full_pass_replaces_every_outdated_instance() {
    let cloud = Arc::new(FakeCloud::new(
        [("g1".to_string(), outdated_group(3, 3))].into(),
    ));
    let mut roller = roller(Arc::clone(&cloud), None);

    // Tick 1 starts the pass: desired goes 3 -> 4 and the pass marker is
    // recorded.
    roller.tick().await.unwrap();
    assert_eq!(roller.original_desired("g1"), 3);
    cloud.with_state(|state| {
        assert_eq!(state.groups["g1"].desired, 4);
        assert!(state.groups["g1"].tags.contains_key(SCALE_DOWN_DISABLED_TAG));
    });

    // One outdated instance is replaced per tick; two more ticks to restore
    // the original target and settle.
    for _ in 0..5 {
        roller.tick().await.unwrap();
    }

    assert_eq!(roller.original_desired("g1"), 0);
    cloud.with_state(|state| {
        let group = &state.groups["g1"];
        assert_eq!(group.desired, 3);
        assert!(group.instances.iter().all(|i| i.version == "5"));
        assert!(!group.tags.contains_key(SCALE_DOWN_DISABLED_TAG));
        assert!(group
            .instances
            .iter()
            .all(|i| !i.tags.contains_key(SCALE_DOWN_DISABLED_TAG)));
        // Surge never exceeded the pre-pass target plus one.
        assert_eq!(state.max_desired, 4);
    });

    let events = cloud.events();
    let terminated: Vec<_> = events
        .iter()
        .filter(|e| e.starts_with("terminate:"))
        .cloned()
        .collect();
    assert_eq!(
        terminated,
        vec!["terminate:i-old-0", "terminate:i-old-1", "terminate:i-old-2"]
    );
    // The group is tagged before capacity changes and untagged after the
    // last termination.
    let first_tag = events.iter().position(|e| e == "tag_group:g1").unwrap();
    let first_grow = events
        .iter()
        .position(|e| e == "set_desired:g1:4")
        .unwrap();
    let restore = events
        .iter()
        .position(|e| e == "set_desired:g1:3")
        .unwrap();
    let untag = events.iter().position(|e| e == "untag_group:g1").unwrap();
    assert!(first_tag < first_grow);
    assert!(restore > first_grow);
    assert!(untag > events.iter().rposition(|e| e.starts_with("terminate:")).unwrap());
}

/// A gate that reports unready replacements for a fixed number of calls,
/// then lets the pass proceed.
#[derive(Debug)]
struct SlowJoinGate {
    unready_calls: Mutex<usize>,
    drained: Mutex<Vec<String>>,
}

#[async_trait]
impl ReadinessGate for SlowJoinGate {
    async fn unready_count(
        &self,
        _hostnames: &[String],
        _ids: &[String],
    ) -> Result<usize, anyhow::Error> {
        let mut remaining = self.unready_calls.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn prepare_termination(
        &self,
        hostnames: &[String],
        _ids: &[String],
    ) -> Result<(), anyhow::Error> {
        self.drained.lock().unwrap().extend_from_slice(hostnames);
        Ok(())
    }
}

#[tokio::test]
async fn the_gate_holds_terminations_until_replacements_are_ready() {
    let cloud = Arc::new(FakeCloud::new(
        [("g1".to_string(), outdated_group(1, 1))].into(),
    ));
    let gate = Arc::new(SlowJoinGate {
        unready_calls: Mutex::new(2),
        drained: Mutex::new(Vec::new()),
    });
    let gate_dyn: Arc<dyn ReadinessGate> = Arc::clone(&gate);
    let mut roller = roller(Arc::clone(&cloud), Some(gate_dyn));

    // Start the pass, then hold for two ticks while the replacement joins
    // the cluster.
    roller.tick().await.unwrap();
    roller.tick().await.unwrap();
    roller.tick().await.unwrap();
    assert!(cloud.events().iter().all(|e| !e.starts_with("terminate:")));
    assert_eq!(roller.original_desired("g1"), 1);

    // The replacement is ready: the old instance is drained, then
    // terminated.
    roller.tick().await.unwrap();
    assert_eq!(*gate.drained.lock().unwrap(), vec!["ip-i-old-0.internal"]);
    assert!(cloud
        .events()
        .iter()
        .any(|e| e == "terminate:i-old-0"));

    // And the pass winds down.
    roller.tick().await.unwrap();
    assert_eq!(roller.original_desired("g1"), 0);
    cloud.with_state(|state| assert_eq!(state.groups["g1"].desired, 1));
}
