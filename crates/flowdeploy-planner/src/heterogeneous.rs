use std::collections::{BTreeMap, BTreeSet};

use flowdeploy_common::{
    parse_logical_device_ids, Binding, DeployError, DeployPlan, DeviceInfo, DynamicSchedPlan,
    EnqueuePolicy, EndpointRef, GroupEntryInfo, LogicalDeviceId, QueueInfo, Result,
    SubmodelPlacement, SubmodelSpec,
};
use tracing::debug;

use crate::flatten::FlatModel;
use crate::reindex::{ensure_unique_node_ids, reindex_devices, DeviceTable};

/// Places the submodels of a flat model onto devices and wires their
/// endpoints with queues, groups and bindings.
///
/// Root inputs and outputs live on the head device, normally the host CPU of
/// the node driving the deployment.
#[derive(Debug, Clone)]
pub struct HeterogeneousDeployPlanner {
    devices: Vec<DeviceInfo>,
    head_device: DeviceInfo,
}

/// Physical queue identity: one per (endpoint, device).
type QueueKey = (String, i32, String);

fn queue_key(name: &str, device: &DeviceInfo) -> QueueKey {
    (name.to_string(), device.cluster_id, device.key())
}

#[derive(Default)]
struct PlanBuilder {
    queues: Vec<QueueInfo>,
    groups: Vec<GroupEntryInfo>,
    bindings: Vec<Binding>,
    canonical: BTreeMap<QueueKey, usize>,
    group_canonical: BTreeMap<(i32, String, Vec<usize>), usize>,
}

impl PlanBuilder {
    /// Returns the new entry's index; reuse of an existing (endpoint, device)
    /// queue still gets its own entry, aliased through `ref_index`.
    fn add_queue(&mut self, name: &str, device: &DeviceInfo, attrs: (u32, EnqueuePolicy)) -> usize {
        let index = self.queues.len();
        let key = queue_key(name, device);
        let ref_index = self.canonical.get(&key).copied();
        if ref_index.is_none() {
            self.canonical.insert(key, index);
        }
        self.queues.push(QueueInfo {
            name: name.to_string(),
            device: device.clone(),
            depth: attrs.0,
            enqueue_policy: attrs.1,
            ref_index,
        });
        index
    }

    /// Queue that never aliases another, used for scheduler side channels.
    fn add_private_queue(&mut self, name: String, device: &DeviceInfo) -> usize {
        self.queues.push(QueueInfo {
            name,
            device: device.clone(),
            depth: flowdeploy_common::relation::DEFAULT_QUEUE_DEPTH,
            enqueue_policy: EnqueuePolicy::Fifo,
            ref_index: None,
        });
        self.queues.len() - 1
    }

    fn add_group(&mut self, name: &str, device: &DeviceInfo, members: Vec<usize>) -> usize {
        let index = self.groups.len();
        let mut sorted = members.clone();
        sorted.sort_unstable();
        let key = (device.cluster_id, device.key(), sorted);
        let ref_index = self.group_canonical.get(&key).copied();
        if ref_index.is_none() {
            self.group_canonical.insert(key, index);
        }
        self.groups.push(GroupEntryInfo {
            name: name.to_string(),
            device: device.clone(),
            members,
            ref_index,
        });
        index
    }

    fn canonical(&self, index: usize) -> usize {
        self.queues
            .get(index)
            .and_then(|q| q.ref_index)
            .unwrap_or(index)
    }

    fn node_of(&self, index: usize) -> i32 {
        self.queues[index].device.node_id
    }
}

struct Instance {
    model_name: String,
    instance_name: String,
    device: DeviceInfo,
    queue_device: DeviceInfo,
    artifact: Option<String>,
}

impl HeterogeneousDeployPlanner {
    pub fn new(devices: Vec<DeviceInfo>, head_device: DeviceInfo) -> Self {
        Self {
            devices,
            head_device,
        }
    }

    pub fn build_plan(&self, model: &FlatModel) -> Result<DeployPlan> {
        let relation = &model.relation;
        if relation.submodels.is_empty() {
            return Err(DeployError::param_invalid(format!(
                "model '{}' has no submodels in its relation",
                model.name
            )));
        }

        ensure_unique_node_ids(self.devices.iter().chain([&self.head_device]))?;
        let table = reindex_devices(&self.devices)?;

        let mut instances = Vec::new();
        for name in relation.submodels.keys() {
            let spec = model.submodels.get(name).ok_or_else(|| {
                DeployError::param_invalid(format!("relation names unknown submodel '{name}'"))
            })?;
            instances.extend(self.place_submodel(spec, &table)?);
        }

        let mut b = PlanBuilder::default();

        let input_queue_indices: Vec<usize> = relation
            .root
            .input_names
            .iter()
            .map(|n| b.add_queue(n, &self.head_device, relation.queue_attrs(n)))
            .collect();
        let output_queue_indices: Vec<usize> = relation
            .root
            .output_names
            .iter()
            .map(|n| b.add_queue(n, &self.head_device, relation.queue_attrs(n)))
            .collect();

        // endpoint name -> (producer entries, consumer entries)
        let mut flows: BTreeMap<String, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
        for (n, &q) in relation.root.input_names.iter().zip(&input_queue_indices) {
            flows.entry(n.clone()).or_default().0.push(q);
        }
        for (n, &q) in relation.root.output_names.iter().zip(&output_queue_indices) {
            flows.entry(n.clone()).or_default().1.push(q);
        }

        let mut submodels = BTreeMap::new();
        for inst in instances {
            let info = &relation.submodels[&inst.model_name];
            let mut inputs = Vec::with_capacity(info.input_names.len());
            for n in &info.input_names {
                let q = b.add_queue(n, &inst.queue_device, relation.queue_attrs(n));
                flows.entry(n.clone()).or_default().1.push(q);
                inputs.push(q);
            }
            let mut outputs = Vec::with_capacity(info.output_names.len());
            for n in &info.output_names {
                let q = b.add_queue(n, &inst.queue_device, relation.queue_attrs(n));
                flows.entry(n.clone()).or_default().0.push(q);
                outputs.push(q);
            }
            let is_head = inst.device.same_device(&self.head_device);
            submodels.insert(
                inst.instance_name.clone(),
                SubmodelPlacement {
                    model_name: inst.model_name,
                    instance_name: inst.instance_name,
                    device: inst.device,
                    queue_device: inst.queue_device,
                    input_queue_indices: inputs,
                    output_queue_indices: outputs,
                    is_head,
                    artifact: inst.artifact,
                },
            );
        }

        for (name, (producers, consumers)) in &flows {
            route_endpoint(&mut b, name, producers, consumers);
        }

        let dynamic_sched_plan = if model.dynamic_sched {
            Some(self.plan_dynamic_sched(&mut b, &submodels, relation.root.input_names.as_slice()))
        } else {
            None
        };

        debug!(
            model = %model.name,
            queues = b.queues.len(),
            groups = b.groups.len(),
            bindings = b.bindings.len(),
            instances = submodels.len(),
            "built deploy plan"
        );

        Ok(DeployPlan {
            model_name: model.name.clone(),
            head_device: self.head_device.clone(),
            queues: b.queues,
            groups: b.groups,
            bindings: b.bindings,
            submodels,
            input_queue_indices,
            output_queue_indices,
            dynamic_sched_plan,
        })
    }

    fn place_submodel(&self, spec: &SubmodelSpec, table: &DeviceTable) -> Result<Vec<Instance>> {
        let ids = match spec.logical_device_id.as_deref() {
            Some(raw) => parse_logical_device_ids(raw)?
                .iter()
                .map(|e| LogicalDeviceId::parse(e))
                .collect::<Result<Vec<_>>>()?,
            None if spec.heavy_load => {
                return Err(DeployError::failed(format!(
                    "heavy-load submodel '{}' needs a logical device id",
                    spec.name
                )))
            }
            None => Vec::new(),
        };

        let placements: Vec<(DeviceInfo, DeviceInfo)> = if ids.is_empty() {
            match self.devices.as_slice() {
                [only] => vec![(only.clone(), only.clone())],
                _ => {
                    return Err(DeployError::param_invalid(format!(
                        "submodel '{}' has no logical device id and {} devices were supplied",
                        spec.name,
                        self.devices.len()
                    )))
                }
            }
        } else {
            ids.iter()
                .map(|id| self.resolve_placement(spec, id, table))
                .collect::<Result<Vec<_>>>()?
        };

        let multi = placements.len() > 1;
        let mut out = Vec::with_capacity(placements.len());
        for (k, (device, queue_device)) in placements.into_iter().enumerate() {
            if let Some(rt) = spec.resource_type.as_deref() {
                if rt != device.resource_type {
                    return Err(DeployError::failed(format!(
                        "submodel '{}' needs resource type '{rt}' but {} provides '{}'",
                        spec.name, device, device.resource_type
                    )));
                }
            }
            let instance_name = if multi {
                format!("{}@{k}", spec.name)
            } else {
                spec.name.clone()
            };
            debug!(submodel = %spec.name, instance = %instance_name, device = %device, queue_device = %queue_device, "placed submodel instance");
            out.push(Instance {
                model_name: spec.name.clone(),
                instance_name,
                device,
                queue_device,
                artifact: spec.artifact.clone(),
            });
        }
        Ok(out)
    }

    /// Returns (execution device, queue device).
    fn resolve_placement(
        &self,
        spec: &SubmodelSpec,
        id: &LogicalDeviceId,
        table: &DeviceTable,
    ) -> Result<(DeviceInfo, DeviceInfo)> {
        if !spec.heavy_load {
            let device = table.resolve(id)?;
            let queue_device = match id.proxy {
                Some(p) if !device.is_host() => device.clone().with_proxy_device(p),
                _ => device.clone(),
            };
            return Ok((device, queue_device));
        }

        if id.is_host() {
            return Err(DeployError::param_invalid(format!(
                "heavy-load submodel '{}' must name an accelerator, got '{id}'",
                spec.name
            )));
        }
        let acc = table.resolve(id)?;
        let queue_device = acc.clone().with_proxy_device(id.proxy.unwrap_or(acc.device_id));
        if acc.heavy_load_capable {
            return Ok((acc, queue_device));
        }
        let host = table.host_of(acc.cluster_id, acc.node_id).ok_or_else(|| {
            DeployError::failed(format!(
                "heavy-load submodel '{}' needs a host CPU on node {} of cluster {}",
                spec.name, acc.node_id, acc.cluster_id
            ))
        })?;
        Ok((host.clone(), queue_device))
    }

    fn plan_dynamic_sched(
        &self,
        b: &mut PlanBuilder,
        submodels: &BTreeMap<String, SubmodelPlacement>,
        root_inputs: &[String],
    ) -> DynamicSchedPlan {
        let mut plan = DynamicSchedPlan::default();
        let head = &self.head_device;

        for (instance, sm) in submodels {
            let status = b.add_private_queue(format!("{instance}/status"), &sm.queue_device);
            let collector = b.add_private_queue(format!("{instance}/status"), head);
            plan.status_output_queue_indices.push(status);
            plan.entry_bindings.push(Binding::queues(status, collector));

            let sched_out = b.add_private_queue(format!("{instance}/sched"), head);
            let sched_in = b.add_private_queue(format!("{instance}/sched"), &sm.queue_device);
            plan.sched_output_queue_indices.push(sched_out);
            plan.sched_input_queue_indices.push(sched_in);
            plan.entry_bindings.push(Binding::queues(sched_out, sched_in));

            *plan.model_instance_num.entry(sm.model_name.clone()).or_insert(0) += 1;
        }

        for input in root_inputs {
            let req = b.add_private_queue(format!("{input}/datagw_request"), head);
            let rsp = b.add_private_queue(format!("{input}/datagw_response"), head);
            plan.datagw_request_bindings.push(Binding::queues(req, rsp));
        }

        let names: BTreeSet<&String> = submodels.values().map(|sm| &sm.model_name).collect();
        for (i, name) in names.into_iter().enumerate() {
            plan.model_index_info.insert(name.clone(), i as u32);
        }
        plan
    }
}

/// Wire one endpoint: intra-node hops get a direct binding for 1:1 and a
/// group for fan-out or fan-in; cross-node peers are always reached through
/// an outbound group on the producer and an inbound group on the consumer.
fn route_endpoint(b: &mut PlanBuilder, name: &str, producers: &[usize], consumers: &[usize]) {
    let producers: BTreeSet<usize> = producers.iter().map(|&q| b.canonical(q)).collect();
    let consumers: BTreeSet<usize> = consumers
        .iter()
        .map(|&q| b.canonical(q))
        .filter(|q| !producers.contains(q))
        .collect();
    if producers.is_empty() || consumers.is_empty() {
        return;
    }

    let nodes: BTreeSet<i32> = producers.iter().map(|&q| b.node_of(q)).collect();
    for node in nodes {
        let local_p: Vec<usize> = producers.iter().copied().filter(|&q| b.node_of(q) == node).collect();
        let local_c: Vec<usize> = consumers.iter().copied().filter(|&q| b.node_of(q) == node).collect();
        match (local_p.as_slice(), local_c.as_slice()) {
            (_, []) => {}
            ([p], [c]) => b.bindings.push(Binding::new(EndpointRef::Queue(*p), EndpointRef::Queue(*c), true)),
            ([p], many) => {
                let device = b.queues[*p].device.clone();
                let g = b.add_group(name, &device, many.to_vec());
                b.bindings.push(Binding::new(EndpointRef::Queue(*p), EndpointRef::Group(g), true));
            }
            (many, cs) => {
                for &c in cs {
                    let device = b.queues[c].device.clone();
                    let g = b.add_group(name, &device, many.to_vec());
                    b.bindings.push(Binding::new(EndpointRef::Group(g), EndpointRef::Queue(c), true));
                }
            }
        }
    }

    for &p in &producers {
        let remote: Vec<usize> = consumers.iter().copied().filter(|&c| b.node_of(c) != b.node_of(p)).collect();
        if !remote.is_empty() {
            let device = b.queues[p].device.clone();
            let g = b.add_group(name, &device, remote);
            b.bindings.push(Binding::new(EndpointRef::Queue(p), EndpointRef::Group(g), false));
        }
    }
    for &c in &consumers {
        let remote: Vec<usize> = producers.iter().copied().filter(|&p| b.node_of(p) != b.node_of(c)).collect();
        if !remote.is_empty() {
            let device = b.queues[c].device.clone();
            let g = b.add_group(name, &device, remote);
            b.bindings.push(Binding::new(EndpointRef::Group(g), EndpointRef::Queue(c), false));
        }
    }
    debug!(endpoint = name, producers = producers.len(), consumers = consumers.len(), "routed endpoint");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{make_acc, make_fixture_plan, make_head};
    use crate::flatten::ModelRelationFlattener;
    use flowdeploy_common::{FlowModel, ModelRelation, StatusCode};

    fn flat(model: &FlowModel) -> FlatModel {
        ModelRelationFlattener::new().flatten(model).unwrap()
    }

    fn single(spec: SubmodelSpec) -> FlowModel {
        let rel = ModelRelation::new()
            .with_root(["in"], ["out"])
            .with_submodel(spec.name.clone(), ["in"], ["out"]);
        FlowModel::new("single").with_relation(rel).with_submodel(spec)
    }

    #[test]
    fn test_chain_fixture_counts() {
        let plan = make_fixture_plan(false);
        assert_eq!(plan.queues.len(), 12);
        assert_eq!(plan.groups.len(), 6);
        assert_eq!(plan.bindings.len(), 6);
        assert_eq!(plan.input_queue_indices.len(), 2);
        assert_eq!(plan.output_queue_indices.len(), 1);
        assert!(plan.dynamic_sched_plan.is_none());
        // every hop crosses nodes, so nothing is wired before load
        assert!(plan.bindings.iter().all(|b| !b.before_load));
    }

    #[test]
    fn test_same_device_queues_are_aliased() {
        let plan = make_fixture_plan(false);
        let a = &plan.submodels["A"];
        let b = &plan.submodels["B"];
        let c = &plan.submodels["C"];
        // a2b is written by A and read by B on the same device
        assert_eq!(plan.canonical_queue(b.input_queue_indices[1]), a.output_queue_indices[1]);
        assert_eq!(plan.queues[b.input_queue_indices[1]].ref_index, Some(a.output_queue_indices[1]));
        assert_eq!(plan.canonical_queue(c.input_queue_indices[0]), a.output_queue_indices[0]);
        assert_eq!(plan.queues.iter().filter(|q| q.ref_index.is_some()).count(), 3);
    }

    #[test]
    fn test_ports_preserve_declared_order() {
        let plan = make_fixture_plan(false);
        let b = &plan.submodels["B"];
        let names: Vec<&str> = b.input_queue_indices.iter().map(|&i| plan.queues[i].name.as_str()).collect();
        assert_eq!(names, vec!["in1", "a2b"]);
        let roots: Vec<&str> = plan.input_queue_indices.iter().map(|&i| plan.queues[i].name.as_str()).collect();
        assert_eq!(roots, vec!["in0", "in1"]);
        assert!(plan.input_queue_indices.iter().all(|&i| plan.queues[i].device == make_head()));
    }

    #[test]
    fn test_dynamic_sched_extension() {
        let plan = make_fixture_plan(true);
        assert_eq!(plan.queues.len(), 28);
        let ds = plan.dynamic_sched_plan.as_ref().unwrap();
        assert_eq!(ds.status_output_queue_indices.len(), 3);
        assert_eq!(ds.sched_input_queue_indices.len(), 3);
        assert_eq!(ds.sched_output_queue_indices.len(), 3);
        assert_eq!(ds.entry_bindings.len(), 6);
        assert_eq!(ds.datagw_request_bindings.len(), 2);
        assert_eq!(ds.model_index_info["A"], 0);
        assert_eq!(ds.model_index_info["C"], 2);
        assert_eq!(ds.model_instance_num["B"], 1);
        // routing is unchanged by the extension
        assert_eq!(plan.groups.len(), 6);
        assert_eq!(plan.bindings.len(), 6);
    }

    #[test]
    fn test_single_submodel_io_counts() {
        let model = single(SubmodelSpec::new("only"));
        let plan = HeterogeneousDeployPlanner::new(vec![make_acc(1, 0)], make_head())
            .build_plan(&flat(&model))
            .unwrap();
        assert_eq!(plan.input_queue_indices.len(), 1);
        assert_eq!(plan.output_queue_indices.len(), 1);
        assert_eq!(plan.submodels["only"].input_queue_indices.len(), 1);
    }

    #[test]
    fn test_same_node_fan_out_uses_group() {
        // producer on the head host, two consumers on accelerators of the same node
        let head = make_head();
        let devices = vec![make_acc(0, 0), make_acc(0, 1), head.clone()];
        let rel = ModelRelation::new()
            .with_root(["in"], ["o1", "o2"])
            .with_submodel("L", ["in"], ["o1"])
            .with_submodel("R", ["in"], ["o2"]);
        let model = FlowModel::new("fan")
            .with_relation(rel)
            .with_submodel(SubmodelSpec::new("L").with_logical_device_id("0:0:0"))
            .with_submodel(SubmodelSpec::new("R").with_logical_device_id("0:0:1"));
        let plan = HeterogeneousDeployPlanner::new(devices, head)
            .build_plan(&flat(&model))
            .unwrap();

        let fan_out: Vec<&Binding> = plan
            .bindings
            .iter()
            .filter(|b| b.src == EndpointRef::Queue(plan.input_queue_indices[0]))
            .collect();
        assert_eq!(fan_out.len(), 1);
        assert!(fan_out[0].before_load);
        let EndpointRef::Group(g) = fan_out[0].dst else {
            panic!("expected a group");
        };
        assert_eq!(plan.groups[g].members.len(), 2);
        // the outputs are 1:1 hops back to the head
        assert_eq!(plan.bindings.iter().filter(|b| matches!((b.src, b.dst), (EndpointRef::Queue(_), EndpointRef::Queue(_)))).count(), 2);
    }

    /// L and R both read the root input and both write the root output.
    fn make_fan_in(l: &str, r: &str) -> FlowModel {
        let rel = ModelRelation::new()
            .with_root(["in"], ["out"])
            .with_submodel("L", ["in"], ["out"])
            .with_submodel("R", ["in"], ["out"]);
        FlowModel::new("fan-in")
            .with_relation(rel)
            .with_submodel(SubmodelSpec::new("L").with_logical_device_id(l))
            .with_submodel(SubmodelSpec::new("R").with_logical_device_id(r))
    }

    fn make_pair(a: &str, b: &str) -> FlowModel {
        let rel = ModelRelation::new()
            .with_root(["in"], ["out"])
            .with_submodel("A", ["in"], ["mid"])
            .with_submodel("B", ["mid"], ["out"]);
        FlowModel::new("pair")
            .with_relation(rel)
            .with_submodel(SubmodelSpec::new("A").with_logical_device_id(a))
            .with_submodel(SubmodelSpec::new("B").with_logical_device_id(b))
    }

    fn bindings_into(plan: &DeployPlan, queue: usize) -> Vec<&Binding> {
        plan.bindings
            .iter()
            .filter(|b| b.dst == EndpointRef::Queue(queue))
            .collect()
    }

    #[test]
    fn test_same_node_fan_in_uses_group() {
        let head = make_head();
        let devices = vec![make_acc(0, 0), make_acc(0, 1), head.clone()];
        let plan = HeterogeneousDeployPlanner::new(devices, head)
            .build_plan(&flat(&make_fan_in("0:0:0", "0:0:1")))
            .unwrap();

        let out = plan.output_queue_indices[0];
        let into_out = bindings_into(&plan, out);
        assert_eq!(into_out.len(), 1);
        assert!(into_out[0].before_load);
        let EndpointRef::Group(g) = into_out[0].src else {
            panic!("expected a group");
        };
        let mut members = plan.groups[g].members.clone();
        members.sort_unstable();
        let mut producers = vec![
            plan.submodels["L"].output_queue_indices[0],
            plan.submodels["R"].output_queue_indices[0],
        ];
        producers.sort_unstable();
        assert_eq!(members, producers);
        assert_eq!(plan.groups[g].device, make_head());
        // one group fans the input out, one fans the outputs in
        assert_eq!(plan.groups.len(), 2);
        assert!(plan.bindings.iter().all(|b| b.before_load));
    }

    #[test]
    fn test_mixed_fan_in_splits_local_and_remote() {
        // L shares node 0 with the head, R sits on node 1
        let head = make_head();
        let devices = vec![make_acc(0, 0), make_acc(1, 0), head.clone()];
        let plan = HeterogeneousDeployPlanner::new(devices, head)
            .build_plan(&flat(&make_fan_in("0:0:0", "0:1:0")))
            .unwrap();
        assert_eq!(plan.submodels["R"].device.node_id, 1);

        let out = plan.output_queue_indices[0];
        let l_out = plan.submodels["L"].output_queue_indices[0];
        let r_out = plan.submodels["R"].output_queue_indices[0];
        let into_out = bindings_into(&plan, out);
        assert_eq!(into_out.len(), 2);

        let local = into_out
            .iter()
            .find(|b| b.src == EndpointRef::Queue(l_out))
            .unwrap();
        assert!(local.before_load);

        let remote = into_out
            .iter()
            .find(|b| matches!(b.src, EndpointRef::Group(_)))
            .unwrap();
        assert!(!remote.before_load);
        let EndpointRef::Group(g) = remote.src else {
            unreachable!()
        };
        assert_eq!(plan.groups[g].members, vec![r_out]);

        let from_r: Vec<&Binding> = plan
            .bindings
            .iter()
            .filter(|b| b.src == EndpointRef::Queue(r_out))
            .collect();
        assert_eq!(from_r.len(), 1);
        assert!(matches!(from_r[0].dst, EndpointRef::Group(_)));
        assert!(!from_r[0].before_load);
    }

    #[test]
    fn test_node_id_shared_across_clusters_rejected() {
        let other_cluster = DeviceInfo::accelerator(1, 0, 0, vec![0], "Ascend");
        let devices = vec![make_acc(0, 0), other_cluster];
        let err = HeterogeneousDeployPlanner::new(devices, make_head())
            .build_plan(&flat(&make_pair("0:0:0", "1:0:0")))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::ParamInvalid);

        // a distinct node id in the second cluster routes across nodes
        let devices = vec![make_acc(0, 0), DeviceInfo::accelerator(1, 7, 0, vec![0], "Ascend")];
        let plan = HeterogeneousDeployPlanner::new(devices, make_head())
            .build_plan(&flat(&make_pair("0:0:0", "1:0:0")))
            .unwrap();
        assert_eq!(plan.participating_nodes(), BTreeSet::from([0, 7]));
        let a_mid = plan.submodels["A"].output_queue_indices[0];
        let b_mid = plan.submodels["B"].input_queue_indices[0];
        assert!(plan
            .bindings
            .iter()
            .all(|b| !(b.src == EndpointRef::Queue(a_mid) && b.dst == EndpointRef::Queue(b_mid))));
        assert!(plan
            .bindings
            .iter()
            .any(|b| b.src == EndpointRef::Queue(a_mid) && !b.before_load));
    }

    #[test]
    fn test_multiple_ids_create_instances() {
        let devices = vec![make_acc(1, 0), make_acc(1, 1)];
        let model = single(SubmodelSpec::new("m").with_logical_device_id("[0:0, 0:1]"));
        let plan = HeterogeneousDeployPlanner::new(devices, make_head())
            .build_plan(&flat(&model))
            .unwrap();
        assert_eq!(plan.submodels.keys().collect::<Vec<_>>(), vec!["m@0", "m@1"]);
        assert_ne!(plan.submodels["m@0"].device, plan.submodels["m@1"].device);
    }

    #[test]
    fn test_default_device_needs_single_device() {
        let model = single(SubmodelSpec::new("m"));
        let err = HeterogeneousDeployPlanner::new(vec![make_acc(1, 0), make_acc(1, 1)], make_head())
            .build_plan(&flat(&model))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::ParamInvalid);
    }

    #[test]
    fn test_resource_type_mismatch_fails() {
        let model = single(SubmodelSpec::new("m").with_resource_type("GPU"));
        let err = HeterogeneousDeployPlanner::new(vec![make_acc(1, 0)], make_head())
            .build_plan(&flat(&model))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::Failed);
    }

    #[test]
    fn test_malformed_device_id_is_param_invalid() {
        let model = single(SubmodelSpec::new("m").with_logical_device_id("[a:b , 2:2]"));
        let err = HeterogeneousDeployPlanner::new(vec![make_acc(1, 0)], make_head())
            .build_plan(&flat(&model))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::ParamInvalid);
    }

    #[test]
    fn test_heavy_load_needs_device_id() {
        let model = single(SubmodelSpec::new("udf").with_heavy_load(true));
        let devices = vec![make_acc(1, 0), DeviceInfo::host(0, 1, "X86")];
        let err = HeterogeneousDeployPlanner::new(devices, make_head())
            .build_plan(&flat(&model))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::Failed);
    }

    #[test]
    fn test_heavy_load_with_proxy_succeeds() {
        let model = single(
            SubmodelSpec::new("udf")
                .with_heavy_load(true)
                .with_resource_type("X86")
                .with_logical_device_id("0:0:0:1"),
        );
        let devices = vec![make_acc(1, 0), make_acc(1, 1), DeviceInfo::host(0, 1, "X86")];
        let plan = HeterogeneousDeployPlanner::new(devices, make_head())
            .build_plan(&flat(&model))
            .unwrap();
        let udf = &plan.submodels["udf"];
        assert!(udf.queue_device.with_proxy());
        assert_eq!(udf.queue_device.proxy_device_id, Some(1));
        assert!(udf.device.is_host());
        assert_eq!(udf.device.node_id, 1);
    }

    #[test]
    fn test_heavy_load_on_capable_device_stays_resident() {
        let model = single(
            SubmodelSpec::new("udf")
                .with_heavy_load(true)
                .with_logical_device_id("0:0:0"),
        );
        let devices = vec![make_acc(1, 0).with_heavy_load_capable(true)];
        let plan = HeterogeneousDeployPlanner::new(devices, make_head())
            .build_plan(&flat(&model))
            .unwrap();
        let udf = &plan.submodels["udf"];
        assert!(!udf.device.is_host());
        assert!(udf.queue_device.with_proxy());
    }

    #[test]
    fn test_heavy_load_errors() {
        let host_id = single(
            SubmodelSpec::new("udf")
                .with_heavy_load(true)
                .with_logical_device_id("0:0:-1"),
        );
        let devices = vec![make_acc(1, 0), DeviceInfo::host(0, 1, "X86")];
        let err = HeterogeneousDeployPlanner::new(devices, make_head())
            .build_plan(&flat(&host_id))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::ParamInvalid);

        let no_host = single(
            SubmodelSpec::new("udf")
                .with_heavy_load(true)
                .with_logical_device_id("0:0:0:0"),
        );
        let err = HeterogeneousDeployPlanner::new(vec![make_acc(1, 0)], make_head())
            .build_plan(&flat(&no_host))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::Failed);
    }

    #[test]
    fn test_empty_relation_rejected() {
        let model = FlatModel {
            name: "empty".into(),
            relation: ModelRelation::new(),
            submodels: BTreeMap::new(),
            dynamic_sched: false,
        };
        let err = HeterogeneousDeployPlanner::new(vec![make_acc(1, 0)], make_head())
            .build_plan(&model)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::ParamInvalid);
    }
}
