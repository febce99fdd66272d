use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use flowdeploy_common::{
    Binding, DeployError, DeployPlan, DeviceInfo, EndpointDesc, EndpointDescKind, EndpointRef,
    FlowRoutePlan, Result, RouteBinding,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::reindex::ensure_unique_node_ids;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanAttrs {
    /// Treat group members as an unordered set instead of an ordered fan list.
    #[serde(default)]
    pub keep_out_of_order: bool,
}

fn rank_key(device: &DeviceInfo) -> String {
    format!("{}|{}", device.cluster_id, device.key())
}

/// Communication-fabric ranks of devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankTable {
    ranks: BTreeMap<String, u32>,
}

impl RankTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dense ranks in device order.
    pub fn dense(devices: &[DeviceInfo]) -> Self {
        let sorted: BTreeSet<DeviceInfo> = devices.iter().map(DeviceInfo::without_proxy).collect();
        let mut table = Self::new();
        for d in &sorted {
            let next = table.ranks.len() as u32;
            table.ranks.entry(rank_key(d)).or_insert(next);
        }
        table
    }

    pub fn insert(&mut self, device: &DeviceInfo, rank: u32) {
        self.ranks.insert(rank_key(device), rank);
    }

    pub fn device_rank_id(&self, device: &DeviceInfo) -> Result<u32> {
        self.ranks.get(&rank_key(device)).copied().ok_or_else(|| {
            DeployError::failed(format!("no communication rank for device {device}"))
        })
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

/// Stable tag ids for one deployment, shared by every node's plan so both
/// ends of a hop agree on the id.
#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    ids: BTreeMap<String, u64>,
}

impl TagRegistry {
    pub fn tag_id_by_name(&mut self, name: &str) -> u64 {
        let next = self.ids.len() as u64;
        *self.ids.entry(name.to_string()).or_insert(next)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A plan together with the per-node descriptors resolved from it.
#[derive(Debug, Clone)]
pub struct DeployState {
    pub model_id: String,
    pub plan: DeployPlan,
    pub tags: TagRegistry,
    pub route_plans: BTreeMap<i32, FlowRoutePlan>,
}

impl DeployState {
    pub fn new(model_id: impl Into<String>, plan: DeployPlan) -> Self {
        Self {
            model_id: model_id.into(),
            plan,
            tags: TagRegistry::default(),
            route_plans: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupDirection {
    /// Members produce into the group, which feeds a local queue.
    Inbound,
    /// A local queue feeds the group, members consume.
    Outbound,
}

pub struct FlowRoutePlanner<'a> {
    ranks: &'a RankTable,
}

struct NodeRoute<'p> {
    plan: &'p DeployPlan,
    node_id: i32,
    endpoints: Vec<EndpointDesc>,
    queue_pos: BTreeMap<usize, usize>,
    group_pos: BTreeMap<usize, usize>,
    tag_pos: BTreeMap<String, usize>,
}

impl<'p> NodeRoute<'p> {
    fn canonical_group(&self, index: usize) -> usize {
        self.plan
            .groups
            .get(index)
            .and_then(|g| g.ref_index)
            .unwrap_or(index)
    }

    fn canonical(&self, endpoint: EndpointRef) -> EndpointRef {
        match endpoint {
            EndpointRef::Queue(i) => EndpointRef::Queue(self.plan.canonical_queue(i)),
            EndpointRef::Group(i) => EndpointRef::Group(self.canonical_group(i)),
        }
    }

    fn local_position(&self, endpoint: EndpointRef) -> Option<usize> {
        match endpoint {
            EndpointRef::Queue(i) => self.queue_pos.get(&i).copied(),
            EndpointRef::Group(i) => self.group_pos.get(&i).copied(),
        }
    }

    fn endpoint_name(&self, endpoint: EndpointRef) -> &str {
        match endpoint {
            EndpointRef::Queue(i) => self.plan.queues.get(i).map(|q| q.name.as_str()),
            EndpointRef::Group(i) => self.plan.groups.get(i).map(|g| g.name.as_str()),
        }
        .unwrap_or("")
    }

    fn tag(
        &mut self,
        name: String,
        local: &DeviceInfo,
        peer: &DeviceInfo,
        tags: &mut TagRegistry,
        ranks: &RankTable,
    ) -> Result<usize> {
        if let Some(&pos) = self.tag_pos.get(&name) {
            return Ok(pos);
        }
        let desc = EndpointDesc {
            name: name.clone(),
            kind: EndpointDescKind::Tag {
                tag_id: tags.tag_id_by_name(&name),
                local_rank: ranks.device_rank_id(local)?,
                peer_rank: ranks.device_rank_id(peer)?,
                peer_device_key: peer.key(),
            },
        };
        let pos = self.endpoints.len();
        self.endpoints.push(desc);
        self.tag_pos.insert(name, pos);
        Ok(pos)
    }
}

fn tag_name(endpoint: &str, src: &DeviceInfo, dst: &DeviceInfo) -> String {
    format!("{endpoint}:{}->{}", src.key(), dst.key())
}

impl<'a> FlowRoutePlanner<'a> {
    pub fn new(ranks: &'a RankTable) -> Self {
        Self { ranks }
    }

    /// Resolve a descriptor for every node taking part in the plan.
    pub fn resolve_flow_route_plans(&self, state: &mut DeployState, attrs: PlanAttrs) -> Result<()> {
        let plan = &state.plan;
        ensure_unique_node_ids(
            plan.queues
                .iter()
                .map(|q| &q.device)
                .chain(plan.groups.iter().map(|g| &g.device))
                .chain(plan.submodels.values().flat_map(|sm| [&sm.device, &sm.queue_device])),
        )?;

        let mut resolved = BTreeMap::new();
        for node_id in state.plan.participating_nodes() {
            let plan = self.resolve_flow_route_plan(&state.plan, node_id, attrs, &mut state.tags)?;
            resolved.insert(node_id, plan);
        }
        debug!(model_id = %state.model_id, nodes = resolved.len(), tags = state.tags.len(), "resolved flow route plans");
        state.route_plans = resolved;
        Ok(())
    }

    /// Project `plan` onto one node. A node that owns nothing gets an empty plan.
    pub fn resolve_flow_route_plan(
        &self,
        plan: &DeployPlan,
        node_id: i32,
        attrs: PlanAttrs,
        tags: &mut TagRegistry,
    ) -> Result<FlowRoutePlan> {
        let mut route = NodeRoute {
            plan,
            node_id,
            endpoints: Vec::new(),
            queue_pos: BTreeMap::new(),
            group_pos: BTreeMap::new(),
            tag_pos: BTreeMap::new(),
        };

        for (i, q) in plan.queues.iter().enumerate() {
            if q.device.node_id != node_id || plan.canonical_queue(i) != i {
                continue;
            }
            route.queue_pos.insert(i, route.endpoints.len());
            route.endpoints.push(EndpointDesc {
                name: q.name.clone(),
                kind: EndpointDescKind::Queue {
                    queue_index: i,
                    depth: q.depth,
                    enqueue_policy: q.enqueue_policy,
                    device_key: q.device.key(),
                },
            });
        }

        let mut directions: BTreeMap<usize, GroupDirection> = BTreeMap::new();
        for b in &plan.bindings {
            if let EndpointRef::Group(g) = b.src {
                directions.insert(route.canonical_group(g), GroupDirection::Inbound);
            }
            if let EndpointRef::Group(g) = b.dst {
                directions.insert(route.canonical_group(g), GroupDirection::Outbound);
            }
        }

        for (gi, group) in plan.groups.iter().enumerate() {
            if group.device.node_id != node_id || route.canonical_group(gi) != gi {
                continue;
            }
            let direction = directions.get(&gi).copied().unwrap_or(GroupDirection::Outbound);
            let mut members = Vec::with_capacity(group.members.len());
            for &m in &group.members {
                let mc = plan.canonical_queue(m);
                if let Some(&pos) = route.queue_pos.get(&mc) {
                    members.push(pos);
                    continue;
                }
                let peer = &plan
                    .queues
                    .get(mc)
                    .ok_or_else(|| DeployError::failed(format!("group '{}' names unknown queue {mc}", group.name)))?
                    .device;
                let name = match direction {
                    GroupDirection::Inbound => tag_name(&group.name, peer, &group.device),
                    GroupDirection::Outbound => tag_name(&group.name, &group.device, peer),
                };
                members.push(route.tag(name, &group.device, peer, tags, self.ranks)?);
            }
            if attrs.keep_out_of_order {
                members.sort_unstable();
                members.dedup();
            }
            route.group_pos.insert(gi, route.endpoints.len());
            route.endpoints.push(EndpointDesc {
                name: group.name.clone(),
                kind: EndpointDescKind::Group {
                    members,
                    ordered: !attrs.keep_out_of_order,
                },
            });
        }

        let mut all_bindings: Vec<Binding> = plan.bindings.clone();
        if let Some(ds) = &plan.dynamic_sched_plan {
            all_bindings.extend(ds.entry_bindings.iter().copied());
            all_bindings.extend(ds.datagw_request_bindings.iter().copied());
        }

        let mut bindings = Vec::new();
        let mut bindings_before_load = Vec::new();
        for b in &all_bindings {
            let src = route.canonical(b.src);
            let dst = route.canonical(b.dst);
            let (Some(src_dev), Some(dst_dev)) = (plan.endpoint_device(src), plan.endpoint_device(dst)) else {
                return Err(DeployError::failed(format!("binding {} -> {} names an unknown endpoint", b.src, b.dst)));
            };
            let src_local = src_dev.node_id == node_id;
            let dst_local = dst_dev.node_id == node_id;
            if !src_local && !dst_local {
                continue;
            }

            let name = tag_name(route.endpoint_name(src), src_dev, dst_dev);
            let src_pos = if src_local {
                route.local_position(src)
            } else {
                Some(route.tag(name.clone(), dst_dev, src_dev, tags, self.ranks)?)
            };
            let dst_pos = if dst_local {
                route.local_position(dst)
            } else {
                Some(route.tag(name, src_dev, dst_dev, tags, self.ranks)?)
            };
            let (Some(src), Some(dst)) = (src_pos, dst_pos) else {
                return Err(DeployError::failed(format!(
                    "binding {} -> {} has no local endpoint on node {node_id}",
                    b.src, b.dst
                )));
            };

            let rb = RouteBinding { src, dst };
            if b.before_load {
                bindings_before_load.push(rb);
            } else {
                bindings.push(rb);
            }
        }

        debug!(
            node_id = route.node_id,
            endpoints = route.endpoints.len(),
            bindings = bindings.len(),
            bindings_before_load = bindings_before_load.len(),
            "resolved flow route plan"
        );

        Ok(FlowRoutePlan {
            node_id,
            endpoints: route.endpoints,
            bindings,
            bindings_before_load,
        })
    }
}

/// Human-readable dump of a node's descriptor.
pub fn print_flow_route_plan(plan: &FlowRoutePlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "flow route plan of node {}: {} endpoints, {} bindings, {} before load",
        plan.node_id,
        plan.endpoints.len(),
        plan.bindings.len(),
        plan.bindings_before_load.len()
    );
    let mut printed = BTreeSet::new();
    for i in 0..plan.endpoints.len() {
        print_endpoint_desc(plan, i, 1, &mut printed, &mut out);
    }
    let label = |i: usize| {
        plan.endpoints
            .get(i)
            .map(|e| format!("#{i} {}", e.name))
            .unwrap_or_else(|| format!("#{i} <missing>"))
    };
    for b in &plan.bindings_before_load {
        let _ = writeln!(out, "  bind (before load) {} -> {}", label(b.src), label(b.dst));
    }
    for b in &plan.bindings {
        let _ = writeln!(out, "  bind {} -> {}", label(b.src), label(b.dst));
    }
    out
}

/// Print one endpoint, expanding group members. Endpoints already in
/// `printed` are only referenced.
pub fn print_endpoint_desc(
    plan: &FlowRoutePlan,
    index: usize,
    depth: usize,
    printed: &mut BTreeSet<usize>,
    out: &mut String,
) {
    let pad = "  ".repeat(depth);
    let Some(desc) = plan.endpoints.get(index) else {
        let _ = writeln!(out, "{pad}#{index} <missing>");
        return;
    };
    if !printed.insert(index) {
        if depth > 1 {
            let _ = writeln!(out, "{pad}#{index} {} (see above)", desc.name);
        }
        return;
    }
    match &desc.kind {
        EndpointDescKind::Queue {
            queue_index,
            depth: queue_depth,
            enqueue_policy,
            device_key,
        } => {
            let _ = writeln!(
                out,
                "{pad}#{index} queue {} [q{queue_index}] depth={queue_depth} policy={} device={device_key}",
                desc.name,
                enqueue_policy.as_str()
            );
        }
        EndpointDescKind::Tag {
            tag_id,
            local_rank,
            peer_rank,
            peer_device_key,
        } => {
            let _ = writeln!(
                out,
                "{pad}#{index} tag {} id={tag_id} rank {local_rank}->{peer_rank} peer={peer_device_key}",
                desc.name
            );
        }
        EndpointDescKind::Group { members, ordered } => {
            let _ = writeln!(
                out,
                "{pad}#{index} group {} ordered={ordered} members={}",
                desc.name,
                members.len()
            );
            for &m in members {
                print_endpoint_desc(plan, m, depth + 1, printed, out);
            }
        }
    }
}
