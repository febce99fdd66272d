use std::collections::{BTreeMap, BTreeSet};

use flowdeploy_common::{
    DeployError, Endpoint, FlowModel, ModelRelation, Result, SubmodelEndpointInfo, SubmodelSpec,
};
use tracing::debug;

/// A flow model with every wrapper expanded: one relation entry per leaf
/// submodel, and no nested models left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatModel {
    pub name: String,
    pub relation: ModelRelation,
    pub submodels: BTreeMap<String, SubmodelSpec>,
    pub dynamic_sched: bool,
}

/// Expands nested submodels depth-first into a single relation.
///
/// A wrapper's inner root inputs and outputs are bridged positionally onto the
/// wrapper's ports in the parent. Names internal to a wrapper keep their name
/// unless it is already taken in the flat namespace, in which case they become
/// `{wrapper path}/{name}`.
#[derive(Debug, Clone, Default)]
pub struct ModelRelationFlattener {
    max_depth: Option<usize>,
}

#[derive(Default)]
struct Accumulator {
    used_names: BTreeSet<String>,
    endpoints: Vec<Endpoint>,
    leaf_names: BTreeSet<String>,
    infos: BTreeMap<String, SubmodelEndpointInfo>,
    submodels: BTreeMap<String, SubmodelSpec>,
    external_inputs: Vec<String>,
}

impl Accumulator {
    fn add_endpoint(&mut self, endpoint: Endpoint) {
        match self.endpoints.iter().find(|e| e.name == endpoint.name) {
            Some(existing) if existing != &endpoint => {
                debug!(endpoint = %endpoint.name, "conflicting endpoint definition, keeping outer one");
            }
            Some(_) => {}
            None => self.endpoints.push(endpoint),
        }
    }

    fn claim_internal(&mut self, name: &str, path: &str) -> String {
        let mut flat = if self.used_names.contains(name) {
            format!("{path}/{name}")
        } else {
            name.to_string()
        };
        let mut n = 1;
        while self.used_names.contains(&flat) {
            flat = format!("{path}/{name}#{n}");
            n += 1;
        }
        self.used_names.insert(flat.clone());
        flat
    }
}

impl ModelRelationFlattener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deepest submodel level accepted; the root's own submodels are level 1.
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn flatten(&self, root: &FlowModel) -> Result<FlatModel> {
        let relation = root.relation.as_ref().ok_or_else(|| {
            DeployError::param_invalid(format!("model '{}' has no relation", root.name))
        })?;

        let mut acc = Accumulator::default();
        let mut names = BTreeMap::new();
        for name in relation.referenced_names() {
            acc.used_names.insert(name.clone());
            names.insert(name.clone(), name);
        }
        for ep in &relation.endpoints {
            acc.used_names.insert(ep.name.clone());
            acc.add_endpoint(ep.clone());
        }
        for spec in root.submodels.iter().filter(|s| !s.is_wrapper()) {
            if !acc.leaf_names.insert(spec.name.clone()) {
                return Err(DeployError::param_invalid(format!(
                    "duplicate submodel '{}' in model '{}'",
                    spec.name, root.name
                )));
            }
        }

        self.expand(root, relation, &names, "", 1, None, &mut acc)?;

        let mut flat_root = relation.root.clone();
        for ext in acc.external_inputs {
            if !flat_root.external_input_queue_names.contains(&ext) {
                flat_root.external_input_queue_names.push(ext);
            }
        }

        debug!(
            model = %root.name,
            submodels = acc.submodels.len(),
            endpoints = acc.endpoints.len(),
            "flattened model relation"
        );

        Ok(FlatModel {
            name: root.name.clone(),
            relation: ModelRelation {
                root: flat_root,
                submodels: acc.infos,
                endpoints: acc.endpoints,
            },
            submodels: acc.submodels,
            dynamic_sched: root.dynamic_sched,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn expand(
        &self,
        model: &FlowModel,
        relation: &ModelRelation,
        names: &BTreeMap<String, String>,
        path: &str,
        depth: usize,
        inherited: Option<&SubmodelSpec>,
        acc: &mut Accumulator,
    ) -> Result<()> {
        let flat_name = |n: &String| names.get(n).cloned().unwrap_or_else(|| n.clone());

        for spec in &model.submodels {
            let info = relation.submodels.get(&spec.name).ok_or_else(|| {
                DeployError::param_invalid(format!(
                    "submodel '{}' of '{}' is missing from its relation",
                    spec.name, model.name
                ))
            })?;
            let inputs: Vec<String> = info.input_names.iter().map(flat_name).collect();
            let outputs: Vec<String> = info.output_names.iter().map(flat_name).collect();

            let spec = inherit(spec, inherited);

            let Some(nested) = spec.nested.as_deref() else {
                let leaf_name = if path.is_empty() {
                    spec.name.clone()
                } else if acc.leaf_names.contains(&spec.name) {
                    format!("{path}/{}", spec.name)
                } else {
                    spec.name.clone()
                };
                acc.leaf_names.insert(leaf_name.clone());
                acc.infos.insert(
                    leaf_name.clone(),
                    SubmodelEndpointInfo {
                        input_names: inputs,
                        output_names: outputs,
                    },
                );
                acc.submodels.insert(
                    leaf_name.clone(),
                    SubmodelSpec {
                        name: leaf_name,
                        ..spec
                    },
                );
                continue;
            };

            if let Some(max) = self.max_depth {
                if depth + 1 > max {
                    return Err(DeployError::unsupported(format!(
                        "submodel '{}' nests deeper than the maximum depth {max}",
                        spec.name
                    )));
                }
            }

            let inner = nested.relation.as_ref().ok_or_else(|| {
                DeployError::param_invalid(format!(
                    "nested submodel '{}' has no relation",
                    spec.name
                ))
            })?;
            if inner.root.input_names.len() != inputs.len()
                || inner.root.output_names.len() != outputs.len()
            {
                return Err(DeployError::param_invalid(format!(
                    "nested submodel '{}' declares {}/{} root ports but is wired with {}/{}",
                    spec.name,
                    inner.root.input_names.len(),
                    inner.root.output_names.len(),
                    inputs.len(),
                    outputs.len()
                )));
            }

            let child_path = if path.is_empty() {
                spec.name.clone()
            } else {
                format!("{path}/{}", spec.name)
            };

            let mut inner_names: BTreeMap<String, String> = BTreeMap::new();
            for (local, outer) in inner.root.input_names.iter().zip(&inputs) {
                inner_names.insert(local.clone(), outer.clone());
            }
            for (local, outer) in inner.root.output_names.iter().zip(&outputs) {
                inner_names.insert(local.clone(), outer.clone());
            }
            for local in inner.referenced_names() {
                if inner_names.contains_key(&local) {
                    continue;
                }
                let flat = acc.claim_internal(&local, &child_path);
                if let Some(ep) = inner.endpoint(&local) {
                    acc.add_endpoint(Endpoint {
                        name: flat.clone(),
                        kind: ep.kind.clone(),
                    });
                }
                inner_names.insert(local, flat);
            }
            for ep in &inner.endpoints {
                if let Some(flat) = inner_names.get(&ep.name) {
                    acc.add_endpoint(Endpoint {
                        name: flat.clone(),
                        kind: ep.kind.clone(),
                    });
                }
            }
            for ext in &inner.root.external_input_queue_names {
                if let Some(flat) = inner_names.get(ext) {
                    acc.external_inputs.push(flat.clone());
                }
            }

            self.expand(
                nested,
                inner,
                &inner_names,
                &child_path,
                depth + 1,
                Some(&spec),
                acc,
            )?;
        }
        Ok(())
    }
}

/// Leaves inherit placement attributes from the wrapper around them.
fn inherit(spec: &SubmodelSpec, wrapper: Option<&SubmodelSpec>) -> SubmodelSpec {
    let mut out = spec.clone();
    if let Some(w) = wrapper {
        if out.resource_type.is_none() {
            out.resource_type = w.resource_type.clone();
        }
        if out.logical_device_id.is_none() {
            out.logical_device_id = w.logical_device_id.clone();
        }
        if out.artifact.is_none() {
            out.artifact = w.artifact.clone();
        }
        out.heavy_load |= w.heavy_load;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::make_chain_model;
    use flowdeploy_common::StatusCode;

    fn wrapper(name: &str, inner_leaf_prefix: &str, depth: usize) -> FlowModel {
        // in -> {p} -> mid -> {q} -> out, where q may itself be a wrapper
        let p = format!("{inner_leaf_prefix}p");
        let q = format!("{inner_leaf_prefix}q");
        let rel = ModelRelation::new()
            .with_root(["in"], ["out"])
            .with_submodel(&p, ["in"], ["mid"])
            .with_submodel(&q, ["mid"], ["out"]);
        let q_spec = if depth > 1 {
            SubmodelSpec::new(&q).with_nested(wrapper(&q, &format!("{q}."), depth - 1))
        } else {
            SubmodelSpec::new(&q)
        };
        FlowModel::new(name)
            .with_relation(rel)
            .with_submodel(SubmodelSpec::new(&p))
            .with_submodel(q_spec)
    }

    fn root_with_wrapper(depth: usize) -> FlowModel {
        let rel = ModelRelation::new()
            .with_root(["a"], ["b"])
            .with_submodel("w", ["a"], ["b"]);
        FlowModel::new("root")
            .with_relation(rel)
            .with_submodel(SubmodelSpec::new("w").with_nested(wrapper("w", "", depth)))
    }

    #[test]
    fn test_single_level_roundtrip() {
        let model = make_chain_model(false);
        let flat = ModelRelationFlattener::new().flatten(&model).unwrap();
        assert_eq!(flat.submodels.len(), 3);
        assert_eq!(flat.relation.submodels.len(), 3);

        let before: BTreeSet<String> = model.relation.as_ref().unwrap().referenced_names().into_iter().collect();
        let after: BTreeSet<String> = flat.relation.referenced_names().into_iter().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_wrapper_ports_bridge_to_parent() {
        let flat = ModelRelationFlattener::new().flatten(&root_with_wrapper(1)).unwrap();
        assert_eq!(flat.submodels.keys().collect::<Vec<_>>(), vec!["p", "q"]);
        assert_eq!(flat.relation.submodels["p"].input_names, vec!["a"]);
        assert_eq!(flat.relation.submodels["p"].output_names, vec!["mid"]);
        assert_eq!(flat.relation.submodels["q"].input_names, vec!["mid"]);
        assert_eq!(flat.relation.submodels["q"].output_names, vec!["b"]);
        assert!(flat.submodels.values().all(|s| s.nested.is_none()));
    }

    #[test]
    fn test_conflicting_internal_name_is_qualified() {
        let rel = ModelRelation::new()
            .with_root(["a"], ["b"])
            .with_submodel("w", ["a"], ["mid"])
            .with_submodel("tail", ["mid"], ["b"]);
        let model = FlowModel::new("root")
            .with_relation(rel)
            .with_submodel(SubmodelSpec::new("w").with_nested(wrapper("w", "", 1)))
            .with_submodel(SubmodelSpec::new("tail"));
        let flat = ModelRelationFlattener::new().flatten(&model).unwrap();
        assert_eq!(flat.relation.submodels["p"].output_names, vec!["w/mid"]);
        assert_eq!(flat.relation.submodels["q"].input_names, vec!["w/mid"]);
        assert_eq!(flat.relation.submodels["q"].output_names, vec!["mid"]);
        assert_eq!(flat.relation.submodels["tail"].input_names, vec!["mid"]);
    }

    #[test]
    fn test_depth_limit() {
        for depth in 1..=3 {
            let model = root_with_wrapper(depth);
            let flat = ModelRelationFlattener::new()
                .with_max_depth(Some(depth + 1))
                .flatten(&model)
                .unwrap();
            assert_eq!(flat.submodels.len(), depth + 1);

            let err = ModelRelationFlattener::new()
                .with_max_depth(Some(depth))
                .flatten(&model)
                .unwrap_err();
            assert_eq!(err.status(), StatusCode::Unsupported);
        }
    }

    #[test]
    fn test_missing_relations_rejected() {
        let err = ModelRelationFlattener::new()
            .flatten(&FlowModel::new("bare").with_submodel(SubmodelSpec::new("a")))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::ParamInvalid);

        let rel = ModelRelation::new()
            .with_root(["a"], ["b"])
            .with_submodel("w", ["a"], ["b"]);
        let model = FlowModel::new("root")
            .with_relation(rel)
            .with_submodel(SubmodelSpec::new("w").with_nested(FlowModel::new("w")));
        let err = ModelRelationFlattener::new().flatten(&model).unwrap_err();
        assert_eq!(err.status(), StatusCode::ParamInvalid);
    }

    #[test]
    fn test_leaf_inherits_wrapper_placement() {
        let rel = ModelRelation::new()
            .with_root(["a"], ["b"])
            .with_submodel("w", ["a"], ["b"]);
        let model = FlowModel::new("root").with_relation(rel).with_submodel(
            SubmodelSpec::new("w")
                .with_logical_device_id("0:0:0")
                .with_nested(wrapper("w", "", 1)),
        );
        let flat = ModelRelationFlattener::new().flatten(&model).unwrap();
        assert_eq!(flat.submodels["p"].logical_device_id.as_deref(), Some("0:0:0"));
    }
}
