//! Which global resources every user function touches, directly or through its callees.
//!
//! Backends without global resource scope (Metal, and D3D for the entry point aggregates) pass
//! these resources to every function explicitly, so each function signature needs the closure
//! of what its call tree reads and writes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::trace;

use crate::ast::{ExpressionKind, NodeKind, ProgramAst, StorageQualifier, VarId, UNRESOLVED};
use crate::common::{ShaderUniform, UniformGroup};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalUsage {
    pub uses_in_attribs: bool,
    pub uses_out_attribs: bool,
    pub used_buffers: BTreeSet<VarId>,
    pub used_samplers: BTreeSet<VarId>,
    pub used_shared: BTreeSet<VarId>,
    pub used_images: BTreeSet<VarId>,
    pub used_inbuilts: BTreeSet<VarId>,
    pub used_uniform_groups: BTreeSet<UniformGroup>,
    pub called_functions: BTreeSet<String>,
}

fn merge_set<T: Ord + Clone>(dst: &mut BTreeSet<T>, src: &BTreeSet<T>) -> bool {
    let before = dst.len();
    dst.extend(src.iter().cloned());
    dst.len() != before
}

impl GlobalUsage {
    /// Adds everything `other` uses. Returns true if anything new was added.
    pub fn merge(&mut self, other: &GlobalUsage) -> bool {
        let mut changed = false;
        if other.uses_in_attribs && !self.uses_in_attribs {
            self.uses_in_attribs = true;
            changed = true;
        }
        if other.uses_out_attribs && !self.uses_out_attribs {
            self.uses_out_attribs = true;
            changed = true;
        }
        changed |= merge_set(&mut self.used_buffers, &other.used_buffers);
        changed |= merge_set(&mut self.used_samplers, &other.used_samplers);
        changed |= merge_set(&mut self.used_shared, &other.used_shared);
        changed |= merge_set(&mut self.used_images, &other.used_images);
        changed |= merge_set(&mut self.used_inbuilts, &other.used_inbuilts);
        changed |= merge_set(&mut self.used_uniform_groups, &other.used_uniform_groups);
        changed |= merge_set(&mut self.called_functions, &other.called_functions);
        changed
    }

    pub fn uses_uniform_group(&self, group: UniformGroup) -> bool {
        self.used_uniform_groups.contains(&group)
    }
}

/// Direct usage of a single function body.
fn direct_usage(
    ast: &ProgramAst,
    body: &NodeKind,
    user_functions: &BTreeSet<String>,
    inbuilts: &BTreeSet<VarId>,
    uniform_groups: &BTreeMap<&str, UniformGroup>,
) -> GlobalUsage {
    let mut usage = GlobalUsage::default();
    let mut visit = |_: u32, e: &crate::ast::Expression| match &e.kind {
        ExpressionKind::FunctionCall { name, .. } => {
            if user_functions.contains(name) {
                usage.called_functions.insert(name.clone());
            }
        }
        ExpressionKind::Variable(id) if *id != UNRESOLVED => {
            let v = ast.var(*id);
            match v.storage {
                StorageQualifier::Out => usage.uses_out_attribs = true,
                StorageQualifier::In => usage.uses_in_attribs = true,
                StorageQualifier::Uniform => {
                    if v.ty.base_type().is_sampler() {
                        usage.used_samplers.insert(*id);
                    } else if let Some(g) = uniform_groups.get(v.orig_name.as_str()) {
                        usage.used_uniform_groups.insert(*g);
                    }
                }
                StorageQualifier::Buffer => {
                    usage.used_buffers.insert(*id);
                }
                StorageQualifier::Shared => {
                    usage.used_shared.insert(*id);
                }
                StorageQualifier::Default => {
                    if v.ty.is_image() {
                        usage.used_images.insert(*id);
                    }
                    if inbuilts.contains(id) {
                        usage.used_inbuilts.insert(*id);
                    }
                }
                StorageQualifier::Const => {}
            }
        }
        _ => {}
    };
    if let NodeKind::Function(f) = body {
        for n in &f.body {
            ast.walk_node_expressions(n, &mut visit);
        }
    }
    usage
}

/// Computes the [GlobalUsage] of every user function except `main`, closed over the call graph.
///
/// Propagation runs as a worklist over reverse call edges: when a function's usage grows, only
/// its callers are revisited.
pub fn collect_global_usage(
    ast: &ProgramAst,
    uniform_info: &[ShaderUniform],
) -> BTreeMap<String, GlobalUsage> {
    let uniform_groups: BTreeMap<&str, UniformGroup> = uniform_info
        .iter()
        .map(|u| (u.name.as_str(), u.group))
        .collect();
    let inbuilts: BTreeSet<VarId> = ast
        .inbuilts
        .passed_to_functions(ast.stage)
        .into_iter()
        .collect();

    let functions: Vec<(&String, &NodeKind)> = ast
        .root
        .iter()
        .filter_map(|n| {
            n.as_function()
                .map(|f| (&ast.functions[f.id as usize].name, &n.kind))
        })
        .collect();
    let user_functions: BTreeSet<String> = functions.iter().map(|(name, _)| (*name).clone()).collect();

    let mut usage: BTreeMap<String, GlobalUsage> = BTreeMap::new();
    for (name, body) in &functions {
        if name.as_str() == "main" {
            continue;
        }
        let u = direct_usage(ast, body, &user_functions, &inbuilts, &uniform_groups);
        usage
            .entry((*name).clone())
            .or_default()
            .merge(&u);
    }

    let mut callers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (caller, u) in &usage {
        for callee in &u.called_functions {
            callers
                .entry(callee.clone())
                .or_default()
                .insert(caller.clone());
        }
    }

    let mut worklist: VecDeque<String> = usage.keys().cloned().collect();
    let mut rounds = 0usize;
    while let Some(callee) = worklist.pop_front() {
        rounds += 1;
        let callee_usage = match usage.get(&callee) {
            Some(u) => u.clone(),
            None => continue,
        };
        let Some(cs) = callers.get(&callee) else {
            continue;
        };
        for caller in cs {
            if let Some(u) = usage.get_mut(caller) {
                if u.merge(&callee_usage) && !worklist.contains(caller) {
                    worklist.push_back(caller.clone());
                }
            }
        }
    }
    trace!(
        "global usage of {} functions settled after {} worklist steps",
        usage.len(),
        rounds
    );
    usage
}
