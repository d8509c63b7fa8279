//! Global bone table: unifies every source skeleton into one canonical,
//! parent-first joint hierarchy.

mod collapse;
mod hierarchy;
mod realign;

use std::collections::{HashMap, HashSet};

use bitflags::bitflags;
use nalgebra::{UnitQuaternion, Vector3};

use crate::error::{CompileError, CompileResult};
use crate::project::SkeletonSection;
use crate::source::{Source, SourceVertex};
use crate::symbols::{Symbol, SymbolTable};
use crate::transform::{Pose, pose_from_euler, relative_pose};

pub use collapse::{CollapseSet, MergeConflict, MergeOutcome};
pub use hierarchy::{children_of, nearest_ancestor, parent_first_order, reorder_parents};

/// Hard ceiling on joints in a compiled asset.
pub const MAX_BONES: usize = 128;

pub type JointId = usize;

bitflags! {
    /// Why a joint is kept in the table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BoneFlags: u32 {
        const USED_BY_VERTEX = 1 << 0;
        const USED_BY_ATTACHMENT = 1 << 1;
        const USED_BY_HITBOX = 1 << 2;
        const USED_BY_CONSTRAINT = 1 << 3;
        const USED_BY_ANIMATION = 1 << 4;
        const USED_BY_IK_CHAIN = 1 << 5;
        /// Drives a procedural bone.
        const USED_BY_PROCEDURAL = 1 << 6;
        /// Pose computed at run time; no animation channels are stored.
        const PROCEDURAL = 1 << 7;
        /// Imported/locked joint, kept regardless of usage.
        const COLLAPSE_EXEMPT = 1 << 8;

        const USED_BY_ANY = Self::USED_BY_VERTEX.bits()
            | Self::USED_BY_ATTACHMENT.bits()
            | Self::USED_BY_HITBOX.bits()
            | Self::USED_BY_CONSTRAINT.bits()
            | Self::USED_BY_ANIMATION.bits()
            | Self::USED_BY_IK_CHAIN.bits()
            | Self::USED_BY_PROCEDURAL.bits()
            | Self::PROCEDURAL.bits();
    }
}

#[derive(Debug, Clone)]
pub struct Joint {
    pub name: Symbol,
    pub parent: Option<JointId>,
    /// Rest transform relative to the parent joint.
    pub rest: Pose,
    /// Rest transform in model space.
    pub world: Pose,
    /// Rotation applied on top of the source orientation by realignment.
    pub realign: UnitQuaternion<f32>,
    pub flags: BoneFlags,
}

/// How one source's private bone numbering maps onto the table.
#[derive(Debug, Clone, Default)]
pub struct SourceBinding {
    /// Local bone → joint that receives its weights and lookups.
    pub local_to_global: Vec<JointId>,
    /// Local bone → surviving local bone (itself when it survives or when the
    /// survivor is not part of this source).
    pub collapse: Vec<usize>,
    /// Joint → local bone that drives it in this source.
    pub global_to_local: Vec<Option<usize>>,
}

/// Immutable snapshot shared by every downstream stage.
#[derive(Debug, Clone)]
pub struct GlobalBoneTable {
    symbols: SymbolTable,
    joints: Vec<Joint>,
    bindings: Vec<SourceBinding>,
    by_symbol: HashMap<Symbol, JointId>,
    surviving: HashMap<Symbol, JointId>,
    merges: Vec<(Symbol, Symbol)>,
}

impl GlobalBoneTable {
    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn joint(&self, id: JointId) -> &Joint {
        &self.joints[id]
    }

    pub fn name(&self, id: JointId) -> &str {
        self.symbols.name(self.joints[id].name)
    }

    pub fn parent(&self, id: JointId) -> Option<JointId> {
        self.joints[id].parent
    }

    pub fn parents(&self) -> Vec<Option<JointId>> {
        self.joints.iter().map(|joint| joint.parent).collect()
    }

    pub fn world_poses(&self) -> Vec<Pose> {
        self.joints.iter().map(|joint| joint.world).collect()
    }

    /// Joint that carries exactly this name.
    pub fn find(&self, name: &str) -> Option<JointId> {
        let symbol = self.symbols.lookup(name)?;
        self.by_symbol.get(&symbol).copied()
    }

    /// Joint that any known name resolves to after merging and collapsing.
    pub fn resolve_name(&self, name: &str) -> Option<JointId> {
        let symbol = self.symbols.lookup(name)?;
        self.surviving.get(&symbol).copied()
    }

    pub fn binding(&self, source: usize) -> &SourceBinding {
        &self.bindings[source]
    }

    /// Joint receiving a vertex from `source`, chosen by its dominant weight.
    pub fn vertex_joint(&self, source: usize, vertex: &SourceVertex) -> Option<JointId> {
        let local = vertex.dominant_bone()?;
        self.bindings[source].local_to_global.get(local).copied()
    }

    /// Merge directives as `(parent, child)` name pairs.
    pub fn merges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.merges
            .iter()
            .map(|(parent, child)| (self.symbols.name(*parent), self.symbols.name(*child)))
    }
}

// ─── Resolution ───────────────────────────────────────────────────────────────

struct Resolver<'a> {
    sources: &'a [Source],
    symbols: SymbolTable,
    /// Per source, per local bone.
    local_symbols: Vec<Vec<Symbol>>,
    flags: Vec<BoneFlags>,
    imported: HashSet<Symbol>,
    forced: HashSet<Symbol>,
    merges: CollapseSet,
}

impl<'a> Resolver<'a> {
    fn new(sources: &'a [Source], section: &SkeletonSection) -> Self {
        let mut symbols = SymbolTable::new();
        let mut imported = HashSet::new();
        for bone in &section.import_bones {
            imported.insert(symbols.intern(&bone.name));
        }
        let local_symbols: Vec<Vec<Symbol>> = sources
            .iter()
            .map(|source| {
                source
                    .bones
                    .iter()
                    .map(|bone| symbols.intern(&bone.name))
                    .collect()
            })
            .collect();
        let count = symbols.len();

        Self {
            sources,
            symbols,
            local_symbols,
            flags: vec![BoneFlags::empty(); count],
            imported,
            forced: HashSet::new(),
            merges: CollapseSet::new(count),
        }
    }

    fn lookup(&self, name: &str, context: impl FnOnce() -> String) -> CompileResult<Symbol> {
        self.symbols
            .lookup(name)
            .ok_or_else(|| CompileError::UnresolvedBone {
                name: name.to_string(),
                context: context(),
            })
    }

    fn flag(&mut self, symbol: Symbol, flags: BoneFlags) {
        self.flags[symbol.index()] |= flags;
    }

    /// First source (and local index) defining `symbol`.
    fn definition(&self, symbol: Symbol) -> Option<(usize, usize)> {
        self.local_symbols
            .iter()
            .enumerate()
            .find_map(|(source, locals)| {
                locals
                    .iter()
                    .position(|local| *local == symbol)
                    .map(|local| (source, local))
            })
    }

    fn collect_usage(
        &mut self,
        section: &SkeletonSection,
        constraint_joints: &[&str],
    ) -> CompileResult<()> {
        for symbol in self.imported.clone() {
            self.flag(symbol, BoneFlags::COLLAPSE_EXEMPT);
        }

        for (source_index, source) in self.sources.iter().enumerate() {
            let animated = source.animated_bones();
            for vertex in &source.vertices {
                for weight in &vertex.weights {
                    let symbol = self.local_symbols[source_index][weight.bone];
                    self.flag(symbol, BoneFlags::USED_BY_VERTEX);
                }
            }
            for (local, is_animated) in animated.into_iter().enumerate() {
                if is_animated {
                    let symbol = self.local_symbols[source_index][local];
                    self.flag(symbol, BoneFlags::USED_BY_ANIMATION);
                }
            }
        }

        for attachment in &section.attachments {
            let symbol = self.lookup(&attachment.bone, || {
                format!("attachment \"{}\"", attachment.name)
            })?;
            self.flag(symbol, BoneFlags::USED_BY_ATTACHMENT);
        }
        for hitbox in &section.hitboxes {
            let symbol = self.lookup(&hitbox.bone, || format!("hitbox group {}", hitbox.group))?;
            self.flag(symbol, BoneFlags::USED_BY_HITBOX);
        }
        for joint in constraint_joints {
            let symbol = self.lookup(joint, || "a joint constraint".to_string())?;
            self.flag(symbol, BoneFlags::USED_BY_CONSTRAINT);
        }
        for procedural in &section.procedural_bones {
            let symbol = self.lookup(&procedural.bone, || "a procedural bone rule".to_string())?;
            self.flag(symbol, BoneFlags::PROCEDURAL);
            for driver in &procedural.drivers {
                let symbol = self.lookup(driver, || {
                    format!("procedural bone \"{}\"", procedural.bone)
                })?;
                self.flag(symbol, BoneFlags::USED_BY_PROCEDURAL);
            }
        }
        for chain in &section.ik_chains {
            let end = self.lookup(&chain.end, || format!("ik chain \"{}\"", chain.name))?;
            self.flag(end, BoneFlags::USED_BY_IK_CHAIN);
            if let Some((source, local)) = self.definition(end) {
                let parents = self.sources[source].parents();
                let mut cursor = parents[local];
                for _ in 0..2 {
                    let Some(link) = cursor else {
                        break;
                    };
                    let symbol = self.local_symbols[source][link];
                    self.flag(symbol, BoneFlags::USED_BY_IK_CHAIN);
                    cursor = parents[link];
                }
            }
        }

        for name in &section.collapse {
            let symbol = self.lookup(name, || "a collapse directive".to_string())?;
            if self.imported.contains(&symbol) {
                return Err(CompileError::InvalidDirective {
                    reason: format!("imported bone \"{name}\" cannot be collapsed"),
                });
            }
            self.forced.insert(symbol);
        }
        Ok(())
    }

    fn apply_merges(&mut self, section: &SkeletonSection) -> CompileResult<Vec<(Symbol, Symbol)>> {
        let mut applied = Vec::new();
        for directive in &section.merges {
            let child = self.lookup(&directive.child, || "a merge directive".to_string())?;
            let parent = self.lookup(&directive.parent, || "a merge directive".to_string())?;
            if self.imported.contains(&child) {
                return Err(CompileError::InvalidDirective {
                    reason: format!("imported bone \"{}\" cannot be merged", directive.child),
                });
            }
            match self.merges.merge(child.index(), parent.index()) {
                Ok(MergeOutcome::Merged) => {}
                Ok(MergeOutcome::Redundant) => tracing::debug!(
                    "merge of \"{}\" into \"{}\" is already implied",
                    directive.child,
                    directive.parent
                ),
                Err(MergeConflict::Cycle) => {
                    return Err(CompileError::CollapseCycle {
                        child: directive.child.clone(),
                        parent: directive.parent.clone(),
                    });
                }
                Err(MergeConflict::Retargeted { current }) => {
                    return Err(CompileError::InvalidDirective {
                        reason: format!(
                            "\"{}\" is already merged into \"{}\"",
                            directive.child,
                            self.symbols
                                .symbol(current)
                                .map_or("?", |symbol| self.symbols.name(symbol))
                        ),
                    });
                }
            }
            applied.push((parent, child));
        }

        // A merged set carries the union of its members' flags.
        for index in 0..self.flags.len() {
            let root = self.merges.find(index);
            if root != index {
                let flags = self.flags[index];
                self.flags[root] |= flags;
            }
        }
        Ok(applied)
    }

    fn representative(&self, symbol: Symbol) -> Symbol {
        let root = self.merges.root(symbol.index());
        self.symbols.symbol(root).unwrap_or(symbol)
    }

    fn is_retained(&self, symbol: Symbol) -> bool {
        if self.imported.contains(&symbol) {
            return true;
        }
        self.merges.is_representative(symbol.index())
            && !self.forced.contains(&symbol)
            && self.flags[symbol.index()].intersects(BoneFlags::USED_BY_ANY)
    }
}

/// Builds the global bone table from every source plus the script's skeleton
/// directives.
///
/// `constraint_joints` lists joint names referenced by collision constraints;
/// they count as references and must exist in some source.
pub fn resolve(
    sources: &[Source],
    section: &SkeletonSection,
    constraint_joints: &[&str],
) -> CompileResult<GlobalBoneTable> {
    let mut resolver = Resolver::new(sources, section);
    resolver.collect_usage(section, constraint_joints)?;
    let merges = resolver.apply_merges(section)?;

    let representative = |symbol: Symbol| resolver.representative(symbol);

    // Insertion order: imported joints first, then sources in order.
    let mut order: Vec<Symbol> = Vec::new();
    let mut definition: Vec<Option<(usize, usize)>> = Vec::new();
    let mut inserted: HashMap<Symbol, usize> = HashMap::new();
    for bone in &section.import_bones {
        if let Some(symbol) = resolver.symbols.lookup(&bone.name)
            && !inserted.contains_key(&symbol)
        {
            inserted.insert(symbol, order.len());
            order.push(symbol);
            definition.push(None);
        }
    }
    for (source_index, locals) in resolver.local_symbols.iter().enumerate() {
        for (local, symbol) in locals.iter().enumerate() {
            if resolver.is_retained(*symbol) && !inserted.contains_key(symbol) {
                inserted.insert(*symbol, order.len());
                order.push(*symbol);
                definition.push(Some((source_index, local)));
            }
        }
    }
    if order.is_empty() {
        return Err(CompileError::InvalidDirective {
            reason: "no bone is referenced by geometry, animation or directives".to_string(),
        });
    }

    let source_parents: Vec<Vec<Option<usize>>> =
        sources.iter().map(|source| source.parents()).collect();

    // Joint a symbol lands on when it is not itself retained: its merge
    // representative, else the nearest retained ancestor in its first source.
    let surviving_joint = |symbol: Symbol| -> Option<usize> {
        let rep = representative(symbol);
        if let Some(index) = inserted.get(&rep) {
            return Some(*index);
        }
        let (source, local) = resolver.definition(symbol)?;
        let ancestor = nearest_ancestor(local, &source_parents[source], |candidate| {
            inserted.contains_key(&representative(resolver.local_symbols[source][candidate]))
        })?;
        inserted
            .get(&representative(resolver.local_symbols[source][ancestor]))
            .copied()
    };

    // Parents before ordering.
    let mut parents: Vec<Option<usize>> = vec![None; order.len()];
    for (index, symbol) in order.iter().enumerate() {
        parents[index] = match definition[index] {
            None => {
                let import = section
                    .import_bones
                    .iter()
                    .find(|bone| resolver.symbols.lookup(&bone.name) == Some(*symbol));
                match import.and_then(|bone| bone.parent.as_deref()) {
                    Some(parent_name) => {
                        let parent = resolver.lookup(parent_name, || {
                            format!("imported bone \"{}\"", resolver.symbols.name(*symbol))
                        })?;
                        surviving_joint(parent).filter(|parent| *parent != index)
                    }
                    None => None,
                }
            }
            Some((source, local)) => {
                let locals = &resolver.local_symbols[source];
                nearest_ancestor(local, &source_parents[source], |candidate| {
                    let rep = representative(locals[candidate]);
                    rep != *symbol && inserted.contains_key(&rep)
                })
                .and_then(|ancestor| inserted.get(&representative(locals[ancestor])).copied())
            }
        };
    }

    // Every extra parentless joint hangs off the first one.
    let roots: Vec<usize> = (0..order.len()).filter(|i| parents[*i].is_none()).collect();
    if let Some((&root, others)) = roots.split_first() {
        for other in others {
            tracing::debug!(
                "reparenting extra root \"{}\" under \"{}\"",
                resolver.symbols.name(order[*other]),
                resolver.symbols.name(order[root])
            );
            parents[*other] = Some(root);
        }
    }

    let sorted = parent_first_order(&parents).map_err(|stuck| CompileError::CircularHierarchy {
        bone: resolver.symbols.name(order[stuck]).to_string(),
    })?;
    if sorted.len() > MAX_BONES {
        return Err(CompileError::TooManyBones {
            count: sorted.len(),
            limit: MAX_BONES,
        });
    }
    let sorted_parents = reorder_parents(&parents, &sorted);

    let source_worlds: Vec<Vec<Pose>> = sources.iter().map(|source| source.rest_world()).collect();
    let mut joints: Vec<Joint> = Vec::with_capacity(sorted.len());
    for (position, old) in sorted.iter().enumerate() {
        let symbol = order[*old];
        let parent = sorted_parents[position];
        let world = match definition[*old] {
            Some((source, local)) => source_worlds[source][local],
            None => {
                let import = section
                    .import_bones
                    .iter()
                    .find(|bone| resolver.symbols.lookup(&bone.name) == Some(symbol));
                let local = import
                    .map(|bone| {
                        pose_from_euler(
                            Vector3::from(bone.position),
                            Vector3::from(bone.rotation).map(f32::to_radians),
                        )
                    })
                    .unwrap_or_else(Pose::identity);
                match parent {
                    Some(parent) => joints[parent].world * local,
                    None => local,
                }
            }
        };
        let rest = match parent {
            Some(parent) => relative_pose(&joints[parent].world, &world),
            None => world,
        };
        joints.push(Joint {
            name: symbol,
            parent,
            rest,
            world,
            realign: UnitQuaternion::identity(),
            flags: resolver.flags[symbol.index()],
        });
    }

    let mut by_symbol = HashMap::new();
    for (index, joint) in joints.iter().enumerate() {
        by_symbol.insert(joint.name, index);
    }
    let mut new_index = vec![0usize; sorted.len()];
    for (position, old) in sorted.iter().enumerate() {
        new_index[*old] = position;
    }

    let mut surviving: HashMap<Symbol, JointId> = HashMap::new();
    for index in 0..resolver.symbols.len() {
        let Some(symbol) = resolver.symbols.symbol(index) else {
            continue;
        };
        let joint = surviving_joint(symbol).map_or(0, |old| new_index[old]);
        surviving.insert(symbol, joint);
    }

    if section.realign_bones {
        let targets = realign_targets(&joints, section, &surviving, &resolver.symbols)?;
        realign::realign_joints(&mut joints, &targets, &resolver.symbols)?;
    }

    let bindings = sources
        .iter()
        .enumerate()
        .map(|(source_index, source)| {
            let locals = &resolver.local_symbols[source_index];
            let local_to_global: Vec<JointId> = locals
                .iter()
                .map(|symbol| surviving.get(symbol).copied().unwrap_or(0))
                .collect();
            let collapse = local_to_global
                .iter()
                .enumerate()
                .map(|(local, joint)| {
                    source
                        .bone_index(resolver.symbols.name(joints[*joint].name))
                        .unwrap_or(local)
                })
                .collect();
            let mut global_to_local = vec![None; joints.len()];
            for (local, symbol) in locals.iter().enumerate() {
                if let Some(joint) = by_symbol.get(symbol) {
                    global_to_local[*joint] = Some(local);
                }
            }
            SourceBinding {
                local_to_global,
                collapse,
                global_to_local,
            }
        })
        .collect();

    tracing::info!(
        "bone table resolved: {} joints from {} sources ({} merge directives)",
        joints.len(),
        sources.len(),
        merges.len()
    );

    Ok(GlobalBoneTable {
        symbols: resolver.symbols,
        joints,
        bindings,
        by_symbol,
        surviving,
        merges,
    })
}

/// Child each joint should point at: its IK-chain link when it has one,
/// otherwise its only child.
fn realign_targets(
    joints: &[Joint],
    section: &SkeletonSection,
    surviving: &HashMap<Symbol, JointId>,
    symbols: &SymbolTable,
) -> CompileResult<Vec<Option<JointId>>> {
    let parents: Vec<Option<JointId>> = joints.iter().map(|joint| joint.parent).collect();
    let mut targets: Vec<Option<JointId>> = vec![None; joints.len()];
    let mut from_chain = vec![false; joints.len()];

    for chain in &section.ik_chains {
        let Some(end) = symbols
            .lookup(&chain.end)
            .and_then(|symbol| surviving.get(&symbol).copied())
        else {
            continue;
        };
        let mut child = end;
        for _ in 0..2 {
            let Some(link) = parents[child] else {
                break;
            };
            if from_chain[link] && targets[link] != Some(child) {
                return Err(CompileError::InvalidDirective {
                    reason: format!(
                        "bone \"{}\" is realigned toward two different IK children",
                        symbols.name(joints[link].name)
                    ),
                });
            }
            targets[link] = Some(child);
            from_chain[link] = true;
            child = link;
        }
    }

    for (index, children) in children_of(&parents).into_iter().enumerate() {
        if !from_chain[index] && children.len() == 1 {
            targets[index] = Some(children[0]);
        }
    }
    Ok(targets)
}
