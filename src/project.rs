use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ─── Sources ──────────────────────────────────────────────────────────────────

/// A mesh/skeleton/animation file contributing to the asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Identifier used by collision and animation sections. Defaults to the
    /// file stem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub path: PathBuf,
}

impl SourceEntry {
    pub fn id(&self) -> String {
        self.id.clone().unwrap_or_else(|| {
            let name = self
                .path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("source");
            name.split('.').next().unwrap_or(name).to_string()
        })
    }
}

// ─── Skeleton directives ──────────────────────────────────────────────────────

/// A joint seeded into the bone table regardless of usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBone {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub position: [f32; 3],
    /// XYZ Euler angles in degrees.
    #[serde(default)]
    pub rotation: [f32; 3],
}

/// Redirects every lookup of `child` to `parent`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeDirective {
    pub child: String,
    pub parent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub bone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hitbox {
    pub bone: String,
    #[serde(default)]
    pub group: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProceduralBone {
    pub bone: String,
    #[serde(default)]
    pub drivers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IkChain {
    pub name: String,
    /// End effector; the chain is the end, its parent and its grandparent.
    pub end: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkeletonSection {
    pub import_bones: Vec<ImportBone>,
    pub merges: Vec<MergeDirective>,
    pub collapse: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub hitboxes: Vec<Hitbox>,
    pub procedural_bones: Vec<ProceduralBone>,
    pub ik_chains: Vec<IkChain>,
    pub realign_bones: bool,
}

// ─── Collision model ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollisionMode {
    /// One solid per surviving joint, linked by ragdoll constraints.
    #[default]
    Jointed,
    /// One rigid solid for the whole asset.
    SingleBody,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintAxis {
    X,
    Y,
    Z,
}

impl ConstraintAxis {
    pub fn index(self) -> usize {
        match self {
            ConstraintAxis::X => 0,
            ConstraintAxis::Y => 1,
            ConstraintAxis::Z => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintKind {
    Free,
    Fixed,
    Limit,
}

/// Rotational limit on one axis of a joint, in degrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintEntry {
    pub joint: String,
    pub axis: ConstraintAxis,
    pub kind: ConstraintKind,
    #[serde(default)]
    pub min: f32,
    #[serde(default)]
    pub max: f32,
    #[serde(default = "default_friction")]
    pub friction: f32,
}

fn default_friction() -> f32 {
    1.0
}

/// Per-joint physical overrides, applied after solids are built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JointOverrides {
    pub mass_bias: Option<f32>,
    pub damping: Option<f32>,
    pub rotdamping: Option<f32>,
    pub inertia: Option<f32>,
    pub drag: Option<f32>,
    pub surface_prop: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimatedFriction {
    pub min: f32,
    pub max: f32,
    pub time_in: f32,
    pub time_out: f32,
    pub time_hold: f32,
}

/// Additional source merged into a single-body collision model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraCollisionSource {
    pub source: String,
    #[serde(default)]
    pub offset: [f32; 3],
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub concave: bool,
}

fn default_scale() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionSection {
    pub mode: CollisionMode,
    /// Source id providing the collision mesh. Defaults to the first source.
    pub source: Option<String>,
    pub concave: bool,
    pub max_convex: usize,
    pub allow_costly: bool,
    pub remove_2d: bool,
    pub weld_position: f32,
    pub weld_normal: f32,
    pub total_mass: f32,
    pub automass: bool,
    pub density: Option<f32>,
    pub thickness: Option<f32>,
    pub surface_prop: String,
    pub damping: f32,
    pub rotdamping: f32,
    pub inertia: f32,
    pub drag: Option<f32>,
    pub mass_bias: f32,
    pub joints: BTreeMap<String, JointOverrides>,
    pub constraints: Vec<ConstraintEntry>,
    pub joint_skip: Vec<String>,
    pub root_bone: Option<String>,
    pub mass_center: Option<[f32; 3]>,
    pub self_collisions: bool,
    pub collide_pairs: Vec<[String; 2]>,
    pub animated_friction: Option<AnimatedFriction>,
    pub extra_sources: Vec<ExtraCollisionSource>,
}

impl Default for CollisionSection {
    fn default() -> Self {
        Self {
            mode: CollisionMode::Jointed,
            source: None,
            concave: true,
            max_convex: 40,
            allow_costly: false,
            remove_2d: false,
            weld_position: 0.0,
            weld_normal: 0.999,
            total_mass: 1.0,
            automass: false,
            density: None,
            thickness: None,
            surface_prop: "default".to_string(),
            damping: 0.0,
            rotdamping: 0.0,
            inertia: 1.0,
            drag: None,
            mass_bias: 1.0,
            joints: BTreeMap::new(),
            constraints: Vec::new(),
            joint_skip: Vec::new(),
            root_bone: None,
            mass_center: None,
            self_collisions: true,
            collide_pairs: Vec::new(),
            animated_friction: None,
            extra_sources: Vec::new(),
        }
    }
}

// ─── Animations ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AxisMask {
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

impl AxisMask {
    pub fn contains(&self, axis: usize) -> bool {
        match axis {
            0 => self.x,
            1 => self.y,
            2 => self.z,
            _ => false,
        }
    }
}

/// Per-clip transform, applied in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClipCommand {
    ExtractMotion {
        #[serde(default)]
        bone: Option<String>,
        axes: AxisMask,
    },
    IkLock {
        chain: String,
        #[serde(default)]
        frame: usize,
    },
    LocalHierarchy {
        bone: String,
        parent: String,
        start: f32,
        peak: f32,
        tail: f32,
        end: f32,
    },
    FixLoop {
        range: usize,
    },
    WeightList {
        weights: BTreeMap<String, f32>,
        #[serde(default = "default_weight")]
        default: f32,
    },
    Derivative {
        #[serde(default = "default_scale")]
        scale: f32,
    },
    Subtract {
        #[serde(default)]
        frame: usize,
    },
}

fn default_weight() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationEntry {
    pub name: String,
    pub source: String,
    /// Clip name inside the source. Defaults to the first clip.
    #[serde(default)]
    pub clip: Option<String>,
    #[serde(default)]
    pub fps: Option<f32>,
    #[serde(default)]
    pub looping: bool,
    #[serde(default)]
    pub delta: bool,
    #[serde(default)]
    pub commands: Vec<ClipCommand>,
}

// ─── Build script ─────────────────────────────────────────────────────────────

/// Human-authored description of one asset build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildScript {
    pub name: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub skeleton: SkeletonSection,
    #[serde(default)]
    pub collision: Option<CollisionSection>,
    #[serde(default)]
    pub animations: Vec<AnimationEntry>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for BuildScript {
    fn default() -> Self {
        Self {
            name: "model".to_string(),
            author: None,
            revision: None,
            sources: vec![SourceEntry {
                id: None,
                path: PathBuf::from("model.json"),
            }],
            skeleton: SkeletonSection::default(),
            collision: Some(CollisionSection::default()),
            animations: Vec::new(),
            output_dir: None,
        }
    }
}

impl BuildScript {
    /// Rebases relative source and output paths onto `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        for source in &mut self.sources {
            if source.path.is_relative() {
                source.path = base_dir.join(&source.path);
            }
        }
        if let Some(output_dir) = &mut self.output_dir
            && output_dir.is_relative()
        {
            *output_dir = base_dir.join(&*output_dir);
        }
    }

    pub fn source_index(&self, id: &str) -> Option<usize> {
        self.sources.iter().position(|entry| entry.id() == id)
    }
}

/// Save a build script to a JSON file.
pub fn save_build_script(path: &Path, script: &BuildScript) -> Result<()> {
    let content =
        serde_json::to_string_pretty(script).context("failed to serialize build script as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save build script: {}", path.display()))?;
    Ok(())
}

/// Load a build script from a JSON file, resolving paths against its
/// directory.
pub fn load_build_script(path: &Path) -> Result<BuildScript> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load build script: {}", path.display()))?;
    let mut script: BuildScript = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse build script JSON: {}", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    script.resolve_paths(base_dir);
    Ok(script)
}
