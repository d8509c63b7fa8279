mod gltf_source;
mod json_source;

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use nalgebra::Vector3;

use crate::error::{CompileError, CompileResult};
use crate::transform::{Pose, poses_differ, world_poses};

pub use json_source::{
    AnimationDocument, BoneDocument, MeshDocument, PoseDocument, SourceDocument, VertexDocument,
};

/// Per-source bone ceiling.
pub const MAX_SOURCE_BONES: usize = 1024;
/// Per-clip frame ceiling.
pub const MAX_SOURCE_FRAMES: usize = 5000;

/// Frames sampled per second when a clip does not specify a rate.
pub const DEFAULT_FPS: f32 = 30.0;

// ─── Source model ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SourceBone {
    pub name: String,
    pub parent: Option<usize>,
    /// Rest transform relative to the parent bone.
    pub rest: Pose,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneWeight {
    pub bone: usize,
    pub weight: f32,
}

/// Model-space bind-pose vertex with its skinning weights.
#[derive(Debug, Clone)]
pub struct SourceVertex {
    pub position: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub weights: Vec<BoneWeight>,
}

impl SourceVertex {
    /// Local bone carrying the largest weight. Ties go to the first listed.
    pub fn dominant_bone(&self) -> Option<usize> {
        let mut best: Option<BoneWeight> = None;
        for weight in &self.weights {
            if best.is_none_or(|current| weight.weight > current.weight) {
                best = Some(*weight);
            }
        }
        best.map(|weight| weight.bone)
    }
}

#[derive(Debug, Clone)]
pub struct SourceMesh {
    pub name: String,
    pub material: Option<String>,
    pub faces: Vec<[usize; 3]>,
}

/// Dense per-frame local transforms, one per source bone per frame.
#[derive(Debug, Clone)]
pub struct SourceAnimation {
    pub name: String,
    pub fps: f32,
    pub frames: Vec<Vec<Pose>>,
}

/// One ingested file: a private skeleton plus the geometry and clips bound
/// to it.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub path: PathBuf,
    pub bones: Vec<SourceBone>,
    pub vertices: Vec<SourceVertex>,
    pub meshes: Vec<SourceMesh>,
    pub animations: Vec<SourceAnimation>,
}

impl Source {
    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones
            .iter()
            .position(|bone| bone.name.eq_ignore_ascii_case(name))
    }

    pub fn parents(&self) -> Vec<Option<usize>> {
        self.bones.iter().map(|bone| bone.parent).collect()
    }

    /// Bind-pose world transforms of every bone.
    pub fn rest_world(&self) -> Vec<Pose> {
        let locals: Vec<Pose> = self.bones.iter().map(|bone| bone.rest).collect();
        world_poses(&locals, &self.parents())
    }

    pub fn animation(&self, name: Option<&str>) -> Option<&SourceAnimation> {
        match name {
            Some(name) => self
                .animations
                .iter()
                .find(|clip| clip.name.eq_ignore_ascii_case(name)),
            None => self.animations.first(),
        }
    }

    /// Bones whose local transform leaves the rest pose in any clip.
    pub fn animated_bones(&self) -> Vec<bool> {
        let mut animated = vec![false; self.bones.len()];
        for clip in &self.animations {
            for frame in &clip.frames {
                for (index, pose) in frame.iter().enumerate() {
                    if !animated[index] && poses_differ(pose, &self.bones[index].rest, 0.01, 0.001)
                    {
                        animated[index] = true;
                    }
                }
            }
        }
        animated
    }

    /// Checks the structural contract every later stage relies on.
    pub fn validate(&self) -> CompileResult<()> {
        if self.bones.is_empty() {
            return Err(self.malformed("source defines no bones"));
        }
        if self.bones.len() > MAX_SOURCE_BONES {
            return Err(self.malformed(format!(
                "{} bones exceeds the per-source limit of {}",
                self.bones.len(),
                MAX_SOURCE_BONES
            )));
        }

        let mut seen = HashSet::new();
        for (index, bone) in self.bones.iter().enumerate() {
            if !seen.insert(bone.name.to_ascii_lowercase()) {
                return Err(self.malformed(format!("duplicate bone name \"{}\"", bone.name)));
            }
            if let Some(parent) = bone.parent
                && parent >= self.bones.len()
            {
                return Err(self.malformed(format!(
                    "bone \"{}\" has out-of-range parent {parent}",
                    bone.name
                )));
            }
            let mut steps = 0;
            let mut cursor = self.bones[index].parent;
            while let Some(parent) = cursor {
                steps += 1;
                if steps > self.bones.len() {
                    return Err(self.malformed(format!(
                        "bone \"{}\" is part of a parent cycle",
                        bone.name
                    )));
                }
                cursor = self.bones[parent].parent;
            }
        }

        for (index, vertex) in self.vertices.iter().enumerate() {
            if let Some(weight) = vertex
                .weights
                .iter()
                .find(|weight| weight.bone >= self.bones.len())
            {
                return Err(self.malformed(format!(
                    "vertex {index} is weighted to missing bone {}",
                    weight.bone
                )));
            }
        }

        for mesh in &self.meshes {
            for face in &mesh.faces {
                if face.iter().any(|&vertex| vertex >= self.vertices.len()) {
                    return Err(self.malformed(format!(
                        "mesh \"{}\" references a vertex outside 0..{}",
                        mesh.name,
                        self.vertices.len()
                    )));
                }
            }
        }

        for clip in &self.animations {
            if clip.frames.is_empty() {
                return Err(CompileError::MissingFrames {
                    clip: clip.name.clone(),
                    reason: format!("no frames in {}", self.path.display()),
                });
            }
            if clip.frames.len() > MAX_SOURCE_FRAMES {
                return Err(self.malformed(format!(
                    "clip \"{}\" has {} frames, limit is {}",
                    clip.name,
                    clip.frames.len(),
                    MAX_SOURCE_FRAMES
                )));
            }
            if let Some((frame, poses)) = clip
                .frames
                .iter()
                .enumerate()
                .find(|(_, poses)| poses.len() != self.bones.len())
            {
                return Err(CompileError::MissingFrames {
                    clip: clip.name.clone(),
                    reason: format!(
                        "frame {frame} has {} transforms for {} bones",
                        poses.len(),
                        self.bones.len()
                    ),
                });
            }
        }

        Ok(())
    }

    fn malformed(&self, reason: impl Into<String>) -> CompileError {
        CompileError::MalformedSource {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

// ─── Loading ──────────────────────────────────────────────────────────────────

/// Read and validate one source file. glTF/GLB go through the glTF reader,
/// everything else is parsed as a JSON source document.
pub fn load_source(path: &Path, id: &str) -> Result<Source> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let source = match extension.as_str() {
        "gltf" | "glb" => gltf_source::load_gltf_source(path, id)?,
        _ => json_source::load_json_source(path, id)?,
    };

    source
        .validate()
        .with_context(|| format!("failed to validate source: {}", path.display()))?;

    tracing::debug!(
        "loaded source {} ({} bones, {} vertices, {} clips)",
        id,
        source.bones.len(),
        source.vertices.len(),
        source.animations.len()
    );
    Ok(source)
}
