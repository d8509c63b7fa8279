use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::{BoneWeight, DEFAULT_FPS, Source, SourceAnimation, SourceBone, SourceMesh, SourceVertex};
use crate::error::CompileError;
use crate::transform::pose_from_euler;

// ─── Document structs ─────────────────────────────────────────────────────────

/// Position plus XYZ Euler rotation (radians).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoseDocument {
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(default)]
    pub rotation: [f32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoneDocument {
    pub name: String,
    /// Parent bone name; `None` for roots.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(default)]
    pub rotation: [f32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexDocument {
    pub position: [f32; 3],
    #[serde(default)]
    pub normal: [f32; 3],
    /// `[bone_index, weight]` pairs.
    #[serde(default)]
    pub weights: Vec<(usize, f32)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshDocument {
    pub name: String,
    #[serde(default)]
    pub material: Option<String>,
    pub faces: Vec<[usize; 3]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationDocument {
    pub name: String,
    #[serde(default)]
    pub fps: Option<f32>,
    /// One entry per frame, each holding one pose per bone in bone order.
    pub frames: Vec<Vec<PoseDocument>>,
}

/// On-disk JSON source format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceDocument {
    pub bones: Vec<BoneDocument>,
    pub vertices: Vec<VertexDocument>,
    pub meshes: Vec<MeshDocument>,
    pub animations: Vec<AnimationDocument>,
}

// ─── Conversion ───────────────────────────────────────────────────────────────

pub(super) fn load_json_source(path: &Path, id: &str) -> Result<Source> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read source: {}", path.display()))?;
    let document: SourceDocument = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse source JSON: {}", path.display()))?;
    Ok(document.into_source(path, id)?)
}

impl SourceDocument {
    /// Converts the document into the in-memory source model, resolving
    /// parent names to indices.
    pub fn into_source(self, path: &Path, id: &str) -> Result<Source, CompileError> {
        let index_by_name: HashMap<String, usize> = self
            .bones
            .iter()
            .enumerate()
            .map(|(index, bone)| (bone.name.to_ascii_lowercase(), index))
            .collect();

        let mut bones = Vec::with_capacity(self.bones.len());
        for bone in self.bones {
            let parent = match &bone.parent {
                Some(name) => Some(
                    index_by_name
                        .get(&name.to_ascii_lowercase())
                        .copied()
                        .ok_or_else(|| CompileError::MalformedSource {
                            path: path.to_path_buf(),
                            reason: format!(
                                "bone \"{}\" names unknown parent \"{name}\"",
                                bone.name
                            ),
                        })?,
                ),
                None => None,
            };
            bones.push(SourceBone {
                name: bone.name,
                parent,
                rest: pose_from_euler(Vector3::from(bone.position), Vector3::from(bone.rotation)),
            });
        }

        let vertices = self
            .vertices
            .into_iter()
            .map(|vertex| SourceVertex {
                position: Vector3::from(vertex.position),
                normal: Vector3::from(vertex.normal),
                weights: vertex
                    .weights
                    .into_iter()
                    .filter(|(_, weight)| *weight > 0.0)
                    .map(|(bone, weight)| BoneWeight { bone, weight })
                    .collect(),
            })
            .collect();

        let meshes = self
            .meshes
            .into_iter()
            .map(|mesh| SourceMesh {
                name: mesh.name,
                material: mesh.material,
                faces: mesh.faces,
            })
            .collect();

        let animations = self
            .animations
            .into_iter()
            .map(|clip| SourceAnimation {
                name: clip.name,
                fps: clip.fps.unwrap_or(DEFAULT_FPS),
                frames: clip
                    .frames
                    .into_iter()
                    .map(|frame| {
                        frame
                            .into_iter()
                            .map(|pose| {
                                pose_from_euler(
                                    Vector3::from(pose.position),
                                    Vector3::from(pose.rotation),
                                )
                            })
                            .collect()
                    })
                    .collect(),
            })
            .collect();

        Ok(Source {
            id: id.to_string(),
            path: path.to_path_buf(),
            bones,
            vertices,
            meshes,
            animations,
        })
    }
}
