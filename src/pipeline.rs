//! Stage orchestration: sources → bone table → collision model → clips →
//! artifacts. Nothing is written until every stage has succeeded.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::animation::{ChannelScales, Clip, compute_scales, prepare_clip};
use crate::collision::{CollisionModel, build_collision_model};
use crate::emit::{encode_animation, encode_collision};
use crate::error::{CompileError, CompileResult};
use crate::logging::{Diagnostics, Issue, Provenance};
use crate::project::{BuildScript, load_build_script};
use crate::skeleton::{GlobalBoneTable, resolve};
use crate::source::{Source, load_source};

/// Command-line overrides applied on top of the build script.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub out_dir: Option<PathBuf>,
    pub allow_costly: bool,
    pub remove_2d: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub asset: String,
    pub author: Option<String>,
    pub revision: Option<String>,
    pub source_count: usize,
    pub joint_count: usize,
    pub joint_merges: Vec<(String, String)>,
    pub solid_count: usize,
    pub convex_pieces: usize,
    pub constraint_count: usize,
    pub clip_count: usize,
    pub checksum: i32,
    pub outputs: Vec<PathBuf>,
    pub issues: Vec<Issue>,
}

/// Everything one build produces, still in memory.
#[derive(Debug)]
pub struct CompiledAsset {
    pub table: GlobalBoneTable,
    pub collision: Option<CollisionModel>,
    pub clips: Vec<Clip>,
    pub scales: Vec<ChannelScales>,
    pub checksum: i32,
    pub animation_bytes: Vec<u8>,
    pub collision_bytes: Option<Vec<u8>>,
}

/// Runs every stage over already loaded sources.
///
/// # Arguments
///
/// * `script` - Build script with overrides already applied.
/// * `sources` - One entry per script source, in script order.
/// * `diagnostics` - Receives warnings and demoted errors.
///
/// # Returns
///
/// The compiled asset, or the first failure.
pub fn compile_asset(
    script: &BuildScript,
    sources: &[Source],
    diagnostics: &mut Diagnostics,
) -> CompileResult<CompiledAsset> {
    check_directives(script)?;

    let constraint_joints: Vec<&str> = script
        .collision
        .iter()
        .flat_map(|section| section.constraints.iter().map(|entry| entry.joint.as_str()))
        .collect();
    let table = resolve(sources, &script.skeleton, &constraint_joints)?;

    let collision = match &script.collision {
        Some(section) => {
            let primary = match &section.source {
                Some(id) => script.source_index(id).ok_or_else(|| CompileError::InvalidDirective {
                    reason: format!("collision names unknown source \"{id}\""),
                })?,
                None => 0,
            };
            Some(build_collision_model(
                section,
                &table,
                sources,
                primary,
                diagnostics,
            )?)
        }
        None => None,
    };

    let mut clips = Vec::with_capacity(script.animations.len());
    for entry in &script.animations {
        clips.push(prepare_clip(entry, &script.skeleton, &table, sources, diagnostics)?);
    }
    let scales = compute_scales(&clips, &table);
    for clip in &mut clips {
        clip.compress(&table, &scales)?;
    }

    let (animation_bytes, checksum) = encode_animation(&table, &scales, &mut clips)?;
    let collision_bytes = collision
        .as_ref()
        .map(|model| encode_collision(model, checksum));

    tracing::info!(
        "{}: compiled {} joints, {} clips (checksum {:#010x})",
        diagnostics.asset(),
        table.len(),
        clips.len(),
        checksum
    );
    Ok(CompiledAsset {
        table,
        collision,
        clips,
        scales,
        checksum,
        animation_bytes,
        collision_bytes,
    })
}

/// Script-level consistency that no single stage owns.
fn check_directives(script: &BuildScript) -> CompileResult<()> {
    if script.sources.is_empty() {
        return Err(CompileError::InvalidDirective {
            reason: "build script lists no sources".to_string(),
        });
    }
    let mut ids = HashSet::new();
    for entry in &script.sources {
        if !ids.insert(entry.id().to_ascii_lowercase()) {
            return Err(CompileError::InvalidDirective {
                reason: format!("duplicate source id \"{}\"", entry.id()),
            });
        }
    }
    let mut clips = HashSet::new();
    for entry in &script.animations {
        if !clips.insert(entry.name.to_ascii_lowercase()) {
            return Err(CompileError::InvalidDirective {
                reason: format!("duplicate animation \"{}\"", entry.name),
            });
        }
    }
    Ok(())
}

/// Loads every source listed by the script, in script order.
pub fn load_sources(script: &BuildScript) -> Result<Vec<Source>> {
    script
        .sources
        .iter()
        .map(|entry| load_source(&entry.path, &entry.id()))
        .collect()
}

fn apply_options(script: &mut BuildScript, options: &BuildOptions) {
    if let Some(section) = &mut script.collision {
        section.allow_costly |= options.allow_costly;
        section.remove_2d |= options.remove_2d;
    }
    if let Some(out_dir) = &options.out_dir {
        script.output_dir = Some(out_dir.clone());
    }
}

fn run(script_path: &Path, options: &BuildOptions, write: bool) -> Result<BuildReport> {
    let mut script = load_build_script(script_path)?;
    apply_options(&mut script, options);
    compile_and_write(&script, script_path, write)
        .with_context(|| format!("asset \"{}\"", script.name))
}

fn compile_and_write(script: &BuildScript, script_path: &Path, write: bool) -> Result<BuildReport> {
    let sources = load_sources(script)?;
    let mut diagnostics = Diagnostics::new(
        &script.name,
        Provenance {
            author: script.author.clone(),
            revision: script.revision.clone(),
        },
    );
    let compiled = compile_asset(script, &sources, &mut diagnostics)?;

    let mut outputs = Vec::new();
    if write {
        let out_dir = script
            .output_dir
            .clone()
            .or_else(|| script_path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&out_dir).with_context(|| {
            format!("failed to create output directory: {}", out_dir.display())
        })?;

        let mut files = vec![("skan", compiled.animation_bytes.as_slice())];
        if let Some(bytes) = &compiled.collision_bytes {
            files.push(("phy", bytes.as_slice()));
        }
        outputs = write_outputs(&out_dir, &script.name, &files)?;
        tracing::info!(
            "{}: wrote {} files to {}",
            script.name,
            outputs.len(),
            out_dir.display()
        );
    }

    let collision = compiled.collision.as_ref();
    Ok(BuildReport {
        asset: script.name.clone(),
        author: script.author.clone(),
        revision: script.revision.clone(),
        source_count: sources.len(),
        joint_count: compiled.table.len(),
        joint_merges: compiled
            .table
            .merges()
            .map(|(parent, child)| (parent.to_string(), child.to_string()))
            .collect(),
        solid_count: collision.map_or(0, |model| model.solids.len()),
        convex_pieces: collision.map_or(0, CollisionModel::piece_count),
        constraint_count: collision.map_or(0, |model| model.constraints.len()),
        clip_count: compiled.clips.len(),
        checksum: compiled.checksum,
        outputs,
        issues: diagnostics.into_issues(),
    })
}

/// Writes every `(extension, bytes)` pair as `<name>.<extension>` in
/// `out_dir`. Each file is staged under a hidden temporary name first and
/// only renamed into place once all of them are on disk, so a failed write
/// leaves no artifact behind.
fn write_outputs(out_dir: &Path, name: &str, files: &[(&str, &[u8])]) -> Result<Vec<PathBuf>> {
    let mut staged = Vec::with_capacity(files.len());
    for (extension, bytes) in files {
        let staging = out_dir.join(format!(".{name}.{extension}.tmp"));
        let target = out_dir.join(format!("{name}.{extension}"));
        if let Err(err) = fs::write(&staging, bytes) {
            discard(&staged);
            return Err(err).with_context(|| {
                format!("failed to write output: {}", target.display())
            });
        }
        staged.push((staging, target));
    }

    let mut outputs = Vec::with_capacity(staged.len());
    for (index, (staging, target)) in staged.iter().enumerate() {
        if let Err(err) = fs::rename(staging, target) {
            discard(&staged[index..]);
            return Err(err).with_context(|| {
                format!("failed to write output: {}", target.display())
            });
        }
        outputs.push(target.clone());
    }
    Ok(outputs)
}

fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (staging, _) in staged {
        if let Err(err) = fs::remove_file(staging) {
            tracing::warn!("failed to remove {}: {err}", staging.display());
        }
    }
}

/// Compiles the asset described by `script_path` and writes its artifacts.
pub fn build_asset(script_path: &Path, options: &BuildOptions) -> Result<BuildReport> {
    run(script_path, options, true)
}

/// Runs every stage without writing anything.
pub fn check_asset(script_path: &Path, options: &BuildOptions) -> Result<BuildReport> {
    run(script_path, options, false)
}
