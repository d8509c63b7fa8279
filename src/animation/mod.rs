//! Animation pipeline: re-expresses source clips on the global bone table,
//! runs the per-clip commands and compresses the result.

mod commands;
mod compress;
mod ik;
mod translate;

use nalgebra::Vector3;

use crate::error::{CompileError, CompileResult};
use crate::logging::Diagnostics;
use crate::project::{AnimationEntry, AxisMask, SkeletonSection};
use crate::skeleton::GlobalBoneTable;
use crate::source::Source;
use crate::transform::Pose;

pub use compress::{
    ChannelScales, CompressedClip, JointTrack, compute_scales, decode_stream, encode_stream,
    quantize,
};
pub use ik::solve_two_bone;
pub use translate::translate_frames;

/// Progress of a clip through the pipeline. Stages only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClipStage {
    Ingested,
    MotionExtracted,
    IkBaked,
    LoopFixed,
    Compressed,
    Emitted,
}

/// Root motion removed by motion extraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Movement {
    pub end_frame: u32,
    pub displacement: Vector3<f32>,
    /// Displacement per second.
    pub velocity: Vector3<f32>,
}

/// One clip expressed in global-bone space.
#[derive(Debug, Clone)]
pub struct Clip {
    pub name: String,
    pub fps: f32,
    /// Per frame, per joint local transforms.
    pub frames: Vec<Vec<Pose>>,
    pub looping: bool,
    pub delta: bool,
    /// Per joint influence; joints under 0.001 are not stored.
    pub weights: Vec<f32>,
    pub movement: Option<Movement>,
    /// Root translation axes owned by motion extraction.
    pub extracted: AxisMask,
    stage: ClipStage,
    compressed: Option<CompressedClip>,
}

impl Clip {
    pub fn new(name: impl Into<String>, fps: f32, frames: Vec<Vec<Pose>>) -> Self {
        let joints = frames.first().map_or(0, Vec::len);
        Self {
            name: name.into(),
            fps,
            frames,
            looping: false,
            delta: false,
            weights: vec![1.0; joints],
            movement: None,
            extracted: AxisMask::default(),
            stage: ClipStage::Ingested,
            compressed: None,
        }
    }

    pub fn stage(&self) -> ClipStage {
        self.stage
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Moves the clip to `stage` unless it is already further along.
    fn advance(&mut self, stage: ClipStage) {
        self.stage = self.stage.max(stage);
    }

    /// Quantizes and run-length encodes every stored channel.
    pub fn compress(&mut self, table: &GlobalBoneTable, scales: &[ChannelScales]) -> CompileResult<()> {
        if self.stage >= ClipStage::Compressed {
            return Err(CompileError::Internal(format!(
                "clip \"{}\" compressed twice",
                self.name
            )));
        }
        self.compressed = Some(compress::compress_clip(self, table, scales)?);
        self.stage = ClipStage::Compressed;
        Ok(())
    }

    /// Hands the compressed clip to the writer, exactly once.
    pub fn take_for_emission(&mut self) -> CompileResult<&CompressedClip> {
        if self.stage != ClipStage::Compressed {
            return Err(CompileError::Internal(format!(
                "clip \"{}\" emitted at stage {:?}",
                self.name, self.stage
            )));
        }
        self.stage = ClipStage::Emitted;
        self.compressed
            .as_ref()
            .ok_or_else(|| CompileError::Internal(format!("clip \"{}\" has no compressed data", self.name)))
    }

    pub fn compressed(&self) -> Option<&CompressedClip> {
        self.compressed.as_ref()
    }
}

/// Builds one clip from its script entry: re-expression, then every command
/// in declaration order.
pub fn prepare_clip(
    entry: &AnimationEntry,
    skeleton: &SkeletonSection,
    table: &GlobalBoneTable,
    sources: &[Source],
    diagnostics: &mut Diagnostics,
) -> CompileResult<Clip> {
    let source_index = sources
        .iter()
        .position(|source| source.id.eq_ignore_ascii_case(&entry.source))
        .ok_or_else(|| CompileError::InvalidDirective {
            reason: format!(
                "animation \"{}\" names unknown source \"{}\"",
                entry.name, entry.source
            ),
        })?;
    let source = &sources[source_index];
    let animation = source
        .animation(entry.clip.as_deref())
        .ok_or_else(|| CompileError::MissingFrames {
            clip: entry.name.clone(),
            reason: match &entry.clip {
                Some(clip) => format!("source \"{}\" has no clip \"{clip}\"", source.id),
                None => format!("source \"{}\" has no clips", source.id),
            },
        })?;

    let frames = translate_frames(table, source, source_index, animation)?;
    let mut clip = Clip::new(&entry.name, entry.fps.unwrap_or(animation.fps), frames);
    clip.looping = entry.looping;
    clip.delta = entry.delta;

    for command in &entry.commands {
        commands::apply(command, &mut clip, skeleton, table)?;
    }
    if clip.looping && clip.stage < ClipStage::LoopFixed {
        diagnostics.info(
            "loop_unfixed",
            format!("looping clip \"{}\" has no fix_loop command", clip.name),
        );
    }

    tracing::debug!(
        "{}: clip \"{}\" prepared ({} frames at {} fps, stage {:?})",
        diagnostics.asset(),
        clip.name,
        clip.frame_count(),
        clip.fps,
        clip.stage
    );
    Ok(clip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_clip_when_advancing_backwards_then_stage_does_not_regress() {
        let mut clip = Clip::new("idle", 30.0, vec![vec![Pose::identity()]]);

        clip.advance(ClipStage::LoopFixed);
        clip.advance(ClipStage::MotionExtracted);

        assert_eq!(clip.stage(), ClipStage::LoopFixed);
        assert!(ClipStage::Ingested < ClipStage::Emitted);
    }

    #[test]
    fn given_uncompressed_clip_when_emitting_then_internal_error() {
        let mut clip = Clip::new("idle", 30.0, vec![vec![Pose::identity()]]);
        let err = clip.take_for_emission().expect_err("not compressed");
        assert!(err.to_string().starts_with("internal error"));
    }
}
