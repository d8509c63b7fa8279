use anyhow::{Context, Result, bail, ensure};
use serde::Serialize;

use super::{ByteReader, ByteWriter, checksum};
use crate::animation::{ChannelScales, Clip, CompressedClip, decode_stream};
use crate::error::{CompileError, CompileResult};
use crate::skeleton::GlobalBoneTable;
use crate::transform::euler_from_rotation;

pub const ANIM_MAGIC: &[u8; 4] = b"SKAN";
pub const ANIM_VERSION: u32 = 1;
/// Bone index closing a clip's track list.
pub const END_OF_TRACKS: u16 = 0xFFFF;

const CLIP_LOOPING: u32 = 1;
const CLIP_DELTA: u32 = 2;

/// Writes the animation file for `clips`, which must all be compressed.
/// Every clip is marked emitted.
///
/// # Returns
///
/// The file contents and the checksum of its body.
pub fn encode_animation(
    table: &GlobalBoneTable,
    scales: &[ChannelScales],
    clips: &mut [Clip],
) -> CompileResult<(Vec<u8>, i32)> {
    if table.len() > usize::from(u16::MAX) || clips.len() > usize::from(u16::MAX) {
        return Err(CompileError::Internal(format!(
            "{} bones and {} clips do not fit the animation header",
            table.len(),
            clips.len()
        )));
    }

    let mut body = ByteWriter::new();
    for (index, joint) in table.joints().iter().enumerate() {
        let scale = scales.get(index).ok_or_else(|| {
            CompileError::Internal(format!("no channel scales for joint {index}"))
        })?;
        body.name(table.name(index));
        body.i16(joint.parent.map_or(-1, |parent| parent as i16));
        body.u32(joint.flags.bits());
        body.vec3(joint.rest.translation.vector.into());
        body.vec3(euler_from_rotation(&joint.rest.rotation).into());
        body.vec3(scale.position);
        body.vec3(scale.rotation);
    }
    for clip in clips.iter_mut() {
        write_clip(&mut body, clip.take_for_emission()?);
    }
    let body = body.into_bytes();
    let sum = checksum(&body);

    let mut out = ByteWriter::new();
    out.bytes(ANIM_MAGIC);
    out.u32(ANIM_VERSION);
    out.i32(sum);
    out.u16(table.len() as u16);
    out.u16(clips.len() as u16);
    out.bytes(&body);

    tracing::debug!(
        "animation file: {} bones, {} clips, {} bytes",
        table.len(),
        clips.len(),
        out.len()
    );
    Ok((out.into_bytes(), sum))
}

fn write_clip(out: &mut ByteWriter, clip: &CompressedClip) {
    out.name(&clip.name);
    out.f32(clip.fps);
    out.u32(clip.frame_count);
    let mut flags = 0;
    if clip.looping {
        flags |= CLIP_LOOPING;
    }
    if clip.delta {
        flags |= CLIP_DELTA;
    }
    out.u32(flags);
    match &clip.movement {
        Some(movement) => {
            out.u8(1);
            out.u32(movement.end_frame);
            out.vec3(movement.displacement.into());
            out.vec3(movement.velocity.into());
        }
        None => out.u8(0),
    }
    for track in &clip.tracks {
        out.u16(track.joint);
        out.u8(track.mask);
        for stream in &track.streams {
            out.u16(stream.len() as u16);
            for word in stream {
                out.u16(*word);
            }
        }
    }
    out.u16(END_OF_TRACKS);
}

// ─── Decoding ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DecodedBone {
    pub name: String,
    pub parent: Option<usize>,
    pub flags: u32,
    pub rest_position: [f32; 3],
    pub rest_rotation: [f32; 3],
    pub position_scale: [f32; 3],
    pub rotation_scale: [f32; 3],
}

impl DecodedBone {
    /// Converts a stored value of `channel` back to units (inches or radians).
    pub fn dequantize(&self, channel: usize, value: i16) -> f32 {
        let scale = if channel < 3 {
            self.position_scale[channel]
        } else {
            self.rotation_scale[channel - 3]
        };
        f32::from(value) * scale
    }
}

/// One joint's stored channels, expanded to a value per frame.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedTrack {
    pub bone: u16,
    pub mask: u8,
    /// `(channel, values)` for each set bit of `mask`.
    pub channels: Vec<(usize, Vec<i16>)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecodedMovement {
    pub end_frame: u32,
    pub displacement: [f32; 3],
    pub velocity: [f32; 3],
}

#[derive(Debug, Clone, Serialize)]
pub struct DecodedClip {
    pub name: String,
    pub fps: f32,
    pub frame_count: u32,
    pub looping: bool,
    pub delta: bool,
    pub movement: Option<DecodedMovement>,
    pub tracks: Vec<DecodedTrack>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnimationFile {
    pub version: u32,
    pub checksum: i32,
    pub bones: Vec<DecodedBone>,
    pub clips: Vec<DecodedClip>,
}

/// Parses an animation file and verifies its checksum.
pub fn decode_animation(bytes: &[u8]) -> Result<AnimationFile> {
    let mut reader = ByteReader::new(bytes);
    let magic = reader.take(4).context("file too short for header")?;
    ensure!(magic == ANIM_MAGIC, "not an animation file (bad magic)");
    let version = reader.u32().context("truncated header")?;
    ensure!(version == ANIM_VERSION, "unsupported animation file version {version}");
    let stored = reader.i32().context("truncated header")?;
    let bone_count = reader.u16().context("truncated header")?;
    let clip_count = reader.u16().context("truncated header")?;

    let actual = checksum(reader.remaining());
    if actual != stored {
        bail!("checksum mismatch (header {stored:#010x}, body {actual:#010x})");
    }

    let mut bones = Vec::with_capacity(usize::from(bone_count));
    for index in 0..bone_count {
        bones.push(read_bone(&mut reader).with_context(|| format!("truncated bone {index}"))?);
    }
    let mut clips = Vec::with_capacity(usize::from(clip_count));
    for index in 0..clip_count {
        clips.push(read_clip(&mut reader, usize::from(bone_count)).with_context(|| {
            format!("malformed clip {index} at byte {}", reader.offset())
        })?);
    }
    ensure!(reader.remaining().is_empty(), "{} trailing bytes", reader.remaining().len());

    Ok(AnimationFile {
        version,
        checksum: stored,
        bones,
        clips,
    })
}

fn read_bone(reader: &mut ByteReader) -> Option<DecodedBone> {
    let name = reader.name()?;
    let parent = reader.i16()?;
    Some(DecodedBone {
        name,
        parent: usize::try_from(parent).ok(),
        flags: reader.u32()?,
        rest_position: reader.vec3()?,
        rest_rotation: reader.vec3()?,
        position_scale: reader.vec3()?,
        rotation_scale: reader.vec3()?,
    })
}

fn read_clip(reader: &mut ByteReader, bone_count: usize) -> Result<DecodedClip> {
    let name = reader.name().context("clip name")?;
    let fps = reader.f32().context("fps")?;
    let frame_count = reader.u32().context("frame count")?;
    let flags = reader.u32().context("flags")?;
    let movement = match reader.u8().context("movement flag")? {
        0 => None,
        _ => Some(DecodedMovement {
            end_frame: reader.u32().context("movement")?,
            displacement: reader.vec3().context("movement")?,
            velocity: reader.vec3().context("movement")?,
        }),
    };

    let mut tracks = Vec::new();
    loop {
        let bone = reader.u16().context("track bone")?;
        if bone == END_OF_TRACKS {
            break;
        }
        ensure!(usize::from(bone) < bone_count, "track names bone {bone} of {bone_count}");
        let mask = reader.u8().context("track mask")?;
        let mut channels = Vec::new();
        for channel in (0..6).filter(|channel| mask & (1 << channel) != 0) {
            let count = usize::from(reader.u16().context("stream length")?);
            let raw = reader.take(count * 2).context("stream words")?;
            let words: Vec<u16> = raw
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            let values = decode_stream(&words, frame_count as usize).with_context(|| {
                format!("bone {bone} channel {channel} does not cover {frame_count} frames")
            })?;
            channels.push((channel, values));
        }
        tracks.push(DecodedTrack {
            bone,
            mask,
            channels,
        });
    }

    Ok(DecodedClip {
        name,
        fps,
        frame_count,
        looping: flags & CLIP_LOOPING != 0,
        delta: flags & CLIP_DELTA != 0,
        movement,
        tracks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::compute_scales;
    use crate::project::SkeletonSection;
    use crate::skeleton::resolve;
    use crate::source::tests::{bone, rigid_vertex, source};
    use crate::transform::Pose;
    use nalgebra::UnitQuaternion;

    fn swinging_door() -> (GlobalBoneTable, Vec<ChannelScales>, Vec<Clip>) {
        let mut src = source("door", vec![bone("frame", None, [0.0; 3]), bone("door", Some(0), [16.0, 0.0, 0.0])]);
        src.vertices.push(rigid_vertex([0.0; 3], 0));
        src.vertices.push(rigid_vertex([16.0, 0.0, 0.0], 1));
        let table = resolve(&[src], &SkeletonSection::default(), &[]).expect("table");
        let rest: Vec<Pose> = table.joints().iter().map(|joint| joint.rest).collect();
        let door = table.find("door").unwrap();
        let frames = (0..12)
            .map(|index| {
                let mut frame = rest.clone();
                frame[door].rotation = UnitQuaternion::from_euler_angles(0.0, 0.0, index as f32 * 0.1);
                frame
            })
            .collect();
        let mut clip = Clip::new("swing", 24.0, frames);
        clip.looping = true;
        let scales = compute_scales(std::slice::from_ref(&clip), &table);
        clip.compress(&table, &scales).expect("compress");
        (table, scales, vec![clip])
    }

    #[test]
    fn given_compressed_clip_when_written_and_decoded_then_bones_and_tracks_survive() {
        let (table, scales, mut clips) = swinging_door();

        let (bytes, sum) = encode_animation(&table, &scales, &mut clips).expect("encode");
        let file = decode_animation(&bytes).expect("decode");

        assert_eq!(&bytes[..4], ANIM_MAGIC);
        assert_eq!(file.checksum, sum);
        assert_eq!(file.bones.len(), 2);
        assert_eq!(file.bones[1].name, "door");
        assert_eq!(file.bones[1].parent, Some(0));
        assert_eq!(file.bones[1].rest_position, [16.0, 0.0, 0.0]);
        let clip = &file.clips[0];
        assert_eq!((clip.name.as_str(), clip.frame_count), ("swing", 12));
        assert!(clip.looping && !clip.delta);
        assert_eq!(clip.tracks.len(), 1);
        let (channel, values) = &clip.tracks[0].channels[0];
        assert_eq!(*channel, 5);
        let last = file.bones[1].dequantize(5, values[11]);
        assert!((last - 1.1).abs() <= file.bones[1].rotation_scale[2]);
    }

    #[test]
    fn given_emitted_clip_when_written_again_then_internal_error() {
        let (table, scales, mut clips) = swinging_door();
        encode_animation(&table, &scales, &mut clips).expect("first");

        let err = encode_animation(&table, &scales, &mut clips).expect_err("second");
        assert!(err.to_string().starts_with("internal error"));
    }

    #[test]
    fn given_corrupted_body_when_decoded_then_checksum_mismatch_is_reported() {
        let (table, scales, mut clips) = swinging_door();
        let (mut bytes, _) = encode_animation(&table, &scales, &mut clips).expect("encode");
        let last = bytes.len() - 3;
        bytes[last] ^= 0x55;

        let err = decode_animation(&bytes).expect_err("corrupt");
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn given_uncompressed_clip_when_written_then_emission_is_refused() {
        let (table, scales, _) = swinging_door();
        let mut clips = vec![Clip::new("raw", 30.0, vec![vec![Pose::identity(); 2]])];

        assert!(encode_animation(&table, &scales, &mut clips).is_err());
    }
}
