use std::f32::consts::PI;

use super::{Clip, Movement};
use crate::error::{CompileError, CompileResult};
use crate::skeleton::{BoneFlags, GlobalBoneTable};
use crate::transform::{Pose, euler_from_rotation, wrap_angle};

/// Joints weighted below this store no channels.
pub const MIN_WEIGHT: f32 = 0.001;

/// Longest run a single header can describe.
const MAX_RUN: u16 = 255;

/// Fixed-point step per channel of one joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelScales {
    pub position: [f32; 3],
    pub rotation: [f32; 3],
}

impl ChannelScales {
    pub fn channel(&self, channel: usize) -> f32 {
        if channel < 3 {
            self.position[channel]
        } else {
            self.rotation[channel - 3]
        }
    }
}

/// Stored channels of one joint. Bit `n` of `mask` is set when channel `n`
/// (position x, y, z then rotation x, y, z) has a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct JointTrack {
    pub joint: u16,
    pub mask: u8,
    pub streams: Vec<Vec<u16>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressedClip {
    pub name: String,
    pub fps: f32,
    pub frame_count: u32,
    pub looping: bool,
    pub delta: bool,
    pub movement: Option<Movement>,
    pub tracks: Vec<JointTrack>,
}

/// The six channel values of `pose` relative to `rest`, or absolute for
/// delta clips.
fn channel_values(pose: &Pose, rest: &Pose, delta: bool) -> [f32; 6] {
    let euler = euler_from_rotation(&pose.rotation);
    let (position, rotation) = if delta {
        (pose.translation.vector, euler)
    } else {
        (
            pose.translation.vector - rest.translation.vector,
            euler - euler_from_rotation(&rest.rotation),
        )
    };
    [
        position.x,
        position.y,
        position.z,
        wrap_angle(rotation.x),
        wrap_angle(rotation.y),
        wrap_angle(rotation.z),
    ]
}

/// Chooses per joint scales so every clip's observed range fits in an `i16`.
///
/// # Arguments
///
/// * `clips` - Every clip that will be emitted with the table.
/// * `table` - Global bone table providing rest poses.
///
/// # Returns
///
/// One `ChannelScales` per joint, in table order.
pub fn compute_scales(clips: &[Clip], table: &GlobalBoneTable) -> Vec<ChannelScales> {
    table
        .joints()
        .iter()
        .enumerate()
        .map(|(joint, info)| {
            let mut min = [-128.0, -128.0, -128.0, -PI / 8.0, -PI / 8.0, -PI / 8.0];
            let mut max = [128.0, 128.0, 128.0, PI / 8.0, PI / 8.0, PI / 8.0];
            for clip in clips {
                for frame in &clip.frames {
                    let values = channel_values(&frame[joint], &info.rest, clip.delta);
                    for channel in 0..6 {
                        min[channel] = min[channel].min(values[channel]);
                        max[channel] = max[channel].max(values[channel]);
                    }
                }
            }
            let scale = |channel: usize| {
                let (lo, hi) = (min[channel], max[channel]);
                if lo < hi {
                    if -lo > hi { lo / -32768.0 } else { hi / 32767.0 }
                } else {
                    1.0 / 32.0
                }
            };
            ChannelScales {
                position: [scale(0), scale(1), scale(2)],
                rotation: [scale(3), scale(4), scale(5)],
            }
        })
        .collect()
}

/// Rounds `value / scale` to the nearest representable step.
pub fn quantize(value: f32, scale: f32) -> i16 {
    (value / scale)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

fn header(valid: u16, total: u16) -> u16 {
    valid | (total << 8)
}

/// Run-length encodes one channel.
///
/// Each run is a header word (`valid` in the low byte, `total` in the high
/// byte) followed by `valid` values; the decoder repeats the last value for
/// the remaining `total - valid` frames.
pub fn encode_stream(values: &[i16]) -> Vec<u16> {
    let Some(&first) = values.first() else {
        return Vec::new();
    };
    let mut words = vec![header(1, 1), first as u16];
    let mut head = 0;
    let (mut valid, mut total) = (1u16, 1u16);

    for m in 1..values.len() {
        if total == MAX_RUN {
            head = words.len();
            words.push(0);
            words.push(values[m] as u16);
            valid = 1;
            total = 0;
        } else {
            let changed = values[m] != values[m - 1];
            let next_changes = total == valid && m + 1 < values.len() && values[m] != values[m + 1];
            if changed || next_changes {
                if total != valid {
                    head = words.len();
                    words.push(0);
                    valid = 0;
                    total = 0;
                }
                words.push(values[m] as u16);
                valid += 1;
            }
        }
        total += 1;
        words[head] = header(valid, total);
    }
    words
}

/// Expands an encoded channel back to `frame_count` values. Returns `None`
/// when the stream is truncated or describes too few frames.
pub fn decode_stream(words: &[u16], frame_count: usize) -> Option<Vec<i16>> {
    let mut values = Vec::with_capacity(frame_count);
    let mut cursor = 0;
    while values.len() < frame_count {
        let word = *words.get(cursor)?;
        let (valid, total) = (usize::from(word & 0xFF), usize::from(word >> 8));
        if valid == 0 || valid > total {
            return None;
        }
        let run = words.get(cursor + 1..cursor + 1 + valid)?;
        values.extend(run.iter().map(|&word| word as i16));
        let held = *run.last()? as i16;
        values.extend(std::iter::repeat_n(held, total - valid));
        cursor += 1 + valid;
    }
    values.truncate(frame_count);
    Some(values)
}

/// Quantizes and encodes every stored joint of `clip`.
pub(super) fn compress_clip(
    clip: &Clip,
    table: &GlobalBoneTable,
    scales: &[ChannelScales],
) -> CompileResult<CompressedClip> {
    if scales.len() != table.len() {
        return Err(CompileError::Internal(format!(
            "{} channel scales for {} joints",
            scales.len(),
            table.len()
        )));
    }

    let mut tracks = Vec::new();
    for (joint, info) in table.joints().iter().enumerate() {
        if info.flags.contains(BoneFlags::PROCEDURAL) {
            continue;
        }
        if clip.weights.get(joint).copied().unwrap_or(1.0) < MIN_WEIGHT {
            continue;
        }

        let samples: Vec<[f32; 6]> = clip
            .frames
            .iter()
            .map(|frame| channel_values(&frame[joint], &info.rest, clip.delta))
            .collect();

        let mut track = JointTrack {
            joint: joint as u16,
            mask: 0,
            streams: Vec::new(),
        };
        for channel in 0..6 {
            let scale = scales[joint].channel(channel);
            let quantized: Vec<i16> = samples
                .iter()
                .map(|values| quantize(values[channel], scale))
                .collect();
            let words = encode_stream(&quantized);
            if words.len() == 2 && words[1] == 0 {
                continue;
            }
            track.mask |= 1 << channel;
            track.streams.push(words);
        }
        if track.mask != 0 {
            tracks.push(track);
        }
    }

    tracing::debug!(
        "clip \"{}\": {} of {} joints stored",
        clip.name,
        tracks.len(),
        table.len()
    );
    Ok(CompressedClip {
        name: clip.name.clone(),
        fps: clip.fps,
        frame_count: clip.frame_count() as u32,
        looping: clip.looping,
        delta: clip.delta,
        movement: clip.movement,
        tracks,
    })
}
