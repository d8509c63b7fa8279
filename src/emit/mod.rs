//! Binary writers for the compiled collision file and animation file.
//!
//! All multi-byte values are little-endian. Both files carry the same
//! checksum, derived from the animation file's body, so a runtime can tell
//! whether they were compiled together.

mod anim;
mod phy;

use sha2::{Digest, Sha256};

pub use anim::{
    ANIM_MAGIC, ANIM_VERSION, AnimationFile, DecodedBone, DecodedClip, DecodedMovement,
    DecodedTrack, END_OF_TRACKS, decode_animation, encode_animation,
};
pub use phy::{PHY_HEADER_SIZE, encode_collision, solid_blob};

/// First four bytes of the SHA-256 of `body`, read as a little-endian `i32`.
pub fn checksum(body: &[u8]) -> i32 {
    let digest = Sha256::digest(body);
    i32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Append-only little-endian byte buffer.
#[derive(Debug, Default)]
pub(crate) struct ByteWriter {
    bytes: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn i16(&mut self, value: i16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn f32(&mut self, value: f32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn vec3(&mut self, value: [f32; 3]) {
        for component in value {
            self.f32(component);
        }
    }

    /// Length-prefixed UTF-8, truncated to 255 bytes on a char boundary.
    pub fn name(&mut self, value: &str) {
        let mut end = value.len().min(u8::MAX as usize);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.u8(end as u8);
        self.bytes.extend_from_slice(&value.as_bytes()[..end]);
    }

    pub fn bytes(&mut self, value: &[u8]) {
        self.bytes.extend_from_slice(value);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Cursor over a little-endian byte buffer. Every read returns `None` past
/// the end.
#[derive(Debug)]
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.offset..]
    }

    pub fn take(&mut self, count: usize) -> Option<&'a [u8]> {
        let slice = self.bytes.get(self.offset..self.offset.checked_add(count)?)?;
        self.offset += count;
        Some(slice)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }

    pub fn u8(&mut self) -> Option<u8> {
        Some(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Option<u16> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn i16(&mut self) -> Option<i16> {
        self.array().map(i16::from_le_bytes)
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn i32(&mut self) -> Option<i32> {
        self.array().map(i32::from_le_bytes)
    }

    pub fn f32(&mut self) -> Option<f32> {
        self.array().map(f32::from_le_bytes)
    }

    pub fn vec3(&mut self) -> Option<[f32; 3]> {
        Some([self.f32()?, self.f32()?, self.f32()?])
    }

    pub fn name(&mut self) -> Option<String> {
        let len = usize::from(self.u8()?);
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).ok()
    }
}
