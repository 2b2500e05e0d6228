//! `.tbc` container reader/writer
//!
//! Layout (little-endian):
//! - header: magic `TBC1`, version, texture type, flags, us/frame, two
//!   user-data words, image count, per-image level counts, slice table
//! - payload: BC7 blocks of every slice, image-major then level
//! - xxHash64 of everything before it

use std::collections::HashMap;
use std::io::Cursor;

use binrw::prelude::*;

use crate::config::TextureType;
use crate::engine::{
    Container, ContainerFlags, EngineFailure, HeaderFacts, LevelGeometry,
};
use crate::formats::TranscodeFormat;
use crate::hash::{self, CHECKSUM_LEN};

use super::transcoder;

/// Current container version
pub const VERSION: u16 = 1;

/// Block format of every payload slice
pub const PAYLOAD_FORMAT: TranscodeFormat = TranscodeFormat::Bc7;

const FLAG_Y_FLIPPED: u8 = 0x01;
const FLAG_HAS_ALPHA: u8 = 0x02;

/// Container header
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"TBC1")]
pub struct ContainerHeader {
    pub version: u16,
    pub texture_type: u8,
    pub flags: u8,
    /// Microseconds per frame (video)
    pub us_per_frame: u32,
    pub userdata: [u32; 2],
    pub image_count: u32,
    #[br(count = image_count)]
    pub level_counts: Vec<u32>,
    pub slice_count: u32,
    #[br(count = slice_count)]
    pub slices: Vec<SliceDesc>,
}

/// Slice table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct SliceDesc {
    pub image: u32,
    pub level: u32,
    /// Pixel size before block padding
    pub width: u32,
    pub height: u32,
    /// Offset from the start of the payload
    pub offset: u32,
    pub len: u32,
}

/// One encoded slice handed to [`assemble`]
#[derive(Debug, Clone)]
pub struct EncodedSlice {
    pub image: u32,
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub blocks: Vec<u8>,
}

/// Build a sealed container from encoded slices (image-major, level order)
pub fn assemble(facts: &HeaderFacts, slices: &[EncodedSlice]) -> Result<Vec<u8>, EngineFailure> {
    let too_large = || EngineFailure("container payload exceeds 4 GiB".to_string());

    let mut descs = Vec::with_capacity(slices.len());
    let mut offset = 0u32;
    for slice in slices {
        let len = u32::try_from(slice.blocks.len()).map_err(|_| too_large())?;
        descs.push(SliceDesc {
            image: slice.image,
            level: slice.level,
            width: slice.width,
            height: slice.height,
            offset,
            len,
        });
        offset = offset.checked_add(len).ok_or_else(too_large)?;
    }

    let mut flags = 0;
    if facts.flags.y_flipped {
        flags |= FLAG_Y_FLIPPED;
    }
    if facts.flags.has_alpha {
        flags |= FLAG_HAS_ALPHA;
    }

    let header = ContainerHeader {
        version: VERSION,
        texture_type: facts.texture_type.to_u8(),
        flags,
        us_per_frame: facts.us_per_frame,
        userdata: facts.userdata,
        image_count: facts.image_count,
        level_counts: facts.level_counts.clone(),
        slice_count: descs.len() as u32,
        slices: descs,
    };

    let mut cursor = Cursor::new(Vec::new());
    header
        .write(&mut cursor)
        .map_err(|e| EngineFailure(format!("failed writing header: {}", e)))?;

    let mut bytes = cursor.into_inner();
    for slice in slices {
        bytes.extend_from_slice(&slice.blocks);
    }
    hash::seal(&mut bytes);

    Ok(bytes)
}

/// Parsed container
#[derive(Debug)]
pub struct TbcContainer {
    header: ContainerHeader,
    facts: HeaderFacts,
    bytes: Vec<u8>,
    payload_start: usize,
    index: HashMap<(u32, u32), usize>,
}

impl TbcContainer {
    /// Parse container bytes and check the slice table against the payload
    pub fn parse(bytes: Vec<u8>) -> Result<Self, EngineFailure> {
        let invalid = |reason: String| EngineFailure(reason);

        if bytes.len() < CHECKSUM_LEN {
            return Err(invalid("file too small".to_string()));
        }
        let body_len = bytes.len() - CHECKSUM_LEN;

        let mut cursor = Cursor::new(&bytes[..body_len]);
        let header = ContainerHeader::read(&mut cursor)
            .map_err(|e| invalid(format!("invalid header: {}", e)))?;
        let payload_start = cursor.position() as usize;

        if header.version != VERSION {
            return Err(invalid(format!("unsupported version {}", header.version)));
        }
        let texture_type = TextureType::from_u8(header.texture_type)
            .ok_or_else(|| invalid(format!("unknown texture type {}", header.texture_type)))?;

        let payload_len = (body_len - payload_start) as u64;
        let mut index = HashMap::with_capacity(header.slices.len());

        for (i, slice) in header.slices.iter().enumerate() {
            let levels = header
                .level_counts
                .get(slice.image as usize)
                .copied()
                .unwrap_or(0);
            if slice.level >= levels {
                return Err(invalid(format!(
                    "slice {} refers to missing image {} level {}",
                    i, slice.image, slice.level
                )));
            }
            if slice.width == 0 || slice.height == 0 {
                return Err(invalid(format!(
                    "slice {} has empty geometry {}x{}",
                    i, slice.width, slice.height
                )));
            }
            if u64::from(slice.offset) + u64::from(slice.len) > payload_len {
                return Err(invalid(format!("slice {} extends past end of file", i)));
            }
            if slice.len as usize != PAYLOAD_FORMAT.info().buffer_len(slice.width, slice.height) {
                return Err(invalid(format!("slice {} has wrong payload size", i)));
            }
            if index.insert((slice.image, slice.level), i).is_some() {
                return Err(invalid(format!("duplicate slice for image {} level {}", slice.image, slice.level)));
            }
        }

        let expected: u64 = header.level_counts.iter().map(|&n| u64::from(n)).sum();
        if index.len() as u64 != expected {
            return Err(invalid(format!(
                "slice table has {} entries, levels require {}",
                index.len(),
                expected
            )));
        }

        if texture_type == TextureType::Cubemap {
            check_uniform_faces(&header, &index).map_err(invalid)?;
        }

        let facts = HeaderFacts {
            image_count: header.image_count,
            level_counts: header.level_counts.clone(),
            texture_type,
            flags: ContainerFlags {
                y_flipped: header.flags & FLAG_Y_FLIPPED != 0,
                has_alpha: header.flags & FLAG_HAS_ALPHA != 0,
            },
            us_per_frame: header.us_per_frame,
            userdata: header.userdata,
        };

        Ok(Self {
            header,
            facts,
            bytes,
            payload_start,
            index,
        })
    }

    /// Slice descriptor and payload bytes of one level
    pub fn slice(&self, image: u32, level: u32) -> Option<(&SliceDesc, &[u8])> {
        let desc = &self.header.slices[*self.index.get(&(image, level))?];
        let start = self.payload_start + desc.offset as usize;
        Some((desc, &self.bytes[start..start + desc.len as usize]))
    }
}

/// Cubemap faces must share level count and per-level size
fn check_uniform_faces(
    header: &ContainerHeader,
    index: &HashMap<(u32, u32), usize>,
) -> Result<(), String> {
    let Some(&levels) = header.level_counts.first() else {
        return Ok(());
    };
    let size = |image: u32, level: u32| {
        index
            .get(&(image, level))
            .map(|&i| (header.slices[i].width, header.slices[i].height))
    };

    for (image, &count) in header.level_counts.iter().enumerate() {
        let image = image as u32;
        if count != levels {
            return Err(format!(
                "cubemap face {} has {} levels, face 0 has {}",
                image, count, levels
            ));
        }
        for level in 0..count {
            if size(image, level) != size(0, level) {
                return Err(format!(
                    "cubemap face {} level {} differs in size from face 0",
                    image, level
                ));
            }
        }
    }
    Ok(())
}

impl Container for TbcContainer {
    fn verify_checksum(&self) -> bool {
        hash::verify_sealed(&self.bytes)
    }

    fn header_facts(&self) -> &HeaderFacts {
        &self.facts
    }

    fn level_geometry(&self, image: u32, level: u32) -> Option<LevelGeometry> {
        let (desc, _) = self.slice(image, level)?;
        let (blocks_x, blocks_y) = PAYLOAD_FORMAT.info().blocks_for(desc.width, desc.height);
        Some(LevelGeometry {
            width: desc.width,
            height: desc.height,
            blocks_x,
            blocks_y,
            has_alpha: self.facts.flags.has_alpha,
        })
    }

    fn transcode(
        &self,
        image: u32,
        level: u32,
        format: TranscodeFormat,
        dst: &mut [u8],
    ) -> Result<(), EngineFailure> {
        let (desc, blocks) = self
            .slice(image, level)
            .ok_or_else(|| EngineFailure(format!("no slice for image {} level {}", image, level)))?;
        transcoder::transcode_blocks(desc.width, desc.height, blocks, format, dst)
    }
}
