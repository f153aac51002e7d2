//! On-disk records of a scene dump.
//!
//! A dump starts with `RawHeader`, all other data lives in regions referenced from it by
//! `RelSlice`s holding byte offsets from the start of the dump.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::geometry::{BoundingSphere, WorldPoint};
use crate::scene::bvh::{Node, NodeKind};

use super::DumpError;

pub const MAGIC: [u8; 4] = *b"SRTD";
pub const CURRENT_VERSION: u32 = 2;
pub const LEGACY_VERSION: u32 = 1;

/// Alignment of regions in the current format.
pub const REGION_ALIGN: usize = 16;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RelSlice {
    pub offset: u32,
    pub count: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct RawHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub face_index_size: u32,
    pub top_level: u32,
    pub leaf_size: [f32; 4],
    pub bounding_box_min: [f32; 4],
    pub bounding_box_max: [f32; 4],
    pub leaf_limits_min: [i32; 4],
    pub leaf_limits_max: [i32; 4],
    pub top_origin: [i32; 4],
    pub top_dims: [u32; 4],
    pub default_skip_flags: u32,
    pub default_use_flags: u32,
    pub reserved: [u32; 2],
    pub vertices: RelSlice,
    pub faces: RelSlice,
    pub face_indices: RelSlice,
    pub nodes: RelSlice,
    pub grid_top: RelSlice,
    pub grid_branches: RelSlice,
}

pub type RawVertex = [f32; 4];
pub type RawFace = [u32; 3];
pub type RawGridBranch = [u32; 8];

/// BVH node of the current format.
///
/// Branch children are byte offsets from the start of the node region,
/// leaves hold a range of face index slots.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct RawNode {
    pub center: [f32; 3],
    pub radius_squared: f32,
    pub kind: u32,
    pub sub0: u32,
    pub sub1: u32,
    pub reserved: u32,
}

impl RawNode {
    pub const LEAF: u32 = 0;
    pub const BRANCH: u32 = 1;

    pub fn child_offset(index: usize) -> u32 {
        (index * size_of::<RawNode>()) as u32
    }

    pub fn from_node(node: &Node, child_offset: impl Fn(usize) -> u32) -> RawNode {
        let (kind, sub0, sub1) = match &node.kind {
            NodeKind::Branch { left, right } => (
                Self::BRANCH,
                child_offset(left.index()),
                child_offset(right.index()),
            ),
            NodeKind::Leaf { faces } => (Self::LEAF, faces.start, faces.end),
        };
        RawNode {
            center: sphere_center(&node.sphere),
            radius_squared: node.sphere.radius_squared,
            kind,
            sub0,
            sub1,
            reserved: 0,
        }
    }

    pub fn sphere(&self) -> BoundingSphere {
        BoundingSphere::new(self.center.into(), self.radius_squared)
    }
}

/// BVH node of the legacy format.
///
/// Children are byte offsets from the start of the dump, the right child is always
/// stored before the left one. Leaves have `sub0 == 0` and hold their face index range
/// as byte offsets from the start of the dump in `sub1` and `face_end`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct RawLegacyNode {
    pub center: [f32; 3],
    pub radius_squared: f32,
    pub sub0: u32,
    pub sub1: u32,
    pub face_end: u32,
}

pub fn sphere_center(sphere: &BoundingSphere) -> [f32; 3] {
    let WorldPoint { coords } = sphere.center;
    [coords.x, coords.y, coords.z]
}

/// Reads the header and checks magic and face index width.
pub fn read_header(bytes: &[u8], face_index_size: usize) -> Result<RawHeader, DumpError> {
    let header_bytes = bytes
        .get(..size_of::<RawHeader>())
        .ok_or(DumpError::Truncated {
            needed: size_of::<RawHeader>(),
            available: bytes.len(),
        })?;
    let header: RawHeader = bytemuck::pod_read_unaligned(header_bytes);

    if header.magic != MAGIC {
        return Err(DumpError::BadMagic(header.magic));
    }
    if header.version != CURRENT_VERSION && header.version != LEGACY_VERSION {
        return Err(DumpError::UnsupportedVersion(header.version));
    }
    if header.face_index_size as usize != face_index_size {
        return Err(DumpError::FaceIndexWidth {
            found: header.face_index_size as usize,
            expected: face_index_size,
        });
    }

    Ok(header)
}

/// Byte range of a region, checked against the dump size.
pub fn region_bytes<'a, T: Pod>(bytes: &'a [u8], slice: RelSlice, region: &'static str) -> Result<&'a [u8], DumpError> {
    let start = slice.offset as usize;
    let end = (slice.count as usize)
        .checked_mul(size_of::<T>())
        .and_then(|len| len.checked_add(start));
    end.and_then(|end| bytes.get(start..end))
        .ok_or(DumpError::RegionOutOfBounds {
            region,
            offset: slice.offset,
            count: slice.count,
        })
}

/// Copies out the records of a region. The region doesn't need to be aligned.
pub fn read_region<T: Pod>(bytes: &[u8], slice: RelSlice, region: &'static str) -> Result<Vec<T>, DumpError> {
    Ok(region_bytes::<T>(bytes, slice, region)?
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Checks that a region is aligned for direct SIMD loads.
pub fn check_aligned(slice: RelSlice, region: &'static str) -> Result<(), DumpError> {
    if slice.offset as usize % REGION_ALIGN == 0 {
        Ok(())
    } else {
        Err(DumpError::Misaligned {
            region,
            offset: slice.offset,
            align: REGION_ALIGN,
        })
    }
}

/// Builds a dump from regions, leaving space for the header in front.
pub struct DumpWriter {
    bytes: Vec<u8>,
    align: usize,
}

impl DumpWriter {
    pub fn new(align: usize) -> DumpWriter {
        DumpWriter {
            bytes: vec![0; size_of::<RawHeader>()],
            align,
        }
    }

    /// Offset at which the next region will start.
    pub fn next_offset(&self) -> usize {
        self.bytes.len().next_multiple_of(self.align)
    }

    pub fn region<T: Pod>(&mut self, items: &[T]) -> RelSlice {
        let offset = self.next_offset();
        self.bytes.resize(offset, 0);
        self.bytes.extend_from_slice(bytemuck::cast_slice(items));
        RelSlice {
            offset: u32::try_from(offset).expect("Dump must fit into 4GB"),
            count: u32::try_from(items.len()).expect("Region must have less than 2^32 items"),
        }
    }

    pub fn finish(mut self, header: &RawHeader) -> Vec<u8> {
        self.bytes[..size_of::<RawHeader>()].copy_from_slice(bytemuck::bytes_of(header));
        self.bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use assert2::{assert, let_assert};

    #[test]
    fn record_sizes() {
        assert!(size_of::<RawHeader>() == 192);
        assert!(size_of::<RawNode>() == 32);
        assert!(size_of::<RawLegacyNode>() == 28);
    }

    #[test]
    fn writer_aligns_regions() {
        let mut writer = DumpWriter::new(REGION_ALIGN);
        let a = writer.region(&[1u16, 2, 3]);
        let b = writer.region(&[5u32]);
        assert!(a.offset as usize == size_of::<RawHeader>());
        assert!(b.offset as usize % REGION_ALIGN == 0);
        assert!(b.offset > a.offset + 6);

        let bytes = writer.finish(&RawHeader::zeroed());
        let_assert!(Ok(values) = read_region::<u16>(&bytes, a, "a"));
        assert!(values == vec![1, 2, 3]);
    }

    #[test]
    fn packed_writer_keeps_regions_unaligned() {
        let mut writer = DumpWriter::new(1);
        writer.region(&[1u16]);
        let b = writer.region(&[5u32]);
        assert!(b.offset as usize == size_of::<RawHeader>() + 2);
        assert!(check_aligned(b, "b").is_err());

        let bytes = writer.finish(&RawHeader::zeroed());
        let_assert!(Ok(values) = read_region::<u32>(&bytes, b, "b"));
        assert!(values == vec![5]);
    }

    #[test]
    fn region_out_of_bounds() {
        let bytes = vec![0u8; 300];
        let slice = RelSlice { offset: 290, count: 3 };
        let_assert!(Err(DumpError::RegionOutOfBounds { region: "x", .. }) = read_region::<u32>(&bytes, slice, "x"));
    }

    #[test]
    fn region_count_overflow() {
        let bytes = vec![0u8; 300];
        let slice = RelSlice { offset: u32::MAX, count: u32::MAX };
        assert!(read_region::<[u32; 8]>(&bytes, slice, "x").is_err());
    }
}
