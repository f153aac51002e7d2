use std::fmt::Debug;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

index_vec::define_index_type! {
    pub struct FaceIdx = u32;
    MAX_INDEX = WideFaceIndex::INDEX_MASK as usize;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    pub struct VertexIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

bitflags! {
    /// Per-face collision flags.
    ///
    /// The two cull bits tell which sides of the face collide: `CULL_CCW` is the front side
    /// (counter-clockwise winding when looking at it), `CULL_CW` the back side.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FaceFlags: u8 {
        const CULL_CCW = 0b0000_0001;
        const CULL_CW = 0b0000_0010;
        const CULL_BOTH = Self::CULL_CCW.bits() | Self::CULL_CW.bits();
        /// Face is excluded from queries by the default skip mask.
        const USER_INVISIBLE = 0b0000_0100;
        const USER_FLAG_1 = 0b0001_0000;
        const USER_FLAG_2 = 0b0010_0000;
        const USER_FLAG_3 = 0b0100_0000;
        const USER_FLAG_4 = 0b1000_0000;
    }
}

/// Entry of the face index array that BVH leaves point into.
///
/// Representations either carry per-face flags (`HAS_FLAGS`) or not. Flagless
/// representations report `FaceFlags::CULL_CCW` and skip the skip/use filtering.
pub trait FaceIndex: Copy + Pod + Debug + Send + Sync + 'static {
    const HAS_FLAGS: bool;
    /// Largest representable face index
    const MAX_FACE: usize;

    /// Creates the entry, panics if the face doesn't fit.
    fn new(face: FaceIdx, flags: FaceFlags) -> Self;
    fn face(self) -> FaceIdx;
    fn flags(self) -> FaceFlags;
}

/// 24 bit face index with 8 bits of flags.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct WideFaceIndex(u32);

impl WideFaceIndex {
    const INDEX_BITS: u32 = 24;
    const INDEX_MASK: u32 = (1 << Self::INDEX_BITS) - 1;
}

impl FaceIndex for WideFaceIndex {
    const HAS_FLAGS: bool = true;
    const MAX_FACE: usize = Self::INDEX_MASK as usize;

    fn new(face: FaceIdx, flags: FaceFlags) -> Self {
        assert!(face.index() <= Self::MAX_FACE);
        Self(face.raw() | (flags.bits() as u32) << Self::INDEX_BITS)
    }

    fn face(self) -> FaceIdx {
        FaceIdx::from_raw(self.0 & Self::INDEX_MASK)
    }

    fn flags(self) -> FaceFlags {
        FaceFlags::from_bits_retain((self.0 >> Self::INDEX_BITS) as u8)
    }
}

impl Debug for WideFaceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WideFaceIndex")
            .field("face", &self.face())
            .field("flags", &self.flags())
            .finish()
    }
}

impl FaceIndex for u16 {
    const HAS_FLAGS: bool = false;
    const MAX_FACE: usize = u16::MAX as usize;

    fn new(face: FaceIdx, _flags: FaceFlags) -> Self {
        u16::try_from(face.raw()).expect("Face index must fit into 16 bits")
    }

    fn face(self) -> FaceIdx {
        FaceIdx::from_raw(self as u32)
    }

    fn flags(self) -> FaceFlags {
        FaceFlags::CULL_CCW
    }
}
