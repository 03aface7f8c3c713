//! Item identity. Type + variant + identity-relevant tag digest. Never a count.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// BLAKE3 digest of whatever per-instance tag data the host treats as
/// identity-relevant. All zeroes means "no tag".
pub type TagDigest = [u8; 32];

/// A distinct storable variant. 40 bytes, POD, totally ordered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromBytes, IntoBytes, KnownLayout,
    Immutable,
)]
#[repr(C)]
pub struct ItemId {
    pub kind: u32,
    pub variant: u32,
    pub tag: TagDigest,
}

const _: () = {
    assert!(core::mem::size_of::<ItemId>() == 40);
};

impl ItemId {
    pub const SIZE: usize = 40;

    #[inline(always)]
    pub const fn new(kind: u32, variant: u32) -> Self {
        Self {
            kind,
            variant,
            tag: [0u8; 32],
        }
    }

    /// Identity carrying tag data. The tag is hashed, never stored raw.
    pub fn tagged(kind: u32, variant: u32, tag: &[u8]) -> Self {
        if tag.is_empty() {
            return Self::new(kind, variant);
        }
        Self {
            kind,
            variant,
            tag: *blake3::hash(tag).as_bytes(),
        }
    }

    #[inline(always)]
    pub fn has_tag(&self) -> bool {
        self.tag != [0u8; 32]
    }
}

impl core::fmt::Display for ItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind, self.variant)?;
        if self.has_tag() {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.tag[0], self.tag[1], self.tag[2], self.tag[3])?;
        }
        Ok(())
    }
}

/// Identity plus a count, as the recipe oracle reports outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemStack {
    pub id: ItemId,
    pub count: u32,
}

impl ItemStack {
    #[inline(always)]
    pub const fn new(id: ItemId, count: u32) -> Self {
        Self { id, count }
    }

    #[inline(always)]
    pub const fn one(id: ItemId) -> Self {
        Self { id, count: 1 }
    }

    /// Single-unit reference form. Drops the count, keeps the identity.
    #[inline(always)]
    pub const fn normalized(&self) -> ItemId {
        self.id
    }
}

impl From<ItemId> for ItemStack {
    fn from(id: ItemId) -> Self {
        Self::one(id)
    }
}
