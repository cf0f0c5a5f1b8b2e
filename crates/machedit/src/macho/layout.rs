//! Endianness and layout primitives.
//!
//! A magic is kept exactly as it reads in host byte order, so it doubles as
//! the byte-order tag for everything that follows it: a swapped magic means
//! every multi-byte field of that structure is stored in the non-native
//! order. All other parsed fields are held in host order and swapped at I/O
//! time through [`endian_of`].

use goblin::mach::constants::cputype::{CpuType, CPU_TYPE_ARM64, CPU_TYPE_ARM64_32};
use goblin::mach::fat::{FAT_CIGAM, FAT_MAGIC};
use goblin::mach::header::{MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64};
use scroll::Endian;

/// True for any of the four Mach-O magics or the two fat magics.
pub fn is_magic(magic: u32) -> bool {
    is_fat_magic(magic) || is_mach_magic(magic)
}

/// True for the fat container magics, in either byte order.
pub fn is_fat_magic(magic: u32) -> bool {
    magic == FAT_MAGIC || magic == FAT_CIGAM
}

/// True for the thin Mach-O magics, 32- or 64-bit, in either byte order.
pub fn is_mach_magic(magic: u32) -> bool {
    matches!(magic, MH_MAGIC | MH_CIGAM | MH_MAGIC_64 | MH_CIGAM_64)
}

/// True when `magic` is one of the byte-swapped forms, i.e. the structure it
/// tags is stored in the non-native byte order.
pub fn needs_swap(magic: u32) -> bool {
    matches!(magic, MH_CIGAM | MH_CIGAM_64 | FAT_CIGAM)
}

/// Byte-reverse `v` iff the structure tagged by `magic` is byte-swapped.
pub fn swap32(v: u32, magic: u32) -> u32 {
    if needs_swap(magic) {
        v.swap_bytes()
    } else {
        v
    }
}

/// 64-bit variant of [`swap32`].
pub fn swap64(v: u64, magic: u32) -> u64 {
    if needs_swap(magic) {
        v.swap_bytes()
    } else {
        v
    }
}

/// The `scroll` endianness of the structure tagged by `magic`.
pub fn endian_of(magic: u32) -> Endian {
    if needs_swap(magic) {
        match scroll::NATIVE {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        }
    } else {
        scroll::NATIVE
    }
}

/// Smallest multiple of `align` that is >= `x`. `align` must be a power of
/// two.
pub fn round_up(x: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (x + align - 1) & !(align - 1)
}

/// Conventional VM page size for a CPU family, used as the default slice
/// alignment when synthesizing a fat entry for a thin file.
pub fn cpu_pagesize(cputype: CpuType) -> u32 {
    match cputype {
        CPU_TYPE_ARM64 | CPU_TYPE_ARM64_32 => 0x4000,
        _ => 0x1000,
    }
}
