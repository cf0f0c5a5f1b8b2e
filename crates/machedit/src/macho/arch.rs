//! The parsed state of one architecture slice.
//!
//! An [`Arch`] couples the slice's fat-table entry (authoritative for
//! placement), its mach header (authoritative for command count and size),
//! and the decoded load-command table. Load commands are kept as opaque
//! payload bytes in the slice's own byte order; known variants are decoded
//! on demand where an operation needs their fields.

use std::fs::File;

use goblin::mach::fat::FatArch;
use goblin::mach::header::{MH_CIGAM_64, MH_MAGIC_64, SIZEOF_HEADER_32, SIZEOF_HEADER_64};
use goblin::mach::load_command::{
    SegmentCommand32, SegmentCommand64, LC_SEGMENT, LC_SEGMENT_64,
};
use scroll::{Endian, Pread, Pwrite};

use crate::error::Error;
use crate::macho::fileio::{read_exact_at, write_all_at};
use crate::macho::layout::{cpu_pagesize, endian_of, is_mach_magic};
use crate::macho::names;
use crate::Result;

/// Unified view of a 32- or 64-bit mach header.
///
/// The `magic` field is kept exactly as it reads in host order so that it
/// stays the byte-order tag for the slice; every other field is stored in
/// host order and swapped on read/write.
#[derive(Debug, Clone, Copy)]
pub struct MachHeader {
    pub magic: u32,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    /// Present in the 64-bit header only; zero for 32-bit slices.
    pub reserved: u32,
}

impl MachHeader {
    pub fn is_64(&self) -> bool {
        self.magic == MH_MAGIC_64 || self.magic == MH_CIGAM_64
    }

    pub fn endian(&self) -> Endian {
        endian_of(self.magic)
    }

    /// On-disk size of this header variant.
    pub fn size(&self) -> usize {
        if self.is_64() {
            SIZEOF_HEADER_64
        } else {
            SIZEOF_HEADER_32
        }
    }

    pub fn read(file: &File, offset: u64) -> Result<Self> {
        let mut magic_buf = [0u8; 4];
        read_exact_at(file, offset, &mut magic_buf)?;
        let magic = u32::from_ne_bytes(magic_buf);
        if !is_mach_magic(magic) {
            return Err(Error::MalformedSlice(format!(
                "bad mach magic {magic:#010x} at offset {offset:#x}"
            )));
        }

        let is_64 = magic == MH_MAGIC_64 || magic == MH_CIGAM_64;
        let size = if is_64 { SIZEOF_HEADER_64 } else { SIZEOF_HEADER_32 };
        let mut buf = vec![0u8; size];
        read_exact_at(file, offset, &mut buf)?;
        let raw: &[u8] = &buf;
        let endian = endian_of(magic);

        Ok(MachHeader {
            magic,
            cputype: raw.pread_with(4, endian)?,
            cpusubtype: raw.pread_with(8, endian)?,
            filetype: raw.pread_with(12, endian)?,
            ncmds: raw.pread_with(16, endian)?,
            sizeofcmds: raw.pread_with(20, endian)?,
            flags: raw.pread_with(24, endian)?,
            reserved: if is_64 { raw.pread_with(28, endian)? } else { 0 },
        })
    }

    pub fn write(&self, file: &File, offset: u64) -> Result<()> {
        let mut buf = vec![0u8; self.size()];
        buf[0..4].copy_from_slice(&self.magic.to_ne_bytes());
        let endian = self.endian();
        {
            let raw: &mut [u8] = &mut buf;
            raw.pwrite_with(self.cputype, 4, endian)?;
            raw.pwrite_with(self.cpusubtype, 8, endian)?;
            raw.pwrite_with(self.filetype, 12, endian)?;
            raw.pwrite_with(self.ncmds, 16, endian)?;
            raw.pwrite_with(self.sizeofcmds, 20, endian)?;
            raw.pwrite_with(self.flags, 24, endian)?;
            if self.is_64() {
                raw.pwrite_with(self.reserved, 28, endian)?;
            }
        }
        write_all_at(file, offset, &buf)?;
        Ok(())
    }
}

/// One decoded load-command record.
///
/// `raw` holds the full `cmdsize` payload in the slice's byte order; its
/// first eight bytes, swapped per the slice magic, equal `(cmd, cmdsize)`.
#[derive(Debug, Clone)]
pub struct LoadCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    /// Absolute file offset of this command.
    pub file_offset: u32,
    pub raw: Vec<u8>,
}

/// One architecture within a container.
#[derive(Debug, Clone)]
pub struct Arch {
    /// Fat-table entry, in host order. Authoritative for slice placement.
    pub entry: FatArch,
    pub header: MachHeader,
    pub commands: Vec<LoadCommand>,
}

impl Arch {
    /// Parse the slice described by `entry` out of `file`.
    pub fn read(file: &File, entry: FatArch) -> Result<Self> {
        let slice_end = entry.offset as u64 + entry.size as u64;
        let header = MachHeader::read(file, entry.offset as u64)?;
        let endian = header.endian();

        let mut commands = Vec::with_capacity(header.ncmds as usize);
        let mut offset = entry.offset as u64 + header.size() as u64;
        let mut total: u32 = 0;
        for i in 0..header.ncmds {
            let mut peek = [0u8; 8];
            read_exact_at(file, offset, &mut peek)?;
            let peeked: &[u8] = &peek;
            let cmd: u32 = peeked.pread_with(0, endian)?;
            let cmdsize: u32 = peeked.pread_with(4, endian)?;

            if cmdsize < 8 {
                return Err(Error::MalformedSlice(format!(
                    "load command {i} has cmdsize {cmdsize}"
                )));
            }
            total = total.checked_add(cmdsize).ok_or_else(|| {
                Error::MalformedSlice("load command sizes overflow".into())
            })?;
            if total > header.sizeofcmds {
                return Err(Error::MalformedSlice(format!(
                    "load commands exceed sizeofcmds ({total} > {})",
                    header.sizeofcmds
                )));
            }
            if offset + cmdsize as u64 > slice_end {
                return Err(Error::MalformedSlice(format!(
                    "load command {i} overruns the slice"
                )));
            }

            let mut raw = vec![0u8; cmdsize as usize];
            read_exact_at(file, offset, &mut raw)?;
            commands.push(LoadCommand {
                cmd,
                cmdsize,
                file_offset: offset as u32,
                raw,
            });
            offset += cmdsize as u64;
        }

        Ok(Arch {
            entry,
            header,
            commands,
        })
    }

    /// Synthesize the fat entry for a thin file from its mach header.
    pub fn thin_entry(header: &MachHeader, file_size: u32) -> FatArch {
        FatArch {
            cputype: header.cputype,
            cpusubtype: header.cpusubtype,
            offset: 0,
            size: file_size,
            align: cpu_pagesize(header.cputype).trailing_zeros(),
        }
    }

    /// Re-anchor the slice at `new_offset`, recomputing every load command's
    /// absolute file offset. Called whenever an operation moves slice bytes.
    pub fn relocate(&mut self, new_offset: u32) {
        self.entry.offset = new_offset;
        let mut offset = new_offset + self.header.size() as u32;
        for lc in &mut self.commands {
            lc.file_offset = offset;
            offset += lc.cmdsize;
        }
    }

    /// File offset (slice-relative) of the first mapped segment content,
    /// bounding the room available to the load-command table. Segments with
    /// `fileoff == 0` span the header itself and don't count.
    pub fn first_segment_fileoff(&self) -> Option<u64> {
        let endian = self.header.endian();
        self.commands
            .iter()
            .filter_map(|lc| match lc.cmd {
                LC_SEGMENT => lc
                    .raw
                    .pread_with::<SegmentCommand32>(0, endian)
                    .ok()
                    .map(|seg| seg.fileoff as u64),
                LC_SEGMENT_64 => lc
                    .raw
                    .pread_with::<SegmentCommand64>(0, endian)
                    .ok()
                    .map(|seg| seg.fileoff),
                _ => None,
            })
            .filter(|&fileoff| fileoff > 0)
            .min()
    }

    /// One-line human description, e.g. `x86_64 executable, 16384 bytes at
    /// offset 0x0, 12 load commands`.
    pub fn description(&self) -> String {
        format!(
            "{} {}, {} bytes at offset {:#x}, {} load commands",
            names::cpu_name(self.entry.cputype),
            names::filetype_name(self.header.filetype),
            self.entry.size,
            self.entry.offset,
            self.header.ncmds,
        )
    }
}
