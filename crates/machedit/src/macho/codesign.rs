//! Code-signature removal.
//!
//! Stripping a signature only works when the signature blob is the trailing
//! data of the slice and `__LINKEDIT` is its trailing segment; the slice is
//! then shortened by the blob (plus up to 16 bytes of padding between the
//! symbol string table and the old end), and the fat entry, `__LINKEDIT`
//! command and mach header are re-emitted to match.

use goblin::mach::load_command::{
    LinkeditDataCommand, SegmentCommand32, SegmentCommand64, SymtabCommand, LC_CODE_SIGNATURE,
    LC_SEGMENT, LC_SEGMENT_64, LC_SYMTAB,
};
use log::{debug, info};
use scroll::{Pread, Pwrite};

use crate::macho::container::Container;
use crate::macho::layout::round_up;
use crate::Result;

const LINKEDIT_SEGNAME: &[u8; 16] = b"__LINKEDIT\0\0\0\0\0\0";

/// Padding tolerated between the end of the symbol string table and the
/// truncated slice end.
const MAX_STRTAB_TAIL_GAP: i64 = 0x10;

impl Container {
    /// Strip the code signature from the `arch_index`-th slice.
    ///
    /// Returns `Ok(false)`, without mutating anything, when the structural
    /// preconditions don't hold: no (or more than one) `LC_CODE_SIGNATURE`,
    /// no `__LINKEDIT` segment, or either of them not ending exactly at the
    /// slice end.
    pub fn remove_codesignature(&mut self, arch_index: usize) -> Result<bool> {
        assert!(arch_index < self.archs.len(), "arch index out of range");

        let arch = &self.archs[arch_index];
        let endian = arch.header.endian();

        let mut codesig: Option<(usize, LinkeditDataCommand)> = None;
        let mut linkedit_index: Option<usize> = None;
        let mut symtab: Option<SymtabCommand> = None;

        for (i, lc) in arch.commands.iter().enumerate() {
            match lc.cmd {
                LC_CODE_SIGNATURE => {
                    if codesig.is_some() {
                        debug!("more than one LC_CODE_SIGNATURE");
                        return Ok(false);
                    }
                    codesig = Some((i, lc.raw.pread_with(0, endian)?));
                }
                LC_SEGMENT | LC_SEGMENT_64 => {
                    if lc.raw.len() >= 24 && &lc.raw[8..24] == LINKEDIT_SEGNAME {
                        linkedit_index = Some(i);
                    }
                }
                LC_SYMTAB => {
                    symtab = Some(lc.raw.pread_with(0, endian)?);
                }
                _ => {}
            }
        }

        let (Some((codesig_index, codesig)), Some(linkedit_index)) = (codesig, linkedit_index)
        else {
            debug!("no code signature or no __LINKEDIT segment");
            return Ok(false);
        };

        let slice_size = arch.entry.size;
        if codesig.dataoff as u64 + codesig.datasize as u64 != slice_size as u64 {
            debug!("signature is not the trailing data of the slice");
            return Ok(false);
        }

        let linkedit_lc = &arch.commands[linkedit_index];
        let is_seg64 = linkedit_lc.cmd == LC_SEGMENT_64;
        let (linkedit_fileoff, linkedit_filesize) = if is_seg64 {
            let seg: SegmentCommand64 = linkedit_lc.raw.pread_with(0, endian)?;
            (seg.fileoff, seg.filesize)
        } else {
            let seg: SegmentCommand32 = linkedit_lc.raw.pread_with(0, endian)?;
            (seg.fileoff as u64, seg.filesize as u64)
        };
        if linkedit_fileoff + linkedit_filesize != slice_size as u64 {
            debug!("__LINKEDIT is not the trailing segment of the slice");
            return Ok(false);
        }

        let mut reduction = codesig.datasize;
        if let Some(symtab) = symtab {
            let tail_gap = (slice_size as i64 - reduction as i64)
                - (symtab.stroff as i64 + symtab.strsize as i64);
            if (0..=MAX_STRTAB_TAIL_GAP).contains(&tail_gap) {
                reduction += tail_gap as u32;
            }
        }
        let Some(new_filesize) = linkedit_filesize.checked_sub(reduction as u64) else {
            debug!("signature larger than __LINKEDIT");
            return Ok(false);
        };
        let new_vmsize = round_up(new_filesize, 0x1000);
        info!("stripping code signature: {reduction} bytes");

        {
            let arch = &mut self.archs[arch_index];
            arch.entry.size -= reduction;
            let lc = &mut arch.commands[linkedit_index];
            if is_seg64 {
                let mut seg: SegmentCommand64 = lc.raw.pread_with(0, endian)?;
                seg.filesize = new_filesize;
                seg.vmsize = new_vmsize;
                lc.raw.pwrite_with(seg, 0, endian)?;
            } else {
                let mut seg: SegmentCommand32 = lc.raw.pread_with(0, endian)?;
                seg.filesize = new_filesize as u32;
                seg.vmsize = new_vmsize as u32;
                lc.raw.pwrite_with(seg, 0, endian)?;
            }
        }

        self.write_fat_entries()?;
        self.write_load_command(arch_index, linkedit_index)?;
        self.remove_load_command(arch_index, codesig_index)?;
        Ok(true)
    }
}
