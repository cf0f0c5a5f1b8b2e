//! The top-level Mach-O container and its editing operations.
//!
//! A [`Container`] exclusively owns one open file for its lifetime. Between
//! operations the in-memory model always describes the on-disk bytes; each
//! operation re-emits whichever of the fat header, fat entries, mach header
//! and load commands it touched before returning.

use std::fs::{File, OpenOptions};
use std::path::Path;

use goblin::mach::fat::{FatArch, FAT_CIGAM, SIZEOF_FAT_ARCH, SIZEOF_FAT_HEADER};
use log::debug;
use scroll::{Pread, Pwrite};

use crate::error::Error;
use crate::macho::arch::{Arch, LoadCommand, MachHeader};
use crate::macho::fileio::{copy_range, move_range, read_exact_at, write_all_at, zero_range};
use crate::macho::layout::{endian_of, is_fat_magic, is_magic, round_up};
use crate::Result;

/// An open Mach-O file, thin or fat, and its parsed slices.
pub struct Container {
    pub(crate) file: File,
    pub(crate) file_size: u32,
    pub(crate) is_fat: bool,
    /// The fat magic in effect, kept even while thin so the container can be
    /// promoted without a policy decision. The canonical value is the
    /// byte-swapped form, which is what the platform loader expects.
    pub(crate) fat_magic: u32,
    pub(crate) archs: Vec<Arch>,
}

impl Container {
    /// Open `path` read-write and parse the container structure.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let mut magic_buf = [0u8; 4];
        read_exact_at(&file, 0, &mut magic_buf)?;
        let magic = u32::from_ne_bytes(magic_buf);
        if !is_magic(magic) {
            return Err(Error::UnknownMagic(magic));
        }

        let len = file.metadata()?.len();
        if len > u32::MAX as u64 {
            return Err(Error::FileTooLarge(len));
        }
        let file_size = len as u32;

        let is_fat = is_fat_magic(magic);
        let (fat_magic, archs) = if is_fat {
            let endian = endian_of(magic);
            let mut header_buf = [0u8; SIZEOF_FAT_HEADER];
            read_exact_at(&file, 0, &mut header_buf)?;
            let raw: &[u8] = &header_buf;
            let n_archs: u32 = raw.pread_with(4, endian)?;

            let table_end =
                SIZEOF_FAT_HEADER as u64 + n_archs as u64 * SIZEOF_FAT_ARCH as u64;
            if table_end > len {
                return Err(Error::MalformedSlice(format!(
                    "fat table of {n_archs} entries overruns the file"
                )));
            }

            let mut archs = Vec::with_capacity(n_archs as usize);
            for i in 0..n_archs {
                let mut entry_buf = [0u8; SIZEOF_FAT_ARCH];
                let entry_off = SIZEOF_FAT_HEADER as u64 + i as u64 * SIZEOF_FAT_ARCH as u64;
                read_exact_at(&file, entry_off, &mut entry_buf)?;
                let raw: &[u8] = &entry_buf;
                let entry: FatArch = raw.pread_with(0, endian)?;

                if entry.align >= 32 {
                    return Err(Error::MalformedSlice(format!(
                        "arch {i} has alignment exponent {}",
                        entry.align
                    )));
                }
                if entry.offset as u64 + entry.size as u64 > len {
                    return Err(Error::MalformedSlice(format!(
                        "arch {i} overruns the file"
                    )));
                }
                archs.push(Arch::read(&file, entry)?);
            }
            (magic, archs)
        } else {
            let header = MachHeader::read(&file, 0)?;
            let entry = Arch::thin_entry(&header, file_size);
            (FAT_CIGAM, vec![Arch::read(&file, entry)?])
        };

        debug!(
            "opened {} ({} bytes, {}, {} arch(s))",
            path.display(),
            file_size,
            if is_fat { "fat" } else { "thin" },
            archs.len()
        );

        Ok(Container {
            file,
            file_size,
            is_fat,
            fat_magic,
            archs,
        })
    }

    pub fn is_fat(&self) -> bool {
        self.is_fat
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn fat_magic(&self) -> u32 {
        self.fat_magic
    }

    pub fn archs(&self) -> &[Arch] {
        &self.archs
    }

    /// Human-readable summary of the container and each slice.
    pub fn describe(&self) -> String {
        let mut out = if self.is_fat {
            format!("Fat mach-o binary with {} archs:\n", self.archs.len())
        } else {
            String::from("Thin mach-o binary:\n")
        };
        for arch in &self.archs {
            out.push('\t');
            out.push_str(&arch.description());
            out.push('\n');
        }
        out
    }

    // ---- header serialization ------------------------------------------

    pub(crate) fn write_fat_header(&self) -> Result<()> {
        if !self.is_fat {
            return Ok(());
        }
        let mut buf = [0u8; SIZEOF_FAT_HEADER];
        buf[0..4].copy_from_slice(&self.fat_magic.to_ne_bytes());
        {
            let raw: &mut [u8] = &mut buf;
            raw.pwrite_with(self.archs.len() as u32, 4, endian_of(self.fat_magic))?;
        }
        write_all_at(&self.file, 0, &buf)?;
        Ok(())
    }

    /// Re-emit the fat entry table and trim the file to the last slice.
    ///
    /// For a thin container there is no table; the file is simply truncated
    /// to the single slice's size when they disagree.
    pub(crate) fn write_fat_entries(&mut self) -> Result<()> {
        if !self.is_fat {
            let arch_size = self.archs[0].entry.size;
            if self.file_size != arch_size {
                self.file.set_len(arch_size as u64)?;
                self.file_size = arch_size;
            }
            return Ok(());
        }

        let endian = endian_of(self.fat_magic);
        for (i, arch) in self.archs.iter().enumerate() {
            let mut buf = [0u8; SIZEOF_FAT_ARCH];
            {
                let raw: &mut [u8] = &mut buf;
                raw.pwrite_with(arch.entry, 0, endian)?;
            }
            let entry_off = SIZEOF_FAT_HEADER as u64 + i as u64 * SIZEOF_FAT_ARCH as u64;
            write_all_at(&self.file, entry_off, &buf)?;
        }

        if let Some(last) = self.archs.last() {
            let new_size = last.entry.offset + last.entry.size;
            if new_size != self.file_size {
                self.file.set_len(new_size as u64)?;
                self.file_size = new_size;
            }
        }
        Ok(())
    }

    pub(crate) fn write_mach_header(&self, arch_index: usize) -> Result<()> {
        let arch = &self.archs[arch_index];
        arch.header.write(&self.file, arch.entry.offset as u64)
    }

    pub(crate) fn write_load_command(&self, arch_index: usize, lc_index: usize) -> Result<()> {
        let lc = &self.archs[arch_index].commands[lc_index];
        write_all_at(&self.file, lc.file_offset as u64, &lc.raw)?;
        Ok(())
    }

    // ---- thin <-> fat --------------------------------------------------

    /// Promote a thin container to a single-slice fat container.
    ///
    /// The slice keeps its alignment; the original content moves up by
    /// `round_up(sizeof(fat_header), 2^align)` and the gap holds the new
    /// fat header.
    pub fn make_fat(&mut self) -> Result<()> {
        assert!(!self.is_fat, "container is already fat");

        let align = self.archs[0].entry.align;
        let reserve = round_up(SIZEOF_FAT_HEADER as u64, 1u64 << align) as u32;
        let old_size = self.file_size;
        if old_size as u64 + reserve as u64 > u32::MAX as u64 {
            return Err(Error::FileTooLarge(old_size as u64 + reserve as u64));
        }
        debug!("promoting to fat, reserving {reserve:#x} bytes for the header");

        self.file.set_len(old_size as u64 + reserve as u64)?;
        move_range(&self.file, reserve as u64, 0, old_size as u64)?;
        zero_range(&self.file, 0, reserve as u64)?;

        self.is_fat = true;
        self.fat_magic = FAT_CIGAM;
        self.file_size = old_size + reserve;
        self.archs[0].relocate(reserve);

        self.write_fat_header()?;
        self.write_fat_entries()?;
        Ok(())
    }

    /// Collapse a fat container to the thin file of its `arch_index`-th
    /// slice. The other slices are discarded.
    pub fn make_thin(&mut self, arch_index: usize) -> Result<()> {
        assert!(self.is_fat, "container is already thin");
        assert!(arch_index < self.archs.len(), "arch index out of range");

        let mut arch = self.archs[arch_index].clone();
        let size = arch.entry.size;
        debug!(
            "thinning to arch {arch_index} ({} bytes at {:#x})",
            size, arch.entry.offset
        );

        move_range(&self.file, 0, arch.entry.offset as u64, size as u64)?;
        self.file.set_len(size as u64)?;

        arch.relocate(0);
        self.archs = vec![arch];
        self.file_size = size;
        self.is_fat = false;
        Ok(())
    }

    /// Write the `arch_index`-th slice to a new executable file of its own.
    /// Returns `Ok(false)` if the destination cannot be created.
    pub fn save_arch_to(&self, arch_index: usize, path: impl AsRef<Path>) -> Result<bool> {
        assert!(arch_index < self.archs.len(), "arch index out of range");
        let arch = &self.archs[arch_index];

        let dest = match OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
        {
            Ok(dest) => dest,
            Err(err) => {
                debug!("couldn't create {}: {err}", path.as_ref().display());
                return Ok(false);
            }
        };

        copy_range(
            &dest,
            0,
            &self.file,
            arch.entry.offset as u64,
            arch.entry.size as u64,
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            dest.set_permissions(std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(true)
    }

    // ---- slice insertion and removal -----------------------------------

    /// Remove the `arch_index`-th slice and repack the survivors downward,
    /// each at its own alignment.
    pub fn remove_arch(&mut self, arch_index: usize) -> Result<()> {
        assert!(self.is_fat, "remove_arch requires a fat container");
        assert!(arch_index < self.archs.len(), "arch index out of range");

        let removed = self.archs.remove(arch_index);
        zero_range(
            &self.file,
            removed.entry.offset as u64,
            removed.entry.size as u64,
        )?;

        let mut new_offset = if arch_index == 0 {
            SIZEOF_FAT_HEADER as u32
        } else {
            let prev = &self.archs[arch_index - 1].entry;
            prev.offset + prev.size
        };

        for arch in &mut self.archs[arch_index..] {
            let old_offset = arch.entry.offset;
            let size = arch.entry.size;

            new_offset = round_up(new_offset as u64, 1u64 << arch.entry.align) as u32;
            move_range(&self.file, new_offset as u64, old_offset as u64, size as u64)?;
            if old_offset > new_offset {
                // stale tail of the moved-from range
                zero_range(
                    &self.file,
                    new_offset as u64 + size as u64,
                    (old_offset - new_offset) as u64,
                )?;
            }
            arch.relocate(new_offset);
            new_offset += size;
        }

        self.write_fat_header()?;
        self.write_fat_entries()?;
        if self.archs.is_empty() {
            self.file.set_len(new_offset as u64)?;
            self.file_size = new_offset;
        }
        debug!("removed arch {arch_index}, file now {} bytes", self.file_size);
        Ok(())
    }

    /// Append a copy of `donor.archs()[arch_index]` to this container. The
    /// slice lands at the next offset satisfying its alignment; the padding
    /// gap is zero-filled.
    pub fn insert_arch_from(&mut self, donor: &Container, arch_index: usize) -> Result<()> {
        assert!(self.is_fat, "insert_arch_from requires a fat container");
        assert!(arch_index < donor.archs.len(), "arch index out of range");

        let mut arch = donor.archs[arch_index].clone();
        let size = arch.entry.size;
        let src_offset = arch.entry.offset;

        let dest = round_up(self.file_size as u64, 1u64 << arch.entry.align);
        let new_size = dest + size as u64;
        if new_size > u32::MAX as u64 {
            return Err(Error::FileTooLarge(new_size));
        }
        debug!("inserting {} byte slice at {dest:#x}", size);

        self.file.set_len(new_size)?;
        zero_range(&self.file, self.file_size as u64, dest - self.file_size as u64)?;
        copy_range(&self.file, dest, &donor.file, src_offset as u64, size as u64)?;

        arch.relocate(dest as u32);
        self.archs.push(arch);
        self.file_size = new_size as u32;

        self.write_fat_header()?;
        self.write_fat_entries()?;
        Ok(())
    }

    // ---- load-command table --------------------------------------------

    /// Move the load command at `from` to position `to`, sliding the block
    /// in between. The operation is symmetric in its two indices.
    pub fn move_load_command(
        &mut self,
        arch_index: usize,
        from: usize,
        to: usize,
    ) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let (from, to) = if from > to { (to, from) } else { (from, to) };

        let file = &self.file;
        let arch = &mut self.archs[arch_index];
        assert!(to < arch.commands.len(), "load command index out of range");

        let mut moved = arch.commands[from].clone();
        let mut offset = moved.file_offset;

        for lc in &mut arch.commands[from + 1..=to] {
            lc.file_offset = offset;
            write_all_at(file, offset as u64, &lc.raw)?;
            offset += lc.cmdsize;
        }

        moved.file_offset = offset;
        write_all_at(file, offset as u64, &moved.raw)?;

        arch.commands.remove(from);
        arch.commands.insert(to, moved);
        Ok(())
    }

    /// Remove the load command at `lc_index`. The command is first slid to
    /// the end of the table, then dropped; the vacated bytes are zeroed and
    /// stay inside the slice, whose size does not change.
    pub fn remove_load_command(&mut self, arch_index: usize, lc_index: usize) -> Result<()> {
        let n_commands = self.archs[arch_index].commands.len();
        assert!(lc_index < n_commands, "load command index out of range");

        if n_commands > 1 {
            self.move_load_command(arch_index, lc_index, n_commands - 1)?;
        }

        let (offset, size) = {
            let arch = &mut self.archs[arch_index];
            let lc = &arch.commands[arch.commands.len() - 1];
            let range = (lc.file_offset, lc.cmdsize);
            arch.header.ncmds -= 1;
            arch.header.sizeofcmds -= range.1;
            range
        };

        self.write_mach_header(arch_index)?;
        zero_range(&self.file, offset as u64, size as u64)?;
        self.archs[arch_index].commands.pop();
        Ok(())
    }

    /// Append a raw load command to the slice's table.
    ///
    /// `payload` must be a complete command in the slice's byte order; its
    /// declared `cmdsize` must equal the payload length. Fails with
    /// [`Error::NoRoomForCommand`] when the new command would cross into the
    /// first mapped segment's file content.
    pub fn insert_load_command(&mut self, arch_index: usize, payload: &[u8]) -> Result<()> {
        let arch = &self.archs[arch_index];
        let endian = arch.header.endian();

        if payload.len() < 8 {
            return Err(Error::MalformedSlice(
                "load command payload shorter than its fixed header".into(),
            ));
        }
        let cmd: u32 = payload.pread_with(0, endian)?;
        let cmdsize: u32 = payload.pread_with(4, endian)?;
        if cmdsize as usize != payload.len() {
            return Err(Error::MalformedSlice(format!(
                "payload is {} bytes but declares cmdsize {cmdsize}",
                payload.len()
            )));
        }

        let offset = match arch.commands.last() {
            Some(last) => last.file_offset + last.cmdsize,
            None => arch.entry.offset + arch.entry.size,
        };

        if let Some(first_fileoff) = arch.first_segment_fileoff() {
            let room_end = arch.entry.offset as u64 + first_fileoff;
            if offset as u64 + cmdsize as u64 > room_end {
                return Err(Error::NoRoomForCommand(format!(
                    "command end {:#x} crosses segment content at {room_end:#x}",
                    offset as u64 + cmdsize as u64
                )));
            }
        }

        write_all_at(&self.file, offset as u64, payload)?;

        let arch = &mut self.archs[arch_index];
        arch.commands.push(LoadCommand {
            cmd,
            cmdsize,
            file_offset: offset,
            raw: payload.to_vec(),
        });
        arch.header.ncmds += 1;
        arch.header.sizeofcmds += cmdsize;
        self.write_mach_header(arch_index)?;
        Ok(())
    }

    /// Change the slice's Mach-O file type (`MH_EXECUTE`, `MH_DYLIB`, ...).
    pub fn change_file_type(&mut self, arch_index: usize, filetype: u32) -> Result<()> {
        assert!(arch_index < self.archs.len(), "arch index out of range");
        self.archs[arch_index].header.filetype = filetype;
        self.write_mach_header(arch_index)
    }
}
