//! Random-access byte operations on open files.
//!
//! Everything the container editor does to a file goes through these
//! helpers: positioned reads and writes, range zeroing, overlap-safe moves
//! within one file, and copies between two files. `std::fs::File` is
//! unbuffered, so writes land at the natural quiescent points without an
//! explicit flush; truncation is the caller's job via `File::set_len`.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

const CHUNK: usize = 64 * 1024;

/// Read exactly `buf.len()` bytes at `offset`.
pub fn read_exact_at(mut file: &File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

/// Write all of `buf` at `offset`.
pub fn write_all_at(mut file: &File, offset: u64, buf: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buf)
}

/// Zero-fill `len` bytes starting at `offset`.
pub fn zero_range(file: &File, offset: u64, len: u64) -> io::Result<()> {
    let zeros = [0u8; CHUNK];
    let mut done = 0u64;
    while done < len {
        let n = ((len - done) as usize).min(CHUNK);
        write_all_at(file, offset + done, &zeros[..n])?;
        done += n as u64;
    }
    Ok(())
}

/// Move `len` bytes from `src` to `dst` within one file.
///
/// The ranges may overlap: chunks are copied front-to-back when moving
/// toward the start of the file and back-to-front when moving toward the
/// end, so no byte is read after it has been overwritten.
pub fn move_range(file: &File, dst: u64, src: u64, len: u64) -> io::Result<()> {
    if dst == src || len == 0 {
        return Ok(());
    }
    let mut buf = vec![0u8; CHUNK.min(len as usize)];
    if dst < src {
        let mut done = 0u64;
        while done < len {
            let n = ((len - done) as usize).min(CHUNK);
            read_exact_at(file, src + done, &mut buf[..n])?;
            write_all_at(file, dst + done, &buf[..n])?;
            done += n as u64;
        }
    } else {
        let mut remaining = len;
        while remaining > 0 {
            let n = (remaining as usize).min(CHUNK);
            remaining -= n as u64;
            read_exact_at(file, src + remaining, &mut buf[..n])?;
            write_all_at(file, dst + remaining, &buf[..n])?;
        }
    }
    Ok(())
}

/// Copy `len` bytes between two files. The files must not alias the same
/// underlying storage.
pub fn copy_range(dst: &File, dst_off: u64, src: &File, src_off: u64, len: u64) -> io::Result<()> {
    let mut buf = vec![0u8; CHUNK.min(len.max(1) as usize)];
    let mut done = 0u64;
    while done < len {
        let n = ((len - done) as usize).min(CHUNK);
        read_exact_at(src, src_off + done, &mut buf[..n])?;
        write_all_at(dst, dst_off + done, &buf[..n])?;
        done += n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(content: &[u8]) -> File {
        let file = tempfile::tempfile().unwrap();
        write_all_at(&file, 0, content).unwrap();
        file
    }

    fn contents(file: &File) -> Vec<u8> {
        let len = file.metadata().unwrap().len();
        let mut buf = vec![0u8; len as usize];
        read_exact_at(file, 0, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_move_range_backward_overlap() {
        let data: Vec<u8> = (0..=255u8).collect();
        let file = scratch(&data);
        // [16..256) -> [0..240), overlapping
        move_range(&file, 0, 16, 240).unwrap();
        let got = contents(&file);
        assert_eq!(&got[..240], &data[16..256]);
    }

    #[test]
    fn test_move_range_forward_overlap() {
        let data: Vec<u8> = (0..=255u8).collect();
        let file = scratch(&data);
        file.set_len(272).unwrap();
        // [0..256) -> [16..272), overlapping
        move_range(&file, 16, 0, 256).unwrap();
        let got = contents(&file);
        assert_eq!(&got[16..272], &data[..]);
    }

    #[test]
    fn test_move_range_large_overlap_is_chunk_safe() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let file = scratch(&data);
        file.set_len(data.len() as u64 + 4096).unwrap();
        move_range(&file, 4096, 0, data.len() as u64).unwrap();
        let got = contents(&file);
        assert_eq!(&got[4096..], &data[..]);
    }

    #[test]
    fn test_zero_range() {
        let file = scratch(&[0xffu8; 1000]);
        zero_range(&file, 100, 800).unwrap();
        let got = contents(&file);
        assert!(got[..100].iter().all(|&b| b == 0xff));
        assert!(got[100..900].iter().all(|&b| b == 0));
        assert!(got[900..].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn test_copy_range_between_files() {
        let src = scratch(b"0123456789abcdef");
        let dst = scratch(&[0u8; 8]);
        copy_range(&dst, 0, &src, 4, 8).unwrap();
        assert_eq!(contents(&dst), b"456789ab");
    }
}
