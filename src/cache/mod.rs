//! Persistent metadata caches
//!
//! Three on-disk stores back the incremental sync:
//!
//! - [`PathIndex`]: stable `u32` identifiers for source and destination
//!   paths (`Index.bin`, `DestinationIndex.bin`)
//! - [`MetaCache`]: the per-source map of [`FileRecord`]s (`<SourceID>.bin`)
//! - [`StateStore`]: the per-run "source finished copying" flags
//!   (`State.bin`)
//!
//! All formats are little-endian and headerless or count-prefixed as
//! documented on each type.

mod index;
mod metadata;
mod state;

pub use index::PathIndex;
pub use metadata::{FileRecord, MetaCache};
pub use state::StateStore;

use std::io::{self, Read};

/// Read a little-endian u32, distinguishing clean EOF (`Ok(None)`) from a
/// short or failed read.
pub(crate) fn read_u32_or_eof(reader: &mut impl Read) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(u32::from_le_bytes(buf))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

pub(crate) fn read_u32(reader: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64(reader: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_i32(reader: &mut impl Read) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub(crate) fn read_u8(reader: &mut impl Read) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}
