//! DfuSe firmware container (ST UM0391).
//!
//! A DfuSe file wraps one or more targets, each holding address-tagged
//! memory elements, and ends with a standard DFU suffix whose CRC-32 covers
//! the whole file.
//!
//! # Example
//!
//! ```no_run
//! use stmdfu::dfuse::{read_dfuse_file, DfuFile};
//!
//! let file = DfuFile::build(&[0u8; 1024], 0x0800_0000, "ST...")?;
//! let bytes = file.to_bytes();
//! assert_eq!(DfuFile::parse(&bytes)?.images.len(), 1);
//!
//! let parsed = read_dfuse_file("firmware.dfu")?;
//! for (image, element) in parsed.elements() {
//!     println!("{} @ 0x{:08X}", image.target_prefix.name(), element.address);
//! }
//! # Ok::<(), stmdfu::dfu::DfuError>(())
//! ```

mod crc32;
mod file;
mod io;

pub use crc32::crc32;
pub use file::{
    finalize_crc, parse_element, parse_prefix, parse_suffix, parse_target_prefix,
    serialize_element, serialize_prefix, serialize_suffix_header, serialize_target_prefix,
    DfuFile, Image, ImageElement, Prefix, SectionReader, Suffix, TargetPrefix, PREFIX_LEN,
    SUFFIX_HEADER_LEN, SUFFIX_LEN, TARGET_NAME_LEN, TARGET_PREFIX_LEN,
};
pub use io::{convert_binary, read_dfuse_file, write_dfuse_file};
