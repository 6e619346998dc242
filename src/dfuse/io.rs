//! Reading and writing DfuSe files on disk.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::file::DfuFile;
use crate::dfu::error::DfuResult;

/// Read and validate a DfuSe file.
///
/// # Arguments
/// * `path` - Path to the `.dfu` file
///
/// # Returns
/// The parsed container, with the suffix CRC already verified
pub fn read_dfuse_file<P: AsRef<Path>>(path: P) -> DfuResult<DfuFile> {
    let path = path.as_ref();
    let data = fs::read(path)?;
    debug!("Read {} bytes from {}", data.len(), path.display());

    let file = DfuFile::parse(&data)?;
    debug!(
        "{}: {} target(s), {} element(s)",
        path.display(),
        file.images.len(),
        file.elements().count()
    );
    Ok(file)
}

/// Serialize `file` to `path`, returning the CRC written to the suffix.
pub fn write_dfuse_file<P: AsRef<Path>>(path: P, file: &DfuFile) -> DfuResult<u32> {
    let path = path.as_ref();
    let bytes = file.to_bytes();
    fs::write(path, &bytes)?;

    let crc = super::file::finalize_crc(&bytes[..bytes.len() - 4]);
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(crc)
}

/// Wrap a raw binary image into a single-element DfuSe file.
pub fn convert_binary<P, Q>(
    bin_path: P,
    dfu_path: Q,
    load_address: u32,
    target_name: &str,
) -> DfuResult<DfuFile>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let image = fs::read(bin_path.as_ref())?;
    let mut file = DfuFile::build(&image, load_address, target_name)?;

    let crc = write_dfuse_file(dfu_path.as_ref(), &file)?;
    file.suffix.crc = Some(crc);

    info!(
        "Converted {} ({} bytes at 0x{:08X}) to {}, CRC 0x{:08X}",
        bin_path.as_ref().display(),
        image.len(),
        load_address,
        dfu_path.as_ref().display(),
        crc
    );
    Ok(file)
}
