//! Offline DfuSe file verbs: `convert` and `info`.

use std::fmt;
use std::path::Path;

use stmdfu::dfu::DfuResult;
use stmdfu::dfuse::{convert_binary, read_dfuse_file, DfuFile};
use stmdfu::settings::ProgrammerSettings;

/// `convert <bin> <dfu> [--address A] [--name N]`
pub fn convert(
    settings: &ProgrammerSettings,
    bin_path: &Path,
    dfu_path: &Path,
    address: Option<u32>,
    name: Option<&str>,
) -> DfuResult<()> {
    let file = convert_binary(
        bin_path,
        dfu_path,
        address.unwrap_or(settings.load_address),
        name.unwrap_or(&settings.target_name),
    )?;
    print!("{}", describe(&file));
    Ok(())
}

/// `info <dfu>`
pub fn info(path: &Path) -> DfuResult<()> {
    let file = read_dfuse_file(path)?;
    print!("{}", describe(&file));
    Ok(())
}

/// Human-readable layout of a container.
pub fn describe(file: &DfuFile) -> String {
    Layout(file).to_string()
}

struct Layout<'a>(&'a DfuFile);

impl fmt::Display for Layout<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.0;
        writeln!(
            f,
            "DfuSe v{}, image size {} bytes, {} target(s)",
            file.prefix.version, file.prefix.dfu_image_size, file.prefix.targets
        )?;
        for image in &file.images {
            let prefix = &image.target_prefix;
            writeln!(
                f,
                "  Target alt {} '{}': {} element(s), {} bytes",
                prefix.alternate_setting,
                prefix.name(),
                prefix.num_elements,
                prefix.target_size
            )?;
            for element in &image.elements {
                writeln!(
                    f,
                    "    0x{:08X}-0x{:08X} ({} bytes)",
                    element.address,
                    element.end_address(),
                    element.size()
                )?;
            }
        }

        let suffix = &file.suffix;
        write!(
            f,
            "  Suffix: VID 0x{:04X} PID 0x{:04X} device 0x{:04X} DFU 0x{:04X}",
            suffix.vendor_bcd, suffix.product_bcd, suffix.device_bcd, suffix.dfu_spec_bcd
        )?;
        match suffix.crc {
            Some(crc) => writeln!(f, " CRC 0x{:08X}", crc),
            None => writeln!(f),
        }
    }
}
