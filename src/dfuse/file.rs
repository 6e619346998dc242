//! In-memory DfuSe container and its byte-exact codec (UM0391).
//!
//! A file is laid out as:
//!
//! ```text
//! prefix (11) | { target prefix (274) | { element header (8) | data }* }* | suffix (16)
//! ```
//!
//! All multi-byte integers are little-endian. Sections must be written and
//! read in exactly that order: the CRC at the very end covers every byte
//! before it, and `dfu_image_size` in the prefix is only known once all
//! targets are sized.

use super::crc32::crc32;
use crate::dfu::error::{DfuError, DfuResult};

/// Size of the file prefix.
pub const PREFIX_LEN: usize = 11;

/// Size of each target prefix.
pub const TARGET_PREFIX_LEN: usize = 274;

/// Size of an element header (address + size).
pub const ELEMENT_HEADER_LEN: usize = 8;

/// Size of the DFU suffix.
pub const SUFFIX_LEN: usize = 16;

/// Suffix bytes preceding the CRC.
pub const SUFFIX_HEADER_LEN: usize = 12;

/// Fixed width of the target name field.
pub const TARGET_NAME_LEN: usize = 255;

pub const DFUSE_SIGNATURE: &[u8; 5] = b"DfuSe";
pub const TARGET_SIGNATURE: &[u8; 6] = b"Target";
pub const DFU_SUFFIX_SIGNATURE: &[u8; 3] = b"UFD";

/// DfuSe format version.
pub const DFUSE_VERSION: u8 = 0x01;

/// `bcdDFU` of the DfuSe extension.
pub const DFU_SPEC_BCD: u16 = 0x011A;

/// Vendor/product/device BCD meaning "any".
pub const BCD_UNSPECIFIED: u16 = 0xFFFF;

/// File prefix. The signature is implied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    pub version: u8,
    /// Bytes from the start of the file up to (not including) the suffix.
    pub dfu_image_size: u32,
    pub targets: u8,
}

impl Default for Prefix {
    fn default() -> Self {
        Self {
            version: DFUSE_VERSION,
            dfu_image_size: PREFIX_LEN as u32,
            targets: 0,
        }
    }
}

/// Per-target header. The signature is implied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPrefix {
    pub alternate_setting: u8,
    pub target_named: bool,
    pub target_name: [u8; TARGET_NAME_LEN],
    /// Sum of element sizes plus 8 bytes per element header.
    pub target_size: u32,
    pub num_elements: u32,
}

impl TargetPrefix {
    /// Create an empty, named target prefix.
    ///
    /// Names longer than the 255-byte field are truncated; shorter names are
    /// zero padded.
    pub fn new(alternate_setting: u8, name: &str) -> Self {
        let mut target_name = [0u8; TARGET_NAME_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(TARGET_NAME_LEN);
        target_name[..len].copy_from_slice(&bytes[..len]);

        Self {
            alternate_setting,
            target_named: !name.is_empty(),
            target_name,
            target_size: 0,
            num_elements: 0,
        }
    }

    /// Name up to the first NUL, lossily decoded.
    pub fn name(&self) -> String {
        let end = self
            .target_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TARGET_NAME_LEN);
        String::from_utf8_lossy(&self.target_name[..end]).into_owned()
    }
}

/// One contiguous memory region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageElement {
    pub address: u32,
    pub data: Vec<u8>,
}

impl ImageElement {
    pub fn new(address: u32, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    /// `element_size` as written in the header.
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Address one past the last byte of this element.
    pub fn end_address(&self) -> u64 {
        self.address as u64 + self.data.len() as u64
    }
}

/// One flashable target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub target_prefix: TargetPrefix,
    pub elements: Vec<ImageElement>,
}

impl Image {
    pub fn new(alternate_setting: u8, name: &str) -> Self {
        Self {
            target_prefix: TargetPrefix::new(alternate_setting, name),
            elements: Vec::new(),
        }
    }

    /// Append an element and refresh the size fields.
    pub fn push_element(&mut self, element: ImageElement) {
        self.elements.push(element);
        self.update_sizes();
    }

    /// Recompute `target_size` and `num_elements` from the elements.
    pub fn update_sizes(&mut self) {
        self.target_prefix.num_elements = self.elements.len() as u32;
        self.target_prefix.target_size = self.payload_size();
    }

    /// Bytes this image occupies after its target prefix.
    pub fn payload_size(&self) -> u32 {
        self.elements
            .iter()
            .map(|e| ELEMENT_HEADER_LEN as u32 + e.size())
            .sum()
    }
}

/// DFU suffix (DFU 1.1, appendix B).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suffix {
    pub device_bcd: u16,
    pub product_bcd: u16,
    pub vendor_bcd: u16,
    pub dfu_spec_bcd: u16,
    /// Unset until the file is serialized or parsed.
    pub crc: Option<u32>,
}

impl Default for Suffix {
    fn default() -> Self {
        Self {
            device_bcd: BCD_UNSPECIFIED,
            product_bcd: BCD_UNSPECIFIED,
            vendor_bcd: BCD_UNSPECIFIED,
            dfu_spec_bcd: DFU_SPEC_BCD,
            crc: None,
        }
    }
}

/// A complete DfuSe container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DfuFile {
    pub prefix: Prefix,
    pub images: Vec<Image>,
    pub suffix: Suffix,
}

impl DfuFile {
    /// Build a single-target, single-element file around a raw image.
    pub fn build(image_bytes: &[u8], load_address: u32, target_name: &str) -> DfuResult<Self> {
        if image_bytes.is_empty() {
            return Err(DfuError::InvalidArgument {
                reason: "firmware image is empty".to_string(),
            });
        }
        if load_address as u64 + image_bytes.len() as u64 > u32::MAX as u64 + 1 {
            return Err(DfuError::InvalidArgument {
                reason: format!(
                    "{} bytes at 0x{:08X} exceed the 32-bit address space",
                    image_bytes.len(),
                    load_address
                ),
            });
        }

        let mut image = Image::new(0, target_name);
        image.push_element(ImageElement::new(load_address, image_bytes.to_vec()));

        let mut file = Self::default();
        file.push_image(image)?;
        Ok(file)
    }

    /// Append a target and refresh the size fields.
    pub fn push_image(&mut self, image: Image) -> DfuResult<()> {
        if self.images.len() >= u8::MAX as usize {
            return Err(DfuError::InvalidArgument {
                reason: "a DfuSe file holds at most 255 targets".to_string(),
            });
        }
        self.images.push(image);
        self.update_sizes();
        Ok(())
    }

    /// Recompute every size field bottom-up: element, target, prefix.
    pub fn update_sizes(&mut self) {
        for image in &mut self.images {
            image.update_sizes();
        }
        self.prefix.targets = self.images.len() as u8;
        self.prefix.dfu_image_size = PREFIX_LEN as u32
            + self
                .images
                .iter()
                .map(|i| TARGET_PREFIX_LEN as u32 + i.target_prefix.target_size)
                .sum::<u32>();
    }

    /// Total serialized length including the suffix.
    pub fn file_size(&self) -> usize {
        self.prefix.dfu_image_size as usize + SUFFIX_LEN
    }

    /// Every element paired with the image that owns it, in file order.
    pub fn elements(&self) -> impl Iterator<Item = (&Image, &ImageElement)> {
        self.images
            .iter()
            .flat_map(|image| image.elements.iter().map(move |e| (image, e)))
    }

    /// Serialize the whole container, computing the CRC last.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.file_size());

        serialize_prefix(&self.prefix, &mut out);
        for image in &self.images {
            serialize_target_prefix(&image.target_prefix, &mut out);
            for element in &image.elements {
                serialize_element(element, &mut out);
            }
        }
        serialize_suffix_header(&self.suffix, &mut out);

        let crc = finalize_crc(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Parse and validate a complete container.
    pub fn parse(data: &[u8]) -> DfuResult<Self> {
        let mut reader = SectionReader::new(data);

        let prefix = parse_prefix(&mut reader)?;

        let mut images = Vec::with_capacity(prefix.targets as usize);
        for _ in 0..prefix.targets {
            let target_prefix = parse_target_prefix(&mut reader)?;

            let mut elements = Vec::new();
            for _ in 0..target_prefix.num_elements {
                elements.push(parse_element(&mut reader)?);
            }

            let image = Image {
                target_prefix,
                elements,
            };
            let actual = image.payload_size();
            if actual != image.target_prefix.target_size {
                return Err(DfuError::SizeMismatch {
                    field: "target_size",
                    declared: image.target_prefix.target_size as u64,
                    actual: actual as u64,
                });
            }
            images.push(image);
        }

        if reader.position() != prefix.dfu_image_size as usize {
            return Err(DfuError::SizeMismatch {
                field: "dfu_image_size",
                declared: prefix.dfu_image_size as u64,
                actual: reader.position() as u64,
            });
        }

        let suffix = parse_suffix(&mut reader)?;

        if reader.remaining() != 0 {
            return Err(DfuError::TrailingData {
                count: reader.remaining(),
            });
        }

        Ok(Self {
            prefix,
            images,
            suffix,
        })
    }
}

// ============================================================================
// Serialization
// ============================================================================

pub fn serialize_prefix(prefix: &Prefix, out: &mut Vec<u8>) {
    out.extend_from_slice(DFUSE_SIGNATURE);
    out.push(prefix.version);
    out.extend_from_slice(&prefix.dfu_image_size.to_le_bytes());
    out.push(prefix.targets);
}

/// The name field is always written at full width, named or not.
pub fn serialize_target_prefix(target_prefix: &TargetPrefix, out: &mut Vec<u8>) {
    out.extend_from_slice(TARGET_SIGNATURE);
    out.push(target_prefix.alternate_setting);
    out.extend_from_slice(&(target_prefix.target_named as u32).to_le_bytes());
    out.extend_from_slice(&target_prefix.target_name);
    out.extend_from_slice(&target_prefix.target_size.to_le_bytes());
    out.extend_from_slice(&target_prefix.num_elements.to_le_bytes());
}

/// Element header followed by the element data.
pub fn serialize_element(element: &ImageElement, out: &mut Vec<u8>) {
    out.extend_from_slice(&element.address.to_le_bytes());
    out.extend_from_slice(&element.size().to_le_bytes());
    out.extend_from_slice(&element.data);
}

/// Every suffix field except the CRC.
pub fn serialize_suffix_header(suffix: &Suffix, out: &mut Vec<u8>) {
    out.extend_from_slice(&suffix.device_bcd.to_le_bytes());
    out.extend_from_slice(&suffix.product_bcd.to_le_bytes());
    out.extend_from_slice(&suffix.vendor_bcd.to_le_bytes());
    out.extend_from_slice(&suffix.dfu_spec_bcd.to_le_bytes());
    out.extend_from_slice(DFU_SUFFIX_SIGNATURE);
    out.push(SUFFIX_LEN as u8);
}

/// CRC over every byte serialized so far.
///
/// Only valid once all sections up to and including the suffix header have
/// been written.
pub fn finalize_crc(serialized: &[u8]) -> u32 {
    crc32(serialized)
}

// ============================================================================
// Parsing
// ============================================================================

/// Cursor over a container, tracking the section being read for errors.
pub struct SectionReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> SectionReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Everything consumed so far.
    pub fn consumed(&self) -> &'a [u8] {
        &self.data[..self.position]
    }

    pub fn take(&mut self, len: usize, section: &'static str) -> DfuResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(DfuError::Truncated {
                section,
                needed: len,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    fn read_u8(&mut self, section: &'static str) -> DfuResult<u8> {
        Ok(self.take(1, section)?[0])
    }

    fn read_u16(&mut self, section: &'static str) -> DfuResult<u16> {
        let b = self.take(2, section)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self, section: &'static str) -> DfuResult<u32> {
        let b = self.take(4, section)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn expect_signature(&mut self, signature: &[u8], section: &'static str) -> DfuResult<()> {
        let found = self.take(signature.len(), section)?;
        if found != signature {
            return Err(DfuError::InvalidSignature {
                section,
                found: found.to_vec(),
            });
        }
        Ok(())
    }
}

pub fn parse_prefix(reader: &mut SectionReader<'_>) -> DfuResult<Prefix> {
    const SECTION: &str = "prefix";

    if reader.remaining() < PREFIX_LEN {
        return Err(DfuError::Truncated {
            section: SECTION,
            needed: PREFIX_LEN,
            available: reader.remaining(),
        });
    }

    reader.expect_signature(DFUSE_SIGNATURE, SECTION)?;
    let version = reader.read_u8(SECTION)?;
    if version != DFUSE_VERSION {
        return Err(DfuError::InvalidSignature {
            section: "prefix version",
            found: vec![version],
        });
    }

    Ok(Prefix {
        version,
        dfu_image_size: reader.read_u32(SECTION)?,
        targets: reader.read_u8(SECTION)?,
    })
}

pub fn parse_target_prefix(reader: &mut SectionReader<'_>) -> DfuResult<TargetPrefix> {
    const SECTION: &str = "target prefix";

    if reader.remaining() < TARGET_PREFIX_LEN {
        return Err(DfuError::Truncated {
            section: SECTION,
            needed: TARGET_PREFIX_LEN,
            available: reader.remaining(),
        });
    }

    reader.expect_signature(TARGET_SIGNATURE, SECTION)?;
    let alternate_setting = reader.read_u8(SECTION)?;
    let target_named = reader.read_u32(SECTION)? != 0;

    let mut target_name = [0u8; TARGET_NAME_LEN];
    target_name.copy_from_slice(reader.take(TARGET_NAME_LEN, SECTION)?);

    Ok(TargetPrefix {
        alternate_setting,
        target_named,
        target_name,
        target_size: reader.read_u32(SECTION)?,
        num_elements: reader.read_u32(SECTION)?,
    })
}

/// Reads the header first; the payload length comes from it.
pub fn parse_element(reader: &mut SectionReader<'_>) -> DfuResult<ImageElement> {
    let address = reader.read_u32("element header")?;
    let size = reader.read_u32("element header")?;
    let data = reader.take(size as usize, "element data")?.to_vec();

    Ok(ImageElement { address, data })
}

/// Parses the suffix and checks the CRC against everything before it.
pub fn parse_suffix(reader: &mut SectionReader<'_>) -> DfuResult<Suffix> {
    const SECTION: &str = "suffix";

    if reader.remaining() < SUFFIX_LEN {
        return Err(DfuError::Truncated {
            section: SECTION,
            needed: SUFFIX_LEN,
            available: reader.remaining(),
        });
    }

    let device_bcd = reader.read_u16(SECTION)?;
    let product_bcd = reader.read_u16(SECTION)?;
    let vendor_bcd = reader.read_u16(SECTION)?;
    let dfu_spec_bcd = reader.read_u16(SECTION)?;
    reader.expect_signature(DFU_SUFFIX_SIGNATURE, SECTION)?;

    let suffix_length = reader.read_u8(SECTION)?;
    if suffix_length as usize != SUFFIX_LEN {
        return Err(DfuError::SizeMismatch {
            field: "suffix_length",
            declared: suffix_length as u64,
            actual: SUFFIX_LEN as u64,
        });
    }

    let actual = finalize_crc(reader.consumed());
    let expected = reader.read_u32(SECTION)?;
    if expected != actual {
        return Err(DfuError::CrcMismatch { expected, actual });
    }

    Ok(Suffix {
        device_bcd,
        product_bcd,
        vendor_bcd,
        dfu_spec_bcd,
        crc: Some(expected),
    })
}
