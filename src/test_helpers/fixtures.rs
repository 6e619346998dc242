use crate::dfuse::{DfuFile, Image, ImageElement};

/// Firmware bytes with a non-repeating-per-page pattern, so misplaced
/// blocks show up in comparisons.
pub fn patterned_firmware(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 251) % 256) as u8).collect()
}

/// Builder for multi-target, multi-element DfuSe files.
///
/// Elements attach to the most recently started image.
pub struct DfuFileBuilder {
    images: Vec<Image>,
}

impl DfuFileBuilder {
    pub fn new() -> Self {
        Self { images: Vec::new() }
    }

    pub fn image(mut self, alternate_setting: u8, name: &str) -> Self {
        self.images.push(Image::new(alternate_setting, name));
        self
    }

    pub fn element(mut self, address: u32, data: Vec<u8>) -> Self {
        if self.images.is_empty() {
            self.images.push(Image::new(0, "ST..."));
        }
        if let Some(image) = self.images.last_mut() {
            image.push_element(ImageElement::new(address, data));
        }
        self
    }

    pub fn build(self) -> DfuFile {
        let mut file = DfuFile::default();
        for image in self.images {
            file.push_image(image).expect("too many images");
        }
        file
    }
}

impl Default for DfuFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
