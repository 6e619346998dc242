//! CRC-32 (IEEE 802.3 / zlib) checksum used by the DfuSe suffix.
//!
//! Table-driven, reflected polynomial `0xEDB88320`, initial value and final
//! XOR of `0xFFFFFFFF`. The lookup table is built once per process.

use std::sync::OnceLock;

/// Reflected CRC-32 polynomial.
pub const CRC32_POLYNOMIAL: u32 = 0xEDB8_8320;

static CRC_TABLE: OnceLock<[u32; 256]> = OnceLock::new();

/// Build the 256-entry lookup table for [`CRC32_POLYNOMIAL`].
pub fn generate_table() -> [u32; 256] {
    let mut table = [0u32; 256];

    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = i as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC32_POLYNOMIAL
            } else {
                crc >> 1
            };
        }
        *entry = crc;
    }

    table
}

fn table() -> &'static [u32; 256] {
    CRC_TABLE.get_or_init(generate_table)
}

/// Calculate the CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let table = table();

    !data.iter().fold(0xFFFF_FFFFu32, |crc, &byte| {
        table[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8)
    })
}
