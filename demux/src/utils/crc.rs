//! CRC validation for container pages.
//!
//! Ogg pages carry a CRC-32 with polynomial 0x04C11DB7, a zero initial value,
//! no reflection and no final XOR. The table is built at compile time.

/// CRC algorithm specification with polynomial and initial value.
pub struct Algorithm<T> {
    poly: T,
    init: T,
}

/// CRC-32 algorithm for Ogg page validation.
pub const CRC_OGG_PAGE_ALG: Algorithm<u32> = Algorithm {
    poly: 0x04c1_1db7,
    init: 0x0000_0000,
};

/// Shifts `len` bits through the CRC-32 register using the specified polynomial.
#[inline(always)]
pub const fn crc32(poly: u32, mut value: u32, len: usize) -> u32 {
    let mut i = 0;
    while i < len {
        value = (value << 1) ^ (((value >> 31) & 1) * poly);
        i += 1;
    }

    value
}

#[inline(always)]
const fn crc32_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc32(poly, (i as u32) << 24, 8);
        i += 1;
    }

    table
}

#[derive(Debug)]
pub struct Crc32 {
    pub poly: u32,
    pub init: u32,
    table: [u32; 256],
}

impl Crc32 {
    pub const fn new(algorithm: &Algorithm<u32>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            table: crc32_table(algorithm.poly),
        }
    }

    const fn table_entry(&self, index: u32) -> u32 {
        self.table[(index & 0xFF) as usize]
    }

    #[inline(always)]
    pub const fn update(&self, mut crc: u32, bytes: &[u8]) -> u32 {
        let mut i = 0;

        while i < bytes.len() {
            crc = (crc << 8) ^ self.table_entry((crc >> 24) ^ bytes[i] as u32);
            i += 1;
        }

        crc
    }

    #[inline(always)]
    pub const fn checksum(&self, bytes: &[u8]) -> u32 {
        self.update(self.init, bytes)
    }
}

pub static OGG_PAGE_CRC: Crc32 = Crc32::new(&CRC_OGG_PAGE_ALG);

#[test]
fn ogg_crc_check_value() {
    assert_eq!(OGG_PAGE_CRC.checksum(b"123456789"), 0x89A1_897F);
    assert_eq!(OGG_PAGE_CRC.checksum(b"OggS"), 0x5FB0_A94F);

    let split = OGG_PAGE_CRC.update(OGG_PAGE_CRC.checksum(b"1234"), b"56789");
    assert_eq!(split, 0x89A1_897F);
}
