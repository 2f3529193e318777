//! Byte-unit conversions for configuring bandwidth ceilings.

pub const BYTES_PER_KILOBYTE: u64 = 1024;
pub const BYTES_PER_MEGABYTE: u64 = 1024 * 1024;
pub const BYTES_PER_GIGABYTE: u64 = 1024 * 1024 * 1024;
pub const BYTES_PER_TERABYTE: u64 = 1024 * 1024 * 1024 * 1024;

pub fn from_kilobytes(kilobytes: u64) -> u64 {
    kilobytes * BYTES_PER_KILOBYTE
}

pub fn from_megabytes(megabytes: u64) -> u64 {
    megabytes * BYTES_PER_MEGABYTE
}

pub fn from_gigabytes(gigabytes: u64) -> u64 {
    gigabytes * BYTES_PER_GIGABYTE
}

pub fn from_terabytes(terabytes: u64) -> u64 {
    terabytes * BYTES_PER_TERABYTE
}

pub fn to_kilobytes(bytes: u64) -> u64 {
    bytes / BYTES_PER_KILOBYTE
}

pub fn to_megabytes(bytes: u64) -> u64 {
    bytes / BYTES_PER_MEGABYTE
}

pub fn to_gigabytes(bytes: u64) -> u64 {
    bytes / BYTES_PER_GIGABYTE
}

pub fn to_terabytes(bytes: u64) -> u64 {
    bytes / BYTES_PER_TERABYTE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_round_trip() {
        assert_eq!(from_kilobytes(2), 2048);
        assert_eq!(from_megabytes(3), 3 * 1_048_576);
        assert_eq!(from_gigabytes(1), 1_073_741_824);
        assert_eq!(to_kilobytes(from_kilobytes(7)), 7);
        assert_eq!(to_megabytes(from_megabytes(7)), 7);
        assert_eq!(to_gigabytes(from_gigabytes(7)), 7);
        assert_eq!(to_terabytes(from_terabytes(7)), 7);
    }

    #[test]
    fn truncating_division() {
        assert_eq!(to_kilobytes(1023), 0);
        assert_eq!(to_kilobytes(2049), 2);
    }
}
