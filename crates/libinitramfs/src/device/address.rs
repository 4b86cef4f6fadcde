//! Partition addresses: a whole-disk device plus a partition ordinal.
//!
//! Kernel naming puts a `p` between disk and ordinal when the disk name
//! itself ends in a digit (`mmcblk0p2`, `nvme0n1p3`) and nothing otherwise
//! (`sda2`, `vdb1`).

use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use super::is_device_mapper;

static SEPARATED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<disk>/dev/.*[0-9])p(?P<ordinal>[0-9]+)$").unwrap());
static PLAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<disk>/dev/.*[^0-9/])(?P<ordinal>[0-9]+)$").unwrap());
// Whole-disk names that end in a number without being partitions.
static WHOLE_DISK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(mmcblk|loop|nbd|zram|ram|md|nvme[0-9]+n)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionAddress {
    disk: String,
    separator: bool,
    ordinal: u32,
}

impl PartitionAddress {
    /// Splits a top-level partition path. Device-mapper nodes have no
    /// partition suffix and yield `None`, as do whole-disk paths.
    pub fn parse<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();
        if is_device_mapper(path) {
            return None;
        }

        let text = path.to_str()?;
        let (caps, separator) = match SEPARATED_RE.captures(text) {
            Some(caps) => (caps, true),
            None => (PLAIN_RE.captures(text)?, false),
        };
        let disk = caps.name("disk")?.as_str();
        let ordinal: u32 = caps.name("ordinal")?.as_str().parse().ok()?;

        if ordinal == 0 || (!separator && WHOLE_DISK_RE.is_match(disk)) {
            return None;
        }

        Some(PartitionAddress {
            disk: disk.to_owned(),
            separator,
            ordinal,
        })
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// The physical device the partition lives on.
    pub fn disk(&self) -> PathBuf {
        PathBuf::from(&self.disk)
    }

    /// The partition directly after this one on the same disk.
    pub fn next(&self) -> Self {
        self.with_ordinal(self.ordinal + 1)
    }

    pub fn with_ordinal(&self, ordinal: u32) -> Self {
        PartitionAddress {
            disk: self.disk.clone(),
            separator: self.separator,
            ordinal,
        }
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(self.to_string())
    }
}

impl fmt::Display for PartitionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.separator { "p" } else { "" };
        write!(f, "{}{}{}", self.disk, sep, self.ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn test_parse_plain_disk() {
        let addr = PartitionAddress::parse("/dev/sda2").unwrap();
        assert_eq!(addr.disk(), PathBuf::from("/dev/sda"));
        assert_eq!(addr.ordinal(), 2);
        assert_eq!(addr.next().path(), PathBuf::from("/dev/sda3"));
    }

    #[test]
    fn test_parse_disk_with_separator() {
        let addr = PartitionAddress::parse("/dev/mmcblk0p9").unwrap();
        assert_eq!(addr.disk(), PathBuf::from("/dev/mmcblk0"));
        assert_eq!(addr.ordinal(), 9);
        assert_eq!(addr.next().path(), PathBuf::from("/dev/mmcblk0p10"));

        let addr = PartitionAddress::parse("/dev/nvme0n1p3").unwrap();
        assert_eq!(addr.disk(), PathBuf::from("/dev/nvme0n1"));
        assert_eq!(addr.with_ordinal(1).path(), PathBuf::from("/dev/nvme0n1p1"));
    }

    #[test]
    fn test_parse_multi_digit_ordinal() {
        let addr = PartitionAddress::parse("/dev/vdb12").unwrap();
        assert_eq!(addr.disk(), PathBuf::from("/dev/vdb"));
        assert_eq!(addr.ordinal(), 12);
    }

    #[test]
    fn test_parse_rejects_non_partitions() {
        assert!(PartitionAddress::parse("/dev/mapper/pmOS_root").is_none());
        assert!(PartitionAddress::parse("/dev/dm-0").is_none());
        assert!(PartitionAddress::parse("/dev/sda").is_none());
        assert!(PartitionAddress::parse("/dev/mmcblk0").is_none());
        assert!(PartitionAddress::parse("relative2").is_none());
    }

    quickcheck! {
        fn prop_next_keeps_disk(disk_index: u8, ordinal: u16) -> bool {
            let path = format!("/dev/mmcblk{}p{}", disk_index, u32::from(ordinal) + 1);
            match PartitionAddress::parse(&path) {
                Some(addr) => {
                    let next = addr.next();
                    next.disk() == addr.disk() && next.ordinal() == addr.ordinal() + 1
                }
                None => false,
            }
        }

        fn prop_display_parses_back(letter: u8, ordinal: u16) -> bool {
            let letter = (b'a' + letter % 26) as char;
            let path = format!("/dev/sd{}{}", letter, u32::from(ordinal) + 1);
            PartitionAddress::parse(&path).map(|a| a.to_string()) == Some(path)
        }
    }
}
