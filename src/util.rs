use std::{
    fmt,
    io::{self, Read},
    time::Duration,
};

use byteorder::{ReadBytesExt, LE};
use uuid::Uuid;

/// Declares a fieldless enum with a fallible conversion from its raw descriptor value.
macro_rules! primitive_enum {
    (
        $v:vis enum $name:ident: $native:ty {
            $(
                $( #[$variant_attrs:meta] )*
                $variant:ident = $value:expr
            ),+
            $(,)?
        }
    ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $v enum $name {
            $(
                $variant = $value,
            )+
        }

        impl $name {
            pub(crate) fn from_raw(raw: $native) -> Option<Self> {
                match raw {
                    $(
                        $value => Some(Self::$variant),
                    )+
                    _ => None,
                }
            }
        }
    };
}

pub(crate) fn split_descriptors(mut raw: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    std::iter::from_fn(move || match raw {
        [length, descriptor_type, ..] => {
            let length = *length as usize;
            if length < 2 {
                log::warn!("invalid descriptor length {}", length);
                return None;
            }
            if length > raw.len() {
                log::warn!(
                    "descriptor length {} exceeds available data ({} bytes)",
                    length,
                    raw.len()
                );
                return None;
            }
            let (desc_data, next) = raw.split_at(length);

            raw = next;

            Some((*descriptor_type, desc_data))
        }
        [] => None,
        _ => {
            log::warn!("invalid trailing descriptor bytes: {:x?}", raw);
            None
        }
    })
}

/// Field readers for class-specific descriptors, which are little endian throughout.
pub(crate) trait DescriptorFields {
    /// Reads an entity ID field, which the class spec requires to be non-zero.
    fn read_id<T>(&mut self, field: &str, new: fn(u8) -> Option<T>) -> io::Result<T>;
    fn read_bitmask(&mut self, len: usize) -> io::Result<u32>;
    /// Reads a `bControlSize` byte followed by a bitmask of that many bytes.
    fn read_sized_bitmask(&mut self) -> io::Result<u32>;
    fn read_guid(&mut self) -> io::Result<Uuid>;
    fn read_interval(&mut self) -> io::Result<Duration>;
}

impl DescriptorFields for &'_ [u8] {
    fn read_id<T>(&mut self, field: &str, new: fn(u8) -> Option<T>) -> io::Result<T> {
        new(self.read_u8()?).ok_or_else(|| malformed(format!("{} must not be 0", field)))
    }

    fn read_bitmask(&mut self, len: usize) -> io::Result<u32> {
        if len > self.len() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let (bytes, rest) = self.split_at(len);
        *self = rest;

        if len > 4 {
            log::warn!("{}-byte bitmask, ignoring bits past 32", len);
        }
        Ok(bytes
            .iter()
            .take(4)
            .rev()
            .fold(0, |mask, &b| mask << 8 | u32::from(b)))
    }

    fn read_sized_bitmask(&mut self) -> io::Result<u32> {
        let len = self.read_u8()?;
        self.read_bitmask(len.into())
    }

    fn read_guid(&mut self) -> io::Result<Uuid> {
        // USB-IF stores the three leading GUID groups little endian, the trailing 8 bytes as is.
        let (d1, d2, d3) = (
            self.read_u32::<LE>()?,
            self.read_u16::<LE>()?,
            self.read_u16::<LE>()?,
        );
        let mut d4 = [0; 8];
        self.read_exact(&mut d4)?;
        Uuid::from_fields(d1, d2, d3, &d4).map_err(malformed)
    }

    fn read_interval(&mut self) -> io::Result<Duration> {
        self.read_u32::<LE>().map(|units| from_100ns(units.into()))
    }
}

/// Error for a descriptor whose contents violate the class spec.
pub(crate) fn malformed<M>(msg: M) -> io::Error
where
    M: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Number of 100 ns units, the unit of `dwFrameInterval`, in a second.
pub(crate) const INTERVALS_PER_SEC: u64 = 10_000_000;

pub(crate) fn to_100ns(d: Duration) -> u64 {
    (d.as_nanos() / 100) as u64
}

pub(crate) fn from_100ns(units: u64) -> Duration {
    Duration::from_nanos(units * 100)
}

/// A binary-coded decimal version number, such as `bcdUVC`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BcdVersion(pub(crate) u16);

impl fmt::Display for BcdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let maj = self.0 >> 8;
        let min = self.0 & 0xff;
        write!(f, "{:x}.{:02x}", maj, min)
    }
}

impl fmt::Debug for BcdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
