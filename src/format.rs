//! Video frame formats and their GUID encoding.

use std::fmt;

use uuid::Uuid;

/// Last 8 bytes shared by all "FourCC" GUIDs used in uncompressed format descriptors.
const FOURCC_GUID_TAIL: [u8; 8] = [0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71];

/// A video frame format that can be requested from (and reported by) a streaming interface.
#[derive(Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameFormat {
    /// Packed YUV 4:2:2 (`YUY2`).
    Yuyv,
    /// Planar Y with interleaved UV 4:2:0 (`NV12`).
    Nv12,
    /// 8-bit grayscale (`Y800`).
    Gray8,
    /// 16-bit little-endian grayscale (`Y16 `).
    Y16,
    /// Motion JPEG, one JPEG image per frame.
    Mjpeg,
    /// Uncompressed format with a GUID we don't have a name for.
    Uncompressed(Uuid),
}

impl FrameFormat {
    /// Maps the `guidFormat` of an uncompressed format descriptor to a format.
    pub fn from_guid(guid: Uuid) -> Self {
        let (d1, d2, d3, d4) = guid.as_fields();
        if d2 != 0x0000 || d3 != 0x0010 || *d4 != FOURCC_GUID_TAIL {
            return FrameFormat::Uncompressed(guid);
        }

        match &d1.to_le_bytes() {
            b"YUY2" => FrameFormat::Yuyv,
            b"NV12" => FrameFormat::Nv12,
            b"Y800" => FrameFormat::Gray8,
            b"Y16 " => FrameFormat::Y16,
            _ => FrameFormat::Uncompressed(guid),
        }
    }

    /// Returns the `guidFormat` value identifying this format in an uncompressed format
    /// descriptor, or `None` for compressed formats.
    pub fn guid(&self) -> Option<Uuid> {
        let fourcc = match self {
            FrameFormat::Yuyv => b"YUY2",
            FrameFormat::Nv12 => b"NV12",
            FrameFormat::Gray8 => b"Y800",
            FrameFormat::Y16 => b"Y16 ",
            FrameFormat::Mjpeg => return None,
            FrameFormat::Uncompressed(guid) => return Some(*guid),
        };
        Some(fourcc_guid(*fourcc))
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }

    /// File extension used when writing frames of this format to disk.
    pub fn file_extension(&self) -> &'static str {
        match self {
            FrameFormat::Mjpeg => "jpg",
            _ => "raw",
        }
    }
}

fn fourcc_guid(fourcc: [u8; 4]) -> Uuid {
    // always 8 bytes, can't fail
    Uuid::from_fields(
        u32::from_le_bytes(fourcc),
        0x0000,
        0x0010,
        &FOURCC_GUID_TAIL,
    )
    .unwrap()
}

impl fmt::Debug for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameFormat::Yuyv => f.write_str("YUYV"),
            FrameFormat::Nv12 => f.write_str("NV12"),
            FrameFormat::Gray8 => f.write_str("GRAY8"),
            FrameFormat::Y16 => f.write_str("Y16"),
            FrameFormat::Mjpeg => f.write_str("MJPEG"),
            FrameFormat::Uncompressed(guid) => write!(f, "Uncompressed({})", guid),
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
