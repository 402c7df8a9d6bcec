use std::{
    fmt,
    io::{self, Read},
    time::SystemTime,
};

use crate::format::FrameFormat;

/// A complete video frame received from a stream.
///
/// Frames are handed out by value through the stream's channel, so whoever receives one owns it
/// and its payload exclusively.
pub struct Frame {
    sequence: u32,
    width: u16,
    height: u16,
    format: FrameFormat,
    capture_time: SystemTime,
    data: Vec<u8>,
    read_pos: usize,
}

impl Frame {
    pub fn new(
        sequence: u32,
        width: u16,
        height: u16,
        format: FrameFormat,
        capture_time: SystemTime,
        data: Vec<u8>,
    ) -> Self {
        Self {
            sequence,
            width,
            height,
            format,
            capture_time,
            data,
            read_pos: 0,
        }
    }

    /// Sequence number of this frame, starting at 1 for the first frame of a stream.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Time at which the last payload of this frame was received.
    pub fn capture_time(&self) -> SystemTime {
        self.capture_time
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Reads the frame payload. Independent of [`Frame::data`], which always returns all of it.
impl Read for Frame {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rest = &self.data[self.read_pos..];
        let n = rest.read(buf)?;
        self.read_pos += n;
        Ok(n)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("capture_time", &self.capture_time)
            .field("len", &self.data.len())
            .finish()
    }
}
