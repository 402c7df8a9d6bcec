use std::{fmt, time::Duration};

use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes};

/// Raw value of entity controls.
pub trait ControlValue {
    type Buf: Default + AsMut<[u8]>;

    fn decode(buf: &[u8]) -> Self;
    fn encode(&self, buf: &mut [u8]);
}

impl ControlValue for u8 {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        buf[0]
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self;
    }
}

impl ControlValue for u32 {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(buf);
        Self::from_le_bytes(bytes)
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes())
    }
}

bitflags! {
    /// Values of the `CT_AE_MODE_CONTROL`.
    ///
    /// `SET_CUR` takes exactly one of these; `GET_RES` reports the supported modes as a bitmap.
    pub struct AutoExposureMode: u8 {
        /// Manual exposure time, manual iris.
        const MANUAL = 1 << 0;
        /// Auto exposure time, auto iris.
        const AUTO = 1 << 1;
        /// Manual exposure time, auto iris.
        const SHUTTER_PRIORITY = 1 << 2;
        /// Auto exposure time, manual iris.
        const APERTURE_PRIORITY = 1 << 3;
    }
}

impl ControlValue for AutoExposureMode {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        Self::from_bits_truncate(buf[0])
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.bits();
    }
}

/// Absolute exposure time (`CT_EXPOSURE_TIME_ABSOLUTE_CONTROL`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ExposureTime(u32);

impl ExposureTime {
    /// Rounds and clamps a duration to fit the available range.
    pub fn from_duration(dur: Duration) -> Self {
        // Exposure time is in units of 0.0001 seconds, or 100µs.
        let units = dur.as_micros() / 100;
        let clamped = units.clamp(1, u32::MAX.into());
        Self(clamped as u32)
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(u64::from(self.0) * 100)
    }
}

impl fmt::Debug for ExposureTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_duration().fmt(f)
    }
}

impl ControlValue for ExposureTime {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        Self(u32::decode(buf))
    }

    fn encode(&self, buf: &mut [u8]) {
        self.0.encode(buf)
    }
}

/// Video Probe and Commit Controls (UVC 1.5, 4.3.1.1).
#[derive(Default, AsBytes, FromBytes, Debug, Clone, Copy)]
#[repr(C, packed)]
#[allow(non_snake_case)]
pub struct ProbeCommitControls {
    pub bmHint: ProbeHint,
    pub bFormatIndex: u8,
    pub bFrameIndex: u8,
    /// Frame interval in 100 ns units.
    pub dwFrameInterval: u32,
    pub wKeyFrameRate: u16,
    pub wPFrameRate: u16,
    pub wCompQuality: u16,
    pub wCompWindowSize: u16,
    pub wDelay: u16,
    pub dwMaxVideoFrameSize: u32,
    pub dwMaxPayloadTransferSize: u32,
    // UVC 1.1+ fields (`dwClockFrequency` onwards) are not sent. UVC 1.0 devices expect exactly
    // 26 bytes and reject longer `PROBE`/`COMMIT` transfers.
}

impl ControlValue for ProbeCommitControls {
    type Buf = ProbeCommitControlsBuf;

    fn decode(buf: &[u8]) -> Self {
        // `Buf` has exactly the size of `Self`
        Self::read_from(buf).unwrap_or_default()
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self.as_bytes());
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ProbeCommitControlsBuf([u8; std::mem::size_of::<ProbeCommitControls>()]);

impl Default for ProbeCommitControlsBuf {
    fn default() -> Self {
        Self([0; std::mem::size_of::<ProbeCommitControls>()])
    }
}

impl AsMut<[u8]> for ProbeCommitControlsBuf {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

bitflags! {
    #[derive(Default, AsBytes, FromBytes)]
    #[repr(transparent)]
    pub struct ProbeHint: u16 {
        const FIX_FRAME_INTERVAL = 1 << 0;
        const FIX_KEY_FRAME_RATE = 1 << 1;
        const FIX_P_FRAME_RATE = 1 << 2;
        const FIX_COMP_QUALITY = 1 << 3;
        const FIX_COMP_WINDOW_SIZE = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_commit_block_is_uvc_1_0_sized() {
        assert_eq!(std::mem::size_of::<ProbeCommitControls>(), 26);
    }

    #[test]
    fn probe_commit_layout() {
        let controls = ProbeCommitControls {
            bmHint: ProbeHint::FIX_FRAME_INTERVAL,
            bFormatIndex: 2,
            bFrameIndex: 3,
            dwFrameInterval: 333_333,
            dwMaxPayloadTransferSize: 0x0001_0000,
            ..Default::default()
        };

        let mut buf = ProbeCommitControlsBuf::default();
        controls.encode(buf.as_mut());
        let raw = buf.as_mut();
        assert_eq!(&raw[0..2], &[0x01, 0x00]);
        assert_eq!(raw[2], 2);
        assert_eq!(raw[3], 3);
        assert_eq!(&raw[4..8], &333_333u32.to_le_bytes());
        assert_eq!(&raw[22..26], &[0x00, 0x00, 0x01, 0x00]);

        let decoded = ProbeCommitControls::decode(raw);
        let (interval, frame_index) = (decoded.dwFrameInterval, decoded.bFrameIndex);
        assert_eq!(interval, 333_333);
        assert_eq!(frame_index, 3);
    }

    #[test]
    fn ae_mode_encoding() {
        let mut buf = [0u8; 1];
        AutoExposureMode::MANUAL.encode(&mut buf);
        assert_eq!(buf, [1]);
        assert_eq!(
            AutoExposureMode::decode(&[0b1001]),
            AutoExposureMode::MANUAL | AutoExposureMode::APERTURE_PRIORITY
        );
        // reserved bits are dropped
        assert_eq!(AutoExposureMode::decode(&[0xf0]), AutoExposureMode::empty());
    }

    #[test]
    fn exposure_time_is_clamped() {
        assert_eq!(
            ExposureTime::from_duration(Duration::ZERO).as_duration(),
            Duration::from_micros(100)
        );
        assert_eq!(
            ExposureTime::from_duration(Duration::from_millis(10)).as_duration(),
            Duration::from_millis(10)
        );
    }
}
