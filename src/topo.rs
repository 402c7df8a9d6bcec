//! UVC device topology and streaming interface descriptors.
//!
//! UVC devices consist of:
//! - *Input Terminals*, which provide video data to the UVC device.
//! - *Output Terminals*, which transfer video data away from the UVC device.
//! - *Units*, which connect between other units or terminals, and process or reroute video data.
//!
//! Video data leaves the device through one or more *Video Streaming Interfaces*, each of which
//! lists the formats it supports, and for every format the frame sizes and intervals.

pub(crate) mod parse;

use std::{num::NonZeroU8, time::Duration};

use bitflags::bitflags;

use crate::util::{from_100ns, to_100ns, INTERVALS_PER_SEC};
use uuid::Uuid;

use crate::{format::FrameFormat, util::BcdVersion};

/// Identifies a video data source (either a [`UnitDesc`], or an [`InputTerminalDesc`]).
#[derive(Clone, Copy, Debug)]
pub struct SourceId(NonZeroU8);

impl SourceId {
    pub(crate) fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }
}

/// Identifies an [`InputTerminalDesc`] or an [`OutputTerminalDesc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TermId(NonZeroU8);

impl TermId {
    pub(crate) fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }
}

/// Identifies an input terminal that is a camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraId(TermId);

impl CameraId {
    pub(crate) fn as_raw(self) -> u8 {
        self.0 .0.into()
    }
}

impl From<CameraId> for TermId {
    fn from(id: CameraId) -> Self {
        id.0
    }
}

/// Identifies a [`UnitDesc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnitId(NonZeroU8);

impl UnitId {
    pub(crate) fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }
}

/// The device topology as reported by the Video Control interface descriptors.
#[derive(Debug)]
pub struct Topology {
    header: ControlHeader,
    units: Vec<UnitDesc>,
    inputs: Vec<InputTerminalDesc>,
    outputs: Vec<OutputTerminalDesc>,
}

impl Topology {
    pub fn header(&self) -> &ControlHeader {
        &self.header
    }

    pub fn camera_terminal_by_id(&self, id: CameraId) -> Option<&CameraTerminalDesc> {
        self.inputs
            .iter()
            .find(|inp| inp.as_camera_id() == Some(id))
            .and_then(|inp| inp.as_camera_desc())
    }

    /// Returns the ID of the first camera input terminal, if the device has one.
    pub fn first_camera_id(&self) -> Option<CameraId> {
        self.inputs.iter().find_map(|input| input.as_camera_id())
    }

    pub fn units(&self) -> &[UnitDesc] {
        &self.units
    }

    pub fn inputs(&self) -> &[InputTerminalDesc] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputTerminalDesc] {
        &self.outputs
    }
}

#[derive(Debug)]
#[allow(dead_code)] // fields only shown via `Debug`
pub struct ControlHeader {
    uvc_version: BcdVersion,
    total_len: u16,
    clock_freq_hz: u32,
    streaming_interfaces: Vec<u8>,
}

impl ControlHeader {
    pub fn uvc_version(&self) -> BcdVersion {
        self.uvc_version
    }

    pub fn clock_frequency_hz(&self) -> u32 {
        self.clock_freq_hz
    }

    /// Interface numbers of the streaming interfaces belonging to this function.
    pub fn streaming_interfaces(&self) -> &[u8] {
        &self.streaming_interfaces
    }
}

/// A unit declared by the Video Control Interface Descriptors.
#[derive(Debug)]
pub struct UnitDesc {
    id: UnitId,
    kind: UnitKind,
}

impl UnitDesc {
    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn unit_kind(&self) -> &UnitKind {
        &self.kind
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum UnitKind {
    Selector(SelectorUnitDesc),
    Processing(ProcessingUnitDesc),
    Extension(ExtensionUnitDesc),
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct SelectorUnitDesc {
    inputs: Vec<SourceId>,
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct ProcessingUnitDesc {
    source: SourceId,
    max_multiplier: u16,
    controls: ProcessingUnitControls,
    string: u8,
    standards: VideoStandards,
}

impl ProcessingUnitDesc {
    pub fn controls(&self) -> ProcessingUnitControls {
        self.controls
    }
}

bitflags! {
    pub struct ProcessingUnitControls: u32 {
        const BRIGHTNESS                     = 1 << 0;
        const CONTRAST                       = 1 << 1;
        const HUE                            = 1 << 2;
        const SATURATION                     = 1 << 3;
        const SHARPNESS                      = 1 << 4;
        const GAMMA                          = 1 << 5;
        const WHITE_BALANCE_TEMPERATURE      = 1 << 6;
        const WHITE_BALANCE_COMPONENT        = 1 << 7;
        const BACKLIGHT_COMPENSATION         = 1 << 8;
        const GAIN                           = 1 << 9;
        const POWER_LINE_FREQUENCY           = 1 << 10;
        const HUE_AUTO                       = 1 << 11;
        const WHITE_BALANCE_TEMPERATURE_AUTO = 1 << 12;
        const WHITE_BALANCE_COMPONENT_AUTO   = 1 << 13;
        const DIGITAL_MULTIPLIER             = 1 << 14;
        const DIGITAL_MULTIPLIER_LIMIT       = 1 << 15;
        const ANALOG_VIDEO_STANDARD          = 1 << 16;
        const ANALOG_VIDEO_LOCK_STATUS       = 1 << 17;
        const CONTRAST_AUTO                  = 1 << 18;
    }
}

bitflags! {
    pub struct VideoStandards: u8 {
        const NONE         = 1 << 0;
        const NTSC_525_60  = 1 << 1;
        const PAL_625_50   = 1 << 2;
        const SECAM_625_50 = 1 << 3;
        const NTSC_625_50  = 1 << 4;
        const PAL_525_60   = 1 << 5;
    }
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct ExtensionUnitDesc {
    extension_code: Uuid,
    num_controls: u8,
    inputs: Vec<SourceId>,
    controls_bitmap: Vec<u8>,
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct OutputTerminalDesc {
    term_id: TermId,
    term_type: u16,
    assoc: Option<TermId>,
    source: SourceId,
    string: u8,
}

impl OutputTerminalDesc {
    pub fn terminal_type(&self) -> Option<OutputTerminalType> {
        OutputTerminalType::from_raw(self.term_type)
    }
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct InputTerminalDesc {
    term_id: TermId,
    term_type: u16,
    assoc: Option<TermId>,
    string: u8,
    kind: InputTerminalKind,
}

impl InputTerminalDesc {
    pub fn terminal_type(&self) -> Option<InputTerminalType> {
        InputTerminalType::from_raw(self.term_type)
    }

    pub fn terminal_kind(&self) -> &InputTerminalKind {
        &self.kind
    }

    pub fn as_camera_id(&self) -> Option<CameraId> {
        match &self.kind {
            InputTerminalKind::Camera(_) => Some(CameraId(self.term_id)),
            _ => None,
        }
    }

    pub fn as_camera_desc(&self) -> Option<&CameraTerminalDesc> {
        match &self.kind {
            InputTerminalKind::Camera(cam) => Some(cam),
            _ => None,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum InputTerminalKind {
    Camera(CameraTerminalDesc),
    /// Misc. terminal without extra functionality (or with unimplemented functionality).
    Other,
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct CameraTerminalDesc {
    objective_focal_length_min: u16,
    objective_focal_length_max: u16,
    ocular_focal_length: u16,
    controls: CameraControls,
}

impl CameraTerminalDesc {
    pub fn controls(&self) -> CameraControls {
        self.controls
    }
}

bitflags! {
    pub struct CameraControls: u32 {
        const SCANNING_MODE = 1 << 0;
        const AUTO_EXPOSURE_MODE = 1 << 1;
        const AUTO_EXPOSURE_PRIORITY = 1 << 2;
        const EXPOSURE_TIME_ABS = 1 << 3;
        const EXPOSURE_TIME_REL = 1 << 4;
        const FOCUS_ABS = 1 << 5;
        const FOCUS_REL = 1 << 6;
        const IRIS_ABS = 1 << 7;
        const IRIS_REL = 1 << 8;
        const ZOOM_ABS = 1 << 9;
        const ZOOM_REL = 1 << 10;
        const PAN_TILT_ABS = 1 << 11;
        const PAN_TILT_REL = 1 << 12;
        const ROLL_ABS = 1 << 13;
        const ROLL_REL = 1 << 14;

        const FOCUS_AUTO = 1 << 17;
        const PRIVACY = 1 << 18;
        const FOCUS_SIMPLE = 1 << 19;
        const WINDOW = 1 << 20;
        const REGION_OF_INTEREST = 1 << 21;
    }
}

primitive_enum! {
    pub enum InputTerminalType: u16 {
        UsbVendorSpecific = 0x0100,
        UsbStreaming = 0x0101,

        InVendorSpecific = 0x0200,
        InCamera = 0x0201,
        InMediaTransport = 0x0202,

        ExtVendorSpecific = 0x0400,
        ExtCompositeConnector = 0x0401,
        ExtSVideoConnector = 0x0402,
        ExtComponentConnector = 0x0403,
    }
}

primitive_enum! {
    pub enum OutputTerminalType: u16 {
        UsbVendorSpecific = 0x0100,
        UsbStreaming = 0x0101,

        OutVendorSpecific = 0x0300,
        OutDisplay = 0x0301,
        OutMediaTransport = 0x0302,

        ExtVendorSpecific = 0x0400,
        ExtCompositeConnector = 0x0401,
        ExtSVideoConnector = 0x0402,
        ExtComponentConnector = 0x0403,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingInterfaceId(pub(crate) u8);

/// How the streaming endpoint moves video data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointTransfer {
    Bulk,
    Isochronous,
    /// The endpoint address was not found in any alternate setting of the interface.
    Unknown,
}

#[derive(Debug)]
pub struct StreamingInterfaceDesc {
    id: StreamingInterfaceId,
    kind: StreamingInterfaceKind,
    formats: Vec<FormatDesc>,
    pub(crate) transfer: EndpointTransfer,
}

impl StreamingInterfaceDesc {
    pub fn id(&self) -> StreamingInterfaceId {
        self.id
    }

    pub fn kind(&self) -> &StreamingInterfaceKind {
        &self.kind
    }

    pub fn formats(&self) -> &[FormatDesc] {
        &self.formats
    }

    pub fn format_by_index(&self, index: FormatIndex) -> Option<&FormatDesc> {
        self.formats.iter().find(|f| f.index() == index)
    }

    /// Returns the first format descriptor that encodes frames as `format`.
    pub fn find_format(&self, format: FrameFormat) -> Option<&FormatDesc> {
        self.formats.iter().find(|f| f.frame_format() == format)
    }

    /// Address of the endpoint carrying video data, for device-to-host interfaces.
    pub fn endpoint_address(&self) -> Option<u8> {
        match &self.kind {
            StreamingInterfaceKind::Input(k) => Some(k.endpoint_address),
            StreamingInterfaceKind::Output(_) => None,
        }
    }

    pub fn endpoint_transfer(&self) -> EndpointTransfer {
        self.transfer
    }
}

#[derive(Debug)]
pub enum StreamingInterfaceKind {
    Input(InputHeader),
    Output(OutputHeader),
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct InputHeader {
    num_formats: u8,
    total_length: u16,
    endpoint_address: u8,
    info: InputInterfaceInfo,
    terminal_link: TermId,
    still_capture_method: StillCaptureMethod,
    trigger_support: TriggerSupport,
    trigger_usage: TriggerUsage,
    format_controls: Vec<PerFormatControls>,
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct OutputHeader {
    num_formats: u8,
    total_length: u16,
    endpoint_address: u8,
    terminal_link: TermId,
}

bitflags! {
    pub struct InputInterfaceInfo: u8 {
        const DYNAMIC_FORMAT_CHANGE_SUPPORTED = 1 << 0;
    }
}

primitive_enum! {
    pub enum StillCaptureMethod: u8 {
        None = 0,
        Method1 = 1,
        Method2 = 2,
        Method3 = 3,
    }
}

primitive_enum! {
    pub enum TriggerSupport: u8 {
        NotSupported = 0,
        Supported = 1,
    }
}

primitive_enum! {
    pub enum TriggerUsage: u8 {
        InitiateStillImageCapture = 0,
        GeneralPurposeButtonEvent = 1,
    }
}

bitflags! {
    pub struct PerFormatControls: u32 {
        const KEY_FRAME_RATE = 1 << 0;
        const P_FRAME_RATE = 1 << 1;
        const COMP_QUALITY = 1 << 2;
        const COMP_WINDOW_SIZE = 1 << 3;

        const GENERATE_KEY_FRAME = 1 << 4;
        const UPDATE_FRAME_SEGMENT = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatIndex(pub(crate) u8);

/// Index of a frame descriptor. Only unique among the frames of one format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameIndex(pub(crate) u8);

/// A format descriptor together with the frame descriptors following it.
#[derive(Debug)]
#[allow(dead_code)]
pub struct FormatDesc {
    format_index: FormatIndex,
    num_frame_descriptors: u8,
    kind: FormatKind,
    frames: Vec<FrameDesc>,
}

impl FormatDesc {
    pub fn index(&self) -> FormatIndex {
        self.format_index
    }

    pub fn kind(&self) -> &FormatKind {
        &self.kind
    }

    pub fn frame_format(&self) -> FrameFormat {
        match &self.kind {
            FormatKind::Uncompressed(f) => FrameFormat::from_guid(f.format),
            FormatKind::Mjpeg(_) => FrameFormat::Mjpeg,
        }
    }

    pub fn frames(&self) -> &[FrameDesc] {
        &self.frames
    }

    pub fn default_frame_index(&self) -> FrameIndex {
        match &self.kind {
            FormatKind::Uncompressed(f) => f.default_frame_index,
            FormatKind::Mjpeg(f) => f.default_frame_index,
        }
    }

    /// The frame descriptor marked as default, falling back to the first one.
    pub fn default_frame(&self) -> Option<&FrameDesc> {
        self.frame_by_index(self.default_frame_index())
            .or_else(|| self.frames.first())
    }

    pub fn frame_by_index(&self, index: FrameIndex) -> Option<&FrameDesc> {
        self.frames.iter().find(|f| f.index() == index)
    }

    pub fn find_frame(&self, width: u16, height: u16) -> Option<&FrameDesc> {
        self.frames
            .iter()
            .find(|f| f.width() == width && f.height() == height)
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum FormatKind {
    Uncompressed(FormatUncompressed),
    Mjpeg(FormatMjpeg),
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct FormatUncompressed {
    format: Uuid,
    bits_per_pixel: u8,
    default_frame_index: FrameIndex,
    aspect_ratio_x: u8,
    aspect_ratio_y: u8,
    interlace_flags: InterlaceFlags,
    copy_protect: u8, // cute
}

impl FormatUncompressed {
    pub fn guid(&self) -> Uuid {
        self.format
    }

    pub fn bits_per_pixel(&self) -> u8 {
        self.bits_per_pixel
    }
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct FormatMjpeg {
    flags: MjpegFlags,
    default_frame_index: FrameIndex,
    aspect_ratio_x: u8,
    aspect_ratio_y: u8,
    interlace_flags: InterlaceFlags,
    copy_protect: u8,
}

bitflags! {
    pub struct MjpegFlags: u8 {
        const FIXED_SIZE_SAMPLES = 1 << 0;
    }
}

bitflags! {
    pub struct InterlaceFlags: u8 {
        const INTERLACED = 1 << 0;
        const SINGLE_FIELD_PER_FRAME = 1 << 1;
        const FIELD_1_FIRST = 1 << 2;
        const FIELD_PATTERN_MASK = 0b110000;
    }
}

/// Frame descriptor. Uncompressed and MJPEG frame descriptors share this layout.
#[derive(Debug)]
#[allow(dead_code)]
pub struct FrameDesc {
    frame_index: FrameIndex,
    capabilities: FrameCapabilities,
    width: u16,
    height: u16,
    min_bit_rate: u32,
    max_bit_rate: u32,
    max_video_frame_buffer_size: u32,
    default_frame_interval: Duration,
    frame_interval: SupportedFrameIntervals,
}

impl FrameDesc {
    pub fn index(&self) -> FrameIndex {
        self.frame_index
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn default_frame_interval(&self) -> Duration {
        self.default_frame_interval
    }

    pub fn supported_frame_intervals(&self) -> &SupportedFrameIntervals {
        &self.frame_interval
    }

    /// Picks the advertised frame interval that runs at `fps` frames per second.
    ///
    /// An interval matches if `10_000_000 / interval` (in 100 ns units, rounded down) equals
    /// `fps`, so 7.5 fps is found as 7. The default interval is preferred, then the first matching
    /// discrete interval, then the shortest matching interval of a continuous range. An `fps` of 0
    /// matches intervals longer than a second.
    pub fn interval_for_fps(&self, fps: u32) -> Option<Duration> {
        let fps = u64::from(fps);
        let matches = |interval: &Duration| match to_100ns(*interval) {
            0 => false,
            units => INTERVALS_PER_SEC / units == fps,
        };

        if matches(&self.default_frame_interval) {
            return Some(self.default_frame_interval);
        }

        match &self.frame_interval {
            SupportedFrameIntervals::Discrete {
                supported_frame_intervals,
            } => supported_frame_intervals.iter().copied().find(matches),
            SupportedFrameIntervals::Continuous {
                min_frame_interval,
                max_frame_interval,
                frame_interval_step,
            } => {
                let min = to_100ns(*min_frame_interval);
                let max = to_100ns(*max_frame_interval);
                let step = to_100ns(*frame_interval_step);

                // all intervals `i` with `INTERVALS_PER_SEC / i == fps`
                let lo = (INTERVALS_PER_SEC / (fps + 1) + 1).max(min);
                let hi = INTERVALS_PER_SEC.checked_div(fps).unwrap_or(u64::MAX).min(max);
                if lo > hi {
                    return None;
                }
                let first = match step {
                    0 => lo,
                    step => min + (lo - min + step - 1) / step * step,
                };
                if first <= hi {
                    Some(from_100ns(first))
                } else {
                    None
                }
            }
        }
    }
}

bitflags! {
    pub struct FrameCapabilities: u8 {
        const STILL_IMAGE_SUPPORTED = 1 << 0;
        const FIXED_FRAME_RATE = 1 << 1;
    }
}

#[derive(Debug)]
pub enum SupportedFrameIntervals {
    Continuous {
        min_frame_interval: Duration,
        max_frame_interval: Duration,
        frame_interval_step: Duration,
    },

    Discrete {
        supported_frame_intervals: Vec<Duration>,
    },
}
