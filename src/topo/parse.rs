use std::io;

use byteorder::{ReadBytesExt, LE};
use rusb::InterfaceDescriptor;

use crate::{
    error::*,
    util::{malformed, split_descriptors, BcdVersion, DescriptorFields},
    Result,
};

use super::*;

/// The value of `bDescriptorType` of all descriptors we're interested in.
const VIDEO_INTERFACE_DESC_TYPE: u8 = 36;

const CONTROL_DESC_SUBTYPE_HEADER: u8 = 0x01;
const CONTROL_DESC_SUBTYPE_INPUT_TERM: u8 = 0x02;
const CONTROL_DESC_SUBTYPE_OUTPUT_TERMINAL: u8 = 0x03;
const CONTROL_DESC_SUBTYPE_SELECTOR_UNIT: u8 = 0x04;
const CONTROL_DESC_SUBTYPE_PROCESSING_UNIT: u8 = 0x05;
const CONTROL_DESC_SUBTYPE_EXTENSION_UNIT: u8 = 0x06;
const CONTROL_DESC_SUBTYPE_ENCODING_UNIT: u8 = 0x07;

const STREAM_DESC_SUBTYPE_INPUT_HEADER: u8 = 0x01;
const STREAM_DESC_SUBTYPE_OUTPUT_HEADER: u8 = 0x02;
const STREAM_DESC_SUBTYPE_STILL_IMAGE_FRAME: u8 = 0x03;
const STREAM_DESC_SUBTYPE_FORMAT_UNCOMPRESSED: u8 = 0x04;
const STREAM_DESC_SUBTYPE_FRAME_UNCOMPRESSED: u8 = 0x05;
const STREAM_DESC_SUBTYPE_FORMAT_MJPEG: u8 = 0x06;
const STREAM_DESC_SUBTYPE_FRAME_MJPEG: u8 = 0x07;
const STREAM_DESC_SUBTYPE_COLORFORMAT: u8 = 0x0D;

pub(crate) fn parse_control_desc(desc: &InterfaceDescriptor<'_>) -> Result<Topology> {
    parse_control_extra(desc.extra())
}

fn parse_control_extra(extra: &[u8]) -> Result<Topology> {
    let mut parser = ControlDescParser {
        header: None,
        units: Vec::new(),
        inputs: Vec::new(),
        outputs: Vec::new(),
    };
    for (ty, data) in split_descriptors(extra) {
        if ty == VIDEO_INTERFACE_DESC_TYPE {
            parser
                .parse_descriptor(&data[2..])
                .during(Action::AccessingDeviceDescriptor)?;
        } else {
            log::debug!("skipping descriptor of type {}", ty);
        }
    }

    let header = match parser.header {
        Some(header) => header,
        None => {
            return err(
                "missing VC_HEADER descriptor",
                Action::AccessingDeviceDescriptor,
            );
        }
    };

    Ok(Topology {
        header,
        units: parser.units,
        inputs: parser.inputs,
        outputs: parser.outputs,
    })
}

struct ControlDescParser {
    header: Option<ControlHeader>,
    units: Vec<UnitDesc>,
    inputs: Vec<InputTerminalDesc>,
    outputs: Vec<OutputTerminalDesc>,
}

impl ControlDescParser {
    fn parse_descriptor(&mut self, raw: &[u8]) -> io::Result<()> {
        match self.parse_descriptor_impl(raw) {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                log::warn!(
                    "UVC descriptor too short, please report a bug to the device manufacturer"
                );
                log::debug!("retrying with 100 extra zero bytes");
                log::debug!("descriptor data: {:02x?}", raw);

                let mut buf = vec![0; raw.len() + 100];
                buf[..raw.len()].copy_from_slice(raw);

                self.parse_descriptor_impl(&buf)
            }
            res => res,
        }
    }

    fn parse_descriptor_impl(&mut self, mut raw: &[u8]) -> io::Result<()> {
        let subtype = raw.read_u8()?;
        match subtype {
            CONTROL_DESC_SUBTYPE_HEADER => {
                if self.header.is_some() {
                    return Err(malformed("duplicate VC_HEADER descriptor"));
                }

                self.header = Some(ControlHeader {
                    uvc_version: BcdVersion(raw.read_u16::<LE>()?),
                    total_len: raw.read_u16::<LE>()?,
                    clock_freq_hz: raw.read_u32::<LE>()?,
                    streaming_interfaces: {
                        let count = raw.read_u8()?;
                        (0..count)
                            .map(|_| raw.read_u8())
                            .collect::<io::Result<Vec<_>>>()?
                    },
                });

                Ok(())
            }
            CONTROL_DESC_SUBTYPE_INPUT_TERM => {
                let mut term = InputTerminalDesc {
                    term_id: raw.read_id("bTerminalID", TermId::new)?,
                    term_type: raw.read_u16::<LE>()?,
                    assoc: TermId::new(raw.read_u8()?),
                    string: raw.read_u8()?,
                    kind: InputTerminalKind::Other,
                };
                if term.terminal_type() == Some(InputTerminalType::InCamera) {
                    term.kind = InputTerminalKind::Camera(CameraTerminalDesc {
                        objective_focal_length_min: raw.read_u16::<LE>()?,
                        objective_focal_length_max: raw.read_u16::<LE>()?,
                        ocular_focal_length: raw.read_u16::<LE>()?,
                        controls: CameraControls::from_bits_truncate(
                            raw.read_sized_bitmask()?,
                        ),
                    });
                }

                self.inputs.push(term);

                Ok(())
            }
            CONTROL_DESC_SUBTYPE_OUTPUT_TERMINAL => {
                self.outputs.push(OutputTerminalDesc {
                    term_id: raw.read_id("bTerminalID", TermId::new)?,
                    term_type: raw.read_u16::<LE>()?,
                    assoc: TermId::new(raw.read_u8()?),
                    source: raw.read_id("bSourceID", SourceId::new)?,
                    string: raw.read_u8()?,
                });
                Ok(())
            }
            CONTROL_DESC_SUBTYPE_SELECTOR_UNIT => {
                self.units.push(UnitDesc {
                    id: raw.read_id("bUnitID", UnitId::new)?,
                    kind: UnitKind::Selector(SelectorUnitDesc {
                        inputs: {
                            let num = raw.read_u8()?;
                            (0..num)
                                .map(|_| raw.read_id("bSourceID", SourceId::new))
                                .collect::<io::Result<Vec<_>>>()?
                        },
                    }),
                });
                Ok(())
            }
            CONTROL_DESC_SUBTYPE_PROCESSING_UNIT => {
                // UVC 1.0 devices omit `bmVideoStandards`; the `parse_descriptor` fallback pads it.
                self.units.push(UnitDesc {
                    id: raw.read_id("bUnitID", UnitId::new)?,
                    kind: UnitKind::Processing(ProcessingUnitDesc {
                        source: raw.read_id("bSourceID", SourceId::new)?,
                        max_multiplier: raw.read_u16::<LE>()?,
                        controls: ProcessingUnitControls::from_bits_truncate(
                            raw.read_sized_bitmask()?,
                        ),
                        string: raw.read_u8()?,
                        standards: VideoStandards::from_bits_truncate(raw.read_u8()?),
                    }),
                });
                Ok(())
            }
            CONTROL_DESC_SUBTYPE_EXTENSION_UNIT => {
                self.units.push(UnitDesc {
                    id: raw.read_id("bUnitID", UnitId::new)?,
                    kind: UnitKind::Extension(ExtensionUnitDesc {
                        extension_code: raw.read_guid()?,
                        num_controls: raw.read_u8()?,
                        inputs: {
                            let count = raw.read_u8()?;
                            (0..count)
                                .map(|_| raw.read_id("bSourceID", SourceId::new))
                                .collect::<io::Result<Vec<_>>>()?
                        },
                        controls_bitmap: {
                            let size = raw.read_u8()?;
                            (0..size)
                                .map(|_| raw.read_u8())
                                .collect::<io::Result<Vec<_>>>()?
                        },
                    }),
                });
                Ok(())
            }
            CONTROL_DESC_SUBTYPE_ENCODING_UNIT => {
                log::debug!("skipping encoding unit descriptor");
                Ok(())
            }
            _ => {
                log::debug!("skipping unknown VC descriptor subtype {}", subtype);
                Ok(())
            }
        }
    }
}

pub(crate) fn parse_streaming_descriptor(
    desc: &InterfaceDescriptor<'_>,
) -> Result<StreamingInterfaceDesc> {
    parse_streaming_extra(desc.interface_number(), desc.extra())
}

fn parse_streaming_extra(interface_number: u8, extra: &[u8]) -> Result<StreamingInterfaceDesc> {
    let mut parser = StreamingDescParser {
        in_header: None,
        out_header: None,
        formats: Vec::new(),
        skipping_format: false,
    };

    for (ty, data) in split_descriptors(extra) {
        if ty == VIDEO_INTERFACE_DESC_TYPE {
            parser
                .parse_descriptor(&data[2..])
                .during(Action::AccessingDeviceDescriptor)?;
        } else {
            log::debug!("skipping descriptor of type {}", ty);
        }
    }

    Ok(StreamingInterfaceDesc {
        id: StreamingInterfaceId(interface_number),
        kind: match (parser.in_header, parser.out_header) {
            (None, Some(output)) => StreamingInterfaceKind::Output(output),
            (Some(input), None) => StreamingInterfaceKind::Input(input),
            (None, None) => {
                return err(
                    "missing header in Video Streaming interface",
                    Action::AccessingDeviceDescriptor,
                )
            }
            (Some(_), Some(_)) => {
                return err(
                    "Video Streaming interface has both input and output descriptor",
                    Action::AccessingDeviceDescriptor,
                )
            }
        },
        formats: parser.formats,
        transfer: EndpointTransfer::Unknown,
    })
}

struct StreamingDescParser {
    in_header: Option<InputHeader>,
    out_header: Option<OutputHeader>,
    formats: Vec<FormatDesc>,
    /// Set while the frame descriptors that follow belong to a format we don't parse.
    skipping_format: bool,
}

impl StreamingDescParser {
    fn parse_descriptor(&mut self, raw: &[u8]) -> io::Result<()> {
        match self.parse_descriptor_impl(raw) {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                log::warn!(
                    "UVC Video Streaming interface descriptor too short, please report a bug to the device manufacturer"
                );
                log::debug!("retrying with 100 extra zero bytes");
                log::debug!("descriptor data: {:#04x?}", raw);

                let mut buf = vec![0; raw.len() + 100];
                buf[..raw.len()].copy_from_slice(raw);

                self.parse_descriptor_impl(&buf)
            }
            res => res,
        }
    }

    fn parse_descriptor_impl(&mut self, mut raw: &[u8]) -> io::Result<()> {
        let subtype = raw.read_u8()?;
        match subtype {
            STREAM_DESC_SUBTYPE_INPUT_HEADER => {
                if self.in_header.is_some() {
                    return Err(malformed("duplicate input header descriptor"));
                }

                let num_formats = raw.read_u8()?;
                self.in_header = Some(InputHeader {
                    num_formats,
                    total_length: raw.read_u16::<LE>()?,
                    endpoint_address: raw.read_u8()?,
                    info: InputInterfaceInfo::from_bits_truncate(raw.read_u8()?),
                    terminal_link: raw.read_id("bTerminalID", TermId::new)?,
                    still_capture_method: {
                        let raw = raw.read_u8()?;
                        StillCaptureMethod::from_raw(raw).unwrap_or_else(|| {
                            log::warn!("invalid value {} for `bStillCaptureMethod`", raw);
                            StillCaptureMethod::None
                        })
                    },
                    trigger_support: {
                        let raw = raw.read_u8()?;
                        TriggerSupport::from_raw(raw).unwrap_or_else(|| {
                            log::warn!("invalid value {} for `bTriggerSupport`", raw);
                            TriggerSupport::NotSupported
                        })
                    },
                    trigger_usage: {
                        let raw = raw.read_u8()?;
                        TriggerUsage::from_raw(raw).unwrap_or_else(|| {
                            log::warn!("invalid value {} for `bTriggerUsage`", raw);
                            TriggerUsage::InitiateStillImageCapture
                        })
                    },
                    format_controls: {
                        let control_size = raw.read_u8()?;

                        // This is `num_format` units with `control_size` bytes each.
                        (0..num_formats)
                            .map(|_| {
                                raw.read_bitmask(control_size.into())
                                    .map(PerFormatControls::from_bits_truncate)
                            })
                            .collect::<io::Result<Vec<_>>>()?
                    },
                });
                Ok(())
            }
            STREAM_DESC_SUBTYPE_OUTPUT_HEADER => {
                if self.out_header.is_some() {
                    return Err(malformed("duplicate output header descriptor"));
                }

                self.out_header = Some(OutputHeader {
                    num_formats: raw.read_u8()?,
                    total_length: raw.read_u16::<LE>()?,
                    endpoint_address: raw.read_u8()?,
                    terminal_link: raw.read_id("bTerminalID", TermId::new)?,
                });
                Ok(())
            }
            STREAM_DESC_SUBTYPE_FORMAT_UNCOMPRESSED => {
                let format_index = FormatIndex(raw.read_u8()?);
                let num_frame_descriptors = raw.read_u8()?;
                self.push_format(FormatDesc {
                    format_index,
                    num_frame_descriptors,
                    kind: FormatKind::Uncompressed(FormatUncompressed {
                        format: raw.read_guid()?,
                        bits_per_pixel: raw.read_u8()?,
                        default_frame_index: FrameIndex(raw.read_u8()?),
                        aspect_ratio_x: raw.read_u8()?,
                        aspect_ratio_y: raw.read_u8()?,
                        interlace_flags: InterlaceFlags::from_bits_truncate(raw.read_u8()?),
                        copy_protect: raw.read_u8()?,
                    }),
                    frames: Vec::new(),
                });
                Ok(())
            }
            STREAM_DESC_SUBTYPE_FORMAT_MJPEG => {
                let format_index = FormatIndex(raw.read_u8()?);
                let num_frame_descriptors = raw.read_u8()?;
                self.push_format(FormatDesc {
                    format_index,
                    num_frame_descriptors,
                    kind: FormatKind::Mjpeg(FormatMjpeg {
                        flags: MjpegFlags::from_bits_truncate(raw.read_u8()?),
                        default_frame_index: FrameIndex(raw.read_u8()?),
                        aspect_ratio_x: raw.read_u8()?,
                        aspect_ratio_y: raw.read_u8()?,
                        interlace_flags: InterlaceFlags::from_bits_truncate(raw.read_u8()?),
                        copy_protect: raw.read_u8()?,
                    }),
                    frames: Vec::new(),
                });
                Ok(())
            }
            STREAM_DESC_SUBTYPE_FRAME_UNCOMPRESSED | STREAM_DESC_SUBTYPE_FRAME_MJPEG => {
                if self.skipping_format {
                    log::debug!("skipping frame descriptor of unsupported format");
                    return Ok(());
                }

                let frame = parse_frame(&mut raw)?;
                match self.formats.last_mut() {
                    Some(format) => {
                        format.frames.push(frame);
                        Ok(())
                    }
                    None => Err(malformed("frame descriptor without preceding format descriptor")),
                }
            }
            STREAM_DESC_SUBTYPE_STILL_IMAGE_FRAME | STREAM_DESC_SUBTYPE_COLORFORMAT => {
                // only describe the preceding format further
                log::debug!("skipping VS descriptor subtype {}", subtype);
                Ok(())
            }
            _ => {
                // MPEG2-TS, DV, frame-based, stream-based, H.264, VP8, ...
                log::debug!("skipping unsupported VS descriptor subtype {}", subtype);
                self.skipping_format = true;
                Ok(())
            }
        }
    }

    fn push_format(&mut self, format: FormatDesc) {
        self.skipping_format = false;
        self.formats.push(format);
    }
}

fn parse_frame(raw: &mut &[u8]) -> io::Result<FrameDesc> {
    Ok(FrameDesc {
        frame_index: FrameIndex(raw.read_u8()?),
        capabilities: FrameCapabilities::from_bits_truncate(raw.read_u8()?),
        width: raw.read_u16::<LE>()?,
        height: raw.read_u16::<LE>()?,
        min_bit_rate: raw.read_u32::<LE>()?,
        max_bit_rate: raw.read_u32::<LE>()?,
        max_video_frame_buffer_size: raw.read_u32::<LE>()?,
        default_frame_interval: raw.read_interval()?,
        frame_interval: {
            let ty = raw.read_u8()?;
            match ty {
                0 => SupportedFrameIntervals::Continuous {
                    min_frame_interval: raw.read_interval()?,
                    max_frame_interval: raw.read_interval()?,
                    frame_interval_step: raw.read_interval()?,
                },
                n => {
                    // `n` discrete intervals.
                    SupportedFrameIntervals::Discrete {
                        supported_frame_intervals: (0..n)
                            .map(|_| raw.read_interval())
                            .collect::<io::Result<Vec<_>>>()?,
                    }
                }
            }
        },
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::format::FrameFormat;

    /// Wraps a class-specific descriptor body (starting at the subtype) with length and type.
    fn cs_desc(body: &[u8]) -> Vec<u8> {
        let mut v = vec![(body.len() + 2) as u8, VIDEO_INTERFACE_DESC_TYPE];
        v.extend_from_slice(body);
        v
    }

    fn control_fixture() -> Vec<u8> {
        let mut extra = Vec::new();
        // VC_HEADER, UVC 1.00, one streaming interface (1)
        extra.extend(cs_desc(&[
            0x01, 0x00, 0x01, 0x33, 0x00, 0x80, 0x8d, 0x5b, 0x00, 0x01, 0x01,
        ]));
        // camera terminal 1 with AE mode + absolute exposure time
        extra.extend(cs_desc(&[
            0x02, 0x01, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x0a,
            0x00, 0x00,
        ]));
        // processing unit 2, source 1, brightness + contrast
        extra.extend(cs_desc(&[
            0x05, 0x02, 0x01, 0x00, 0x00, 0x02, 0x03, 0x00, 0x00, 0x00,
        ]));
        // output terminal 3 (USB streaming), source 2
        extra.extend(cs_desc(&[0x03, 0x03, 0x01, 0x01, 0x00, 0x02, 0x00]));
        extra
    }

    fn streaming_fixture() -> Vec<u8> {
        let mut extra = Vec::new();
        // input header: 2 formats, endpoint 0x81, terminal link 3
        extra.extend(cs_desc(&[
            0x01, 0x02, 0x00, 0x00, 0x81, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
        ]));
        // uncompressed YUY2, format 1, 1 frame
        let mut yuy2 = vec![0x04, 0x01, 0x01];
        yuy2.extend_from_slice(&[
            0x59, 0x55, 0x59, 0x32, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00, 0x38,
            0x9b, 0x71,
        ]);
        yuy2.extend_from_slice(&[16, 1, 0, 0, 0, 0]);
        extra.extend(cs_desc(&yuy2));
        // 640x480, default 333333 (30 fps), discrete {333333, 666666}
        let mut frame = vec![0x05, 0x01, 0x00];
        frame.extend_from_slice(&640u16.to_le_bytes());
        frame.extend_from_slice(&480u16.to_le_bytes());
        frame.extend_from_slice(&[0; 12]);
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        frame.push(2);
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        frame.extend_from_slice(&666_666u32.to_le_bytes());
        extra.extend(cs_desc(&frame));
        // color matching descriptor
        extra.extend(cs_desc(&[0x0d, 0x01, 0x01, 0x04]));
        // MJPEG, format 2, 1 frame
        extra.extend(cs_desc(&[0x06, 0x02, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00]));
        // 1280x720, continuous 333333..=10000000 step 333333
        let mut frame = vec![0x07, 0x01, 0x00];
        frame.extend_from_slice(&1280u16.to_le_bytes());
        frame.extend_from_slice(&720u16.to_le_bytes());
        frame.extend_from_slice(&[0; 12]);
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        frame.push(0);
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        frame.extend_from_slice(&10_000_000u32.to_le_bytes());
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        extra.extend(cs_desc(&frame));
        extra
    }

    #[test]
    fn parses_control_topology() {
        let topo = parse_control_extra(&control_fixture()).unwrap();

        assert_eq!(topo.header().uvc_version().to_string(), "1.00");
        assert_eq!(topo.header().streaming_interfaces(), &[1]);
        assert_eq!(topo.inputs().len(), 1);
        assert_eq!(topo.units().len(), 1);
        assert_eq!(topo.outputs().len(), 1);

        let cam_id = topo.first_camera_id().unwrap();
        assert_eq!(cam_id.as_raw(), 1);
        let cam = topo.camera_terminal_by_id(cam_id).unwrap();
        assert!(cam.controls().contains(CameraControls::AUTO_EXPOSURE_MODE));
        assert!(cam.controls().contains(CameraControls::EXPOSURE_TIME_ABS));
        assert!(!cam.controls().contains(CameraControls::FOCUS_ABS));

        match topo.units()[0].unit_kind() {
            UnitKind::Processing(pu) => {
                assert!(pu.controls().contains(ProcessingUnitControls::BRIGHTNESS));
                assert!(pu.controls().contains(ProcessingUnitControls::CONTRAST));
            }
            other => panic!("unexpected unit {:?}", other),
        }
        assert_eq!(
            topo.outputs()[0].terminal_type(),
            Some(OutputTerminalType::UsbStreaming)
        );
    }

    #[test]
    fn missing_control_header_is_an_error() {
        let extra = cs_desc(&[0x03, 0x03, 0x01, 0x01, 0x00, 0x02, 0x00]);
        assert!(parse_control_extra(&extra).is_err());
    }

    #[test]
    fn short_processing_unit_is_padded() {
        let mut extra = cs_desc(&[
            0x01, 0x00, 0x01, 0x33, 0x00, 0x80, 0x8d, 0x5b, 0x00, 0x01, 0x01,
        ]);
        // missing `bmVideoStandards`
        extra.extend(cs_desc(&[0x05, 0x02, 0x01, 0x00, 0x00, 0x02, 0x03, 0x00, 0x00]));
        let topo = parse_control_extra(&extra).unwrap();
        assert_eq!(topo.units().len(), 1);
    }

    #[test]
    fn formats_own_their_frames() {
        let intf = parse_streaming_extra(1, &streaming_fixture()).unwrap();

        assert_eq!(intf.id(), StreamingInterfaceId(1));
        assert_eq!(intf.endpoint_address(), Some(0x81));
        assert_eq!(intf.formats().len(), 2);

        let yuyv = intf.find_format(FrameFormat::Yuyv).unwrap();
        assert_eq!(yuyv.index(), FormatIndex(1));
        assert_eq!(yuyv.frames().len(), 1);
        let frame = yuyv.default_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (640, 480));
        assert_eq!(frame.default_frame_interval(), Duration::from_nanos(33_333_300));
        assert_eq!(frame.interval_for_fps(30), Some(Duration::from_nanos(33_333_300)));
        assert_eq!(frame.interval_for_fps(15), Some(Duration::from_nanos(66_666_600)));
        assert_eq!(frame.interval_for_fps(20), None);

        let mjpeg = intf.find_format(FrameFormat::Mjpeg).unwrap();
        assert_eq!(mjpeg.index(), FormatIndex(2));
        let frame = mjpeg.find_frame(1280, 720).unwrap();
        assert_eq!(frame.index(), FrameIndex(1));
        assert_eq!(frame.interval_for_fps(15), Some(Duration::from_nanos(66_666_600)));
        // 1_000_001..=1_111_111 holds no step of the range
        assert_eq!(frame.interval_for_fps(9), None);
        assert_eq!(frame.interval_for_fps(1), Some(Duration::from_nanos(533_332_800)));
        assert!(mjpeg.find_frame(640, 480).is_none());
    }

    /// A frame descriptor body (after the subtype) with discrete intervals.
    fn discrete_frame(default: u32, intervals: &[u32]) -> FrameDesc {
        let mut raw = vec![0x01, 0x00];
        raw.extend_from_slice(&320u16.to_le_bytes());
        raw.extend_from_slice(&240u16.to_le_bytes());
        raw.extend_from_slice(&[0; 12]);
        raw.extend_from_slice(&default.to_le_bytes());
        raw.push(intervals.len() as u8);
        for interval in intervals {
            raw.extend_from_slice(&interval.to_le_bytes());
        }
        parse_frame(&mut &raw[..]).unwrap()
    }

    #[test]
    fn default_frame_rate_selects_default_interval() {
        for &default in &[333_333, 333_334, 416_666, 1_333_333] {
            let frame = discrete_frame(default, &[default, 666_666]);
            let fps = crate::streaming_interface::fps_for_interval(frame.default_frame_interval());
            assert_eq!(
                frame.interval_for_fps(fps),
                Some(frame.default_frame_interval()),
                "default interval {}",
                default
            );
        }

        // 7.5 fps is requested as 7
        let frame = discrete_frame(333_333, &[333_333, 1_333_333]);
        assert_eq!(frame.interval_for_fps(7), Some(Duration::from_nanos(133_333_300)));
        assert_eq!(frame.interval_for_fps(8), None);
    }

    #[test]
    fn slow_frame_rates_match_with_zero_fps() {
        let frame = discrete_frame(20_000_000, &[20_000_000]);
        let fps = crate::streaming_interface::fps_for_interval(frame.default_frame_interval());
        assert_eq!(fps, 0);
        assert_eq!(frame.interval_for_fps(0), Some(Duration::from_secs(2)));
    }

    #[test]
    fn frames_of_unsupported_formats_are_dropped() {
        let mut extra = cs_desc(&[
            0x01, 0x01, 0x00, 0x00, 0x81, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00,
        ]);
        // frame-based format followed by one of its frames
        extra.extend(cs_desc(&[0x10, 0x01, 0x01]));
        extra.extend(cs_desc(&[0x11, 0x01, 0x00]));
        let intf = parse_streaming_extra(1, &extra).unwrap();
        assert!(intf.formats().is_empty());
    }

    #[test]
    fn frame_without_format_is_an_error() {
        let mut extra = cs_desc(&[
            0x01, 0x01, 0x00, 0x00, 0x81, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00,
        ]);
        let mut frame = vec![0x05, 0x01, 0x00];
        frame.extend_from_slice(&[0; 20]);
        frame.push(1);
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        extra.extend(cs_desc(&frame));
        assert!(parse_streaming_extra(1, &extra).is_err());
    }
}
