use std::time::Duration;

use crate::{
    control::{ControlValue, ProbeCommitControls, ProbeHint},
    error::{err, Action},
    format::FrameFormat,
    stream::StreamSession,
    topo::{EndpointTransfer, FormatIndex, FrameIndex, StreamingInterfaceDesc, StreamingInterfaceId},
    util::{from_100ns, to_100ns, INTERVALS_PER_SEC},
    Request, Result, UvcDevice,
};

/// Stream parameters requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub format: FrameFormat,
    pub width: u16,
    pub height: u16,
    pub fps: u32,
}

/// Stream parameters agreed on with the device through `PROBE`, ready to be committed.
#[derive(Debug, Clone, Copy)]
pub struct StreamCtrl {
    pub(crate) controls: ProbeCommitControls,
    pub(crate) format: FrameFormat,
    pub(crate) width: u16,
    pub(crate) height: u16,
}

impl StreamCtrl {
    /// The raw probe result returned by the device.
    pub fn controls(&self) -> &ProbeCommitControls {
        &self.controls
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn frame_interval(&self) -> Duration {
        from_100ns(u64::from(self.controls.dwFrameInterval))
    }

    pub fn max_video_frame_size(&self) -> u32 {
        self.controls.dwMaxVideoFrameSize
    }

    pub fn max_payload_transfer_size(&self) -> u32 {
        self.controls.dwMaxPayloadTransferSize
    }
}

pub struct StreamingInterface<'a> {
    device: &'a UvcDevice,
    desc: &'a StreamingInterfaceDesc,
}

impl<'a> StreamingInterface<'a> {
    pub(crate) fn new(device: &'a UvcDevice, id: StreamingInterfaceId) -> Result<Self> {
        match device.streaming_interfaces().iter().find(|i| i.id() == id) {
            Some(desc) => Ok(Self { device, desc }),
            None => err(
                format!("no streaming interface with ID {:?}", id),
                Action::StreamNegotiation,
            ),
        }
    }

    pub fn desc(&self) -> &'a StreamingInterfaceDesc {
        self.desc
    }

    /// Parameters for the first format's default frame size at its default frame rate.
    pub fn default_params(&self) -> Result<StreamParams> {
        let format = match self.desc.formats().first() {
            Some(format) => format,
            None => return err("interface lists no formats", Action::StreamNegotiation),
        };
        let frame = match format.default_frame() {
            Some(frame) => frame,
            None => return err("format lists no frames", Action::StreamNegotiation),
        };

        Ok(StreamParams {
            format: format.frame_format(),
            width: frame.width(),
            height: frame.height(),
            fps: fps_for_interval(frame.default_frame_interval()),
        })
    }

    /// Negotiates `params` with the device using the `PROBE` control.
    ///
    /// Fails if the interface has no matching format, frame size, or frame interval.
    pub fn negotiate(&mut self, params: &StreamParams) -> Result<StreamCtrl> {
        let desc = self.desc;
        let format = match desc.find_format(params.format) {
            Some(format) => format,
            None => {
                return err(
                    format!("format {} not supported by the device", params.format),
                    Action::StreamNegotiation,
                )
            }
        };
        let frame = match format.find_frame(params.width, params.height) {
            Some(frame) => frame,
            None => {
                return err(
                    format!(
                        "frame size {}x{} not supported for {}",
                        params.width, params.height, params.format
                    ),
                    Action::StreamNegotiation,
                )
            }
        };
        let interval = match frame.interval_for_fps(params.fps) {
            Some(interval) => interval,
            None => {
                return err(
                    format!(
                        "{} fps not supported for {} {}x{}",
                        params.fps, params.format, params.width, params.height
                    ),
                    Action::StreamNegotiation,
                )
            }
        };
        let interval_100ns = to_100ns(interval) as u32;

        let controls = self.probe(format.index(), frame.index(), interval_100ns)?;

        Ok(StreamCtrl {
            controls,
            format: params.format,
            width: params.width,
            height: params.height,
        })
    }

    fn probe(
        &mut self,
        format_index: FormatIndex,
        frame_index: FrameIndex,
        interval_100ns: u32,
    ) -> Result<ProbeCommitControls> {
        let controls = ProbeCommitControls {
            bmHint: ProbeHint::FIX_FRAME_INTERVAL,
            bFormatIndex: format_index.0,
            bFrameIndex: frame_index.0,
            dwFrameInterval: interval_100ns,
            ..Default::default()
        };
        log::debug!("negotiating parameters: {:?}", controls);
        self.set_control::<Probe>(controls)?;
        let controls = self.read_control::<Probe>()?;
        log::debug!("final parameters: {:?}", controls);

        let (format, frame) = (controls.bFormatIndex, controls.bFrameIndex);
        if format != format_index.0 || frame != frame_index.0 {
            return err(
                format!(
                    "device changed format/frame to {}/{} during negotiation",
                    format, frame
                ),
                Action::StreamNegotiation,
            );
        }

        Ok(controls)
    }

    /// Commits the negotiated parameters and opens a stream session.
    ///
    /// Only bulk streaming endpoints are supported.
    pub fn open_stream(&mut self, ctrl: StreamCtrl) -> Result<StreamSession<'a>> {
        let ep = match self.desc.endpoint_address() {
            Some(ep) => ep,
            None => {
                return err(
                    "output streaming interfaces are not supported",
                    Action::StartingStream,
                )
            }
        };
        match self.desc.endpoint_transfer() {
            EndpointTransfer::Bulk => {}
            EndpointTransfer::Isochronous => {
                return err(
                    "isochronous streaming endpoints are not supported",
                    Action::StartingStream,
                )
            }
            EndpointTransfer::Unknown => {
                log::warn!(
                    "transfer type of endpoint {:#04x} unknown, assuming bulk",
                    ep
                );
            }
        }

        self.set_control::<Commit>(ctrl.controls)?;
        log::debug!("committed stream parameters: {:?}", ctrl);

        Ok(StreamSession::new(self.device, self.desc.id(), ep, ctrl))
    }

    pub fn read_control<C: StreamingControl>(&self) -> Result<C::Value> {
        self.read_control_with(C::ID, Request::GetCur)
    }

    pub fn read_control_min<C: StreamingControl>(&self) -> Result<C::Value> {
        self.read_control_with(C::ID, Request::GetMin)
    }

    pub fn read_control_max<C: StreamingControl>(&self) -> Result<C::Value> {
        self.read_control_with(C::ID, Request::GetMax)
    }

    pub fn set_control<C: StreamingControl>(&mut self, value: C::Value) -> Result<()> {
        let mut buf = <<C::Value as ControlValue>::Buf>::default();
        value.encode(buf.as_mut());
        self.device
            .set_interface_entity(self.desc.id().0, 0, C::ID as _, buf.as_mut())
    }

    fn read_control_with<V: ControlValue>(&self, control: ControlId, req: Request) -> Result<V> {
        let mut buf = V::Buf::default();
        self.device
            .read_interface_entity(self.desc.id().0, 0, req, control as _, buf.as_mut())?;
        Ok(V::decode(buf.as_mut()))
    }
}

/// Frame rate of `interval`, rounded down the way `FrameDesc::interval_for_fps` matches it.
pub(crate) fn fps_for_interval(interval: Duration) -> u32 {
    match to_100ns(interval) {
        0 => INTERVALS_PER_SEC as u32,
        units => (INTERVALS_PER_SEC / units) as u32,
    }
}

/// Controls associated with Video Streaming Interfaces.
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum ControlId {
    Undefined = 0x00,
    Probe = 0x01,
    Commit = 0x02,
    StillProbe = 0x03,
    StillCommit = 0x04,
    StillImageTrigger = 0x05,
    StreamErrorCode = 0x06,
    GenerateKeyFrame = 0x07,
    UpdateFrameSegment = 0x08,
    SynchDelay = 0x09,
}

pub trait StreamingControl {
    type Value: ControlValue;
    const ID: ControlId;
}

pub struct Probe;
impl StreamingControl for Probe {
    type Value = ProbeCommitControls;
    const ID: ControlId = ControlId::Probe;
}

pub struct Commit;
impl StreamingControl for Commit {
    type Value = ProbeCommitControls;
    const ID: ControlId = ControlId::Commit;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_is_rounded_down() {
        assert_eq!(fps_for_interval(Duration::from_nanos(33_333_300)), 30);
        assert_eq!(fps_for_interval(Duration::from_millis(40)), 25);
        assert_eq!(fps_for_interval(Duration::from_nanos(133_333_300)), 7);
        assert_eq!(fps_for_interval(Duration::ZERO), 10_000_000);
    }

    #[test]
    fn ctrl_reports_negotiated_values() {
        let ctrl = StreamCtrl {
            controls: ProbeCommitControls {
                dwFrameInterval: 666_666,
                dwMaxVideoFrameSize: 614_400,
                dwMaxPayloadTransferSize: 16_384,
                ..Default::default()
            },
            format: FrameFormat::Yuyv,
            width: 640,
            height: 480,
        };
        assert_eq!(ctrl.frame_interval(), Duration::from_nanos(66_666_600));
        assert_eq!(ctrl.max_video_frame_size(), 614_400);
        assert_eq!(ctrl.max_payload_transfer_size(), 16_384);
    }
}
