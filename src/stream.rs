//! Stream sessions and the bulk payload reader.
//!
//! A [`StreamSession`] is created by [`StreamingInterface::open_stream`] after `COMMIT`. Starting
//! it spawns a worker thread that reads payload transfers from the streaming endpoint, reassembles
//! them into [`Frame`]s, and sends those through a bounded channel.
//!
//! [`StreamingInterface::open_stream`]: crate::streaming_interface::StreamingInterface::open_stream

use std::{
    fmt, mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use bitflags::bitflags;
use byteorder::{ReadBytesExt, LE};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use rusb::{Context, DeviceHandle};

use crate::{
    error::{err, Action, Error, ResultExt},
    format::FrameFormat,
    frame::Frame,
    streaming_interface::StreamCtrl,
    topo::StreamingInterfaceId,
    Result, UvcDevice,
};

/// Number of complete frames buffered between the worker and the consumer.
pub const FRAME_QUEUE_LEN: usize = 4;

/// How long a single bulk read may block before the worker re-checks whether it should stop.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Used when the device reports a `dwMaxPayloadTransferSize` of 0.
const FALLBACK_TRANSFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Parameters are committed, no data is flowing yet.
    Opened,
    /// The worker is reading from the streaming endpoint.
    Streaming,
    /// The worker has been joined. A stopped session cannot be restarted.
    Stopped,
    Closed,
}

/// A committed video stream on one streaming interface.
///
/// The session borrows the [`UvcDevice`], so it has to be closed (or dropped) before the device
/// can be closed. Dropping a session that is still streaming stops it.
pub struct StreamSession<'a> {
    device: &'a UvcDevice,
    interface: StreamingInterfaceId,
    endpoint: u8,
    ctrl: StreamCtrl,
    state: SessionState,
    worker: Option<WorkerHandle>,
    stream_error: Option<Error>,
}

impl<'a> StreamSession<'a> {
    pub(crate) fn new(
        device: &'a UvcDevice,
        interface: StreamingInterfaceId,
        endpoint: u8,
        ctrl: StreamCtrl,
    ) -> Self {
        Self {
            device,
            interface,
            endpoint,
            ctrl,
            state: SessionState::Opened,
            worker: None,
            stream_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The USB error that ended the stream on its own (eg. because the device was unplugged).
    ///
    /// Set once the session is stopped.
    pub fn stream_error(&self) -> Option<&Error> {
        self.stream_error.as_ref()
    }

    /// The stream parameters this session was committed with.
    pub fn ctrl(&self) -> &StreamCtrl {
        &self.ctrl
    }

    /// Starts reading from the device.
    ///
    /// Returns the receiving end of the frame channel. The channel disconnects when the session is
    /// stopped or when the device stops delivering data because of a USB error.
    pub fn start(&mut self) -> Result<Receiver<Frame>> {
        if self.state != SessionState::Opened {
            return err(
                format!("cannot start a stream session in state {:?}", self.state),
                Action::StartingStream,
            );
        }

        let (sender, receiver) = channel::bounded(FRAME_QUEUE_LEN);
        let running = Arc::new(AtomicBool::new(true));
        let transfer_size = match self.ctrl.max_payload_transfer_size() as usize {
            0 => FALLBACK_TRANSFER_SIZE,
            n => n,
        };
        let worker = Worker {
            usb: self.device.usb_handle(),
            endpoint: self.endpoint,
            transfer_size,
            running: running.clone(),
            sender,
            assembler: FrameAssembler::new(&self.ctrl),
            stats: WorkerStats::default(),
        };

        let thread = thread::Builder::new()
            .name(format!("uvc-stream-{}", self.interface.0))
            .spawn(move || worker.run())
            .during(Action::StartingStream)?;

        log::debug!(
            "started stream on interface {:?}, endpoint {:#04x}, {} byte transfers",
            self.interface,
            self.endpoint,
            transfer_size
        );
        self.worker = Some(WorkerHandle { running, thread });
        self.state = SessionState::Streaming;
        Ok(receiver)
    }

    /// Stops the worker and resets the streaming endpoint.
    ///
    /// Stopping a session that was never started, or that is already stopped, does nothing. If the
    /// stream already ended because of a USB error, the endpoint is left alone and the error is
    /// kept in [`StreamSession::stream_error`] instead of being returned.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            SessionState::Streaming => {}
            SessionState::Opened => {
                self.state = SessionState::Stopped;
                return Ok(());
            }
            SessionState::Stopped | SessionState::Closed => return Ok(()),
        }
        self.state = SessionState::Stopped;

        let stream_error = match self.worker.take() {
            Some(worker) => worker.join()?,
            None => None,
        };
        if let Some(e) = stream_error {
            log::warn!("{}", e);
            self.stream_error = Some(e);
            return Ok(());
        }

        halt_cleared(self.device.usb_handle().clear_halt(self.endpoint))
    }

    /// Ends the session, stopping it first if it is still streaming.
    pub fn close(mut self) -> Result<()> {
        let result = self.stop();
        self.state = SessionState::Closed;
        log::debug!("closed stream on interface {:?}", self.interface);
        result
    }
}

/// Bulk streams are stopped by a `CLEAR_FEATURE(ENDPOINT_HALT)` on the streaming endpoint. A device
/// that is already gone has nothing left to stop.
fn halt_cleared(res: rusb::Result<()>) -> Result<()> {
    match res {
        Err(rusb::Error::NoDevice) => {
            log::debug!("device gone, not clearing endpoint halt");
            Ok(())
        }
        res => res.during(Action::StoppingStream),
    }
}

impl Drop for StreamSession<'_> {
    fn drop(&mut self) {
        if self.state == SessionState::Streaming {
            if let Err(e) = self.stop() {
                log::warn!("{}", e);
            }
        }
    }
}

impl fmt::Debug for StreamSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("interface", &self.interface)
            .field("endpoint", &format_args!("{:#04x}", self.endpoint))
            .field("state", &self.state)
            .field("ctrl", &self.ctrl)
            .finish()
    }
}

struct WorkerHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<WorkerExit>,
}

impl WorkerHandle {
    /// Signals the worker to stop and waits for it.
    ///
    /// Returns the error that made the worker quit by itself, if any.
    fn join(self) -> Result<Option<Error>> {
        self.running.store(false, Ordering::Release);
        match self.thread.join() {
            Ok(exit) => {
                log::debug!("stream worker finished: {:?}", exit.stats);
                Ok(exit
                    .error
                    .map(|e| Error::with_action(e, Action::StreamRead)))
            }
            Err(_) => err("stream worker panicked", Action::StoppingStream),
        }
    }
}

struct WorkerExit {
    stats: WorkerStats,
    error: Option<rusb::Error>,
}

#[derive(Debug, Default)]
struct WorkerStats {
    transfers: u64,
    frames_sent: u64,
    frames_dropped: u64,
}

struct Worker {
    usb: Arc<DeviceHandle<Context>>,
    endpoint: u8,
    transfer_size: usize,
    running: Arc<AtomicBool>,
    sender: Sender<Frame>,
    assembler: FrameAssembler,
    stats: WorkerStats,
}

impl Worker {
    fn run(mut self) -> WorkerExit {
        let mut buf = vec![0; self.transfer_size];
        while self.running.load(Ordering::Acquire) {
            let len = match self.usb.read_bulk(self.endpoint, &mut buf, READ_TIMEOUT) {
                Ok(len) => len,
                Err(rusb::Error::Timeout) => continue,
                Err(rusb::Error::Overflow) => {
                    log::warn!("stream transfer overflowed {} byte buffer", buf.len());
                    continue;
                }
                Err(e) => {
                    log::debug!("stream read failed, stopping stream worker: {}", e);
                    return self.exit(Some(e));
                }
            };
            self.stats.transfers += 1;

            let mut frames = Vec::new();
            self.assembler
                .push(&buf[..len], SystemTime::now(), |frame| frames.push(frame));
            for frame in frames {
                if !self.send(frame) {
                    return self.exit(None);
                }
            }
        }

        self.exit(None)
    }

    fn exit(self, error: Option<rusb::Error>) -> WorkerExit {
        WorkerExit {
            stats: self.stats,
            error,
        }
    }

    /// Returns `false` once the receiver is gone.
    fn send(&mut self, frame: Frame) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                true
            }
            Err(TrySendError::Full(frame)) => {
                self.stats.frames_dropped += 1;
                log::debug!(
                    "frame queue full, dropping frame {} ({} dropped so far)",
                    frame.sequence(),
                    self.stats.frames_dropped
                );
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("frame receiver gone, stopping stream worker");
                false
            }
        }
    }
}

bitflags! {
    /// `bmHeaderInfo` of a payload header (UVC 1.5, 2.4.3.3).
    pub struct HeaderInfo: u8 {
        /// Frame ID, toggles at every frame boundary.
        const FID = 1 << 0;
        /// End of frame.
        const EOF = 1 << 1;
        const PTS = 1 << 2;
        const SCR = 1 << 3;
        const RES = 1 << 4;
        /// Still image.
        const STI = 1 << 5;
        /// Error in the device's stream, the current frame is unusable.
        const ERR = 1 << 6;
        /// End of header.
        const EOH = 1 << 7;
    }
}

/// The header preceding every payload transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub info: HeaderInfo,
    /// Presentation time stamp, in device clock ticks.
    pub pts: Option<u32>,
    /// Source clock reference: source time clock and 1 KHz SOF token counter.
    pub scr: Option<(u32, u16)>,
}

impl PayloadHeader {
    /// Splits a payload transfer into its header and the video data following it.
    ///
    /// Returns `None` if the header is malformed.
    pub fn parse(packet: &[u8]) -> Option<(Self, &[u8])> {
        let header_len = usize::from(*packet.first()?);
        if header_len < 2 || header_len > packet.len() {
            return None;
        }

        let info = HeaderInfo::from_bits_truncate(packet[1]);
        let mut fields = &packet[2..header_len];
        let pts = if info.contains(HeaderInfo::PTS) {
            Some(fields.read_u32::<LE>().ok()?)
        } else {
            None
        };
        let scr = if info.contains(HeaderInfo::SCR) {
            let stc = fields.read_u32::<LE>().ok()?;
            let sof = fields.read_u16::<LE>().ok()?;
            Some((stc, sof & 0x07ff))
        } else {
            None
        };

        Some((Self { info, pts, scr }, &packet[header_len..]))
    }
}

/// Reassembles frames from a sequence of payload transfers.
///
/// A frame ends when a payload has the `EOF` bit set, or when the `FID` bit toggles. Frames that
/// contained a payload with `ERR` set, or that grow beyond the negotiated maximum frame size, are
/// discarded.
pub(crate) struct FrameAssembler {
    format: FrameFormat,
    width: u16,
    height: u16,
    max_frame_size: usize,
    buf: Vec<u8>,
    fid: Option<bool>,
    corrupt: bool,
    next_sequence: u32,
}

impl FrameAssembler {
    pub(crate) fn new(ctrl: &StreamCtrl) -> Self {
        let max_frame_size = match ctrl.max_video_frame_size() as usize {
            0 => usize::MAX,
            n => n,
        };
        Self {
            format: ctrl.format(),
            width: ctrl.width(),
            height: ctrl.height(),
            max_frame_size,
            buf: Vec::new(),
            fid: None,
            corrupt: false,
            next_sequence: 1,
        }
    }

    /// Feeds one payload transfer received at `now`, calling `emit` for every completed frame.
    pub(crate) fn push(&mut self, packet: &[u8], now: SystemTime, mut emit: impl FnMut(Frame)) {
        let (header, data) = match PayloadHeader::parse(packet) {
            Some(parsed) => parsed,
            None => {
                if !packet.is_empty() {
                    log::trace!("skipping payload with malformed header: {:02x?}", &packet[..2.min(packet.len())]);
                }
                return;
            }
        };

        let fid = header.info.contains(HeaderInfo::FID);
        if self.fid.map_or(false, |prev| prev != fid) {
            self.finish(now, &mut emit);
        }
        self.fid = Some(fid);

        if header.info.contains(HeaderInfo::ERR) {
            self.corrupt = true;
        }
        if self.buf.len() + data.len() > self.max_frame_size {
            if !self.corrupt {
                log::debug!(
                    "frame exceeds {} bytes, discarding it",
                    self.max_frame_size
                );
            }
            self.corrupt = true;
        } else {
            self.buf.extend_from_slice(data);
        }

        if header.info.contains(HeaderInfo::EOF) {
            self.finish(now, &mut emit);
        }
    }

    fn finish(&mut self, now: SystemTime, emit: &mut impl FnMut(Frame)) {
        let corrupt = mem::replace(&mut self.corrupt, false);
        if corrupt {
            log::debug!("discarding frame with {} bytes due to stream error", self.buf.len());
            self.buf.clear();
            return;
        }
        if self.buf.is_empty() {
            return;
        }

        let capacity = self.buf.capacity();
        let data = mem::replace(&mut self.buf, Vec::with_capacity(capacity));
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        emit(Frame::new(
            sequence,
            self.width,
            self.height,
            self.format,
            now,
            data,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ProbeCommitControls;

    fn ctrl(max_frame_size: u32) -> StreamCtrl {
        StreamCtrl {
            controls: ProbeCommitControls {
                dwMaxVideoFrameSize: max_frame_size,
                ..Default::default()
            },
            format: FrameFormat::Yuyv,
            width: 4,
            height: 2,
        }
    }

    fn packet(info: HeaderInfo, data: &[u8]) -> Vec<u8> {
        let mut p = vec![2, (info | HeaderInfo::EOH).bits()];
        p.extend_from_slice(data);
        p
    }

    fn feed(asm: &mut FrameAssembler, packets: &[Vec<u8>]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for p in packets {
            asm.push(p, SystemTime::UNIX_EPOCH, |f| frames.push(f));
        }
        frames
    }

    #[test]
    fn parses_header_with_timestamps() {
        let packet = [
            12, 0x8f, // EOH | SCR | PTS | EOF | FID
            0x78, 0x56, 0x34, 0x12, // PTS
            0x01, 0x00, 0x00, 0x00, 0xff, 0xff, // SCR
            0xaa, 0xbb,
        ];
        let (header, data) = PayloadHeader::parse(&packet).unwrap();
        assert!(header.info.contains(HeaderInfo::FID | HeaderInfo::EOF));
        assert_eq!(header.pts, Some(0x1234_5678));
        assert_eq!(header.scr, Some((1, 0x07ff)));
        assert_eq!(data, &[0xaa, 0xbb]);
    }

    #[test]
    fn rejects_malformed_headers() {
        assert!(PayloadHeader::parse(&[]).is_none());
        assert!(PayloadHeader::parse(&[1, 0x80]).is_none());
        assert!(PayloadHeader::parse(&[8, 0x80, 0]).is_none());
        // PTS flagged, but no room for it
        assert!(PayloadHeader::parse(&[2, 0x84, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn frames_end_at_eof() {
        let mut asm = FrameAssembler::new(&ctrl(0));
        let frames = feed(
            &mut asm,
            &[
                packet(HeaderInfo::empty(), &[1, 2, 3]),
                packet(HeaderInfo::EOF, &[4, 5]),
                packet(HeaderInfo::FID, &[6]),
                packet(HeaderInfo::FID | HeaderInfo::EOF, &[7, 8]),
            ],
        );

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].sequence(), 1);
        assert_eq!(frames[0].data(), &[1, 2, 3, 4, 5]);
        assert_eq!(frames[1].sequence(), 2);
        assert_eq!(frames[1].data(), &[6, 7, 8]);
        assert_eq!(frames[1].format(), FrameFormat::Yuyv);
        assert_eq!((frames[1].width(), frames[1].height()), (4, 2));
    }

    #[test]
    fn fid_toggle_ends_frame_without_eof() {
        let mut asm = FrameAssembler::new(&ctrl(0));
        let frames = feed(
            &mut asm,
            &[
                packet(HeaderInfo::empty(), &[1, 2]),
                packet(HeaderInfo::empty(), &[3]),
                packet(HeaderInfo::FID, &[4]),
                packet(HeaderInfo::empty(), &[5]),
            ],
        );

        let data: Vec<_> = frames.iter().map(|f| f.data().to_vec()).collect();
        assert_eq!(data, vec![vec![1, 2, 3], vec![4]]);
    }

    #[test]
    fn errored_frames_are_discarded() {
        let mut asm = FrameAssembler::new(&ctrl(0));
        let frames = feed(
            &mut asm,
            &[
                packet(HeaderInfo::empty(), &[1]),
                packet(HeaderInfo::ERR, &[2]),
                packet(HeaderInfo::EOF, &[3]),
                packet(HeaderInfo::FID | HeaderInfo::EOF, &[9]),
            ],
        );

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data(), &[9]);
        // discarded frames don't use up sequence numbers
        assert_eq!(frames[0].sequence(), 1);
    }

    #[test]
    fn oversized_frames_are_discarded() {
        let mut asm = FrameAssembler::new(&ctrl(4));
        let frames = feed(
            &mut asm,
            &[
                packet(HeaderInfo::empty(), &[1, 2, 3]),
                packet(HeaderInfo::EOF, &[4, 5]),
                packet(HeaderInfo::FID | HeaderInfo::EOF, &[1, 2, 3, 4]),
            ],
        );

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn header_only_payloads_emit_nothing() {
        let mut asm = FrameAssembler::new(&ctrl(0));
        let frames = feed(
            &mut asm,
            &[
                packet(HeaderInfo::EOF, &[]),
                packet(HeaderInfo::FID, &[]),
                vec![0xff],
            ],
        );
        assert!(frames.is_empty());
    }

    fn worker(exit: impl FnOnce(&AtomicBool) -> Option<rusb::Error> + Send + 'static) -> WorkerHandle {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread = thread::spawn(move || WorkerExit {
            stats: WorkerStats::default(),
            error: exit(&flag),
        });
        WorkerHandle { running, thread }
    }

    #[test]
    fn worker_read_error_is_reported_on_join() {
        let handle = worker(|_| Some(rusb::Error::NoDevice));
        let error = handle.join().unwrap().expect("worker error not reported");
        assert!(!error.is_usb_timeout());
        assert!(
            error.to_string().contains("reading from the video stream"),
            "{}",
            error
        );
    }

    #[test]
    fn stopped_worker_reports_no_error() {
        let handle = worker(|running| {
            while running.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            None
        });
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn clearing_halt_on_unplugged_device_succeeds() {
        assert!(halt_cleared(Ok(())).is_ok());
        assert!(halt_cleared(Err(rusb::Error::NoDevice)).is_ok());

        let error = halt_cleared(Err(rusb::Error::Pipe)).unwrap_err();
        assert!(error.to_string().contains("stopping the video stream"), "{}", error);
    }
}
