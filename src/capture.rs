//! Timed frame capture.
//!
//! [`run_capture_loop`] waits on two things at once: the next frame from a stream, and a deadline
//! that fires once after the configured duration. Every frame received before the deadline is
//! handed to a [`FrameSink`]. [`capture`] wraps the loop with starting, stopping and closing a
//! stream session.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use crossbeam::{
    channel::{self, Receiver},
    select,
};

use crate::{
    error::{Action, ResultExt},
    frame::Frame,
    stream::StreamSession,
    Result,
};

/// Destination for captured frames.
pub trait FrameSink {
    /// Stores one frame. An error aborts the capture.
    fn persist(&mut self, frame: &Frame) -> io::Result<()>;
}

impl<F: FnMut(&Frame) -> io::Result<()>> FrameSink for F {
    fn persist(&mut self, frame: &Frame) -> io::Result<()> {
        self(frame)
    }
}

/// Writes each frame to its own file, `frame{sequence}.{ext}`, in a directory.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Creates a sink writing into `dir`, creating the directory if it doesn't exist.
    pub fn create(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, frame: &Frame) -> PathBuf {
        self.dir.join(format!(
            "frame{}.{}",
            frame.sequence(),
            frame.format().file_extension()
        ))
    }
}

impl FrameSink for FileSink {
    fn persist(&mut self, frame: &Frame) -> io::Result<()> {
        let path = self.path_for(frame);
        let mut file = File::create(&path)?;
        file.write_all(frame.data())?;
        log::trace!("wrote {} bytes to {}", frame.data().len(), path.display());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// How long to capture frames for.
    pub duration: Duration,
    /// Where a [`FileSink`] should put the frames.
    pub output_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
            output_dir: PathBuf::from("."),
        }
    }
}

/// Why a capture ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEnd {
    /// The capture duration elapsed.
    Deadline,
    /// The stream stopped delivering frames before the deadline (eg. the device was unplugged).
    SourceClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureReport {
    /// Number of frames persisted.
    pub frames: u64,
    pub end: CaptureEnd,
    pub elapsed: Duration,
}

/// Persists frames from `frames` until `duration` has passed or the channel disconnects.
///
/// Frames are handled one at a time, in the order they were sent. A frame that is received after
/// the deadline has passed is not persisted. The first persistence failure ends the loop with an
/// error.
pub fn run_capture_loop<S: FrameSink + ?Sized>(
    frames: &Receiver<Frame>,
    duration: Duration,
    sink: &mut S,
) -> Result<CaptureReport> {
    let start = Instant::now();
    let deadline = channel::after(duration);
    let mut count = 0;

    let end = loop {
        select! {
            recv(frames) -> msg => match msg {
                Ok(frame) => {
                    if start.elapsed() >= duration {
                        log::debug!("frame {} arrived after the deadline", frame.sequence());
                        break CaptureEnd::Deadline;
                    }

                    log::info!(
                        "frame {}: {}x{} {}, captured at {:?}",
                        frame.sequence(),
                        frame.width(),
                        frame.height(),
                        frame.format(),
                        frame.capture_time(),
                    );
                    sink.persist(&frame).during(Action::PersistingFrame)?;
                    count += 1;
                }
                Err(_) => {
                    log::warn!("frame source closed before the deadline");
                    break CaptureEnd::SourceClosed;
                }
            },
            recv(deadline) -> _ => break CaptureEnd::Deadline,
        }
    };

    let report = CaptureReport {
        frames: count,
        end,
        elapsed: start.elapsed(),
    };
    log::info!(
        "captured {} frames in {:?} ({:?})",
        report.frames,
        report.elapsed,
        report.end
    );
    Ok(report)
}

/// A source of frames that can be started once, then stopped and closed.
pub trait FrameSession {
    fn start(&mut self) -> Result<Receiver<Frame>>;
    fn stop(&mut self) -> Result<()>;
    fn close(self) -> Result<()>;
}

impl FrameSession for StreamSession<'_> {
    fn start(&mut self) -> Result<Receiver<Frame>> {
        StreamSession::start(self)
    }

    fn stop(&mut self) -> Result<()> {
        StreamSession::stop(self)
    }

    fn close(self) -> Result<()> {
        StreamSession::close(self)
    }
}

/// Starts `session`, captures frames into `sink` for `config.duration`, then stops and closes the
/// session.
///
/// The session is stopped and closed no matter how the capture ended. If capturing failed, that
/// error is returned and errors during cleanup are only logged.
pub fn capture<S, K>(mut session: S, config: &CaptureConfig, sink: &mut K) -> Result<CaptureReport>
where
    S: FrameSession,
    K: FrameSink + ?Sized,
{
    let mut result = session
        .start()
        .and_then(|frames| run_capture_loop(&frames, config.duration, sink));

    let stopped = session.stop();
    let closed = session.close();
    for cleanup in [stopped, closed] {
        if let Err(e) = cleanup {
            if result.is_ok() {
                result = Err(e);
            } else {
                log::warn!("{}", e);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc, thread, time::SystemTime};

    use crossbeam::channel::{bounded, unbounded, Sender};

    use super::*;
    use crate::{error::err, format::FrameFormat};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Start,
        Stop,
        Close,
        DeviceClose,
    }

    type Events = Rc<RefCell<Vec<Event>>>;

    struct MockSession {
        events: Events,
        frames: Option<Receiver<Frame>>,
        fail_stop: bool,
        fail_close: bool,
    }

    impl FrameSession for MockSession {
        fn start(&mut self) -> Result<Receiver<Frame>> {
            self.events.borrow_mut().push(Event::Start);
            match self.frames.take() {
                Some(frames) => Ok(frames),
                None => err("stream already started", Action::StartingStream),
            }
        }

        fn stop(&mut self) -> Result<()> {
            self.events.borrow_mut().push(Event::Stop);
            if self.fail_stop {
                return err("endpoint stalled", Action::StoppingStream);
            }
            Ok(())
        }

        fn close(self) -> Result<()> {
            self.events.borrow_mut().push(Event::Close);
            if self.fail_close {
                return err("interface busy", Action::ClosingDevice);
            }
            Ok(())
        }
    }

    /// Stands in for the opened device, which outlives the session.
    struct MockDevice {
        events: Events,
    }

    impl MockDevice {
        fn session(&self, frames: Receiver<Frame>) -> MockSession {
            MockSession {
                events: self.events.clone(),
                frames: Some(frames),
                fail_stop: false,
                fail_close: false,
            }
        }

        fn close(self) {
            self.events.borrow_mut().push(Event::DeviceClose);
        }
    }

    fn device() -> (MockDevice, Events) {
        let events = Events::default();
        (
            MockDevice {
                events: events.clone(),
            },
            events,
        )
    }

    fn frame(sequence: u32, data: &[u8]) -> Frame {
        Frame::new(
            sequence,
            2,
            2,
            FrameFormat::Gray8,
            SystemTime::now(),
            data.to_vec(),
        )
    }

    fn config(dir: &Path, duration: Duration) -> CaptureConfig {
        CaptureConfig {
            duration,
            output_dir: dir.to_path_buf(),
        }
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    #[test]
    fn deadline_ends_capture_without_frames() {
        let dir = tempfile::tempdir().unwrap();
        let (dev, events) = device();
        let (_tx, rx) = unbounded::<Frame>();
        let mut sink = FileSink::create(dir.path()).unwrap();

        let duration = Duration::from_millis(50);
        let report = capture(dev.session(rx), &config(dir.path(), duration), &mut sink).unwrap();
        dev.close();

        assert_eq!(report.end, CaptureEnd::Deadline);
        assert_eq!(report.frames, 0);
        assert!(report.elapsed >= duration);
        assert!(report.elapsed < duration + Duration::from_secs(1));
        assert!(file_names(dir.path()).is_empty());
        assert_eq!(
            *events.borrow(),
            [Event::Start, Event::Stop, Event::Close, Event::DeviceClose]
        );
    }

    #[test]
    fn every_frame_gets_its_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let (dev, _events) = device();
        let (tx, rx) = unbounded();
        let payloads: [&[u8]; 3] = [&[1, 2, 3, 4], &[], &[0xff; 300]];
        for (i, payload) in payloads.iter().enumerate() {
            tx.send(frame(i as u32 + 1, payload)).unwrap();
        }

        let mut sink = FileSink::create(dir.path()).unwrap();
        let report = capture(
            dev.session(rx),
            &config(dir.path(), Duration::from_millis(200)),
            &mut sink,
        )
        .unwrap();

        assert_eq!(report.frames, 3);
        assert_eq!(report.end, CaptureEnd::Deadline);
        assert_eq!(
            file_names(dir.path()),
            ["frame1.raw", "frame2.raw", "frame3.raw"]
        );
        for (i, payload) in payloads.iter().enumerate() {
            let written = fs::read(dir.path().join(format!("frame{}.raw", i + 1))).unwrap();
            assert_eq!(&written[..], *payload);
        }
        drop(tx);
    }

    #[test]
    fn persistence_failure_is_fatal_and_still_cleans_up() {
        let (dev, events) = device();
        let (tx, rx) = unbounded();
        for seq in 1..=3 {
            tx.send(frame(seq, &[seq as u8])).unwrap();
        }

        let mut persisted = Vec::new();
        let mut sink = |frame: &Frame| {
            persisted.push(frame.sequence());
            if frame.sequence() == 2 {
                Err(io::Error::new(io::ErrorKind::Other, "disk full"))
            } else {
                Ok(())
            }
        };
        let e = capture(
            dev.session(rx),
            &CaptureConfig {
                duration: Duration::from_secs(5),
                ..Default::default()
            },
            &mut sink,
        )
        .unwrap_err();
        dev.close();

        assert!(e.is_persistence_failure());
        assert_eq!(e.io_error().map(|e| e.kind()), Some(io::ErrorKind::Other));
        assert_eq!(persisted, [1, 2]);
        // the third frame was never taken from the channel
        assert_eq!(tx.len(), 1);
        assert_eq!(
            *events.borrow(),
            [Event::Start, Event::Stop, Event::Close, Event::DeviceClose]
        );
    }

    #[test]
    fn frames_after_the_deadline_are_ignored() {
        let (tx, rx) = bounded(1);
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            tx.send(frame(1, &[1])).ok();
            tx
        });

        let mut persisted = 0;
        let mut sink = |_: &Frame| -> io::Result<()> {
            persisted += 1;
            Ok(())
        };
        let report = run_capture_loop(&rx, Duration::from_millis(50), &mut sink).unwrap();
        assert_eq!(report.end, CaptureEnd::Deadline);
        assert_eq!(report.frames, 0);

        let tx: Sender<Frame> = sender.join().unwrap();
        drop(tx);
        assert_eq!(persisted, 0);
    }

    #[test]
    fn closed_source_ends_capture_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let (dev, events) = device();
        let (tx, rx) = unbounded();
        tx.send(frame(1, &[7, 7])).unwrap();
        drop(tx);

        let mut sink = FileSink::create(dir.path()).unwrap();
        let report = capture(
            dev.session(rx),
            &config(dir.path(), Duration::from_secs(10)),
            &mut sink,
        )
        .unwrap();
        dev.close();

        assert_eq!(report.end, CaptureEnd::SourceClosed);
        assert_eq!(report.frames, 1);
        assert!(report.elapsed < Duration::from_secs(10));
        assert_eq!(file_names(dir.path()), ["frame1.raw"]);
        assert_eq!(
            *events.borrow(),
            [Event::Start, Event::Stop, Event::Close, Event::DeviceClose]
        );
    }

    #[test]
    fn capture_error_wins_over_cleanup_errors() {
        let (dev, events) = device();
        let (tx, rx) = unbounded();
        tx.send(frame(1, &[1])).unwrap();

        let mut session = dev.session(rx);
        session.fail_stop = true;
        session.fail_close = true;
        let mut sink =
            |_: &Frame| -> io::Result<()> { Err(io::Error::new(io::ErrorKind::Other, "disk full")) };
        let e = capture(session, &CaptureConfig::default(), &mut sink).unwrap_err();
        dev.close();

        assert!(e.is_persistence_failure(), "{}", e);
        assert_eq!(
            *events.borrow(),
            [Event::Start, Event::Stop, Event::Close, Event::DeviceClose]
        );
    }

    #[test]
    fn stop_error_fails_successful_capture() {
        let (dev, events) = device();
        let (_tx, rx) = unbounded::<Frame>();

        let mut session = dev.session(rx);
        session.fail_stop = true;
        session.fail_close = true;
        let mut sink = |_: &Frame| -> io::Result<()> { Ok(()) };
        let e = capture(
            session,
            &CaptureConfig {
                duration: Duration::from_millis(20),
                ..Default::default()
            },
            &mut sink,
        )
        .unwrap_err();

        // the first cleanup error is returned, close still happens
        assert!(!e.is_persistence_failure());
        assert!(e.to_string().contains("stopping the video stream"), "{}", e);
        assert_eq!(*events.borrow(), [Event::Start, Event::Stop, Event::Close]);
    }

    #[test]
    fn close_error_fails_successful_capture() {
        let (dev, events) = device();
        let (tx, rx) = unbounded::<Frame>();
        drop(tx);

        let mut session = dev.session(rx);
        session.fail_close = true;
        let mut sink = |_: &Frame| -> io::Result<()> { Ok(()) };
        let e = capture(session, &CaptureConfig::default(), &mut sink).unwrap_err();

        assert!(e.to_string().contains("closing UVC device"), "{}", e);
        assert_eq!(*events.borrow(), [Event::Start, Event::Stop, Event::Close]);
    }

    #[test]
    fn failed_start_still_releases_session() {
        let (dev, events) = device();
        let mut session = dev.session(unbounded().1);
        session.frames = None;

        let mut sink = |_: &Frame| -> io::Result<()> { Ok(()) };
        let e = capture(session, &CaptureConfig::default(), &mut sink).unwrap_err();
        assert!(!e.is_persistence_failure());
        assert_eq!(*events.borrow(), [Event::Start, Event::Stop, Event::Close]);
    }

    #[test]
    fn file_names_follow_format() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::create(dir.path().join("out")).unwrap();
        assert!(sink.dir().is_dir());

        let jpeg = Frame::new(
            12,
            640,
            480,
            FrameFormat::Mjpeg,
            SystemTime::now(),
            vec![0xff, 0xd8],
        );
        assert_eq!(sink.path_for(&jpeg), dir.path().join("out").join("frame12.jpg"));
        assert_eq!(
            sink.path_for(&frame(3, &[])),
            dir.path().join("out").join("frame3.raw")
        );
    }

    #[test]
    fn default_config_captures_ten_seconds_into_cwd() {
        let config = CaptureConfig::default();
        assert_eq!(config.duration, Duration::from_secs(10));
        assert_eq!(config.output_dir, PathBuf::from("."));
    }
}
