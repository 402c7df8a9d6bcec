//! A small USB Video Class host library, and a timed frame capture loop built on top of it.
//!
//! Typical use:
//! - create a [`UvcContext`] and pick a device from [`UvcContext::devices`] or
//!   [`UvcContext::find_device`], then [`UvcDeviceDesc::open`] it;
//! - inspect [`UvcDevice::topology`] and [`UvcDevice::streaming_interfaces`];
//! - negotiate a format with [`StreamingInterface::negotiate`] and open a
//!   [`StreamSession`](stream::StreamSession);
//! - hand the session to [`capture::capture`], which streams frames into a
//!   [`FrameSink`](capture::FrameSink) until a deadline passes.
//!
//! Dealing with a device entity `Ent`:
//! - `EntDesc` describes an entity's static properties, read from the device descriptor.
//! - `EntId` is a small `Copy` type that refers to an `EntDesc`.
//! - `Ent<'a>` grants access to the entity's properties, borrowing the opened device.

#[macro_use]
mod util;
pub mod camera;
pub mod capture;
mod context;
pub mod control;
mod detect;
mod error;
pub mod format;
mod frame;
pub mod stream;
pub mod streaming_interface;
pub mod topo;

use std::{fmt, sync::Arc, time::Duration};

use camera::CameraTerminal;
pub use context::{UvcContext, UvcDeviceDesc};
use detect::UvcInfo;
pub use error::Error;
use error::*;
pub use format::FrameFormat;
pub use frame::Frame;
use rusb::{Context, DeviceHandle};
use streaming_interface::StreamingInterface;
use topo::{CameraId, StreamingInterfaceDesc, StreamingInterfaceId, Topology};
pub use util::BcdVersion;

pub type Result<T> = std::result::Result<T, Error>;

/// An opened UVC device with its control and streaming interfaces claimed.
///
/// Dropping the device (or calling [`UvcDevice::close`]) releases the claimed interfaces.
pub struct UvcDevice {
    usb: Arc<DeviceHandle<Context>>,
    uvc_info: UvcInfo,
    timeout: Duration,
    /// Interfaces claimed by `open`, in claim order.
    claimed: Vec<u8>,
}

impl UvcDevice {
    fn open(desc: UvcDeviceDesc, timeout: Duration) -> Result<Self> {
        let usb = desc.usb.open().during(Action::OpeningDevice)?;
        if let Err(e) = usb.set_auto_detach_kernel_driver(true) {
            log::warn!("set_auto_detach_kernel_driver failed: {}", e);
        }

        let config = usb.active_configuration().during(Action::OpeningDevice)?;
        if config != 1 {
            usb.set_active_configuration(1)
                .during(Action::OpeningDevice)?;
        }

        let mut claimed = Vec::new();
        let interfaces = std::iter::once(desc.uvc_info.control_interface.interface_number)
            .chain(desc.uvc_info.streaming_interfaces.iter().map(|i| i.id().0));
        for intf in interfaces {
            if let Err(e) = usb.claim_interface(intf) {
                for &intf in claimed.iter().rev() {
                    usb.release_interface(intf).ok();
                }
                return Err(e).during(Action::OpeningDevice);
            }
            claimed.push(intf);
        }

        let config = usb.active_configuration().during(Action::OpeningDevice)?;
        if config != 1 {
            return err("failed to claim device", Action::OpeningDevice);
        }

        log::debug!("opened device, claimed interfaces {:?}", claimed);

        Ok(UvcDevice {
            usb: Arc::new(usb),
            uvc_info: desc.uvc_info,
            timeout,
            claimed,
        })
    }

    /// Releases the claimed interfaces and closes the device.
    ///
    /// Any [`StreamSession`](stream::StreamSession) borrowing this device has to be closed
    /// first, which the borrow checker enforces.
    pub fn close(mut self) -> Result<()> {
        log::debug!("closing device");
        self.release_interfaces()
    }

    fn release_interfaces(&mut self) -> Result<()> {
        if self.claimed.is_empty() {
            return Ok(());
        }

        let mut result = Ok(());
        for &intf in self.claimed.iter().rev() {
            if let Err(e) = self.usb.release_interface(intf) {
                log::warn!("failed to release interface {}: {}", intf, e);
                if result.is_ok() {
                    result = Err(e).during(Action::ClosingDevice);
                }
            }
        }
        self.claimed.clear();
        result
    }

    pub(crate) fn usb_handle(&self) -> Arc<DeviceHandle<Context>> {
        self.usb.clone()
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    fn with_usb<T>(&self, mut cb: impl FnMut(&DeviceHandle<Context>) -> Result<T>) -> Result<T> {
        // Some devices let the first control transfer after opening time out. A single retry
        // gets past that.

        match cb(&self.usb) {
            Err(e) if e.is_usb_timeout() => {
                log::warn!("USB timeout, retrying request");
                cb(&self.usb)
            }
            other => other,
        }
    }

    /// Performs a `SET_CUR` request on an "entity" control (eg. an input, output, or unit's control).
    fn set_entity(&self, entity_id: u8, cs: u8, data: &[u8]) -> Result<()> {
        self.set_interface_entity(
            self.uvc_info.control_interface.interface_number,
            entity_id,
            cs,
            data,
        )
    }

    fn set_interface_entity(
        &self,
        interface: u8,
        entity_id: u8,
        cs: u8,
        data: &[u8],
    ) -> Result<()> {
        const SET_ENTITY_REQ: u8 = 0b00100001;

        let value = u16::from(cs) << 8;
        let index = u16::from(entity_id) << 8 | u16::from(interface);
        log::trace!("SET_CUR(if {}, entity {}, cs {}) = {:02x?}", interface, entity_id, cs, data);
        self.with_usb(|usb| {
            let written = usb
                .write_control(
                    SET_ENTITY_REQ,
                    Request::SetCur as _,
                    value,
                    index,
                    data,
                    self.timeout,
                )
                .during(Action::WritingControl)?;
            if written != data.len() {
                return err(
                    format!("control write only wrote {}/{} bytes", written, data.len()),
                    Action::WritingControl,
                );
            }
            Ok(())
        })
    }

    fn read_entity(&self, entity_id: u8, request: Request, cs: u8, buf: &mut [u8]) -> Result<()> {
        self.read_interface_entity(
            self.uvc_info.control_interface.interface_number,
            entity_id,
            request,
            cs,
            buf,
        )
    }

    fn read_interface_entity(
        &self,
        interface: u8,
        entity_id: u8,
        request: Request,
        cs: u8,
        buf: &mut [u8],
    ) -> Result<()> {
        const GET_ENTITY_REQ: u8 = 0b10100001;

        let value = u16::from(cs) << 8;
        let index = u16::from(entity_id) << 8 | u16::from(interface);

        log::trace!("{:?}(if {}, entity {}, cs {})", request, interface, entity_id, cs);
        self.with_usb(|usb| {
            usb.read_control(
                GET_ENTITY_REQ,
                request as _,
                value,
                index,
                buf,
                self.timeout,
            )
            .during(Action::ReadingControl)?;
            Ok(())
        })
    }

    pub fn read_manufacturer_string(&self) -> Result<String> {
        let desc = self.device_descriptor()?;
        self.usb
            .read_manufacturer_string_ascii(&desc)
            .during(Action::ReadingDeviceString)
    }

    pub fn read_product_string(&self) -> Result<String> {
        let desc = self.device_descriptor()?;
        self.usb
            .read_product_string_ascii(&desc)
            .during(Action::ReadingDeviceString)
    }

    pub fn read_serial_number_string(&self) -> Result<String> {
        let desc = self.device_descriptor()?;
        self.usb
            .read_serial_number_string_ascii(&desc)
            .during(Action::ReadingDeviceString)
    }

    fn device_descriptor(&self) -> Result<rusb::DeviceDescriptor> {
        self.usb
            .device()
            .device_descriptor()
            .during(Action::AccessingDeviceDescriptor)
    }

    /// Returns the topology declared by the Video Control interface.
    pub fn topology(&self) -> &Topology {
        &self.uvc_info.control_interface.topo
    }

    /// Returns the device's streaming interfaces.
    ///
    /// Streaming interfaces transport video data over the USB channel (either from the device to
    /// the host, or from the host to the device).
    pub fn streaming_interfaces(&self) -> &[StreamingInterfaceDesc] {
        &self.uvc_info.streaming_interfaces
    }

    pub fn streaming_interface_by_id(
        &self,
        id: StreamingInterfaceId,
    ) -> Result<StreamingInterface<'_>> {
        StreamingInterface::new(self, id)
    }

    pub fn camera_terminal_by_id(&self, id: CameraId) -> Result<CameraTerminal<'_>> {
        CameraTerminal::new(self, id)
    }
}

impl Drop for UvcDevice {
    fn drop(&mut self) {
        if let Err(e) = self.release_interfaces() {
            log::warn!("{}", e);
        }
    }
}

impl fmt::Debug for UvcDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UvcDevice")
            .field("uvc_info", &self.uvc_info)
            .field("claimed", &self.claimed)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
enum Request {
    Undefined = 0x00,
    SetCur = 0x01,
    SetCurAll = 0x11,
    GetCur = 0x81,
    GetMin = 0x82,
    GetMax = 0x83,
    GetRes = 0x84,
    GetLen = 0x85,
    GetInfo = 0x86,
    GetDef = 0x87,
    GetCurAll = 0x91,
    GetMinAll = 0x92,
    GetMaxAll = 0x93,
    GetResAll = 0x94,
    GetDefAll = 0x97,
}
