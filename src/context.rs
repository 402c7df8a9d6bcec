use std::{fmt, time::Duration};

use rusb::{Context, Device, UsbContext};

use crate::{
    detect::{self, UvcInfo},
    error::{err, Action, ResultExt},
    Result, UvcDevice,
};

/// A libusb session used to find UVC devices.
///
/// Dropping the context tears down the libusb session once all devices obtained from it are
/// dropped, too.
pub struct UvcContext {
    usb: Context,
}

impl UvcContext {
    pub fn new() -> Result<Self> {
        let usb = Context::new().during(Action::InitializingContext)?;
        Ok(Self { usb })
    }

    /// Lists all connected UVC devices.
    ///
    /// Devices whose descriptors can't be parsed are logged and skipped.
    pub fn devices(&self) -> Result<Vec<UvcDeviceDesc>> {
        let list = self.usb.devices().during(Action::EnumeratingDevices)?;

        let devices = list
            .iter()
            .filter_map(|dev| match detect::detect_uvc(&dev) {
                Ok(Some(info)) => Some(UvcDeviceDesc {
                    usb: dev,
                    uvc_info: info,
                }),
                Ok(None) => None,
                Err(e) => {
                    log::error!("{:?}: {}", dev, e);
                    None
                }
            })
            .collect::<Vec<_>>();

        Ok(devices)
    }

    /// Finds the first UVC device matching the given IDs.
    ///
    /// A `vendor_id` or `product_id` of 0 and a `serial` of `None` match any device.
    pub fn find_device(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
    ) -> Result<UvcDeviceDesc> {
        for desc in self.devices()? {
            if vendor_id != 0 && desc.vendor_id() != vendor_id {
                continue;
            }
            if product_id != 0 && desc.product_id() != product_id {
                continue;
            }
            if let Some(serial) = serial {
                match desc.read_serial_number() {
                    Ok(s) if s == serial => {}
                    Ok(_) => continue,
                    Err(e) => {
                        log::warn!("{:?}: {}", desc, e);
                        continue;
                    }
                }
            }

            return Ok(desc);
        }

        err(
            format!(
                "no matching UVC device (vendor {:04x}, product {:04x}, serial {:?})",
                vendor_id, product_id, serial
            ),
            Action::EnumeratingDevices,
        )
    }
}

/// Identifies a UVC device.
pub struct UvcDeviceDesc {
    pub(crate) usb: Device<Context>,
    pub(crate) uvc_info: UvcInfo,
}

impl UvcDeviceDesc {
    pub fn vendor_id(&self) -> u16 {
        // the device descriptor is cached by libusb, this can't fail
        self.usb
            .device_descriptor()
            .map(|d| d.vendor_id())
            .unwrap_or_default()
    }

    pub fn product_id(&self) -> u16 {
        self.usb
            .device_descriptor()
            .map(|d| d.product_id())
            .unwrap_or_default()
    }

    pub fn bus_number(&self) -> u8 {
        self.usb.bus_number()
    }

    pub fn address(&self) -> u8 {
        self.usb.address()
    }

    /// Reads the serial number string by briefly opening the device.
    pub fn read_serial_number(&self) -> Result<String> {
        let desc = self
            .usb
            .device_descriptor()
            .during(Action::AccessingDeviceDescriptor)?;
        let handle = self.usb.open().during(Action::OpeningDevice)?;
        handle
            .read_serial_number_string_ascii(&desc)
            .during(Action::ReadingDeviceString)
    }

    pub fn open(self) -> Result<UvcDevice> {
        UvcDevice::open(self, Duration::from_millis(1000))
    }
}

impl fmt::Debug for UvcDeviceDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UvcDeviceDesc")
            .field("bus", &self.bus_number())
            .field("address", &self.address())
            .field("vendor_id", &format_args!("{:04x}", self.vendor_id()))
            .field("product_id", &format_args!("{:04x}", self.product_id()))
            .field("uvc_info", &self.uvc_info)
            .finish()
    }
}
