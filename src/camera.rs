use crate::{
    control::{self, ControlValue},
    error::{err, Action},
    topo::{CameraControls, CameraId, CameraTerminalDesc},
    Request, Result, UvcDevice,
};

/// Grants access to a camera input terminal.
pub struct CameraTerminal<'a> {
    device: &'a UvcDevice,
    id: CameraId,
    desc: &'a CameraTerminalDesc,
}

impl<'a> CameraTerminal<'a> {
    pub(crate) fn new(device: &'a UvcDevice, id: CameraId) -> Result<Self> {
        match device.topology().camera_terminal_by_id(id) {
            Some(desc) => Ok(Self { device, id, desc }),
            None => err(
                format!("no camera terminal with ID {:?}", id),
                Action::ReadingControl,
            ),
        }
    }

    /// Controls this camera terminal claims to support.
    pub fn controls(&self) -> CameraControls {
        self.desc.controls()
    }

    pub fn read_control<C: CameraControl>(&self) -> Result<C::Value> {
        self.read_control_with(C::ID, Request::GetCur)
    }

    pub fn read_control_min<C: CameraControl>(&self) -> Result<C::Value> {
        self.read_control_with(C::ID, Request::GetMin)
    }

    pub fn read_control_max<C: CameraControl>(&self) -> Result<C::Value> {
        self.read_control_with(C::ID, Request::GetMax)
    }

    /// Reads the control's resolution. For [`AutoExposureMode`], this is the bitmap of
    /// supported modes.
    pub fn read_control_res<C: CameraControl>(&self) -> Result<C::Value> {
        self.read_control_with(C::ID, Request::GetRes)
    }

    pub fn read_control_default<C: CameraControl>(&self) -> Result<C::Value> {
        self.read_control_with(C::ID, Request::GetDef)
    }

    pub fn set_control<C: CameraControl>(&mut self, value: C::Value) -> Result<()> {
        let mut buf = <<C::Value as ControlValue>::Buf>::default();
        value.encode(buf.as_mut());
        self.device
            .set_entity(self.id.as_raw(), C::ID as _, buf.as_mut())
    }

    fn read_control_with<V: ControlValue>(&self, control: ControlId, req: Request) -> Result<V> {
        let mut buf = V::Buf::default();
        self.device
            .read_entity(self.id.as_raw(), req, control as _, buf.as_mut())?;
        Ok(V::decode(buf.as_mut()))
    }
}

impl UvcDevice {
    /// Sets the auto-exposure mode of the device's first camera terminal.
    ///
    /// `mode` should contain exactly one of the [`control::AutoExposureMode`] flags.
    pub fn set_ae_mode(&self, mode: control::AutoExposureMode) -> Result<()> {
        let mut cam = self.first_camera_terminal()?;
        if !cam.controls().contains(CameraControls::AUTO_EXPOSURE_MODE) {
            return err(
                "camera terminal does not support the auto-exposure mode control",
                Action::WritingControl,
            );
        }

        log::debug!("setting AE mode to {:?}", mode);
        cam.set_control::<AutoExposureMode>(mode)
    }

    /// Reads the current auto-exposure mode of the device's first camera terminal.
    pub fn ae_mode(&self) -> Result<control::AutoExposureMode> {
        self.first_camera_terminal()?
            .read_control::<AutoExposureMode>()
    }

    fn first_camera_terminal(&self) -> Result<CameraTerminal<'_>> {
        match self.topology().first_camera_id() {
            Some(id) => CameraTerminal::new(self, id),
            None => err("device has no camera terminal", Action::ReadingControl),
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum ControlId {
    AutoExposureMode = 0x02,
    AutoExposurePriority = 0x03,
    ExposureTimeAbs = 0x04,
}

pub trait CameraControl {
    type Value: ControlValue;
    const ID: ControlId;
}

pub struct AutoExposureMode;
impl CameraControl for AutoExposureMode {
    type Value = control::AutoExposureMode;
    const ID: ControlId = ControlId::AutoExposureMode;
}

/// Whether the device may vary the frame rate to satisfy auto-exposure (1) or must keep it
/// constant (0).
pub struct AutoExposurePriority;
impl CameraControl for AutoExposurePriority {
    type Value = u8;
    const ID: ControlId = ControlId::AutoExposurePriority;
}

pub struct ExposureTimeAbs;
impl CameraControl for ExposureTimeAbs {
    type Value = control::ExposureTime;
    const ID: ControlId = ControlId::ExposureTimeAbs;
}
