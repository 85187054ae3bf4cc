use crate::models::error::SaveError;

const FILE_DEVICE_UNKNOWN: u32 = 0x22;
const METHOD_BUFFERED: u32 = 0;
const FILE_ANY_ACCESS: u32 = 0;

/// Control requests understood by the virtual audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCode {
    DeviceOpen,
    DeviceClose,
    DeviceTypeOpen,
    DeviceTypeClose,
    SendData,
    GetData,
    SetFormat,
    GetFormat,
    SetDisable,
    SetState,
    SetVolume,
    SetMute,
    GetMute,
}

impl ControlCode {
    fn function(self) -> u32 {
        match self {
            Self::DeviceOpen => 0x800,
            Self::DeviceClose => 0x801,
            Self::DeviceTypeOpen => 0x802,
            Self::DeviceTypeClose => 0x803,
            Self::SendData => 0x804,
            Self::GetData => 0x805,
            Self::SetFormat => 0x806,
            Self::GetFormat => 0x807,
            Self::SetDisable => 0x808,
            Self::SetState => 0x809,
            Self::SetVolume => 0x810,
            Self::SetMute => 0x811,
            Self::GetMute => 0x812,
        }
    }

    /// Encoded request code: `(type << 16) | (access << 14) | (function << 2) | method`.
    pub fn as_raw(self) -> u32 {
        (FILE_DEVICE_UNKNOWN << 16) | (FILE_ANY_ACCESS << 14) | (self.function() << 2) | METHOD_BUFFERED
    }
}

/// An open channel to the virtual device.
///
/// Both calls block until the device has processed the request.
pub trait DeviceHandle: Send {
    /// Send `input` with a control request.
    fn control(&mut self, code: ControlCode, input: &[u8]) -> Result<(), SaveError>;

    /// Issue a control request that fills `output`; returns bytes filled.
    fn query(&mut self, code: ControlCode, output: &mut [u8]) -> Result<usize, SaveError>;
}

/// Finds the virtual device, if one is installed.
pub trait DeviceLocator: Send {
    fn locate(&mut self) -> Option<Box<dyn DeviceHandle>>;
}
