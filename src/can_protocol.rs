// CAN communication protocol definitions for the interceptor link

use core::fmt;

use embedded_can::{Frame, Id};

use crate::checksum;
use crate::fault::FaultState;
use crate::fmt::*;

/// CAN message IDs
pub mod can_ids {
    /// Differential command from the host (checksum, target0: i16, target1: i16, flags: u8; 6 bytes)
    /// Also carries the two 8-byte bootloader directives.
    pub const COMMAND: u16 = 0x300;

    /// Status feedback in differential mode (8 bytes)
    pub const STATUS_DIFFERENTIAL: u16 = 0x301;

    /// Status feedback in gas pedal mode (8 bytes, same layout)
    pub const STATUS_GAS_PEDAL: u16 = 0x201;
}

/// Length of a command frame
pub const COMMAND_LEN: usize = 6;

/// Length of a status frame
pub const STATUS_LEN: usize = 8;

/// Checksum of a status frame covers bytes 1..=5 only
pub const STATUS_CHECKSUM_END: usize = 6;

/// Soft bootloader directive (stay in the on-chip bootstub)
pub const BOOTLOADER_SOFT: [u8; 8] = [0xDE, 0xAD, 0xFA, 0xCE, 0x0A, 0xB0, 0x0B, 0x1E];

/// Hardware bootloader directive (system ROM DFU)
pub const BOOTLOADER_HARD: [u8; 8] = [0xDE, 0xAD, 0xFA, 0xCE, 0x02, 0xB0, 0x0B, 0x1E];

/// Bit 7 of the flags byte
const FLAG_ENABLE: u8 = 0x80;

/// Low nibble of the flags byte / status byte 7
const NIBBLE_MASK: u8 = 0x0F;

/// Decoded differential command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandFrame {
    pub checksum: u8,
    pub target0: i16,
    pub target1: i16,
    pub enable: bool,
    /// Rolling 4-bit sequence counter
    pub counter: u8,
}

impl CommandFrame {
    /// Neutral command: both targets zero, actuation disabled
    pub const fn neutral() -> Self {
        Self {
            checksum: 0,
            target0: 0,
            target1: 0,
            enable: false,
            counter: 0,
        }
    }
}

impl Default for CommandFrame {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Which bootloader a reboot directive asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpecialCommand {
    SoftBootloader,
    HardBootloader,
}

/// Everything a frame on the command ID can decode to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Control(CommandFrame),
    Special(SpecialCommand),
}

/// Reasons a frame on the command ID is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// Structurally valid frame whose checksum does not match
    BadChecksum { stored: u8, computed: u8 },
    /// Payload length is neither a command nor a directive
    InvalidLength(usize),
    /// 8-byte payload that is not one of the reserved directives
    UnknownPattern,
    /// State nibble outside the known fault states
    UnknownState(u8),
}

impl DecodeError {
    /// True when the frame structure itself is wrong (as opposed to a checksum mismatch)
    pub fn is_malformed(&self) -> bool {
        !matches!(self, DecodeError::BadChecksum { .. })
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::BadChecksum { stored, computed } => write!(
                f,
                "checksum mismatch (stored 0x{:02X}, computed 0x{:02X})",
                stored, computed
            ),
            DecodeError::InvalidLength(len) => write!(f, "invalid frame length {}", len),
            DecodeError::UnknownPattern => write!(f, "unknown 8-byte pattern"),
            DecodeError::UnknownState(s) => write!(f, "unknown state {}", s),
        }
    }
}

/// Parse a frame received on [`can_ids::COMMAND`]
///
/// Bootloader directives are matched first and skip checksum evaluation.
///
/// # Returns
/// * `Ok(Command::Special(_))` for a reserved 8-byte directive
/// * `Ok(Command::Control(_))` for a 6-byte command with a valid checksum
/// * `Err(DecodeError)` otherwise
pub fn decode_command(data: &[u8]) -> Result<Command, DecodeError> {
    if data == &BOOTLOADER_SOFT[..] {
        return Ok(Command::Special(SpecialCommand::SoftBootloader));
    }
    if data == &BOOTLOADER_HARD[..] {
        return Ok(Command::Special(SpecialCommand::HardBootloader));
    }

    let raw: &[u8; COMMAND_LEN] = match data.len() {
        COMMAND_LEN => data
            .try_into()
            .map_err(|_| DecodeError::InvalidLength(data.len()))?,
        STATUS_LEN => return Err(DecodeError::UnknownPattern),
        len => return Err(DecodeError::InvalidLength(len)),
    };

    let computed = checksum::compute(&raw[1..]);
    if computed != raw[0] {
        debug!(
            "Command checksum mismatch: stored={:#x}, computed={:#x}",
            raw[0], computed
        );
        return Err(DecodeError::BadChecksum {
            stored: raw[0],
            computed,
        });
    }

    Ok(Command::Control(CommandFrame {
        checksum: raw[0],
        target0: i16::from_le_bytes([raw[1], raw[2]]),
        target1: i16::from_le_bytes([raw[3], raw[4]]),
        enable: raw[5] & FLAG_ENABLE != 0,
        counter: raw[5] & NIBBLE_MASK,
    }))
}

/// Build a command frame with its checksum filled in
///
/// Used by test harnesses and bench tooling that play the host role.
pub fn encode_command(target0: i16, target1: i16, enable: bool, counter: u8) -> [u8; COMMAND_LEN] {
    let mut data = [0u8; COMMAND_LEN];
    data[1..3].copy_from_slice(&target0.to_le_bytes());
    data[3..5].copy_from_slice(&target1.to_le_bytes());
    data[5] = (if enable { FLAG_ENABLE } else { 0 }) | (counter & NIBBLE_MASK);
    checksum::seal(&mut data, COMMAND_LEN);
    data
}

/// Largest classic CAN payload
pub const MAX_DATA_LEN: usize = 8;

/// Classic CAN frame as handed over by the transport
///
/// Implements [`embedded_can::Frame`] so the receive path can copy any
/// driver frame into the handoff registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    id: Id,
    remote: bool,
    len: u8,
    data: [u8; MAX_DATA_LEN],
}

impl RawFrame {
    /// Copy a data frame from any driver frame type (remote frames are ignored)
    pub fn from_frame(frame: &impl Frame) -> Option<Self> {
        if frame.is_remote_frame() {
            return None;
        }
        Self::new(frame.id(), frame.data())
    }

    /// 11-bit identifier, `None` for extended frames
    pub fn standard_id(&self) -> Option<u16> {
        match self.id {
            Id::Standard(id) => Some(id.as_raw()),
            Id::Extended(_) => None,
        }
    }
}

impl Frame for RawFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DATA_LEN {
            return None;
        }
        let mut buf = [0u8; MAX_DATA_LEN];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id: id.into(),
            remote: false,
            len: data.len() as u8,
            data: buf,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DATA_LEN {
            return None;
        }
        Some(Self {
            id: id.into(),
            remote: true,
            len: dlc as u8,
            data: [0; MAX_DATA_LEN],
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.len as usize
    }

    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.len as usize]
        }
    }
}

/// Status report sent to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusFrame {
    pub checksum: u8,
    pub adc0: u16,
    pub adc1: u16,
    pub override_active: bool,
    pub reserved: u8,
    pub state: FaultState,
    /// Rolling 4-bit packet index
    pub index: u8,
}

impl StatusFrame {
    pub const fn new(adc0: u16, adc1: u16, override_active: bool, state: FaultState, index: u8) -> Self {
        Self {
            checksum: 0,
            adc0,
            adc1,
            override_active,
            reserved: 0,
            state,
            index: index & NIBBLE_MASK,
        }
    }
}

/// Encode a status report into CAN data
///
/// Byte 0 is the checksum of bytes 1..=5; bytes 6 and 7 are outside the
/// checksum window.
pub fn encode_status(status: &StatusFrame) -> [u8; STATUS_LEN] {
    let mut data = [0u8; STATUS_LEN];
    data[1..3].copy_from_slice(&status.adc0.to_le_bytes());
    data[3..5].copy_from_slice(&status.adc1.to_le_bytes());
    data[5] = status.override_active as u8;
    data[6] = 0;
    data[7] = (u8::from(status.state) << 4) | (status.index & NIBBLE_MASK);
    checksum::seal(&mut data, STATUS_CHECKSUM_END);
    data
}

/// Decode a status report from CAN data
///
/// # Returns
/// * `Ok(StatusFrame)` if the checksum matches and the state is known
/// * `Err(DecodeError)` otherwise
pub fn decode_status(data: &[u8]) -> Result<StatusFrame, DecodeError> {
    let raw: &[u8; STATUS_LEN] = data
        .try_into()
        .map_err(|_| DecodeError::InvalidLength(data.len()))?;

    let computed = checksum::compute(&raw[1..STATUS_CHECKSUM_END]);
    if computed != raw[0] {
        return Err(DecodeError::BadChecksum {
            stored: raw[0],
            computed,
        });
    }

    let state_raw = raw[7] >> 4;
    let state =
        FaultState::try_from(state_raw).map_err(|_| DecodeError::UnknownState(state_raw))?;

    Ok(StatusFrame {
        checksum: raw[0],
        adc0: u16::from_le_bytes([raw[1], raw[2]]),
        adc1: u16::from_le_bytes([raw[3], raw[4]]),
        override_active: raw[5] != 0,
        reserved: raw[6],
        state,
        index: raw[7] & NIBBLE_MASK,
    })
}
