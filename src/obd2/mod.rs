//! Module for OBD-II (SAE J1979 / ISO 15031-5) over CAN
//!
//! Only single frame requests and responses are supported. Requests are sent to the
//! functional (broadcast) address [OBD_REQUEST_ID], and the first matching response from
//! any ECU in [OBD_RESPONSE_IDS] is accepted.

use std::fmt::{Debug, Formatter};
use std::ops::RangeInclusive;

use log::{debug, warn};
use strum_macros::{Display, EnumIter, FromRepr};

use crate::channel::{AcceptanceFilter, CanFrame, CanTransport, TransportConfig, TransportError};
use crate::hardware::{Clock, Deadline};
use crate::{ObdError, ObdResult};

pub mod pids;
mod service01;
mod service03;

pub use service01::*;

/// Functional request identifier
pub const OBD_REQUEST_ID: u32 = 0x7DF;
/// Physical response identifiers of up to 8 ECUs
pub const OBD_RESPONSE_IDS: RangeInclusive<u32> = 0x7E8..=0x7EF;
/// Default time an ECU has to answer a request
pub const OBD_RESPONSE_TIMEOUT_MS: u32 = 100;
/// Default maximum number of DTCs decoded from one response
pub const OBD_MAX_DTC_COUNT: usize = 16;

const NEGATIVE_RESPONSE: u8 = 0x7F;
const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
/// Largest single frame payload after the length byte
const MAX_SINGLE_FRAME_LEN: u8 = 7;

/// OBD-II service modes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, FromRepr, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ObdMode {
    /// Show current data
    CurrentData = 0x01,
    /// Show freeze frame data
    FreezeFrame = 0x02,
    /// Show stored DTCs
    StoredDtcs = 0x03,
    /// Clear DTCs and stored values
    ClearDtcs = 0x04,
    /// Oxygen sensor test results
    O2TestResults = 0x05,
    /// Other test results
    TestResults = 0x06,
    /// Show pending DTCs
    PendingDtcs = 0x07,
    /// Control on-board system
    ControlOperation = 0x08,
    /// Request vehicle information
    VehicleInfo = 0x09,
    /// Permanent DTCs
    PermanentDtcs = 0x0A,
}

impl ObdMode {
    /// Mode byte of a positive response to this mode
    pub const fn response_mode(self) -> u8 {
        self as u8 | POSITIVE_RESPONSE_OFFSET
    }
}

impl From<ObdMode> for u8 {
    fn from(mode: ObdMode) -> Self {
        mode as u8
    }
}

/// Tunables of an [ObdSession]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObdSettings {
    /// How long to wait for a matching response
    pub response_timeout_ms: u32,
    /// Value of the unused request payload bytes
    pub pad_byte: u8,
    /// Maximum number of DTCs decoded from one response
    pub max_dtcs: usize,
}

impl Default for ObdSettings {
    fn default() -> Self {
        Self {
            response_timeout_ms: OBD_RESPONSE_TIMEOUT_MS,
            pad_byte: 0x00,
            max_dtcs: OBD_MAX_DTC_COUNT,
        }
    }
}

/// A positive single frame response
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ObdResponse {
    mode: u8,
    pid: u8,
    data_len: u8,
    data: [u8; 5],
}

impl ObdResponse {
    /// Response mode (request mode | 0x40)
    pub fn mode(&self) -> u8 {
        self.mode
    }

    /// Byte following the mode. This is the PID for PID based modes,
    /// and the DTC count for the DTC modes (03, 07, 0A)
    pub fn pid(&self) -> u8 {
        self.pid
    }

    /// Data bytes following the PID
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_len as usize]
    }
}

/// Outcome of looking at one in-range frame while waiting for a response
enum Reply {
    Positive(ObdResponse),
    Negative(u8),
    WrongMode(u8),
    WrongPid(u8),
}

/// Classifies a frame from the ECU response range
fn classify(frame: &CanFrame, mode: u8, pid: Option<u8>) -> ObdResult<Reply> {
    let data = frame.data();
    let Some(&len) = data.first() else {
        return Err(ObdError::InvalidData);
    };
    // High nibble != 0 is a first / consecutive / flow control frame
    if len == 0 || len > MAX_SINGLE_FRAME_LEN || len as usize > data.len() - 1 {
        return Err(ObdError::InvalidData);
    }
    let payload = &data[1..=len as usize];
    let resp_mode = payload[0];
    if resp_mode == NEGATIVE_RESPONSE {
        return match payload {
            [_, rejected, code, ..] if *rejected == mode => Ok(Reply::Negative(*code)),
            [_, rejected, ..] => Ok(Reply::WrongMode(*rejected | POSITIVE_RESPONSE_OFFSET)),
            _ => Err(ObdError::InvalidData),
        };
    }
    if resp_mode != mode | POSITIVE_RESPONSE_OFFSET {
        return Ok(Reply::WrongMode(resp_mode));
    }
    let resp_pid = payload.get(1).copied();
    if let Some(want) = pid {
        match resp_pid {
            Some(got) if got == want => {}
            Some(got) => return Ok(Reply::WrongPid(got)),
            None => return Err(ObdError::InvalidData),
        }
    }
    let rest = payload.get(2..).unwrap_or_default();
    let mut resp = ObdResponse {
        mode: resp_mode,
        pid: resp_pid.unwrap_or(0),
        data_len: rest.len() as u8,
        data: [0; 5],
    };
    resp.data[..rest.len()].copy_from_slice(rest);
    Ok(Reply::Positive(resp))
}

/// OBD-II client over any [CanTransport]. One request is in flight at a time
pub struct ObdSession {
    transport: Box<dyn CanTransport>,
    clock: Box<dyn Clock>,
    settings: ObdSettings,
}

impl Debug for ObdSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObdSession")
            .field("transport", &self.transport.capabilities().name)
            .field("settings", &self.settings)
            .finish()
    }
}

impl ObdSession {
    /// Creates a session with default settings.
    /// The transport must already be initialized, or be initialized with [ObdSession::init]
    pub fn new(transport: Box<dyn CanTransport>, clock: Box<dyn Clock>) -> Self {
        Self::with_settings(transport, clock, ObdSettings::default())
    }

    /// Creates a session with custom settings
    pub fn with_settings(
        transport: Box<dyn CanTransport>,
        clock: Box<dyn Clock>,
        settings: ObdSettings,
    ) -> Self {
        Self {
            transport,
            clock,
            settings,
        }
    }

    /// Initializes the transport and restricts reception to the ECU response range
    pub fn init(&mut self, config: &TransportConfig) -> ObdResult<()> {
        self.transport.init(config)?;
        let slot = self.transport.capabilities().first_filter_slot;
        self.transport
            .configure_filter(slot, &AcceptanceFilter::obd_responses())?;
        Ok(())
    }

    /// Current settings
    pub fn settings(&self) -> &ObdSettings {
        &self.settings
    }

    /// Replaces the settings
    pub fn set_settings(&mut self, settings: ObdSettings) {
        self.settings = settings
    }

    /// Access to the underlying transport
    pub fn transport_mut(&mut self) -> &mut dyn CanTransport {
        self.transport.as_mut()
    }

    /// Gives back the transport and clock
    pub fn into_inner(self) -> (Box<dyn CanTransport>, Box<dyn Clock>) {
        (self.transport, self.clock)
    }

    /// Sends a request and waits for its response.
    ///
    /// ## Parameters
    /// * mode - Service mode
    /// * pid - PID byte, or None for modes that take no PID (03, 04, 07, 0A)
    ///
    /// Frames from outside the response range, responses to a different mode, responses for
    /// a different PID and frames that are not single frame responses are skipped.
    /// If the timeout passes without a positive response, the error describes the most
    /// significant reply that was seen ([ObdError::NegativeResponse], then
    /// [ObdError::InvalidData], then [ObdError::ModeMismatch], then [ObdError::NoResponse]).
    pub fn request(&mut self, mode: u8, pid: Option<u8>) -> ObdResult<ObdResponse> {
        let mut payload = [self.settings.pad_byte; 8];
        payload[1] = mode;
        payload[0] = match pid {
            Some(p) => {
                payload[2] = p;
                2
            }
            None => 1,
        };
        let frame = CanFrame::new_standard(OBD_REQUEST_ID, &payload)?;
        self.transport.transmit(&frame)?;
        debug!("OBD request mode {mode:02X} pid {pid:02X?}");

        let deadline = Deadline::after(self.clock.as_ref(), self.settings.response_timeout_ms);
        let mut negative = None;
        let mut mismatch = None;
        let mut malformed = false;
        loop {
            match self.transport.receive(deadline.remaining_ms(self.clock.as_ref())) {
                Ok(f) if !f.is_extended() && OBD_RESPONSE_IDS.contains(&f.id()) => {
                    match classify(&f, mode, pid) {
                        Err(_) => {
                            warn!("Skipping malformed frame from {:#X}: {:02X?}", f.id(), f.data());
                            malformed = true;
                        }
                        Ok(Reply::Positive(resp)) => {
                            debug!("OBD response from {:#X}: {resp:02X?}", f.id());
                            return Ok(resp);
                        }
                        Ok(Reply::Negative(code)) => {
                            warn!("ECU {:#X} rejected mode {mode:02X} with NRC {code:02X}", f.id());
                            negative = Some(code);
                        }
                        Ok(Reply::WrongMode(m)) => {
                            debug!("Skipping mode {m:02X} response from {:#X}", f.id());
                            mismatch = Some(m);
                        }
                        Ok(Reply::WrongPid(p)) => {
                            debug!("Skipping response for PID {p:02X} from {:#X}", f.id());
                        }
                    }
                }
                Ok(f) => debug!("Skipping frame {:#X}", f.id()),
                Err(TransportError::Timeout) => {}
                Err(e) => return Err(e.into()),
            }
            if deadline.expired(self.clock.as_ref()) {
                break;
            }
        }
        Err(match (negative, malformed, mismatch) {
            (Some(code), _, _) => ObdError::NegativeResponse { mode, code },
            (None, true, _) => ObdError::InvalidData,
            (None, false, Some(received)) => ObdError::ModeMismatch {
                expected: mode | POSITIVE_RESPONSE_OFFSET,
                received,
            },
            (None, false, None) => ObdError::NoResponse,
        })
    }

    /// Requests the supported PID bitmap of the group starting at `start_pid`.
    ///
    /// `start_pid` must be a multiple of 0x20. Bit 31 of the result is `start_pid + 1`,
    /// bit 0 is `start_pid + 0x20` (which also announces the next group)
    pub fn get_supported_pids(&mut self, mode: u8, start_pid: u8) -> ObdResult<u32> {
        if start_pid % 0x20 != 0 {
            return Err(ObdError::InvalidParameter);
        }
        let resp = self.request(mode, Some(start_pid))?;
        let bytes: [u8; 4] = resp.data().try_into().map_err(|_| ObdError::InvalidData)?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Checks the ECU's supported PID bitmap for `pid`.
    /// PID 0x00 is always supported, since it is how support is discovered
    pub fn is_pid_supported(&mut self, mode: u8, pid: u8) -> ObdResult<bool> {
        if pid == 0 {
            return Ok(true);
        }
        let group = (pid - 1) & !0x1F;
        let bitmap = self.get_supported_pids(mode, group)?;
        Ok(bitmap & (1 << (31 - (pid - 1 - group))) != 0)
    }

    /// Walks every supported PID group of `mode`, following the "next group supported" bit.
    ///
    /// The group markers (0x20, 0x40, ...) are not part of the returned list.
    /// Only a failure on the first group is returned as an error, a later group that is not
    /// answered ends the walk
    pub fn supported_pids(&mut self, mode: u8) -> ObdResult<Vec<u8>> {
        let mut pids = Vec::new();
        let mut start: u8 = 0;
        loop {
            let bitmap = match self.get_supported_pids(mode, start) {
                Ok(b) => b,
                Err(e) if start == 0 => return Err(e),
                Err(e) => {
                    warn!("Supported PID group {start:02X} failed: {e}");
                    break;
                }
            };
            pids.extend(
                (0..32u8)
                    .filter(|bit| bitmap & (1 << (31 - bit)) != 0)
                    .map(|bit| start as u16 + bit as u16 + 1)
                    .filter(|pid| pid % 0x20 != 0)
                    .map(|pid| pid as u8),
            );
            if bitmap & 0x01 == 0 || start == 0xE0 {
                break;
            }
            start += 0x20;
        }
        Ok(pids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::IdKind;

    fn frame(data: &[u8]) -> CanFrame {
        CanFrame::new(0x7E8, data, IdKind::Standard).unwrap()
    }

    #[test]
    fn positive_response_with_pid() {
        let f = frame(&[0x04, 0x41, 0x0C, 0x1A, 0xF8, 0x55, 0x55, 0x55]);
        let Reply::Positive(r) = classify(&f, 0x01, Some(0x0C)).unwrap() else {
            panic!("not positive");
        };
        assert_eq!((r.mode(), r.pid(), r.data()), (0x41, 0x0C, &[0x1A, 0xF8][..]));
    }

    #[test]
    fn positive_response_without_pid() {
        let f = frame(&[0x01, 0x44, 0, 0, 0, 0, 0, 0]);
        let Reply::Positive(r) = classify(&f, 0x04, None).unwrap() else {
            panic!("not positive");
        };
        assert_eq!((r.mode(), r.pid(), r.data()), (0x44, 0, &[][..]));
    }

    #[test]
    fn multi_frame_and_truncated_replies_are_invalid() {
        let first_frame = frame(&[0x10, 0x14, 0x49, 0x02, 0x01, 0x57, 0x30, 0x4C]);
        assert!(matches!(classify(&first_frame, 0x09, Some(0x02)), Err(ObdError::InvalidData)));
        let truncated = frame(&[0x06, 0x41, 0x0C]);
        assert!(matches!(classify(&truncated, 0x01, Some(0x0C)), Err(ObdError::InvalidData)));
        assert!(matches!(classify(&frame(&[]), 0x01, None), Err(ObdError::InvalidData)));
    }

    #[test]
    fn negative_and_mismatched_replies() {
        let nrc = frame(&[0x03, 0x7F, 0x01, 0x12]);
        assert!(matches!(classify(&nrc, 0x01, Some(0x0C)), Ok(Reply::Negative(0x12))));
        assert!(matches!(classify(&nrc, 0x09, Some(0x02)), Ok(Reply::WrongMode(0x41))));
        let other_mode = frame(&[0x03, 0x49, 0x0C, 0x00]);
        assert!(matches!(classify(&other_mode, 0x01, Some(0x0C)), Ok(Reply::WrongMode(0x49))));
        let other_pid = frame(&[0x03, 0x41, 0x0D, 0x20]);
        assert!(matches!(classify(&other_pid, 0x01, Some(0x0C)), Ok(Reply::WrongPid(0x0D))));
    }

    #[test]
    fn modes_encode_to_their_byte() {
        assert_eq!(u8::from(ObdMode::PermanentDtcs), 0x0A);
        assert_eq!(ObdMode::CurrentData.response_mode(), 0x41);
        assert_eq!(ObdMode::from_repr(0x07), Some(ObdMode::PendingDtcs));
    }
}
