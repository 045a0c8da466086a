//! OBD2 DTC services. 03 (stored), 04 (clear), 07 (pending) and 0A (permanent)

use log::{debug, info};

use super::{ObdMode, ObdResponse, ObdSession};
use crate::ObdResult;
use crate::dtc::Dtc;

/// Decodes the 2 byte DTC records of a DTC mode response.
/// A trailing odd byte is ignored, and at most `max` codes are returned
fn decode_dtcs(resp: &ObdResponse, max: usize) -> Vec<Dtc> {
    // The byte after the mode is the ECU's DTC count, records start after it
    let records = resp.data().chunks_exact(2);
    if records.len() != resp.pid() as usize {
        debug!(
            "ECU reported {} DTCs, response holds {}",
            resp.pid(),
            records.len()
        );
    }
    records
        .take(max)
        .map(|r| Dtc::from_bytes([r[0], r[1]]))
        .collect()
}

impl ObdSession {
    fn read_dtc_mode(&mut self, mode: ObdMode) -> ObdResult<Vec<Dtc>> {
        let resp = self.request(mode as u8, None)?;
        let dtcs = decode_dtcs(&resp, self.settings.max_dtcs);
        debug!("{mode} returned {} DTCs", dtcs.len());
        Ok(dtcs)
    }

    /// Reads stored (confirmed) DTCs, mode 03
    pub fn read_dtcs(&mut self) -> ObdResult<Vec<Dtc>> {
        self.read_dtc_mode(ObdMode::StoredDtcs)
    }

    /// Reads pending DTCs (detected during the current or last drive cycle), mode 07
    pub fn read_pending_dtcs(&mut self) -> ObdResult<Vec<Dtc>> {
        self.read_dtc_mode(ObdMode::PendingDtcs)
    }

    /// Reads permanent DTCs, mode 0A. These cannot be cleared with [ObdSession::clear_dtcs]
    pub fn read_permanent_dtcs(&mut self) -> ObdResult<Vec<Dtc>> {
        self.read_dtc_mode(ObdMode::PermanentDtcs)
    }

    /// Clears stored DTCs and freeze frame data, mode 04.
    /// Succeeds once an ECU echoes a positive response
    pub fn clear_dtcs(&mut self) -> ObdResult<()> {
        self.request(ObdMode::ClearDtcs as u8, None)?;
        info!("DTCs cleared");
        Ok(())
    }
}
