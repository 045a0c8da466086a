//! Simulation hardware for unit testing the OBD layer without a CAN bus

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use log::debug;

use crate::channel::{
    AcceptanceFilter, CanFrame, CanTransport, ErrorFlags, TransportConfig, TransportError,
    TransportResult,
};

use super::{Clock, Deadline, TransportCapabilities};

/// Clock whose time only moves when something waits on it.
///
/// Clones share the same time, so a transport and a session can be handed one clone each.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    now: Arc<AtomicU64>,
}

impl SimulatedClock {
    /// Clock starting at 0ms
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward by `ms`
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance(ms as u64)
    }
}

const SIM_CAPABILITIES: TransportCapabilities = TransportCapabilities {
    name: "Simulated ECU",
    first_filter_slot: 0,
    last_filter_slot: 15,
    masks: 0,
    tx_buffers: 1,
    rx_buffers: 16,
    extended_ids: true,
    loopback: false,
};

/// Default physical response identifier of the simulated ECU
pub const SIM_ECU_RESPONSE_ID: u32 = 0x7E8;

/// A [CanTransport] that plays the part of one or more ECUs.
///
/// Requests are matched on their single frame service bytes (the payload after the length byte),
/// and the registered frames are queued for [CanTransport::receive] after the configured latency.
#[derive(Debug, Clone)]
pub struct SimulatedEcu {
    clock: SimulatedClock,
    req_resp_map: Arc<RwLock<HashMap<Vec<u8>, Vec<CanFrame>>>>,
    rx_queue: Arc<RwLock<VecDeque<(u64, CanFrame)>>>,
    sent: Arc<RwLock<Vec<CanFrame>>>,
    filters: Arc<RwLock<Vec<Option<AcceptanceFilter>>>>,
    error_flags: Arc<RwLock<ErrorFlags>>,
    latency_ms: u64,
    initialized: bool,
}

impl SimulatedEcu {
    /// Creates an ECU that waits on `clock`
    pub fn new(clock: SimulatedClock) -> Self {
        Self {
            clock,
            req_resp_map: Arc::new(RwLock::new(HashMap::new())),
            rx_queue: Arc::new(RwLock::new(VecDeque::new())),
            sent: Arc::new(RwLock::new(Vec::new())),
            filters: Arc::new(RwLock::new(vec![None; SIM_CAPABILITIES.last_filter_slot as usize + 1])),
            error_flags: Arc::new(RwLock::new(ErrorFlags::empty())),
            latency_ms: 0,
            initialized: false,
        }
    }

    /// Answers `req` (service bytes, e.g. `[0x01, 0x0C]`) with a single frame carrying
    /// `resp` from [SIM_ECU_RESPONSE_ID]. Unused payload bytes are padded with 0x55
    pub fn add_response(&mut self, req: &[u8], resp: &[u8]) {
        let mut payload = [0x55u8; 8];
        let len = resp.len().min(7);
        payload[0] = len as u8;
        payload[1..1 + len].copy_from_slice(&resp[..len]);
        if let Ok(frame) = CanFrame::new_standard(SIM_ECU_RESPONSE_ID, &payload) {
            self.add_raw_response(req, frame);
        }
    }

    /// Answers `req` with an arbitrary frame. Several frames may be registered for one request,
    /// they are delivered in the order they were added
    pub fn add_raw_response(&mut self, req: &[u8], frame: CanFrame) {
        self.req_resp_map
            .write()
            .unwrap()
            .entry(req.to_vec())
            .or_default()
            .push(frame);
    }

    /// Queues an unsolicited frame, as if another node transmitted it
    pub fn push_frame(&mut self, frame: CanFrame) {
        let now = self.clock.now_ms();
        self.rx_queue.write().unwrap().push_back((now, frame));
    }

    /// Delay between a request and its response frames
    pub fn set_latency_ms(&mut self, ms: u64) {
        self.latency_ms = ms;
    }

    /// Error state reported by [CanTransport::error_status]
    pub fn set_error_flags(&mut self, flags: ErrorFlags) {
        *self.error_flags.write().unwrap() = flags;
    }

    /// Every frame transmitted so far
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.sent.read().unwrap().clone()
    }

    /// Drops all registered responses and pending frames
    pub fn clear_map(&mut self) {
        self.req_resp_map.write().unwrap().clear();
        self.rx_queue.write().unwrap().clear();
    }

    fn accepted(&self, frame: &CanFrame) -> bool {
        let filters = self.filters.read().unwrap();
        let mut configured = filters.iter().flatten().peekable();
        configured.peek().is_none() || configured.any(|f| f.matches(frame))
    }

    fn ensure_initialized(&self) -> TransportResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(TransportError::NotInitialized)
        }
    }
}

impl CanTransport for SimulatedEcu {
    fn init(&mut self, _config: &TransportConfig) -> TransportResult<()> {
        self.initialized = true;
        Ok(())
    }

    fn transmit(&mut self, frame: &CanFrame) -> TransportResult<()> {
        self.ensure_initialized()?;
        frame.validate()?;
        self.sent.write().unwrap().push(*frame);
        let data = frame.data();
        let Some((&len, rest)) = data.split_first() else {
            return Ok(());
        };
        let len = (len as usize).min(rest.len());
        let ready_at = self.clock.now_ms() + self.latency_ms;
        if let Some(responses) = self.req_resp_map.read().unwrap().get(&rest[..len]) {
            debug!("Simulated ECU answering {:02X?} with {} frame(s)", &rest[..len], responses.len());
            let mut queue = self.rx_queue.write().unwrap();
            queue.extend(responses.iter().map(|f| (ready_at, *f)));
        }
        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> TransportResult<CanFrame> {
        self.ensure_initialized()?;
        let deadline = Deadline::after(&self.clock, timeout_ms);
        loop {
            let now = self.clock.now_ms();
            let next = {
                let mut queue = self.rx_queue.write().unwrap();
                match queue.front() {
                    Some((ready_at, _)) if *ready_at <= now => queue.pop_front().map(|(_, f)| f),
                    _ => None,
                }
            };
            match next {
                Some(frame) if self.accepted(&frame) => return Ok(frame),
                Some(_) => continue,
                None => {}
            }
            if deadline.expired(&self.clock) {
                return Err(TransportError::Timeout);
            }
            self.clock.delay_ms(1);
        }
    }

    fn configure_filter(&mut self, slot: u8, filter: &AcceptanceFilter) -> TransportResult<()> {
        if !SIM_CAPABILITIES.is_valid_filter_slot(slot) {
            return Err(TransportError::InvalidSlot(slot));
        }
        filter.validate()?;
        self.filters.write().unwrap()[slot as usize] = Some(*filter);
        Ok(())
    }

    fn error_status(&mut self) -> ErrorFlags {
        *self.error_flags.read().unwrap()
    }

    fn reset(&mut self) {
        self.initialized = false;
        self.rx_queue.write().unwrap().clear();
        self.filters.write().unwrap().iter_mut().for_each(|f| *f = None);
    }

    fn capabilities(&self) -> &TransportCapabilities {
        &SIM_CAPABILITIES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ecu() -> (SimulatedEcu, SimulatedClock) {
        let clock = SimulatedClock::new();
        let mut ecu = SimulatedEcu::new(clock.clone());
        ecu.init(&TransportConfig::default()).unwrap();
        (ecu, clock)
    }

    #[test]
    fn answers_registered_request() {
        let (mut ecu, _) = ecu();
        ecu.add_response(&[0x01, 0x0D], &[0x41, 0x0D, 0x32]);
        let req = CanFrame::new_standard(0x7DF, &[0x02, 0x01, 0x0D, 0, 0, 0, 0, 0]).unwrap();
        ecu.transmit(&req).unwrap();
        let resp = ecu.receive(0).unwrap();
        assert_eq!(resp.id(), SIM_ECU_RESPONSE_ID);
        assert_eq!(&resp.data()[..4], &[0x03, 0x41, 0x0D, 0x32]);
        assert_eq!(ecu.sent_frames(), vec![req]);
    }

    #[test]
    fn latency_is_waited_out_on_the_clock() {
        let (mut ecu, clock) = ecu();
        ecu.set_latency_ms(30);
        ecu.add_response(&[0x01, 0x05], &[0x41, 0x05, 0x7B]);
        ecu.transmit(&CanFrame::new_standard(0x7DF, &[0x02, 0x01, 0x05]).unwrap())
            .unwrap();
        assert_eq!(ecu.receive(10), Err(TransportError::Timeout));
        assert!(ecu.receive(50).is_ok());
        assert_eq!(clock.now_ms(), 30);
    }

    #[test]
    fn filters_drop_other_frames() {
        let (mut ecu, _) = ecu();
        ecu.configure_filter(0, &AcceptanceFilter::obd_responses())
            .unwrap();
        ecu.push_frame(CanFrame::new_standard(0x100, &[1]).unwrap());
        ecu.push_frame(CanFrame::new_standard(0x7E9, &[2]).unwrap());
        assert_eq!(ecu.receive(0).unwrap().id(), 0x7E9);
    }

    #[test]
    fn requires_init() {
        let mut ecu = SimulatedEcu::new(SimulatedClock::new());
        assert_eq!(ecu.receive(0), Err(TransportError::NotInitialized));
    }
}
