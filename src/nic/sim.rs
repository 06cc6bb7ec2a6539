// BBO-RX — SIMULATED PORT
// In-memory RxPort for tests and benches. Allocates at construction and
// injection time only; buffers handed out by rx_burst stay pinned in the
// in-flight table until released, so the data pointers remain stable.

use std::collections::VecDeque;

use crate::nic::{PktHandle, RxPort, BURST_SIZE};

pub struct SimPort {
    pending: VecDeque<Box<[u8]>>,
    in_flight: Vec<Option<Box<[u8]>>>,
}

impl SimPort {
    pub fn new() -> SimPort {
        SimPort {
            pending: VecDeque::with_capacity(BURST_SIZE * 4),
            in_flight: Vec::with_capacity(BURST_SIZE * 4),
        }
    }

    /// Queue a frame for a later burst.
    pub fn inject(&mut self, frame: &[u8]) {
        self.pending.push_back(frame.to_vec().into_boxed_slice());
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.iter().filter(|f| f.is_some()).count()
    }

    fn park(&mut self, frame: Box<[u8]>) -> usize {
        for (i, slot) in self.in_flight.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(frame);
                return i;
            }
        }
        self.in_flight.push(Some(frame));
        self.in_flight.len() - 1
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl RxPort for SimPort {
    fn rx_burst(&mut self, out: &mut [PktHandle; BURST_SIZE]) -> usize {
        let mut n = 0;
        while n < BURST_SIZE {
            let Some(frame) = self.pending.pop_front() else { break };
            let len = frame.len() as u32;
            let token = self.park(frame);
            let data = self.in_flight[token]
                .as_mut()
                .map(|f| f.as_mut_ptr())
                .unwrap_or(std::ptr::null_mut());
            out[n] = PktHandle { data, len, token: token as u64 };
            n += 1;
        }
        n
    }

    fn release(&mut self, pkt: PktHandle) {
        if let Some(slot) = self.in_flight.get_mut(pkt.token as usize) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bursts_are_capped_and_buffers_recycle() {
        let mut port = SimPort::new();
        for i in 0..40u8 {
            port.inject(&[i; 60]);
        }

        let mut pkts = [PktHandle::EMPTY; BURST_SIZE];
        let n = port.rx_burst(&mut pkts);
        assert_eq!(n, BURST_SIZE);
        assert_eq!(port.pending_len(), 8);
        assert_eq!(port.in_flight_len(), BURST_SIZE);

        // First frame's bytes are visible through the handle.
        let first = unsafe { std::slice::from_raw_parts(pkts[0].data, pkts[0].len as usize) };
        assert_eq!(first, &[0u8; 60][..]);

        for pkt in pkts.iter().take(n) {
            port.release(*pkt);
        }
        assert_eq!(port.in_flight_len(), 0);

        let n = port.rx_burst(&mut pkts);
        assert_eq!(n, 8);
        assert_eq!(port.rx_burst(&mut pkts), 0);
    }
}
