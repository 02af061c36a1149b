/// In-memory device used by `--simulate` and by the test suites
///
/// A [`SimulatedPlc`] owns two 2-byte process images and hands out links that
/// read and write them directly. Faults can be switched on at any time to
/// exercise the error paths of the session, sync loop and command handler.
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};

use super::{
    error::ConnError,
    link::{Connector, DeviceLink, Endpoint, LinkError},
};
use crate::protocol::{
    channel::{DigitalArea, AREA_BYTES},
    shadow::AreaImage,
};

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    refuse_connect: bool,
    connect_timeout: bool,
    reject_reads: bool,
    reject_writes: bool,
    break_transport: bool,
    fail_close: bool,
}

#[derive(Debug, Default)]
struct State {
    inputs: AreaImage,
    outputs: AreaImage,
    faults: Faults,
    latency: Duration,
    opens: usize,
    reads: usize,
    writes: usize,
    closes: usize,
}

impl State {
    fn image_mut(&mut self, area: DigitalArea) -> &mut AreaImage {
        match area {
            DigitalArea::Inputs => &mut self.inputs,
            DigitalArea::Outputs => &mut self.outputs,
        }
    }
}

/// Shared handle to a simulated device; clones see the same memory.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPlc {
    state: Arc<Mutex<State>>,
}

impl SimulatedPlc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_inputs(&self, image: AreaImage) {
        self.state.lock().inputs = image;
    }

    pub fn set_outputs(&self, image: AreaImage) {
        self.state.lock().outputs = image;
    }

    pub fn inputs(&self) -> AreaImage {
        self.state.lock().inputs
    }

    pub fn outputs(&self) -> AreaImage {
        self.state.lock().outputs
    }

    /// Delay applied to every read and write.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    pub fn refuse_connections(&self, on: bool) {
        self.state.lock().faults.refuse_connect = on;
    }

    pub fn time_out_connections(&self, on: bool) {
        self.state.lock().faults.connect_timeout = on;
    }

    pub fn reject_reads(&self, on: bool) {
        self.state.lock().faults.reject_reads = on;
    }

    pub fn reject_writes(&self, on: bool) {
        self.state.lock().faults.reject_writes = on;
    }

    /// Make every open link fail with a transport error.
    pub fn break_transport(&self, on: bool) {
        self.state.lock().faults.break_transport = on;
    }

    pub fn fail_close(&self, on: bool) {
        self.state.lock().faults.fail_close = on;
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }
}

#[async_trait]
impl Connector for SimulatedPlc {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn DeviceLink>, ConnError> {
        endpoint.validate()?;
        let faults = {
            let mut state = self.state.lock();
            state.opens += 1;
            state.faults
        };
        if faults.connect_timeout {
            return Err(ConnError::Timeout {
                host: endpoint.host.clone(),
                timeout_ms: 0,
            });
        }
        if faults.refuse_connect {
            return Err(ConnError::Refused {
                host: endpoint.host.clone(),
                reason: "simulated device is offline".to_string(),
            });
        }
        log::debug!("Simulated link opened for {endpoint}");
        Ok(Box::new(SimLink {
            state: self.state.clone(),
        }))
    }
}

struct SimLink {
    state: Arc<Mutex<State>>,
}

impl SimLink {
    async fn wait_latency(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn out_of_area(area: DigitalArea, offset: u16, len: u16) -> LinkError {
    LinkError::Rejected {
        reason: format!("{len} byte(s) at {offset} outside {area} (size {AREA_BYTES})"),
    }
}

#[async_trait]
impl DeviceLink for SimLink {
    async fn read_area(
        &mut self,
        area: DigitalArea,
        offset: u16,
        len: u16,
    ) -> Result<Vec<u8>, LinkError> {
        self.wait_latency().await;
        let mut state = self.state.lock();
        state.reads += 1;
        if state.faults.break_transport {
            return Err(LinkError::Transport {
                reason: "simulated connection reset".to_string(),
            });
        }
        if state.faults.reject_reads {
            return Err(LinkError::Rejected {
                reason: "simulated read refusal".to_string(),
            });
        }
        if !area.contains(offset, len) {
            return Err(out_of_area(area, offset, len));
        }
        let start = offset as usize;
        Ok(state.image_mut(area)[start..start + len as usize].to_vec())
    }

    async fn write_area(
        &mut self,
        area: DigitalArea,
        offset: u16,
        data: &[u8],
    ) -> Result<(), LinkError> {
        self.wait_latency().await;
        let mut state = self.state.lock();
        state.writes += 1;
        if state.faults.break_transport {
            return Err(LinkError::Transport {
                reason: "simulated connection reset".to_string(),
            });
        }
        if state.faults.reject_writes {
            return Err(LinkError::Rejected {
                reason: "simulated write refusal".to_string(),
            });
        }
        let len = data.len() as u16;
        if !area.contains(offset, len) {
            return Err(out_of_area(area, offset, len));
        }
        let start = offset as usize;
        state.image_mut(area)[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        state.closes += 1;
        if state.faults.fail_close {
            return Err(LinkError::Transport {
                reason: "simulated release failure".to_string(),
            });
        }
        Ok(())
    }
}
