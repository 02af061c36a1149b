/// Output Command Handler
///
/// Single-channel commands are read-modify-write cycles on the one output byte
/// that holds the channel. The session lock is held for the whole cycle, which
/// serializes commands against each other and against the sync loop's reads.
use super::{error::IoError, SharedSession};
use crate::protocol::{
    bitfield,
    channel::{Channel, DigitalArea, AREA_BYTES},
};

#[derive(Clone)]
pub struct OutputCommandHandler {
    session: SharedSession,
}

impl OutputCommandHandler {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }

    /// Force `channel` to `value`, leaving its seven siblings as they are on the device.
    pub async fn set_channel(&self, channel: Channel, value: bool) -> Result<(), IoError> {
        self.modify(channel, |byte| bitfield::encode(byte, channel.bit(), value))
            .await
    }

    pub async fn toggle_channel(&self, channel: Channel) -> Result<(), IoError> {
        self.modify(channel, |byte| bitfield::toggle(byte, channel.bit()))
            .await
    }

    /// Write every output byte at once; no read needed since all bits change.
    pub async fn set_all_outputs(&self, value: bool) -> Result<(), IoError> {
        let fill = if value { 0xFF } else { 0x00 };
        let image = [fill; AREA_BYTES as usize];
        self.session
            .lock()
            .await
            .write_area(DigitalArea::Outputs, 0, &image)
            .await?;
        log::info!("All outputs {}", if value { "ON" } else { "OFF" });
        Ok(())
    }

    async fn modify<F>(&self, channel: Channel, update: F) -> Result<(), IoError>
    where
        F: FnOnce(u8) -> u8 + Send,
    {
        let area = channel.area();
        if !area.is_writable() {
            return Err(IoError::ReadOnlyArea { area });
        }
        let offset = u16::from(channel.byte());

        let mut session = self.session.lock().await;
        let old = session
            .read_area(area, offset, 1)
            .await?
            .first()
            .copied()
            .ok_or_else(|| IoError::DeviceFault {
                reason: format!("empty read of {area} byte {offset}"),
            })?;
        let new = update(old);
        session.write_area(area, offset, &[new]).await?;
        drop(session);

        log::info!(
            "{channel} -> {} (byte {offset}: 0x{old:02X} -> 0x{new:02X})",
            u8::from(bitfield::decode(new, channel.bit()))
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{link::Endpoint, session::Session, sim::SimulatedPlc};
    use std::{sync::Arc, time::Duration};
    use tokio::sync::Mutex;

    async fn handler(plc: &SimulatedPlc) -> anyhow::Result<OutputCommandHandler> {
        let mut session = Session::new(Arc::new(plc.clone()));
        session.connect(Endpoint::new("sim", 0, 1)).await?;
        Ok(OutputCommandHandler::new(Arc::new(Mutex::new(session))))
    }

    #[tokio::test]
    async fn test_set_channel_preserves_siblings() -> anyhow::Result<()> {
        let plc = SimulatedPlc::new();
        plc.set_outputs([0b1010_0001, 0x3C]);
        let handler = handler(&plc).await?;

        handler.set_channel("Q0.3".parse()?, true).await?;
        assert_eq!(plc.outputs(), [0b1010_1001, 0x3C]);

        handler.set_channel("Q0.7".parse()?, false).await?;
        assert_eq!(plc.outputs(), [0b0010_1001, 0x3C]);

        handler.set_channel("Q1.2".parse()?, true).await?;
        assert_eq!(plc.outputs(), [0b0010_1001, 0x3C]);
        Ok(())
    }

    #[tokio::test]
    async fn test_toggle_twice_restores() -> anyhow::Result<()> {
        let plc = SimulatedPlc::new();
        plc.set_outputs([0x5A, 0xA5]);
        let handler = handler(&plc).await?;

        let channel: Channel = "Q1.6".parse()?;
        handler.toggle_channel(channel).await?;
        assert_eq!(plc.outputs(), [0x5A, 0xE5]);
        handler.toggle_channel(channel).await?;
        assert_eq!(plc.outputs(), [0x5A, 0xA5]);
        Ok(())
    }

    #[tokio::test]
    async fn test_input_channels_are_rejected_before_device_call() -> anyhow::Result<()> {
        let plc = SimulatedPlc::new();
        let handler = handler(&plc).await?;

        let err = handler
            .set_channel("I0.0".parse()?, true)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            IoError::ReadOnlyArea {
                area: DigitalArea::Inputs
            }
        );
        assert_eq!(plc.read_count() + plc.write_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_set_all_outputs_ignores_prior_state() -> anyhow::Result<()> {
        let plc = SimulatedPlc::new();
        plc.set_outputs([0x12, 0x34]);
        let handler = handler(&plc).await?;

        handler.set_all_outputs(true).await?;
        assert_eq!(plc.outputs(), [0xFF, 0xFF]);
        handler.set_all_outputs(false).await?;
        assert_eq!(plc.outputs(), [0x00, 0x00]);
        assert_eq!(plc.read_count(), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commands_on_one_byte_do_not_lose_updates() -> anyhow::Result<()> {
        let plc = SimulatedPlc::new();
        plc.set_latency(Duration::from_millis(2));
        let handler = handler(&plc).await?;

        let mut tasks = Vec::new();
        for bit in 0..8 {
            let handler = handler.clone();
            let channel = Channel::new(DigitalArea::Outputs, 0, bit)
                .ok_or_else(|| anyhow::anyhow!("bad channel"))?;
            tasks.push(tokio::spawn(async move {
                handler.set_channel(channel, true).await
            }));
        }
        for task in tasks {
            task.await??;
        }
        assert_eq!(plc.outputs(), [0xFF, 0x00]);
        Ok(())
    }
}
