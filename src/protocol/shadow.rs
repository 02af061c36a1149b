use std::collections::BTreeMap;

use super::{
    bitfield,
    channel::{Channel, DigitalArea, AREA_BYTES},
};

/// Raw process image of one digital area.
pub type AreaImage = [u8; AREA_BYTES as usize];

/// Local copy of the device's digital I/O state, one entry per channel.
///
/// A shadow is immutable once built; the sync loop publishes a fresh one per
/// successful poll and readers hold it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoShadow {
    channels: BTreeMap<Channel, bool>,
}

impl Default for IoShadow {
    fn default() -> Self {
        Self::decode(&[0; 2], &[0; 2])
    }
}

impl IoShadow {
    /// Decode both area images into the 32-channel map.
    pub fn decode(inputs: &AreaImage, outputs: &AreaImage) -> Self {
        let mut channels = BTreeMap::new();
        for (area, image) in [(DigitalArea::Inputs, inputs), (DigitalArea::Outputs, outputs)] {
            for channel in Channel::all(area) {
                let value = bitfield::read_bit(image, channel.byte() as usize, channel.bit())
                    .unwrap_or(false);
                channels.insert(channel, value);
            }
        }
        Self { channels }
    }

    pub fn get(&self, channel: &Channel) -> bool {
        self.channels.get(channel).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Channel, &bool)> {
        self.channels.iter()
    }

    /// Re-pack one area into its byte image.
    pub fn image(&self, area: DigitalArea) -> AreaImage {
        let mut image = [0u8; AREA_BYTES as usize];
        for (channel, value) in self.channels.iter().filter(|(c, _)| c.area() == area) {
            bitfield::write_bit(&mut image, channel.byte() as usize, channel.bit(), *value);
        }
        image
    }

    /// Flat `name -> 0|1` map of one area, as carried by the telemetry payload.
    pub fn flat_map(&self, area: DigitalArea) -> BTreeMap<String, u8> {
        self.channels
            .iter()
            .filter(|(c, _)| c.area() == area)
            .map(|(c, v)| (c.to_string(), u8::from(*v)))
            .collect()
    }
}
