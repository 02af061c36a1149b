pub mod bitfield;
pub mod channel;
pub mod s7;
pub mod shadow;

pub use channel::{Channel, ChannelParseError, DigitalArea, AREA_BYTES};
pub use shadow::{AreaImage, IoShadow};
