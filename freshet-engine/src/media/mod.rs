pub mod define;
pub mod packet;
pub mod stream;
pub mod track;

pub use define::{CodecId, FragmentationHeader, MediaType, PacketFlag, Timebase};
pub use packet::{FrameFormat, MediaFrame, MediaPacket, SharedMediaPacket};
pub use stream::{next_stream_id, StreamIdentifier, StreamInfo, StreamSourceType};
pub use track::{ChannelLayout, MediaTrack};
