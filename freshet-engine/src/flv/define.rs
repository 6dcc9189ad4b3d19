pub mod tag_type {
    pub const AUDIO: u8 = 8;
    pub const VIDEO: u8 = 9;
    pub const SCRIPT_DATA: u8 = 18;
}

pub mod frame_type {
    pub const KEY_FRAME: u8 = 1;
    pub const INTER_FRAME: u8 = 2;
}

pub mod video_codec_id {
    pub const AVC: u8 = 7;
    pub const HEVC: u8 = 12;
}

pub mod avc_packet_type {
    pub const SEQ_HEADER: u8 = 0;
    pub const NALU: u8 = 1;
    pub const END_OF_SEQUENCE: u8 = 2;
}

pub mod sound_format {
    pub const AAC: u8 = 10;
}

pub mod aac_packet_type {
    pub const SEQ_HEADER: u8 = 0;
    pub const RAW: u8 = 1;
}
