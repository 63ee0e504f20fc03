pub const DEFAULT_SERVER_HOST: &str = "server.deltatao.com";
pub const DEFAULT_SERVER_PORT: u16 = 5010;

pub const CLIENT_VERSION: u32 = 1353;
pub const UPGRADE_URL: &str = "https://www.deltatao.com/clanlord/";

pub const MSG_DRAW_STATE: u16 = 2;
pub const MSG_INPUT: u16 = 3;
pub const MSG_INFO_TEXT: u16 = 12;
pub const MSG_LOGON: u16 = 13;
pub const MSG_CHALLENGE: u16 = 18;
pub const MSG_IDENTIFIERS: u16 = 19;

pub const UDP_ID_PREFIX: u16 = 0xFFFF;
pub const SERVER_ID_PREFACE_SIZE: usize = 6;
pub const UDP_CONFIRM_SIZE: usize = 2;

pub const OBFUSCATE_KEY: [u8; 6] = [0x3C, 0x5A, 0x69, 0x93, 0xA5, 0xC6];
pub const OBFUSCATE_OFFSET: usize = 16;
pub const CHALLENGE_SIZE: usize = 16;

pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;
pub const MAX_DATAGRAM_SIZE: usize = 1 << 16;

pub const MAX_NAME_LEN: usize = 48;
pub const MAX_COLORS: usize = 30;
pub const MAX_DESCRIPTORS: usize = 256;
pub const POSE_DEAD: u8 = 32;
pub const PICTURE_AGAIN: u8 = 255;

pub const TICK_MS: u64 = 200;
pub const BUBBLE_LIFE_SECS: u64 = 4;
pub const BUBBLE_LIFE_FRAMES: u64 = (1000 / TICK_MS) * BUBBLE_LIFE_SECS;

pub const READ_TIMEOUT_SECONDS: u64 = 1;
pub const CONNECT_TIMEOUT_SECONDS: u64 = 10;
pub const STALL_TIMEOUT_MS: u64 = 2000;
pub const INTERVAL_BUCKET_MS: u64 = 10;
pub const LATENCY_LEAD_PERCENT: u64 = 80;

pub const MOVIE_SIGNATURE: u32 = 0xDEAD_BEEF;
pub const MOVIE_HEADER_SIZE: u16 = 24;
pub const MOVIE_FRAME_HEADER_SIZE: usize = 12;
pub const MOVIE_MIN_VERSION: u16 = 193;
pub const MOVIE_LEGACY_SCALE_THRESHOLD: u16 = 50000;
pub const MOVIE_VERSION: u16 = 197;
pub const MOBILE_LAYOUT_MIN_VERSION: u32 = 80;

pub(crate) const CLIENT_SOCKET_RECV_BUF_SIZE: usize = 256 * 1024;
pub(crate) const CLIENT_SOCKET_SEND_BUF_SIZE: usize = 64 * 1024;
