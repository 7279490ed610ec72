pub const CHUNK_SIZE_2D: u32 = 256;
pub const CHUNK_SIZE_3D: u32 = 32;

pub const DEFAULT_BASE_URL: &str = "https://pixelplanet.fun";
pub const DEFAULT_WS_URL: &str = "wss://pixelplanet.fun/ws";
pub const DEFAULT_USER_AGENT: &str = "pixelplanet-client/0.1";

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_VERDICT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;
pub const PIXEL_CHANGE_BUFFER: usize = 1024;

pub const REGISTER_CANVAS_FRAME_SIZE: usize = 2;
pub const CHUNK_FRAME_SIZE: usize = 3;
pub const PIXEL_FRAME_SIZE: usize = 7;
pub const VERDICT_FRAME_SIZE: usize = 8;

pub mod opcodes {
    pub const REGISTER_CANVAS: u8 = 0xA0;
    pub const REGISTER_CHUNK: u8 = 0xA1;
    pub const DEREGISTER_CHUNK: u8 = 0xA2;
    pub const CHANGED_ME: u8 = 0xA6;
    pub const ONLINE_COUNTER: u8 = 0xA7;

    /// Used in both directions: placement requests and change broadcasts.
    pub const PIXEL_UPDATE: u8 = 0xC1;
    pub const COOLDOWN: u8 = 0xC2;
    pub const PIXEL_RETURN: u8 = 0xC3;
}
