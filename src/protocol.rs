use anyhow::{Result, bail};

use crate::{
    canvas::ChunkCoord,
    constants::{
        CHUNK_FRAME_SIZE, PIXEL_FRAME_SIZE, REGISTER_CANVAS_FRAME_SIZE, VERDICT_FRAME_SIZE,
        opcodes,
    },
};

/// Server verdict on a placement attempt, wire values 0..=11.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    Success,
    InvalidCanvas,
    InvalidCoordinateX,
    InvalidCoordinateY,
    InvalidCoordinateZ,
    InvalidColor,
    RegisteredUsersOnly,
    NotEnoughPlacedForThisCanvas,
    ProtectedPixel,
    IpOverused,
    Captcha,
    ProxyDetected,
}

impl ReturnCode {
    pub fn is_success(self) -> bool {
        self == ReturnCode::Success
    }
}

impl TryFrom<u8> for ReturnCode {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => ReturnCode::Success,
            1 => ReturnCode::InvalidCanvas,
            2 => ReturnCode::InvalidCoordinateX,
            3 => ReturnCode::InvalidCoordinateY,
            4 => ReturnCode::InvalidCoordinateZ,
            5 => ReturnCode::InvalidColor,
            6 => ReturnCode::RegisteredUsersOnly,
            7 => ReturnCode::NotEnoughPlacedForThisCanvas,
            8 => ReturnCode::ProtectedPixel,
            9 => ReturnCode::IpOverused,
            10 => ReturnCode::Captcha,
            11 => ReturnCode::ProxyDetected,
            other => bail!("Unknown return code: {}", other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementVerdict {
    pub return_code: ReturnCode,
    pub wait_seconds: u32,
    pub cooldown_seconds: i16,
}

/// Chunk-relative pixel change, as carried by a `PIXEL_UPDATE` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelUpdate {
    pub chunk: ChunkCoord,
    pub sub_z: u8,
    pub sub_y: u8,
    pub sub_x: u8,
    pub color: u8,
}

impl PixelUpdate {
    pub fn new(chunk: ChunkCoord, offset: u32, color: u8) -> Self {
        let [_, sub_z, sub_y, sub_x] = offset.to_be_bytes();
        Self {
            chunk,
            sub_z,
            sub_y,
            sub_x,
            color,
        }
    }

    /// Reassembles the in-chunk linear offset from its three bytes.
    pub fn offset(&self) -> u32 {
        u32::from_be_bytes([0, self.sub_z, self.sub_y, self.sub_x])
    }
}

/// Frames the client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFrame {
    RegisterCanvas(u8),
    RegisterChunk(ChunkCoord),
    DeRegisterChunk(ChunkCoord),
    PlacePixel(PixelUpdate),
}

impl ClientFrame {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ClientFrame::RegisterCanvas(canvas_id) => {
                let mut buf = Vec::with_capacity(REGISTER_CANVAS_FRAME_SIZE);
                buf.push(opcodes::REGISTER_CANVAS);
                buf.push(*canvas_id);
                buf
            }
            ClientFrame::RegisterChunk(chunk) => {
                encode_chunk_frame(opcodes::REGISTER_CHUNK, *chunk)
            }
            ClientFrame::DeRegisterChunk(chunk) => {
                encode_chunk_frame(opcodes::DEREGISTER_CHUNK, *chunk)
            }
            ClientFrame::PlacePixel(update) => encode_pixel_update(update),
        }
    }
}

/// Frames the client understands from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFrame {
    PixelChanged(PixelUpdate),
    PlacementVerdict(PlacementVerdict),
}

fn encode_chunk_frame(opcode: u8, chunk: ChunkCoord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CHUNK_FRAME_SIZE);
    buf.push(opcode);
    buf.push(chunk.x);
    buf.push(chunk.y);
    buf
}

fn encode_pixel_update(update: &PixelUpdate) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PIXEL_FRAME_SIZE);
    buf.push(opcodes::PIXEL_UPDATE);
    buf.push(update.chunk.x);
    buf.push(update.chunk.y);
    buf.push(update.sub_z);
    buf.push(update.sub_y);
    buf.push(update.sub_x);
    buf.push(update.color);
    buf
}

/// Decodes one inbound binary frame.
///
/// `Ok(None)` means the opcode is not one the client acts on. Errors are
/// reserved for frames whose opcode is known but whose body is malformed.
pub fn decode_server_frame(data: &[u8]) -> Result<Option<ServerFrame>> {
    let Some(&opcode) = data.first() else {
        bail!("Empty frame");
    };

    match opcode {
        opcodes::PIXEL_UPDATE => {
            if data.len() < PIXEL_FRAME_SIZE {
                bail!("Pixel update too short: {} bytes", data.len());
            }
            Ok(Some(ServerFrame::PixelChanged(PixelUpdate {
                chunk: ChunkCoord::new(data[1], data[2]),
                sub_z: data[3],
                sub_y: data[4],
                sub_x: data[5],
                color: data[6],
            })))
        }
        opcodes::PIXEL_RETURN => {
            if data.len() < VERDICT_FRAME_SIZE {
                bail!("Placement verdict too short: {} bytes", data.len());
            }
            let return_code = ReturnCode::try_from(data[1])?;
            let wait_seconds = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
            let cooldown_seconds = i16::from_be_bytes([data[6], data[7]]);

            Ok(Some(ServerFrame::PlacementVerdict(PlacementVerdict {
                return_code,
                wait_seconds,
                cooldown_seconds,
            })))
        }
        // Known server broadcasts this client has no use for.
        opcodes::CHANGED_ME | opcodes::ONLINE_COUNTER | opcodes::COOLDOWN => Ok(None),
        _ => Ok(None),
    }
}
