//! WavPack-style audio codec for integer sample chunks.
//!
//! Each channel of a chunk is coded independently with first-order
//! closed-loop DPCM. Prediction residuals are zigzag mapped and bit packed at
//! a fixed width per block of [`BLOCK_SIZE`] frames.
//!
//! In lossless mode the residuals are stored exactly. When a bits-per-sample
//! target is set, every block picks the smallest quantisation shift whose
//! packed residual width fits the target; the encoder tracks the decoder's
//! reconstruction so quantisation error never accumulates.
//!
//! ## Chunk layout
//!
//! - Format version (1 byte)
//! - Dtype code (1 byte)
//! - Number of channels (2 bytes, u16 LE)
//! - Number of frames (4 bytes, u32 LE)
//! - Block size (2 bytes, u16 LE)
//! - Bit stream: per channel, the first sample (32 bits), then per block:
//!   shift (6 bits), width (6 bits), then `width` bits per residual

pub mod bitpack;

use bitpack::{BitReader, BitWriter};
use serde::{Deserialize, Serialize};

use crate::recording::Dtype;

/// Frames per independently quantised block.
pub const BLOCK_SIZE: usize = 512;

/// Lowest residual width the lossy mode will target.
pub const MIN_BPS: f64 = 2.0;

const FORMAT_VERSION: u8 = 0x01;
const HEADER_LEN: usize = 10;
const SHIFT_BITS: usize = 6;
const WIDTH_BITS: usize = 6;
const MAX_SHIFT: u32 = 32;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid bits per sample: {0} (must be a positive finite number)")]
    InvalidBps(f64),
    #[error("unknown codec id: {0}")]
    UnknownCodec(String),
    #[error("invalid chunk shape: {0}")]
    InvalidShape(String),
    #[error("unsupported chunk format version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid encoded data: {0}")]
    InvalidData(String),
    #[error("buffer overflow: attempted to access {attempted} bits, only {available} available")]
    BufferOverflow { attempted: usize, available: usize },
    #[error("bit width {0} exceeds maximum of 32")]
    BitWidthExceeded(usize),
    #[error("unsupported block size {0} (expected {BLOCK_SIZE})")]
    UnsupportedBlockSize(usize),
}

/// Serialised codec description stored next to the chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecConfig {
    pub id: String,
    #[serde(default)]
    pub bps: Option<f64>,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

fn default_block_size() -> usize {
    BLOCK_SIZE
}

/// Shape fields of an encoded chunk, checked against the payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub dtype: Dtype,
    pub num_channels: usize,
    pub num_frames: usize,
}

/// A chunk of interleaved frames recovered by [`WavPackCodec::decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChunk {
    pub frames: Vec<i32>,
    pub num_channels: usize,
    pub dtype: Dtype,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavPackCodec {
    bps: Option<f64>,
}

impl WavPackCodec {
    pub const ID: &'static str = "wavpack";

    /// Build a codec for the given bits-per-sample target. `None` is lossless.
    pub fn new(bps: Option<f64>) -> Result<Self, CodecError> {
        if let Some(bps) = bps {
            if !bps.is_finite() || bps <= 0.0 {
                return Err(CodecError::InvalidBps(bps));
            }
        }
        Ok(Self { bps })
    }

    pub fn lossless() -> Self {
        Self { bps: None }
    }

    pub fn config(&self) -> CodecConfig {
        CodecConfig {
            id: Self::ID.to_string(),
            bps: self.bps,
            block_size: BLOCK_SIZE,
        }
    }

    pub fn from_config(config: &CodecConfig) -> Result<Self, CodecError> {
        if config.id != Self::ID {
            return Err(CodecError::UnknownCodec(config.id.clone()));
        }
        if config.block_size != BLOCK_SIZE {
            return Err(CodecError::UnsupportedBlockSize(config.block_size));
        }
        Self::new(config.bps)
    }

    fn target_width(&self) -> Option<usize> {
        self.bps.map(|bps| bps.max(MIN_BPS).floor() as usize)
    }

    /// Encode interleaved frames (`frame * num_channels + channel`).
    pub fn encode(
        &self,
        frames: &[i32],
        num_channels: usize,
        dtype: Dtype,
    ) -> Result<Vec<u8>, CodecError> {
        if num_channels == 0 || num_channels > u16::MAX as usize {
            return Err(CodecError::InvalidShape(format!(
                "{} channels",
                num_channels
            )));
        }
        if frames.len() % num_channels != 0 {
            return Err(CodecError::InvalidShape(format!(
                "{} samples do not divide into {} channels",
                frames.len(),
                num_channels
            )));
        }
        let num_frames = frames.len() / num_channels;
        if num_frames > u32::MAX as usize {
            return Err(CodecError::InvalidShape(format!("{} frames", num_frames)));
        }

        let mut out = Vec::with_capacity(HEADER_LEN + frames.len() * dtype.itemsize());
        out.push(FORMAT_VERSION);
        out.push(dtype.code());
        out.extend_from_slice(&(num_channels as u16).to_le_bytes());
        out.extend_from_slice(&(num_frames as u32).to_le_bytes());
        out.extend_from_slice(&(BLOCK_SIZE as u16).to_le_bytes());

        let (lo, hi) = dtype.range();
        let mut writer = BitWriter::with_capacity(frames.len() * dtype.itemsize());
        let mut column = Vec::with_capacity(num_frames);
        let mut residuals = Vec::with_capacity(BLOCK_SIZE);

        for channel in 0..num_channels {
            column.clear();
            column.extend(
                frames
                    .iter()
                    .skip(channel)
                    .step_by(num_channels)
                    .map(|&v| (v as i64).clamp(lo, hi)),
            );

            // First sample is stored verbatim and seeds the predictor.
            let Some(&first) = column.first() else {
                continue;
            };
            writer.write(first as i32 as u32, bitpack::MAX_BITS)?;

            let mut pred = first;
            for block in column.chunks(BLOCK_SIZE) {
                let (shift, width, last) = self.quantize_block(block, pred, lo, hi, &mut residuals);
                writer.write(shift, SHIFT_BITS)?;
                writer.write(width as u32, WIDTH_BITS)?;
                for &residual in &residuals {
                    writer.write_wide(residual, width)?;
                }
                pred = last;
            }
        }

        out.extend(writer.into_vec());
        Ok(out)
    }

    fn quantize_block(
        &self,
        block: &[i64],
        pred: i64,
        lo: i64,
        hi: i64,
        residuals: &mut Vec<u64>,
    ) -> (u32, usize, i64) {
        let target = self.target_width();
        let mut shift = 0;
        loop {
            let (width, last) = dpcm(block, pred, shift, lo, hi, residuals);
            let fits = target.map_or(true, |target| width <= target);
            if fits || shift == MAX_SHIFT {
                return (shift, width, last);
            }
            shift += 1;
        }
    }

    /// Parse and sanity check a chunk header without decoding the payload.
    pub fn read_header(&self, bytes: &[u8]) -> Result<ChunkHeader, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::InvalidData(format!(
                "chunk of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        if bytes[0] != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(bytes[0]));
        }
        let dtype = Dtype::from_code(bytes[1])
            .ok_or_else(|| CodecError::InvalidData(format!("unknown dtype code {}", bytes[1])))?;
        let num_channels = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        let num_frames = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let block_size = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        if num_channels == 0 {
            return Err(CodecError::InvalidData("zero channels".into()));
        }
        if block_size != BLOCK_SIZE {
            return Err(CodecError::UnsupportedBlockSize(block_size));
        }

        // every channel carries a seed sample and a shift/width pair per block
        let num_blocks = num_frames.div_ceil(BLOCK_SIZE);
        let min_bits = if num_frames == 0 {
            Some(0)
        } else {
            num_blocks
                .checked_mul(SHIFT_BITS + WIDTH_BITS)
                .and_then(|bits| bits.checked_add(bitpack::MAX_BITS))
                .and_then(|bits| bits.checked_mul(num_channels))
        };
        let available = (bytes.len() - HEADER_LEN) * 8;
        match min_bits {
            Some(bits) if bits <= available => {}
            _ => {
                return Err(CodecError::InvalidData(format!(
                    "{} frames x {} channels do not fit in {} payload bits",
                    num_frames, num_channels, available
                )))
            }
        }
        if num_frames.checked_mul(num_channels).is_none() {
            return Err(CodecError::InvalidData("chunk shape overflows".into()));
        }

        Ok(ChunkHeader {
            dtype,
            num_channels,
            num_frames,
        })
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedChunk, CodecError> {
        let ChunkHeader {
            dtype,
            num_channels,
            num_frames,
        } = self.read_header(bytes)?;

        let (lo, hi) = dtype.range();
        let mut reader = BitReader::new(&bytes[HEADER_LEN..]);
        let mut frames = vec![0i32; num_frames * num_channels];

        for channel in 0..num_channels {
            if num_frames == 0 {
                break;
            }
            let mut pred = reader.read(bitpack::MAX_BITS)? as i32 as i64;
            for block_start in (0..num_frames).step_by(BLOCK_SIZE) {
                let block_len = BLOCK_SIZE.min(num_frames - block_start);
                let shift = reader.read(SHIFT_BITS)?;
                let width = reader.read(WIDTH_BITS)? as usize;
                if shift > MAX_SHIFT {
                    return Err(CodecError::InvalidData(format!("shift {} out of range", shift)));
                }
                for i in 0..block_len {
                    let q = unzigzag(reader.read_wide(width)?);
                    let recon = q
                        .checked_mul(1i64 << shift)
                        .and_then(|step| pred.checked_add(step))
                        .ok_or_else(|| {
                            CodecError::InvalidData(format!(
                                "residual {} << {} overflows",
                                q, shift
                            ))
                        })?
                        .clamp(lo, hi);
                    frames[(block_start + i) * num_channels + channel] = recon as i32;
                    pred = recon;
                }
            }
        }

        Ok(DecodedChunk {
            frames,
            num_channels,
            dtype,
        })
    }
}

/// Closed-loop quantised prediction of one block. Returns the packed width and
/// the last reconstructed sample.
fn dpcm(
    block: &[i64],
    mut pred: i64,
    shift: u32,
    lo: i64,
    hi: i64,
    residuals: &mut Vec<u64>,
) -> (usize, i64) {
    residuals.clear();
    let half = (1i64 << shift) >> 1;
    let mut max_zz = 0u64;
    for &x in block {
        let r = x - pred;
        let q = if r >= 0 {
            (r + half) >> shift
        } else {
            -((-r + half) >> shift)
        };
        pred = (pred + (q << shift)).clamp(lo, hi);
        let zz = zigzag(q);
        max_zz = max_zz.max(zz);
        residuals.push(zz);
    }
    (bit_width(max_zz), pred)
}

#[inline]
fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

#[inline]
fn bit_width(v: u64) -> usize {
    (u64::BITS - v.leading_zeros()) as usize
}
