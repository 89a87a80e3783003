#[cfg(test)]
#[path = "../tests/unit/header_test.rs"]
mod header_test;

use std::io::{Cursor, Write};

use crate::utils::MemoryMapper;
use anyhow::{Context, Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use jet_transformer::{ModelConfig, NUM_FEATURES, OutputHeadKind};

/// Magic number for validating checkpoint files ("jet1")
pub const CHECKPOINT_MAGIC: i32 = 0x6a657431;
/// Expected checkpoint version
pub const CHECKPOINT_VERSION: i32 = 1;
/// Size of the checkpoint header in bytes
pub const HEADER_SIZE: usize = 256;
/// Size of the config structure in bytes (11 i32 fields, 2 f32 fields)
const CONFIG_SIZE: usize = 52;

const LINEAR_HEAD_ID: i32 = 0;
const PRODUCT_HEAD_ID: i32 = 1;

/// Raw header fields as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Header {
    pub magic_number: i32,
    pub version: i32,
    pub hidden_dim: i32,
    pub num_layers: i32,
    pub num_heads: i32,
    pub num_bins: [i32; NUM_FEATURES],
    pub max_len: i32,
    pub output_head: i32,
    pub feedforward_dim: i32,
    pub dropout: f32,
    pub layer_norm_eps: f32,
}

impl Header {
    fn from_config(config: &ModelConfig) -> Result<Self> {
        let to_i32 = |name: &str, value: usize| {
            i32::try_from(value).with_context(|| format!("{name} ({value}) does not fit the checkpoint header"))
        };

        let bins = config.bins()?;
        Ok(Self {
            magic_number: CHECKPOINT_MAGIC,
            version: CHECKPOINT_VERSION,
            hidden_dim: to_i32("hidden_dim", config.hidden_dim)?,
            num_layers: to_i32("num_layers", config.num_layers)?,
            num_heads: to_i32("num_heads", config.num_heads)?,
            num_bins: [to_i32("num_bins[0]", bins[0])?, to_i32("num_bins[1]", bins[1])?, to_i32("num_bins[2]", bins[2])?],
            max_len: to_i32("max_len", config.max_len)?,
            output_head: match config.output {
                OutputHeadKind::Linear => LINEAR_HEAD_ID,
                OutputHeadKind::Product => PRODUCT_HEAD_ID,
            },
            feedforward_dim: to_i32("feedforward_dim", config.feedforward_dim())?,
            dropout: config.dropout,
            layer_norm_eps: config.layer_norm_eps,
        })
    }
}

impl TryInto<ModelConfig> for Header {
    type Error = Error;

    fn try_into(self) -> Result<ModelConfig> {
        validate_header(&self).with_context(|| "Invalid model configuration")?;

        let hidden_dim = self.hidden_dim as usize;
        let feedforward_dim = self.feedforward_dim as usize;
        let config = ModelConfig {
            hidden_dim,
            num_layers: self.num_layers as usize,
            num_heads: self.num_heads as usize,
            num_bins: self.num_bins.iter().map(|&bins| bins as usize).collect(),
            dropout: self.dropout,
            output: match self.output_head {
                LINEAR_HEAD_ID => OutputHeadKind::Linear,
                _ => OutputHeadKind::Product,
            },
            max_len: self.max_len as usize,
            feedforward_dim: (feedforward_dim != hidden_dim).then_some(feedforward_dim),
            layer_norm_eps: self.layer_norm_eps,
        };

        config.validate().with_context(|| "Invalid model configuration")?;
        Ok(config)
    }
}

/// Writes the fixed-size header describing `config`, zero padded to [`HEADER_SIZE`].
pub fn write_header<W: Write>(writer: &mut W, config: &ModelConfig) -> Result<()> {
    let header = Header::from_config(config)?;

    writer.write_i32::<LittleEndian>(header.magic_number)?;
    writer.write_i32::<LittleEndian>(header.version)?;
    writer.write_i32::<LittleEndian>(header.hidden_dim)?;
    writer.write_i32::<LittleEndian>(header.num_layers)?;
    writer.write_i32::<LittleEndian>(header.num_heads)?;
    for bins in header.num_bins {
        writer.write_i32::<LittleEndian>(bins)?;
    }
    writer.write_i32::<LittleEndian>(header.max_len)?;
    writer.write_i32::<LittleEndian>(header.output_head)?;
    writer.write_i32::<LittleEndian>(header.feedforward_dim)?;
    writer.write_f32::<LittleEndian>(header.dropout)?;
    writer.write_f32::<LittleEndian>(header.layer_norm_eps)?;

    writer.write_all(&[0u8; HEADER_SIZE - CONFIG_SIZE])?;
    Ok(())
}

/// Reads and validates the header, leaving `mapper` at the first parameter.
pub(crate) fn read_header(mapper: &mut MemoryMapper) -> Result<ModelConfig> {
    let data = mapper.get_bytes(HEADER_SIZE).with_context(|| "Checkpoint is shorter than its header")?;
    parse_header(data)
}

/// Decodes the model configuration from the first bytes of a checkpoint.
///
/// The configuration is stored as 11 consecutive i32 values followed by two
/// f32 values, all little-endian.
pub fn parse_header(data: &[u8]) -> Result<ModelConfig> {
    if data.len() < CONFIG_SIZE {
        anyhow::bail!("Insufficient data for config: need {} bytes, got {}", CONFIG_SIZE, data.len());
    }

    let mut cursor = Cursor::new(data);

    macro_rules! read_i32 {
        ($field:literal) => {
            cursor.read_i32::<LittleEndian>().with_context(|| format!("Failed to read {}", $field))?
        };
    }
    macro_rules! read_f32 {
        ($field:literal) => {
            cursor.read_f32::<LittleEndian>().with_context(|| format!("Failed to read {}", $field))?
        };
    }

    let header = Header {
        magic_number: read_i32!("magic number"),
        version: read_i32!("version"),
        hidden_dim: read_i32!("hidden dimension"),
        num_layers: read_i32!("number of layers"),
        num_heads: read_i32!("number of heads"),
        num_bins: [read_i32!("pT bins"), read_i32!("eta bins"), read_i32!("phi bins")],
        max_len: read_i32!("maximum length"),
        output_head: read_i32!("output head"),
        feedforward_dim: read_i32!("feed-forward dimension"),
        dropout: read_f32!("dropout"),
        layer_norm_eps: read_f32!("layer norm epsilon"),
    };

    header.try_into()
}

fn validate_header(header: &Header) -> Result<()> {
    match header.magic_number {
        CHECKPOINT_MAGIC => {}
        actual => anyhow::bail!("Invalid checkpoint magic number: expected {:#x}, got {:#x}", CHECKPOINT_MAGIC, actual),
    }

    match header.version {
        CHECKPOINT_VERSION => {}
        actual => anyhow::bail!("Unsupported checkpoint version: expected {}, got {}", CHECKPOINT_VERSION, actual),
    }

    let dimensions = [
        ("hidden_dim", header.hidden_dim),
        ("num_layers", header.num_layers),
        ("num_heads", header.num_heads),
        ("num_bins[0]", header.num_bins[0]),
        ("num_bins[1]", header.num_bins[1]),
        ("num_bins[2]", header.num_bins[2]),
        ("max_len", header.max_len),
        ("feedforward_dim", header.feedforward_dim),
    ];

    for (name, value) in dimensions {
        if value <= 0 {
            anyhow::bail!("Invalid {}: must be positive, got {}", name, value);
        }
    }

    if !matches!(header.output_head, LINEAR_HEAD_ID | PRODUCT_HEAD_ID) {
        anyhow::bail!("Unknown output head id: {}", header.output_head);
    }

    Ok(())
}
