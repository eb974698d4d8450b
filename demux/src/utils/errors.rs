#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err.into());
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

#[derive(thiserror::Error, Debug)]
pub enum FlvError {
    #[error("Invalid FLV header: signature {signature:02X?}, flags {flags:#04X}")]
    InvalidHeader { signature: [u8; 3], flags: u8 },

    #[error("Tag data size {0} exceeds the remaining tag")]
    TagTooShort(usize),

    #[error("Unknown AMF0 data type: {0}")]
    UnknownAmfType(u8),

    #[error("Keyframe index is not monotonic at entry {0}")]
    UnorderedKeyframes(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum OggError {
    #[error("Unsupported bit stream revision: {0}")]
    UnsupportedRevision(u8),

    #[error("Failed to determine bitstream type")]
    UnknownBitstream,

    #[error("No ogg page can be found")]
    NoPageFound,

    #[error("Page {sequence} checksum mismatch: stored {stored:#010X}, calculated {calculated:#010X}")]
    ChecksumMismatch {
        sequence: u32,
        stored: u32,
        calculated: u32,
    },

    #[error("Invalid {0} header packet")]
    InvalidHeader(&'static str),

    #[error("Vorbis setup header has no recognisable mode table")]
    MissingVorbisModes,
}

#[derive(thiserror::Error, Debug)]
pub enum Mp3Error {
    #[error("Searched too many bytes ({0}) without finding a frame sync")]
    SyncNotFound(usize),

    #[error("Lost frame sync at position {0}")]
    LostSync(u64),

    #[error("Malformed ID3 {0} frame")]
    InvalidId3Frame(&'static str),
}

#[derive(thiserror::Error, Debug)]
pub enum WavError {
    #[error("Missing RIFF/WAVE signature")]
    MissingRiffHeader,

    #[error("fmt chunk too short: {0} bytes")]
    FmtChunkTooShort(u32),

    #[error("Invalid block alignment: {block_size} (expected {expected})")]
    InvalidBlockSize { block_size: u16, expected: u32 },

    #[error("Format chunk not found")]
    MissingFmtChunk,

    #[error("Sample data chunk not found")]
    MissingDataChunk,
}

#[derive(thiserror::Error, Debug)]
pub enum RawCcError {
    #[error("Invalid raw caption header id: {0:#010X}")]
    InvalidHeaderId(u32),

    #[error("Unsupported raw caption version number: {0}")]
    UnsupportedVersion(u8),
}

#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("None of the available extractors ({0}) could read the stream")]
    UnrecognizedFormat(String),
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("The {0} stream is not seekable")]
    NotSeekable(&'static str),
}

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid AudioSpecificConfig: {0}")]
    InvalidAudioSpecificConfig(&'static str),

    #[error("Invalid AVC decoder configuration record")]
    InvalidAvcConfig,

    #[error("Invalid sequence parameter set")]
    InvalidSps,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DecoderError {
    #[error("An input buffer is already dequeued")]
    InputAlreadyDequeued,

    #[error("No input buffer has been dequeued")]
    NoDequeuedInput,

    #[error("Decoder has been released")]
    Released,
}
