//! Buffer pools and the caption decode pipeline.
//!
//! A decoder owns a fixed number of input and output buffers. Callers fill
//! inputs, queue them back, and collect outputs as playback advances. Running
//! out of buffers is a normal condition: the call returns `None` and the
//! caller retries once it has released something.

pub mod captions;
pub mod cea608;
pub mod pool;

pub use captions::{CaptionDecoder, CaptionInputBuffer, CaptionOutputBuffer, Cue, CueParser};
pub use cea608::Cea608Parser;
pub use pool::{BufferPool, PooledBuffer, Reusable};
