use std::cmp::Ordering;
use std::collections::BinaryHeap;

use anyhow::{bail, Result};

use super::pool::{BufferPool, PooledBuffer, Reusable};
use crate::output::SampleFlags;
use crate::utils::errors::DecoderError;

pub const NUM_INPUT_BUFFERS: usize = 10;
pub const NUM_OUTPUT_BUFFERS: usize = 2;

/// A caption shown on screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cue {
    pub text: String,
}

/// Turns caption samples into cues.
pub trait CueParser {
    /// Feeds the caption data of one sample.
    fn decode(&mut self, data: &[u8], time_us: i64);

    /// The cues on screen, if they changed since the last call.
    fn take_new_cues(&mut self) -> Option<Vec<Cue>>;

    fn flush(&mut self);
}

#[derive(Debug, Default)]
pub struct CaptionInputBuffer {
    pub data: Vec<u8>,
    pub time_us: i64,
    pub flags: SampleFlags,
}

impl CaptionInputBuffer {
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }

    pub fn is_decode_only(&self) -> bool {
        self.flags.contains(SampleFlags::DECODE_ONLY)
    }
}

impl Reusable for CaptionInputBuffer {
    fn clear(&mut self) {
        self.data.clear();
        self.time_us = 0;
        self.flags = SampleFlags::NONE;
    }
}

#[derive(Debug, Default)]
pub struct CaptionOutputBuffer {
    pub time_us: i64,
    pub flags: SampleFlags,
    pub cues: Vec<Cue>,
}

impl CaptionOutputBuffer {
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }
}

impl Reusable for CaptionOutputBuffer {
    fn clear(&mut self) {
        self.time_us = 0;
        self.flags = SampleFlags::NONE;
        self.cues.clear();
    }
}

/// A queued input, ordered for a min-heap on `(end of stream, time, sequence)`.
#[derive(Debug)]
struct QueuedInput {
    key: (bool, i64, u64),
    buffer: PooledBuffer<CaptionInputBuffer>,
}

impl PartialEq for QueuedInput {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for QueuedInput {}

impl PartialOrd for QueuedInput {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedInput {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key)
    }
}

/// Reorders caption samples by time and decodes them once the playback
/// position reaches them.
///
/// Inputs are dequeued one at a time, filled and queued back. Decoded cues
/// come out of [`dequeue_output`](Self::dequeue_output) in time order, never
/// ahead of the position set with [`set_position_us`](Self::set_position_us).
#[derive(Debug)]
pub struct CaptionDecoder<P> {
    parser: P,
    input_pool: BufferPool<CaptionInputBuffer>,
    output_pool: BufferPool<CaptionOutputBuffer>,
    dequeued_input: Option<PooledBuffer<CaptionInputBuffer>>,
    queued_inputs: BinaryHeap<QueuedInput>,
    next_sequence: u64,
    position_us: i64,
    released: bool,
}

impl<P: CueParser> CaptionDecoder<P> {
    pub fn new(parser: P) -> Self {
        Self {
            parser,
            input_pool: BufferPool::new(NUM_INPUT_BUFFERS),
            output_pool: BufferPool::new(NUM_OUTPUT_BUFFERS),
            dequeued_input: None,
            queued_inputs: BinaryHeap::with_capacity(NUM_INPUT_BUFFERS),
            next_sequence: 0,
            position_us: 0,
            released: false,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released {
            bail!(DecoderError::Released);
        }
        Ok(())
    }

    pub fn set_position_us(&mut self, position_us: i64) {
        self.position_us = position_us;
    }

    /// An empty input to fill, or `None` while every input is in use.
    pub fn dequeue_input(&mut self) -> Result<Option<&mut CaptionInputBuffer>> {
        self.ensure_live()?;
        if self.dequeued_input.is_some() {
            bail!(DecoderError::InputAlreadyDequeued);
        }
        let Some(buffer) = self.input_pool.acquire() else {
            return Ok(None);
        };
        Ok(Some(&mut **self.dequeued_input.insert(buffer)))
    }

    /// Queues the input returned by the last [`dequeue_input`](Self::dequeue_input).
    pub fn queue_input(&mut self) -> Result<()> {
        self.ensure_live()?;
        let Some(buffer) = self.dequeued_input.take() else {
            bail!(DecoderError::NoDequeuedInput);
        };

        if buffer.is_decode_only() && !buffer.is_end_of_stream() {
            // Decoding restarts cleanly anywhere, so skipped data never matters.
            return Ok(());
        }

        let key = (buffer.is_end_of_stream(), buffer.time_us, self.next_sequence);
        self.next_sequence += 1;
        self.queued_inputs.push(QueuedInput { key, buffer });
        Ok(())
    }

    /// The next decoded cues up to the current position, if any.
    pub fn dequeue_output(&mut self) -> Result<Option<PooledBuffer<CaptionOutputBuffer>>> {
        self.ensure_live()?;
        let Some(mut output) = self.output_pool.acquire() else {
            return Ok(None);
        };

        while let Some(head) = self.queued_inputs.peek() {
            let (end_of_stream, time_us, _) = head.key;
            if time_us > self.position_us {
                break;
            }
            let Some(QueuedInput { buffer: input, .. }) = self.queued_inputs.pop() else {
                break;
            };

            if end_of_stream {
                output.flags = SampleFlags::END_OF_STREAM;
                return Ok(Some(output));
            }

            self.parser.decode(&input.data, input.time_us);
            if let Some(cues) = self.parser.take_new_cues() {
                output.time_us = input.time_us;
                output.cues = cues;
                return Ok(Some(output));
            }
        }
        Ok(None)
    }

    /// Drops every pending input and rewinds the position to 0. Outputs
    /// already handed out stay valid.
    pub fn flush(&mut self) {
        self.position_us = 0;
        self.next_sequence = 0;
        self.dequeued_input = None;
        self.queued_inputs.clear();
        self.parser.flush();
    }

    pub fn release(&mut self) {
        self.flush();
        self.released = true;
    }

    pub fn available_inputs(&self) -> usize {
        self.input_pool.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::cea608::tests::pop_on;
    use crate::decoder::Cea608Parser;

    fn decoder() -> CaptionDecoder<Cea608Parser> {
        CaptionDecoder::new(Cea608Parser::new())
    }

    fn queue(decoder: &mut CaptionDecoder<Cea608Parser>, time_us: i64, data: &[u8], flags: SampleFlags) -> Result<()> {
        let input = decoder.dequeue_input()?.expect("free input");
        input.data.extend_from_slice(data);
        input.time_us = time_us;
        input.flags = flags;
        decoder.queue_input()
    }

    fn next_text(decoder: &mut CaptionDecoder<Cea608Parser>) -> Result<Option<(i64, String)>> {
        Ok(decoder.dequeue_output()?.map(|output| {
            let text = output.cues.iter().map(|cue| cue.text.as_str()).collect::<Vec<_>>().join("|");
            (output.time_us, text)
        }))
    }

    #[test]
    fn reorders_by_time_up_to_position() -> Result<()> {
        let mut decoder = decoder();
        queue(&mut decoder, 30, &pop_on("C"), SampleFlags::NONE)?;
        queue(&mut decoder, 10, &pop_on("A"), SampleFlags::NONE)?;
        queue(&mut decoder, 20, &pop_on("B"), SampleFlags::NONE)?;

        decoder.set_position_us(25);
        assert_eq!(next_text(&mut decoder)?, Some((10, "A".to_string())));
        assert_eq!(next_text(&mut decoder)?, Some((20, "B".to_string())));
        assert_eq!(next_text(&mut decoder)?, None);

        decoder.set_position_us(30);
        assert_eq!(next_text(&mut decoder)?, Some((30, "C".to_string())));
        assert_eq!(decoder.available_inputs(), NUM_INPUT_BUFFERS);
        Ok(())
    }

    #[test]
    fn equal_times_keep_queue_order() -> Result<()> {
        let mut decoder = decoder();
        queue(&mut decoder, 10, &pop_on("first"), SampleFlags::NONE)?;
        queue(&mut decoder, 10, &pop_on("second"), SampleFlags::NONE)?;
        decoder.set_position_us(10);

        assert_eq!(next_text(&mut decoder)?, Some((10, "first".to_string())));
        assert_eq!(next_text(&mut decoder)?, Some((10, "second".to_string())));
        Ok(())
    }

    #[test]
    fn end_of_stream_sorts_last() -> Result<()> {
        let mut decoder = decoder();
        queue(&mut decoder, 0, &[], SampleFlags::END_OF_STREAM)?;
        queue(&mut decoder, 50, &pop_on("late"), SampleFlags::NONE)?;
        queue(&mut decoder, 5, &pop_on("skipped"), SampleFlags::DECODE_ONLY)?;
        assert_eq!(decoder.available_inputs(), NUM_INPUT_BUFFERS - 2);

        decoder.set_position_us(100);
        assert_eq!(next_text(&mut decoder)?, Some((50, "late".to_string())));
        let output = decoder.dequeue_output()?.expect("end of stream");
        assert!(output.is_end_of_stream());
        Ok(())
    }

    #[test]
    fn end_of_stream_waits_for_position() -> Result<()> {
        let mut decoder = decoder();
        queue(&mut decoder, 5_000_000, &[], SampleFlags::END_OF_STREAM)?;
        assert!(decoder.dequeue_output()?.is_none());

        decoder.set_position_us(5_000_000);
        let output = decoder.dequeue_output()?.expect("end of stream");
        assert!(output.is_end_of_stream());
        Ok(())
    }

    #[test]
    fn flush_restarts_queue_order() -> Result<()> {
        let mut decoder = decoder();
        queue(&mut decoder, 10, &pop_on("dropped"), SampleFlags::NONE)?;
        decoder.flush();
        assert_eq!(decoder.next_sequence, 0);
        assert_eq!(decoder.available_inputs(), NUM_INPUT_BUFFERS);

        queue(&mut decoder, 10, &pop_on("first"), SampleFlags::NONE)?;
        queue(&mut decoder, 10, &pop_on("second"), SampleFlags::NONE)?;
        decoder.set_position_us(10);
        assert_eq!(next_text(&mut decoder)?, Some((10, "first".to_string())));
        assert_eq!(next_text(&mut decoder)?, Some((10, "second".to_string())));
        Ok(())
    }

    #[test]
    fn input_pool_exhaustion_recovers() -> Result<()> {
        let mut decoder = decoder();
        for i in 0..NUM_INPUT_BUFFERS as i64 {
            queue(&mut decoder, 1_000 + i, &pop_on("x"), SampleFlags::NONE)?;
        }
        assert!(decoder.dequeue_input()?.is_none());

        decoder.set_position_us(1_000);
        assert!(decoder.dequeue_output()?.is_some());
        assert!(decoder.dequeue_input()?.is_some());
        Ok(())
    }

    #[test]
    fn output_slots_are_bounded() -> Result<()> {
        let mut decoder = decoder();
        for (time_us, text) in [(1, "a"), (2, "b"), (3, "c")] {
            queue(&mut decoder, time_us, &pop_on(text), SampleFlags::NONE)?;
        }
        decoder.set_position_us(10);

        let first = decoder.dequeue_output()?.expect("output");
        let second = decoder.dequeue_output()?.expect("output");
        assert!(decoder.dequeue_output()?.is_none());
        drop(first);
        assert_eq!(next_text(&mut decoder)?, Some((3, "c".to_string())));
        assert_eq!(second.time_us, 2);
        Ok(())
    }

    #[test]
    fn misuse_is_reported() -> Result<()> {
        let mut decoder = decoder();
        let err = decoder.queue_input().unwrap_err();
        assert_eq!(err.downcast_ref::<DecoderError>(), Some(&DecoderError::NoDequeuedInput));

        decoder.dequeue_input()?;
        let err = decoder.dequeue_input().unwrap_err();
        assert_eq!(err.downcast_ref::<DecoderError>(), Some(&DecoderError::InputAlreadyDequeued));

        decoder.flush();
        assert!(decoder.dequeue_input()?.is_some());

        decoder.release();
        let err = decoder.dequeue_output().unwrap_err();
        assert_eq!(err.downcast_ref::<DecoderError>(), Some(&DecoderError::Released));
        Ok(())
    }
}
