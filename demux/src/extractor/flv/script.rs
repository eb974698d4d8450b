//! AMF0 script data, used for the `onMetaData` tag.

use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::seek::ChunkIndex;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::FlvError;

const AMF_TYPE_NUMBER: u8 = 0;
const AMF_TYPE_BOOLEAN: u8 = 1;
const AMF_TYPE_STRING: u8 = 2;
const AMF_TYPE_OBJECT: u8 = 3;
const AMF_TYPE_NULL: u8 = 5;
const AMF_TYPE_UNDEFINED: u8 = 6;
const AMF_TYPE_ECMA_ARRAY: u8 = 8;
const AMF_TYPE_END_MARKER: u8 = 9;
const AMF_TYPE_STRICT_ARRAY: u8 = 10;
const AMF_TYPE_DATE: u8 = 11;
const AMF_TYPE_LONG_STRING: u8 = 12;

const NAME_METADATA: &str = "onMetaData";
const KEY_DURATION: &str = "duration";
const KEY_KEYFRAMES: &str = "keyframes";
const KEY_FILE_POSITIONS: &str = "filepositions";
const KEY_TIMES: &str = "times";

#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(HashMap<String, AmfValue>),
    Null,
    StrictArray(Vec<AmfValue>),
    Date(f64),
}

impl AmfValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn as_numbers(&self) -> Option<Vec<f64>> {
        match self {
            AmfValue::StrictArray(values) => values.iter().map(AmfValue::as_number).collect(),
            _ => None,
        }
    }
}

/// Collects the stream duration and keyframe table from script tags.
#[derive(Debug, Default)]
pub(super) struct ScriptTagReader {
    duration_us: Option<i64>,
    keyframe_times_us: Vec<i64>,
    keyframe_positions: Vec<u64>,
}

impl ScriptTagReader {
    pub(super) fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    /// Chunk index over the keyframes listed by `onMetaData`, if any.
    pub(super) fn keyframe_index(&self) -> Option<ChunkIndex> {
        let count = self.keyframe_times_us.len();
        if count == 0 || count != self.keyframe_positions.len() {
            return None;
        }

        let mut sizes = Vec::with_capacity(count);
        let mut durations_us = Vec::with_capacity(count);
        for i in 0..count {
            match (self.keyframe_positions.get(i + 1), self.keyframe_times_us.get(i + 1)) {
                (Some(&next_position), Some(&next_time_us)) => {
                    sizes.push((next_position - self.keyframe_positions[i]) as u32);
                    durations_us.push(next_time_us - self.keyframe_times_us[i]);
                }
                _ => {
                    sizes.push(0);
                    let end_us = self.duration_us.unwrap_or(self.keyframe_times_us[i]);
                    durations_us.push((end_us - self.keyframe_times_us[i]).max(0));
                }
            }
        }

        Some(ChunkIndex::new(
            sizes,
            self.keyframe_positions.clone(),
            durations_us,
            self.keyframe_times_us.clone(),
        ))
    }

    /// Parses one script tag. Script tags never produce samples.
    pub(super) fn consume(&mut self, data: &[u8]) -> Result<()> {
        let mut reader = BsIoSliceReader::from_slice(data);

        if read_type(&mut reader)? != AMF_TYPE_STRING {
            return Ok(());
        }
        if read_string(&mut reader)? != NAME_METADATA {
            return Ok(());
        }
        if reader.available()? == 0 || read_type(&mut reader)? != AMF_TYPE_ECMA_ARRAY {
            return Ok(());
        }

        let metadata = read_ecma_array(&mut reader)?;
        if let Some(duration) = metadata.get(KEY_DURATION).and_then(AmfValue::as_number) {
            if duration > 0.0 {
                self.duration_us = Some((duration * 1_000_000.0) as i64);
            }
        }

        if let Some(AmfValue::Object(keyframes)) = metadata.get(KEY_KEYFRAMES) {
            let positions = keyframes.get(KEY_FILE_POSITIONS).and_then(AmfValue::as_numbers);
            let times = keyframes.get(KEY_TIMES).and_then(AmfValue::as_numbers);
            if let (Some(positions), Some(times)) = (positions, times) {
                self.set_keyframes(&positions, &times)?;
            }
        }

        log::debug!(
            "onMetaData: duration {:?} us, {} keyframes",
            self.duration_us,
            self.keyframe_times_us.len()
        );
        Ok(())
    }

    fn set_keyframes(&mut self, positions: &[f64], times: &[f64]) -> Result<()> {
        if positions.len() != times.len() {
            log::warn!(
                "Ignoring keyframe table with {} positions and {} times",
                positions.len(),
                times.len()
            );
            return Ok(());
        }

        self.keyframe_positions = positions.iter().map(|&p| p as u64).collect();
        self.keyframe_times_us = times.iter().map(|&t| (t * 1_000_000.0) as i64).collect();

        let unordered = self
            .keyframe_positions
            .windows(2)
            .position(|pair| pair[0] > pair[1])
            .or_else(|| self.keyframe_times_us.windows(2).position(|pair| pair[0] > pair[1]));
        if let Some(i) = unordered {
            self.keyframe_positions.clear();
            self.keyframe_times_us.clear();
            bail!(FlvError::UnorderedKeyframes(i + 1));
        }
        Ok(())
    }
}

fn read_type(reader: &mut BsIoSliceReader) -> Result<u8> {
    Ok(reader.get_n(8)?)
}

fn read_string(reader: &mut BsIoSliceReader) -> Result<String> {
    let size: u16 = reader.get_n(16)?;
    let bytes = reader.get_bytes(size as usize)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_long_string(reader: &mut BsIoSliceReader) -> Result<String> {
    let size: u32 = reader.get_n(32)?;
    let bytes = reader.get_bytes(size as usize)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_double(reader: &mut BsIoSliceReader) -> Result<f64> {
    Ok(f64::from_bits(reader.get_n::<u64>(64)?))
}

fn read_object(reader: &mut BsIoSliceReader) -> Result<HashMap<String, AmfValue>> {
    let mut map = HashMap::new();
    loop {
        let key = read_string(reader)?;
        let kind = read_type(reader)?;
        if kind == AMF_TYPE_END_MARKER {
            break;
        }
        map.insert(key, read_value(reader, kind)?);
    }
    Ok(map)
}

fn read_ecma_array(reader: &mut BsIoSliceReader) -> Result<HashMap<String, AmfValue>> {
    // The count is only a hint; some muxers write 0 and rely on the end marker.
    let count: u32 = reader.get_n(32)?;
    let mut map = HashMap::with_capacity(count.min(64) as usize);
    while reader.available()? >= 24 {
        let key = read_string(reader)?;
        let kind = read_type(reader)?;
        if kind == AMF_TYPE_END_MARKER {
            break;
        }
        map.insert(key, read_value(reader, kind)?);
    }
    Ok(map)
}

fn read_strict_array(reader: &mut BsIoSliceReader) -> Result<Vec<AmfValue>> {
    let count: u32 = reader.get_n(32)?;
    let mut values = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        let kind = read_type(reader)?;
        values.push(read_value(reader, kind)?);
    }
    Ok(values)
}

fn read_value(reader: &mut BsIoSliceReader, kind: u8) -> Result<AmfValue> {
    Ok(match kind {
        AMF_TYPE_NUMBER => AmfValue::Number(read_double(reader)?),
        AMF_TYPE_BOOLEAN => AmfValue::Boolean(reader.get_n::<u8>(8)? == 1),
        AMF_TYPE_STRING => AmfValue::String(read_string(reader)?),
        AMF_TYPE_OBJECT => AmfValue::Object(read_object(reader)?),
        AMF_TYPE_NULL | AMF_TYPE_UNDEFINED => AmfValue::Null,
        AMF_TYPE_ECMA_ARRAY => AmfValue::Object(read_ecma_array(reader)?),
        AMF_TYPE_STRICT_ARRAY => AmfValue::StrictArray(read_strict_array(reader)?),
        AMF_TYPE_DATE => {
            let date = read_double(reader)?;
            reader.skip_n(16)?; // Time zone offset.
            AmfValue::Date(date)
        }
        AMF_TYPE_LONG_STRING => AmfValue::String(read_long_string(reader)?),
        other => bail!(FlvError::UnknownAmfType(other)),
    })
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;

    fn string(out: &mut Vec<u8>, value: &str) {
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
    }

    fn number(out: &mut Vec<u8>, value: f64) {
        out.push(AMF_TYPE_NUMBER);
        out.extend_from_slice(&value.to_bits().to_be_bytes());
    }

    fn number_array(out: &mut Vec<u8>, values: &[f64]) {
        out.push(AMF_TYPE_STRICT_ARRAY);
        out.extend_from_slice(&(values.len() as u32).to_be_bytes());
        for &value in values {
            number(out, value);
        }
    }

    /// An `onMetaData` script tag body.
    pub(in crate::extractor::flv) fn on_metadata(
        duration_s: f64,
        keyframes: Option<(&[f64], &[f64])>,
    ) -> Vec<u8> {
        let mut out = vec![AMF_TYPE_STRING];
        string(&mut out, NAME_METADATA);
        out.push(AMF_TYPE_ECMA_ARRAY);
        out.extend_from_slice(&3u32.to_be_bytes());

        string(&mut out, KEY_DURATION);
        number(&mut out, duration_s);
        string(&mut out, "encoder");
        out.push(AMF_TYPE_STRING);
        string(&mut out, "test");

        if let Some((positions, times)) = keyframes {
            string(&mut out, KEY_KEYFRAMES);
            out.push(AMF_TYPE_OBJECT);
            string(&mut out, KEY_FILE_POSITIONS);
            number_array(&mut out, positions);
            string(&mut out, KEY_TIMES);
            number_array(&mut out, times);
            string(&mut out, "");
            out.push(AMF_TYPE_END_MARKER);
        }

        string(&mut out, "");
        out.push(AMF_TYPE_END_MARKER);
        out
    }

    #[test]
    fn metadata_duration_and_keyframes() -> Result<()> {
        let mut reader = ScriptTagReader::default();
        reader.consume(&on_metadata(
            4.0,
            Some((&[13.0, 500.0, 900.0], &[0.0, 1.5, 3.0])),
        ))?;

        assert_eq!(reader.duration_us(), Some(4_000_000));
        let index = reader.keyframe_index().expect("keyframe index");
        assert_eq!(index.offsets, vec![13, 500, 900]);
        assert_eq!(index.times_us, vec![0, 1_500_000, 3_000_000]);
        assert_eq!(index.sizes, vec![487, 400, 0]);
        assert_eq!(index.durations_us, vec![1_500_000, 1_500_000, 1_000_000]);
        Ok(())
    }

    #[test]
    fn other_script_names_are_ignored() -> Result<()> {
        let mut data = vec![AMF_TYPE_STRING];
        string(&mut data, "onCuePoint");
        let mut reader = ScriptTagReader::default();
        reader.consume(&data)?;
        assert_eq!(reader.duration_us(), None);
        assert!(reader.keyframe_index().is_none());
        Ok(())
    }

    #[test]
    fn unknown_amf_type_fails() {
        let mut data = vec![AMF_TYPE_STRING];
        string(&mut data, NAME_METADATA);
        data.push(AMF_TYPE_ECMA_ARRAY);
        data.extend_from_slice(&1u32.to_be_bytes());
        string(&mut data, "x");
        data.push(0x42);
        data.extend_from_slice(&[0; 8]);

        let err = ScriptTagReader::default().consume(&data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FlvError>(),
            Some(FlvError::UnknownAmfType(0x42))
        ));
    }
}
