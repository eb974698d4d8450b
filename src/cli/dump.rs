use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::command::{Cli, DumpArgs, seconds_to_us};
use super::extractor_config;
use crate::index::{IndexWriter, SampleEntry, SeekTable, TrackDescription};
use crate::input::InputReader;
use crate::timestamp::time_str;
use crate::wav::{WAVWriter, WaveFormat};
use demux::extractor::{ExtractionSession, ReadResult};
use demux::output::{
    CryptoData, ExtractorOutput, Format, MediaType, SampleFlags, TrackHandle, TrackOutput, mime,
};
use demux::seek::SeekMap;

/// Spacing of the seek table stored in each index.
const SEEK_TABLE_INTERVAL_US: i64 = 1_000_000;

pub fn cmd_dump(args: &DumpArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    fs::create_dir_all(&args.output_path)?;

    let reader = InputReader::new(&args.input)?;
    let length = reader.length();
    let config = extractor_config(cli);
    let output = DumpOutput::new(&args.output_path);
    let mut session = ExtractionSession::open(reader, length, &config, output)?;
    log::info!(
        "Dumping {} stream {} into {}",
        session.extractor_name(),
        args.input.display(),
        args.output_path.display()
    );

    if let Some(start) = args.start {
        session.output_mut().recording = false;
        let point = session.seek_to_time_us(seconds_to_us(start))?;
        session.output_mut().discard_pending();
        session.output_mut().recording = true;
        log::info!(
            "Starting at {} (byte {})",
            time_str(point.time_us),
            point.position
        );
    }

    let pb = match (multi, length) {
        (Some(multi), Some(length)) => {
            let pb = multi.add(ProgressBar::new(length));
            pb.set_style(ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?);
            Some(pb)
        }
        (Some(multi), None) => {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {bytes} {msg}")?);
            Some(pb)
        }
        _ => None,
    };

    loop {
        let result = session.step()?;
        session.output_mut().take_error()?;
        if let Some(pb) = &pb {
            pb.set_position(session.position());
        }
        if result == ReadResult::EndOfInput {
            break;
        }
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let output = session.release();
    for path in output.finish()? {
        log::info!("Wrote {}", path.display());
    }
    Ok(())
}

/// Writes samples to per-track files as they arrive.
struct DumpOutput {
    output_path: PathBuf,
    tracks: Vec<TrackFiles>,
    seek_map: Option<Arc<dyn SeekMap>>,
    /// Samples are dropped while false.
    recording: bool,
}

impl DumpOutput {
    fn new(output_path: &Path) -> Self {
        Self {
            output_path: output_path.to_path_buf(),
            tracks: Vec::new(),
            seek_map: None,
            recording: true,
        }
    }

    /// First write error of any track since the last call.
    fn take_error(&mut self) -> Result<()> {
        for track in &mut self.tracks {
            if let Some(err) = track.error.take() {
                return Err(anyhow!(err).context(format!("Writing track {}", track.id)));
            }
        }
        Ok(())
    }

    fn discard_pending(&mut self) {
        for track in &mut self.tracks {
            track.pending.clear();
        }
    }

    /// Completes every file and returns the paths written.
    fn finish(self) -> Result<Vec<PathBuf>> {
        let seek_table = self
            .seek_map
            .as_deref()
            .map(|seek_map| SeekTable::sample(seek_map, SEEK_TABLE_INTERVAL_US));

        let mut paths = Vec::new();
        for mut track in self.tracks {
            if let Some(err) = track.error.take() {
                return Err(anyhow!(err).context(format!("Writing track {}", track.id)));
            }
            track.finish(seek_table.as_ref())?;
            paths.extend(track.paths);
        }
        Ok(paths)
    }
}

impl ExtractorOutput for DumpOutput {
    fn track(&mut self, id: u32, media_type: MediaType) -> TrackHandle {
        if let Some(index) = self.tracks.iter().position(|track| track.id == id) {
            return TrackHandle(index);
        }

        let mut track = TrackFiles::new(id, media_type);
        if let Err(err) = track.open(&self.output_path) {
            track.error = Some(err);
        }
        self.tracks.push(track);
        TrackHandle(self.tracks.len() - 1)
    }

    fn track_output(&mut self, handle: TrackHandle) -> &mut dyn TrackOutput {
        let track = &mut self.tracks[handle.0];
        track.recording = self.recording;
        track
    }

    fn end_tracks(&mut self) {
        log::debug!("{} tracks registered", self.tracks.len());
    }

    fn seek_map(&mut self, seek_map: Arc<dyn SeekMap>) {
        self.seek_map = Some(seek_map);
    }
}

/// The `.bin` payload file, `.idx` sample index and, for PCM audio, `.wav`
/// file of one track.
struct TrackFiles {
    id: u32,
    media_type: MediaType,
    format: Option<Format>,
    bin: Option<BufWriter<File>>,
    bin_offset: u64,
    index: Option<IndexWriter<BufWriter<File>>>,
    index_path: Option<PathBuf>,
    header_written: bool,
    wav: Option<WAVWriter<File>>,
    paths: Vec<PathBuf>,
    pending: Vec<u8>,
    recording: bool,
    error: Option<io::Error>,
}

impl TrackFiles {
    fn new(id: u32, media_type: MediaType) -> Self {
        Self {
            id,
            media_type,
            format: None,
            bin: None,
            bin_offset: 0,
            index: None,
            index_path: None,
            header_written: false,
            wav: None,
            paths: Vec::new(),
            pending: Vec::new(),
            recording: true,
            error: None,
        }
    }

    fn base_name(&self) -> String {
        format!("track{}", self.id)
    }

    fn open(&mut self, output_path: &Path) -> io::Result<()> {
        let bin_path = output_path.join(format!("{}.bin", self.base_name()));
        self.bin = Some(BufWriter::new(File::create(&bin_path)?));
        self.paths.push(bin_path);

        let index_path = output_path.join(format!("{}.idx", self.base_name()));
        self.index = Some(IndexWriter::new(BufWriter::new(File::create(&index_path)?)));
        self.index_path = Some(index_path);
        Ok(())
    }

    /// WAV wrapping for raw PCM formats, created on the first such format.
    fn maybe_open_wav(&mut self, format: &Format) -> io::Result<()> {
        if self.wav.is_some() || format.sample_mime_type != mime::AUDIO_RAW {
            return Ok(());
        }
        let (Some(encoding), Some(rate), Some(channels)) =
            (format.pcm_encoding, format.sample_rate, format.channel_count)
        else {
            return Ok(());
        };
        let Some(bin_path) = self.paths.first() else {
            return Ok(());
        };

        let wav_path = bin_path.with_extension("wav");
        let wave_format = WaveFormat::new(encoding, rate, channels as u16);
        let mut wav = WAVWriter::new(File::create(&wav_path)?, wave_format);
        wav.write_header()?;
        log::debug!("Track {}: wrapping {encoding:?} samples into {}", self.id, wav_path.display());
        self.wav = Some(wav);
        self.paths.push(wav_path);
        Ok(())
    }

    /// The index header names the format of the first sample.
    fn write_index_header(&mut self) -> io::Result<()> {
        if self.header_written {
            return Ok(());
        }
        let mime_type = self
            .format
            .as_ref()
            .map_or("", |format| format.sample_mime_type.as_str());
        let description = TrackDescription::new(self.id, self.media_type, mime_type);
        if let Some(index) = self.index.as_mut() {
            index.write_header(&description)?;
            self.header_written = true;
        }
        Ok(())
    }

    fn write_sample(&mut self, time_us: i64, flags: SampleFlags, data: &[u8]) -> io::Result<()> {
        self.write_index_header()?;
        let index = self.index.as_mut().ok_or(io::ErrorKind::NotConnected)?;
        let entry = SampleEntry::new(time_us, self.bin_offset, data.len() as u32, flags);
        index.write_sample(&entry)?;

        let bin = self.bin.as_mut().ok_or(io::ErrorKind::NotConnected)?;
        bin.write_all(data)?;
        self.bin_offset += data.len() as u64;

        if let Some(wav) = self.wav.as_mut() {
            wav.write_data(data)?;
        }
        Ok(())
    }

    fn finish(&mut self, seek_table: Option<&SeekTable>) -> io::Result<()> {
        if !self.pending.is_empty() {
            log::warn!(
                "Track {}: {} trailing bytes belong to no sample",
                self.id,
                self.pending.len()
            );
        }
        if let Some(mut bin) = self.bin.take() {
            bin.flush()?;
        }
        if let Some(mut wav) = self.wav.take() {
            wav.finish()?;
            log::debug!("Track {}: {} bytes of PCM wrapped", self.id, wav.data_written());
        }
        self.write_index_header()?;
        if let Some(mut index) = self.index.take() {
            index.finish_with_seek_table(seek_table)?;
            log::debug!(
                "Track {}: {} samples, {} bytes",
                self.id,
                index.samples_written(),
                self.bin_offset
            );
        }
        if let Some(index_path) = self.index_path.take() {
            self.paths.insert(1.min(self.paths.len()), index_path);
        }
        Ok(())
    }
}

impl TrackOutput for TrackFiles {
    fn format(&mut self, format: &Format) {
        if self.format.as_ref() == Some(format) {
            return;
        }
        if self.error.is_none() {
            if let Err(err) = self.maybe_open_wav(format) {
                self.error = Some(err);
            }
        }
        self.format = Some(format.clone());
    }

    fn sample_data(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    fn sample_metadata(
        &mut self,
        time_us: i64,
        flags: SampleFlags,
        size: usize,
        offset: usize,
        _crypto: Option<&CryptoData>,
    ) {
        let end = self.pending.len().saturating_sub(offset);
        let start = end.saturating_sub(size);
        let data: Vec<u8> = self.pending.drain(..end).skip(start).collect();
        if !self.recording || self.error.is_some() {
            return;
        }
        if let Err(err) = self.write_sample(time_us, flags, &data) {
            self.error = Some(err);
        }
    }
}
