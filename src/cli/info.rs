use std::sync::Arc;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;

use super::command::{Cli, InfoArgs, ReportFormat};
use super::extractor_config;
use crate::input::InputReader;
use crate::timestamp::time_str;
use demux::extractor::{ExtractionSession, ReadResult};
use demux::output::{
    CryptoData, ExtractorOutput, Format, MediaType, SampleFlags, TrackHandle, TrackOutput,
};
use demux::seek::SeekMap;

/// Number of evenly spaced seek points listed in the report.
const SEEK_PROBES: i64 = 4;

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing stream: {}", args.input.display());

    let report = analyze_stream(args, cli, multi)?;
    match args.format {
        ReportFormat::Text => display_report(&report),
        ReportFormat::Yaml => print!("{}", serde_yaml_ng::to_string(&report)?),
    }

    Ok(())
}

/// Keeps per-track statistics instead of sample data.
#[derive(Debug, Default)]
struct StatsOutput {
    tracks: Vec<TrackStats>,
    seek_map: Option<Arc<dyn SeekMap>>,
    tracks_ended: bool,
}

#[derive(Debug)]
struct TrackStats {
    id: u32,
    media_type: MediaType,
    format: Option<Format>,
    format_changes: usize,
    samples: u64,
    key_frames: u64,
    encrypted: u64,
    bytes: u64,
    pending: u64,
    first_time_us: Option<i64>,
    last_time_us: Option<i64>,
}

impl TrackStats {
    fn new(id: u32, media_type: MediaType) -> Self {
        Self {
            id,
            media_type,
            format: None,
            format_changes: 0,
            samples: 0,
            key_frames: 0,
            encrypted: 0,
            bytes: 0,
            pending: 0,
            first_time_us: None,
            last_time_us: None,
        }
    }
}

impl TrackOutput for TrackStats {
    fn format(&mut self, format: &Format) {
        if self.format.as_ref() != Some(format) {
            self.format_changes += 1;
            self.format = Some(format.clone());
        }
    }

    fn sample_data(&mut self, data: &[u8]) {
        self.pending += data.len() as u64;
    }

    fn sample_metadata(
        &mut self,
        time_us: i64,
        flags: SampleFlags,
        size: usize,
        offset: usize,
        _crypto: Option<&CryptoData>,
    ) {
        self.pending = self.pending.min(offset as u64);
        self.samples += 1;
        self.bytes += size as u64;
        if flags.contains(SampleFlags::KEY_FRAME) {
            self.key_frames += 1;
        }
        if flags.contains(SampleFlags::ENCRYPTED) {
            self.encrypted += 1;
        }
        self.first_time_us = Some(self.first_time_us.map_or(time_us, |t| t.min(time_us)));
        self.last_time_us = Some(self.last_time_us.map_or(time_us, |t| t.max(time_us)));
    }
}

impl ExtractorOutput for StatsOutput {
    fn track(&mut self, id: u32, media_type: MediaType) -> TrackHandle {
        if let Some(index) = self.tracks.iter().position(|track| track.id == id) {
            return TrackHandle(index);
        }
        self.tracks.push(TrackStats::new(id, media_type));
        TrackHandle(self.tracks.len() - 1)
    }

    fn track_output(&mut self, handle: TrackHandle) -> &mut dyn TrackOutput {
        &mut self.tracks[handle.0]
    }

    fn end_tracks(&mut self) {
        self.tracks_ended = true;
    }

    fn seek_map(&mut self, seek_map: Arc<dyn SeekMap>) {
        self.seek_map = Some(seek_map);
    }
}

#[derive(Debug, Serialize)]
struct StreamReport {
    container: String,
    bytes_read: u64,
    tracks_ended: bool,
    tracks: Vec<TrackReport>,
    seek_table: SeekTableReport,
}

#[derive(Debug, Serialize)]
struct TrackReport {
    id: u32,
    media_type: String,
    mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    codecs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pcm_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    average_bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    encoder_delay: u32,
    encoder_padding: u32,
    format_changes: usize,
    samples: u64,
    key_frames: u64,
    encrypted_samples: u64,
    bytes: u64,
    first_time_us: Option<i64>,
    last_time_us: Option<i64>,
}

impl From<&TrackStats> for TrackReport {
    fn from(stats: &TrackStats) -> Self {
        let format = stats.format.as_ref();
        Self {
            id: stats.id,
            media_type: stats.media_type.to_string(),
            mime_type: format.map(|f| f.sample_mime_type.clone()),
            codecs: format.and_then(|f| f.codecs.clone()),
            sample_rate: format.and_then(|f| f.sample_rate),
            channels: format.and_then(|f| f.channel_count),
            pcm_encoding: format.and_then(|f| f.pcm_encoding).map(|e| format!("{e:?}")),
            average_bitrate: format.and_then(|f| f.average_bitrate),
            width: format.and_then(|f| f.width),
            height: format.and_then(|f| f.height),
            encoder_delay: format.map_or(0, |f| f.encoder_delay),
            encoder_padding: format.map_or(0, |f| f.encoder_padding),
            format_changes: stats.format_changes,
            samples: stats.samples,
            key_frames: stats.key_frames,
            encrypted_samples: stats.encrypted,
            bytes: stats.bytes,
            first_time_us: stats.first_time_us,
            last_time_us: stats.last_time_us,
        }
    }
}

#[derive(Debug, Serialize)]
struct SeekTableReport {
    present: bool,
    seekable: bool,
    duration_us: Option<i64>,
    points: Vec<SeekProbe>,
}

#[derive(Debug, Serialize)]
struct SeekProbe {
    requested_us: i64,
    time_us: i64,
    position: u64,
}

impl SeekTableReport {
    fn new(seek_map: Option<&dyn SeekMap>) -> Self {
        let Some(seek_map) = seek_map else {
            return Self {
                present: false,
                seekable: false,
                duration_us: None,
                points: Vec::new(),
            };
        };

        let duration_us = seek_map.duration_us();
        let mut points = Vec::new();
        if let Some(duration) = duration_us.filter(|_| seek_map.is_seekable()) {
            for i in 0..SEEK_PROBES {
                let requested_us = duration * i / SEEK_PROBES;
                let point = seek_map.seek_points(requested_us).first;
                points.push(SeekProbe {
                    requested_us,
                    time_us: point.time_us,
                    position: point.position,
                });
            }
        }

        Self {
            present: true,
            seekable: seek_map.is_seekable(),
            duration_us,
            points,
        }
    }
}

fn analyze_stream(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<StreamReport> {
    let reader = InputReader::new(&args.input)?;
    if reader.is_pipe() {
        log::debug!("Reading from stdin, the stream cannot be rewound");
    }
    let length = reader.length();
    let config = extractor_config(cli);
    let mut session = ExtractionSession::open(reader, length, &config, StatsOutput::default())?;
    log::info!("Detected {} container", session.extractor_name());

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            Some(pb)
        }
        None => None,
    };

    let mut steps = 0u64;
    while session.step()? != ReadResult::EndOfInput {
        steps += 1;
        if let Some(pb) = pb.as_ref().filter(|_| steps % 256 == 0) {
            pb.set_message(format!("Analyzing...       {} bytes", session.position()));
        }
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let container = session.extractor_name().to_string();
    let bytes_read = session.position();
    let output = session.release();
    Ok(StreamReport {
        container,
        bytes_read,
        tracks_ended: output.tracks_ended,
        tracks: output.tracks.iter().map(TrackReport::from).collect(),
        seek_table: SeekTableReport::new(output.seek_map.as_deref()),
    })
}

fn time_or_dash(time_us: Option<i64>) -> String {
    time_us.map_or_else(|| "-".to_string(), time_str)
}

fn display_report(report: &StreamReport) {
    println!();
    println!("Stream Information");
    println!("==================");
    println!();
    println!("  Container                 {}", report.container);
    println!("  Bytes read                {}", report.bytes_read);
    if !report.tracks_ended {
        println!("  Track list                incomplete");
    }
    println!();

    for track in &report.tracks {
        display_track(track);
    }

    let seek = &report.seek_table;
    println!("Seek Table");
    if !seek.present {
        println!("  None published");
        println!();
        return;
    }
    println!("  Seekable                  {}", seek.seekable);
    println!("  Duration                  {}", time_or_dash(seek.duration_us));
    for probe in &seek.points {
        println!(
            "  {:<26}{} @ byte {}",
            time_str(probe.requested_us),
            time_str(probe.time_us),
            probe.position
        );
    }
    println!();
}

fn display_track(track: &TrackReport) {
    println!("  Track {} ({})", track.id, track.media_type);
    println!(
        "    MIME type               {}",
        track.mime_type.as_deref().unwrap_or("unknown")
    );
    if let Some(codecs) = &track.codecs {
        println!("    Codecs                  {codecs}");
    }
    if let Some(rate) = track.sample_rate {
        println!("    Sampling rate           {rate} Hz");
    }
    if let Some(channels) = track.channels {
        println!("    Channels                {channels}");
    }
    if let Some(encoding) = &track.pcm_encoding {
        println!("    PCM encoding            {encoding}");
    }
    if let Some(bitrate) = track.average_bitrate {
        println!("    Average bitrate         {:.1} kbps", bitrate as f64 / 1000.0);
    }
    if let (Some(width), Some(height)) = (track.width, track.height) {
        println!("    Dimensions              {width}x{height}");
    }
    if track.encoder_delay > 0 || track.encoder_padding > 0 {
        println!(
            "    Gapless                 {} delay, {} padding",
            track.encoder_delay, track.encoder_padding
        );
    }
    println!(
        "    Samples                 {} ({} key frames, {} bytes)",
        track.samples, track.key_frames, track.bytes
    );
    if track.encrypted_samples > 0 {
        println!("    Encrypted samples       {}", track.encrypted_samples);
    }
    println!(
        "    Time range              {} - {}",
        time_or_dash(track.first_time_us),
        time_or_dash(track.last_time_us)
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use demux::seek::Unseekable;

    #[test]
    fn stats_follow_sink_calls() {
        let mut output = StatsOutput::default();
        let handle = output.track(7, MediaType::Audio);
        assert_eq!(output.track(7, MediaType::Audio), handle);

        let track = output.track_output(handle);
        track.format(&Format::new("audio/mpeg"));
        track.format(&Format::new("audio/mpeg"));
        track.sample_data(&[0; 10]);
        track.sample_metadata(2_000, SampleFlags::KEY_FRAME, 6, 4, None);
        track.sample_metadata(1_000, SampleFlags::NONE, 4, 0, None);
        output.end_tracks();
        output.seek_map(Arc::new(Unseekable::new(Some(5_000))));

        let report = TrackReport::from(&output.tracks[0]);
        assert_eq!(report.format_changes, 1);
        assert_eq!(report.samples, 2);
        assert_eq!(report.key_frames, 1);
        assert_eq!(report.bytes, 10);
        assert_eq!(report.first_time_us, Some(1_000));
        assert_eq!(report.last_time_us, Some(2_000));
        assert_eq!(output.tracks[0].pending, 0);

        let seek = SeekTableReport::new(output.seek_map.as_deref());
        assert!(seek.present && !seek.seekable);
        assert_eq!(seek.duration_us, Some(5_000));
        assert!(seek.points.is_empty());
    }
}
