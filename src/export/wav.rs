//! WAV file export functionality

use super::ExportConfig;
use crate::session::{PlayStatus, PlaybackSession, PullOutput, StreamFormat};
use crate::{CddaError, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

/// No error reported yet
const NO_ERROR: i32 = 0;

/// Export a session's track to a WAV file
///
/// Plays from the session's start frame to its stop frame. Replaces the
/// session's destination and notifier. Returns the number of sample frames
/// written, or [`CddaError::Export`] when the range is empty (for instance
/// when the session was already played to its stop frame).
///
/// # Examples
///
/// ```no_run
/// use cdda_stream::export::export_to_wav;
/// use cdda_stream::{PlaybackSession, ReaderPool, StreamConfig};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = StreamConfig::default();
/// let pool = ReaderPool::new(&config);
/// let mut session = PlaybackSession::open("track03.aiff", &pool, &config)?;
/// session.set_stop_frame(75 * 30);
///
/// export_to_wav(&mut session, "track03.wav")?;
/// # Ok(())
/// # }
/// ```
pub fn export_to_wav<P: AsRef<Path>>(session: &mut PlaybackSession, output_path: P) -> Result<u64> {
    export_to_wav_with_config(session, output_path, ExportConfig::default())
}

/// Export a session's track to a WAV file with custom configuration
pub fn export_to_wav_with_config<P: AsRef<Path>>(
    session: &mut PlaybackSession,
    output_path: P,
    config: ExportConfig,
) -> Result<u64> {
    if session.is_connected() {
        return Err(CddaError::AlreadyEngaged);
    }

    let output_path = output_path.as_ref();
    let reader = session.reader();
    let mut remaining = reader.end_of_file().saturating_sub(reader.read_position());
    if remaining == 0 {
        return Err(CddaError::Export(format!(
            "Nothing to export: read position {} is at or past the stop position {}",
            reader.read_position(),
            reader.end_of_file()
        )));
    }

    let finished = Arc::new(AtomicBool::new(false));
    let error = Arc::new(AtomicI32::new(NO_ERROR));
    {
        let finished = Arc::clone(&finished);
        let error = Arc::clone(&error);
        session.set_notifier(Some(Box::new(move |status: PlayStatus| match status {
            PlayStatus::Underrun => {}
            PlayStatus::Finished => finished.store(true, Ordering::Release),
            PlayStatus::IoError(code) => error.store(code, Ordering::Release),
        })));
    }

    let output = PullOutput::new();
    session.set_destination(Box::new(output.clone()))?;

    let mut writer = create_writer(output_path, session.format())?;
    log::info!(
        "Exporting {} bytes of audio to {}",
        remaining,
        output_path.display()
    );

    if let Err(e) = session.connect() {
        session.set_notifier(None);
        return Err(e);
    }
    let result = pump(&output, &mut writer, &mut remaining, &finished, &error, &config);
    session.disconnect();
    session.set_notifier(None);

    let frames = result?;
    writer
        .finalize()
        .map_err(|e| CddaError::Export(format!("Failed to finalize WAV file: {}", e)))?;

    log::info!("Export complete: {} frames", frames);
    Ok(frames)
}

fn create_writer(
    path: &Path,
    format: &StreamFormat,
) -> Result<hound::WavWriter<std::io::BufWriter<std::fs::File>>> {
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };

    hound::WavWriter::create(path, spec)
        .map_err(|e| CddaError::Export(format!("Failed to create WAV file: {}", e)))
}

/// Pull blocks until `remaining` bytes have been written or the track ends
fn pump<W: std::io::Write + std::io::Seek>(
    output: &PullOutput,
    writer: &mut hound::WavWriter<W>,
    remaining: &mut u64,
    finished: &AtomicBool,
    error: &AtomicI32,
    config: &ExportConfig,
) -> Result<u64> {
    let mut block = vec![0u8; config.block_bytes];
    let mut written_bytes = 0u64;
    let mut stalled = 0u32;

    while *remaining > 0 && !finished.load(Ordering::Acquire) {
        let code = error.load(Ordering::Acquire);
        if code != NO_ERROR {
            return Err(CddaError::Export(format!("Track read failed (code {})", code)));
        }

        let got = output.pull(&mut block);
        let take = (got as u64).min(*remaining) as usize;
        write_samples(writer, &block[..take])?;
        *remaining -= take as u64;
        written_bytes += take as u64;

        if got < block.len() {
            stalled = if got == 0 { stalled + 1 } else { 0 };
            if stalled > config.max_stalled_cycles {
                return Err(CddaError::Export(format!(
                    "Reader stalled after {} bytes",
                    written_bytes
                )));
            }
            std::thread::sleep(config.underrun_backoff);
        } else {
            stalled = 0;
        }
    }

    Ok(written_bytes / 4)
}

/// Write native-endian 16-bit samples
fn write_samples<W: std::io::Write + std::io::Seek>(
    writer: &mut hound::WavWriter<W>,
    bytes: &[u8],
) -> Result<()> {
    for pair in bytes.chunks_exact(2) {
        let sample = i16::from_ne_bytes([pair[0], pair[1]]);
        writer
            .write_sample(sample)
            .map_err(|e| CddaError::Export(format!("Failed to write sample: {}", e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_samples_native_endian() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let mut bytes = Vec::new();
            for s in [1i16, -2, 300, -400] {
                bytes.extend_from_slice(&s.to_ne_bytes());
            }
            write_samples(&mut writer, &bytes).unwrap();
            writer.finalize().unwrap();
        }

        cursor.set_position(0);
        let mut reader = hound::WavReader::new(cursor).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -2, 300, -400]);
    }

    #[test]
    fn test_block_bytes_whole_frames() {
        let config = ExportConfig::default().block_bytes(4703);
        assert_eq!(config.block_bytes, 4700);
        assert_eq!(ExportConfig::default().block_bytes(1).block_bytes, 4);
    }
}
