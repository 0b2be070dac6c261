//! `cdda-play`: play or export a CD audio track

use anyhow::{bail, Context};
use cdda_stream::export::export_to_wav;
use cdda_stream::{PlaybackSession, ReaderPool, StreamConfig};
use std::env;
use std::path::PathBuf;

/// CD frames per second of audio
const FRAMES_PER_SECOND: u64 = 75;

const USAGE: &str = "Usage:
  cdda-play [--start <frame>] [--stop <frame>] [--config <file>] [--wav <out.wav>] <track.aiff>

Flags:
  --start <frame>    Start playing at this CD frame (75 per second)
  --stop <frame>     Stop playing at this CD frame
  --config <file>    Stream configuration (JSON)
  --wav <out.wav>    Render to a WAV file instead of the audio device
  -h, --help         Show this help

Keys while playing:
  q                  Quit
";

#[derive(Debug, Default)]
struct Options {
    start: Option<u64>,
    stop: Option<u64>,
    config: Option<PathBuf>,
    wav: Option<PathBuf>,
    track: Option<PathBuf>,
}

fn frame_arg(flag: &str, value: Option<String>) -> anyhow::Result<u64> {
    let value = value.with_context(|| format!("{} requires a frame number", flag))?;
    value
        .parse()
        .with_context(|| format!("{}: '{}' is not a frame number", flag, value))
}

fn parse_args() -> anyhow::Result<Option<Options>> {
    let mut options = Options::default();
    let mut show_help = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--start" => options.start = Some(frame_arg("--start", args.next())?),
            "--stop" => options.stop = Some(frame_arg("--stop", args.next())?),
            "--config" => {
                let path = args.next().context("--config requires a file")?;
                options.config = Some(PathBuf::from(path));
            }
            "--wav" => {
                let path = args.next().context("--wav requires an output file")?;
                options.wav = Some(PathBuf::from(path));
            }
            "--help" | "-h" => show_help = true,
            _ if arg.starts_with('-') => {
                eprintln!("Unknown flag: {}", arg);
                show_help = true;
            }
            _ => options.track = Some(PathBuf::from(arg)),
        }
    }

    if show_help || options.track.is_none() {
        eprint!("{}", USAGE);
        return Ok(None);
    }
    Ok(Some(options))
}

/// `mm:ss:ff` timecode of a frame
fn timecode(frame: u64) -> String {
    let seconds = frame / FRAMES_PER_SECOND;
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 60,
        seconds % 60,
        frame % FRAMES_PER_SECOND
    )
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(options) = parse_args()? else {
        return Ok(());
    };
    let Some(track) = options.track.as_ref() else {
        return Ok(());
    };

    let config = match &options.config {
        Some(path) => StreamConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => StreamConfig::default(),
    };
    log::info!(
        "Chunk size: {} bytes ({:.0} ms)",
        config.chunk_size(),
        config.chunk_duration_ms()
    );

    let pool = ReaderPool::new(&config);
    let mut session = PlaybackSession::open(track, &pool, &config)
        .with_context(|| format!("Failed to open track '{}'", track.display()))?;

    println!(
        "Track: {} ({} frames, {})",
        track.display(),
        session.frame_count(),
        timecode(session.frame_count())
    );

    if let Some(stop) = options.stop {
        let seek = session.set_stop_frame(stop);
        if seek.is_clamped() {
            eprintln!("Stop frame {} is past the end of the track", stop);
        }
    }
    if let Some(start) = options.start {
        let seek = session.set_start_frame(start);
        if seek.is_clamped() {
            eprintln!("Start frame {} is past the end of the track, starting at 0", start);
        }
    }

    match &options.wav {
        Some(out) => {
            let frames = export_to_wav(&mut session, out)
                .with_context(|| format!("Failed to export '{}'", out.display()))?;
            println!("Wrote {} sample frames to {}", frames, out.display());
            Ok(())
        }
        None => play(session),
    }
}

#[cfg(feature = "streaming")]
fn play(mut session: PlaybackSession) -> anyhow::Result<()> {
    use cdda_stream::{AudioDevice, PlayStatus};
    use std::io::{self, Read, Write};
    use std::sync::mpsc;
    use std::time::Duration;

    let device = AudioDevice::new().context("Failed to open audio device")?;
    session.set_destination(Box::new(device))?;

    let (status_tx, status_rx) = mpsc::channel::<PlayStatus>();
    let status_tx = parking_lot::Mutex::new(status_tx);
    session.set_notifier(Some(Box::new(move |status: PlayStatus| {
        if status != PlayStatus::Underrun {
            let _ = status_tx.lock().send(status);
        }
    })));

    let (key_tx, key_rx) = mpsc::channel::<u8>();
    std::thread::spawn(move || {
        #[cfg(unix)]
        let _ = std::process::Command::new("stty")
            .arg("-echo")
            .arg("raw")
            .status();
        let mut stdin = io::stdin();
        let mut buf = [0u8; 1];
        while stdin.read_exact(&mut buf).is_ok() {
            if key_tx.send(buf[0]).is_err() || buf[0] == b'q' || buf[0] == b'\x03' {
                break;
            }
        }
    });

    session.connect().context("Failed to start playback")?;
    println!("Playing (q to quit)\r");

    let total = session.frame_count();
    let outcome = 'playback: loop {
        std::thread::sleep(Duration::from_millis(100));

        while let Ok(key) = key_rx.try_recv() {
            if matches!(key, b'q' | b'Q' | b'\x03') {
                break 'playback None;
            }
        }
        if let Ok(status) = status_rx.try_recv() {
            break Some(status);
        }
        if !session.poll() {
            break None;
        }

        print!(
            "\x1B[2K\r{} / {}",
            timecode(session.current_frame()),
            timecode(total)
        );
        io::stdout().flush().ok();
    };

    session.disconnect();
    restore_terminal_mode();
    println!();

    match outcome {
        Some(PlayStatus::IoError(code)) => bail!("Track read failed (code {})", code),
        Some(status) => println!("{}", status),
        None => println!("Stopped at {}", timecode(session.current_frame())),
    }
    Ok(())
}

#[cfg(not(feature = "streaming"))]
fn play(_session: cdda_stream::PlaybackSession) -> anyhow::Result<()> {
    bail!("Playback requires the \"streaming\" feature. Rebuild with `--features streaming`, or use --wav.")
}

#[cfg(all(feature = "streaming", unix))]
fn restore_terminal_mode() {
    let _ = std::process::Command::new("stty")
        .arg("echo")
        .arg("-raw")
        .status();
}

#[cfg(all(feature = "streaming", not(unix)))]
fn restore_terminal_mode() {}
