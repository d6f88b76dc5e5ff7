#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("The famisound CLI requires the \"cli\" feature. Rebuild with `--features cli` to enable it.");
}

#[cfg(feature = "cli")]
mod cli {
    use std::fs::File;
    use std::io::{BufWriter, Write};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use anyhow::{bail, Context};
    use clap::{Args, Parser, Subcommand};
    use famisound::config::SettingsStore;
    use famisound::document::{Document, MemoryDocument};
    use famisound::engine::{render_document, render_document_with_registers};
    use famisound::streaming::DeviceSink;
    use famisound::{EngineEvent, PlayerCursor, RenderLength, RenderSpec, Settings, SoundGen};
    use flexi_logger::Logger;

    /// How often the position line is refreshed while playing
    const STATUS_REFRESH_MS: u64 = 100;

    #[derive(Parser, Debug)]
    #[command(author, version, about = "NES/Famicom sound engine player and renderer", long_about = None)]
    struct Cli {
        #[arg(help = "Settings file (JSON); defaults are used when missing", long, global = true)]
        settings: Option<PathBuf>,

        #[command(subcommand)]
        command: Commands,
    }

    #[derive(Args, Debug)]
    struct SongArgs {
        #[arg(help = "Song document (JSON)", value_name = "DOC")]
        document: PathBuf,

        #[arg(help = "Track to play", long, default_value_t = 0)]
        track: usize,

        #[arg(help = "Frame to start at", long, default_value_t = 0)]
        frame: usize,
    }

    #[derive(Subcommand, Debug)]
    enum Commands {
        #[command(about = "Play a document on the default audio device")]
        Play {
            #[command(flatten)]
            song: SongArgs,

            #[arg(help = "Stop after this many seconds", long)]
            seconds: Option<u64>,
        },

        #[command(about = "Render a document to a WAV file")]
        Render {
            #[command(flatten)]
            song: SongArgs,

            #[arg(help = "Output WAV file", short, long, value_name = "WAV")]
            output: PathBuf,

            #[arg(help = "Render this many seconds", long, conflicts_with = "loops")]
            seconds: Option<u32>,

            #[arg(help = "Render the song this many times (default 1)", long)]
            loops: Option<u32>,

            #[arg(help = "Silence appended after the song, in milliseconds", long, default_value_t = 0)]
            tail_ms: u32,

            #[arg(help = "Also write every register write as CSV", long, value_name = "CSV")]
            registers: Option<PathBuf>,
        },
    }

    fn load_document(path: &Path) -> anyhow::Result<Arc<dyn Document>> {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let doc = MemoryDocument::from_json(&json).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Arc::new(doc))
    }

    fn load_store(path: Option<&Path>) -> anyhow::Result<SettingsStore> {
        match path {
            Some(path) => SettingsStore::with_file(path).with_context(|| format!("loading settings {}", path.display())),
            None => Ok(SettingsStore::new(Settings::default())),
        }
    }

    fn play(store: SettingsStore, song: &SongArgs, seconds: Option<u64>) -> anyhow::Result<()> {
        let doc = load_document(&song.document)?;
        let frames = doc.frame_count(song.track);
        let engine = SoundGen::spawn_with_store(store, Box::new(DeviceSink::new()))?;
        let events = engine.take_events().context("event channel already taken")?;

        engine.assign_document(doc)?;
        engine.play(PlayerCursor::at(song.track, song.frame, 0))?;
        println!("Playing {} (track {}, {} frames)", song.document.display(), song.track, frames);

        let started = Instant::now();
        let limit = seconds.map(Duration::from_secs);
        loop {
            let mut halted = false;
            for event in events.try_iter() {
                match event {
                    EngineEvent::Halted => halted = true,
                    EngineEvent::DeviceError(msg) => eprintln!("\naudio device error: {msg}"),
                    _ => {}
                }
            }
            if halted || limit.is_some_and(|limit| started.elapsed() >= limit) {
                break;
            }

            let (frame, row) = engine.get_player_pos();
            print!(
                "\rframe {:02X} row {:02X}  {:6.2} BPM  {:>5} ticks",
                frame,
                row,
                engine.get_current_bpm(),
                engine.get_player_ticks()
            );
            std::io::stdout().flush().ok();
            std::thread::sleep(Duration::from_millis(STATUS_REFRESH_MS));
        }
        println!();
        engine.stop()?;
        Ok(())
    }

    struct RenderArgs<'a> {
        output: &'a Path,
        seconds: Option<u32>,
        loops: Option<u32>,
        tail_ms: u32,
        registers: Option<&'a Path>,
    }

    fn render(store: SettingsStore, song: &SongArgs, args: RenderArgs<'_>) -> anyhow::Result<()> {
        let RenderArgs {
            output,
            seconds,
            loops,
            tail_ms,
            registers,
        } = args;
        let length = match (seconds, loops) {
            (Some(secs), None) => RenderLength::Seconds(secs),
            (None, loops) => RenderLength::Loops(loops.unwrap_or(1)),
            (Some(_), Some(_)) => bail!("--seconds and --loops are exclusive"),
        };
        let doc = load_document(&song.document)?;
        let spec = RenderSpec::new(length).with_trailing_silence(tail_ms);
        let started = Instant::now();
        let cursor = PlayerCursor::at(song.track, song.frame, 0);
        let settings = store.get();
        let report = match registers {
            Some(csv_path) => {
                let (report, stream) = render_document_with_registers(doc, &settings, cursor, spec, output)
                    .with_context(|| format!("rendering {}", output.display()))?;
                let file = File::create(csv_path).with_context(|| format!("creating {}", csv_path.display()))?;
                stream
                    .write_csv(BufWriter::new(file))
                    .with_context(|| format!("writing {}", csv_path.display()))?;
                println!("Wrote {} register writes to {}", stream.len(), csv_path.display());
                report
            }
            None => render_document(doc, &settings, cursor, spec, output)
                .with_context(|| format!("rendering {}", output.display()))?,
        };
        println!(
            "Wrote {} ({:.1} s of audio in {:.2} s)",
            report.path.display(),
            report.duration_secs(),
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    pub fn run() -> anyhow::Result<()> {
        let args = Cli::parse();
        let _logger = Logger::try_with_env_or_str("info")?.start()?;
        let store = load_store(args.settings.as_deref())?;

        match &args.command {
            Commands::Play { song, seconds } => play(store, song, *seconds),
            Commands::Render {
                song,
                output,
                seconds,
                loops,
                tail_ms,
                registers,
            } => render(
                store,
                song,
                RenderArgs {
                    output,
                    seconds: *seconds,
                    loops: *loops,
                    tail_ms: *tail_ms,
                    registers: registers.as_deref(),
                },
            ),
        }
    }
}

#[cfg(feature = "cli")]
fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
