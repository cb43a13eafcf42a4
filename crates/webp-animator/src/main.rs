mod cli;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Command, Info, Opt, Play};
use webp_animator::media::container;
use webp_animator::{
    AnimatorOptions, DisplaySink, IntervalClock, PixelLayout, PlayerConfig, StopReason,
    WebpAnimator, WorkerPool,
};

/// Headless display target: logs presentations and optionally dumps them as PNG.
struct PlayerSink {
    presented: Arc<AtomicU64>,
    dump_dir: Option<PathBuf>,
    started: Instant,
}

impl DisplaySink for PlayerSink {
    fn present(&self, pixels: &[u8], width: u32, height: u32) {
        let n = self.presented.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Frame {n}: {width}x{height}, {} bytes at {}ms",
            pixels.len(),
            self.started.elapsed().as_millis()
        );
        if let Some(dir) = &self.dump_dir {
            let path = dir.join(format!("frame_{n:05}.png"));
            if let Err(e) =
                image::save_buffer(&path, pixels, width, height, image::ColorType::Rgba8)
            {
                log::warn!("Failed to write {}: {e}", path.display());
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let opt = Opt::parse();
    match opt.command {
        Command::Info(args) => run_info(&args),
        Command::Play(args) => run_play(&args),
    }
}

fn run_info(args: &Info) -> Result<()> {
    let data = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let meta = container::parse(&data)
        .with_context(|| format!("Failed to parse {}", args.file.display()))?;

    println!("file:          {}", args.file.display());
    println!("canvas:        {}x{}", meta.canvas_width, meta.canvas_height);
    println!("frames:        {}", meta.frame_count);
    println!("animated:      {}", meta.is_animated());
    if meta.is_animated() {
        if meta.loops_forever() {
            println!("loop count:    infinite");
        } else {
            println!("loop count:    {}", meta.loop_count);
        }
        if let Some([r, g, b, a]) = meta.background_color {
            println!("background:    #{r:02x}{g:02x}{b:02x}{a:02x}");
        }
    }
    println!("alpha:         {}", meta.has_alpha);
    Ok(())
}

fn run_play(args: &Play) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => PlayerConfig::load_from(path)?,
        None => PlayerConfig::load(),
    };
    if let Some(tick_ms) = args.tick_ms {
        config.tick_interval_ms = tick_ms;
    }
    if let Some(layout) = args.layout {
        config.pixel_layout = layout;
    }
    if let Some(dir) = &args.dump_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        if config.pixel_layout != PixelLayout::Rgba {
            log::info!("Frame dumps need RGBA output, ignoring {:?}", config.pixel_layout);
            config.pixel_layout = PixelLayout::Rgba;
        }
    }

    let clock = Arc::new(
        IntervalClock::start(config.tick_interval()).context("Failed to start frame clock")?,
    );
    let pool = Arc::new(
        WorkerPool::new(config.worker_threads).context("Failed to start decode workers")?,
    );
    log::debug!(
        "Frame clock every {}ms, {} decode worker(s)",
        clock.interval().as_millis(),
        pool.threads()
    );
    let presented = Arc::new(AtomicU64::new(0));
    let player_sink = Arc::new(PlayerSink {
        presented: Arc::clone(&presented),
        dump_dir: args.dump_dir.clone(),
        started: Instant::now(),
    });
    let weak_sink = Arc::downgrade(&player_sink);
    let mut sink = Some(player_sink);

    let file = File::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let (load_tx, load_rx) = crossbeam_channel::bounded(1);

    let mut animator =
        WebpAnimator::new(weak_sink, clock, pool, AnimatorOptions::from_config(&config));
    animator.initialize_from_reader(BufReader::new(file), move |result| {
        let _ = load_tx.send(result);
    });

    let reason = loop {
        if let Ok(result) = load_rx.try_recv() {
            let meta =
                result.with_context(|| format!("Failed to load {}", args.file.display()))?;
            log::info!(
                "Playing {} ({}x{}, {} frame(s))",
                args.file.display(),
                meta.canvas_width,
                meta.canvas_height,
                meta.frame_count
            );
        }
        if let Some(reason) = animator.stop_reason() {
            break reason;
        }
        if sink.is_some()
            && args
                .max_frames
                .is_some_and(|max| presented.load(Ordering::Relaxed) >= max)
        {
            // Dropping the only strong handle expires the display target.
            sink = None;
        }
        thread::sleep(Duration::from_millis(5));
    };

    if let Ok(Err(e)) = load_rx.try_recv() {
        return Err(e).with_context(|| format!("Failed to load {}", args.file.display()));
    }
    drop(sink);

    if let Some(snap) = animator.snapshot() {
        log::info!(
            "Stopped ({reason:?}) after {} frame(s), loop {}",
            snap.frames_presented,
            snap.loop_index + 1
        );
    }
    if reason == StopReason::DecodeFailed {
        let detail = animator.last_error().unwrap_or_else(|| "frame decode failed".into());
        anyhow::bail!("Playback of {} stopped: {detail}", args.file.display());
    }
    Ok(())
}
