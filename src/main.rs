//! Helios capture demo: simulated driver thread feeding the frame receiver.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use color_eyre::Result;
use flume::{bounded, RecvTimeoutError};
use tracing::{debug, info, trace};

use helios::capture::frame::{DisplayMode, ScanMode, TIMECODE_NONE};
use helios::capture::receiver::Receiver;
use helios::capture::sim::{SimInput, SimSource};
use helios::capture::source::DetectedFormatFlags;
use helios::capture::timecode::{Timecode, TimecodeSources};
use helios::{utils, Config};

/// Commands the application sends to the simulated driver thread.
enum DriverCommand {
    ChangeFormat(DisplayMode),
    Shutdown,
}

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("helios=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Helios launching...");

    // Load configuration
    let config = Config::default();
    helios::CONFIG.store(Arc::new(config.clone()));

    // Build the simulated capture driver: one output-only device plus one
    // capture device with two modes, so a format change has a target.
    let mut source = SimSource::new();
    source.add_device_without_input("Helios Sim Monitor");
    let input = source.add_device(
        "Helios Sim Capture",
        vec![
            sim_mode("360p60", 640, 360, 1000, 60000),
            sim_mode("180p30", 320, 180, 1000, 30000),
        ],
    );

    info!("Devices: {:?}", utils::device_names(&source));
    let device_index = utils::auto_select_device(&source)?;
    info!(
        "Modes: {:?}",
        utils::display_mode_names(&source, device_index)?
    );

    // Start the receiver.
    let receiver = Receiver::new();
    receiver.start(
        &source,
        device_index,
        config.capture.format_index,
        config.capture.pixel_format,
    )?;
    info!(
        format = %receiver.format_name().unwrap_or_default(),
        duration_flicks = receiver.frame_duration(),
        progressive = receiver.is_progressive(),
        frame_bytes = receiver.frame_byte_size(),
        "streaming"
    );

    // Driver thread: generates frames at the mode's cadence and reacts to
    // injected commands.
    let (command_tx, command_rx) = bounded::<DriverCommand>(4);
    let pump_input = Arc::clone(&input);
    let pump = thread::spawn(move || {
        let mut seq: u32 = 0;
        loop {
            match command_rx.recv_timeout(Duration::from_millis(16)) {
                Ok(DriverCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(DriverCommand::ChangeFormat(mode)) => {
                    pump_input.deliver_format_change(mode, DetectedFormatFlags::default());
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            generate_frame(&pump_input, seq);
            seq += 1;
        }
    });

    // Consumer loop: polls at its own cadence, reads the oldest frame in a
    // scoped window (texture upload would happen here) and dequeues it.
    let mut consumed: u32 = 0;
    let mut format_changed = false;
    while consumed < config.run.frames {
        thread::sleep(Duration::from_millis(10));

        while receiver.queued_frames() > 0 {
            let timecode = receiver.oldest_timecode();
            if let Some(frame) = receiver.lock_oldest_frame() {
                trace!(len = frame.len(), "frame read");
            }
            receiver.dequeue_frame();
            consumed += 1;

            if timecode != TIMECODE_NONE && consumed % 30 == 0 {
                debug!(
                    consumed,
                    timecode = %format!("{timecode:08x}"),
                    queued = receiver.queued_frames(),
                    "consumer progress"
                );
            }
        }

        let change_at = config.run.format_change_after.unwrap_or(u32::MAX);
        if !format_changed && consumed >= change_at {
            let (width, height) = receiver.dimensions();
            info!(width, height, "injecting format change");
            command_tx
                .send(DriverCommand::ChangeFormat(sim_mode(
                    "180p30", 320, 180, 1000, 30000,
                )))
                .ok();
            format_changed = true;
        }
    }

    command_tx.send(DriverCommand::Shutdown).ok();
    pump.join().ok();
    receiver.stop();

    let (width, height) = receiver.dimensions();
    info!(
        consumed,
        dropped = receiver.dropped_frames(),
        final_width = width,
        final_height = height,
        "Helios shutting down"
    );
    Ok(())
}

fn sim_mode(name: &str, width: u32, height: u32, duration: i64, scale: i64) -> DisplayMode {
    DisplayMode {
        name: name.into(),
        width,
        height,
        frame_duration: duration,
        frame_scale: scale,
        scan: ScanMode::Progressive,
    }
}

/// Synthesize one frame sized to whatever mode the input currently runs.
fn generate_frame(input: &SimInput, seq: u32) {
    let Some((mode, pixel_format)) = input.enabled() else {
        return;
    };
    let row_bytes = pixel_format.bits_per_pixel() * mode.width as usize / 8;
    let data = vec![(seq & 0xff) as u8; row_bytes * mode.height as usize];
    let fps = (mode.frame_scale / mode.frame_duration).max(1) as u32;

    input.deliver_frame(
        &data,
        row_bytes,
        mode.height,
        TimecodeSources {
            primary: Some(Timecode {
                bcd: bcd_timecode(seq, fps),
                drop_frame: false,
            }),
            secondary: None,
        },
    );
}

/// Pack a frame counter into an HHMMSSFF binary-coded-decimal timecode.
fn bcd_timecode(seq: u32, fps: u32) -> u32 {
    fn bcd(v: u32) -> u32 {
        (v / 10) << 4 | (v % 10)
    }
    let frames = seq % fps;
    let total_secs = seq / fps;
    let (secs, mins, hours) = (total_secs % 60, total_secs / 60 % 60, total_secs / 3600 % 24);
    bcd(hours) << 24 | bcd(mins) << 16 | bcd(secs) << 8 | bcd(frames)
}
