//! voxlisten entrypoint: continuous hands-free utterance capture.
//!
//! Opens the microphone (or replays a WAV file), writes each detected
//! utterance to the output directory, and prints recorder events as JSON
//! lines on stdout. Line commands on stdin control the session.

mod commands;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{never, select, unbounded, Receiver};
use std::io::{self, Write};
use std::panic;
use std::sync::Arc;
use voxlisten::audio::{self, AudioSource, CpalSource, SmartRecorder, WavFileSink, WavFileSource};
use voxlisten::{
    init_logging, init_tracing, log_debug, log_file_path, log_panic, AppConfig, ChannelListener,
    RecorderEvent,
};

use crate::commands::{spawn_command_thread, Command};

fn main() -> Result<()> {
    let config = AppConfig::parse();
    if config.list_input_devices {
        list_input_devices();
        return Ok(());
    }

    config.validate()?;
    init_logging(&config);
    init_tracing(&config);
    install_panic_hook();
    log_debug("=== voxlisten started ===");
    log_debug(&format!("log file: {:?}", log_file_path()));

    let vad_config = config.vad_config();
    let replaying = config.replay_wav.is_some();
    let source: Arc<dyn AudioSource> = match &config.replay_wav {
        Some(path) => Arc::new(WavFileSource::new(path).paced(config.replay_realtime)),
        None => Arc::new(CpalSource::new(
            config.input_device.clone(),
            vad_config.frame_channel_capacity,
        )),
    };
    let (listener, events) = ChannelListener::new();
    let mut recorder = SmartRecorder::new(vad_config, source)?.with_listener(Arc::new(listener));
    let sink = || Box::new(WavFileSink::new(&config.output_dir));

    recorder
        .start(sink())
        .context("failed to start capture")?;

    let (command_tx, command_rx) = unbounded();
    let _stdin = spawn_command_thread(command_tx);
    let no_commands: Receiver<Command> = never();
    let mut stdin_open = true;
    let mut running = true;
    let mut outcome = Ok(());

    while running {
        let commands = if stdin_open { &command_rx } else { &no_commands };
        select! {
            recv(events) -> event => {
                match event {
                    Ok(event) => {
                        print_json(&event)?;
                        match event {
                            RecorderEvent::ListeningStop if replaying => running = false,
                            RecorderEvent::Error { kind: "source_lost", message } => {
                                outcome = Err(anyhow!("audio source lost: {message}"));
                                running = false;
                            }
                            _ => {}
                        }
                    }
                    Err(_) => running = false,
                }
            }
            recv(commands) -> command => {
                match command {
                    Ok(Command::Start) => {
                        if let Err(err) = recorder.start(sink()) {
                            eprintln!("{err}");
                        }
                    }
                    Ok(Command::Pause) => recorder.pause(),
                    Ok(Command::Resume) => recorder.resume(),
                    Ok(Command::Status) => print_status(&recorder)?,
                    Ok(Command::Stop) => recorder.stop(),
                    Ok(Command::Quit) => running = false,
                    // stdin closed: a replay runs to its end, a live session ends now.
                    Err(_) if replaying => stdin_open = false,
                    Err(_) => running = false,
                }
            }
        }
    }

    recorder.stop();
    // Flush whatever the capture thread emitted while shutting down.
    for event in events.try_iter() {
        print_json(&event)?;
    }
    log_debug("=== voxlisten exiting ===");
    outcome
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value).context("failed to encode event")?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

fn print_status(recorder: &SmartRecorder) -> Result<()> {
    let status = recorder.status();
    let meter = recorder.meter();
    print_json(&serde_json::json!({
        "event": "status",
        "status": status,
        "level_db": meter.level_db(),
    }))
}

fn list_input_devices() {
    let devices = if let Ok(raw) = std::env::var("VOXLISTEN_TEST_DEVICES") {
        raw.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    } else {
        audio::list_input_devices().unwrap_or_else(|err| {
            eprintln!("Failed to list audio input devices: {err:#}");
            Vec::new()
        })
    };

    if devices.is_empty() {
        println!("No audio input devices detected.");
    } else {
        println!("Available audio input devices:");
        for name in devices {
            println!("  - {name}");
        }
    }
}

fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        log_panic(info);
        previous(info);
    }));
}
