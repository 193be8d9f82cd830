use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use wavemorph::runtime;
use wavemorph::SynthConfig;

#[derive(Parser)]
#[command(name = "wavemorph", about = "Polyphonic wavetable and FM synth")]
struct Args {
    /// Engine settings file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Factory preset to load at startup
    #[arg(long)]
    preset: Option<String>,
    /// MIDI input port index
    #[arg(long)]
    midi_port: Option<usize>,
    /// Start the step sequencer
    #[arg(long)]
    sequencer: bool,
    /// Hold the patch's drone note
    #[arg(long)]
    drone: bool,
    /// Run the internal drum bus
    #[arg(long)]
    rhythm: bool,
}

fn run(args: Args) -> wavemorph::Result<()> {
    let config = match &args.config {
        Some(path) => SynthConfig::load(path)?,
        None => SynthConfig::default(),
    };
    let mut synth = runtime::init(config)?;

    if let Some(port) = args.midi_port {
        match synth.connect_midi(port) {
            Ok(()) => info!("midi input: {}", synth.midi_port().unwrap_or_default()),
            Err(e) => warn!("midi disabled: {}", e),
        }
    }

    {
        let engine = synth.engine();
        let mut engine = engine
            .lock()
            .map_err(|_| wavemorph::EngineError::Initialization("engine lock poisoned".into()))?;
        if let Some(name) = &args.preset {
            engine.load_preset(name)?;
            info!("loaded preset '{}'", name);
        }
        if args.rhythm {
            engine.set_rhythm_enabled(true);
        }
        if args.sequencer {
            engine.start_sequencer();
        }
        if args.drone {
            engine.start_drone();
        }
    }

    println!("wavemorph running, press Enter to quit");
    let mut line = String::new();
    if let Err(e) = std::io::stdin().read_line(&mut line) {
        warn!("stdin: {}", e);
    }
    synth.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let args = Args::try_parse_from([
            "wavemorph",
            "--preset",
            "Deep Liquid Bass",
            "--midi-port",
            "2",
            "--sequencer",
            "--drone",
        ])
        .unwrap();
        assert_eq!(args.preset.as_deref(), Some("Deep Liquid Bass"));
        assert_eq!(args.midi_port, Some(2));
        assert!(args.sequencer && args.drone && !args.rhythm);
        assert!(args.config.is_none());
    }

    #[test]
    fn bad_port_is_rejected() {
        assert!(Args::try_parse_from(["wavemorph", "--midi-port", "two"]).is_err());
        assert!(Args::try_parse_from(["wavemorph", "--volume", "3"]).is_err());
    }
}
