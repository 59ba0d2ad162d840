//! Watch images and video through a late-1970s analog NTSC television.
//!
//! USAGE:
//!     rabbitears --in bars.png --out bars.mp4 \
//!         --control :random:duration=2:fixsettings --seed 1 --size 320 240
//!
//! Sources can be still images, video files, `:cam[:N]` cameras or the
//! built-in `:bars[:/logo.png]` SMPTE pattern; outputs are video files or an
//! interactive `:highgui` window.

use anyhow::Context;
use clap::Parser;
use rabbitears::{
    logging,
    opts::{self, ControlSpec, Opts},
    runner::Runner,
    sink, source,
};
use rabbitears_core::{
    controller::{Controller, RandomController, ScriptedController},
    encoder::SourceEncoder,
    engine::{EngineConfig, TvEngine},
};
use std::process::ExitCode;
use tracing::info;

fn main() -> ExitCode {
    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(err) => {
            let _ = err.print();
            // Unparseable arguments exit with -1, i.e. 255.
            return ExitCode::from(255);
        }
    };
    logging::init(opts.verbose);

    let (control, sources_spec, sinks_spec) = match validate(&opts) {
        Ok(validated) => validated,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("try --help for usage");
            return ExitCode::from(255);
        }
    };

    match run(opts, control, sources_spec, sinks_spec) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

type Validated = (ControlSpec, Vec<opts::SourceSpec>, Vec<opts::SinkSpec>);

/// Semantic argument checks; all failures here are InvalidArgs.
fn validate(opts: &Opts) -> Result<Validated, opts::ArgsError> {
    let control = opts::parse_control(&opts.control)?;
    let sources = opts
        .inputs
        .iter()
        .map(|input| opts::parse_source(input))
        .collect::<Result<Vec<_>, _>>()?;
    let sinks = opts.outputs.iter().map(|out| opts::parse_sink(out)).collect();
    if let [width, height] = opts.size[..] {
        opts::validate_size(width, height)?;
    }
    Ok((control, sources, sinks))
}

fn run(
    opts: Opts,
    control: ControlSpec,
    sources_spec: Vec<opts::SourceSpec>,
    sinks_spec: Vec<opts::SinkSpec>,
) -> anyhow::Result<()> {
    let seed = if opts.seed == 0 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        info!("seeding from the clock: {now}");
        now
    } else {
        opts.seed
    };

    let mut sources = Vec::with_capacity(sources_spec.len());
    for spec in &sources_spec {
        sources.push(source::open_source(spec)?);
    }

    let (width, height) = if let [width, height] = opts.size[..] {
        (width, height)
    } else {
        // Largest input wins; odd dimensions round down.
        let (mut width, mut height) = (0, 0);
        for src in &sources {
            let (w, h) = src.nominal_size();
            if w * h > width * height {
                (width, height) = (w & !1, h & !1);
            }
        }
        (width.max(opts::MIN_SIZE), height.max(opts::MIN_SIZE))
    };
    info!("output {width}x{height}, seed {seed}");

    let fps = match &control {
        ControlSpec::Random(random) => random.fps as u32,
        ControlSpec::Scenario(_) => 30,
    };
    let controller: Box<dyn Controller> = match control {
        ControlSpec::Random(random) => {
            Box::new(RandomController::new(random, sources.len(), seed))
        }
        ControlSpec::Scenario(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read scenario {}", path.display()))?;
            Box::new(ScriptedController::from_json(&json, sources.len(), seed)?)
        }
    };

    let mut sinks = Vec::with_capacity(sinks_spec.len());
    for spec in &sinks_spec {
        sinks.push(sink::open_sink(spec, width, height, fps)?);
    }

    let engine = TvEngine::new(EngineConfig {
        width,
        height,
        seed,
        threads: opts.threads,
    });
    let encoder = SourceEncoder::new(width, height);

    Runner::new(engine, controller, encoder, sources, sinks).run()
}
