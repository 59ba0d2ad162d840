//! The frame loop: sources → encoder → controller → engine → sinks.

use crate::{
    error::Result,
    sink::FrameSink,
    source::FrameSource,
};
use rabbitears_core::{
    controller::{ControlEvent, Controller},
    encoder::SourceEncoder,
    engine::TvEngine,
    raster::Raster,
    signal::InputSignal,
};
use tracing::{debug, info};

/// Owns everything for one run and drives it to completion.
pub struct Runner {
    engine: TvEngine,
    controller: Box<dyn Controller>,
    encoder: SourceEncoder,
    sources: Vec<Box<dyn FrameSource>>,
    stations: Vec<InputSignal>,
    sinks: Vec<Box<dyn FrameSink>>,
    raster: Raster,
}

impl Runner {
    pub fn new(
        engine: TvEngine,
        controller: Box<dyn Controller>,
        encoder: SourceEncoder,
        sources: Vec<Box<dyn FrameSource>>,
        sinks: Vec<Box<dyn FrameSink>>,
    ) -> Self {
        let stations = sources.iter().map(|_| InputSignal::new()).collect();
        let raster = Raster::new(encoder.out_width(), encoder.out_height());
        Self {
            engine,
            controller,
            encoder,
            sources,
            stations,
            sinks,
            raster,
        }
    }

    /// Runs frames until the controller quits, then flushes every sink.
    pub fn run(&mut self) -> Result<()> {
        let mut frames = 0u64;
        loop {
            let event = self.controller.next_frame(&mut self.engine);
            if event == ControlEvent::Quit {
                break;
            }
            if event == ControlEvent::Switch {
                debug!(
                    channel = self.controller.channel_index(),
                    frame = frames,
                    "channel change"
                );
            }

            // Refresh only the stations this channel actually receives.
            let channel = self.controller.channel();
            for rec in &channel.receptions {
                self.sources[rec.station]
                    .encode_frame(&self.encoder, &mut self.stations[rec.station])?;
                self.stations[rec.station].seal();
            }

            self.engine.draw(
                &mut self.raster,
                channel.noise_level,
                &channel.receptions,
                &self.stations,
            )?;

            for sink in &mut self.sinks {
                sink.write(&self.raster)?;
            }
            frames += 1;
        }

        for sink in &mut self.sinks {
            sink.finish()?;
            info!("finished {}", sink.name());
        }
        info!(frames, "run complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::open_source;
    use crate::opts::SourceSpec;
    use rabbitears_core::{
        controller::{RandomController, RandomOpts},
        engine::EngineConfig,
    };
    use std::sync::{Arc, Mutex};

    /// A sink that just counts and checksums frames.
    struct ProbeSink {
        frames: Arc<Mutex<Vec<u64>>>,
    }

    impl FrameSink for ProbeSink {
        fn write(&mut self, frame: &Raster) -> Result<()> {
            let sum = frame.data().iter().map(|&b| u64::from(b)).sum();
            self.frames.lock().expect("lock").push(sum);
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "probe"
        }
    }

    #[test]
    fn bars_run_produces_the_expected_frame_count() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sources = vec![open_source(&SourceSpec::Bars { logo: None }).expect("bars")];
        let opts = RandomOpts {
            duration: 1.0,
            fps: 10.0,
            power_up_down: false,
            fix_settings: true,
        };
        let controller = Box::new(RandomController::new(opts, sources.len(), 77));
        let engine = TvEngine::new(EngineConfig {
            width: 128,
            height: 96,
            seed: 77,
            threads: 2,
        });
        let mut runner = Runner::new(
            engine,
            controller,
            SourceEncoder::new(128, 96),
            sources,
            vec![Box::new(ProbeSink {
                frames: Arc::clone(&frames),
            })],
        );
        runner.run().expect("run");

        let frames = frames.lock().expect("lock");
        assert_eq!(frames.len(), 10);
        // Not every frame is identical: noise alone guarantees that.
        assert!(frames.windows(2).any(|w| w[0] != w[1]));
    }
}
