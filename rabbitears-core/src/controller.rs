//! Per-frame scheduling: channel hopping, knob drift, power up and down.

use crate::{
    engine::{Knobs, TvEngine, CHANNEL_CHANGE_CYCLES, POWERUP_DURATION},
    error::{Error, Result},
    ntsc::SIGNAL_LEN,
    reception::{ChannelSetting, Reception, MAX_MULTICHAN},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Seconds the set takes to fade to black at the end of a run.
pub const POWERDOWN_DURATION: f64 = 1.0;

/// What the controller decided for this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ControlEvent {
    /// Nothing changed; keep watching.
    Hold,
    /// The tuner moved to another channel this frame.
    Switch,
    /// The run is over; flush and stop.
    Quit,
}

/// Drives the engine one frame at a time.
pub trait Controller {
    /// Advances one frame: updates knob state, possibly hops channel, writes
    /// everything into the engine, and says what happened.
    fn next_frame(&mut self, tv: &mut TvEngine) -> ControlEvent;

    /// The channel the tuner currently sits on.
    fn channel(&self) -> &ChannelSetting;

    /// Index of the current channel, for logging.
    fn channel_index(&self) -> usize;
}

/// Options for [`RandomController`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct RandomOpts {
    /// Run length in seconds.
    pub duration: f64,
    /// Frames per second.
    pub fps: f64,
    /// Ramp up from cold at the start and fade out at the end.
    pub power_up_down: bool,
    /// Clean, repeatable tuning: fixed levels, no offsets, no drift.
    pub fix_settings: bool,
}

impl Default for RandomOpts {
    fn default() -> Self {
        Self {
            duration: 60.0,
            fps: 30.0,
            power_up_down: false,
            fix_settings: false,
        }
    }
}

/// The built-in channel-surfing viewer: builds a random channel table over
/// the available stations, hops between channels at random intervals, and
/// nudges the tint/colour knobs the way a real set slowly miscalibrates.
#[derive(Debug)]
#[must_use]
pub struct RandomController {
    opts: RandomOpts,
    rng: StdRng,
    channels: Vec<ChannelSetting>,
    knobs: Knobs,
    frame_counter: u64,
    channel: usize,
    channel_last_frame: u64,
    last_brightness: Option<f64>,
}

impl RandomController {
    pub fn new(opts: RandomOpts, n_stations: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let channels = build_channels(&mut rng, n_stations, opts.fix_settings);

        let knobs = Knobs {
            horiz_desync: rng.gen_range(-5.0..5.0),
            squeezebottom: rng.gen_range(-1.0..4.0),
            powerup: 1000.0,
            hashnoise_enable: true,
            ..Knobs::default()
        };

        let mut this = Self {
            channel: rng.gen_range(0..channels.len()),
            opts,
            rng,
            channels,
            knobs,
            frame_counter: 0,
            channel_last_frame: 0,
            last_brightness: None,
        };
        if !this.opts.fix_settings {
            this.drift_knobs();
        }
        this
    }

    /// The whole channel table, mostly for inspection.
    #[must_use]
    pub fn channels(&self) -> &[ChannelSetting] {
        &self.channels
    }

    /// Occasional miscalibration: a rare hard tint spin and a persistent
    /// colour-gain wander.
    fn drift_knobs(&mut self) {
        if self.rng.gen_range(0..4) == 0 {
            let u: f64 = self.rng.gen::<f64>() * 2.0 - 1.0;
            self.knobs.tint_control += u.powi(7) * 180.0;
        }
        let sign = if self.rng.gen::<bool>() { 1.0 } else { -1.0 };
        self.knobs.color_control += self.rng.gen::<f64>() * 0.3 * sign;
    }
}

impl Controller for RandomController {
    fn next_frame(&mut self, tv: &mut TvEngine) -> ControlEvent {
        let fps = self.opts.fps;
        let curtime = self.frame_counter as f64 / fps;
        let mut event = ControlEvent::Hold;

        if self.opts.power_up_down {
            // The tube clock follows wall time for the whole run; ramps that
            // start late (the scan-line level ramp) keep rising after the
            // 6-second warm-up.
            self.knobs.powerup = curtime;
        }

        if self.opts.power_up_down && self.frame_counter < (POWERUP_DURATION * fps) as u64 {
            // Still warming up; no channel surfing with a cold cathode.
        } else if self.opts.power_up_down
            && self.frame_counter >= ((self.opts.duration - POWERDOWN_DURATION) * fps) as u64
        {
            let last = *self
                .last_brightness
                .get_or_insert(self.knobs.brightness_control);
            let rate = ((self.opts.duration - curtime) / POWERDOWN_DURATION).clamp(0.0, 1.0);
            self.knobs.brightness_control = -1.5 * (1.0 - rate) + last * rate;
        } else if self.frame_counter >= self.channel_last_frame {
            self.channel_last_frame =
                self.frame_counter + (fps * (1.0 + self.rng.gen::<f64>() * 6.0)) as u64;
            self.channel = self.rng.gen_range(0..self.channels.len());
            if !self.opts.fix_settings && self.rng.gen_range(0..5) == 0 {
                self.drift_knobs();
            }
            tv.set_channel_change(CHANNEL_CHANGE_CYCLES);
            debug!(channel = self.channel, frame = self.frame_counter, "switch");
            event = ControlEvent::Switch;
        }

        if self.frame_counter as f64 >= self.opts.duration * fps {
            event = ControlEvent::Quit;
        }

        tv.knobs = self.knobs;
        for rec in &mut self.channels[self.channel].receptions {
            rec.update(&mut self.rng);
        }
        self.frame_counter += 1;
        event
    }

    fn channel(&self) -> &ChannelSetting {
        &self.channels[self.channel]
    }

    fn channel_index(&self) -> usize {
        self.channel
    }
}

/// Builds `max(2 · stations, 6)` channels, each carrying a primary reception
/// and sometimes a weaker ghost of another station.
fn build_channels(rng: &mut StdRng, n_stations: usize, fix_settings: bool) -> Vec<ChannelSetting> {
    assert!(n_stations > 0, "need at least one station");
    let n_channels = (2 * n_stations).max(6);
    let mut last_station = None;
    (0..n_channels)
        .map(|_| {
            let mut setting = ChannelSetting::new();
            for k in 0..MAX_MULTICHAN {
                let station = loop {
                    let s = rng.gen_range(0..n_stations);
                    if Some(s) != last_station || rng.gen_range(0..10) == 0 {
                        break s;
                    }
                };
                last_station = Some(station);
                let mut rec = Reception::new(station);
                if fix_settings {
                    rec.level = 0.3;
                } else {
                    let u: f32 = rng.gen();
                    rec.level = u * u * u * 2.0 + 0.05;
                    rec.ofs = rng.gen_range(0..SIGNAL_LEN);
                    rec.multipath = if rng.gen_range(0..3) < 2 {
                        rng.gen()
                    } else {
                        0.0
                    };
                    if k > 0 {
                        rec.freqerr = (rng.gen::<f32>() * 2.0 - 1.0) * 3.0;
                    }
                }
                let stop = rec.level > 0.3 || rng.gen_range(0..4) != 0;
                setting.receptions.push(rec);
                if stop {
                    break;
                }
            }
            setting
        })
        .collect()
}

/// One step of a scripted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ScriptAction {
    /// Hop to a channel (with the usual noise burst).
    Tune { channel: usize },
    /// Set a knob by name.
    Knob { name: String, value: f64 },
    /// Set the current channel's noise level.
    Noise { value: f64 },
    /// End the run.
    Quit,
}

/// A `(frame, action)` pair from the scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptStep {
    pub frame: u64,
    #[serde(flatten)]
    pub action: ScriptAction,
}

/// Replays a JSON schedule of knob moves and channel hops. The channel table
/// is the fixed-settings table, so scripted runs are fully repeatable.
#[derive(Debug)]
#[must_use]
pub struct ScriptedController {
    steps: Vec<ScriptStep>,
    cursor: usize,
    rng: StdRng,
    channels: Vec<ChannelSetting>,
    knobs: Knobs,
    frame_counter: u64,
    channel: usize,
    done: bool,
}

impl ScriptedController {
    pub fn from_json(json: &str, n_stations: usize, seed: u64) -> Result<Self> {
        let mut steps: Vec<ScriptStep> = serde_json::from_str(json)?;
        steps.sort_by_key(|s| s.frame);
        let mut rng = StdRng::seed_from_u64(seed);
        let channels = build_channels(&mut rng, n_stations, true);
        for step in &steps {
            if let ScriptAction::Tune { channel } = step.action {
                if channel >= channels.len() {
                    return Err(Error::scenario(format!(
                        "tune to channel {channel} but only {} exist",
                        channels.len()
                    )));
                }
            }
        }
        Ok(Self {
            steps,
            cursor: 0,
            rng,
            channels,
            knobs: Knobs::default(),
            frame_counter: 0,
            channel: 0,
            done: false,
        })
    }

    fn apply(&mut self, action: &ScriptAction, tv: &mut TvEngine) -> ControlEvent {
        match action {
            ScriptAction::Tune { channel } => {
                self.channel = *channel;
                tv.set_channel_change(CHANNEL_CHANGE_CYCLES);
                ControlEvent::Switch
            }
            ScriptAction::Knob { name, value } => {
                let knob = match name.as_str() {
                    "tint" => &mut self.knobs.tint_control,
                    "color" => &mut self.knobs.color_control,
                    "brightness" => &mut self.knobs.brightness_control,
                    "contrast" => &mut self.knobs.contrast_control,
                    "height" => &mut self.knobs.height_control,
                    "width" => &mut self.knobs.width_control,
                    "squish" => &mut self.knobs.squish_control,
                    "horiz_desync" => &mut self.knobs.horiz_desync,
                    "squeezebottom" => &mut self.knobs.squeezebottom,
                    "powerup" => &mut self.knobs.powerup,
                    _ => {
                        warn!("scenario sets unknown knob {name:?}");
                        return ControlEvent::Hold;
                    }
                };
                *knob = *value;
                ControlEvent::Hold
            }
            ScriptAction::Noise { value } => {
                self.channels[self.channel].noise_level = *value;
                ControlEvent::Hold
            }
            ScriptAction::Quit => {
                self.done = true;
                ControlEvent::Quit
            }
        }
    }
}

impl Controller for ScriptedController {
    fn next_frame(&mut self, tv: &mut TvEngine) -> ControlEvent {
        let mut event = if self.done {
            ControlEvent::Quit
        } else {
            ControlEvent::Hold
        };
        while self.cursor < self.steps.len() && self.steps[self.cursor].frame <= self.frame_counter
        {
            let step = self.steps[self.cursor].clone();
            self.cursor += 1;
            let e = self.apply(&step.action, tv);
            if e != ControlEvent::Hold {
                event = e;
            }
        }
        tv.knobs = self.knobs;
        for rec in &mut self.channels[self.channel].receptions {
            rec.update(&mut self.rng);
        }
        self.frame_counter += 1;
        event
    }

    fn channel(&self) -> &ChannelSetting {
        &self.channels[self.channel]
    }

    fn channel_index(&self) -> usize {
        self.channel
    }
}
