#![doc = include_str!("../README.md")]

pub mod controller;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod filter;
pub mod noise;
pub mod ntsc;
pub mod raster;
pub mod reception;
pub mod signal;

pub mod prelude {
    //! Re-exports of the types a frontend needs to wire a set together.

    pub use crate::{
        controller::{
            ControlEvent, Controller, RandomController, RandomOpts, ScriptedController,
            POWERDOWN_DURATION,
        },
        encoder::SourceEncoder,
        engine::{EngineConfig, Knobs, TvEngine, CHANNEL_CHANGE_CYCLES, POWERUP_DURATION},
        error::{Error, Result},
        raster::Raster,
        reception::{ChannelSetting, Reception, MAX_MULTICHAN},
        signal::InputSignal,
    };
}
