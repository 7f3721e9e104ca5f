//! Pipeline composition
//!
//! A [`PipelineBuilder`] holds an ordered list of [`Stage`]s. Building it
//! validates the options and every stage; running the resulting [`Pipeline`]
//! wraps a source stream in each stage in order and instruments the outcome
//! with lifecycle events on the configured event bus.

pub mod builder;
mod instrument;
pub mod stage;

pub use builder::{Pipeline, PipelineBuilder, RunningStream};
pub use stage::{
    BackpressureStage, DelayStage, FilterStage, FnStage, ProgressStage, Stage, StageContext,
    ThrottleStage, TimeoutStage, TransformStage,
};
