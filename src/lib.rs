//! Gait-state estimation and activation core for the powered-ankle exoskeleton bench.
//!
//! One sensor thread per boot reads frames, transforms them into the canonical
//! channel schema, scores the change in acceleration and tracks activation
//! windows. Everything else (trial logs, the trial machine, the HUD) reads
//! what those threads publish.

pub mod activation;
pub mod calibration;
pub mod channels;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod filters;
pub mod hud;
pub mod live_status;
pub mod publisher;
pub mod reader;
pub mod ring;
pub mod scheduler;
pub mod stats;
pub mod supervisor;
pub mod trial;
pub mod trial_log;
pub mod trial_machine;
pub mod worker;

pub use activation::{ActivationDetector, ActivationEvent, ActivationLog, ActivationState};
pub use calibration::{Polynomial, TransmissionRatio};
pub use channels::{Channel, ChannelSchema, RawFrame, Transform, CHANNELS, CHANNEL_COUNT};
pub use clock::{Clock, FlexibleSleeper, ManualClock, MonotonicClock};
pub use config::{GsacConfig, Side};
pub use error::{GsacError, GsacResult};
pub use publisher::{Published, Snapshot, SnapshotCell};
pub use reader::{ReaderSummary, SensorReader};
pub use scheduler::{gait_channel, GaitCounter, GaitSink};
pub use stats::RunningStats;
pub use supervisor::{Session, SessionFailure, SessionOptions, SessionReport};
pub use trial::{Condition, Description, TrialSpec, TrialType};
pub use worker::QuitSignal;
