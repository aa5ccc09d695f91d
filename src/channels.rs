//! Canonical channel schema and per-channel transforms.
//!
//! Every boot produces the same fixed, ordered set of channels; the order here
//! is the column order of the trial log. Transforms are a closed sum type bound
//! when the schema is built, so a frame is converted without lookups or
//! allocation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{BootConfig, ChannelConfig};
use crate::filters::LowPassFilter;

pub const CHANNEL_COUNT: usize = 13;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    StateTime,
    Temperature,
    AnkAng,
    AnkVel,
    MotAng,
    MotVel,
    #[serde(rename = "accelx")]
    AccelX,
    #[serde(rename = "accely")]
    AccelY,
    #[serde(rename = "accelz")]
    AccelZ,
    #[serde(rename = "gyrox")]
    GyroX,
    #[serde(rename = "gyroy")]
    GyroY,
    #[serde(rename = "gyroz")]
    GyroZ,
    MotCur,
}

/// Canonical channel order.
pub const CHANNELS: [Channel; CHANNEL_COUNT] = [
    Channel::StateTime,
    Channel::Temperature,
    Channel::AnkAng,
    Channel::AnkVel,
    Channel::MotAng,
    Channel::MotVel,
    Channel::AccelX,
    Channel::AccelY,
    Channel::AccelZ,
    Channel::GyroX,
    Channel::GyroY,
    Channel::GyroZ,
    Channel::MotCur,
];

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::StateTime => "state_time",
            Channel::Temperature => "temperature",
            Channel::AnkAng => "ank_ang",
            Channel::AnkVel => "ank_vel",
            Channel::MotAng => "mot_ang",
            Channel::MotVel => "mot_vel",
            Channel::AccelX => "accelx",
            Channel::AccelY => "accely",
            Channel::AccelZ => "accelz",
            Channel::GyroX => "gyrox",
            Channel::GyroY => "gyroy",
            Channel::GyroZ => "gyroz",
            Channel::MotCur => "mot_cur",
        }
    }

    pub fn from_name(name: &str) -> Option<Channel> {
        CHANNELS.iter().copied().find(|c| c.name() == name)
    }

    /// Column of this channel in a transformed row (declaration order is canonical order).
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Raw field this channel is produced from.
    pub fn raw(&self, frame: &RawFrame) -> f64 {
        match self {
            Channel::StateTime => frame.state_time_ms,
            Channel::Temperature => frame.temperature,
            Channel::AnkAng => frame.ank_ang,
            Channel::AnkVel => frame.ank_vel,
            Channel::MotAng => frame.mot_ang,
            Channel::MotVel => frame.mot_vel,
            Channel::AccelX => frame.accel[0],
            Channel::AccelY => frame.accel[1],
            Channel::AccelZ => frame.accel[2],
            Channel::GyroX => frame.gyro[0],
            Channel::GyroY => frame.gyro[1],
            Channel::GyroZ => frame.gyro[2],
            Channel::MotCur => frame.mot_cur,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One packed read from a boot, in device units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RawFrame {
    pub state_time_ms: f64,
    pub temperature: f64,
    pub ank_ang: f64,
    pub ank_vel: f64,
    pub mot_ang: f64,
    pub mot_vel: f64,
    pub accel: [f64; 3],
    pub gyro: [f64; 3],
    pub mot_cur: f64,
}

impl RawFrame {
    pub fn state_time_secs(&self) -> f64 {
        self.state_time_ms / 1000.0
    }

    /// First channel whose raw value is NaN or infinite.
    pub fn non_finite_channel(&self) -> Option<Channel> {
        CHANNELS.iter().copied().find(|c| !c.raw(self).is_finite())
    }
}

#[derive(Clone, Debug)]
pub enum Transform {
    Identity,
    Scale(f64),
    Offset(f64),
    SignedScale { sign: f64, gain: f64 },
    LowPass { sign: f64, gain: f64, filter: LowPassFilter },
}

impl Transform {
    /// `t` is the frame's state time in seconds; only the low-pass variant reads it.
    pub fn apply(&mut self, raw: f64, t: f64) -> f64 {
        match self {
            Transform::Identity => raw,
            Transform::Scale(k) => raw * *k,
            Transform::Offset(c) => raw + *c,
            Transform::SignedScale { sign, gain } => *sign * raw * *gain,
            Transform::LowPass { sign, gain, filter } => filter.update(*sign * raw * *gain, t),
        }
    }

    pub fn reset(&mut self) {
        if let Transform::LowPass { filter, .. } = self {
            filter.reset();
        }
    }
}

/// Ordered channel table for one boot.
#[derive(Clone, Debug)]
pub struct ChannelSchema {
    transforms: Vec<(Channel, Transform)>,
}

impl ChannelSchema {
    pub fn for_boot(boot: &BootConfig, cfg: &ChannelConfig) -> Self {
        let transforms = CHANNELS
            .iter()
            .map(|&channel| {
                let transform = match channel {
                    Channel::StateTime => Transform::Scale(1.0 / 1000.0),
                    Channel::Temperature | Channel::MotAng | Channel::MotVel | Channel::MotCur => {
                        Transform::Identity
                    }
                    Channel::AnkAng => match cfg.ank_ang_offset {
                        Some(offset) => Transform::Offset(offset),
                        None => Transform::Identity,
                    },
                    Channel::AnkVel => Transform::Scale(1.0 / 10.0),
                    Channel::AccelX => signed(boot.accel_signs[0], cfg.accel_gain),
                    Channel::AccelY => signed(boot.accel_signs[1], cfg.accel_gain),
                    Channel::AccelZ => signed(boot.accel_signs[2], cfg.accel_gain),
                    Channel::GyroX => signed(boot.gyro_signs[0], cfg.gyro_gain),
                    Channel::GyroY => signed(boot.gyro_signs[1], cfg.gyro_gain),
                    Channel::GyroZ => Transform::LowPass {
                        sign: boot.gyro_signs[2],
                        gain: cfg.gyro_gain,
                        filter: LowPassFilter::from_cutoff_hz(cfg.gyroz_cutoff_hz),
                    },
                };
                (channel, transform)
            })
            .collect();
        Self { transforms }
    }

    /// Convert one raw frame into a row in canonical order.
    pub fn apply(&mut self, frame: &RawFrame) -> [f64; CHANNEL_COUNT] {
        let t = frame.state_time_secs();
        let mut row = [0.0; CHANNEL_COUNT];
        for (slot, (channel, transform)) in row.iter_mut().zip(self.transforms.iter_mut()) {
            *slot = transform.apply(channel.raw(frame), t);
        }
        row
    }

    pub fn reset(&mut self) {
        self.transforms.iter_mut().for_each(|(_, t)| t.reset());
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.transforms.iter().map(|(c, _)| *c)
    }
}

fn signed(sign: f64, gain: f64) -> Transform {
    Transform::SignedScale { sign, gain }
}
