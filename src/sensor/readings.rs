use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

fn default_precision() -> usize {
    1
}

/// How a simulated sensor produces its value
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorKind {
    /// One of two labels, each with probability 1/2
    Binary { on: String, off: String },
    /// Uniform value in `[min, max)`
    Range {
        min: f64,
        max: f64,
        #[serde(default = "default_precision")]
        precision: usize,
        #[serde(default)]
        unit: String,
    },
}

impl SensorKind {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> String {
        match self {
            SensorKind::Binary { on, off } => {
                if rng.random_bool(0.5) {
                    on.clone()
                } else {
                    off.clone()
                }
            }
            SensorKind::Range {
                min,
                max,
                precision,
                unit,
            } => {
                let value = if min < max {
                    rng.random_range(*min..*max)
                } else {
                    *min
                };
                format!("{:.*}{}", *precision, value, unit)
            }
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SensorConfig {
    pub name: String,
    pub topic: String,
    #[serde(flatten)]
    pub kind: SensorKind,
}

impl SensorConfig {
    pub fn binary(name: &str, topic: &str, on: &str, off: &str) -> Self {
        Self {
            name: name.to_string(),
            topic: topic.to_string(),
            kind: SensorKind::Binary {
                on: on.to_string(),
                off: off.to_string(),
            },
        }
    }

    pub fn range(name: &str, topic: &str, min: f64, max: f64, precision: usize, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            topic: topic.to_string(),
            kind: SensorKind::Range {
                min,
                max,
                precision,
                unit: unit.to_string(),
            },
        }
    }
}

/// One value ready to be published
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensorReading {
    pub topic: String,
    pub payload: String,
}

impl SensorReading {
    pub fn new(topic: &str, payload: &str) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.to_string(),
        }
    }
}

/// Produces the readings of one publish cycle
pub trait ReadingSource: Send {
    fn next_cycle(&mut self) -> Vec<SensorReading>;
}

/// Independent pseudo-random value per sensor and cycle
pub struct RandomReadings {
    sensors: Vec<SensorConfig>,
    rng: StdRng,
}

impl RandomReadings {
    pub fn new(sensors: Vec<SensorConfig>) -> Self {
        Self {
            sensors,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_seed(sensors: Vec<SensorConfig>, seed: u64) -> Self {
        Self {
            sensors,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ReadingSource for RandomReadings {
    fn next_cycle(&mut self) -> Vec<SensorReading> {
        self.sensors
            .iter()
            .map(|sensor| SensorReading {
                topic: sensor.topic.clone(),
                payload: sensor.kind.sample(&mut self.rng),
            })
            .collect()
    }
}

/// Replays fixed cycles, then produces empty cycles
#[derive(Default)]
pub struct ScriptedReadings {
    cycles: VecDeque<Vec<SensorReading>>,
}

impl ScriptedReadings {
    pub fn new(cycles: Vec<Vec<SensorReading>>) -> Self {
        Self {
            cycles: cycles.into(),
        }
    }
}

impl ReadingSource for ScriptedReadings {
    fn next_cycle(&mut self) -> Vec<SensorReading> {
        self.cycles.pop_front().unwrap_or_default()
    }
}
