//! Measurement sources
//!
//! A source is any `Iterator<Item = Option<f64>>`: `Some` is a reading,
//! `None` is a corrupt or missing one, and the end of iteration is source
//! exhaustion. Sources never sleep; pacing belongs to the ingestion loop.

use crate::config::SourceConfig;
use crate::error::ConfigError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Uniform};
use std::io::BufRead;
use tracing::{debug, warn};

/// One synthetic reading plus whether a spike was injected into it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledReading {
    pub value: Option<f64>,
    pub induced: bool,
}

/// Seasonal signal with uniform noise, random spikes and random dropouts.
///
/// Reading `i` is `base + U(-noise, noise) + (i mod season_period)`. With
/// probability `anomaly_ratio` a spike drawn from `[spike_min, spike_max)`
/// is added; with probability `failure_ratio` the reading is lost.
pub struct SyntheticSource {
    config: SourceConfig,
    spike: Uniform<f64>,
    rng: StdRng,
    index: usize,
    induced: usize,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let spike = Uniform::new(config.spike_min, config.spike_max)
            .map_err(|e| ConfigError::Invalid(format!("spike range: {}", e)))?;
        let rng = seeded(config.seed);

        Ok(Self {
            config,
            spike,
            rng,
            index: 0,
            induced: 0,
        })
    }

    /// Rewind to the first reading. Seeded sources replay the same sequence.
    pub fn restart(&mut self) {
        self.rng = seeded(self.config.seed);
        self.index = 0;
        self.induced = 0;
    }

    /// Spikes injected so far.
    pub fn induced_count(&self) -> usize {
        self.induced
    }

    pub fn remaining(&self) -> usize {
        self.config.num_points.saturating_sub(self.index)
    }

    /// Next reading with its ground-truth label.
    pub fn next_labeled(&mut self) -> Option<LabeledReading> {
        if self.index >= self.config.num_points {
            return None;
        }

        let seasonal = (self.index % self.config.season_period) as f64;
        let noise = self.rng.random_range(-self.config.noise..self.config.noise);
        let mut value = self.config.base + noise + seasonal;

        let induced = self.rng.random_bool(self.config.anomaly_ratio);
        if induced {
            value += self.spike.sample(&mut self.rng);
            self.induced += 1;
        }

        let lost = self.rng.random_bool(self.config.failure_ratio);
        self.index += 1;

        Some(LabeledReading {
            value: (!lost).then_some(value),
            induced,
        })
    }
}

impl Iterator for SyntheticSource {
    type Item = Option<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_labeled().map(|reading| reading.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

fn seeded(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    }
}

/// Newline-delimited readings from any buffered reader.
///
/// Blank lines, `null`, `nan`, undecodable bytes and anything unparsable
/// become absent readings. Only end of input or a read error ends the
/// sequence.
pub struct ReplaySource<R> {
    reader: R,
    buf: Vec<u8>,
    line_no: usize,
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for ReplaySource<R> {
    type Item = Option<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => return None,
            Ok(_) => self.line_no += 1,
            Err(e) => {
                warn!(line = self.line_no + 1, error = %e, "Replay input unreadable; ending stream.");
                return None;
            }
        }

        let Ok(line) = std::str::from_utf8(&self.buf) else {
            debug!(line = self.line_no, "Undecodable reading in replay input.");
            return Some(None);
        };

        let parsed = parse_reading(line);
        if parsed.is_none() && !line.trim().is_empty() {
            debug!(line = self.line_no, raw = line.trim(), "Absent reading in replay input.");
        }
        Some(parsed)
    }
}

/// Parse one textual reading; non-numeric or non-finite input is absent.
pub fn parse_reading(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}
