//! Signal patterns for simulated sensors

/// Pattern one axis of a simulated sensor follows over time
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalPattern {
    /// Constant value
    Constant(f32),
    /// Sine wave
    Sine {
        frequency: f32,
        amplitude: f32,
        offset: f32,
    },
    /// Counter that steps once per sample and wraps
    Counter { step: f32, min: f32, max: f32 },
    /// Square wave alternating between `low` and `high`
    Square { period: f32, low: f32, high: f32 },
}

impl Default for SignalPattern {
    fn default() -> Self {
        SignalPattern::Constant(0.0)
    }
}

/// One axis: a pattern plus optional noise
#[derive(Debug, Clone)]
pub struct SignalAxis {
    pub pattern: SignalPattern,
    /// Peak noise added on top of the pattern (0 = none)
    pub noise: f32,
    counter: f32,
    seed: u64,
}

impl SignalAxis {
    pub fn new(pattern: SignalPattern) -> Self {
        let counter = match pattern {
            SignalPattern::Counter { min, .. } => min,
            _ => 0.0,
        };
        Self {
            pattern,
            noise: 0.0,
            counter,
            seed: 0x9E37_79B9_7F4A_7C15,
        }
    }

    pub fn with_noise(mut self, noise: f32) -> Self {
        self.noise = noise;
        self
    }

    /// Next sample at `elapsed_secs` since the sensor started
    pub fn sample(&mut self, elapsed_secs: f32) -> f32 {
        let value = match self.pattern {
            SignalPattern::Constant(v) => v,
            SignalPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * std::f32::consts::PI * frequency * elapsed_secs).sin(),
            SignalPattern::Counter { step, min, max } => {
                let value = self.counter;
                self.counter += step;
                if self.counter > max {
                    self.counter = min;
                }
                value
            }
            SignalPattern::Square { period, low, high } => {
                if period <= 0.0 || elapsed_secs % period < period / 2.0 {
                    high
                } else {
                    low
                }
            }
        };

        if self.noise > 0.0 {
            value + (self.next_random() - 0.5) * 2.0 * self.noise
        } else {
            value
        }
    }

    /// xorshift in [0, 1)
    fn next_random(&mut self) -> f32 {
        let mut s = self.seed;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.seed = s;
        (s >> 40) as f32 / (1u64 << 24) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_wraps() {
        let mut axis = SignalAxis::new(SignalPattern::Counter {
            step: 1.0,
            min: 0.0,
            max: 2.0,
        });
        let samples: Vec<f32> = (0..5).map(|_| axis.sample(0.0)).collect();
        assert_eq!(samples, vec![0.0, 1.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_square_halves() {
        let mut axis = SignalAxis::new(SignalPattern::Square {
            period: 2.0,
            low: -1.0,
            high: 1.0,
        });
        assert_eq!(axis.sample(0.5), 1.0);
        assert_eq!(axis.sample(1.5), -1.0);
    }

    #[test]
    fn test_noise_is_bounded() {
        let mut axis = SignalAxis::new(SignalPattern::Constant(10.0)).with_noise(0.5);
        for _ in 0..1000 {
            let v = axis.sample(0.0);
            assert!((9.5..=10.5).contains(&v), "{}", v);
        }
    }
}
