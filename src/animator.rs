use std::{
    collections::VecDeque,
    f32::consts::PI,
    time::{Duration, Instant},
};

use rand::{
    distributions::{Distribution, WeightedIndex},
    Rng,
};
use tracing::trace;

use crate::config::AnimatorConfig;

const SMOOTHING_WINDOW: usize = 3;
/// Longest slice handed to the DFT; older samples are ignored.
pub const ANALYSIS_WINDOW: usize = 512;

const BASS_CUTOFF_HZ: f32 = 300.0;
const TREBLE_CUTOFF_HZ: f32 = 3_400.0;
const BASS_WEIGHT: f32 = 0.5;
const SPEECH_WEIGHT: f32 = 1.5;
const TREBLE_WEIGHT: f32 = 0.7;
const VOLUME_SCALE: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouthFrame {
    Closed,
    SmallOpen,
    WideOpen,
    Smirk,
}

impl MouthFrame {
    /// Column and row on the 2x2 mouth sheet.
    pub fn cell(self) -> (u32, u32) {
        match self {
            MouthFrame::Closed => (0, 0),
            MouthFrame::SmallOpen => (1, 0),
            MouthFrame::WideOpen => (0, 1),
            MouthFrame::Smirk => (1, 1),
        }
    }
}

pub struct MouthAnimator<R: Rng> {
    config: AnimatorConfig,
    rng: R,
    recent: VecDeque<f32>,
    speaking: bool,
    frame: MouthFrame,
    next_pick_at: Option<Instant>,
    previous_volume: Option<f32>,
    steady_since: Option<Instant>,
    silent_since: Instant,
    next_idle_roll_at: Option<Instant>,
    smirk_until: Option<Instant>,
}

impl<R: Rng> MouthAnimator<R> {
    pub fn new(config: AnimatorConfig, rng: R, now: Instant) -> Self {
        Self {
            config,
            rng,
            recent: VecDeque::with_capacity(SMOOTHING_WINDOW),
            speaking: false,
            frame: MouthFrame::Closed,
            next_pick_at: None,
            previous_volume: None,
            steady_since: None,
            silent_since: now,
            next_idle_roll_at: None,
            smirk_until: None,
        }
    }

    #[cfg(test)]
    pub fn frame(&self) -> MouthFrame {
        self.frame
    }

    #[cfg(test)]
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feeds one loudness sample and returns the frame to show.
    pub fn step(&mut self, volume: f32, now: Instant) -> MouthFrame {
        if self.recent.len() == SMOOTHING_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(volume.max(0.0));
        let smoothed = self.recent.iter().sum::<f32>() / self.recent.len() as f32;

        if smoothed > self.config.talking_threshold {
            self.step_speaking(smoothed, now);
        } else {
            self.step_silent(now);
        }
        self.frame
    }

    fn step_speaking(&mut self, volume: f32, now: Instant) {
        if !self.speaking {
            trace!(volume, "speaking");
            self.speaking = true;
            self.smirk_until = None;
            self.next_idle_roll_at = None;
            self.next_pick_at = Some(now);
        }

        let steady = self.previous_volume.is_some_and(|previous| {
            (volume - previous).abs() <= previous.abs() * self.config.sustain_tolerance
        });
        if !steady || self.steady_since.is_none() {
            self.steady_since = Some(now);
        }
        self.previous_volume = Some(volume);

        let loud = volume > self.config.talking_threshold * self.config.loud_multiplier;
        let sustained = self.steady_since.is_some_and(|since| {
            now.duration_since(since) > Duration::from_millis(self.config.sustain_ms)
        });
        if sustained {
            self.frame = if loud {
                MouthFrame::WideOpen
            } else {
                MouthFrame::SmallOpen
            };
            return;
        }

        if self.next_pick_at.map_or(true, |at| now >= at) {
            self.frame = self.pick_frame(volume);
            self.next_pick_at = Some(now + Duration::from_millis(self.config.frame_interval_ms));
        }
    }

    fn step_silent(&mut self, now: Instant) {
        if self.speaking {
            trace!("silent");
            self.speaking = false;
            self.frame = MouthFrame::Closed;
            self.silent_since = now;
            self.next_pick_at = None;
            self.previous_volume = None;
            self.steady_since = None;
        }

        if self.smirk_until.is_some_and(|until| now >= until) {
            self.smirk_until = None;
            self.frame = MouthFrame::Closed;
        }

        let idle = now.duration_since(self.silent_since)
            > Duration::from_millis(self.config.idle_after_ms);
        if !idle || self.smirk_until.is_some() {
            return;
        }
        if self.next_idle_roll_at.map_or(true, |at| now >= at) {
            self.next_idle_roll_at = Some(now + Duration::from_millis(self.config.idle_interval_ms));
            if self.rng.gen_bool(self.config.smirk_chance.clamp(0.0, 1.0)) {
                self.frame = MouthFrame::Smirk;
                self.smirk_until = Some(now + Duration::from_millis(self.config.smirk_ms));
            }
        }
    }

    /// Weighted pick over closed / small-open / wide-open. Wide-open gains weight
    /// as the volume climbs from the threshold towards the loud multiple.
    fn pick_frame(&mut self, volume: f32) -> MouthFrame {
        let threshold = self.config.talking_threshold.max(f32::EPSILON);
        let loud_span = (self.config.loud_multiplier - 1.0).max(f32::EPSILON);
        let loudness = ((volume / threshold - 1.0) / loud_span).clamp(0.0, 1.0);
        let weights = [2.0 - loudness, 3.0, 1.0 + 4.0 * loudness];
        let frames = [MouthFrame::Closed, MouthFrame::SmallOpen, MouthFrame::WideOpen];
        match WeightedIndex::new(weights) {
            Ok(dist) => frames[dist.sample(&mut self.rng)],
            Err(_) => MouthFrame::SmallOpen,
        }
    }
}

/// Frequency-weighted loudness of the newest samples, roughly 0..=100 for
/// normal speech. Speech-band bins count more than bass or treble.
///
/// Twiddle factors and per-bin band weights are built once per window length
/// and sample rate, then reused for every frame.
#[derive(Debug, Default)]
pub struct LoudnessMeter {
    len: usize,
    sample_rate: u32,
    cos: Vec<f32>,
    sin: Vec<f32>,
    weights: Vec<f32>,
}

impl LoudnessMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measure(&mut self, samples: &[f32], sample_rate: u32) -> f32 {
        let start = samples.len().saturating_sub(ANALYSIS_WINDOW);
        let window = &samples[start..];
        let n = window.len();
        if n < 2 || sample_rate == 0 {
            return 0.0;
        }
        if self.len != n || self.sample_rate != sample_rate {
            self.rebuild(n, sample_rate);
        }

        let mut total = 0.0f32;
        for (k, weight) in (1..=n / 2).zip(&self.weights) {
            let mut re = 0.0f32;
            let mut im = 0.0f32;
            for (i, sample) in window.iter().enumerate() {
                let index = k * i % n;
                re += sample * self.cos[index];
                im -= sample * self.sin[index];
            }
            let amplitude = 2.0 * (re * re + im * im).sqrt() / n as f32;
            total += weight * amplitude;
        }
        total * VOLUME_SCALE
    }

    fn rebuild(&mut self, n: usize, sample_rate: u32) {
        trace!(n, sample_rate, "rebuilding loudness tables");
        let step = 2.0 * PI / n as f32;
        self.cos = (0..n).map(|i| (step * i as f32).cos()).collect();
        self.sin = (0..n).map(|i| (step * i as f32).sin()).collect();
        let bin_hz = sample_rate as f32 / n as f32;
        self.weights = (1..=n / 2)
            .map(|k| band_weight(k as f32 * bin_hz))
            .collect();
        self.len = n;
        self.sample_rate = sample_rate;
    }
}

fn band_weight(freq: f32) -> f32 {
    if freq < BASS_CUTOFF_HZ {
        BASS_WEIGHT
    } else if freq <= TREBLE_CUTOFF_HZ {
        SPEECH_WEIGHT
    } else {
        TREBLE_WEIGHT
    }
}

#[cfg(test)]
mod tests {
    use std::{
        f32::consts::PI,
        time::{Duration, Instant},
    };

    use rand::{rngs::StdRng, SeedableRng};

    use super::{LoudnessMeter, MouthAnimator, MouthFrame};
    use crate::config::AnimatorConfig;

    fn animator(config: AnimatorConfig, start: Instant) -> MouthAnimator<StdRng> {
        MouthAnimator::new(config, StdRng::seed_from_u64(7), start)
    }

    fn ms(start: Instant, millis: u64) -> Instant {
        start + Duration::from_millis(millis)
    }

    fn sine(freq: f32, amplitude: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn single_spike_is_smoothed_away() {
        let start = Instant::now();
        let mut mouth = animator(AnimatorConfig::default(), start);
        mouth.step(0.0, ms(start, 10));
        mouth.step(0.0, ms(start, 20));
        assert_eq!(mouth.step(30.0, ms(start, 30)), MouthFrame::Closed);
        assert!(!mouth.is_speaking());
    }

    #[test]
    fn dropping_below_threshold_forces_closed() {
        let start = Instant::now();
        let mut mouth = animator(AnimatorConfig::default(), start);
        for step in 0..6 {
            mouth.step(40.0, ms(start, step * 20));
        }
        assert!(mouth.is_speaking());
        for step in 6..9 {
            mouth.step(0.0, ms(start, step * 20));
        }
        assert!(!mouth.is_speaking());
        assert_eq!(mouth.frame(), MouthFrame::Closed);
    }

    #[test]
    fn frame_only_changes_on_interval() {
        let start = Instant::now();
        let mut mouth = animator(AnimatorConfig::default(), start);
        // Alternating levels keep the sustained lock from engaging.
        let mut frames = Vec::new();
        for step in 0..24u64 {
            let volume = if step % 2 == 0 { 20.0 } else { 60.0 };
            frames.push((step * 10, mouth.step(volume, ms(start, step * 10))));
        }
        assert!(mouth.is_speaking());
        let first_pick = frames[0].1;
        for (at, frame) in &frames {
            if *at < 120 {
                assert_eq!(*frame, first_pick, "frame changed early at {at}ms");
            }
        }
    }

    #[test]
    fn sustained_loud_sound_locks_wide_open() {
        let start = Instant::now();
        let mut mouth = animator(AnimatorConfig::default(), start);
        for step in 0..=15 {
            mouth.step(40.0, ms(start, step * 20));
        }
        for step in 16..40 {
            assert_eq!(mouth.step(40.0, ms(start, step * 20)), MouthFrame::WideOpen);
        }
    }

    #[test]
    fn sustained_moderate_sound_locks_small_open() {
        let start = Instant::now();
        let mut mouth = animator(AnimatorConfig::default(), start);
        for step in 0..=15 {
            mouth.step(15.0, ms(start, step * 20));
        }
        for step in 16..40 {
            assert_eq!(mouth.step(15.0, ms(start, step * 20)), MouthFrame::SmallOpen);
        }
    }

    #[test]
    fn idle_smirk_flashes_then_reverts() {
        let start = Instant::now();
        let config = AnimatorConfig {
            smirk_chance: 1.0,
            ..AnimatorConfig::default()
        };
        let mut mouth = animator(config, start);
        assert_eq!(mouth.step(0.0, ms(start, 9_000)), MouthFrame::Closed);
        assert_eq!(mouth.step(0.0, ms(start, 10_001)), MouthFrame::Smirk);
        assert_eq!(mouth.step(0.0, ms(start, 10_500)), MouthFrame::Smirk);
        assert_eq!(mouth.step(0.0, ms(start, 10_601)), MouthFrame::Closed);
        assert_eq!(mouth.step(0.0, ms(start, 11_000)), MouthFrame::Closed);
        assert_eq!(mouth.step(0.0, ms(start, 12_001)), MouthFrame::Smirk);
    }

    #[test]
    fn zero_chance_never_smirks() {
        let start = Instant::now();
        let config = AnimatorConfig {
            smirk_chance: 0.0,
            ..AnimatorConfig::default()
        };
        let mut mouth = animator(config, start);
        for second in 0..60 {
            assert_eq!(
                mouth.step(0.0, ms(start, second * 1_000)),
                MouthFrame::Closed
            );
        }
    }

    #[test]
    fn speech_band_outweighs_bass_at_equal_amplitude() {
        // 256 samples at 8 kHz puts both tones exactly on a bin.
        let mut meter = LoudnessMeter::new();
        let speech = meter.measure(&sine(1_000.0, 0.5, 8_000, 256), 8_000);
        let bass = meter.measure(&sine(62.5, 0.5, 8_000, 256), 8_000);
        assert!((speech - 75.0).abs() < 1.0, "speech volume {speech}");
        assert!((bass - 25.0).abs() < 1.0, "bass volume {bass}");
        assert_eq!(meter.measure(&[0.0; 256], 8_000), 0.0);
        assert_eq!(meter.measure(&[], 8_000), 0.0);
    }

    #[test]
    fn tables_follow_a_sample_rate_change() {
        let mut meter = LoudnessMeter::new();
        let at_8k = meter.measure(&sine(1_000.0, 0.5, 8_000, 256), 8_000);
        // 250 Hz sits in the bass band at 16 kHz but 2 kHz is speech.
        let bass_16k = meter.measure(&sine(250.0, 0.5, 16_000, 256), 16_000);
        let speech_16k = meter.measure(&sine(2_000.0, 0.5, 16_000, 256), 16_000);
        assert!((at_8k - 75.0).abs() < 1.0, "8 kHz volume {at_8k}");
        assert!((bass_16k - 25.0).abs() < 1.0, "bass volume {bass_16k}");
        assert!((speech_16k - 75.0).abs() < 1.0, "speech volume {speech_16k}");
    }
}
