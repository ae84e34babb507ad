use crate::audio_queue::{AudioConsumer, AudioProducer, audio_queue};

pub const SAMPLE_RATE: u32 = 44_100;
/// Native synthesis rate: 465 dots * 154 lines * 60 frames.
pub const NATIVE_SAMPLE_RATE: u32 = 4_296_600;
/// CPU cycles per native sample.
pub const NATIVE_SAMPLE_RATIO: u32 = 4;
const SEQUENCER_RATE: i32 = 8230;
const BUFFER_LENGTH: usize = 0x8000;
const MAX_VOLUME: f32 = 16.0;
const FILTER_ORDER: usize = 63;
const NOISE_TABLE_LEN: usize = 0x10000;
const DEFAULT_NOISE_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

const SAMPLE_STEP: f32 = (SAMPLE_RATE * NATIVE_SAMPLE_RATIO) as f32;

macro_rules! apu_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "apu-trace")]
        log::trace!(target: "apu", $($arg)*);
    };
}

const DUTY_TABLE: [[bool; 8]; 4] = [
    [true, false, false, false, false, false, false, false],
    [false, false, false, false, true, true, false, false],
    [true, true, true, true, false, false, false, false],
    [true, true, true, true, true, true, false, false],
];

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[derive(Default, Clone, Copy)]
struct Envelope {
    initial: u8,
    period: u8,
    add: bool,
    counter: i32,
    on: bool,
}

impl Envelope {
    fn set(&mut self, val: u8) {
        self.period = val & 0x07;
        self.counter = self.period as i32;
        self.add = val & 0x08 != 0;
        self.initial = val >> 4;
        self.on = self.period > 0;
    }

    /// Step the volume envelope, moving `amplitude` one unit toward its
    /// endpoint. Reaching 0 or 15 parks the envelope.
    fn clock(&mut self, amplitude: &mut i32) {
        if !self.on || self.period == 0 {
            return;
        }
        self.counter -= 1;
        if self.counter != 0 {
            return;
        }
        if self.add {
            *amplitude += 1;
            if *amplitude >= 0xF {
                *amplitude = 0xF;
                self.on = false;
            } else {
                self.counter = self.period as i32;
            }
        } else {
            *amplitude -= 1;
            if *amplitude <= 0 {
                *amplitude = 0;
                self.on = false;
            } else {
                self.counter = self.period as i32;
            }
        }
    }

    fn retrigger(&mut self) {
        self.counter = self.period as i32;
    }
}

#[derive(Default)]
struct Sweep {
    decrease: bool,
    div: u8,
    time: u8,
    counter: i32,
    shadow: i32,
    fault: bool,
}

struct SquareChannel {
    dac_enabled: bool,
    repeat: bool,
    length_counter: u16,
    duty: u8,
    envelope: Envelope,
    amplitude: i32,
    sweep: Option<Sweep>,
    base_frequency: u16,
    frequency: u16,
    cycle_num: i64,
    cycle_den: i64,
    duty_len: i64,
    cycle_pos: f64,
}

impl SquareChannel {
    fn new(with_sweep: bool) -> Self {
        let mut ch = Self {
            dac_enabled: false,
            repeat: false,
            length_counter: 0,
            duty: 0,
            envelope: Envelope::default(),
            amplitude: 0,
            sweep: if with_sweep {
                Some(Sweep::default())
            } else {
                None
            },
            base_frequency: 0,
            frequency: 0,
            cycle_num: 1,
            cycle_den: 1,
            duty_len: 1,
            cycle_pos: 0.0,
        };
        ch.set_frequency(0);
        ch
    }

    /// Changing the period clears any latched sweep fault.
    fn set_frequency(&mut self, value: u16) {
        if let Some(s) = self.sweep.as_mut() {
            s.fault = false;
        }
        self.cycle_num = (NATIVE_SAMPLE_RATE as i64 / 64) * (0x800 - value as i64);
        self.cycle_den = 0x20000 / 64;
        self.duty_len = self.cycle_num / 8;
        self.frequency = value;
    }

    fn set_base_frequency(&mut self, value: u16) {
        self.base_frequency = value;
        self.set_frequency(value);
    }

    fn set_sweep(&mut self, val: u8) {
        let Some(s) = self.sweep.as_mut() else { return };
        s.div = val & 0x07;
        // Leaving decrease mode mid-sweep latches a fault.
        s.fault = s.decrease && val & 0x08 == 0;
        s.decrease = val & 0x08 != 0;
        s.time = (val & 0x70) >> 4;
        s.counter = s.time as i32;
    }

    fn set_duty(&mut self, val: u8) {
        self.length_counter = 0x40 - (val & 0x3F) as u16;
        self.duty = val >> 6;
    }

    fn set_envelope(&mut self, val: u8) {
        self.envelope.set(val);
        self.dac_enabled = val & 0xF8 != 0;
    }

    fn sweep_fault(&self) -> bool {
        self.sweep.as_ref().is_some_and(|s| s.fault)
    }

    fn enabled(&self) -> bool {
        (self.repeat || self.length_counter > 0)
            && !self.sweep_fault()
            && self.dac_enabled
            && (self.amplitude > 0 || (self.envelope.add && self.envelope.period > 0))
    }

    fn clock_length(&mut self) {
        if self.length_counter > 0 {
            self.length_counter -= 1;
        }
    }

    fn clock_sweep(&mut self) {
        let mut new_freq = None;
        {
            let Some(s) = self.sweep.as_mut() else { return };
            s.counter -= 1;
            if s.counter != 0 {
                return;
            }
            if s.div > 0 {
                if s.decrease {
                    s.shadow -= s.shadow >> s.div;
                    new_freq = Some((s.shadow & 0x7FF) as u16);
                } else {
                    s.shadow += s.shadow >> s.div;
                    if s.shadow + (s.shadow >> s.div) > 0x7FF {
                        s.fault = true;
                    } else {
                        new_freq = Some(s.shadow as u16);
                    }
                }
            }
            s.counter = s.time as i32;
        }
        if let Some(f) = new_freq {
            self.set_frequency(f);
        }
    }

    fn clock_envelope(&mut self) {
        let mut amp = self.amplitude;
        self.envelope.clock(&mut amp);
        self.amplitude = amp;
    }

    fn trigger(&mut self) {
        self.amplitude = self.envelope.initial as i32;
        self.envelope.retrigger();
        self.envelope.on = self.envelope.period > 0;
        if self.length_counter == 0 {
            self.length_counter = 0x40;
        }
        self.cycle_pos = 0.0;
        let base = self.base_frequency;
        self.set_frequency(base);
        // Reload the sweep unit and run the increase-mode overflow precheck.
        let freq = self.frequency as i32;
        if let Some(s) = self.sweep.as_mut() {
            s.counter = s.time as i32;
            s.fault = false;
            s.shadow = freq;
            if s.div > 0 && !s.decrease {
                s.shadow += s.shadow >> s.div;
                if s.shadow + (s.shadow >> s.div) > 0x7FF {
                    s.fault = true;
                }
            }
        }
    }

    fn play(&mut self) -> f32 {
        if !self.enabled() {
            return 0.0;
        }
        self.cycle_pos += (self.cycle_den * NATIVE_SAMPLE_RATIO as i64) as f64;
        if self.cycle_pos >= self.cycle_num as f64 {
            self.cycle_pos -= self.cycle_num as f64;
        }
        let phase = (self.cycle_pos / self.duty_len as f64) as usize & 0x7;
        if DUTY_TABLE[self.duty as usize][phase] {
            self.amplitude as f32
        } else {
            -self.amplitude as f32
        }
    }
}

struct WaveChannel {
    can_play: bool,
    dac_enabled: bool,
    repeat: bool,
    length_counter: u16,
    output_level: u8,
    wave_data: [u8; 32],
    frequency: u16,
    cycle_num: i64,
    cycle_den: i64,
    sample_len: i64,
    cycle_pos: f64,
}

impl WaveChannel {
    fn new() -> Self {
        Self {
            can_play: false,
            dac_enabled: false,
            repeat: false,
            length_counter: 0,
            output_level: 0,
            wave_data: [0; 32],
            frequency: 0,
            cycle_num: 1,
            cycle_den: 1,
            sample_len: 1,
            cycle_pos: 0.0,
        }
    }

    fn set_frequency(&mut self, value: u16) {
        self.cycle_num = (NATIVE_SAMPLE_RATE as i64 / 64) * (0x800 - value as i64);
        self.cycle_den = 0x10000 / 64;
        self.sample_len = self.cycle_num / 32;
        self.frequency = value;
    }

    fn set_length(&mut self, val: u8) {
        self.length_counter = 0x100 - val as u16;
    }

    fn set_output(&mut self, val: u8) {
        self.output_level = (val & 0x60) >> 5;
        self.dac_enabled = val & 0xF8 != 0;
    }

    fn enabled(&self) -> bool {
        (self.length_counter > 0 || self.repeat)
            && self.dac_enabled
            && self.can_play
            && self.output_level > 0
    }

    fn clock_length(&mut self) {
        if self.length_counter > 0 {
            self.length_counter -= 1;
        }
    }

    fn trigger(&mut self) {
        if self.length_counter == 0 {
            self.length_counter = 0x100;
        }
        self.cycle_pos = 0.0;
    }

    fn play(&mut self) -> f32 {
        // The wave position advances even while the channel is silent.
        self.cycle_pos += (self.cycle_den * NATIVE_SAMPLE_RATIO as i64) as f64;
        if self.cycle_pos >= self.cycle_num as f64 {
            self.cycle_pos -= self.cycle_num as f64;
        }

        if !self.enabled() {
            return 0.0;
        }

        let pos = self.cycle_pos / self.sample_len as f64;
        let a = self.wave_data[(pos.floor() as usize) & 0x1F] as f32;
        let b = self.wave_data[(pos.ceil() as usize) & 0x1F] as f32;
        let t = (pos % 1.0) as f32;
        let mut val = lerp(a, b, t).round() as i32;
        if self.output_level > 1 {
            val >>= self.output_level - 1;
        }
        val as f32
    }
}

struct NoiseChannel {
    dac_enabled: bool,
    repeat: bool,
    length_counter: u16,
    envelope: Envelope,
    amplitude: i32,
    shift_clock: u8,
    counter_step: bool,
    frequency: u8,
    cycle_num: i64,
    cycle_den: i64,
    cycle_pos: f64,
    noise_pos: usize,
    counter_flip: bool,
    table: Vec<bool>,
}

impl NoiseChannel {
    fn new(seed: u64) -> Self {
        let mut ch = Self {
            dac_enabled: false,
            repeat: false,
            length_counter: 0,
            envelope: Envelope::default(),
            amplitude: 0,
            shift_clock: 0,
            counter_step: false,
            frequency: 0,
            cycle_num: 1,
            cycle_den: 1,
            cycle_pos: 0.0,
            noise_pos: 0,
            counter_flip: false,
            table: noise_table(seed),
        };
        ch.set_frequency(0);
        ch
    }

    fn set_frequency(&mut self, value: u8) {
        let base = NATIVE_SAMPLE_RATE as f64 / 64.0
            * if value == 0 { 0.5 } else { value as f64 };
        self.cycle_num = (base as i64) << (self.shift_clock + 1);
        self.cycle_den = 0x80000 / 64;
        self.frequency = value;
    }

    fn set_envelope(&mut self, val: u8) {
        self.envelope.set(val);
        self.dac_enabled = val & 0xF8 != 0;
    }

    fn set_polynomial(&mut self, val: u8) {
        self.shift_clock = (val & 0xF0) >> 4;
        self.counter_step = val & 0x08 != 0;
        self.set_frequency(val & 0x07);
    }

    fn set_length(&mut self, val: u8) {
        self.length_counter = 0x40 - (val & 0x3F) as u16;
    }

    fn enabled(&self) -> bool {
        (self.length_counter > 0 || self.repeat) && self.dac_enabled && self.amplitude > 0
    }

    fn clock_length(&mut self) {
        if self.length_counter > 0 {
            self.length_counter -= 1;
        }
    }

    fn clock_envelope(&mut self) {
        let mut amp = self.amplitude;
        self.envelope.clock(&mut amp);
        self.amplitude = amp;
    }

    fn trigger(&mut self) {
        self.amplitude = self.envelope.initial as i32;
        self.envelope.retrigger();
        if self.length_counter == 0 {
            self.length_counter = 0x40;
        }
        self.cycle_pos = 0.0;
    }

    fn play(&mut self) -> f32 {
        if !self.enabled() {
            return 0.0;
        }
        self.cycle_pos += (self.cycle_den * NATIVE_SAMPLE_RATIO as i64) as f64;
        if self.cycle_pos >= self.cycle_num as f64 {
            self.cycle_pos -= self.cycle_num as f64;
            self.noise_pos += 1;
            // Short mode loops an 8-entry window on every other pass.
            if self.counter_step && self.noise_pos & 7 == 0 {
                if self.counter_flip {
                    self.noise_pos -= 8;
                }
                self.counter_flip = !self.counter_flip;
            }
            self.noise_pos %= self.table.len();
        }
        if self.table[self.noise_pos] {
            self.amplitude as f32
        } else {
            -self.amplitude as f32
        }
    }
}

/// Pseudo-random bit table for the noise channel, regenerated per instance
/// from a seed so emulator runs are reproducible.
fn noise_table(seed: u64) -> Vec<bool> {
    let mut state = seed | 1;
    (0..NOISE_TABLE_LEN)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state >> 32 & 1 != 0
        })
        .collect()
}

/// Windowed-sinc FIR over the most recent `order + 1` input samples.
struct LowPassFilter {
    coefficients: Vec<f32>,
    window: Vec<f32>,
    pos: usize,
    filled: usize,
}

impl LowPassFilter {
    fn new(input_rate: u32, output_rate: u32, order: usize) -> Self {
        let cutoff = (output_rate as f64 / 2.0) / input_rate as f64;
        let factor = cutoff * 2.0;
        let half_order = (order >> 1) as f64;

        let coefficients = (0..=order)
            .map(|i| {
                let c = factor * sinc(factor * (i as f64 - half_order));
                // Blackman window
                let w = 0.42
                    - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / order as f64).cos()
                    + 0.08 * (4.0 * std::f64::consts::PI * i as f64 / order as f64).cos();
                (c * w) as f32
            })
            .collect();

        Self {
            coefficients,
            window: vec![0.0; order + 1],
            pos: 0,
            filled: 0,
        }
    }

    fn push(&mut self, sample: f32) {
        self.window[self.pos] = sample;
        self.pos = (self.pos + 1) % self.window.len();
        self.filled = (self.filled + 1).min(self.window.len());
    }

    fn output(&self) -> f32 {
        let len = self.window.len();
        let mut convolved = 0.0;
        for (i, c) in self.coefficients.iter().enumerate().take(self.filled) {
            convolved += self.window[(self.pos + len - 1 - i) % len] * c;
        }
        convolved
    }
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let xpi = std::f64::consts::PI * x;
        xpi.sin() / xpi
    }
}

/// Audio synthesis unit: two square channels, a wave-table channel and a
/// noise channel, mixed at the native rate, low-pass filtered and resampled
/// to 44.1 kHz into one lock-free queue per stereo side.
pub struct Apu {
    ch1: SquareChannel,
    ch2: SquareChannel,
    ch3: WaveChannel,
    ch4: NoiseChannel,
    /// Host-side per-channel gain, applied on top of the emulated mixer.
    pub channel_volumes: [f32; 4],
    /// Host-side output gain.
    pub master_volume: f32,
    nr50: u8,
    nr51: u8,
    power: bool,
    regs: [u8; 0x30],
    sequencer_step: u8,
    sub_cycles: i32,
    sample_counter: i32,
    sample_sync: f32,
    resample_t: Option<f32>,
    prev_left: f32,
    prev_right: f32,
    filter_left: LowPassFilter,
    filter_right: LowPassFilter,
    queue_left: AudioProducer,
    queue_right: AudioProducer,
    out_left: AudioConsumer,
    out_right: AudioConsumer,
    noise_seed: u64,
}

impl Apu {
    fn read_mask(addr: u16) -> u8 {
        match addr {
            0xFF10 => 0x80,
            0xFF11 => 0x3F,
            0xFF12 => 0x00,
            0xFF13 => 0xFF,
            0xFF14 => 0xBF,
            0xFF16 => 0x3F,
            0xFF17 => 0x00,
            0xFF18 => 0xFF,
            0xFF19 => 0xBF,
            0xFF1A => 0x7F,
            0xFF1B => 0xFF,
            0xFF1C => 0x9F,
            0xFF1D => 0xFF,
            0xFF1E => 0xBF,
            0xFF20 => 0xFF,
            0xFF21 => 0x00,
            0xFF22 => 0x00,
            0xFF23 => 0xBF,
            0xFF24 => 0x00,
            0xFF25 => 0x00,
            0xFF26 => 0x70,
            0xFF15 | 0xFF1F => 0xFF,
            0xFF30..=0xFF3F => 0x00,
            _ => 0xFF,
        }
    }

    pub fn new() -> Self {
        Self::with_noise_seed(DEFAULT_NOISE_SEED)
    }

    pub fn with_noise_seed(seed: u64) -> Self {
        let (queue_left, out_left) = audio_queue(BUFFER_LENGTH);
        let (queue_right, out_right) = audio_queue(BUFFER_LENGTH);
        let mut regs = [0u8; 0x30];
        regs[0x14] = 0x77;
        regs[0x15] = 0xF3;
        regs[0x16] = 0xF1;
        Self {
            ch1: SquareChannel::new(true),
            ch2: SquareChannel::new(false),
            ch3: WaveChannel::new(),
            ch4: NoiseChannel::new(seed),
            channel_volumes: [1.0; 4],
            master_volume: 1.0,
            nr50: 0x77,
            nr51: 0xF3,
            power: true,
            regs,
            sequencer_step: 0,
            sub_cycles: SEQUENCER_RATE,
            sample_counter: 0,
            sample_sync: 0.0,
            resample_t: None,
            prev_left: 0.0,
            prev_right: 0.0,
            filter_left: LowPassFilter::new(
                NATIVE_SAMPLE_RATE / NATIVE_SAMPLE_RATIO,
                SAMPLE_RATE,
                FILTER_ORDER,
            ),
            filter_right: LowPassFilter::new(
                NATIVE_SAMPLE_RATE / NATIVE_SAMPLE_RATIO,
                SAMPLE_RATE,
                FILTER_ORDER,
            ),
            queue_left,
            queue_right,
            out_left,
            out_right,
            noise_seed: seed,
        }
    }

    /// Handles to the resampled output queues (left, right).
    pub fn outputs(&self) -> (AudioConsumer, AudioConsumer) {
        (self.out_left.clone(), self.out_right.clone())
    }

    pub fn read(&self, addr: u16) -> u8 {
        if addr == 0xFF26 {
            let mut val = 0x70;
            if self.power {
                val |= 0x80;
            }
            if self.ch1.enabled() {
                val |= 0x01;
            }
            if self.ch2.enabled() {
                val |= 0x02;
            }
            if self.ch3.enabled() {
                val |= 0x04;
            }
            if self.ch4.enabled() {
                val |= 0x08;
            }
            return val;
        }
        let idx = (addr - 0xFF10) as usize;
        self.regs[idx] | Apu::read_mask(addr)
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        // With the unit powered down only NR52, the length loads (which share
        // registers with duty) and wave RAM still get through.
        if !self.power
            && !matches!(addr, 0xFF11 | 0xFF16 | 0xFF1B | 0xFF20 | 0xFF26)
            && !(0xFF30..=0xFF3F).contains(&addr)
        {
            return;
        }

        if addr != 0xFF26 && (0xFF10..=0xFF3F).contains(&addr) {
            self.regs[(addr - 0xFF10) as usize] = val;
        }

        match addr {
            0xFF10 => self.ch1.set_sweep(val),
            0xFF11 => {
                if self.power {
                    self.ch1.set_duty(val);
                } else {
                    self.ch1.length_counter = 0x40 - (val & 0x3F) as u16;
                }
            }
            0xFF12 => self.ch1.set_envelope(val),
            0xFF13 => {
                let f = (self.ch1.base_frequency & 0x700) | val as u16;
                self.ch1.set_base_frequency(f);
            }
            0xFF14 => {
                let f = (self.ch1.base_frequency & 0xFF) | ((val as u16 & 0x07) << 8);
                self.ch1.set_base_frequency(f);
                self.ch1.repeat = val & 0x40 == 0;
                if val & 0x80 != 0 {
                    self.ch1.trigger();
                    apu_trace!("ch1 trigger freq={:#05x}", self.ch1.frequency);
                }
            }
            0xFF16 => {
                if self.power {
                    self.ch2.set_duty(val);
                } else {
                    self.ch2.length_counter = 0x40 - (val & 0x3F) as u16;
                }
            }
            0xFF17 => self.ch2.set_envelope(val),
            0xFF18 => {
                let f = (self.ch2.base_frequency & 0x700) | val as u16;
                self.ch2.set_base_frequency(f);
            }
            0xFF19 => {
                let f = (self.ch2.base_frequency & 0xFF) | ((val as u16 & 0x07) << 8);
                self.ch2.set_base_frequency(f);
                self.ch2.repeat = val & 0x40 == 0;
                if val & 0x80 != 0 {
                    self.ch2.trigger();
                    apu_trace!("ch2 trigger freq={:#05x}", self.ch2.frequency);
                }
            }
            0xFF1A => self.ch3.can_play = val & 0x80 != 0,
            0xFF1B => self.ch3.set_length(val),
            0xFF1C => self.ch3.set_output(val),
            0xFF1D => {
                let f = (self.ch3.frequency & 0x700) | val as u16;
                self.ch3.set_frequency(f);
            }
            0xFF1E => {
                let f = (self.ch3.frequency & 0xFF) | ((val as u16 & 0x07) << 8);
                self.ch3.set_frequency(f);
                self.ch3.repeat = val & 0x40 == 0;
                if val & 0x80 != 0 {
                    self.ch3.trigger();
                    apu_trace!("ch3 trigger freq={:#05x}", self.ch3.frequency);
                }
            }
            0xFF20 => self.ch4.set_length(val),
            0xFF21 => self.ch4.set_envelope(val),
            0xFF22 => self.ch4.set_polynomial(val),
            0xFF23 => {
                self.ch4.repeat = val & 0x40 == 0;
                if val & 0x80 != 0 {
                    self.ch4.trigger();
                    apu_trace!("ch4 trigger poly={:#04x}", self.regs[0x12]);
                }
            }
            0xFF24 => self.nr50 = val,
            0xFF25 => self.nr51 = val,
            0xFF26 => {
                if val & 0x80 == 0 {
                    if self.power {
                        apu_trace!("power off");
                    }
                    self.power = false;
                    self.power_off();
                } else {
                    if !self.power {
                        self.sequencer_step = 0;
                        apu_trace!("power on");
                    }
                    self.power = true;
                }
            }
            0xFF30..=0xFF3F => {
                // Two nibbles per byte, high first.
                let i = (addr - 0xFF30) as usize * 2;
                self.ch3.wave_data[i] = (val & 0xF0) >> 4;
                self.ch3.wave_data[i + 1] = val & 0x0F;
            }
            _ => {}
        }
    }

    fn power_off(&mut self) {
        let wave_data = self.ch3.wave_data;
        self.ch1 = SquareChannel::new(true);
        self.ch2 = SquareChannel::new(false);
        self.ch3 = WaveChannel::new();
        self.ch3.wave_data = wave_data;
        self.ch4 = NoiseChannel::new(self.noise_seed);
        self.nr50 = 0;
        self.nr51 = 0;
        // Wave RAM survives a power cycle.
        for r in &mut self.regs[..0x20] {
            *r = 0;
        }
    }

    /// Advance the synthesis engine by `cycles` CPU cycles.
    pub fn step(&mut self, cycles: u32) {
        let mut cycles = cycles as i32;
        while cycles > 0 {
            let run_to = self.sub_cycles.max(1).min(cycles);
            cycles -= run_to;
            for _ in 0..run_to {
                self.generate_sample();
            }
            self.sub_cycles -= run_to;
            while self.sub_cycles < 0 {
                self.sub_cycles += SEQUENCER_RATE;
                self.clock_sequencer();
            }
        }
    }

    fn clock_sequencer(&mut self) {
        match self.sequencer_step {
            0 | 4 => self.clock_lengths(),
            2 | 6 => {
                self.clock_lengths();
                self.ch1.clock_sweep();
            }
            7 => {
                self.ch1.clock_envelope();
                self.ch2.clock_envelope();
                self.ch4.clock_envelope();
                self.sequencer_step = 0;
                return;
            }
            _ => {}
        }
        self.sequencer_step += 1;
    }

    fn clock_lengths(&mut self) {
        self.ch1.clock_length();
        self.ch2.clock_length();
        self.ch3.clock_length();
        self.ch4.clock_length();
    }

    fn generate_sample(&mut self) {
        self.sample_counter += 1;
        if self.sample_counter < NATIVE_SAMPLE_RATIO as i32 {
            return;
        }
        self.sample_counter -= NATIVE_SAMPLE_RATIO as i32;
        self.sample_sync += SAMPLE_STEP;

        let (left, right) = if self.power {
            self.mix_outputs()
        } else {
            (0.0, 0.0)
        };
        self.filter_left.push(left);
        self.filter_right.push(right);

        if NATIVE_SAMPLE_RATE as f32 - self.sample_sync < SAMPLE_STEP {
            match self.resample_t {
                None => {
                    // Latch filter outputs on the near side of the output
                    // sample point; the far side interpolates against them.
                    self.prev_left = self.filter_left.output();
                    self.prev_right = self.filter_right.output();
                    self.resample_t =
                        Some((NATIVE_SAMPLE_RATE as f32 - self.sample_sync) / SAMPLE_STEP);
                }
                Some(t) => {
                    let l = lerp(self.prev_left, self.filter_left.output(), t);
                    let r = lerp(self.prev_right, self.filter_right.output(), t);
                    self.queue_left.push(l / MAX_VOLUME * self.master_volume);
                    self.queue_right.push(r / MAX_VOLUME * self.master_volume);
                    self.sample_sync -= NATIVE_SAMPLE_RATE as f32;
                    self.resample_t = None;
                }
            }
        }
    }

    /// One native sample per generator, routed to each side independently
    /// through the NR51 enables (left: bits 4-7, right: bits 0-3).
    fn mix_outputs(&mut self) -> (f32, f32) {
        let s1 = self.ch1.play() * self.channel_volumes[0];
        let s2 = self.ch2.play() * self.channel_volumes[1];
        let s3 = self.ch3.play() * self.channel_volumes[2];
        let s4 = self.ch4.play() * self.channel_volumes[3];

        let mut left = 0.0;
        let mut right = 0.0;
        if self.nr51 & 0x10 != 0 {
            left += s1;
        }
        if self.nr51 & 0x20 != 0 {
            left += s2;
        }
        if self.nr51 & 0x40 != 0 {
            left += s3;
        }
        if self.nr51 & 0x80 != 0 {
            left += s4;
        }
        if self.nr51 & 0x01 != 0 {
            right += s1;
        }
        if self.nr51 & 0x02 != 0 {
            right += s2;
        }
        if self.nr51 & 0x04 != 0 {
            right += s3;
        }
        if self.nr51 & 0x08 != 0 {
            right += s4;
        }

        let left_vol = ((self.nr50 >> 4) & 0x07) + 1;
        let right_vol = (self.nr50 & 0x07) + 1;
        (left * left_vol as f32, right * right_vol as f32)
    }

    pub fn sequencer_step(&self) -> u8 {
        self.sequencer_step
    }

    pub fn ch1_frequency(&self) -> u16 {
        self.ch1.frequency
    }

    /// Current length counter value for channel 1.
    pub fn ch1_length(&self) -> u16 {
        self.ch1.length_counter
    }

    /// Current envelope amplitude for channel 1.
    pub fn ch1_volume(&self) -> u8 {
        self.ch1.amplitude as u8
    }

    /// Current length counter value for channel 3.
    pub fn ch3_length(&self) -> u16 {
        self.ch3.length_counter
    }

    /// Current envelope amplitude for channel 4.
    pub fn ch4_volume(&self) -> u8 {
        self.ch4.amplitude as u8
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}
