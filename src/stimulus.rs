//! Row-oriented stimulus descriptions and the tabular stimulus-file writer.
//!
//! ## Main Structures and Enumerations:
//!
//! - `Waveform`: A sum type over the waveform kinds understood by the
//!   acquisition engine (DC, Ornstein-Uhlenbeck, sinusoid, square, saw,
//!   chirp, ramp, three Poisson train flavours, Gaussian, alpha). Each
//!   variant carries its own parameters; the serializer flattens them into
//!   the five positional parameter slots of the file format.
//!
//! - `StimRow`: One row of the stimulus table: a duration, a waveform, a
//!   seeding policy and an elementwise exponent.
//!
//! - `Stimulus`: An ordered list of rows and composite groups. Composite
//!   groups combine the member waveforms point-wise with `+ - x /`
//!   operators; group structure is validated on insertion, not when the
//!   file is written.
//!
//! ## File format
//!
//! Each row is one line of twelve tab-separated decimal fields terminated
//! by a newline, no header:
//! `duration  code  p1..p5  fix_seed  seed  extra_code  op_index  exponent`.
//! A negative `code` of magnitude `n` marks membership in a composite
//! group of `n` rows, with the member's real waveform kind moved into
//! `extra_code`. The engine consumes the file verbatim; this module never
//! samples the signals itself.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};

/// Total duration of the diagnostic preamble, in seconds.
pub const PREAMBLE_DURATION: f64 = 2.61;

/// Operator combining a composite-group member with the accumulated
/// signal. `Init` is reserved for the first row of a group.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Op {
    Init,
    Plus,
    Minus,
    Times,
    Div,
}
impl Op {
    pub fn index(self) -> u8 {
        match self {
            Op::Init => 0,
            Op::Plus => 1,
            Op::Minus => 2,
            Op::Times => 3,
            Op::Div => 4,
        }
    }

    pub fn from_index(index: u8) -> Option<Op> {
        match index {
            0 => Some(Op::Init),
            1 => Some(Op::Plus),
            2 => Some(Op::Minus),
            3 => Some(Op::Times),
            4 => Some(Op::Div),
            _ => None,
        }
    }
}
impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let symbol = match self {
            Op::Init => "=",
            Op::Plus => "+",
            Op::Minus => "-",
            Op::Times => "x",
            Op::Div => "/",
        };
        write!(f, "{}", symbol)
    }
}

/// Seeding policy for stochastic waveforms.
///
/// `Fixed(s)` serializes as `fix_seed=1, seed=s` and makes the engine's
/// realization exactly reproducible. `Entropy` serializes as
/// `fix_seed=0, seed=0`: the engine draws its own seed, and the written
/// file stays byte-stable across compiler runs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Seed {
    Fixed(u64),
    Entropy,
}
impl Seed {
    /// Draws a concrete seed once, so that a stochastic stimulus is
    /// reproducible after the fact without being chosen by hand.
    pub fn random() -> Seed {
        Seed::Fixed(rand::thread_rng().gen())
    }

    fn fields(self) -> (u8, u64) {
        match self {
            Seed::Fixed(s) => (1, s),
            Seed::Entropy => (0, 0),
        }
    }
}

/// Waveform kinds and their parameters.
///
/// The numeric codes are part of the file format and must not be
/// reordered: DC=1, OU=2, Sine=3, Square=4, Saw=5, Chirp=6, Ramp=7,
/// PoissonReg=8, PoissonExp=9, PoissonBi=10, Gaussian=11, Alpha=12.
#[derive(Clone, PartialEq, Debug)]
pub enum Waveform {
    /// Constant at `amplitude`.
    Dc { amplitude: f64 },
    /// Stationary Ornstein-Uhlenbeck process with the requested
    /// steady-state mean and standard deviation and correlation time
    /// `tau_ms` (milliseconds).
    Ou { mean: f64, stddev: f64, tau_ms: f64 },
    Sine {
        amplitude: f64,
        freq: f64,
        phase: f64,
        offset: f64,
    },
    /// Square wave between 0 and `max`; `duty` is the high fraction.
    Square { max: f64, freq: f64, duty: f64 },
    /// Triangular wave; `duty` positions the peak within the period.
    Saw { max: f64, freq: f64, duty: f64 },
    /// Linear frequency sweep from `f_start` to `f_end` across the row
    /// duration.
    Chirp {
        amplitude: f64,
        f_start: f64,
        f_end: f64,
    },
    /// Linear ramp from 0 to `max` across the row duration.
    Ramp { max: f64 },
    /// Poisson pulse train, regular pulse height.
    PoissonReg {
        amplitude: f64,
        rate: f64,
        pulse_ms: f64,
    },
    /// Poisson pulse train, exponentially distributed pulse height.
    PoissonExp {
        amplitude: f64,
        rate: f64,
        pulse_ms: f64,
    },
    /// Poisson pulse train, signed bidirectional pulses.
    PoissonBi {
        amplitude: f64,
        rate: f64,
        pulse_ms: f64,
    },
    /// I.i.d. Gaussian at every sample.
    Gaussian { mean: f64, stddev: f64 },
    /// Double-exponential alpha train with the given rise and decay
    /// times (milliseconds).
    Alpha {
        amplitude: f64,
        rise_ms: f64,
        decay_ms: f64,
    },
}

impl Waveform {
    pub fn code(&self) -> i64 {
        match self {
            Waveform::Dc { .. } => 1,
            Waveform::Ou { .. } => 2,
            Waveform::Sine { .. } => 3,
            Waveform::Square { .. } => 4,
            Waveform::Saw { .. } => 5,
            Waveform::Chirp { .. } => 6,
            Waveform::Ramp { .. } => 7,
            Waveform::PoissonReg { .. } => 8,
            Waveform::PoissonExp { .. } => 9,
            Waveform::PoissonBi { .. } => 10,
            Waveform::Gaussian { .. } => 11,
            Waveform::Alpha { .. } => 12,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Waveform::Dc { .. } => "dc",
            Waveform::Ou { .. } => "ou",
            Waveform::Sine { .. } => "sine",
            Waveform::Square { .. } => "square",
            Waveform::Saw { .. } => "saw",
            Waveform::Chirp { .. } => "chirp",
            Waveform::Ramp { .. } => "ramp",
            Waveform::PoissonReg { .. } => "poisson-reg",
            Waveform::PoissonExp { .. } => "poisson-exp",
            Waveform::PoissonBi { .. } => "poisson-bi",
            Waveform::Gaussian { .. } => "gaussian",
            Waveform::Alpha { .. } => "alpha",
        }
    }

    /// True when the engine realizes this kind from a random stream, so
    /// that the seed columns matter.
    pub fn is_stochastic(&self) -> bool {
        matches!(
            self,
            Waveform::Ou { .. }
                | Waveform::PoissonReg { .. }
                | Waveform::PoissonExp { .. }
                | Waveform::PoissonBi { .. }
                | Waveform::Gaussian { .. }
        )
    }

    /// The five positional parameter slots, unused slots zero.
    pub fn params(&self) -> [f64; 5] {
        match *self {
            Waveform::Dc { amplitude } => [amplitude, 0., 0., 0., 0.],
            Waveform::Ou {
                mean,
                stddev,
                tau_ms,
            } => [mean, stddev, tau_ms, 0., 0.],
            Waveform::Sine {
                amplitude,
                freq,
                phase,
                offset,
            } => [amplitude, freq, phase, offset, 0.],
            Waveform::Square { max, freq, duty } => [max, freq, duty, 0., 0.],
            Waveform::Saw { max, freq, duty } => [max, freq, duty, 0., 0.],
            Waveform::Chirp {
                amplitude,
                f_start,
                f_end,
            } => [amplitude, f_start, f_end, 0., 0.],
            Waveform::Ramp { max } => [max, 0., 0., 0., 0.],
            Waveform::PoissonReg {
                amplitude,
                rate,
                pulse_ms,
            } => [amplitude, rate, pulse_ms, 0., 0.],
            Waveform::PoissonExp {
                amplitude,
                rate,
                pulse_ms,
            } => [amplitude, rate, pulse_ms, 0., 0.],
            Waveform::PoissonBi {
                amplitude,
                rate,
                pulse_ms,
            } => [amplitude, rate, pulse_ms, 0., 0.],
            Waveform::Gaussian { mean, stddev } => [mean, stddev, 0., 0., 0.],
            Waveform::Alpha {
                amplitude,
                rise_ms,
                decay_ms,
            } => [amplitude, rise_ms, decay_ms, 0., 0.],
        }
    }

    /// Builds a waveform from its file-format code and positional
    /// parameters. Code 0 is forbidden by the format.
    pub fn from_code(code: i64, p: [f64; 5]) -> Result<Waveform> {
        let w = match code {
            1 => Waveform::Dc { amplitude: p[0] },
            2 => Waveform::Ou {
                mean: p[0],
                stddev: p[1],
                tau_ms: p[2],
            },
            3 => Waveform::Sine {
                amplitude: p[0],
                freq: p[1],
                phase: p[2],
                offset: p[3],
            },
            4 => Waveform::Square {
                max: p[0],
                freq: p[1],
                duty: p[2],
            },
            5 => Waveform::Saw {
                max: p[0],
                freq: p[1],
                duty: p[2],
            },
            6 => Waveform::Chirp {
                amplitude: p[0],
                f_start: p[1],
                f_end: p[2],
            },
            7 => Waveform::Ramp { max: p[0] },
            8 => Waveform::PoissonReg {
                amplitude: p[0],
                rate: p[1],
                pulse_ms: p[2],
            },
            9 => Waveform::PoissonExp {
                amplitude: p[0],
                rate: p[1],
                pulse_ms: p[2],
            },
            10 => Waveform::PoissonBi {
                amplitude: p[0],
                rate: p[1],
                pulse_ms: p[2],
            },
            11 => Waveform::Gaussian {
                mean: p[0],
                stddev: p[1],
            },
            12 => Waveform::Alpha {
                amplitude: p[0],
                rise_ms: p[1],
                decay_ms: p[2],
            },
            other => {
                return Err(Error::Schema(format!(
                    "unknown waveform code {}",
                    other
                )))
            }
        };
        Ok(w)
    }

    /// Builds a waveform from its command-line name and positional
    /// parameters, as used by the fragment grammar in [`crate::parse`].
    pub fn from_name(name: &str, p: [f64; 5]) -> Result<Waveform> {
        let code = match name {
            "dc" => 1,
            "ou" => 2,
            "sine" => 3,
            "square" => 4,
            "saw" => 5,
            "chirp" => 6,
            "ramp" => 7,
            "poisson-reg" => 8,
            "poisson-exp" => 9,
            "poisson-bi" => 10,
            "gaussian" => 11,
            "alpha" => 12,
            other => {
                return Err(Error::Schema(format!(
                    "unknown waveform name '{}'",
                    other
                )))
            }
        };
        Waveform::from_code(code, p)
    }
}
impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let p = self.params();
        write!(
            f,
            "{}({}, {}, {}, {}, {})",
            self.name(),
            p[0],
            p[1],
            p[2],
            p[3],
            p[4]
        )
    }
}

/// One row of the stimulus table.
#[derive(Clone, PartialEq, Debug)]
pub struct StimRow {
    pub duration: f64,
    pub waveform: Waveform,
    pub seed: Seed,
    pub exponent: f64,
}
impl StimRow {
    pub fn new(duration: f64, waveform: Waveform) -> StimRow {
        StimRow {
            duration,
            waveform,
            seed: Seed::Entropy,
            exponent: 1.,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> StimRow {
        self.seed = Seed::Fixed(seed);
        self
    }

    pub fn with_exponent(mut self, exponent: f64) -> StimRow {
        self.exponent = exponent;
        self
    }

    fn line(&self, code: i64, extra_code: i64, op: Op, duration: f64) -> String {
        let p = self.waveform.params();
        let (fix_seed, seed) = self.seed.fields();
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            duration,
            code,
            p[0],
            p[1],
            p[2],
            p[3],
            p[4],
            fix_seed,
            seed,
            extra_code,
            op.index(),
            self.exponent
        )
    }
}

/// A zero-amplitude row, the workhorse of delays and gaps.
fn zero(duration: f64) -> StimRow {
    StimRow::new(duration, Waveform::Dc { amplitude: 0. })
}

enum Entry {
    Single(StimRow),
    /// Composite group: first member carries `Op::Init` and the group
    /// duration; the rest carry the combining operator and duration 0.
    Group(Vec<(Op, StimRow)>),
    /// A literal line of the file format, written verbatim.
    Raw([f64; 12]),
}

/// An ordered list of stimulus rows and composite groups.
///
/// Group structure is validated on insertion so that a `Stimulus` that
/// exists is always serializable; `write` never rejects.
#[derive(Default)]
pub struct Stimulus {
    entries: Vec<Entry>,
}

impl Stimulus {
    pub fn new() -> Stimulus {
        Stimulus {
            entries: Vec::new(),
        }
    }

    /// Appends a plain row. Rows with `duration == 0` are legal here and
    /// silently dropped when the file is written.
    pub fn push(&mut self, row: StimRow) {
        self.entries.push(Entry::Single(row));
    }

    /// Appends a composite group. The first member must carry
    /// `Op::Init` and a strictly positive duration; every other member
    /// one of `+ - x /` and duration 0 or equal to the head's (members
    /// inherit the head's duration and serialize with 0).
    pub fn push_group(&mut self, members: Vec<(Op, StimRow)>) -> Result<()> {
        if members.len() < 2 {
            return Err(Error::Schema(format!(
                "composite group needs at least 2 members, got {}",
                members.len()
            )));
        }
        let head_duration = members[0].1.duration;
        for (pos, (op, row)) in members.iter().enumerate() {
            if pos == 0 {
                if *op != Op::Init {
                    return Err(Error::Schema(format!(
                        "first group member must open the group, found operator '{}'",
                        op
                    )));
                }
                if row.duration <= 0. {
                    return Err(Error::Schema(format!(
                        "group head needs a positive duration, got {}",
                        row.duration
                    )));
                }
            } else {
                if *op == Op::Init {
                    return Err(Error::Schema(format!(
                        "group member {} is missing its operator",
                        pos + 1
                    )));
                }
                if row.duration != 0. && row.duration != head_duration {
                    return Err(Error::Schema(format!(
                        "group member {} must have duration 0 or the head's {} (got {})",
                        pos + 1,
                        head_duration,
                        row.duration
                    )));
                }
            }
        }
        self.entries.push(Entry::Group(members));
        Ok(())
    }

    /// Appends a literal row of the file format, written verbatim. The
    /// escape hatch for protocol scripts that carry raw lines; the first
    /// field is still counted as the row's duration.
    pub fn push_raw(&mut self, fields: [f64; 12]) {
        self.entries.push(Entry::Raw(fields));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total signal duration in seconds: plain rows plus one head
    /// duration per group.
    pub fn duration(&self) -> f64 {
        self.entries
            .iter()
            .map(|entry| match entry {
                Entry::Single(row) => row.duration,
                Entry::Group(members) => members[0].1.duration,
                Entry::Raw(fields) => fields[0],
            })
            .sum()
    }

    fn serialize(&self, out: &mut String) {
        for entry in &self.entries {
            match entry {
                Entry::Single(row) => {
                    // Zero-duration plain rows carry no signal; drop them.
                    if row.duration == 0. {
                        continue;
                    }
                    out.push_str(&row.line(row.waveform.code(), 0, Op::Init, row.duration));
                }
                Entry::Group(members) => {
                    let code = -(members.len() as i64);
                    for (pos, (op, row)) in members.iter().enumerate() {
                        let duration = if pos == 0 { row.duration } else { 0. };
                        out.push_str(&row.line(code, row.waveform.code(), *op, duration));
                    }
                }
                Entry::Raw(fields) => {
                    let rendered = fields
                        .iter()
                        .map(|f| f.to_string())
                        .collect::<Vec<String>>()
                        .join("\t");
                    out.push_str(&rendered);
                    out.push('\n');
                }
            }
        }
    }
}

/// The fixed diagnostic preamble: 0.5 s zero, 10 ms at -300, 0.5 s zero,
/// 600 ms at -100, 1 s zero. Total [`PREAMBLE_DURATION`] seconds.
pub fn preamble() -> Vec<StimRow> {
    vec![
        zero(0.5),
        StimRow::new(0.01, Waveform::Dc { amplitude: -300. }),
        zero(0.5),
        StimRow::new(0.6, Waveform::Dc { amplitude: -100. }),
        zero(1.),
    ]
}

fn write_lines(path: &Path, contents: &str, append: bool) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| Error::io(path, e))?;
    file.sync_all().map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// Writes the stimulus table to `path`, optionally prefixed by the
/// diagnostic preamble. Returns the total duration in seconds of the
/// written file.
pub fn write_stim(path: impl AsRef<Path>, stim: &Stimulus, add_preamble: bool) -> Result<f64> {
    let path = path.as_ref();
    let mut contents = String::new();
    let mut duration = stim.duration();
    if add_preamble {
        let mut head = Stimulus::new();
        for row in preamble() {
            head.push(row);
        }
        head.serialize(&mut contents);
        duration += PREAMBLE_DURATION;
    }
    stim.serialize(&mut contents);
    write_lines(path, &contents, false)?;
    debug!(path = %path.display(), duration, "wrote stimulus file");
    Ok(duration)
}

/// Appends the stimulus table to an existing file (creating it when
/// absent). Returns the duration of the appended rows only.
pub fn append_stim(path: impl AsRef<Path>, stim: &Stimulus) -> Result<f64> {
    let path = path.as_ref();
    let mut contents = String::new();
    stim.serialize(&mut contents);
    write_lines(path, &contents, true)?;
    debug!(path = %path.display(), duration = stim.duration(), "appended to stimulus file");
    Ok(stim.duration())
}

/// Writes a pulse-train stimulus: a delay, `n` pulses of
/// `pulse_width_ms` at `amplitude` with inter-pulse gaps such that
/// `1/frequency` is the pulse period, optionally a 0.5 s gap plus one
/// recovery pulse, then a final delay. Returns the total duration.
pub fn write_pulse_train(
    path: impl AsRef<Path>,
    frequency: f64,
    pulse_width_ms: f64,
    amplitude: f64,
    n: usize,
    delay_s: f64,
    with_recovery: bool,
) -> Result<f64> {
    if frequency <= 0. {
        return Err(Error::Schema(format!(
            "pulse train frequency must be positive, got {}",
            frequency
        )));
    }
    let width = pulse_width_ms * 1e-3;
    let gap = 1. / frequency - width;
    if gap < 0. {
        return Err(Error::Schema(format!(
            "pulse width {} ms does not fit in a period of {} s",
            pulse_width_ms,
            1. / frequency
        )));
    }
    let pulse = || StimRow::new(width, Waveform::Dc { amplitude });

    let mut stim = Stimulus::new();
    stim.push(zero(delay_s));
    for i in 0..n {
        stim.push(pulse());
        if i + 1 < n {
            stim.push(zero(gap));
        }
    }
    if with_recovery {
        stim.push(zero(0.5));
        stim.push(pulse());
    }
    stim.push(zero(delay_s));
    write_stim(path, &stim, false)
}

/// Whether a sinusoidally modulated conductance emulates an excitatory
/// or an inhibitory presynaptic population.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OuKind {
    Excitatory,
    Inhibitory,
}
impl OuKind {
    pub fn from_name(name: &str) -> Result<OuKind> {
        match name {
            "exc" => Ok(OuKind::Excitatory),
            "inh" => Ok(OuKind::Inhibitory),
            other => Err(Error::Schema(format!(
                "unknown conductance kind '{}', expected 'exc' or 'inh'",
                other
            ))),
        }
    }
}

/// How the single-afferent peak conductance is chosen. The lab has used
/// both conventions; the relation between them is not documented, so
/// both stay explicit options.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OuConductance {
    /// Fixed single-channel values: 50 pS excitatory, 190 pS inhibitory.
    SingleChannel,
    /// Scaled by the cell's input resistance: 0.02/Rin uS excitatory,
    /// 0.06/Rin uS inhibitory, Rin in MOhm.
    ResistanceScaled,
}
impl OuConductance {
    /// Peak conductance in nS for the given kind and input resistance.
    fn peak_ns(self, kind: OuKind, rin_mohm: f64) -> f64 {
        match (self, kind) {
            (OuConductance::SingleChannel, OuKind::Excitatory) => 0.05,
            (OuConductance::SingleChannel, OuKind::Inhibitory) => 0.19,
            (OuConductance::ResistanceScaled, OuKind::Excitatory) => 20. / rin_mohm,
            (OuConductance::ResistanceScaled, OuKind::Inhibitory) => 60. / rin_mohm,
        }
    }
}

/// Writes a conductance stimulus whose mean and standard deviation are
/// sinusoidally modulated at `f` Hz around a baseline presynaptic rate
/// `r0` with amplitude `dr`.
///
/// The emitted file is exactly five rows: one 2.61 s zero row, a
/// composite group of three rows (the Ornstein-Uhlenbeck carrier, a
/// multiplicative sine modulating the standard deviation, an additive
/// sine carrying the mean and its modulation), and a 1 s zero tail.
///
/// With peak conductance `g` (chosen by `mode`), correlation time `tau`
/// and rate `r(t) = r0 + dr sin(2 pi f t)`, the shot-noise moments give
/// mean `g tau r(t)` and variance `g^2 tau r(t) / 2`; the std modulation
/// depth is `dr/(2 r0)` to first order.
#[allow(clippy::too_many_arguments)]
pub fn write_sinusoidally_modulated_ou(
    path: impl AsRef<Path>,
    f: f64,
    r0: f64,
    dr: f64,
    rin_mohm: f64,
    tau_ms: f64,
    duration: f64,
    kind: OuKind,
    mode: OuConductance,
    seed: u64,
) -> Result<f64> {
    if r0 <= 0. || duration <= 0. || tau_ms <= 0. {
        return Err(Error::Schema(format!(
            "modulated OU needs positive rate, duration and tau (got r0={}, duration={}, tau={})",
            r0, duration, tau_ms
        )));
    }
    let g = mode.peak_ns(kind, rin_mohm);
    let tau_s = tau_ms * 1e-3;
    let g_mean = g * tau_s * r0;
    let g_std = g * (tau_s * r0 / 2.).sqrt();

    let carrier = StimRow::new(
        duration,
        Waveform::Ou {
            mean: 0.,
            stddev: g_std,
            tau_ms,
        },
    )
    .with_seed(seed);
    let std_mod = StimRow::new(
        0.,
        Waveform::Sine {
            amplitude: dr / (2. * r0),
            freq: f,
            phase: 0.,
            offset: 1.,
        },
    );
    let mean_mod = StimRow::new(
        0.,
        Waveform::Sine {
            amplitude: g * tau_s * dr,
            freq: f,
            phase: 0.,
            offset: g_mean,
        },
    );

    let mut stim = Stimulus::new();
    stim.push(zero(PREAMBLE_DURATION));
    stim.push_group(vec![
        (Op::Init, carrier),
        (Op::Times, std_mod),
        (Op::Plus, mean_mod),
    ])?;
    stim.push(zero(1.));
    write_stim(path, &stim, false)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn group_must_open_with_init() {
        let mut stim = Stimulus::new();
        let err = stim
            .push_group(vec![
                (Op::Plus, StimRow::new(1., Waveform::Dc { amplitude: 1. })),
                (Op::Plus, StimRow::new(0., Waveform::Dc { amplitude: 1. })),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn group_member_duration_inherits() {
        let mut stim = Stimulus::new();
        let err = stim
            .push_group(vec![
                (Op::Init, StimRow::new(1., Waveform::Dc { amplitude: 1. })),
                (Op::Plus, StimRow::new(2., Waveform::Dc { amplitude: 1. })),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn group_member_may_repeat_the_head_duration() {
        let mut stim = Stimulus::new();
        stim.push_group(vec![
            (Op::Init, StimRow::new(1.5, Waveform::Dc { amplitude: 1. })),
            (Op::Plus, StimRow::new(1.5, Waveform::Dc { amplitude: 2. })),
        ])
        .unwrap();
        let mut out = String::new();
        stim.serialize(&mut out);
        let member = out.lines().nth(1).unwrap();
        assert!(member.starts_with("0\t-2\t"), "member serializes with duration 0: {}", member);
    }

    #[test]
    fn raw_rows_are_written_verbatim() {
        let mut stim = Stimulus::new();
        stim.push_raw([0.25, 3., 80., 2., 0., -50., 0., 0., 0., 0., 0., 1.]);
        assert_eq!(stim.duration(), 0.25);
        let mut out = String::new();
        stim.serialize(&mut out);
        assert_eq!(out, "0.25\t3\t80\t2\t0\t-50\t0\t0\t0\t0\t0\t1\n");
    }

    #[test]
    fn duration_counts_groups_once() {
        let mut stim = Stimulus::new();
        stim.push(StimRow::new(0.5, Waveform::Dc { amplitude: 0. }));
        stim.push_group(vec![
            (Op::Init, StimRow::new(2., Waveform::Dc { amplitude: 1. })),
            (
                Op::Plus,
                StimRow::new(
                    0.,
                    Waveform::Sine {
                        amplitude: 1.,
                        freq: 5.,
                        phase: 0.,
                        offset: 0.,
                    },
                ),
            ),
        ])
        .unwrap();
        assert_eq!(stim.duration(), 2.5);
    }
}
