//! Process-wide defaults for channel descriptors.
//!
//! The lab keeps DAQ wiring conventions (device path, subdevices,
//! per-clamp-mode conversion factors and units, ground reference, input
//! range, sampling rate) in the process environment; the keys are stable
//! identifiers. The core takes an explicit [`Defaults`] record and never
//! touches the environment itself; [`Defaults::from_env`] is the
//! convenience at the CLI boundary.

use std::collections::HashMap;
use std::env;

/// Amplifier clamp mode, selecting conversion factors and units.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClampMode {
    CurrentClamp,
    VoltageClamp,
}
impl ClampMode {
    fn suffix(self) -> &'static str {
        match self {
            ClampMode::CurrentClamp => "CC",
            ClampMode::VoltageClamp => "VC",
        }
    }
}

/// Per-clamp-mode defaults.
#[derive(Clone, PartialEq, Debug)]
pub struct ModeDefaults {
    pub ai_channel: u32,
    pub ao_channel: u32,
    pub ai_conversion_factor: f64,
    pub ao_conversion_factor: f64,
    pub ai_units: String,
    pub ao_units: String,
}

/// Process-wide defaults used to fill omitted channel-descriptor fields.
#[derive(Clone, PartialEq, Debug)]
pub struct Defaults {
    pub device: String,
    pub ai_subdevice: u32,
    pub ao_subdevice: u32,
    pub current_clamp: ModeDefaults,
    pub voltage_clamp: ModeDefaults,
    pub range: String,
    pub ground_reference: String,
    pub sampling_rate: f64,
    pub realtime: bool,
    pub reset_output: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            device: "/dev/comedi0".to_string(),
            ai_subdevice: 0,
            ao_subdevice: 1,
            current_clamp: ModeDefaults {
                ai_channel: 0,
                ao_channel: 0,
                ai_conversion_factor: 100.,
                ao_conversion_factor: 0.001,
                ai_units: "mV".to_string(),
                ao_units: "pA".to_string(),
            },
            voltage_clamp: ModeDefaults {
                ai_channel: 0,
                ao_channel: 0,
                ai_conversion_factor: 2000.,
                ao_conversion_factor: 0.02,
                ai_units: "pA".to_string(),
                ao_units: "mV".to_string(),
            },
            range: "[-10,+10]".to_string(),
            ground_reference: "GRSE".to_string(),
            sampling_rate: 20000.,
            realtime: true,
            reset_output: true,
        }
    }
}

impl Defaults {
    pub fn mode(&self, mode: ClampMode) -> &ModeDefaults {
        match mode {
            ClampMode::CurrentClamp => &self.current_clamp,
            ClampMode::VoltageClamp => &self.voltage_clamp,
        }
    }

    /// Builds the defaults from an explicit key/value map. Unknown keys
    /// are ignored; missing keys keep their built-in values. Mode-tagged
    /// keys (`AI_CHANNEL_CC`, ...) take precedence over the untagged
    /// fallback (`AI_CHANNEL`).
    pub fn from_map(map: &HashMap<String, String>) -> Defaults {
        let mut defaults = Defaults::default();

        let get = |key: &str| map.get(key).map(|s| s.as_str());
        let parse_f64 = |key: &str, slot: &mut f64| {
            if let Some(v) = get(key).and_then(|s| s.parse().ok()) {
                *slot = v;
            }
        };
        let parse_u32 = |key: &str, slot: &mut u32| {
            if let Some(v) = get(key).and_then(|s| s.parse().ok()) {
                *slot = v;
            }
        };
        let parse_bool = |key: &str, slot: &mut bool| {
            // Accepts 0/1 and textual booleans, the conventions both
            // appear in lab setups.
            if let Some(v) = get(key) {
                match v {
                    "1" | "true" | "yes" => *slot = true,
                    "0" | "false" | "no" => *slot = false,
                    _ => {}
                }
            }
        };
        let parse_string = |key: &str, slot: &mut String| {
            if let Some(v) = get(key) {
                *slot = v.to_string();
            }
        };

        parse_string("COMEDI_DEVICE", &mut defaults.device);
        parse_u32("AI_SUBDEVICE", &mut defaults.ai_subdevice);
        parse_u32("AO_SUBDEVICE", &mut defaults.ao_subdevice);
        parse_string("RANGE", &mut defaults.range);
        parse_string("GROUND_REFERENCE", &mut defaults.ground_reference);
        parse_f64("SAMPLING_RATE", &mut defaults.sampling_rate);
        parse_bool("LCG_REALTIME", &mut defaults.realtime);
        parse_bool("LCG_RESET_OUTPUT", &mut defaults.reset_output);

        for mode in [ClampMode::CurrentClamp, ClampMode::VoltageClamp] {
            let suffix = mode.suffix();
            let slot = match mode {
                ClampMode::CurrentClamp => &mut defaults.current_clamp,
                ClampMode::VoltageClamp => &mut defaults.voltage_clamp,
            };
            parse_u32("AI_CHANNEL", &mut slot.ai_channel);
            parse_u32("AO_CHANNEL", &mut slot.ao_channel);
            parse_u32(&format!("AI_CHANNEL_{}", suffix), &mut slot.ai_channel);
            parse_u32(&format!("AO_CHANNEL_{}", suffix), &mut slot.ao_channel);
            parse_f64(
                &format!("AI_CONVERSION_FACTOR_{}", suffix),
                &mut slot.ai_conversion_factor,
            );
            parse_f64(
                &format!("AO_CONVERSION_FACTOR_{}", suffix),
                &mut slot.ao_conversion_factor,
            );
            parse_string(&format!("AI_UNITS_{}", suffix), &mut slot.ai_units);
            parse_string(&format!("AO_UNITS_{}", suffix), &mut slot.ao_units);
        }

        defaults
    }

    /// Reads the defaults from the process environment.
    pub fn from_env() -> Defaults {
        let map: HashMap<String, String> = env::vars().collect();
        Defaults::from_map(&map)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn mode_tagged_keys_win_over_fallback() {
        let defaults = Defaults::from_map(&hashmap! {
            "AI_CHANNEL".to_string() => "2".to_string(),
            "AI_CHANNEL_VC".to_string() => "5".to_string(),
        });
        assert_eq!(defaults.current_clamp.ai_channel, 2);
        assert_eq!(defaults.voltage_clamp.ai_channel, 5);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let defaults = Defaults::from_map(&hashmap! {
            "SAMPLING_RATE".to_string() => "15000".to_string(),
            "NOT_A_KEY".to_string() => "1".to_string(),
        });
        assert_eq!(defaults.sampling_rate, 15000.);
        assert_eq!(defaults.device, "/dev/comedi0");
    }
}
