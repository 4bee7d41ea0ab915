use crate::error::AppError;
use serde::Serialize;
use std::collections::BTreeMap;

pub const FRAME_DELIMITER: char = '$';
pub const FIELD_SEPARATOR: char = ',';

pub const KEY_VIN: &str = "Vin";
pub const KEY_VOUT: &str = "Vout";
pub const KEY_BATCAP: &str = "BATCAP";
pub const KEY_HARDWARE: &str = "SmartUPS";
/// Key for tokens that carry no `KEY value` separator.
pub const BARE_TOKEN_KEY: &str = "";

pub const MAINS_GOOD: &str = "GOOD";

/// One parsed telemetry frame. Unknown keys are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TelemetryRecord {
    fields: BTreeMap<String, String>,
}

impl TelemetryRecord {
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn vin(&self) -> Option<&str> {
        self.get(KEY_VIN)
    }

    pub fn on_mains(&self) -> Option<bool> {
        self.vin().map(|vin| vin == MAINS_GOOD)
    }

    /// Battery percentage from `BATCAP`, tolerating a trailing `%`.
    pub fn battery_level(&self) -> Option<u8> {
        let raw = self.get(KEY_BATCAP)?.trim().trim_end_matches('%').trim();
        raw.parse::<u8>().ok().filter(|level| *level <= 100)
    }

    /// Output voltage in volts; the frame carries millivolts.
    pub fn vout_volts(&self) -> Option<f64> {
        let millivolts = self.get(KEY_VOUT)?.trim().parse::<f64>().ok()?;
        Some(millivolts / 1000.0)
    }

    pub fn hardware_version(&self) -> Option<&str> {
        self.get(KEY_HARDWARE)
    }

    /// On mains and not yet full.
    pub fn charging(&self) -> Option<bool> {
        let on_mains = self.on_mains()?;
        self.get(KEY_BATCAP)?;
        Some(on_mains && self.battery_level() != Some(100))
    }

    pub fn discharging(&self) -> Option<bool> {
        self.on_mains().map(|on_mains| !on_mains)
    }
}

/// Parse a `$KEY value,KEY value,...$` line.
pub fn parse_frame(line: &str) -> TelemetryRecord {
    let body = line
        .trim()
        .trim_start_matches(FRAME_DELIMITER)
        .trim_end_matches(FRAME_DELIMITER)
        .trim();

    let mut fields = BTreeMap::new();
    for token in body.split(FIELD_SEPARATOR).map(str::trim) {
        match token.split_once(' ') {
            Some((key, value)) => {
                fields.insert(key.to_string(), value.trim().to_string());
            }
            None => {
                fields.insert(BARE_TOKEN_KEY.to_string(), String::new());
            }
        }
    }
    TelemetryRecord { fields }
}

/// The mains flag every frame must carry. Other fields degrade on their own.
pub fn mains_flag(record: &TelemetryRecord) -> Result<bool, AppError> {
    record
        .on_mains()
        .ok_or_else(|| AppError::MalformedFrame(format!("missing {KEY_VIN}")))
}
