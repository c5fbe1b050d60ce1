use crate::error::TimingError;
use crate::model::TimingModel;
use crate::precision::Dd;
use crate::time::Mjd;
use hifitime::TimeScale;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One observed pulse arrival, already referred to the barycentre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toa {
    /// Position in the table as originally loaded; survives masking and deletion.
    pub index: usize,
    pub tdb: Mjd,
    pub error_us: f64,
    pub freq_mhz: f64,
    pub observatory: String,
    pub flags: BTreeMap<String, String>,
    /// Absolute pulse number assigned from a model, once pulse numbering is in use.
    #[serde(default)]
    pub pulse_number: Option<Dd>,
    /// Whole turns added on top of `pulse_number` by phase wraps.
    #[serde(default)]
    pub delta_pulse_number: i64,
}

/// Serialized form of a TOA as handed over by a loader or a browser front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToaRecord {
    /// Barycentric (TDB) arrival time as an MJD decimal string.
    pub mjd: String,
    pub error_us: f64,
    #[serde(default = "default_freq_mhz")]
    pub freq_mhz: f64,
    #[serde(default)]
    pub observatory: String,
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
}

fn default_freq_mhz() -> f64 {
    1400.0
}

/// Gap separating two observing sessions when grouping TOAs: two hours.
pub const GROUP_GAP_DAYS: f64 = 2.0 / 24.0;

/// The window of fixed length holding the most TOAs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityRange {
    pub start_mjd: f64,
    pub end_mjd: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Toas {
    toas: Vec<Toa>,
}

impl Toas {
    pub fn new(toas: Vec<Toa>) -> Self {
        Self { toas }
    }

    /// Builds a table from barycentric times with a uniform uncertainty.
    pub fn from_times(times: &[Mjd], error_us: f64) -> Self {
        let toas = times
            .iter()
            .enumerate()
            .map(|(index, &tdb)| Toa {
                index,
                tdb,
                error_us,
                freq_mhz: default_freq_mhz(),
                observatory: String::new(),
                flags: BTreeMap::new(),
                pulse_number: None,
                delta_pulse_number: 0,
            })
            .collect();
        Self { toas }
    }

    pub fn from_records(records: &[ToaRecord]) -> Result<Self, TimingError> {
        let toas = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let tdb = Mjd::parse(&record.mjd, TimeScale::TDB).map_err(|_| {
                    TimingError::InvalidValue {
                        param: format!("TOA {index} MJD"),
                        value: record.mjd.clone(),
                    }
                })?;
                Ok(Toa {
                    index,
                    tdb,
                    error_us: record.error_us,
                    freq_mhz: record.freq_mhz,
                    observatory: record.observatory.clone(),
                    flags: record.flags.clone(),
                    pulse_number: None,
                    delta_pulse_number: 0,
                })
            })
            .collect::<Result<Vec<_>, TimingError>>()?;
        Ok(Self { toas })
    }

    pub fn len(&self) -> usize {
        self.toas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toas.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Toa> {
        self.toas.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Toa> {
        self.toas.iter()
    }

    pub fn tdb(&self) -> Vec<Mjd> {
        self.toas.iter().map(|toa| toa.tdb).collect()
    }

    /// Barycentric times as high-precision MJD values.
    pub fn tdbld(&self) -> Vec<Dd> {
        self.toas.iter().map(|toa| toa.tdb.days()).collect()
    }

    pub fn mjds_f64(&self) -> Vec<f64> {
        self.toas.iter().map(|toa| toa.tdb.to_f64()).collect()
    }

    pub fn errors_us(&self) -> Vec<f64> {
        self.toas.iter().map(|toa| toa.error_us).collect()
    }

    pub fn freqs_mhz(&self) -> Vec<f64> {
        self.toas.iter().map(|toa| toa.freq_mhz).collect()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.toas.iter().map(|toa| toa.index).collect()
    }

    pub fn has_pulse_numbers(&self) -> bool {
        !self.toas.is_empty() && self.toas.iter().all(|toa| toa.pulse_number.is_some())
    }

    /// Assigns every TOA the pulse number nearest its model phase and clears any
    /// accumulated phase wraps.
    pub fn compute_pulse_numbers(&mut self, model: &TimingModel) -> Result<(), TimingError> {
        let phase = model.phase(self)?;
        for (toa, cycles) in self.toas.iter_mut().zip(phase) {
            toa.pulse_number = Some(cycles.round());
            toa.delta_pulse_number = 0;
        }
        Ok(())
    }

    /// Adds `wraps` whole turns to the rows where `mask` is true.
    pub fn add_delta_pulse_numbers(&mut self, mask: &[bool], wraps: i64) -> Result<(), TimingError> {
        TimingError::check_len("TOA mask", self.len(), mask.len())?;
        for (toa, _) in self.toas.iter_mut().zip(mask).filter(|(_, hit)| **hit) {
            toa.delta_pulse_number += wraps;
        }
        Ok(())
    }

    /// Observing-session label per row: TOAs sorted in time start a new group
    /// whenever the spacing reaches `gap_days`. Labels count up in time order.
    pub fn groups(&self, gap_days: f64) -> Vec<usize> {
        let mjds = self.mjds_f64();
        let mut order: Vec<usize> = (0..mjds.len()).collect();
        order.sort_by(|&a, &b| mjds[a].total_cmp(&mjds[b]));
        let mut labels = vec![0; mjds.len()];
        let mut group = 0;
        for pair in order.windows(2) {
            if mjds[pair[1]] - mjds[pair[0]] >= gap_days {
                group += 1;
            }
            labels[pair[1]] = group;
        }
        labels
    }

    /// The `ndays`-long window, starting on a TOA, that contains the most TOAs.
    /// Ties go to the earliest window.
    pub fn highest_density_range(&self, ndays: f64) -> Option<DensityRange> {
        let mut mjds = self.mjds_f64();
        mjds.sort_by(f64::total_cmp);
        let mut best: Option<DensityRange> = None;
        for (start, &first) in mjds.iter().enumerate() {
            let end_mjd = first + ndays;
            let count = mjds[start..].partition_point(|&mjd| mjd < end_mjd);
            if best.map_or(true, |range| count > range.count) {
                best = Some(DensityRange {
                    start_mjd: first,
                    end_mjd,
                    count,
                });
            }
        }
        best
    }

    /// Sub-table of the rows where `mask` is true.
    pub fn select(&self, mask: &[bool]) -> Result<Toas, TimingError> {
        TimingError::check_len("TOA mask", self.len(), mask.len())?;
        let toas = self
            .toas
            .iter()
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|(toa, _)| toa.clone())
            .collect();
        Ok(Toas { toas })
    }
}
