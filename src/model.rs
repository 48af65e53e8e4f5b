//! Per-entity classification records.
//!
//! A [`Record`] is one row of the cache: the counters and hit rates the
//! external stats command reports for a single entity (usually a mailbox).

use std::num::ParseFloatError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Entity id the stats command uses for its own pre-aggregated sum.
pub const TOTAL_ENTITY: &str = "TOTAL";

/// Six classification counters of one entity (or a sum of entities).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// True positives: spam correctly caught.
    pub tp: u64,
    /// True negatives: ham correctly delivered.
    pub tn: u64,
    /// False positives: ham misclassified as spam.
    pub fp: u64,
    /// False negatives: spam that slipped through.
    #[serde(rename = "fn")]
    pub fn_: u64,
    /// Spam corpus-fed messages.
    pub sc: u64,
    /// Ham (nonspam) corpus-fed messages.
    pub nc: u64,
}

impl Counters {
    /// Labels in the order the stats command prints them.
    pub const LABELS: [&'static str; 6] = ["tp", "tn", "fp", "fn", "sc", "nc"];

    /// Returns the counters as an array ordered like [`Counters::LABELS`].
    pub fn as_array(&self) -> [u64; 6] {
        [self.tp, self.tn, self.fp, self.fn_, self.sc, self.nc]
    }

    /// Grand sum across all six categories, saturating at `u64::MAX`.
    pub fn total(&self) -> u64 {
        self.as_array().iter().fold(0u64, |acc, v| acc.saturating_add(*v))
    }
}

impl std::ops::Add for Counters {
    type Output = Counters;

    fn add(self, rhs: Counters) -> Counters {
        Counters {
            tp: self.tp.saturating_add(rhs.tp),
            tn: self.tn.saturating_add(rhs.tn),
            fp: self.fp.saturating_add(rhs.fp),
            fn_: self.fn_.saturating_add(rhs.fn_),
            sc: self.sc.saturating_add(rhs.sc),
            nc: self.nc.saturating_add(rhs.nc),
        }
    }
}

/// A percentage as the stats command printed it.
///
/// The original digits are kept so the cache reproduces them exactly; the
/// numeric value is what queries use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "f64", from = "f64")]
pub struct Percent {
    value: f64,
    text: String,
}

impl Percent {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for Percent {
    type Err = ParseFloatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            value: s.parse()?,
            text: s.to_string(),
        })
    }
}

impl From<f64> for Percent {
    fn from(value: f64) -> Self {
        Self {
            value,
            text: format!("{:.2}", value),
        }
    }
}

impl From<Percent> for f64 {
    fn from(p: Percent) -> f64 {
        p.value
    }
}

impl std::fmt::Display for Percent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Normalized snapshot of a single entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity_id: String,
    /// `entity_id` made safe for use as a field name. Not guaranteed unique.
    pub normalized_id: String,
    pub counters: Counters,
    /// Spam hit rate, percent.
    pub shr: Percent,
    /// Ham strike rate, percent.
    pub hsr: Percent,
    /// Overall accuracy, percent.
    pub oca: Percent,
}

impl Record {
    /// Builds a record, deriving `normalized_id` from `entity_id`.
    pub fn new(
        entity_id: impl Into<String>,
        counters: Counters,
        shr: impl Into<Percent>,
        hsr: impl Into<Percent>,
        oca: impl Into<Percent>,
    ) -> Self {
        let entity_id = entity_id.into();
        Self {
            normalized_id: normalize_id(&entity_id),
            entity_id,
            counters,
            shr: shr.into(),
            hsr: hsr.into(),
            oca: oca.into(),
        }
    }

    /// Returns `true` for the stats command's pre-aggregated `TOTAL` row.
    pub fn is_total(&self) -> bool {
        self.entity_id == TOTAL_ENTITY
    }
}

/// Replaces every character that is not an ASCII letter or digit with `_`.
///
/// ```
/// use dspamstat::model::normalize_id;
///
/// assert_eq!(normalize_id("alice@example.org"), "alice_example_org");
/// ```
pub fn normalize_id(entity_id: &str) -> String {
    entity_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
