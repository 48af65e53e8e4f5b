//! Parser for the external stats command output.
//!
//! The command prints a fixed three-line cycle per entity:
//!
//! ```text
//! alice@example.org
//!     TP:    10 TN:    20 FP:     1 FN:     2 SC:     0 NC:     0
//!     SHR:    5.00%       HSR:   95.00%       OCA:   90.91%
//! ```
//!
//! Parsing is a small state machine fed one line at a time. Any line that
//! does not match what the current state expects is a hard error: a single
//! malformed cycle would otherwise shift every following field.

use crate::model::{Counters, Percent, Record};

const COUNTER_LABELS: [&str; 6] = ["TP:", "TN:", "FP:", "FN:", "SC:", "NC:"];
const PERCENT_LABELS: [&str; 3] = ["SHR:", "HSR:", "OCA:"];

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// 1-based line number in the command output (0 when at end of input).
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, msg: impl Into<String>) -> Self {
        Self {
            line,
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.line == 0 {
            write!(f, "Parse error at end of input: {}", self.message)
        } else {
            write!(f, "Parse error on line {}: {}", self.line, self.message)
        }
    }
}

impl std::error::Error for ParseError {}

/// What the parser expects on the next line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserState {
    ExpectHeader,
    ExpectCounters { entity: String },
    ExpectPercentages { entity: String, counters: Counters },
}

/// Incremental parser: feed lines, collect one [`Record`] per completed cycle.
#[derive(Debug)]
pub struct StatsParser {
    state: ParserState,
    line_no: usize,
}

impl Default for StatsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::ExpectHeader,
            line_no: 0,
        }
    }

    /// Consumes one line. Returns a record when the line completes a cycle.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<Record>, ParseError> {
        self.line_no += 1;
        let tokens: Vec<&str> = line.split_whitespace().collect();

        let state = std::mem::replace(&mut self.state, ParserState::ExpectHeader);
        match state {
            ParserState::ExpectHeader => {
                let Some(first) = tokens.first() else {
                    // Blank separator lines are tolerated between cycles only.
                    return Ok(None);
                };
                if is_label(first) {
                    return Err(self.error(format!("expected entity id, found '{}' line", first)));
                }
                if tokens.len() != 1 {
                    return Err(self.error(format!(
                        "entity id line must hold a single token, got {}",
                        tokens.len()
                    )));
                }
                self.state = ParserState::ExpectCounters {
                    entity: first.to_string(),
                };
                Ok(None)
            }
            ParserState::ExpectCounters { entity } => {
                let counters = self.parse_counters(&tokens)?;
                self.state = ParserState::ExpectPercentages { entity, counters };
                Ok(None)
            }
            ParserState::ExpectPercentages { entity, counters } => {
                let [shr, hsr, oca] = self.parse_percentages(&tokens)?;
                Ok(Some(Record::new(entity, counters, shr, hsr, oca)))
            }
        }
    }

    /// Checks that input did not stop in the middle of a cycle.
    pub fn finish(self) -> Result<(), ParseError> {
        match self.state {
            ParserState::ExpectHeader => Ok(()),
            ParserState::ExpectCounters { entity } | ParserState::ExpectPercentages { entity, .. } => {
                Err(ParseError::new(
                    0,
                    format!("output ended before the cycle of '{}' was complete", entity),
                ))
            }
        }
    }

    fn error(&self, msg: impl Into<String>) -> ParseError {
        ParseError::new(self.line_no, msg)
    }

    fn parse_counters(&self, tokens: &[&str]) -> Result<Counters, ParseError> {
        let values = self.labeled_fields(tokens, &COUNTER_LABELS)?;
        let mut parsed = [0u64; 6];
        for (slot, (label, raw)) in parsed.iter_mut().zip(COUNTER_LABELS.iter().zip(values)) {
            *slot = raw
                .parse()
                .map_err(|_| self.error(format!("invalid integer '{}' for {}", raw, label)))?;
        }
        let [tp, tn, fp, fn_, sc, nc] = parsed;
        Ok(Counters {
            tp,
            tn,
            fp,
            fn_,
            sc,
            nc,
        })
    }

    fn parse_percentages(&self, tokens: &[&str]) -> Result<[Percent; 3], ParseError> {
        let values = self.labeled_fields(tokens, &PERCENT_LABELS)?;
        let percent = |idx: usize| -> Result<Percent, ParseError> {
            let (label, raw) = (PERCENT_LABELS[idx], values[idx]);
            let number = raw
                .strip_suffix('%')
                .ok_or_else(|| self.error(format!("{} value '{}' lacks '%' suffix", label, raw)))?;
            let value: Percent = number
                .parse()
                .map_err(|_| self.error(format!("invalid percentage '{}' for {}", raw, label)))?;
            if !value.value().is_finite() {
                return Err(self.error(format!("non-finite percentage '{}' for {}", raw, label)));
            }
            Ok(value)
        };
        Ok([percent(0)?, percent(1)?, percent(2)?])
    }

    /// Splits `LABEL value LABEL value ...` and verifies labels and their order.
    fn labeled_fields<'a>(
        &self,
        tokens: &[&'a str],
        labels: &[&str],
    ) -> Result<Vec<&'a str>, ParseError> {
        if tokens.len() != labels.len() * 2 {
            return Err(self.error(format!(
                "expected {} labeled fields starting with {}, got {} tokens",
                labels.len(),
                labels[0],
                tokens.len()
            )));
        }
        tokens
            .chunks_exact(2)
            .zip(labels)
            .map(|(pair, expected)| {
                if pair[0] == *expected {
                    Ok(pair[1])
                } else {
                    Err(self.error(format!("expected label {}, found '{}'", expected, pair[0])))
                }
            })
            .collect()
    }
}

fn is_label(token: &str) -> bool {
    COUNTER_LABELS.contains(&token) || PERCENT_LABELS.contains(&token)
}

/// Parses complete command output into records.
///
/// ```
/// use dspamstat::parser::parse_stats;
///
/// let output = "bob\nTP: 1 TN: 2 FP: 0 FN: 0 SC: 0 NC: 0\nSHR: 100.00% HSR: 0.00% OCA: 100.00%\n";
/// let records = parse_stats(output).unwrap();
/// assert_eq!(records[0].counters.tn, 2);
/// ```
pub fn parse_stats(content: &str) -> Result<Vec<Record>, ParseError> {
    let mut parser = StatsParser::new();
    let mut records = Vec::new();
    for line in content.lines() {
        if let Some(record) = parser.feed_line(line)? {
            records.push(record);
        }
    }
    parser.finish()?;
    Ok(records)
}
