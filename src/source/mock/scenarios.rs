//! Canned stats command output for tests and examples.

/// Three mailboxes plus the `TOTAL` row, padded the way the command pads.
pub const TYPICAL_OUTPUT: &str = "\
alice@example.org
                TP:    10 TN:    20 FP:     1 FN:     2 SC:     0 NC:     0
                SHR:    5.00%       HSR:   95.00%       OCA:   90.91%
bob@example.org
                TP:     5 TN:    40 FP:     0 FN:     1 SC:     2 NC:     1
                SHR:   83.33%       HSR:    0.00%       OCA:   97.83%
carol@example.net
                TP:     0 TN:     0 FP:     0 FN:     0 SC:     0 NC:     0
                SHR:    0.00%       HSR:    0.00%       OCA:    0.00%
TOTAL
                TP:    15 TN:    60 FP:     1 FN:     3 SC:     2 NC:     1
                SHR:   83.33%       HSR:    1.64%       OCA:   94.94%
";

/// Output with a malformed counter line in the second cycle.
pub const MALFORMED_OUTPUT: &str = "\
alice@example.org
                TP:    10 TN:    20 FP:     1 FN:     2 SC:     0 NC:     0
                SHR:    5.00%       HSR:   95.00%       OCA:   90.91%
bob@example.org
                TP:     5 TN:    40 FP:     0 FN:     1
                SHR:   83.33%       HSR:    0.00%       OCA:   97.83%
";
