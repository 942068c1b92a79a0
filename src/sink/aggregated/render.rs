//! Rendering of the two tag-annotated line-text formats.
//!
//! The keyed-pair format announces each family with help and kind lines and
//! quotes label values; the semicolon-tagged format carries a trailing unix
//! timestamp of current log time and no preamble, for historical replays.

use std::fmt::Write as _;

use super::metric::{MetricDef, MetricValues, ALL_METRICS};

/// Fixed labels prepended to every sample. Values are pre-sanitized at
/// configuration time; empty values are omitted.
#[derive(Debug, Clone, Default)]
pub struct FixedLabels {
    pub serverid: String,
    pub sdpinst: String,
}

impl FixedLabels {
    fn pairs(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::with_capacity(2);
        if !self.serverid.is_empty() {
            out.push(("serverid", self.serverid.as_str()));
        }
        if !self.sdpinst.is_empty() {
            out.push(("sdpinst", self.sdpinst.as_str()));
        }
        out
    }
}

/// Render every populated family in the keyed-pair format:
///
/// ```text
/// # HELP p4_cmd_counter Number of commands processed, by command name
/// # TYPE p4_cmd_counter counter
/// p4_cmd_counter{serverid="x",cmd="user-sync"} 2
/// ```
pub fn render_keyed(values: &MetricValues, fixed: &FixedLabels) -> String {
    let fixed_pairs = fixed.pairs();
    let mut out = String::new();

    for def in ALL_METRICS {
        let Some(samples) = values.samples(def) else {
            continue;
        };

        let _ = writeln!(out, "# HELP {} {}", def.name, def.help);
        let _ = writeln!(out, "# TYPE {} {}", def.name, def.kind.as_str());

        for (label_values, value) in samples {
            out.push_str(def.name);
            write_keyed_labels(&mut out, def, &fixed_pairs, label_values);
            let _ = writeln!(out, " {}", format_value(*value));
        }
    }

    out
}

/// Render every populated family in the semicolon-tagged format:
///
/// ```text
/// p4_cmd_counter;serverid=x;cmd=user-sync 2 1438938906
/// ```
pub fn render_tagged(values: &MetricValues, fixed: &FixedLabels, unix_secs: i64) -> String {
    let fixed_pairs = fixed.pairs();
    let mut out = String::new();

    for def in ALL_METRICS {
        let Some(samples) = values.samples(def) else {
            continue;
        };

        for (label_values, value) in samples {
            out.push_str(def.name);
            for (name, value) in &fixed_pairs {
                let _ = write!(out, ";{name}={value}");
            }
            for (name, value) in def.labels.iter().zip(label_values) {
                let _ = write!(out, ";{name}={value}");
            }
            let _ = writeln!(out, " {} {unix_secs}", format_value(*value));
        }
    }

    out
}

fn write_keyed_labels(
    out: &mut String,
    def: &MetricDef,
    fixed_pairs: &[(&'static str, &str)],
    label_values: &[String],
) {
    if fixed_pairs.is_empty() && label_values.is_empty() {
        return;
    }

    out.push('{');
    let mut first = true;
    for (name, value) in fixed_pairs {
        if !first {
            out.push(',');
        }
        first = false;
        let _ = write!(out, "{name}=\"{}\"", escape_keyed(value));
    }
    for (name, value) in def.labels.iter().zip(label_values) {
        if !first {
            out.push(',');
        }
        first = false;
        let _ = write!(out, "{name}=\"{}\"", escape_keyed(value));
    }
    out.push('}');
}

/// Backslashes are doubled in the keyed-pair format only; quotes and
/// newlines cannot occur in sanitized values.
fn escape_keyed(value: &str) -> String {
    value.replace('\\', "\\\\")
}

fn format_value(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}
