//! Typed accessors over LVM tool output
//!
//! The LVM tools report through labeled text lines rather than structured
//! output. All line-scanning lives here so the driver itself never touches
//! raw text. Parsing matches known field labels, tolerates extra whitespace,
//! and ignores unknown lines.

/// Field labels emitted by `lvdisplay`
const LV_PATH: &str = "LV Path";
const LV_STATUS: &str = "LV Status";
const LV_SNAPSHOT_STATUS: &str = "LV snapshot status";

/// Section separator in full `lvdisplay` output
const LV_SECTION: &str = "--- Logical volume ---";

// =============================================================================
// lvdisplay
// =============================================================================

/// One `--- Logical volume ---` section of `lvdisplay` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LvSection {
    lv_path: Option<String>,
    lv_status: Option<String>,
    snapshot_status: Option<String>,
}

impl LvSection {
    fn parse(text: &str) -> Self {
        let mut section = LvSection::default();
        for line in text.lines() {
            let line = line.trim();
            // `LV snapshot status` shares the `LV S` prefix with `LV Status`
            // only case-insensitively; match the longer label first anyway.
            if let Some(value) = field_value(line, LV_SNAPSHOT_STATUS) {
                section.snapshot_status = Some(value);
            } else if let Some(value) = field_value(line, LV_PATH) {
                section.lv_path = Some(value);
            } else if let Some(value) = field_value(line, LV_STATUS) {
                section.lv_status = Some(value);
            }
        }
        section
    }

    /// On-disk device path of the logical volume
    pub fn lv_path(&self) -> Option<&str> {
        self.lv_path.as_deref()
    }

    /// Activation status string, e.g. `available` or `NOT available`
    pub fn lv_status(&self) -> Option<&str> {
        self.lv_status.as_deref()
    }

    /// Snapshot status string, e.g. `active destination for volume-x`
    pub fn snapshot_status(&self) -> Option<&str> {
        self.snapshot_status.as_deref()
    }
}

/// Parsed `lvdisplay` output, one section per reported logical volume.
#[derive(Debug, Clone, Default)]
pub struct LvReport {
    sections: Vec<LvSection>,
}

impl LvReport {
    pub fn parse(output: &str) -> Self {
        let sections = output
            .split(LV_SECTION)
            .map(LvSection::parse)
            .filter(|s| s != &LvSection::default())
            .collect();
        LvReport { sections }
    }

    /// The single reported volume, for `lvdisplay <path>` invocations.
    pub fn single(&self) -> LvSection {
        self.sections.first().cloned().unwrap_or_default()
    }

    pub fn sections(&self) -> &[LvSection] {
        &self.sections
    }

    /// Device paths of snapshots that are active destinations for `lv_name`.
    pub fn active_snapshot_paths_of(&self, lv_name: &str) -> Vec<String> {
        let wanted = format!("active destination for {}", lv_name);
        self.sections
            .iter()
            .filter(|s| s.snapshot_status() == Some(wanted.as_str()))
            .filter_map(|s| s.lv_path().map(str::to_string))
            .collect()
    }
}

/// Value of a labeled field line, if the line carries that label.
fn field_value(line: &str, label: &str) -> Option<String> {
    let rest = line.strip_prefix(label)?;
    // Labels are word-delimited; "LV Pathological" must not match "LV Path".
    if !rest.starts_with(char::is_whitespace) && !rest.is_empty() {
        return None;
    }
    Some(rest.trim().to_string())
}

/// Whether an `lvdisplay -C -o Attr` report flags the volume as a snapshot
/// origin (attribute `o`/`O`).
pub fn attr_has_origin(output: &str) -> bool {
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line == "Attr" {
            continue;
        }
        return line.starts_with('o') || line.starts_with('O');
    }
    false
}

// =============================================================================
// lvs / vgs tabular reports
// =============================================================================

/// One row of `lvs --noheadings -o vg_name,name,size`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvRow {
    pub vg: String,
    pub name: String,
    pub size_gib: u64,
}

pub fn parse_lv_rows(output: &str) -> Vec<LvRow> {
    output
        .lines()
        .filter_map(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.len() < 3 {
                return None;
            }
            Some(LvRow {
                vg: words[0].to_string(),
                name: words[1].to_string(),
                size_gib: words[2].parse::<f64>().unwrap_or(0.0) as u64,
            })
        })
        .collect()
}

/// One row of `vgs --noheadings --nosuffix --unit=g -o name,size,free,uuid`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VgRow {
    pub name: String,
    pub total_capacity_gib: u64,
    pub free_capacity_gib: u64,
    pub uuid: String,
}

pub fn parse_vg_rows(output: &str) -> Vec<VgRow> {
    output
        .lines()
        .filter_map(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.len() != 4 {
                return None;
            }
            Some(VgRow {
                name: words[0].to_string(),
                total_capacity_gib: words[1].parse::<f64>().unwrap_or(0.0) as u64,
                free_capacity_gib: words[2].parse::<f64>().unwrap_or(0.0) as u64,
                uuid: words[3].to_string(),
            })
        })
        .collect()
}
