//! Tabular export of ranked records.
//!
//! Fourteen fixed columns; absent values are written as `N/A`. Column
//! widths for the text table are `min(longest cell + 2, 50)`, header
//! included.

use std::io;

use serde::Serialize;
use trialscope_common::NOT_AVAILABLE;

use crate::models::NormalizedRecord;

pub const COLUMNS: [&str; 14] = [
    "Title",
    "URL",
    "Source",
    "Abstract",
    "AI_Score",
    "AI_Classification",
    "Confidence",
    "Conditions",
    "Phase",
    "Status",
    "Start_Date",
    "Sponsor",
    "Interventions",
    "Identifier",
];

pub const MAX_COLUMN_WIDTH: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Abstract")]
    pub abstract_text: String,
    #[serde(rename = "AI_Score")]
    pub ai_score: String,
    #[serde(rename = "AI_Classification")]
    pub ai_classification: String,
    #[serde(rename = "Confidence")]
    pub confidence: String,
    #[serde(rename = "Conditions")]
    pub conditions: String,
    #[serde(rename = "Phase")]
    pub phase: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Start_Date")]
    pub start_date: String,
    #[serde(rename = "Sponsor")]
    pub sponsor: String,
    #[serde(rename = "Interventions")]
    pub interventions: String,
    #[serde(rename = "Identifier")]
    pub identifier: String,
}

impl ExportRow {
    pub fn from_record(r: &NormalizedRecord) -> Self {
        let attr = |key: &str| r.attribute(key).unwrap_or(NOT_AVAILABLE).to_string();
        let rel = r.relevance.as_ref();
        Self {
            title: r.title.clone(),
            url: r.url.clone(),
            source: r.source.clone(),
            abstract_text: r.abstract_text.clone(),
            ai_score: rel.map(|x| x.score.to_string()).unwrap_or_else(|| NOT_AVAILABLE.into()),
            ai_classification: rel
                .map(|x| x.classification.as_str().to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.into()),
            confidence: rel.map(|x| x.confidence.to_string()).unwrap_or_else(|| NOT_AVAILABLE.into()),
            conditions: attr("conditions"),
            phase: attr("phase"),
            status: attr("status"),
            start_date: attr("start_date"),
            sponsor: attr("sponsor"),
            interventions: attr("interventions"),
            identifier: r.identifier.clone(),
        }
    }

    /// Cells in `COLUMNS` order.
    pub fn cells(&self) -> [&str; 14] {
        [
            self.title.as_str(),
            self.url.as_str(),
            self.source.as_str(),
            self.abstract_text.as_str(),
            self.ai_score.as_str(),
            self.ai_classification.as_str(),
            self.confidence.as_str(),
            self.conditions.as_str(),
            self.phase.as_str(),
            self.status.as_str(),
            self.start_date.as_str(),
            self.sponsor.as_str(),
            self.interventions.as_str(),
            self.identifier.as_str(),
        ]
    }
}

pub fn to_rows(records: &[NormalizedRecord]) -> Vec<ExportRow> {
    records.iter().map(ExportRow::from_record).collect()
}

pub fn column_widths(rows: &[ExportRow]) -> [usize; 14] {
    let mut widths = COLUMNS.map(|h| h.chars().count());
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row.cells()) {
            *w = (*w).max(cell.chars().count());
        }
    }
    widths.map(|w| (w + 2).min(MAX_COLUMN_WIDTH))
}

/// Write rows as CSV with a header line.
pub fn write_csv<W: io::Write>(rows: &[ExportRow], writer: W) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    if rows.is_empty() {
        wtr.write_record(COLUMNS)?;
    }
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Fixed-width text table; cells longer than their column are cut with `…`.
pub fn write_table<W: io::Write>(rows: &[ExportRow], mut out: W) -> io::Result<()> {
    let widths = column_widths(rows);
    let line = |cells: [&str; 14]| {
        cells
            .iter()
            .zip(widths)
            .map(|(c, w)| fit(c, w))
            .collect::<Vec<_>>()
            .join("")
    };

    writeln!(out, "{}", line(COLUMNS).trim_end())?;
    for row in rows {
        writeln!(out, "{}", line(row.cells()).trim_end())?;
    }
    Ok(())
}

fn fit(cell: &str, width: usize) -> String {
    let room = width.saturating_sub(2);
    let flat = cell.replace(['\n', '\r', '\t'], " ");
    let shown: String = if flat.chars().count() > room {
        let mut s: String = flat.chars().take(room.saturating_sub(1)).collect();
        s.push('…');
        s
    } else {
        flat
    };
    format!("{:<width$}", shown, width = width)
}
