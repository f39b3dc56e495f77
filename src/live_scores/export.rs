use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::store::{CompetitionStatus, MatchStateStore};
use crate::db::models::MatchSnapshot;

/// Point-in-time dump of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub generated_at: DateTime<Utc>,
    pub total_matches: usize,
    pub matches: Vec<MatchSnapshot>,
    pub live_matches: Vec<MatchSnapshot>,
    pub competitions: Vec<CompetitionStatus>,
}

impl ExportDocument {
    pub fn build(store: &MatchStateStore, competitions: &[String]) -> Self {
        let matches = store.all();
        ExportDocument {
            generated_at: Utc::now(),
            total_matches: matches.len(),
            live_matches: store.live_matches(),
            matches,
            competitions: competitions
                .iter()
                .map(|c| store.competition_status(c))
                .collect(),
        }
    }
}

pub fn write_document(document: &ExportDocument, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, document)?;
    writer.flush()?;
    Ok(())
}
