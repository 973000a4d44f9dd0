use std::collections::BTreeSet;

use serde::Serialize;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink};
use crate::chembl::ChemblApi;
use crate::database::{Database, WriteMode};
use crate::domain::ChemblId;
use crate::error::DiliError;
use crate::filter::{CompactMolecule, FilterOptions, compact};
use crate::reference::CompoundReference;

/// One reference compound joined with one matching molecule, or with none
/// when the search came back empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompoundRow {
    pub reference: CompoundReference,
    pub molecule: Option<CompactMolecule>,
}

/// Left join of a reference row with the molecules found for its name.
pub fn merge_reference(
    reference: &CompoundReference,
    molecules: Vec<CompactMolecule>,
) -> Vec<CompoundRow> {
    if molecules.is_empty() {
        return vec![CompoundRow {
            reference: reference.clone(),
            molecule: None,
        }];
    }
    molecules
        .into_iter()
        .map(|molecule| CompoundRow {
            reference: reference.clone(),
            molecule: Some(molecule),
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompoundCollection {
    pub compounds: usize,
    pub molecules: usize,
    pub rows_written: usize,
    pub unmatched: Vec<String>,
    pub interrupted: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivityCollection {
    pub compounds: usize,
    pub activities: usize,
    pub interrupted: Vec<String>,
}

pub struct CompoundCollector<'a, C: ChemblApi> {
    api: &'a C,
    options: FilterOptions,
}

impl<'a, C: ChemblApi> CompoundCollector<'a, C> {
    pub fn new(api: &'a C) -> Self {
        Self {
            api,
            options: FilterOptions::clean(),
        }
    }

    pub fn with_options(api: &'a C, options: FilterOptions) -> Self {
        Self { api, options }
    }

    /// Searches every reference name and writes each batch as soon as it is
    /// merged: the first batch replaces the `compounds` table, later batches
    /// append to it.
    pub fn collect(
        &self,
        references: &[CompoundReference],
        db: &mut Database,
        sink: &dyn ProgressSink,
    ) -> Result<CompoundCollection, DiliError> {
        let mut summary = CompoundCollection::default();
        let total = references.len();

        for (idx, reference) in references.iter().enumerate() {
            let name = reference.compound_name.as_str();
            let outcome = self.api.search_molecules(name, self.options)?;
            if outcome.interrupted {
                summary.interrupted.push(name.to_string());
            }
            let molecules = outcome.items.iter().map(compact).collect::<Vec<_>>();
            sink.event(ProgressEvent::step(
                idx + 1,
                total,
                format!("{name}: {}", molecules.len()),
            ));

            summary.molecules += molecules.len();
            if molecules.is_empty() {
                summary.unmatched.push(name.to_string());
            }
            let rows = merge_reference(reference, molecules);
            summary.rows_written += db.write_compounds(&rows, WriteMode::for_batch(idx))?;
            summary.compounds += 1;
        }

        info!(
            compounds = summary.compounds,
            molecules = summary.molecules,
            rows = summary.rows_written,
            "compound collection finished"
        );
        Ok(summary)
    }
}

pub struct ActivityCollector<'a, C: ChemblApi> {
    api: &'a C,
}

impl<'a, C: ChemblApi> ActivityCollector<'a, C> {
    pub fn new(api: &'a C) -> Self {
        Self { api }
    }

    /// Fetches activities for every id, in sorted order regardless of how the
    /// ids were supplied. The first id replaces the `activities` table.
    pub fn collect<I>(
        &self,
        ids: I,
        db: &mut Database,
        sink: &dyn ProgressSink,
    ) -> Result<ActivityCollection, DiliError>
    where
        I: IntoIterator<Item = ChemblId>,
    {
        let ids = ids.into_iter().collect::<BTreeSet<_>>();
        let total = ids.len();
        let mut summary = ActivityCollection::default();

        for (idx, id) in ids.iter().enumerate() {
            let outcome = self.api.activities(id)?;
            if outcome.interrupted {
                summary.interrupted.push(id.to_string());
            }
            sink.event(ProgressEvent::step(
                idx + 1,
                total,
                format!("{id}: {}", outcome.items.len()),
            ));
            summary.activities +=
                db.write_activities(id, &outcome.items, WriteMode::for_batch(idx))?;
            summary.compounds += 1;
        }

        info!(
            compounds = summary.compounds,
            activities = summary.activities,
            "activity collection finished"
        );
        Ok(summary)
    }
}
