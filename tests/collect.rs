use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use assert_matches::assert_matches;

use dili_cellpaint::chembl::{ActivityRecord, ChemblApi, Molecule, MoleculeStructures};
use dili_cellpaint::collect::{ActivityCollector, CompoundCollector};
use dili_cellpaint::database::{ACTIVITIES_TABLE, COMPOUNDS_TABLE, Database};
use dili_cellpaint::domain::ChemblId;
use dili_cellpaint::error::DiliError;
use dili_cellpaint::filter::FilterOptions;
use dili_cellpaint::output::JsonOutput;
use dili_cellpaint::paginate::FetchOutcome;
use dili_cellpaint::reference::CompoundReference;

#[derive(Default)]
struct MockChembl {
    molecules: HashMap<String, Vec<Molecule>>,
    activities: HashMap<String, Vec<ActivityRecord>>,
    interrupted: Vec<String>,
    activity_calls: Mutex<Vec<String>>,
}

impl ChemblApi for MockChembl {
    fn search_molecules(
        &self,
        name: &str,
        options: FilterOptions,
    ) -> Result<FetchOutcome<Molecule>, DiliError> {
        let found = self.molecules.get(name).cloned().unwrap_or_default();
        let pages = usize::from(!found.is_empty());
        Ok(FetchOutcome {
            items: options.chain().apply(found).collect(),
            pages,
            interrupted: self.interrupted.iter().any(|item| item == name),
        })
    }

    fn activities(&self, id: &ChemblId) -> Result<FetchOutcome<ActivityRecord>, DiliError> {
        self.activity_calls.lock().unwrap().push(id.to_string());
        Ok(FetchOutcome {
            items: self.activities.get(id.as_str()).cloned().unwrap_or_default(),
            pages: 1,
            interrupted: false,
        })
    }
}

fn reference(name: &str, severity: i64) -> CompoundReference {
    CompoundReference {
        ltkb_id: Some(format!("LT{severity:05}")),
        compound_name: name.to_string(),
        severity_class: Some(severity),
        label_section: Some("Warnings and precautions".to_string()),
        vdili_concern: Some("vMost-DILI-Concern".to_string()),
        version: Some("2".to_string()),
    }
}

fn molecule(id: &str, name: Option<&str>, inchi_key: Option<&str>) -> Molecule {
    Molecule {
        molecule_chembl_id: id.to_string(),
        pref_name: name.map(str::to_string),
        indication_class: None,
        inorganic_flag: Some(0),
        max_phase: Some("4.0".to_string()),
        molecule_properties: Some(serde_json::json!({ "full_mwt": "151.17" })),
        molecule_structures: Some(MoleculeStructures {
            canonical_smiles: Some("CC(=O)Nc1ccc(O)cc1".to_string()),
            standard_inchi: Some("InChI=1S/C8H9NO2".to_string()),
            standard_inchi_key: inchi_key.map(str::to_string),
        }),
        molecule_synonyms: None,
        atc_classifications: Some(vec!["N02BE01".to_string()]),
        molecule_type: Some("Small molecule".to_string()),
        natural_product: Some(0),
        topical: Some(false),
        oral: Some(true),
        parenteral: None,
    }
}

fn activity(id: i64, molecule: &str) -> ActivityRecord {
    serde_json::from_value(serde_json::json!({
        "activity_id": id,
        "molecule_chembl_id": molecule,
        "standard_type": "IC50",
        "standard_value": 12.5,
        "standard_units": "nM",
    }))
    .unwrap()
}

fn api() -> MockChembl {
    let mut api = MockChembl::default();
    api.molecules.insert(
        "acetaminophen".to_string(),
        vec![
            molecule(
                "CHEMBL112",
                Some("ACETAMINOPHEN"),
                Some("RZVAJINKPMORJF-UHFFFAOYSA-N"),
            ),
            molecule("CHEMBL4297488", None, None),
        ],
    );
    api.molecules.insert(
        "valproic acid".to_string(),
        vec![molecule(
            "CHEMBL109",
            Some("VALPROIC ACID"),
            Some("NIJJYAXOARWZEE-UHFFFAOYSA-N"),
        )],
    );
    api
}

#[test]
fn compounds_are_left_joined_with_the_reference() {
    let api = api();
    let mut db = Database::open_in_memory().unwrap();
    let references = vec![
        reference("acetaminophen", 8),
        reference("obscurin", 1),
        reference("valproic acid", 8),
    ];

    let summary = CompoundCollector::new(&api)
        .collect(&references, &mut db, &JsonOutput)
        .unwrap();

    assert_eq!(summary.compounds, 3);
    assert_eq!(summary.molecules, 2);
    assert_eq!(summary.rows_written, 3);
    assert_eq!(summary.unmatched, vec!["obscurin".to_string()]);
    assert_eq!(db.row_count(COMPOUNDS_TABLE).unwrap(), 3);

    let rows = db.compound_rows().unwrap();
    let unmatched = rows
        .iter()
        .find(|row| row.compound_name == "obscurin")
        .unwrap();
    assert_eq!(unmatched.severity_class, Some(1));
    assert_eq!(unmatched.chembl_id, None);
    assert_eq!(unmatched.smiles, None);

    let matched = rows
        .iter()
        .find(|row| row.compound_name == "acetaminophen")
        .unwrap();
    assert_eq!(matched.chembl_id.as_deref(), Some("CHEMBL112"));
    assert_eq!(matched.atc_classifications.as_deref(), Some("N02BE01"));
    assert_eq!(matched.oral, Some(true));
}

#[test]
fn a_new_run_replaces_the_compounds_table() {
    let api = api();
    let mut db = Database::open_in_memory().unwrap();
    let collector = CompoundCollector::new(&api);

    collector
        .collect(
            &[reference("acetaminophen", 8), reference("valproic acid", 8)],
            &mut db,
            &JsonOutput,
        )
        .unwrap();
    collector
        .collect(&[reference("valproic acid", 8)], &mut db, &JsonOutput)
        .unwrap();

    let rows = db.compound_rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].chembl_id.as_deref(), Some("CHEMBL109"));
}

#[test]
fn custom_filter_options_are_forwarded() {
    let api = api();
    let mut db = Database::open_in_memory().unwrap();

    let summary = CompoundCollector::with_options(&api, FilterOptions::default())
        .collect(&[reference("acetaminophen", 8)], &mut db, &JsonOutput)
        .unwrap();
    assert_eq!(summary.molecules, 2);
}

#[test]
fn interrupted_searches_are_reported() {
    let mut api = api();
    api.interrupted.push("valproic acid".to_string());
    let mut db = Database::open_in_memory().unwrap();

    let summary = CompoundCollector::new(&api)
        .collect(&[reference("valproic acid", 8)], &mut db, &JsonOutput)
        .unwrap();
    assert_eq!(summary.interrupted, vec!["valproic acid".to_string()]);
}

#[test]
fn activities_follow_sorted_stored_ids() {
    let mut api = api();
    api.activities.insert(
        "CHEMBL109".to_string(),
        vec![activity(1, "CHEMBL109"), activity(2, "CHEMBL109")],
    );
    api.activities
        .insert("CHEMBL112".to_string(), vec![activity(3, "CHEMBL112")]);
    let mut db = Database::open_in_memory().unwrap();
    CompoundCollector::new(&api)
        .collect(
            &[
                reference("valproic acid", 8),
                reference("acetaminophen", 8),
                reference("obscurin", 1),
            ],
            &mut db,
            &JsonOutput,
        )
        .unwrap();

    let ids = db.compound_chembl_ids().unwrap();
    assert_eq!(
        ids,
        vec![
            ChemblId::from_str("CHEMBL109").unwrap(),
            ChemblId::from_str("CHEMBL112").unwrap()
        ]
    );

    let summary = ActivityCollector::new(&api)
        .collect(ids.into_iter().rev(), &mut db, &JsonOutput)
        .unwrap();
    assert_eq!(summary.compounds, 2);
    assert_eq!(summary.activities, 3);
    assert_eq!(db.row_count(ACTIVITIES_TABLE).unwrap(), 3);
    assert_eq!(
        *api.activity_calls.lock().unwrap(),
        vec!["CHEMBL109".to_string(), "CHEMBL112".to_string()]
    );
}

#[test]
fn activity_ids_need_a_compounds_table() {
    let db = Database::open_in_memory().unwrap();
    assert_matches!(db.compound_chembl_ids(), Err(DiliError::InputNotFound(_)));
}

#[test]
fn database_survives_close_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chembl").join("dili.db");
    let api = api();

    let mut db = Database::open(&path).unwrap();
    CompoundCollector::new(&api)
        .collect(&[reference("acetaminophen", 8)], &mut db, &JsonOutput)
        .unwrap();
    db.close().unwrap();

    let db = Database::open(&path).unwrap();
    assert!(db.table_exists(COMPOUNDS_TABLE).unwrap());
    assert!(!db.table_exists(ACTIVITIES_TABLE).unwrap());
    assert_eq!(db.row_count(COMPOUNDS_TABLE).unwrap(), 1);
}
