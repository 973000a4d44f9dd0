use std::collections::BTreeSet;
use std::sync::Mutex;

use serde_json::Value;

use dili_cellpaint::chembl::{ChemblApi, ChemblClient, Molecule};
use dili_cellpaint::error::DiliError;
use dili_cellpaint::filter::{FilterChain, FilterOptions, compact, compact_all};
use dili_cellpaint::http::{HttpGet, HttpReply};

const PAGE_1: &str = include_str!("fixtures/molecule_search_page1.json");
const PAGE_2: &str = include_str!("fixtures/molecule_search_page2.json");

/// Serves the two fixture pages by offset.
#[derive(Default)]
struct FixtureHttp {
    urls: Mutex<Vec<String>>,
}

impl HttpGet for FixtureHttp {
    fn get(&self, url: &str) -> Result<HttpReply, DiliError> {
        self.urls.lock().unwrap().push(url.to_string());
        let body = if url.contains("offset=0&") {
            PAGE_1
        } else if url.contains("offset=20&") {
            PAGE_2
        } else {
            return Ok(HttpReply {
                status: 404,
                body: Vec::new(),
            });
        };
        Ok(HttpReply {
            status: 200,
            body: body.as_bytes().to_vec(),
        })
    }
}

fn fixture_molecules() -> Vec<Molecule> {
    [PAGE_1, PAGE_2]
        .iter()
        .flat_map(|page| {
            let value: Value = serde_json::from_str(page).unwrap();
            serde_json::from_value::<Vec<Molecule>>(value["molecules"].clone()).unwrap()
        })
        .collect()
}

#[test]
fn search_without_filters_returns_every_page() {
    let http = FixtureHttp::default();
    let client = ChemblClient::new(&http, "https://chembl.test/api/data", 20);

    let outcome = client
        .search_molecules("acetaminophen", FilterOptions::default())
        .unwrap();

    assert_eq!(outcome.items.len(), 3);
    assert_eq!(outcome.items[0].molecule_chembl_id, "CHEMBL112");
    assert_eq!(outcome.items[0].pref_name.as_deref(), Some("ACETAMINOPHEN"));
    assert!(!outcome.interrupted);
    assert_eq!(
        http.urls.lock().unwrap()[0],
        "https://chembl.test/api/data/molecule/search?q=acetaminophen&offset=0&limit=20"
    );
}

#[test]
fn clean_search_keeps_complete_molecules_only() {
    let http = FixtureHttp::default();
    let client = ChemblClient::new(&http, "https://chembl.test/api/data", 20);

    let outcome = client
        .search_molecules("acetaminophen", FilterOptions::clean())
        .unwrap();

    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.items[0].molecule_chembl_id, "CHEMBL112");
}

#[test]
fn search_query_is_percent_encoded() {
    let http = FixtureHttp::default();
    let client = ChemblClient::new(&http, "https://chembl.test/api/data", 20);
    assert_eq!(
        client.molecule_search_url("valproic acid"),
        "https://chembl.test/api/data/molecule/search?q=valproic%20acid"
    );
}

#[test]
fn clean_chain_never_grows_and_survivors_are_complete() {
    let molecules = fixture_molecules();
    let survivors = FilterChain::clean()
        .apply(molecules.clone())
        .collect::<Vec<_>>();

    assert!(survivors.len() <= molecules.len());
    for molecule in &survivors {
        assert!(molecule.pref_name.is_some());
        assert!(molecule.canonical_smiles().is_some());
        assert!(molecule.standard_inchi().is_some());
        assert!(molecule.standard_inchi_key().is_some());
    }
}

#[test]
fn chains_are_immutable_values() {
    let base = FilterChain::new().without_missing_name();
    let extended = base.clone().without_missing_inchi_key();
    assert_eq!(base.len(), 1);
    assert_eq!(extended.len(), 2);

    let molecules = fixture_molecules();
    assert_eq!(base.apply(molecules.clone()).count(), 2);
    assert_eq!(extended.apply(molecules).count(), 1);
}

#[test]
fn compact_keeps_count_and_documented_keys() {
    let molecules = fixture_molecules();
    let compacted = compact_all(&molecules);
    assert_eq!(compacted.len(), molecules.len());

    let expected = [
        "chembl_id",
        "name",
        "indication_class",
        "inorganic_flag",
        "max_phase",
        "properties",
        "smiles",
        "inchi",
        "inchi_key",
        "synonyms",
        "atc_classifications",
        "type",
        "natural",
        "topical",
        "oral",
        "parenteral",
    ]
    .into_iter()
    .map(str::to_string)
    .collect::<BTreeSet<_>>();

    for molecule in &compacted {
        let value = serde_json::to_value(molecule).unwrap();
        let keys = value.as_object().unwrap().keys().cloned().collect::<BTreeSet<_>>();
        assert_eq!(keys, expected);
    }
}

#[test]
fn compact_flattens_nested_fields() {
    let molecules = fixture_molecules();

    let full = compact(&molecules[0]);
    assert_eq!(full.smiles.as_deref(), Some("CC(=O)Nc1ccc(O)cc1"));
    assert_eq!(full.inchi_key.as_deref(), Some("RZVAJINKPMORJF-UHFFFAOYSA-N"));
    assert_eq!(full.synonyms, "Paracetamol|Tylenol");
    assert_eq!(full.atc_classifications.as_deref(), Some("N02BE01"));
    assert_eq!(full.max_phase.as_deref(), Some("4.0"));

    let bare = compact(&molecules[2]);
    assert_eq!(bare.smiles, None);
    assert_eq!(bare.inchi, None);
    assert_eq!(bare.synonyms, "");
    assert_eq!(bare.atc_classifications, None);
    assert_eq!(bare.max_phase.as_deref(), Some("3"));
}
