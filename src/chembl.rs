use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::ChemblId;
use crate::error::DiliError;
use crate::filter::FilterOptions;
use crate::http::{HttpGet, with_query};
use crate::paginate::{FetchOutcome, Paginator};

/// Molecule as returned by `/molecule` and `/molecule/search`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Molecule {
    pub molecule_chembl_id: String,
    #[serde(default)]
    pub pref_name: Option<String>,
    #[serde(default)]
    pub indication_class: Option<String>,
    #[serde(default)]
    pub inorganic_flag: Option<i64>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub max_phase: Option<String>,
    #[serde(default)]
    pub molecule_properties: Option<Value>,
    #[serde(default)]
    pub molecule_structures: Option<MoleculeStructures>,
    #[serde(default)]
    pub molecule_synonyms: Option<Vec<MoleculeSynonym>>,
    #[serde(default)]
    pub atc_classifications: Option<Vec<String>>,
    #[serde(default)]
    pub molecule_type: Option<String>,
    #[serde(default)]
    pub natural_product: Option<i64>,
    #[serde(default)]
    pub topical: Option<bool>,
    #[serde(default)]
    pub oral: Option<bool>,
    #[serde(default)]
    pub parenteral: Option<bool>,
}

impl Molecule {
    pub fn canonical_smiles(&self) -> Option<&str> {
        self.molecule_structures
            .as_ref()
            .and_then(|structures| structures.canonical_smiles.as_deref())
    }

    pub fn standard_inchi(&self) -> Option<&str> {
        self.molecule_structures
            .as_ref()
            .and_then(|structures| structures.standard_inchi.as_deref())
    }

    pub fn standard_inchi_key(&self) -> Option<&str> {
        self.molecule_structures
            .as_ref()
            .and_then(|structures| structures.standard_inchi_key.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MoleculeStructures {
    #[serde(default)]
    pub canonical_smiles: Option<String>,
    #[serde(default)]
    pub standard_inchi: Option<String>,
    #[serde(default)]
    pub standard_inchi_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MoleculeSynonym {
    pub molecule_synonym: String,
    #[serde(default)]
    pub syn_type: Option<String>,
}

/// Bioactivity as returned by `/activity`. Numeric values are kept as the
/// strings ChEMBL sends.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ActivityRecord {
    #[serde(default)]
    pub activity_id: Option<i64>,
    #[serde(default)]
    pub molecule_chembl_id: Option<String>,
    #[serde(default)]
    pub assay_chembl_id: Option<String>,
    #[serde(default)]
    pub assay_type: Option<String>,
    #[serde(default)]
    pub assay_description: Option<String>,
    #[serde(default)]
    pub target_chembl_id: Option<String>,
    #[serde(default)]
    pub target_pref_name: Option<String>,
    #[serde(default)]
    pub target_organism: Option<String>,
    #[serde(default)]
    pub standard_type: Option<String>,
    #[serde(default)]
    pub standard_relation: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub standard_value: Option<String>,
    #[serde(default)]
    pub standard_units: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub pchembl_value: Option<String>,
    #[serde(default)]
    pub document_chembl_id: Option<String>,
}

pub trait ChemblApi {
    fn search_molecules(
        &self,
        name: &str,
        options: FilterOptions,
    ) -> Result<FetchOutcome<Molecule>, DiliError>;

    fn activities(&self, id: &ChemblId) -> Result<FetchOutcome<ActivityRecord>, DiliError>;
}

pub struct ChemblClient<H: HttpGet> {
    paginator: Paginator<H>,
    base_url: String,
}

impl<H: HttpGet> ChemblClient<H> {
    pub fn new(http: H, base_url: impl Into<String>, page_size: usize) -> Self {
        Self {
            paginator: Paginator::with_page_size(http, page_size),
            base_url: base_url.into(),
        }
    }

    pub fn molecule_search_url(&self, name: &str) -> String {
        with_query(&format!("{}/molecule/search", self.base_url), &[("q", name)])
    }

    pub fn activity_url(&self, id: &ChemblId) -> String {
        with_query(
            &format!("{}/activity", self.base_url),
            &[("molecule_chembl_id", id.as_str())],
        )
    }
}

impl<H: HttpGet> ChemblApi for ChemblClient<H> {
    fn search_molecules(
        &self,
        name: &str,
        options: FilterOptions,
    ) -> Result<FetchOutcome<Molecule>, DiliError> {
        let url = self.molecule_search_url(name);
        let outcome: FetchOutcome<Molecule> =
            self.paginator
                .fetch_all(&url, "molecules", &format!("molecule search `{name}`"))?;
        let items = options.chain().apply(outcome.items).collect();
        Ok(FetchOutcome { items, ..outcome })
    }

    fn activities(&self, id: &ChemblId) -> Result<FetchOutcome<ActivityRecord>, DiliError> {
        let url = self.activity_url(id);
        self.paginator
            .fetch_all(&url, "activities", &format!("activities for {id}"))
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}
