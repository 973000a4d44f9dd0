//! Null-check trims over molecule records and the flattened "compact" form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chembl::Molecule;

pub const LIST_DELIMITER: &str = "|";

pub type MoleculePredicate = fn(&Molecule) -> bool;

pub fn has_name(molecule: &Molecule) -> bool {
    molecule.pref_name.is_some()
}

pub fn has_smiles(molecule: &Molecule) -> bool {
    molecule.canonical_smiles().is_some()
}

pub fn has_inchi(molecule: &Molecule) -> bool {
    molecule.standard_inchi().is_some()
}

pub fn has_inchi_key(molecule: &Molecule) -> bool {
    molecule.standard_inchi_key().is_some()
}

/// Ordered set of predicates. Each builder call returns a new chain; applying
/// a chain never mutates it.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    predicates: Vec<MoleculePredicate>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clean() -> Self {
        Self::new()
            .without_missing_name()
            .without_missing_smiles()
            .without_missing_inchi()
            .without_missing_inchi_key()
    }

    pub fn with(mut self, predicate: MoleculePredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn without_missing_name(self) -> Self {
        self.with(has_name)
    }

    pub fn without_missing_smiles(self) -> Self {
        self.with(has_smiles)
    }

    pub fn without_missing_inchi(self) -> Self {
        self.with(has_inchi)
    }

    pub fn without_missing_inchi_key(self) -> Self {
        self.with(has_inchi_key)
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn accepts(&self, molecule: &Molecule) -> bool {
        self.predicates.iter().all(|predicate| predicate(molecule))
    }

    pub fn apply<I>(&self, molecules: I) -> impl Iterator<Item = Molecule> + use<I>
    where
        I: IntoIterator<Item = Molecule>,
    {
        let chain = self.clone();
        molecules
            .into_iter()
            .filter(move |molecule| chain.accepts(molecule))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub name: bool,
    pub smiles: bool,
    pub inchi: bool,
    pub inchi_key: bool,
    pub clean: bool,
}

impl FilterOptions {
    pub fn clean() -> Self {
        Self {
            clean: true,
            ..Self::default()
        }
    }

    pub fn chain(&self) -> FilterChain {
        let mut chain = FilterChain::new();
        if self.name || self.clean {
            chain = chain.without_missing_name();
        }
        if self.smiles || self.clean {
            chain = chain.without_missing_smiles();
        }
        if self.inchi || self.clean {
            chain = chain.without_missing_inchi();
        }
        if self.inchi_key || self.clean {
            chain = chain.without_missing_inchi_key();
        }
        chain
    }
}

/// Single-level view of a [`Molecule`]. List fields are joined with
/// [`LIST_DELIMITER`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactMolecule {
    pub chembl_id: String,
    pub name: Option<String>,
    pub indication_class: Option<String>,
    pub inorganic_flag: Option<i64>,
    pub max_phase: Option<String>,
    pub properties: Option<Value>,
    pub smiles: Option<String>,
    pub inchi: Option<String>,
    pub inchi_key: Option<String>,
    pub synonyms: String,
    pub atc_classifications: Option<String>,
    #[serde(rename = "type")]
    pub molecule_type: Option<String>,
    pub natural: Option<i64>,
    pub topical: Option<bool>,
    pub oral: Option<bool>,
    pub parenteral: Option<bool>,
}

pub fn compact(molecule: &Molecule) -> CompactMolecule {
    let synonyms = molecule
        .molecule_synonyms
        .as_ref()
        .map(|synonyms| {
            synonyms
                .iter()
                .map(|synonym| synonym.molecule_synonym.as_str())
                .collect::<Vec<_>>()
                .join(LIST_DELIMITER)
        })
        .unwrap_or_default();

    CompactMolecule {
        chembl_id: molecule.molecule_chembl_id.clone(),
        name: molecule.pref_name.clone(),
        indication_class: molecule.indication_class.clone(),
        inorganic_flag: molecule.inorganic_flag,
        max_phase: molecule.max_phase.clone(),
        properties: molecule.molecule_properties.clone(),
        smiles: molecule.canonical_smiles().map(str::to_string),
        inchi: molecule.standard_inchi().map(str::to_string),
        inchi_key: molecule.standard_inchi_key().map(str::to_string),
        synonyms,
        atc_classifications: molecule
            .atc_classifications
            .as_ref()
            .map(|codes| codes.join(LIST_DELIMITER)),
        molecule_type: molecule.molecule_type.clone(),
        natural: molecule.natural_product,
        topical: molecule.topical,
        oral: molecule.oral,
        parenteral: molecule.parenteral,
    }
}

pub fn compact_all<'a, I>(molecules: I) -> Vec<CompactMolecule>
where
    I: IntoIterator<Item = &'a Molecule>,
{
    molecules.into_iter().map(compact).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_map_to_chain_length() {
        assert!(FilterOptions::default().chain().is_empty());
        assert_eq!(FilterOptions::clean().chain().len(), 4);
        let partial = FilterOptions {
            name: true,
            inchi_key: true,
            ..FilterOptions::default()
        };
        assert_eq!(partial.chain().len(), 2);
    }
}
