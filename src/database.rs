use std::fs;
use std::path::Path;
use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::chembl::ActivityRecord;
use crate::collect::CompoundRow;
use crate::domain::ChemblId;
use crate::error::DiliError;

pub const COMPOUNDS_TABLE: &str = "compounds";
pub const ACTIVITIES_TABLE: &str = "activities";

const COMPOUNDS_SCHEMA: &str = "
    compound_name TEXT NOT NULL,
    ltkb_id TEXT,
    severity_class INTEGER,
    label_section TEXT,
    vdili_concern TEXT,
    version TEXT,
    chembl_id TEXT,
    name TEXT,
    indication_class TEXT,
    inorganic_flag INTEGER,
    max_phase TEXT,
    properties TEXT,
    smiles TEXT,
    inchi TEXT,
    inchi_key TEXT,
    synonyms TEXT,
    atc_classifications TEXT,
    molecule_type TEXT,
    natural_product INTEGER,
    topical INTEGER,
    oral INTEGER,
    parenteral INTEGER
";

const ACTIVITIES_SCHEMA: &str = "
    compound_chembl_id TEXT NOT NULL,
    activity_id INTEGER,
    molecule_chembl_id TEXT,
    assay_chembl_id TEXT,
    assay_type TEXT,
    assay_description TEXT,
    target_chembl_id TEXT,
    target_pref_name TEXT,
    target_organism TEXT,
    standard_type TEXT,
    standard_relation TEXT,
    standard_value TEXT,
    standard_units TEXT,
    pchembl_value TEXT,
    document_chembl_id TEXT
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Replace,
    Append,
}

impl WriteMode {
    /// Replace for the first batch of a run, append for the rest.
    pub fn for_batch(index: usize) -> Self {
        if index == 0 {
            WriteMode::Replace
        } else {
            WriteMode::Append
        }
    }
}

/// Handle on the local SQLite store. Opened once per run and closed
/// explicitly with [`Database::close`].
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, DiliError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| DiliError::Filesystem(err.to_string()))?;
            }
        }
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, DiliError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn close(self) -> Result<(), DiliError> {
        self.conn.close().map_err(|(_, err)| DiliError::from(err))
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, DiliError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn row_count(&self, table: &str) -> Result<usize, DiliError> {
        if !self.table_exists(table)? {
            return Ok(0);
        }
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn write_compounds(
        &mut self,
        rows: &[CompoundRow],
        mode: WriteMode,
    ) -> Result<usize, DiliError> {
        let tx = self.conn.transaction()?;
        prepare_table(&tx, COMPOUNDS_TABLE, COMPOUNDS_SCHEMA, mode)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO compounds (
                    compound_name, ltkb_id, severity_class, label_section, vdili_concern, version,
                    chembl_id, name, indication_class, inorganic_flag, max_phase, properties,
                    smiles, inchi, inchi_key, synonyms, atc_classifications, molecule_type,
                    natural_product, topical, oral, parenteral
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                           ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
            )?;
            for row in rows {
                let molecule = row.molecule.as_ref();
                let properties = molecule
                    .and_then(|m| m.properties.as_ref())
                    .map(|value| value.to_string());
                stmt.execute(params![
                    row.reference.compound_name,
                    row.reference.ltkb_id,
                    row.reference.severity_class,
                    row.reference.label_section,
                    row.reference.vdili_concern,
                    row.reference.version,
                    molecule.map(|m| m.chembl_id.as_str()),
                    molecule.and_then(|m| m.name.as_deref()),
                    molecule.and_then(|m| m.indication_class.as_deref()),
                    molecule.and_then(|m| m.inorganic_flag),
                    molecule.and_then(|m| m.max_phase.as_deref()),
                    properties,
                    molecule.and_then(|m| m.smiles.as_deref()),
                    molecule.and_then(|m| m.inchi.as_deref()),
                    molecule.and_then(|m| m.inchi_key.as_deref()),
                    molecule.map(|m| m.synonyms.as_str()),
                    molecule.and_then(|m| m.atc_classifications.as_deref()),
                    molecule.and_then(|m| m.molecule_type.as_deref()),
                    molecule.and_then(|m| m.natural),
                    molecule.and_then(|m| m.topical),
                    molecule.and_then(|m| m.oral),
                    molecule.and_then(|m| m.parenteral),
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn write_activities(
        &mut self,
        compound: &ChemblId,
        records: &[ActivityRecord],
        mode: WriteMode,
    ) -> Result<usize, DiliError> {
        let tx = self.conn.transaction()?;
        prepare_table(&tx, ACTIVITIES_TABLE, ACTIVITIES_SCHEMA, mode)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO activities (
                    compound_chembl_id, activity_id, molecule_chembl_id, assay_chembl_id,
                    assay_type, assay_description, target_chembl_id, target_pref_name,
                    target_organism, standard_type, standard_relation, standard_value,
                    standard_units, pchembl_value, document_chembl_id
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            for record in records {
                stmt.execute(params![
                    compound.as_str(),
                    record.activity_id,
                    record.molecule_chembl_id,
                    record.assay_chembl_id,
                    record.assay_type,
                    record.assay_description,
                    record.target_chembl_id,
                    record.target_pref_name,
                    record.target_organism,
                    record.standard_type,
                    record.standard_relation,
                    record.standard_value,
                    record.standard_units,
                    record.pchembl_value,
                    record.document_chembl_id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Distinct ChEMBL ids of the stored compounds, sorted. Rows whose id is
    /// null or malformed are left out.
    pub fn compound_chembl_ids(&self) -> Result<Vec<ChemblId>, DiliError> {
        if !self.table_exists(COMPOUNDS_TABLE)? {
            return Err(DiliError::InputNotFound(format!(
                "table `{COMPOUNDS_TABLE}` (run `dili-cp compounds` first)"
            )));
        }
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT chembl_id FROM compounds
             WHERE chembl_id IS NOT NULL
             ORDER BY chembl_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut parsed = ids
            .iter()
            .filter_map(|id| ChemblId::from_str(id).ok())
            .collect::<Vec<_>>();
        parsed.sort();
        parsed.dedup();
        Ok(parsed)
    }

    pub fn compound_rows(&self) -> Result<Vec<StoredCompound>, DiliError> {
        if !self.table_exists(COMPOUNDS_TABLE)? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT compound_name, ltkb_id, severity_class, label_section, vdili_concern, version,
                    chembl_id, name, indication_class, inorganic_flag, max_phase, properties,
                    smiles, inchi, inchi_key, synonyms, atc_classifications, molecule_type,
                    natural_product, topical, oral, parenteral
             FROM compounds ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], StoredCompound::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Flat row of the `compounds` table, as exported to CSV.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoredCompound {
    pub compound_name: String,
    pub ltkb_id: Option<String>,
    pub severity_class: Option<i64>,
    pub label_section: Option<String>,
    pub vdili_concern: Option<String>,
    pub version: Option<String>,
    pub chembl_id: Option<String>,
    pub name: Option<String>,
    pub indication_class: Option<String>,
    pub inorganic_flag: Option<i64>,
    pub max_phase: Option<String>,
    pub properties: Option<String>,
    pub smiles: Option<String>,
    pub inchi: Option<String>,
    pub inchi_key: Option<String>,
    pub synonyms: Option<String>,
    pub atc_classifications: Option<String>,
    pub molecule_type: Option<String>,
    pub natural_product: Option<i64>,
    pub topical: Option<bool>,
    pub oral: Option<bool>,
    pub parenteral: Option<bool>,
}

impl StoredCompound {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            compound_name: row.get(0)?,
            ltkb_id: row.get(1)?,
            severity_class: row.get(2)?,
            label_section: row.get(3)?,
            vdili_concern: row.get(4)?,
            version: row.get(5)?,
            chembl_id: row.get(6)?,
            name: row.get(7)?,
            indication_class: row.get(8)?,
            inorganic_flag: row.get(9)?,
            max_phase: row.get(10)?,
            properties: row.get(11)?,
            smiles: row.get(12)?,
            inchi: row.get(13)?,
            inchi_key: row.get(14)?,
            synonyms: row.get(15)?,
            atc_classifications: row.get(16)?,
            molecule_type: row.get(17)?,
            natural_product: row.get(18)?,
            topical: row.get(19)?,
            oral: row.get(20)?,
            parenteral: row.get(21)?,
        })
    }
}

fn prepare_table(
    conn: &Connection,
    table: &str,
    schema: &str,
    mode: WriteMode,
) -> Result<(), DiliError> {
    match mode {
        WriteMode::Replace => conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({schema});"
        ))?,
        WriteMode::Append => {
            conn.execute_batch(&format!("CREATE TABLE IF NOT EXISTS {table} ({schema});"))?
        }
    }
    Ok(())
}
