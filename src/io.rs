//! Table and key file I/O.
//!
//! Plaintext tables are CSV files of integers, with an optional header
//! row; headerless files get a generated `col1..colN` schema. Encrypted
//! tables are JSON files carrying the schema plus each tuple's ciphertext
//! payload and nonce. Keys are 64-hex-digit files.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::TupleCryptor;
use crate::error::ObliJoinError;
use crate::schema::Schema;
use crate::table::ObliviousTable;
use crate::tuple::{EncryptionStatus, Tuple};

fn parse_error(path: &Path, reason: impl Into<String>) -> ObliJoinError {
    ObliJoinError::Parse {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Load a CSV table. The first line is taken as a header unless every
/// field parses as an integer.
pub fn load_csv(path: &Path) -> Result<ObliviousTable, ObliJoinError> {
    let name = table_name_from_path(path);
    let body = fs::read_to_string(path)?;
    let lines: Vec<&str> = body.lines().filter(|l| !l.trim().is_empty()).collect();

    let Some(first) = lines.first() else {
        return Ok(ObliviousTable::new(name, Schema::default()));
    };
    let first_fields: Vec<&str> = first.split(',').map(str::trim).collect();
    let headerless = first_fields.iter().all(|f| f.parse::<i64>().is_ok());

    let (schema, data_lines) = if headerless {
        (Schema::generic(first_fields.len())?, &lines[..])
    } else {
        let header = first_fields.iter().map(|c| c.to_string()).collect();
        (Schema::new(header)?, &lines[1..])
    };

    let mut rows = Vec::new();
    for (line_no, line) in data_lines.iter().enumerate() {
        let mut row = Vec::with_capacity(schema.width());
        for field in line.split(',') {
            let value = field.trim().parse::<i64>().map_err(|_| {
                parse_error(path, format!("line {}: not an integer: {field:?}", line_no + 1))
            })?;
            row.push(value);
        }
        if row.len() != schema.width() {
            return Err(parse_error(
                path,
                format!(
                    "line {}: expected {} fields, found {}",
                    line_no + 1,
                    schema.width(),
                    row.len()
                ),
            ));
        }
        rows.push(row);
    }
    Ok(ObliviousTable::from_rows(name, schema, &rows))
}

/// Write a plaintext table as CSV with a header row.
pub fn save_csv(table: &ObliviousTable, path: &Path) -> Result<(), ObliJoinError> {
    let mut out = String::new();
    out.push_str(&table.schema().columns().join(","));
    out.push('\n');
    let width = table.schema().width();
    for tuple in table.tuples() {
        let fields: Vec<String> = tuple.attributes[..width]
            .iter()
            .map(|v| v.to_string())
            .collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct TableFile {
    name: String,
    schema: Schema,
    tuples: Vec<Tuple>,
}

/// Write a table (typically encrypted) as a JSON table file.
pub fn save_table_file(table: &ObliviousTable, path: &Path) -> Result<(), ObliJoinError> {
    let file = TableFile {
        name: table.name().to_string(),
        schema: table.schema().clone(),
        tuples: table.tuples().to_vec(),
    };
    let json = serde_json::to_string(&file).map_err(|e| parse_error(path, e.to_string()))?;
    fs::write(path, json)?;
    Ok(())
}

/// Load a JSON table file written by [`save_table_file`].
pub fn load_table_file(path: &Path) -> Result<ObliviousTable, ObliJoinError> {
    let body = fs::read_to_string(path)?;
    let file: TableFile =
        serde_json::from_str(&body).map_err(|e| parse_error(path, e.to_string()))?;
    Ok(ObliviousTable::with_tuples(file.name, file.schema, file.tuples))
}

/// Encrypt every tuple of a table in place.
pub fn encrypt_table(
    table: &mut ObliviousTable,
    cryptor: &TupleCryptor,
) -> Result<(), ObliJoinError> {
    if table.encryption_status() == EncryptionStatus::AllEncrypted {
        return Err(ObliJoinError::AlreadyEncrypted);
    }
    cryptor.encrypt_batch(table.tuples_mut())
}

/// Decrypt every tuple of a table in place.
pub fn decrypt_table(
    table: &mut ObliviousTable,
    cryptor: &TupleCryptor,
) -> Result<(), ObliJoinError> {
    if table.encryption_status() == EncryptionStatus::AllPlaintext && !table.is_empty() {
        return Err(ObliJoinError::NotEncrypted);
    }
    cryptor.decrypt_batch(table.tuples_mut())
}

/// Read a 64-hex-digit key file.
pub fn load_key(path: &Path) -> Result<TupleCryptor, ObliJoinError> {
    let hex = fs::read_to_string(path)?;
    TupleCryptor::from_hex(&hex)
}

/// Write the cryptor's key as a hex key file.
pub fn save_key(cryptor: &TupleCryptor, path: &Path) -> Result<(), ObliJoinError> {
    fs::write(path, cryptor.key_hex())?;
    Ok(())
}

fn table_name_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_with_header_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("orders.csv");
        fs::write(&path, "custkey,orderkey\n1,10\n1,11\n2,20\n").unwrap();

        let table = load_csv(&path).unwrap();
        assert_eq!(table.name(), "orders");
        assert_eq!(table.schema().columns(), &["custkey", "orderkey"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.tuples()[2].attributes[..2], [2, 20]);
        assert_eq!(table.tuples()[2].original_index, 2);

        let out = tmp.path().join("out.csv");
        save_csv(&table, &out).unwrap();
        let reloaded = load_csv(&out).unwrap();
        assert_eq!(reloaded.schema(), table.schema());
        assert_eq!(reloaded.len(), 3);
    }

    #[test]
    fn test_headerless_csv_gets_generic_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.csv");
        fs::write(&path, "5,-3\n7,0\n").unwrap();

        let table = load_csv(&path).unwrap();
        assert_eq!(table.schema().columns(), &["col1", "col2"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.tuples()[0].attributes[..2], [5, -3]);
    }

    #[test]
    fn test_empty_csv_is_empty_table() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.csv");
        fs::write(&path, "").unwrap();
        let table = load_csv(&path).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_csv_rejects_bad_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.csv");
        fs::write(&path, "k\n1\nxyz\n").unwrap();
        assert!(matches!(
            load_csv(&path),
            Err(ObliJoinError::Parse { .. })
        ));

        fs::write(&path, "k,v\n1\n").unwrap();
        assert!(matches!(load_csv(&path), Err(ObliJoinError::Parse { .. })));
    }

    #[test]
    fn test_encrypted_table_file_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("t.enc.json");
        let cryptor = TupleCryptor::generate();

        let mut table = ObliviousTable::from_rows(
            "t",
            Schema::new(vec!["k", "v"]).unwrap(),
            &[vec![1, 2], vec![3, 4]],
        );
        let original = table.clone();
        encrypt_table(&mut table, &cryptor).unwrap();
        save_table_file(&table, &path).unwrap();

        let mut loaded = load_table_file(&path).unwrap();
        assert_eq!(loaded.encryption_status(), EncryptionStatus::AllEncrypted);
        decrypt_table(&mut loaded, &cryptor).unwrap();
        assert_eq!(loaded.tuples(), original.tuples());
        assert_eq!(loaded.schema(), original.schema());
    }

    #[test]
    fn test_double_encrypt_guard() {
        let cryptor = TupleCryptor::generate();
        let mut table =
            ObliviousTable::from_rows("t", Schema::generic(1).unwrap(), &[vec![1]]);
        encrypt_table(&mut table, &cryptor).unwrap();
        assert!(matches!(
            encrypt_table(&mut table, &cryptor),
            Err(ObliJoinError::AlreadyEncrypted)
        ));
    }

    #[test]
    fn test_key_file_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("join.key");
        let cryptor = TupleCryptor::generate();
        save_key(&cryptor, &path).unwrap();
        let loaded = load_key(&path).unwrap();
        assert_eq!(loaded.key_hex(), cryptor.key_hex());
    }
}
