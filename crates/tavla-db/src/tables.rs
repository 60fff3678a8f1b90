use redb::TableDefinition;

use tavla_core::Table;

/// Every record table uses the same layout.
/// Key: record key as UTF-8 bytes
/// Value: serialized record as bytes
pub type RecordTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

/// redb table backing a repository table.
pub fn definition(table: Table) -> RecordTable {
    TableDefinition::new(table.name())
}

/// Decode a stored key back to the record key.
pub fn decode_key(bytes: &[u8]) -> Result<String, tavla_core::StorageError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| tavla_core::StorageError::Database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitions_are_distinct() {
        let mut names: Vec<&str> = Table::ALL.iter().map(|t| t.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Table::ALL.len());
    }

    #[test]
    fn test_key_byte_order_matches_string_order() {
        // Prefix scans rely on this
        let a = "alice/00000000000000000009";
        let b = "alice/00000000000000000010";
        assert!(a < b);
        assert!(a.as_bytes() < b.as_bytes());
        assert_eq!(decode_key(a.as_bytes()).unwrap(), a);
    }
}
