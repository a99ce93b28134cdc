//! PostgreSQL foreign-data-wrapper adapter.
//!
//! Exposes an MPR file to a remote PostgreSQL server as a foreign table:
//! one `CREATE SERVER` shared by all partitions and one
//! `CREATE FOREIGN TABLE` per file, both scoped to a dedicated schema. The
//! DDL builders are pure; [`add_partition`] executes them over a client.
//! The server side needs the multicorn wrapper with the MPR reader
//! installed.

use std::path::Path;

use log::debug;

use crate::err::MprError;
use crate::mpr_reader::MprReader;

/// Schema all partition foreign tables live in.
pub const POSTGRES_PARTITION_SCHEMA_NAME: &str = "partitions";

/// Name of the shared foreign server.
pub const FOREIGN_SERVER_NAME: &str = "partition_server";

/// Maps a resolved MPR column type to a PostgreSQL column type.
fn pg_type(typ: &str) -> &'static str {
    match typ {
        "int" => "INTEGER",
        "float" => "REAL",
        "date" => "DATE",
        "datetime" => "TIMESTAMP WITHOUT TIME ZONE",
        // Times keep ISO 8601 text; strings and bytes are text.
        _ => "TEXT",
    }
}

/// DDL creating the shared foreign server.
pub fn foreign_server_ddl() -> String {
    format!(
        "CREATE SERVER IF NOT EXISTS {FOREIGN_SERVER_NAME} \
         FOREIGN DATA WRAPPER multicorn \
         OPTIONS (wrapper 'ambryfdw.MPRForeignDataWrapper');"
    )
}

/// DDL creating the partition schema.
pub fn schema_ddl() -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {POSTGRES_PARTITION_SCHEMA_NAME};")
}

/// DDL creating the foreign table for one MPR file.
pub fn foreign_table_ddl(reader: &MprReader, path: &Path, table: &str) -> String {
    let columns: Vec<String> = reader
        .columns()
        .iter()
        .map(|col| {
            let typ = col
                .resolved_type
                .as_deref()
                .or(col.col_type.as_deref())
                .unwrap_or("str");
            format!("    \"{}\" {}", col.name, pg_type(typ))
        })
        .collect();

    format!(
        "CREATE FOREIGN TABLE IF NOT EXISTS {POSTGRES_PARTITION_SCHEMA_NAME}.\"{table}\" (\n{}\n) \
         SERVER {FOREIGN_SERVER_NAME} OPTIONS (path '{}');",
        columns.join(",\n"),
        path.display()
    )
}

/// Creates the server, schema, and foreign table for one MPR file.
pub fn add_partition(
    client: &mut postgres::Client,
    reader: &MprReader,
    path: &Path,
    table: &str,
) -> Result<(), MprError> {
    if !path.exists() {
        return Err(MprError::VirtualTable(format!(
            "non-existent MPR file {}",
            path.display()
        )));
    }

    let ddl = format!(
        "{}\n{}\n{}",
        foreign_server_ddl(),
        schema_ddl(),
        foreign_table_ddl(reader, path, table)
    );
    debug!("creating foreign table with: {ddl}");
    client.batch_execute(&ddl)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pg_type_map() {
        assert_eq!(pg_type("int"), "INTEGER");
        assert_eq!(pg_type("float"), "REAL");
        assert_eq!(pg_type("str"), "TEXT");
        assert_eq!(pg_type("time"), "TEXT");
        assert_eq!(pg_type("datetime"), "TIMESTAMP WITHOUT TIME ZONE");
    }

    #[test]
    fn server_ddl_is_idempotent_sql() {
        let ddl = foreign_server_ddl();
        assert!(ddl.contains("IF NOT EXISTS"));
        assert!(ddl.contains(FOREIGN_SERVER_NAME));
    }
}
