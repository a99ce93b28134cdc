//! SQLite virtual-table adapter.
//!
//! Registers a read-only module named `mod_partition` whose `Create`
//! callback receives an MPR path, opens a reader, and maps resolved column
//! types to SQLite column types. Each cursor owns its own reader and file
//! handle, scans forward only (`best_index` reports a full scan), and
//! reports the 1-based row ordinal as its rowid. Date, time and datetime
//! values render as ISO 8601 text.
//!
//! ```no_run
//! # fn main() -> Result<(), mprows::MprError> {
//! use rusqlite::Connection;
//!
//! let conn = Connection::open_in_memory()?;
//! mprows::install_mpr_module(&conn)?;
//! mprows::add_partition(&conn, std::path::Path::new("cars.mpr"), "cars")?;
//! let n: i64 = conn.query_row("SELECT count(*) FROM cars", [], |r| r.get(0))?;
//! # let _ = n;
//! # Ok(())
//! # }
//! ```

use std::marker::PhantomData;
use std::os::raw::c_int;
use std::path::Path;

use log::debug;
use rusqlite::ffi;
use rusqlite::vtab::{
    read_only_module, Context, CreateVTab, IndexInfo, VTab, VTabConnection, VTabCursor, VTabKind,
    Values,
};
use rusqlite::Connection;

use crate::err::MprError;
use crate::mpr_reader::{DataRows, MprReader};
use crate::mpr_value::{Row, Value};

/// Name the virtual-table module is registered under.
pub const MODULE_NAME: &str = "mod_partition";

/// Maps a resolved MPR column type to a SQLite column type.
fn sql_type(typ: &str) -> &'static str {
    match typ {
        "int" => "INTEGER",
        "float" => "REAL",
        "date" => "DATE",
        "datetime" => "TIMESTAMP WITHOUT TIME ZONE",
        // Times keep ISO 8601 text; strings and bytes are text.
        _ => "TEXT",
    }
}

/// Registers the `mod_partition` module on a connection. Re-registration
/// replaces the module and is harmless.
pub fn install_mpr_module(conn: &Connection) -> Result<(), MprError> {
    conn.create_module(MODULE_NAME, read_only_module::<MprTab>(), None)?;
    Ok(())
}

fn relation_exists(conn: &Connection, name: &str) -> Result<bool, MprError> {
    let mut stmt = conn.prepare(
        "SELECT 1 FROM sqlite_master WHERE (type='table' OR type='view') AND name = ?1",
    )?;
    let found = stmt.exists([name])?;
    Ok(found)
}

/// Installs the module and creates a virtual table named `table` over the
/// MPR file at `path`. Creating a table that already exists is a no-op;
/// mounting a missing file is a [`MprError::VirtualTable`] error.
pub fn add_partition(conn: &Connection, path: &Path, table: &str) -> Result<(), MprError> {
    install_mpr_module(conn)?;

    if relation_exists(conn, table)? {
        return Ok(());
    }
    if !path.exists() {
        return Err(MprError::VirtualTable(format!(
            "non-existent MPR file {}",
            path.display()
        )));
    }

    let sql = format!(
        "CREATE VIRTUAL TABLE \"{table}\" USING {MODULE_NAME}('{}')",
        path.display()
    );
    debug!("creating virtual table with: {sql}");
    conn.execute_batch(&sql)?;
    Ok(())
}

/// Virtual table over one MPR file.
#[repr(C)]
pub struct MprTab {
    /// Base class. Must be first.
    base: ffi::sqlite3_vtab,
    reader: MprReader,
}

unsafe impl<'vtab> VTab<'vtab> for MprTab {
    type Aux = ();
    type Cursor = MprTabCursor<'vtab>;

    fn connect(
        _db: &mut VTabConnection,
        _aux: Option<&()>,
        args: &[&[u8]],
    ) -> rusqlite::Result<(String, MprTab)> {
        let path_arg = args.get(3).ok_or_else(|| {
            rusqlite::Error::ModuleError(format!("{MODULE_NAME} requires an MPR path argument"))
        })?;
        let path = std::str::from_utf8(path_arg)
            .map_err(|e| rusqlite::Error::ModuleError(format!("bad path argument: {e}")))?
            .trim()
            .trim_matches('\'')
            .trim_matches('"');

        let reader = MprReader::open_syspath(path)
            .map_err(|e| rusqlite::Error::ModuleError(format!("can't open {path}: {e}")))?;

        let columns: Vec<String> = reader
            .columns()
            .iter()
            .map(|col| {
                let typ = col
                    .resolved_type
                    .as_deref()
                    .or(col.col_type.as_deref())
                    .unwrap_or("str");
                format!("\"{}\" {}", col.name, sql_type(typ))
            })
            .collect();
        let schema = format!("CREATE TABLE x({})", columns.join(",\n"));
        debug!("virtual table schema: {schema}");

        Ok((schema, MprTab {
            base: ffi::sqlite3_vtab::default(),
            reader,
        }))
    }

    fn best_index(&self, info: &mut IndexInfo) -> rusqlite::Result<()> {
        // No index; every query is a full scan of the row stream.
        info.set_estimated_cost(1_000_000.0);
        Ok(())
    }

    fn open(&'vtab mut self) -> rusqlite::Result<MprTabCursor<'vtab>> {
        Ok(MprTabCursor {
            base: ffi::sqlite3_vtab_cursor::default(),
            reader: self.reader.clone(),
            rows: None,
            row: None,
            row_id: 0,
            phantom: PhantomData,
        })
    }
}

impl CreateVTab<'_> for MprTab {
    const KIND: VTabKind = VTabKind::Default;
}

/// Cursor over an MPR virtual table, bound to its own reader.
#[repr(C)]
pub struct MprTabCursor<'vtab> {
    /// Base class. Must be first.
    base: ffi::sqlite3_vtab_cursor,
    reader: MprReader,
    rows: Option<DataRows>,
    row: Option<Row>,
    row_id: i64,
    phantom: PhantomData<&'vtab MprTab>,
}

impl MprTabCursor<'_> {
    fn advance(&mut self) -> rusqlite::Result<()> {
        let rows = self.rows.as_mut().ok_or_else(|| {
            rusqlite::Error::ModuleError("cursor used before filter".to_string())
        })?;
        self.row = match rows.next() {
            Some(Ok(row)) => {
                self.row_id += 1;
                Some(row)
            }
            Some(Err(e)) => {
                return Err(rusqlite::Error::ModuleError(format!("row read failed: {e}")));
            }
            None => None,
        };
        Ok(())
    }
}

unsafe impl VTabCursor for MprTabCursor<'_> {
    fn filter(
        &mut self,
        _idx_num: c_int,
        _idx_str: Option<&str>,
        _args: &Values<'_>,
    ) -> rusqlite::Result<()> {
        // Each scan reseeks to the start of the row stream.
        let rows = self
            .reader
            .rows()
            .map_err(|e| rusqlite::Error::ModuleError(format!("can't open row stream: {e}")))?;
        self.rows = Some(rows);
        self.row_id = 0;
        self.advance()
    }

    fn next(&mut self) -> rusqlite::Result<()> {
        self.advance()
    }

    fn eof(&self) -> bool {
        self.row.is_none()
    }

    fn column(&self, ctx: &mut Context, col: c_int) -> rusqlite::Result<()> {
        let row = self
            .row
            .as_ref()
            .ok_or_else(|| rusqlite::Error::ModuleError("column read at EOF".to_string()))?;
        match row.get(col as usize) {
            None | Some(Value::Null) => ctx.set_result(&rusqlite::types::Null),
            Some(Value::Int(i)) => ctx.set_result(i),
            Some(Value::Float(f)) => ctx.set_result(f),
            Some(Value::String(s)) => ctx.set_result(s),
            Some(Value::Bytes(b)) => ctx.set_result(b),
            Some(v @ (Value::Date(_) | Value::Time(_) | Value::DateTime(_))) => {
                ctx.set_result(&v.to_string())
            }
        }
    }

    fn rowid(&self) -> rusqlite::Result<i64> {
        Ok(self.row_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_map() {
        assert_eq!(sql_type("int"), "INTEGER");
        assert_eq!(sql_type("float"), "REAL");
        assert_eq!(sql_type("str"), "TEXT");
        assert_eq!(sql_type("bytes"), "TEXT");
        assert_eq!(sql_type("date"), "DATE");
        assert_eq!(sql_type("datetime"), "TIMESTAMP WITHOUT TIME ZONE");
        assert_eq!(sql_type("time"), "TEXT");
    }
}
