//! Per-table CSV export (spec §6). Written on completion of each consumer
//! request; the caller names `out_dir` (including the node's primary IP
//! when simulation is active, via `hostmesh_core::net::local_ip`).

use std::path::Path;

use rusqlite::Connection;

use crate::error::Error;

const TABLES: &[&str] = &["cos", "requests", "attempts", "responses"];

pub fn export_all(conn: &Connection, out_dir: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(out_dir)?;
    for table in TABLES {
        export_table(conn, table, out_dir)?;
    }
    Ok(())
}

fn export_table(conn: &Connection, table: &str, out_dir: &Path) -> Result<(), Error> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {table}"))?;
    let columns: Vec<String> = stmt
        .column_names()
        .iter()
        .map(|c| c.to_string())
        .collect();

    let path = out_dir.join(format!("{table}.csv"));
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&columns)?;

    let column_count = columns.len();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let value: rusqlite::types::Value = row.get(i)?;
            record.push(render(value));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn render(value: rusqlite::types::Value) -> String {
    use rusqlite::types::Value;
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s,
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}
