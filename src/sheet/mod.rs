use crate::domain::model::{Row, Sheet};
use crate::utils::error::Result;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// 讀取輸入工作表，欄位集合與列數在此時確定
pub fn load_sheet<P: AsRef<Path>>(path: P) -> Result<Sheet> {
    let path = path.as_ref();
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("sheet")
        .to_string();

    let mut reader = csv::Reader::from_path(path)?;
    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let mut cells = HashMap::with_capacity(columns.len());
        for (position, column) in columns.iter().enumerate() {
            cells.insert(
                column.clone(),
                record.get(position).unwrap_or("").to_string(),
            );
        }
        rows.push(Row { index, cells });
    }

    Ok(Sheet {
        name,
        columns,
        rows,
    })
}

/// 寫出結果工作表，覆蓋既有檔案並在需要時建立輸出目錄。
/// 先寫進同目錄的暫存檔，全部寫完才改名成目標檔，
/// 中途失敗不會留下半成品，也不會動到上一次的輸出
pub fn store_sheet<P: AsRef<Path>>(path: P, sheet: &Sheet) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let staging = staging_path(path);
    let written =
        write_records(&staging, sheet).and_then(|()| Ok(std::fs::rename(&staging, path)?));
    if let Err(err) = written {
        let _ = std::fs::remove_file(&staging);
        return Err(err);
    }

    Ok(())
}

/// 暫存檔放在目標旁邊，改名才不會跨檔案系統
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_records(path: &Path, sheet: &Sheet) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&sheet.columns)?;
    for row in &sheet.rows {
        let record: Vec<&str> = sheet
            .columns
            .iter()
            .map(|column| row.cell(column).unwrap_or(""))
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;

    Ok(())
}
