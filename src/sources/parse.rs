//! Payload parsers for legacy sources
//!
//! Every parser produces rows keyed by normalized (snake_case) field names.
//! A payload either parses completely or the whole parse fails; there is no
//! partially populated dataset.

use std::collections::BTreeMap;
use std::io::Cursor;

use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook_auto_from_rs, Reader as _};
use quick_xml::events::Event;
use quick_xml::Reader;

use super::catalog::{PayloadFormat, RowFilter};
use crate::model::{Row, ID_FIELD};

/// Parse a downloaded payload into rows
pub fn parse_payload(format: &PayloadFormat, body: &[u8]) -> Result<Vec<Row>> {
    match format {
        PayloadFormat::Csv { columns } => parse_csv(body, columns.as_deref()),
        PayloadFormat::Spreadsheet => parse_spreadsheet(body),
        PayloadFormat::UnConsolidatedXml => parse_un_xml(body),
    }
}

/// Rename the native id column to `id` and apply the row filter
pub fn finalize_rows(rows: Vec<Row>, id_field: Option<&str>, filter: Option<&RowFilter>) -> Vec<Row> {
    let id_field = id_field.map(normalize_header);
    let needle = filter.map(|f| (normalize_header(&f.field), f.needle.to_lowercase()));

    rows.into_iter()
        .map(|mut row| {
            if let Some(field) = id_field.as_deref() {
                if field != ID_FIELD {
                    if let Some(value) = row.remove(field) {
                        row.insert(ID_FIELD.to_string(), value);
                    }
                }
            }
            row
        })
        .filter(|row| match &needle {
            Some((field, needle)) => row
                .get(field)
                .map_or(true, |value| value.to_lowercase().contains(needle.as_str())),
            None => true,
        })
        .collect()
}

/// "Name of Vessel (IMO)" -> "name_of_vessel_imo"
pub fn normalize_header(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    let mut pending_sep = false;
    for c in header.trim().chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

fn header_names(raw: impl IntoIterator<Item = String>) -> Vec<String> {
    raw.into_iter()
        .enumerate()
        .map(|(i, h)| {
            let name = normalize_header(&h);
            if name.is_empty() {
                format!("column_{}", i + 1)
            } else {
                name
            }
        })
        .collect()
}

fn zip_row<'a>(headers: &[String], values: impl IntoIterator<Item = &'a str>) -> Row {
    headers
        .iter()
        .zip(values)
        .filter_map(|(h, v)| {
            let v = v.trim();
            (!v.is_empty() && v != "-0-").then(|| (h.clone(), v.to_string()))
        })
        .collect()
}

// =============================================================================
// CSV
// =============================================================================

fn parse_csv(body: &[u8], columns: Option<&[String]>) -> Result<Vec<Row>> {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);

    if body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'<') {
        bail!("expected CSV but received markup");
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(columns.is_none())
        .flexible(true)
        .from_reader(body);

    let headers = match columns {
        Some(cols) => header_names(cols.iter().cloned()),
        None => header_names(
            reader
                .headers()
                .context("Failed to read CSV header")?
                .iter()
                .map(str::to_string),
        ),
    };

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Malformed CSV record {}", line + 1))?;
        let row = zip_row(&headers, record.iter());
        if !row.is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}

// =============================================================================
// Spreadsheet
// =============================================================================

fn parse_spreadsheet(body: &[u8]) -> Result<Vec<Row>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(body.to_vec()))
        .context("Failed to open workbook")?;

    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("workbook has no sheets"))?;
    let range = workbook
        .worksheet_range(&sheet)
        .with_context(|| format!("Failed to read sheet '{}'", sheet))?;

    let mut sheet_rows = range.rows();
    let headers = match sheet_rows.next() {
        Some(header) => header_names(header.iter().map(|c| c.to_string())),
        None => return Ok(Vec::new()),
    };

    let rows = sheet_rows
        .map(|cells| {
            let values: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
            zip_row(&headers, values.iter().map(String::as_str))
        })
        .filter(|row| !row.is_empty())
        .collect();
    Ok(rows)
}

// =============================================================================
// UN consolidated list XML
// =============================================================================

const UN_NAME_PARTS: &[&str] = &["FIRST_NAME", "SECOND_NAME", "THIRD_NAME", "FOURTH_NAME"];
const UN_FIELDS: &[&str] = &["DATAID", "REFERENCE_NUMBER", "UN_LIST_TYPE", "LISTED_ON"];

struct UnRecord {
    kind: &'static str,
    depth: usize,
    field: Option<String>,
    values: BTreeMap<String, String>,
}

impl UnRecord {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            depth: 0,
            field: None,
            values: BTreeMap::new(),
        }
    }

    fn into_row(self) -> Option<Row> {
        let name = UN_NAME_PARTS
            .iter()
            .filter_map(|part| self.values.get(*part))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() {
            return None;
        }

        let mut row = Row::new();
        row.insert("name".to_string(), name);
        row.insert("type".to_string(), self.kind.to_string());
        for field in UN_FIELDS {
            if let Some(value) = self.values.get(*field) {
                let key = if *field == "DATAID" {
                    ID_FIELD.to_string()
                } else {
                    field.to_lowercase()
                };
                row.insert(key, value.trim().to_string());
            }
        }
        Some(row)
    }
}

fn record_kind(tag: &str) -> Option<&'static str> {
    match tag {
        "INDIVIDUAL" => Some("person"),
        "ENTITY" => Some("company"),
        _ => None,
    }
}

fn parse_un_xml(body: &[u8]) -> Result<Vec<Row>> {
    let text = std::str::from_utf8(body).context("UN list is not valid UTF-8")?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut rows = Vec::new();
    let mut current: Option<UnRecord> = None;

    loop {
        match reader.read_event().context("Malformed UN list XML")? {
            Event::Start(e) => {
                let tag = std::str::from_utf8(e.name().as_ref())?.to_string();
                match current.as_mut() {
                    Some(record) => {
                        record.depth += 1;
                        record.field = (record.depth == 1).then_some(tag);
                    }
                    None => {
                        if let Some(kind) = record_kind(&tag) {
                            current = Some(UnRecord::new(kind));
                        }
                    }
                }
            }
            Event::Text(t) => {
                if let Some(record) = current.as_mut() {
                    if let Some(field) = record.field.clone() {
                        let value = t.unescape().context("Bad text in UN list")?;
                        record.values.entry(field).or_default().push_str(&value);
                    }
                }
            }
            Event::CData(c) => {
                if let Some(record) = current.as_mut() {
                    if let Some(field) = record.field.clone() {
                        let value = String::from_utf8(c.into_inner().into_owned())
                            .context("Bad CDATA in UN list")?;
                        record.values.entry(field).or_default().push_str(&value);
                    }
                }
            }
            Event::End(_) => {
                if let Some(record) = current.as_mut() {
                    if record.depth == 0 {
                        if let Some(row) = current.take().and_then(UnRecord::into_row) {
                            rows.push(row);
                        }
                    } else {
                        record.depth -= 1;
                        record.field = None;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if current.is_some() {
        bail!("UN list ended inside a record");
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::catalog::{ofac, OFAC_SDN_COLUMNS};

    fn ofac_columns() -> Option<Vec<String>> {
        Some(OFAC_SDN_COLUMNS.iter().map(|c| c.to_string()).collect())
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("Name of Vessel (IMO)"), "name_of_vessel_imo");
        assert_eq!(normalize_header("  IMO number "), "imo_number");
        assert_eq!(normalize_header("ent_num"), "ent_num");
        assert_eq!(normalize_header("---"), "");
    }

    #[test]
    fn test_ofac_csv_without_header() {
        let body = concat!(
            "36,\"AEROCARIBBEAN AIRLINES\",-0- ,\"CUBA\",-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0- \n",
            "15036,\"OCEAN STAR\",\"vessel\",\"IRAN\",-0- ,\"9HXY\",\"Crude Oil Tanker\",-0- ,\"81,000\",\"Panama\",-0- ,\"IMO 9811000\"\n",
            "20001,\"SMITH, John\",\"individual\",\"SDGT\",-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0- \n",
        );
        let rows = parse_payload(&PayloadFormat::Csv { columns: ofac_columns() }, body.as_bytes())
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1]["name"], "OCEAN STAR");
        assert_eq!(rows[1]["grt"], "81,000");
        assert!(!rows[0].contains_key("type"));

        let spec = ofac();
        let rows = finalize_rows(rows, spec.id_field.as_deref(), spec.row_filter.as_ref());
        let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str()).collect();
        assert_eq!(names, ["AEROCARIBBEAN AIRLINES", "OCEAN STAR", "SMITH, John"]);
        assert_eq!(rows[1][ID_FIELD], "15036");
        assert_eq!(rows[2]["type"], "individual");
        assert!(!rows[1].contains_key("ent_num"));
    }

    #[test]
    fn test_row_filter_drops_non_matching() {
        let rows = vec![
            Row::from([("type".to_string(), "individual".to_string())]),
            Row::from([("type".to_string(), "Vessel".to_string())]),
        ];
        let out = finalize_rows(rows, None, Some(&RowFilter::field_contains("type", "vessel")));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["type"], "Vessel");
    }

    #[test]
    fn test_csv_with_header_row() {
        let body = "\u{feff}Vessel Name,IMO Number,Flag\nBLUE MARLIN,9000001,\nEVER GIVEN,9811000,Panama\n";
        let rows = parse_payload(&PayloadFormat::Csv { columns: None }, body.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["vessel_name"], "BLUE MARLIN");
        assert!(!rows[0].contains_key("flag"));
        assert_eq!(rows[1]["imo_number"], "9811000");
    }

    #[test]
    fn test_markup_is_rejected_as_csv() {
        let body = b"\n  <!DOCTYPE html><html><body>UK sanctions list</body></html>";
        let err = parse_payload(&PayloadFormat::Csv { columns: None }, body).unwrap_err();
        assert!(err.to_string().contains("markup"));
    }

    #[test]
    fn test_un_xml() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<CONSOLIDATED_LIST dateGenerated="2025-05-20T00:00:00">
  <INDIVIDUALS>
    <INDIVIDUAL>
      <DATAID>6908555</DATAID>
      <FIRST_NAME>RI</FIRST_NAME>
      <SECOND_NAME>WON HO</SECOND_NAME>
      <UN_LIST_TYPE>DPRK</UN_LIST_TYPE>
      <REFERENCE_NUMBER>KPi.033</REFERENCE_NUMBER>
      <LISTED_ON>2016-11-30</LISTED_ON>
      <INDIVIDUAL_ALIAS>
        <QUALITY>Good</QUALITY>
        <ALIAS_NAME>Ri Won-ho</ALIAS_NAME>
      </INDIVIDUAL_ALIAS>
    </INDIVIDUAL>
  </INDIVIDUALS>
  <ENTITIES>
    <ENTITY>
      <DATAID>110404</DATAID>
      <FIRST_NAME>OCEAN MARITIME MANAGEMENT &amp; CO</FIRST_NAME>
      <REFERENCE_NUMBER>KPe.029</REFERENCE_NUMBER>
    </ENTITY>
    <ENTITY>
      <DATAID>1</DATAID>
    </ENTITY>
  </ENTITIES>
</CONSOLIDATED_LIST>"#;

        let rows = parse_payload(&PayloadFormat::UnConsolidatedXml, body.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2, "nameless records are skipped");

        assert_eq!(rows[0]["name"], "RI WON HO");
        assert_eq!(rows[0]["type"], "person");
        assert_eq!(rows[0][ID_FIELD], "6908555");
        assert_eq!(rows[0]["un_list_type"], "DPRK");
        assert_eq!(rows[0]["listed_on"], "2016-11-30");
        assert!(!rows[0].contains_key("alias_name"));

        assert_eq!(rows[1]["name"], "OCEAN MARITIME MANAGEMENT & CO");
        assert_eq!(rows[1]["type"], "company");
        assert_eq!(rows[1]["reference_number"], "KPe.029");
    }

    #[test]
    fn test_malformed_un_xml_fails_whole_parse() {
        let body = "<CONSOLIDATED_LIST><INDIVIDUALS><INDIVIDUAL><FIRST_NAME>A</SECOND_NAME>";
        assert!(parse_payload(&PayloadFormat::UnConsolidatedXml, body.as_bytes()).is_err());

        let truncated = "<CONSOLIDATED_LIST><INDIVIDUALS><INDIVIDUAL><FIRST_NAME>A</FIRST_NAME>";
        assert!(parse_payload(&PayloadFormat::UnConsolidatedXml, truncated.as_bytes()).is_err());
    }

    #[test]
    fn test_spreadsheet() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Name of vessel").unwrap();
        sheet.write_string(0, 1, "IMO number").unwrap();
        sheet.write_string(0, 2, "Date of listing").unwrap();
        sheet.write_string(1, 0, "ANDREA").unwrap();
        sheet.write_number(1, 1, 9236353.0).unwrap();
        sheet.write_string(2, 0, "BLUE ATLANTIC").unwrap();
        sheet.write_string(2, 1, "9189902").unwrap();
        sheet.write_string(2, 2, "2025-05-20").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let rows = parse_payload(&PayloadFormat::Spreadsheet, &bytes).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name_of_vessel"], "ANDREA");
        assert_eq!(rows[0]["imo_number"], "9236353");
        assert!(!rows[0].contains_key("date_of_listing"));
        assert_eq!(rows[1]["date_of_listing"], "2025-05-20");

        let rows = finalize_rows(rows, Some("imo_number"), None);
        assert_eq!(rows[1][ID_FIELD], "9189902");
    }

    #[test]
    fn test_garbage_spreadsheet_fails() {
        assert!(parse_payload(&PayloadFormat::Spreadsheet, b"not a workbook").is_err());
    }
}
