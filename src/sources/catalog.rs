//! Legacy source definitions
//!
//! Each flat-file government list is described by a [`SourceSpec`]: where to
//! download it, how to parse it, and how to map it onto the common row shape.

use serde::{Deserialize, Serialize};

use crate::config::validate_url;
use crate::error::ConfigError;

/// Wire format of a legacy source payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadFormat {
    /// Comma-separated values. `columns` names the fields of a header-less file.
    Csv { columns: Option<Vec<String>> },
    /// First worksheet of an XLSX/XLS/ODS workbook, first row is the header
    Spreadsheet,
    /// UN Security Council consolidated list XML
    UnConsolidatedXml,
}

/// Keep only rows whose `field` contains `needle` (case-insensitive).
/// Rows without the field are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilter {
    pub field: String,
    pub needle: String,
}

impl RowFilter {
    pub fn field_contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            needle: needle.into(),
        }
    }
}

/// Definition of one legacy source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Stable identifier, also names the cache file
    pub id: String,
    pub name: String,
    pub url: String,
    pub format: PayloadFormat,
    /// Normalized column holding the source's native record id
    pub id_field: Option<String>,
    pub row_filter: Option<RowFilter>,
}

impl SourceSpec {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        format: PayloadFormat,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            format,
            id_field: None,
            row_filter: None,
        }
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }

    pub fn with_row_filter(mut self, filter: RowFilter) -> Self {
        self.row_filter = Some(filter);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url(&self.id, &self.url).map(|_| ())
    }
}

/// Column layout of the header-less OFAC SDN CSV
pub const OFAC_SDN_COLUMNS: &[&str] = &[
    "ent_num",
    "name",
    "type",
    "program",
    "title",
    "call_sign",
    "vessel_type",
    "tonnage",
    "grt",
    "vessel_flag",
    "vessel_owner",
    "remarks",
];

/// US Treasury OFAC Specially Designated Nationals list. Every SDN row is
/// kept: individuals, entities (type `-0-`) and vessels.
pub fn ofac() -> SourceSpec {
    SourceSpec::new(
        "OFAC",
        "US Office of Foreign Assets Control",
        "https://www.treasury.gov/ofac/downloads/sdn.csv",
        PayloadFormat::Csv {
            columns: Some(OFAC_SDN_COLUMNS.iter().map(|c| c.to_string()).collect()),
        },
    )
    .with_id_field("ent_num")
}

/// UK sanctions list. The default URL is the publication page; point it at a
/// CSV export to get rows.
pub fn uk() -> SourceSpec {
    SourceSpec::new(
        "UK",
        "UK Sanctions List",
        "https://www.gov.uk/government/publications/the-uk-sanctions-list",
        PayloadFormat::Csv { columns: None },
    )
}

/// EU designated vessels list (Danish Maritime Authority import version)
pub fn eu() -> SourceSpec {
    SourceSpec::new(
        "EU",
        "EU Sanctions List",
        "https://www.dma.dk/Media/638834044135010725/2025118019-7%20Importversion%20-%20List%20of%20EU%20designated%20vessels%20(20-05-2025)%203010691_2_0.XLSX",
        PayloadFormat::Spreadsheet,
    )
    .with_id_field("imo_number")
}

/// UN Security Council consolidated list
pub fn un() -> SourceSpec {
    SourceSpec::new(
        "UN",
        "UN Security Council Consolidated List",
        "https://scsanctions.un.org/resources/xml/en/consolidated.xml",
        PayloadFormat::UnConsolidatedXml,
    )
}

/// The legacy sources in query order
pub fn default_sources() -> Vec<SourceSpec> {
    vec![ofac(), uk(), eu(), un()]
}
