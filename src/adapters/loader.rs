use crate::adapters::csv::read_delimited;
use crate::adapters::geojson::{crs_srid, read_feature_collection};
use crate::adapters::srid::prj_authority_srid;
use crate::domain::geometry::{qualify, Catalog, GeoTable, GeometryColumn, DEFAULT_GEOMETRY};
use crate::domain::model::Table;
use crate::domain::ports::SridLookup;
use crate::utils::error::{Result, SpandexError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_ENCODING: &str = "LATIN1";
/// SRID used when nothing identifies a layer's projection.
pub const UNKNOWN_SRID: i32 = 0;

/// A table to load: just a filename, or a filename with options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoadEntry {
    File(String),
    Options(LoadOptions),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadOptions {
    pub file: String,
    pub srid: Option<i32>,
    pub delimiter: Option<char>,
    pub drop: Option<bool>,
    #[serde(default)]
    pub append: bool,
}

impl LoadEntry {
    /// Options for this entry; tables are dropped unless told otherwise.
    pub fn options(&self) -> LoadOptions {
        match self {
            LoadEntry::File(file) => LoadOptions {
                file: file.clone(),
                srid: None,
                delimiter: None,
                drop: Some(true),
                append: false,
            },
            LoadEntry::Options(opts) => LoadOptions {
                drop: Some(opts.drop.unwrap_or(true)),
                ..opts.clone()
            },
        }
    }
}

/// Decode file contents, trusting UTF-8 when the bytes are valid UTF-8 and
/// otherwise using the declared encoding. Bytes the encoding cannot map are
/// an error rather than replacement characters.
pub fn decode(bytes: Vec<u8>, encoding: &str) -> Result<String> {
    let bytes = match String::from_utf8(bytes) {
        Ok(text) => return Ok(text),
        Err(err) => err.into_bytes(),
    };
    let label = encoding.trim().to_ascii_uppercase().replace('_', "-");
    // ISO-8859-1 proper; encoding_rs would read these labels as windows-1252
    if matches!(label.as_str(), "LATIN1" | "LATIN-1" | "ISO-8859-1" | "ISO8859-1" | "8859-1") {
        return Ok(bytes.into_iter().map(char::from).collect());
    }

    let unsupported = || {
        SpandexError::validation(format!(
            "file is not valid UTF-8 and encoding '{}' is not supported",
            label
        ))
    };
    let codec = encoding_rs::Encoding::for_label(label.as_bytes()).ok_or_else(unsupported)?;
    codec
        .decode_without_bom_handling_and_without_replacement(&bytes)
        .map(|text| text.into_owned())
        .ok_or_else(|| {
            SpandexError::validation(format!("file contains bytes that are not valid {}", codec.name()))
        })
}

fn is_geojson(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("geojson") | Some("json")
    )
}

fn default_delimiter(path: &Path) -> char {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("tsv") | Some("tab") => '\t',
        Some("psv") => '|',
        _ => ',',
    }
}

/// Loads files from a data directory into a catalog.
pub struct DataLoader {
    directory: PathBuf,
    srid: Option<i32>,
    lookup: Option<Arc<dyn SridLookup>>,
}

impl DataLoader {
    pub fn new(directory: impl Into<PathBuf>, srid: Option<i32>) -> Result<Self> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(SpandexError::ConfigError {
                message: format!("data directory {} does not exist", directory.display()),
            });
        }
        Ok(Self {
            directory,
            srid,
            lookup: None,
        })
    }

    /// Use a remote service for projections without an EPSG authority.
    pub fn with_lookup(mut self, lookup: Arc<dyn SridLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn default_srid(&self) -> Option<i32> {
        self.srid
    }

    /// Path of a file relative to the data directory.
    pub fn get_path(&self, filename: &str) -> PathBuf {
        self.directory.join(filename)
    }

    /// Encoding from a `.cpg` or `.cst` sidecar, falling back to LATIN1.
    pub fn get_encoding(&self, filename: &str) -> String {
        let path = self.get_path(filename);
        let declared = ["cpg", "cst"].iter().find_map(|ext| {
            let sidecar = path.with_extension(ext);
            let text = std::fs::read_to_string(&sidecar).ok()?;
            tracing::debug!(".{} file reported {} encoding: {}", ext, text.trim(), filename);
            Some(text.trim().to_string())
        });

        match declared {
            Some(encoding) if !encoding.is_empty() && !encoding.eq_ignore_ascii_case("system") => encoding,
            _ => {
                tracing::debug!("Assuming {} attribute encoding: {}", DEFAULT_ENCODING, filename);
                DEFAULT_ENCODING.to_string()
            }
        }
    }

    /// SRID declared by a GeoJSON `crs` member or a `.prj` sidecar, using
    /// the lookup service for projections without an EPSG authority.
    pub async fn get_srid(&self, filename: &str) -> Result<Option<i32>> {
        let path = self.get_path(filename);

        if is_geojson(&path) {
            if let Ok(text) = std::fs::read_to_string(&path) {
                let declared = serde_json::from_str::<serde_json::Value>(&text)
                    .ok()
                    .and_then(|v| crs_srid(&v));
                if let Some(srid) = declared {
                    tracing::debug!("crs member declared SRID {}: {}", srid, filename);
                    return Ok(Some(srid));
                }
            }
        }

        let Ok(wkt) = std::fs::read_to_string(path.with_extension("prj")) else {
            tracing::warn!("⚠️ Unable to open projection information: {}", filename);
            return Ok(None);
        };
        let wkt = wkt.trim();

        if let Some(srid) = prj_authority_srid(wkt) {
            tracing::debug!(".prj declared SRID {}: {}", srid, filename);
            return Ok(Some(srid));
        }

        if let Some(lookup) = &self.lookup {
            if let Some(srid) = lookup.lookup(wkt).await? {
                tracing::debug!("prj2epsg returned SRID {}: {}", srid, filename);
                return Ok(Some(srid));
            }
        }

        tracing::warn!("⚠️ Unable to identify SRID: {}", filename);
        Ok(None)
    }

    fn read_text(&self, filename: &str) -> Result<String> {
        let path = self.get_path(filename);
        let bytes = std::fs::read(&path).map_err(|e| SpandexError::ConfigError {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        decode(bytes, &self.get_encoding(filename))
    }

    /// Load a delimited text file. Without `append` any existing table is
    /// replaced; with it, columns must match the existing table.
    pub fn load_delimited(
        &self,
        catalog: &mut Catalog,
        filename: &str,
        table: &str,
        delimiter: char,
        append: bool,
    ) -> Result<usize> {
        let text = self.read_text(filename)?;
        let delimiter = u8::try_from(delimiter).map_err(|_| SpandexError::InvalidConfigValueError {
            field: "delimiter".to_string(),
            value: delimiter.to_string(),
            reason: "delimiter must be a single-byte character".to_string(),
        })?;
        let frame = read_delimited(text.as_bytes(), delimiter)?;
        let rows = frame.len();
        tracing::info!("📥 Loading table {} from file {} ({} rows)", qualify(table), filename, rows);

        place(catalog, GeoTable::new(table, frame), true, append)?;
        Ok(rows)
    }

    /// Load a GeoJSON FeatureCollection of polygons. The SRID is taken from
    /// `srid`, then the file, then the loader default.
    pub async fn load_geojson(
        &self,
        catalog: &mut Catalog,
        filename: &str,
        table: &str,
        srid: Option<i32>,
        drop: bool,
        append: bool,
    ) -> Result<usize> {
        let srid = match srid {
            Some(srid) => srid,
            None => match self.get_srid(filename).await? {
                Some(srid) => srid,
                None => self.srid.unwrap_or(UNKNOWN_SRID),
            },
        };
        let encoding = self.get_encoding(filename);
        let layer = read_feature_collection(&self.read_text(filename)?)?;
        let rows = layer.frame.len();
        tracing::info!(
            "📥 Loading table {} (SRID: {}) from file {} (encoding: {})",
            qualify(table),
            srid,
            filename,
            encoding
        );

        let loaded = GeoTable::new(table, layer.frame)
            .with_geometry(GeometryColumn::new(DEFAULT_GEOMETRY, srid, layer.geometries))?;
        place(catalog, loaded, drop, append)?;
        Ok(rows)
    }

    /// Load one table according to its options, picking the reader from
    /// the file extension.
    pub async fn load_entry(&self, catalog: &mut Catalog, table: &str, opts: &LoadOptions) -> Result<usize> {
        let path = self.get_path(&opts.file);
        if is_geojson(&path) {
            self.load_geojson(
                catalog,
                &opts.file,
                table,
                opts.srid,
                opts.drop.unwrap_or(true),
                opts.append,
            )
            .await
        } else {
            let delimiter = opts.delimiter.unwrap_or_else(|| default_delimiter(&path));
            self.load_delimited(catalog, &opts.file, table, delimiter, opts.append)
        }
    }

    /// Load every table of a `table -> file or options` mapping.
    pub async fn load_map(&self, catalog: &mut Catalog, mapping: &BTreeMap<String, LoadEntry>) -> Result<usize> {
        let mut rows = 0;
        for (table, entry) in mapping {
            rows += self.load_entry(catalog, table, &entry.options()).await?;
        }
        Ok(rows)
    }

    /// Load `category/name/file` for every category and name, into tables
    /// named `category_name`.
    pub async fn load_multiple(
        &self,
        catalog: &mut Catalog,
        categories: &BTreeMap<String, BTreeMap<String, LoadEntry>>,
    ) -> Result<usize> {
        let mut rows = 0;
        for (category, entries) in categories {
            for (name, entry) in entries {
                tracing::info!("Loading {}.", name);
                let mut opts = entry.options();
                opts.file = Path::new(category)
                    .join(name)
                    .join(&opts.file)
                    .to_string_lossy()
                    .into_owned();
                rows += self
                    .load_entry(catalog, &format!("{}_{}", category, name), &opts)
                    .await?;
            }
        }
        Ok(rows)
    }

    /// Copy a catalog table under a new name in `schema`.
    pub fn duplicate(&self, catalog: &mut Catalog, table: &str, new_name: &str, schema: &str) -> Result<()> {
        catalog.duplicate(table, new_name, schema)?;
        Ok(())
    }
}

fn place(catalog: &mut Catalog, table: GeoTable, drop: bool, append: bool) -> Result<()> {
    let name = table.qualified_name();
    if append {
        let existing = catalog.get_mut(&name)?;
        let start = existing.frame.max_label().map(|m| m + 1).unwrap_or(0);
        let GeoTable { frame, geometries, .. } = table;
        let incoming = GeoTable {
            frame: frame.relabel_from(start),
            geometries,
            ..existing.clone()
        };
        return existing.append(incoming);
    }
    if catalog.contains(&name) && !drop {
        return Err(SpandexError::validation(format!(
            "table {} already exists; set drop or append",
            name
        )));
    }
    catalog.insert(table);
    Ok(())
}

/// Read a delimited file from any path, outside a data directory.
pub fn read_delimited_path(path: &Path, delimiter: u8) -> Result<Table> {
    let bytes = std::fs::read(path)?;
    let text = decode(bytes, DEFAULT_ENCODING)?;
    read_delimited(text.as_bytes(), delimiter)
}
