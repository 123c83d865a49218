use crate::adapters::srid::DEFAULT_PRJ2EPSG_ENDPOINT;
use crate::adapters::LoadEntry;
use crate::core::columns::Agg;
use crate::domain::model::Value;
use crate::utils::error::{Result, SpandexError};
use crate::utils::validation::{
    validate_file_extensions, validate_non_empty_string, validate_path, validate_range, validate_srid, validate_url,
    Validate,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable naming an extra configuration file.
pub const CONFIG_ENV_VAR: &str = "SPANDEX_CFG";
pub const DEFAULT_EXPORT_FILENAME: &str = "spandex-export.zip";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project: ProjectInfo,
    pub data: DataConfig,
    pub lookup: Option<LookupConfig>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub description: Option<String>,
    /// Seed for synthesis sampling; runs with the same seed are repeatable.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub directory: String,
    pub srid: Option<i32>,
    /// `table -> file` or `table -> { file, srid, delimiter, drop, append }`.
    #[serde(default)]
    pub tables: BTreeMap<String, LoadEntry>,
    /// `category -> name -> file`, loaded from `category/name/file`.
    #[serde(default)]
    pub categories: BTreeMap<String, BTreeMap<String, LoadEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    pub enabled: Option<bool>,
    pub endpoint: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub path: String,
    pub filename: Option<String>,
    /// Tables in the bundle; empty means all.
    #[serde(default)]
    pub tables: Vec<String>,
    /// Tables also written as standalone GeoJSON files.
    #[serde(default)]
    pub geojson: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_tag_method() -> String {
    "point_in_poly".to_string()
}

fn default_qa_schema() -> String {
    "qa".to_string()
}

/// One transform step, selected by its `op` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StepConfig {
    ConformSrids {
        srid: i32,
        schema: Option<String>,
        #[serde(default = "default_true")]
        fix: bool,
    },
    Tag {
        target: String,
        target_column: String,
        source: String,
        source_column: String,
        #[serde(default = "default_tag_method")]
        how: String,
    },
    ProportionOverlap {
        target: String,
        over: String,
        column: String,
    },
    CalcArea {
        table: String,
    },
    CalcDist {
        table: String,
        to: String,
    },
    Trim {
        target: String,
        trimmer: String,
        target_geom: Option<String>,
        trim_geom: Option<String>,
    },
    ValidateGeometry {
        table: String,
        column: Option<String>,
    },
    GeometryQa {
        table: String,
        key: String,
        #[serde(default = "default_qa_schema")]
        schema: String,
    },
    ScaleToTargets {
        table: String,
        targets: String,
    },
    Synthesize {
        table: String,
        geo_table: String,
        targets: String,
        output: Option<String>,
    },
    DeriveColumn {
        table: String,
        column: String,
        expr: String,
        fillna: Option<Value>,
        astype: Option<String>,
        groupby: Option<String>,
        agg: Option<Agg>,
        into: Option<String>,
        key: Option<String>,
    },
    Duplicate {
        table: String,
        new_name: String,
        schema: String,
    },
}

impl StepConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StepConfig::ConformSrids { .. } => "conform_srids",
            StepConfig::Tag { .. } => "tag",
            StepConfig::ProportionOverlap { .. } => "proportion_overlap",
            StepConfig::CalcArea { .. } => "calc_area",
            StepConfig::CalcDist { .. } => "calc_dist",
            StepConfig::Trim { .. } => "trim",
            StepConfig::ValidateGeometry { .. } => "validate_geometry",
            StepConfig::GeometryQa { .. } => "geometry_qa",
            StepConfig::ScaleToTargets { .. } => "scale_to_targets",
            StepConfig::Synthesize { .. } => "synthesize",
            StepConfig::DeriveColumn { .. } => "derive_column",
            StepConfig::Duplicate { .. } => "duplicate",
        }
    }

    fn validate_step(&self, field: &str) -> Result<()> {
        match self {
            StepConfig::ConformSrids { srid, .. } => validate_srid(&format!("{}.srid", field), *srid),
            StepConfig::DeriveColumn {
                agg, groupby, into, ..
            } => {
                if agg.is_some() && groupby.is_none() {
                    return Err(SpandexError::MissingConfigError {
                        field: format!("{}.groupby", field),
                    });
                }
                if agg.is_some() && into.is_none() {
                    return Err(SpandexError::MissingConfigError {
                        field: format!("{}.into", field),
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl ProjectConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(SpandexError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = substitute_env_vars(content)?;
        toml::from_str(&processed_content).map_err(toml_error)
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("project.name", &self.project.name)?;
        validate_path("data.directory", &self.data.directory)?;
        if let Some(srid) = self.data.srid {
            validate_srid("data.srid", srid)?;
        }

        if let Some(lookup) = self.lookup.as_ref().filter(|l| l.enabled.unwrap_or(true)) {
            validate_url("lookup.endpoint", lookup.endpoint())?;
            if let Some(timeout) = lookup.timeout_seconds {
                validate_range("lookup.timeout_seconds", timeout, 1, 300)?;
            }
        }

        for (i, step) in self.steps.iter().enumerate() {
            step.validate_step(&format!("steps[{}]", i))?;
        }

        validate_path("export.path", &self.export.path)?;
        validate_file_extensions("export.filename", &[self.export_filename().to_string()], &["zip"])?;
        Ok(())
    }

    pub fn export_filename(&self) -> &str {
        self.export.filename.as_deref().unwrap_or(DEFAULT_EXPORT_FILENAME)
    }

    /// 是否啟用 prj2epsg 查詢
    pub fn lookup_enabled(&self) -> bool {
        self.lookup.as_ref().is_some_and(|l| l.enabled.unwrap_or(true))
    }
}

impl LookupConfig {
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_PRJ2EPSG_ENDPOINT)
    }
}

impl Validate for ProjectConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

fn toml_error(e: toml::de::Error) -> SpandexError {
    SpandexError::ConfigValidationError {
        field: "toml_parsing".to_string(),
        message: format!("TOML parsing error: {}", e),
    }
}

/// 替換環境變數 (例如 ${DATA_DIR})
fn substitute_env_vars(content: &str) -> Result<String> {
    use regex::Regex;
    let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| SpandexError::config(e.to_string()))?;

    let result = re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    });

    Ok(result.to_string())
}

/// Merge `overlay` into `base`; nested tables merge key by key.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(inner) if matches!(base.get(&key), Some(toml::Value::Table(_))) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, inner);
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

/// Configuration files in precedence order: `~/.spandex/user.toml`, the
/// file named by `SPANDEX_CFG`, then `explicit`.
pub fn config_layers(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut layers = Vec::new();
    if let Some(home) = std::env::var_os("HOME") {
        layers.push(Path::new(&home).join(".spandex").join("user.toml"));
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        layers.push(PathBuf::from(path));
    }
    if let Some(path) = explicit {
        layers.push(path.to_path_buf());
    }
    layers
}

/// Load and merge configuration files; later files override earlier ones.
/// Files that cannot be read are skipped.
pub fn load_config_from(paths: &[PathBuf]) -> Result<ProjectConfig> {
    let mut merged = toml::Table::new();
    let mut loaded = 0;
    for path in paths {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!("Skipping config {}: {}", path.display(), e);
                continue;
            }
        };
        let table: toml::Table = toml::from_str(&substitute_env_vars(&content)?).map_err(toml_error)?;
        tracing::debug!("📁 Loaded config layer {}", path.display());
        merge_tables(&mut merged, table);
        loaded += 1;
    }

    if loaded == 0 {
        return Err(SpandexError::config(format!(
            "no readable configuration among {}",
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    toml::Value::Table(merged).try_into().map_err(toml_error)
}

/// 依序載入使用者、環境變數與指定的配置檔
pub fn load_config(explicit: Option<&Path>) -> Result<ProjectConfig> {
    load_config_from(&config_layers(explicit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASIC: &str = r#"
[project]
name = "bay-area"
seed = 7

[data]
directory = "./data"
srid = 2227

[data.tables]
parcels = "parcels.geojson"
zones = { file = "zones.geojson", srid = 4326 }
households = { file = "households.tsv", delimiter = "\t" }

[[steps]]
op = "conform_srids"
srid = 2227

[[steps]]
op = "tag"
target = "parcels"
target_column = "zone_id"
source = "zones"
source_column = "zone_id"

[[steps]]
op = "derive_column"
table = "households"
column = "persons_per_zone"
expr = "persons"
fillna = 0
groupby = "zone_id"
agg = "sum"
into = "zones"

[export]
path = "./out"
"#;

    #[test]
    fn test_parse_project_config() {
        let config = ProjectConfig::from_toml_str(BASIC).unwrap();

        assert_eq!(config.project.name, "bay-area");
        assert_eq!(config.project.seed, Some(7));
        assert_eq!(config.data.tables.len(), 3);
        assert_eq!(config.data.tables["parcels"], LoadEntry::File("parcels.geojson".into()));
        assert_eq!(config.data.tables["households"].options().delimiter, Some('\t'));
        assert_eq!(config.steps.len(), 3);
        assert_eq!(config.steps[1].name(), "tag");
        match &config.steps[0] {
            StepConfig::ConformSrids { srid, fix, schema } => {
                assert_eq!(*srid, 2227);
                assert!(*fix);
                assert!(schema.is_none());
            }
            other => panic!("unexpected step {:?}", other),
        }
        match &config.steps[1] {
            StepConfig::Tag { how, .. } => assert_eq!(how, "point_in_poly"),
            other => panic!("unexpected step {:?}", other),
        }
        match &config.steps[2] {
            StepConfig::DeriveColumn { fillna, agg, .. } => {
                assert_eq!(fillna, &Some(Value::Int(0)));
                assert_eq!(*agg, Some(Agg::Sum));
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert_eq!(config.export_filename(), DEFAULT_EXPORT_FILENAME);
        assert!(!config.lookup_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SPANDEX_TEST_DATA_DIR", "/srv/urbansim");

        let config = ProjectConfig::from_toml_str(
            r#"
[project]
name = "env"

[data]
directory = "${SPANDEX_TEST_DATA_DIR}"

[export]
path = "./out"
"#,
        )
        .unwrap();
        assert_eq!(config.data.directory, "/srv/urbansim");

        std::env::remove_var("SPANDEX_TEST_DATA_DIR");
    }

    #[test]
    fn test_config_validation() {
        let bad_lookup = BASIC.replace("[export]", "[lookup]\nendpoint = \"invalid-url\"\n\n[export]");
        let config = ProjectConfig::from_toml_str(&bad_lookup).unwrap();
        assert!(config.lookup_enabled());
        assert!(config.validate().is_err());

        let bad_srid = BASIC.replace("srid = 2227\n\n[data.tables]", "srid = 0\n\n[data.tables]");
        assert!(ProjectConfig::from_toml_str(&bad_srid).unwrap().validate().is_err());

        let bad_filename = BASIC.replace("path = \"./out\"", "path = \"./out\"\nfilename = \"out.h5\"");
        assert!(ProjectConfig::from_toml_str(&bad_filename).unwrap().validate().is_err());

        let err = ProjectConfig::from_toml_str("[project\nname=").unwrap_err();
        assert!(matches!(err, SpandexError::ConfigValidationError { ref field, .. } if field == "toml_parsing"));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(BASIC.as_bytes()).unwrap();

        let config = ProjectConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.project.name, "bay-area");
    }

    #[test]
    fn test_layered_config_overrides_key_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        let project = dir.path().join("project.toml");
        std::fs::write(
            &user,
            "[data]\ndirectory = \"/shared/data\"\nsrid = 2227\n\n[lookup]\nenabled = false\n",
        )
        .unwrap();
        std::fs::write(
            &project,
            "[project]\nname = \"layered\"\n\n[data]\nsrid = 3740\n\n[export]\npath = \"./out\"\n",
        )
        .unwrap();

        let missing = dir.path().join("missing.toml");
        let config = load_config_from(&[user, missing, project]).unwrap();
        assert_eq!(config.data.directory, "/shared/data");
        assert_eq!(config.data.srid, Some(3740));
        assert!(!config.lookup_enabled());

        assert!(load_config_from(&[dir.path().join("nope.toml")]).is_err());
    }
}
