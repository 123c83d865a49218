use crate::domain::model::Table;
use crate::utils::error::{Result, SpandexError};
use geo::MultiPolygon;
use std::collections::BTreeMap;

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_GEOMETRY: &str = "geom";

/// A named geometry column with its spatial reference.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryColumn {
    pub name: String,
    pub srid: i32,
    pub values: Vec<Option<MultiPolygon<f64>>>,
}

impl GeometryColumn {
    pub fn new(name: impl Into<String>, srid: i32, values: Vec<Option<MultiPolygon<f64>>>) -> Self {
        Self {
            name: name.into(),
            srid,
            values,
        }
    }
}

/// Attribute table plus geometry columns, row-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTable {
    pub schema: String,
    pub name: String,
    pub frame: Table,
    pub geometries: Vec<GeometryColumn>,
}

impl GeoTable {
    pub fn new(qualified_name: &str, frame: Table) -> Self {
        let (schema, name) = split_qualified(qualified_name);
        Self {
            schema,
            name,
            frame,
            geometries: Vec::new(),
        }
    }

    pub fn with_geometry(mut self, column: GeometryColumn) -> Result<Self> {
        self.add_geometry(column)?;
        Ok(self)
    }

    pub fn add_geometry(&mut self, column: GeometryColumn) -> Result<()> {
        if column.values.len() != self.frame.len() {
            return Err(SpandexError::validation(format!(
                "geometry column '{}' has {} values but table {} has {} rows",
                column.name,
                column.values.len(),
                self.qualified_name(),
                self.frame.len()
            )));
        }
        match self.geometries.iter_mut().find(|g| g.name == column.name) {
            Some(existing) => *existing = column,
            None => self.geometries.push(column),
        }
        Ok(())
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    pub fn has_geometry(&self, name: &str) -> bool {
        self.geometries.iter().any(|g| g.name == name)
    }

    pub fn geometry(&self, name: &str) -> Result<&GeometryColumn> {
        self.geometries
            .iter()
            .find(|g| g.name == name)
            .ok_or_else(|| SpandexError::column_not_found(format!("{}.{}", self.qualified_name(), name)))
    }

    pub fn geometry_mut(&mut self, name: &str) -> Result<&mut GeometryColumn> {
        let qualified = self.qualified_name();
        self.geometries
            .iter_mut()
            .find(|g| g.name == name)
            .ok_or_else(|| SpandexError::column_not_found(format!("{}.{}", qualified, name)))
    }

    /// The `geom` column, or the first geometry column when there is none
    /// with that name.
    pub fn geom(&self) -> Result<&GeometryColumn> {
        self.geometry(DEFAULT_GEOMETRY)
            .or_else(|_| self.geometries.first().ok_or_else(|| {
                SpandexError::spatial(format!("table {} has no geometry column", self.qualified_name()))
            }))
    }

    pub fn geom_name(&self) -> Result<String> {
        Ok(self.geom()?.name.clone())
    }

    pub fn srids(&self) -> Vec<i32> {
        self.geometries.iter().map(|g| g.srid).collect()
    }

    /// Rows at the given positions, geometries included.
    pub fn take(&self, positions: &[usize]) -> GeoTable {
        GeoTable {
            schema: self.schema.clone(),
            name: self.name.clone(),
            frame: self.frame.take(positions),
            geometries: self
                .geometries
                .iter()
                .map(|g| GeometryColumn {
                    name: g.name.clone(),
                    srid: g.srid,
                    values: positions.iter().map(|p| g.values[*p].clone()).collect(),
                })
                .collect(),
        }
    }

    /// Append rows from another table with identical attribute and
    /// geometry columns.
    pub fn append(&mut self, other: GeoTable) -> Result<()> {
        for geometry in &other.geometries {
            let mine = self.geometry(&geometry.name)?;
            if mine.srid != geometry.srid {
                return Err(SpandexError::spatial(format!(
                    "cannot append SRID {} rows to {}.{} (SRID {})",
                    geometry.srid,
                    self.qualified_name(),
                    geometry.name,
                    mine.srid
                )));
            }
        }
        if other.geometries.len() != self.geometries.len() {
            return Err(SpandexError::validation(format!(
                "geometry columns differ when appending to {}",
                self.qualified_name()
            )));
        }
        self.frame.append(other.frame)?;
        for geometry in other.geometries {
            self.geometry_mut(&geometry.name)?.values.extend(geometry.values);
        }
        Ok(())
    }
}

/// Split `schema.table`; unqualified names live in `public`.
pub fn split_qualified(name: &str) -> (String, String) {
    match name.split_once('.') {
        Some((schema, table)) => (schema.to_string(), table.to_string()),
        None => (DEFAULT_SCHEMA.to_string(), name.to_string()),
    }
}

pub fn qualify(name: &str) -> String {
    let (schema, table) = split_qualified(name);
    format!("{}.{}", schema, table)
}

/// All loaded tables, addressed by schema-qualified name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<String, GeoTable>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: GeoTable) -> Option<GeoTable> {
        self.tables.insert(table.qualified_name(), table)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(&qualify(name))
    }

    pub fn get(&self, name: &str) -> Result<&GeoTable> {
        let key = qualify(name);
        self.tables
            .get(&key)
            .ok_or(SpandexError::TableNotFound { table: key })
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut GeoTable> {
        let key = qualify(name);
        self.tables
            .get_mut(&key)
            .ok_or(SpandexError::TableNotFound { table: key })
    }

    pub fn remove(&mut self, name: &str) -> Result<GeoTable> {
        let key = qualify(name);
        self.tables
            .remove(&key)
            .ok_or(SpandexError::TableNotFound { table: key })
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn schemas(&self) -> Vec<String> {
        let mut schemas: Vec<String> = self.tables.values().map(|t| t.schema.clone()).collect();
        schemas.dedup();
        schemas
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeoTable> {
        self.tables.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut GeoTable> {
        self.tables.values_mut()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Copy a table under a new name, replacing any table already there.
    pub fn duplicate(&mut self, name: &str, new_name: &str, schema: &str) -> Result<&GeoTable> {
        let mut copy = self.get(name)?.clone();
        copy.schema = schema.to_string();
        copy.name = new_name.to_string();
        let key = copy.qualified_name();
        tracing::debug!("Duplicating {} as {}", qualify(name), key);
        self.tables.insert(key.clone(), copy);
        self.get(&key)
    }
}
