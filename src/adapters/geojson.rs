use crate::domain::geometry::GeoTable;
use crate::domain::model::{ColumnType, Table, Value};
use crate::utils::error::{Result, SpandexError};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::{json, Map};

/// Attributes, geometries and declared SRID of a FeatureCollection.
#[derive(Debug, Clone)]
pub struct FeatureLayer {
    pub frame: Table,
    pub geometries: Vec<Option<MultiPolygon<f64>>>,
    pub srid: Option<i32>,
}

/// SRID from a legacy `crs` member: `EPSG:3740`,
/// `urn:ogc:def:crs:EPSG::3740` or the CRS84 alias of 4326.
pub fn crs_srid(collection: &serde_json::Value) -> Option<i32> {
    let name = collection
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?;
    if name.ends_with("CRS84") {
        return Some(4326);
    }
    if !name.contains("EPSG") {
        return None;
    }
    name.rsplit(':').next()?.trim().parse().ok()
}

fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::Str(s.clone()),
        other => Value::Str(other.to_string()),
    }
}

fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) if f.is_finite() => json!(f),
        Value::Float(_) => serde_json::Value::Null,
        Value::Str(s) => json!(s),
    }
}

fn parse_ring(ring: &serde_json::Value) -> Result<LineString<f64>> {
    let points = ring
        .as_array()
        .ok_or_else(|| SpandexError::spatial("ring is not an array of positions"))?;
    let coords = points
        .iter()
        .map(|p| {
            let x = p.get(0).and_then(serde_json::Value::as_f64);
            let y = p.get(1).and_then(serde_json::Value::as_f64);
            match (x, y) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => Err(SpandexError::spatial(format!("invalid position {}", p))),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(LineString::new(coords))
}

fn parse_polygon(rings: &serde_json::Value) -> Result<Polygon<f64>> {
    let rings = rings
        .as_array()
        .ok_or_else(|| SpandexError::spatial("polygon is not an array of rings"))?;
    let mut parsed = rings.iter().map(parse_ring).collect::<Result<Vec<_>>>()?;
    if parsed.is_empty() {
        return Err(SpandexError::spatial("polygon without rings"));
    }
    let exterior = parsed.remove(0);
    Ok(Polygon::new(exterior, parsed))
}

/// Polygon and MultiPolygon geometries; anything else is rejected.
pub fn parse_geometry(geometry: &serde_json::Value) -> Result<Option<MultiPolygon<f64>>> {
    if geometry.is_null() {
        return Ok(None);
    }
    let coordinates = geometry
        .get("coordinates")
        .ok_or_else(|| SpandexError::spatial("geometry without coordinates"))?;
    match geometry.get("type").and_then(serde_json::Value::as_str) {
        Some("Polygon") => Ok(Some(MultiPolygon::new(vec![parse_polygon(coordinates)?]))),
        Some("MultiPolygon") => {
            let polygons = coordinates
                .as_array()
                .ok_or_else(|| SpandexError::spatial("MultiPolygon coordinates must be an array"))?
                .iter()
                .map(parse_polygon)
                .collect::<Result<Vec<_>>>()?;
            Ok(Some(MultiPolygon::new(polygons)))
        }
        other => Err(SpandexError::spatial(format!(
            "unsupported geometry type {:?}, only polygons can be loaded",
            other
        ))),
    }
}

/// Parse a GeoJSON FeatureCollection. Property columns appear in first-seen
/// order; features missing a property get Null.
pub fn read_feature_collection(text: &str) -> Result<FeatureLayer> {
    let collection: serde_json::Value = serde_json::from_str(text)?;
    let features = collection
        .get("features")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| SpandexError::spatial("not a FeatureCollection: missing features"))?;

    let mut names: Vec<String> = Vec::new();
    let mut columns: Vec<Vec<Value>> = Vec::new();
    let mut geometries = Vec::with_capacity(features.len());

    for (row, feature) in features.iter().enumerate() {
        geometries.push(parse_geometry(feature.get("geometry").unwrap_or(&serde_json::Value::Null))?);

        let Some(properties) = feature.get("properties").and_then(serde_json::Value::as_object) else {
            continue;
        };
        for (key, value) in properties {
            let pos = match names.iter().position(|n| n == key) {
                Some(pos) => pos,
                None => {
                    names.push(key.clone());
                    columns.push(vec![Value::Null; row]);
                    names.len() - 1
                }
            };
            columns[pos].resize(row, Value::Null);
            columns[pos].push(json_to_value(value));
        }
    }

    let rows = geometries.len();
    let columns = names
        .into_iter()
        .zip(columns)
        .map(|(name, mut values)| {
            values.resize(rows, Value::Null);
            let ty = ColumnType::infer(&values);
            let values = match ty {
                ColumnType::Float | ColumnType::Str => values
                    .iter()
                    .map(|v| ty.cast(v))
                    .collect::<Result<Vec<_>>>()?,
                _ => values,
            };
            Ok((name, values))
        })
        .collect::<Result<Vec<_>>>()?;

    let frame = Table::from_columns_with_index((0..rows as i64).collect(), columns)?;

    Ok(FeatureLayer {
        frame,
        geometries,
        srid: crs_srid(&collection),
    })
}

fn ring_json(ring: &LineString<f64>) -> serde_json::Value {
    ring.coords().map(|c| json!([c.x, c.y])).collect()
}

fn geometry_json(geom: &MultiPolygon<f64>) -> serde_json::Value {
    let polygons: Vec<serde_json::Value> = geom
        .0
        .iter()
        .map(|p| {
            std::iter::once(p.exterior())
                .chain(p.interiors())
                .map(ring_json)
                .collect()
        })
        .collect();
    json!({ "type": "MultiPolygon", "coordinates": polygons })
}

/// Serialize a catalog table as a FeatureCollection using its main
/// geometry column; other geometry columns are left out.
pub fn write_feature_collection(table: &GeoTable) -> Result<String> {
    let geom = table.geom()?;
    let features: Vec<serde_json::Value> = (0..table.len())
        .map(|pos| {
            let properties: Map<String, serde_json::Value> = table
                .frame
                .column_names()
                .iter()
                .cloned()
                .zip(table.frame.row(pos).into_iter().map(value_to_json))
                .collect();
            json!({
                "type": "Feature",
                "id": table.frame.index()[pos],
                "properties": properties,
                "geometry": geom.values[pos].as_ref().map(geometry_json),
            })
        })
        .collect();

    let collection = json!({
        "type": "FeatureCollection",
        "name": table.qualified_name(),
        "crs": {
            "type": "name",
            "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", geom.srid) },
        },
        "features": features,
    });
    Ok(serde_json::to_string_pretty(&collection)?)
}
