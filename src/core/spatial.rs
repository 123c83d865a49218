//! Spatial operations over catalog tables: tagging, overlap, trimming,
//! distances, geometry QA and reprojection.

use crate::domain::geometry::{split_qualified, Catalog, GeoTable, GeometryColumn};
use crate::domain::model::{Table, Value};
use crate::utils::error::{Result, SpandexError};
use geo::{
    Area, BooleanOps, Centroid, Contains, Coord, EuclideanDistance, HasDimensions, Intersects,
    Line, LineString, MapCoords, MultiPolygon, Point, Polygon,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const WGS84: i32 = 4326;
pub const WEB_MERCATOR: i32 = 3857;

const EARTH_RADIUS: f64 = 6_378_137.0;
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;
// Relative tolerance for area comparisons.
const AREA_EPSILON: f64 = 1e-9;

fn area_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= AREA_EPSILON * a.abs().max(b.abs()).max(1.0)
}

fn column_or_geom<'a>(table: &'a GeoTable, column: Option<&str>) -> Result<&'a GeometryColumn> {
    match column {
        Some(name) => table.geometry(name),
        None => table.geom(),
    }
}

fn same_srid(a: &GeometryColumn, b: &GeometryColumn) -> Result<()> {
    if a.srid != b.srid {
        return Err(SpandexError::spatial(format!(
            "SRIDs differ: {} is {}, {} is {}",
            a.name, a.srid, b.name, b.srid
        )));
    }
    Ok(())
}

/// True when every geometry column of every table shares one SRID.
pub fn srid_equality(tables: &[&GeoTable]) -> Result<bool> {
    let mut srids = tables.iter().flat_map(|t| t.srids());
    let first = srids
        .next()
        .ok_or_else(|| SpandexError::spatial("no geometry columns to compare"))?;
    Ok(srids.all(|s| s == first))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMethod {
    PointInPoly,
}

impl FromStr for TagMethod {
    type Err = SpandexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "point_in_poly" => Ok(TagMethod::PointInPoly),
            other => Err(SpandexError::validation(format!(
                "unknown tag method '{}' (expected point_in_poly)",
                other
            ))),
        }
    }
}

/// Copy `source_column` onto `target` rows whose centroid falls in a
/// source geometry. The first containing source row wins; unmatched rows
/// keep their current value.
pub fn tag(
    target: &mut GeoTable,
    target_column: &str,
    source: &GeoTable,
    source_column: &str,
    how: &str,
) -> Result<usize> {
    let TagMethod::PointInPoly = how.parse::<TagMethod>()?;
    let target_geom = target.geom()?;
    let source_geom = source.geom()?;
    same_srid(target_geom, source_geom)?;

    let source_values = source.frame.column(source_column)?;
    let centroids: Vec<Option<Point<f64>>> = target_geom
        .values
        .iter()
        .map(|g| g.as_ref().and_then(|g| g.centroid()))
        .collect();

    let matches: Vec<Option<usize>> = centroids
        .iter()
        .map(|c| {
            c.and_then(|point| {
                source_geom
                    .values
                    .iter()
                    .position(|g| g.as_ref().is_some_and(|g| g.contains(&point)))
            })
        })
        .collect();

    if !target.frame.has_column(target_column) {
        let nulls = vec![Value::Null; target.len()];
        target.frame.set_column(target_column, nulls)?;
    }
    let column = target.frame.column_mut(target_column)?;
    let mut tagged = 0;
    for (cell, hit) in column.iter_mut().zip(&matches) {
        if let Some(pos) = hit {
            *cell = source_values[*pos].clone();
            tagged += 1;
        }
    }
    tracing::debug!(
        "Tagged {}/{} rows of {} with {}",
        tagged,
        matches.len(),
        target.qualified_name(),
        source_column
    );
    Ok(tagged)
}

/// Copy `column` from `table` into `df`, aligned on row labels. Labels
/// missing from `table` become Null.
pub fn update_df(df: &mut Table, column: &str, table: &Table) -> Result<()> {
    let source = table.column(column)?;
    let positions = table.label_positions();
    let values = df
        .index()
        .iter()
        .map(|label| {
            positions
                .get(label)
                .map(|p| source[*p].clone())
                .unwrap_or(Value::Null)
        })
        .collect();
    df.set_column(column, values)
}

/// Add a `calc_area` column with each geometry's area in projection units.
pub fn calc_area(table: &mut GeoTable) -> Result<()> {
    let areas = table
        .geom()?
        .values
        .iter()
        .map(|g| g.as_ref().map(|g| Value::Float(g.unsigned_area())).unwrap_or(Value::Null))
        .collect();
    table.frame.set_column("calc_area", areas)
}

/// Fill `column` with the share of each row's area covered by `over`.
pub fn proportion_overlap(target: &mut GeoTable, over: &GeoTable, column: &str) -> Result<()> {
    let target_geom = target.geom()?;
    let over_geom = over.geom()?;
    same_srid(target_geom, over_geom)?;

    let shares: Vec<Value> = target_geom
        .values
        .iter()
        .map(|g| {
            let Some(g) = g else { return Value::Null };
            let area = g.unsigned_area();
            if area == 0.0 {
                return Value::Null;
            }
            let covered: Vec<f64> = over_geom
                .values
                .iter()
                .flatten()
                .filter(|o| g.intersects(*o))
                .map(|o| g.intersection(o).unsigned_area())
                .collect();
            if covered.is_empty() {
                return Value::Null;
            }
            Value::Float(covered.iter().sum::<f64>() / area)
        })
        .collect();

    calc_area(target)?;
    target.frame.set_column(column, shares)
}

/// Cut every intersecting trimmer geometry out of each target geometry.
pub fn trim(target: &mut GeoTable, target_geom: &str, trimmer: &GeoTable, trim_geom: &str) -> Result<usize> {
    let cutters = trimmer.geometry(trim_geom)?;
    same_srid(target.geometry(target_geom)?, cutters)?;

    let mut trimmed = 0;
    for value in target.geometry_mut(target_geom)?.values.iter_mut() {
        let Some(geom) = value.as_mut() else { continue };
        for cutter in cutters.values.iter().flatten() {
            if geom.intersects(cutter) {
                *geom = geom.difference(cutter);
                trimmed += 1;
            }
        }
    }
    Ok(trimmed)
}

fn distance(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    if a.intersects(b) {
        return 0.0;
    }
    a.0.iter()
        .flat_map(|pa| b.0.iter().map(move |pb| pa.euclidean_distance(pb)))
        .fold(f64::INFINITY, f64::min)
}

/// Add a `calc_dist` column with the minimum distance from each row to
/// `geoms`. Null when `geoms` is empty.
pub fn calc_dist(table: &mut GeoTable, geoms: &[MultiPolygon<f64>]) -> Result<()> {
    let distances = table
        .geom()?
        .values
        .iter()
        .map(|g| match g {
            Some(g) if !geoms.is_empty() => Value::Float(
                geoms.iter().map(|o| distance(g, o)).fold(f64::INFINITY, f64::min),
            ),
            _ => Value::Null,
        })
        .collect();
    table.frame.set_column("calc_dist", distances)
}

/// First validity problem found in a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    Empty,
    NonFinite,
    UnclosedRing,
    TooFewPoints,
    DegenerateRing,
    SelfIntersection,
    HoleOutsideShell,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InvalidReason::Empty => "empty geometry",
            InvalidReason::NonFinite => "non-finite coordinate",
            InvalidReason::UnclosedRing => "unclosed ring",
            InvalidReason::TooFewPoints => "too few points",
            InvalidReason::DegenerateRing => "degenerate ring",
            InvalidReason::SelfIntersection => "self-intersection",
            InvalidReason::HoleOutsideShell => "hole outside shell",
        };
        f.write_str(text)
    }
}

fn ring_problem(ring: &LineString<f64>) -> Option<InvalidReason> {
    if ring.coords().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Some(InvalidReason::NonFinite);
    }
    if !ring.is_closed() {
        return Some(InvalidReason::UnclosedRing);
    }
    // repeated points are tolerated
    let mut coords = ring.0.clone();
    coords.dedup();
    if coords.len() < 4 {
        return Some(InvalidReason::TooFewPoints);
    }
    let ring = LineString::new(coords);

    let segments: Vec<Line<f64>> = ring.lines().collect();
    let n = segments.len();
    for i in 0..n {
        for j in (i + 2)..n {
            // first and last segments share the closing point
            if i == 0 && j == n - 1 {
                continue;
            }
            if segments[i].intersects(&segments[j]) {
                return Some(InvalidReason::SelfIntersection);
            }
        }
    }

    if Polygon::new(ring, vec![]).unsigned_area() == 0.0 {
        return Some(InvalidReason::DegenerateRing);
    }
    None
}

/// Validity check for one geometry.
pub fn invalid_reason(geom: &MultiPolygon<f64>) -> Option<InvalidReason> {
    if geom.is_empty() {
        return Some(InvalidReason::Empty);
    }
    for polygon in &geom.0 {
        if let Some(reason) = ring_problem(polygon.exterior()) {
            return Some(reason);
        }
        for hole in polygon.interiors() {
            if let Some(reason) = ring_problem(hole) {
                return Some(reason);
            }
        }
        let shell = Polygon::new(polygon.exterior().clone(), vec![]);
        let outside = polygon
            .interiors()
            .iter()
            .any(|hole| hole.coords().any(|c| !shell.intersects(&Point::from(*c))));
        if outside {
            return Some(InvalidReason::HoleOutsideShell);
        }
    }
    None
}

/// Rows with an invalid geometry, with a `reason` column and, when given,
/// the `index` column of the source table.
pub fn geom_invalid(table: &GeoTable, index: Option<&str>) -> Result<Table> {
    let geom = table.geom()?;
    let mut labels = Vec::new();
    let mut keys = Vec::new();
    let mut reasons = Vec::new();
    for (pos, value) in geom.values.iter().enumerate() {
        let Some(reason) = value.as_ref().and_then(invalid_reason) else { continue };
        labels.push(table.frame.index()[pos]);
        if let Some(column) = index {
            keys.push(table.frame.column(column)?[pos].clone());
        }
        reasons.push(Value::Str(reason.to_string()));
    }

    let mut columns = Vec::new();
    if let Some(column) = index {
        columns.push((column.to_string(), keys));
    }
    columns.push(("reason".to_string(), reasons));
    Table::from_columns_with_index(labels, columns)
}

/// Rows whose geometry is equal to another row's geometry.
pub fn geom_duplicate(table: &GeoTable) -> Result<GeoTable> {
    let values = &table.geom()?.values;
    let mut duplicated = vec![false; values.len()];
    for i in 0..values.len() {
        let Some(a) = &values[i] else { continue };
        for j in (i + 1)..values.len() {
            let Some(b) = &values[j] else { continue };
            let scale = a.unsigned_area().max(b.unsigned_area()).max(1.0);
            if a.xor(b).unsigned_area() <= AREA_EPSILON * scale {
                duplicated[i] = true;
                duplicated[j] = true;
            }
        }
    }
    let positions: Vec<usize> = (0..values.len()).filter(|p| duplicated[*p]).collect();
    Ok(table.take(&positions))
}

/// How the first geometry of an overlapping pair relates to the second.
fn relation(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>, overlap: f64) -> &'static str {
    if area_close(overlap, a.unsigned_area()) {
        "within"
    } else if area_close(overlap, b.unsigned_area()) {
        "contains"
    } else {
        "overlaps"
    }
}

fn key_order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        _ => None,
    }
}

/// Pairs of rows whose interiors intersect, as a new table named `output`.
pub fn geom_overlapping(table: &GeoTable, key: &str, output: &str) -> Result<GeoTable> {
    let geom = table.geom()?;
    let keys = table.frame.column(key)?;

    let mut key_a = Vec::new();
    let mut key_b = Vec::new();
    let mut relations = Vec::new();
    let mut geoms_a = Vec::new();
    let mut geoms_b = Vec::new();
    let mut overlaps = Vec::new();

    for i in 0..geom.values.len() {
        let Some(a) = &geom.values[i] else { continue };
        for j in (i + 1)..geom.values.len() {
            let Some(b) = &geom.values[j] else { continue };
            // the smaller key always comes first; equal or null keys never pair
            let (lo, hi, first, second) = match key_order(&keys[i], &keys[j]) {
                Some(Ordering::Less) => (i, j, a, b),
                Some(Ordering::Greater) => (j, i, b, a),
                _ => continue,
            };
            if !a.intersects(b) {
                continue;
            }
            let shared = a.intersection(b);
            let area = shared.unsigned_area();
            if area <= AREA_EPSILON * a.unsigned_area().min(b.unsigned_area()) {
                // touching edges only
                continue;
            }
            key_a.push(keys[lo].clone());
            key_b.push(keys[hi].clone());
            relations.push(Value::from(relation(first, second, area)));
            geoms_a.push(Some(first.clone()));
            geoms_b.push(Some(second.clone()));
            overlaps.push(Some(shared));
        }
    }

    let ids = (1..=key_a.len() as i64).map(Value::Int).collect();
    let frame = Table::from_columns(vec![
        ("id".to_string(), ids),
        (format!("{}_a", key), key_a),
        (format!("{}_b", key), key_b),
        ("relation".to_string(), relations),
    ])?;
    tracing::debug!("{} overlapping pairs in {}", frame.len(), table.qualified_name());

    GeoTable::new(output, frame)
        .with_geometry(GeometryColumn::new("geom_a", geom.srid, geoms_a))?
        .with_geometry(GeometryColumn::new("geom_b", geom.srid, geoms_b))?
        .with_geometry(GeometryColumn::new("overlap", geom.srid, overlaps))
}

/// Rows with holes, plus an `unfilled` column holding the holes themselves.
pub fn geom_unfilled(table: &GeoTable, output: &str) -> Result<GeoTable> {
    let geom = table.geom()?;
    let positions: Vec<usize> = geom
        .values
        .iter()
        .enumerate()
        .filter(|(_, g)| {
            g.as_ref()
                .is_some_and(|g| g.0.iter().any(|p| !p.interiors().is_empty()))
        })
        .map(|(pos, _)| pos)
        .collect();

    let mut unfilled_rows = table.take(&positions);
    let (schema, name) = split_qualified(output);
    unfilled_rows.schema = schema;
    unfilled_rows.name = name;

    let unfilled = positions
        .iter()
        .map(|p| {
            geom.values[*p].as_ref().map(|g| {
                let filled = MultiPolygon::new(
                    g.0.iter()
                        .map(|poly| Polygon::new(poly.exterior().clone(), vec![]))
                        .collect(),
                );
                filled.difference(g)
            })
        })
        .collect();
    unfilled_rows.add_geometry(GeometryColumn::new("unfilled", geom.srid, unfilled))?;
    Ok(unfilled_rows)
}

fn clean_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = ring
        .coords()
        .copied()
        .filter(|c| c.x.is_finite() && c.y.is_finite())
        .collect();
    coords.dedup();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.len() < 3 {
        return None;
    }
    let mut cleaned = LineString::new(coords);
    cleaned.close();
    if Polygon::new(cleaned.clone(), vec![]).unsigned_area() == 0.0 {
        return None;
    }
    Some(cleaned)
}

/// Repair what can be repaired without changing the shape: close rings,
/// drop repeated points, non-finite coordinates and degenerate rings.
/// Returns None when nothing usable is left.
pub fn repair(geom: &MultiPolygon<f64>) -> Option<MultiPolygon<f64>> {
    let polygons: Vec<Polygon<f64>> = geom
        .0
        .iter()
        .filter_map(|p| {
            let exterior = clean_ring(p.exterior())?;
            let holes = p.interiors().iter().filter_map(clean_ring).collect();
            Some(Polygon::new(exterior, holes))
        })
        .collect();
    (!polygons.is_empty()).then(|| MultiPolygon::new(polygons))
}

/// Repair invalid geometries in place; returns the number of rows changed.
pub fn validate(table: &mut GeoTable, column: Option<&str>) -> Result<usize> {
    let name = column_or_geom(table, column)?.name.clone();
    let qualified = table.qualified_name();
    let geometry = table.geometry_mut(&name)?;

    let mut changed = 0;
    let mut still_invalid = 0;
    for value in geometry.values.iter_mut() {
        let Some(geom) = value.as_ref() else { continue };
        if invalid_reason(geom).is_none() {
            continue;
        }
        let fixed = repair(geom);
        if fixed.as_ref() != Some(geom) {
            changed += 1;
        }
        if fixed.as_ref().and_then(invalid_reason).is_some() {
            still_invalid += 1;
        }
        *value = fixed;
    }

    if still_invalid > 0 {
        tracing::warn!("⚠️ {} geometries in {}.{} remain invalid", still_invalid, qualified, name);
    }
    Ok(changed)
}

fn to_mercator(c: Coord<f64>) -> Coord<f64> {
    let lat = c.y.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    Coord {
        x: EARTH_RADIUS * c.x.to_radians(),
        y: EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln(),
    }
}

fn from_mercator(c: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (c.x / EARTH_RADIUS).to_degrees(),
        y: (2.0 * (c.y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees(),
    }
}

type CoordFn = fn(Coord<f64>) -> Coord<f64>;

fn identity(c: Coord<f64>) -> Coord<f64> {
    c
}

/// Coordinate transform between two SRIDs, when supported.
pub fn transform_fn(from: i32, to: i32) -> Result<CoordFn> {
    match (from, to) {
        (a, b) if a == b => Ok(identity as CoordFn),
        (WGS84, WEB_MERCATOR) => Ok(to_mercator as CoordFn),
        (WEB_MERCATOR, WGS84) => Ok(from_mercator as CoordFn),
        (from, to) => Err(SpandexError::ProjectionError { from, to }),
    }
}

/// Transform a geometry column to `srid`.
pub fn reproject(table: &mut GeoTable, column: Option<&str>, srid: i32) -> Result<()> {
    let name = column_or_geom(table, column)?.name.clone();
    let qualified = table.qualified_name();
    let geometry = table.geometry_mut(&name)?;
    if geometry.srid == srid {
        tracing::warn!("⚠️ {}.{} is already in SRID {}", qualified, name, srid);
        return Ok(());
    }

    let transform = transform_fn(geometry.srid, srid)?;
    for value in geometry.values.iter_mut().flatten() {
        *value = value.map_coords(transform);
    }
    tracing::info!("🔄 Reprojected {}.{} from {} to {}", qualified, name, geometry.srid, srid);
    geometry.srid = srid;
    Ok(())
}

/// Bring every geometry column (optionally of one schema) to `srid`,
/// repairing invalid geometries first when `fix` is set. Returns the number
/// of columns reprojected.
pub fn conform_srids(catalog: &mut Catalog, srid: i32, schema: Option<&str>, fix: bool) -> Result<usize> {
    let mut reprojected = 0;
    for table in catalog.iter_mut() {
        if schema.is_some_and(|s| s != table.schema) {
            continue;
        }
        let columns: Vec<(String, i32)> = table
            .geometries
            .iter()
            .map(|g| (g.name.clone(), g.srid))
            .collect();
        for (name, current) in columns {
            if fix {
                let invalid = table
                    .geometry(&name)?
                    .values
                    .iter()
                    .flatten()
                    .filter(|g| invalid_reason(g).is_some())
                    .count();
                if invalid > 0 {
                    tracing::warn!(
                        "⚠️ {} invalid geometries in {}.{}",
                        invalid,
                        table.qualified_name(),
                        name
                    );
                    validate(table, Some(&name))?;
                }
            }
            if current != srid {
                reproject(table, Some(&name), srid)?;
                reprojected += 1;
            }
        }
    }
    Ok(reprojected)
}

/// Count of geometries per invalidity reason, for run summaries.
pub fn invalid_summary(table: &GeoTable) -> Result<HashMap<String, usize>> {
    let mut summary = HashMap::new();
    for reason in table.geom()?.values.iter().flatten().filter_map(invalid_reason) {
        *summary.entry(reason.to_string()).or_insert(0) += 1;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, polygon};

    fn square(x: f64, y: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
        ]])
    }

    fn table(name: &str, srid: i32, geoms: Vec<MultiPolygon<f64>>) -> GeoTable {
        let ids = (1..=geoms.len() as i64).map(Value::Int).collect();
        let frame = Table::from_columns(vec![("id", ids)]).unwrap();
        GeoTable::new(name, frame)
            .with_geometry(GeometryColumn::new("geom", srid, geoms.into_iter().map(Some).collect()))
            .unwrap()
    }

    fn floats(values: &[Value]) -> Vec<Option<f64>> {
        values.iter().map(Value::as_f64).collect()
    }

    #[test]
    fn test_srid_equality() {
        let a = table("a", 3740, vec![square(0.0, 0.0, 1.0)]);
        let b = table("b", 3740, vec![square(0.0, 0.0, 1.0)]);
        let c = table("c", 4326, vec![square(0.0, 0.0, 1.0)]);
        assert!(srid_equality(&[&a, &b]).unwrap());
        assert!(!srid_equality(&[&a, &b, &c]).unwrap());

        let bare = GeoTable::new("bare", Table::default());
        assert!(srid_equality(&[&bare]).is_err());
    }

    #[test]
    fn test_tag_point_in_poly() {
        let mut parcels = table(
            "parcels",
            3740,
            vec![square(0.0, 0.0, 1.0), square(5.0, 5.0, 1.0), square(50.0, 50.0, 1.0)],
        );
        let mut zones = table("zones", 3740, vec![square(0.0, 0.0, 2.0), square(4.0, 4.0, 4.0)]);
        zones
            .frame
            .set_column("zone_id", vec!["z1".into(), "z2".into()])
            .unwrap();

        let tagged = tag(&mut parcels, "zone_id", &zones, "zone_id", "point_in_poly").unwrap();
        assert_eq!(tagged, 2);
        assert_eq!(
            parcels.frame.column("zone_id").unwrap(),
            &[Value::from("z1"), Value::from("z2"), Value::Null]
        );

        assert!(tag(&mut parcels, "zone_id", &zones, "zone_id", "nearest").is_err());
        let other = table("other", 4326, vec![square(0.0, 0.0, 2.0)]);
        assert!(tag(&mut parcels, "id", &other, "id", "point_in_poly").is_err());
    }

    #[test]
    fn test_update_df() {
        let mut df = Table::from_columns(vec![("a", vec![1.into(), 2.into(), 3.into()])]).unwrap();
        let source = Table::from_columns_with_index(vec![2, 0], vec![("b", vec!["x".into(), "y".into()])]).unwrap();
        update_df(&mut df, "b", &source).unwrap();
        assert_eq!(df.column("b").unwrap(), &[Value::from("y"), Value::Null, Value::from("x")]);
    }

    #[test]
    fn test_proportion_overlap() {
        let mut parcels = table(
            "parcels",
            3740,
            vec![square(0.0, 0.0, 2.0), square(10.0, 10.0, 1.0)],
        );
        let water = table("water", 3740, vec![square(1.0, 0.0, 5.0)]);
        proportion_overlap(&mut parcels, &water, "water_share").unwrap();

        let shares = floats(parcels.frame.column("water_share").unwrap());
        assert!((shares[0].unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(shares[1], None);
        assert_eq!(floats(parcels.frame.column("calc_area").unwrap()), vec![Some(4.0), Some(1.0)]);
    }

    #[test]
    fn test_trim() {
        let mut parcels = table("parcels", 3740, vec![square(0.0, 0.0, 2.0), square(10.0, 10.0, 1.0)]);
        let roads = table("roads", 3740, vec![square(1.0, 0.0, 5.0)]);
        let trimmed = trim(&mut parcels, "geom", &roads, "geom").unwrap();
        assert_eq!(trimmed, 1);

        let geoms = &parcels.geom().unwrap().values;
        assert!((geoms[0].as_ref().unwrap().unsigned_area() - 2.0).abs() < 1e-9);
        assert_eq!(geoms[1].as_ref().unwrap().unsigned_area(), 1.0);
    }

    #[test]
    fn test_calc_area_and_dist() {
        let mut parcels = table("parcels", 3740, vec![square(0.0, 0.0, 2.0), square(10.0, 0.0, 1.0)]);
        calc_area(&mut parcels).unwrap();
        assert_eq!(floats(parcels.frame.column("calc_area").unwrap()), vec![Some(4.0), Some(1.0)]);

        calc_dist(&mut parcels, &[square(1.0, 1.0, 1.0), square(5.0, 0.0, 1.0)]).unwrap();
        let dist = floats(parcels.frame.column("calc_dist").unwrap());
        assert_eq!(dist[0], Some(0.0));
        assert!((dist[1].unwrap() - 4.0).abs() < 1e-9);

        calc_dist(&mut parcels, &[]).unwrap();
        assert_eq!(floats(parcels.frame.column("calc_dist").unwrap()), vec![None, None]);
    }

    fn bowtie() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 2.0, y: 0.0),
            (x: 0.0, y: 2.0),
        ]])
    }

    fn with_repeated_point() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![Polygon::new(
            LineString::new(vec![
                coord! { x: 0.0, y: 0.0 },
                coord! { x: 1.0, y: 0.0 },
                coord! { x: 1.0, y: 0.0 },
                coord! { x: 1.0, y: 1.0 },
                coord! { x: 1.0, y: 1.0 },
                coord! { x: 0.0, y: 1.0 },
            ]),
            vec![],
        )])
    }

    fn sliver() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0)]])
    }

    #[test]
    fn test_invalid_reason() {
        assert_eq!(invalid_reason(&square(0.0, 0.0, 1.0)), None);
        assert_eq!(invalid_reason(&bowtie()), Some(InvalidReason::SelfIntersection));
        assert_eq!(invalid_reason(&sliver()), Some(InvalidReason::DegenerateRing));
        assert_eq!(invalid_reason(&MultiPolygon::new(vec![])), Some(InvalidReason::Empty));

        let hole_outside = MultiPolygon::new(vec![Polygon::new(
            square(0.0, 0.0, 1.0).0[0].exterior().clone(),
            vec![square(5.0, 5.0, 1.0).0[0].exterior().clone()],
        )]);
        assert_eq!(invalid_reason(&hole_outside), Some(InvalidReason::HoleOutsideShell));
    }

    #[test]
    fn test_geom_invalid() {
        let t = table("t", 3740, vec![square(0.0, 0.0, 1.0), bowtie(), sliver()]);
        let invalid = geom_invalid(&t, Some("id")).unwrap();
        assert_eq!(invalid.index(), &[1, 2]);
        assert_eq!(invalid.column("id").unwrap(), &[Value::Int(2), Value::Int(3)]);
        assert_eq!(
            invalid.column("reason").unwrap(),
            &[Value::from("self-intersection"), Value::from("degenerate ring")]
        );

        let summary = invalid_summary(&t).unwrap();
        assert_eq!(summary.get("self-intersection"), Some(&1));
    }

    #[test]
    fn test_validate_repairs() {
        let mut t = table("t", 3740, vec![square(0.0, 0.0, 1.0), with_repeated_point(), sliver()]);
        assert_eq!(invalid_reason(&with_repeated_point()), None);

        let changed = validate(&mut t, None).unwrap();
        assert_eq!(changed, 1);
        let geoms = &t.geom().unwrap().values;
        assert!(geoms[0].is_some());
        assert!(geoms[2].is_none());

        let fixed = repair(&with_repeated_point()).unwrap();
        assert_eq!(fixed.0[0].exterior().0.len(), 5);
    }

    #[test]
    fn test_geom_duplicate() {
        let t = table(
            "t",
            3740,
            vec![square(0.0, 0.0, 1.0), square(3.0, 3.0, 1.0), square(0.0, 0.0, 1.0)],
        );
        let dupes = geom_duplicate(&t).unwrap();
        assert_eq!(dupes.frame.index(), &[0, 2]);
    }

    #[test]
    fn test_geom_overlapping() {
        let t = table(
            "public.parcels",
            3740,
            vec![
                square(0.0, 0.0, 4.0),
                square(1.0, 1.0, 1.0),
                square(3.0, 3.0, 2.0),
                square(4.0, 0.0, 1.0),
            ],
        );
        let pairs = geom_overlapping(&t, "id", "qa.parcels_overlapping").unwrap();
        assert_eq!(pairs.qualified_name(), "qa.parcels_overlapping");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs.frame.column("id_a").unwrap(), &[Value::Int(1), Value::Int(1)]);
        assert_eq!(pairs.frame.column("id_b").unwrap(), &[Value::Int(2), Value::Int(3)]);
        assert_eq!(
            pairs.frame.column("relation").unwrap(),
            &[Value::from("contains"), Value::from("overlaps")]
        );
        let overlap = pairs.geometry("overlap").unwrap().values[1].as_ref().unwrap();
        assert!((overlap.unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_geom_overlapping_orders_pairs_by_key() {
        let mut t = table(
            "public.parcels",
            3740,
            vec![square(0.0, 0.0, 1.0), square(0.0, 0.0, 4.0), square(10.0, 10.0, 1.0)],
        );
        t.frame
            .set_column("parcel_id", vec![3.into(), 1.into(), 2.into()])
            .unwrap();

        let pairs = geom_overlapping(&t, "parcel_id", "qa.parcels_overlapping").unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs.frame.column("parcel_id_a").unwrap(), &[Value::Int(1)]);
        assert_eq!(pairs.frame.column("parcel_id_b").unwrap(), &[Value::Int(3)]);
        // row 1 is the larger square, so it contains row 0
        assert_eq!(pairs.frame.column("relation").unwrap(), &[Value::from("contains")]);
        let first = pairs.geometry("geom_a").unwrap().values[0].as_ref().unwrap();
        assert!((first.unsigned_area() - 16.0).abs() < 1e-9);

        t.frame
            .set_column("parcel_id", vec![5.into(), 5.into(), Value::Null])
            .unwrap();
        assert!(geom_overlapping(&t, "parcel_id", "qa.o").unwrap().is_empty());
    }

    #[test]
    fn test_geom_unfilled() {
        let donut = MultiPolygon::new(vec![Polygon::new(
            square(0.0, 0.0, 4.0).0[0].exterior().clone(),
            vec![square(1.0, 1.0, 1.0).0[0].exterior().clone()],
        )]);
        let t = table("t", 3740, vec![square(10.0, 10.0, 1.0), donut]);
        let unfilled = geom_unfilled(&t, "t_unfilled").unwrap();
        assert_eq!(unfilled.len(), 1);
        assert_eq!(unfilled.frame.index(), &[1]);
        let hole = unfilled.geometry("unfilled").unwrap().values[0].as_ref().unwrap();
        assert!((hole.unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reproject_round_trip() {
        let mut t = table("t", WGS84, vec![square(-122.3, 37.8, 0.1)]);
        reproject(&mut t, None, WEB_MERCATOR).unwrap();
        let geom = t.geom().unwrap();
        assert_eq!(geom.srid, WEB_MERCATOR);
        let first = geom.values[0].as_ref().unwrap().0[0].exterior().0[0];
        assert!((first.x - -13_614_373.7).abs() < 1.0);

        reproject(&mut t, None, WGS84).unwrap();
        let back = t.geom().unwrap().values[0].as_ref().unwrap().0[0].exterior().0[0];
        assert!((back.x - -122.3).abs() < 1e-9);
        assert!((back.y - 37.8).abs() < 1e-9);

        assert!(matches!(
            reproject(&mut t, None, 2227),
            Err(SpandexError::ProjectionError { from: 4326, to: 2227 })
        ));
    }

    #[test]
    fn test_conform_srids() {
        let mut catalog = Catalog::new();
        catalog.insert(table("staging.a", WGS84, vec![square(0.0, 0.0, 1.0)]));
        catalog.insert(table("staging.b", WEB_MERCATOR, vec![square(0.0, 0.0, 1.0)]));
        catalog.insert(table("public.c", WGS84, vec![square(0.0, 0.0, 1.0)]));

        let changed = conform_srids(&mut catalog, WEB_MERCATOR, Some("staging"), true).unwrap();
        assert_eq!(changed, 1);
        assert_eq!(catalog.get("staging.a").unwrap().srids(), vec![WEB_MERCATOR]);
        assert_eq!(catalog.get("public.c").unwrap().srids(), vec![WGS84]);
    }
}
