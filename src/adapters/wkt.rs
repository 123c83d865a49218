use geo::{LineString, MultiPolygon, Polygon};
use std::fmt::Write;

fn ring(out: &mut String, ring: &LineString<f64>) {
    out.push('(');
    for (i, c) in ring.coords().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{} {}", c.x, c.y);
    }
    out.push(')');
}

fn polygon(out: &mut String, polygon: &Polygon<f64>) {
    out.push('(');
    ring(out, polygon.exterior());
    for hole in polygon.interiors() {
        out.push_str(", ");
        ring(out, hole);
    }
    out.push(')');
}

/// Well-known text for a multipolygon, e.g. `MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)))`.
pub fn to_wkt(geom: &MultiPolygon<f64>) -> String {
    if geom.0.is_empty() {
        return "MULTIPOLYGON EMPTY".to_string();
    }
    let mut out = String::from("MULTIPOLYGON (");
    for (i, p) in geom.0.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        polygon(&mut out, p);
    }
    out.push(')');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn test_to_wkt() {
        let geom = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.5, y: 0.0),
            (x: 1.5, y: 1.0),
        ]]);
        assert_eq!(to_wkt(&geom), "MULTIPOLYGON (((0 0, 1.5 0, 1.5 1, 0 0)))");
        assert_eq!(to_wkt(&MultiPolygon::new(vec![])), "MULTIPOLYGON EMPTY");
    }
}
