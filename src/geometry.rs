// Geometry extractor: KML placemarks -> closed rings keyed by raw parcel id

use crate::error::Result;
use crate::parser::{self, SourceParser, SourceType};
use roxmltree::Node;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;
use tracing::warn;

/// Name of the `SimpleData` field holding the parcel number.
pub const PARCEL_ID_FIELD: &str = "PARCELNO";

/// WGS84
pub const SRID_WGS84: i64 = 4326;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub lon: f64,
    pub lat: f64,
}

impl Vertex {
    pub fn new(lon: f64, lat: f64) -> Self {
        Vertex { lon, lat }
    }

    fn key(&self) -> (u64, u64) {
        (self.lon.to_bits(), self.lat.to_bits())
    }
}

/// A closed polygon boundary in lon/lat order.
///
/// Invariant: first == last, at least 4 vertices, at least 3 of them distinct.
/// The only way to build one is [`Ring::close`], which enforces this.
#[derive(Debug, Clone, PartialEq)]
pub struct Ring(Vec<Vertex>);

impl Ring {
    /// Close an (optionally already closed) vertex sequence.
    ///
    /// Returns `None` when fewer than 3 distinct vertices remain.
    pub fn close(mut vertices: Vec<Vertex>) -> Option<Ring> {
        let distinct: HashSet<(u64, u64)> = vertices.iter().map(Vertex::key).collect();
        if distinct.len() < 3 {
            return None;
        }

        let first = vertices[0];
        if vertices.last() != Some(&first) {
            vertices.push(first);
        }

        Some(Ring(vertices))
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn bbox(&self) -> BoundingBox {
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            min_lat: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for v in &self.0 {
            bbox.min_lon = bbox.min_lon.min(v.lon);
            bbox.min_lat = bbox.min_lat.min(v.lat);
            bbox.max_lon = bbox.max_lon.max(v.lon);
            bbox.max_lat = bbox.max_lat.max(v.lat);
        }
        bbox
    }

    /// `POLYGON((lon lat, lon lat, ...))`
    pub fn to_wkt(&self) -> String {
        let mut wkt = String::from("POLYGON((");
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                wkt.push_str(", ");
            }
            let _ = write!(wkt, "{} {}", v.lon, v.lat);
        }
        wkt.push_str("))");
        wkt
    }

    /// Parse the single-ring `POLYGON` text produced by [`Ring::to_wkt`].
    pub fn from_wkt(wkt: &str) -> Option<Ring> {
        let trimmed = wkt.trim();
        if !trimmed.get(..7)?.eq_ignore_ascii_case("POLYGON") {
            return None;
        }

        let body = trimmed[7..].trim();
        let body = body.strip_prefix('(')?.strip_suffix(')')?.trim();
        let body = body.strip_prefix('(')?.strip_suffix(')')?;

        let mut vertices = Vec::new();
        for pair in body.split(',') {
            let mut parts = pair.split_whitespace();
            let lon = parts.next()?.parse::<f64>().ok()?;
            let lat = parts.next()?.parse::<f64>().ok()?;
            vertices.push(Vertex::new(lon, lat));
        }

        Ring::close(vertices)
    }

    /// GeoJSON `Polygon` geometry object.
    pub fn to_geojson(&self) -> serde_json::Value {
        let coords: Vec<[f64; 2]> = self.0.iter().map(|v| [v.lon, v.lat]).collect();
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [coords],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        BoundingBox {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }
}

/// Parse a KML coordinate string (`lon,lat[,alt] lon,lat[,alt] ...`).
///
/// Tokens with fewer than two components, or with a lon/lat that is not a
/// finite number (`NaN`, `inf`), are dropped; the altitude is ignored.
pub fn parse_coordinates(text: &str) -> Vec<Vertex> {
    text.split_whitespace()
        .filter_map(|token| {
            let mut parts = token.split(',');
            let lon = parse_ordinate(parts.next()?)?;
            let lat = parse_ordinate(parts.next()?)?;
            Some(Vertex::new(lon, lat))
        })
        .collect()
}

fn parse_ordinate(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Output of one geometry document.
#[derive(Debug, Default, Clone)]
pub struct GeometrySet {
    /// Raw identifier token -> closed ring
    pub rings: HashMap<String, Ring>,
    /// Identifiers seen more than once (the later ring was kept)
    pub duplicate_ids: Vec<String>,
    /// Placemarks without an identifier, without coordinates, or with a degenerate ring
    pub skipped_placemarks: usize,
}

impl GeometrySet {
    pub fn get(&self, key: &str) -> Option<&Ring> {
        self.rings.get(key)
    }

    pub fn len(&self) -> usize {
        self.rings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rings.is_empty()
    }

    /// Last write wins; a repeated identifier is recorded, not rejected.
    pub fn insert(&mut self, id: String, ring: Ring) {
        if self.rings.insert(id.clone(), ring).is_some() {
            self.duplicate_ids.push(id);
        }
    }
}

impl FromIterator<(String, Ring)> for GeometrySet {
    fn from_iter<I: IntoIterator<Item = (String, Ring)>>(iter: I) -> Self {
        let mut set = GeometrySet::default();
        for (id, ring) in iter {
            set.insert(id, ring);
        }
        set
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GeometryExtractor;

impl GeometryExtractor {
    pub fn new() -> Self {
        GeometryExtractor
    }

    fn placemark_id(&self, placemark: Node) -> Option<String> {
        placemark
            .descendants()
            .filter(|n| parser::is_element(*n, "SimpleData"))
            .find(|n| n.attribute("name") == Some(PARCEL_ID_FIELD))
            .and_then(parser::element_text)
    }

    fn placemark_ring(&self, placemark: Node) -> Option<Ring> {
        let coordinates = parser::descendant(placemark, "coordinates")?;
        let text = parser::element_text(coordinates)?;
        Ring::close(parse_coordinates(&text))
    }
}

impl SourceParser for GeometryExtractor {
    type Output = GeometrySet;

    fn parse_str(&self, text: &str, origin: &Path) -> Result<GeometrySet> {
        let doc = parser::parse_document(text, origin)?;
        let mut set = GeometrySet::default();

        for placemark in doc
            .descendants()
            .filter(|n| parser::is_element(*n, "Placemark"))
        {
            let ring = self
                .placemark_id(placemark)
                .and_then(|id| self.placemark_ring(placemark).map(|ring| (id, ring)));

            match ring {
                Some((id, ring)) => set.insert(id, ring),
                None => set.skipped_placemarks += 1,
            }
        }

        if !set.duplicate_ids.is_empty() {
            warn!(
                file = %origin.display(),
                duplicates = set.duplicate_ids.len(),
                "Duplicate parcel identifiers in geometry file; later placemark kept"
            );
        }

        Ok(set)
    }

    fn source_type(&self) -> SourceType {
        SourceType::Geometry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImportError;

    fn extract(kml: &str) -> Result<GeometrySet> {
        GeometryExtractor::new().parse_str(kml, Path::new("test.kml"))
    }

    fn placemark(id: &str, coords: &str) -> String {
        format!(
            r#"<Placemark>
                 <ExtendedData><SchemaData>
                   <SimpleData name="SECTION">0001</SimpleData>
                   <SimpleData name="PARCELNO">{}</SimpleData>
                 </SchemaData></ExtendedData>
                 <Polygon><outerBoundaryIs><LinearRing>
                   <coordinates>{}</coordinates>
                 </LinearRing></outerBoundaryIs></Polygon>
               </Placemark>"#,
            id, coords
        )
    }

    fn kml(placemarks: &[String]) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2"><Document>{}</Document></kml>"#,
            placemarks.join("\n")
        )
    }

    #[test]
    fn test_open_ring_is_closed() {
        let ring = Ring::close(parse_coordinates("120.1,23.0 120.2,23.0 120.2,23.1")).unwrap();

        assert_eq!(ring.len(), 4);
        assert_eq!(ring.vertices()[0], ring.vertices()[3]);
        assert_eq!(ring.vertices()[0], Vertex::new(120.1, 23.0));
    }

    #[test]
    fn test_closed_ring_is_not_closed_twice() {
        let ring = Ring::close(parse_coordinates(
            "120.1,23.0 120.2,23.0 120.2,23.1 120.1,23.0",
        ))
        .unwrap();
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_degenerate_rings_are_rejected() {
        assert!(Ring::close(parse_coordinates("120.1,23.0 120.2,23.0")).is_none());
        // Four tokens but only two distinct vertices
        assert!(Ring::close(parse_coordinates(
            "120.1,23.0 120.2,23.0 120.1,23.0 120.2,23.0"
        ))
        .is_none());
        assert!(Ring::close(Vec::new()).is_none());
    }

    #[test]
    fn test_parse_coordinates_drops_bad_tokens_and_altitude() {
        let vertices = parse_coordinates("  120.1,23.0,15  120.2  abc,23.1\n120.3,23.2,0 ");
        assert_eq!(
            vertices,
            vec![Vertex::new(120.1, 23.0), Vertex::new(120.3, 23.2)]
        );
    }

    #[test]
    fn test_non_finite_ordinates_are_dropped() {
        let vertices =
            parse_coordinates("NaN,23.0 120.1,23.0 120.2,23.0 120.2,23.1 inf,1 120.1,-infinity");
        assert_eq!(
            vertices,
            vec![
                Vertex::new(120.1, 23.0),
                Vertex::new(120.2, 23.0),
                Vertex::new(120.2, 23.1),
            ]
        );

        let ring = Ring::close(vertices).unwrap();
        assert_eq!(ring.vertices().first(), ring.vertices().last());
        assert_eq!(
            ring.to_wkt(),
            "POLYGON((120.1 23, 120.2 23, 120.2 23.1, 120.1 23))"
        );
        assert_eq!(ring.bbox().max_lon, 120.2);
    }

    #[test]
    fn test_extracts_placemarks_by_parcel_field() {
        let doc = kml(&[
            placemark("17-1", "120.1,23.0,0 120.2,23.0,0 120.2,23.1,0"),
            placemark("00170002", "121.0,24.0 121.1,24.0 121.1,24.1 121.0,24.1"),
        ]);
        let set = extract(&doc).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.get("17-1").unwrap().len(), 4);
        assert_eq!(set.get("00170002").unwrap().len(), 5);
        assert_eq!(set.skipped_placemarks, 0);
    }

    #[test]
    fn test_skips_placemarks_without_id_or_usable_coordinates() {
        let no_id = r#"<Placemark><Polygon><coordinates>1,1 2,1 2,2</coordinates></Polygon></Placemark>"#;
        let wrong_case = placemark("x", "1,1 2,1 2,2").replace("PARCELNO", "parcelno");
        let doc = kml(&[
            no_id.to_string(),
            wrong_case,
            placemark("no-coords", ""),
            placemark("too-few", "1,1 2,2"),
            placemark("ok", "1,1 2,1 2,2"),
        ]);
        let set = extract(&doc).unwrap();

        assert_eq!(set.len(), 1);
        assert!(set.get("ok").is_some());
        assert_eq!(set.skipped_placemarks, 4);
    }

    #[test]
    fn test_duplicate_ids_last_write_wins() {
        let doc = kml(&[
            placemark("17-1", "1,1 2,1 2,2"),
            placemark("17-1", "5,5 6,5 6,6"),
        ]);
        let set = extract(&doc).unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.duplicate_ids, vec!["17-1".to_string()]);
        assert_eq!(set.get("17-1").unwrap().vertices()[0], Vertex::new(5.0, 5.0));
    }

    #[test]
    fn test_unparseable_document_is_error() {
        let err = extract("<kml><Document><Placemark></kml>").unwrap_err();
        assert!(matches!(err, ImportError::Parse { .. }));
    }

    #[test]
    fn test_wkt_round_trip_and_bbox() {
        let ring = Ring::close(parse_coordinates("120.1,23 120.2,23 120.2,23.1")).unwrap();
        let wkt = ring.to_wkt();

        assert_eq!(
            wkt,
            "POLYGON((120.1 23, 120.2 23, 120.2 23.1, 120.1 23))"
        );
        assert_eq!(Ring::from_wkt(&wkt), Some(ring.clone()));
        assert!(Ring::from_wkt("POINT(1 2)").is_none());

        let bbox = ring.bbox();
        assert_eq!(bbox, BoundingBox::new(120.1, 23.0, 120.2, 23.1));
    }

    #[test]
    fn test_geojson_shape() {
        let ring = Ring::close(parse_coordinates("0,0 1,0 1,1")).unwrap();
        let geojson = ring.to_geojson();

        assert_eq!(geojson["type"], "Polygon");
        assert_eq!(geojson["coordinates"][0].as_array().unwrap().len(), 4);
        assert_eq!(geojson["coordinates"][0][1][0], 1.0);
    }
}
