//! Shapefile reading.

use std::path::Path;

use anyhow::{Context, Result};
use geo::{Coord, Point};
use shapefile::{dbase::{FieldValue, Record}, Reader, Shape};
use tracing::{debug, warn};

use crate::{
    feature::{AttrValue, FeatureGeometry, FeatureId, FeatureRecord},
    geom::{rings_to_geo, shp_to_geo, Transformer},
    io::csv::Loaded,
};

/// Reads all shapes + attribute records from a given `.shp` file path.
pub fn read_shapefile(path: &Path) -> Result<Vec<(Shape, Record)>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("[io::shp] Failed to open shapefile: {}", path.display()))?;

    let mut items = Vec::with_capacity(reader.shape_count()?);
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result
            .with_context(|| format!("[io::shp] Error reading shape+record from {}", path.display()))?;
        items.push((shape, record));
    }
    Ok(items)
}

/// Load a shapefile as features, reprojected by `transformer`.
///
/// Polygons and points are supported (M and Z variants are read in plan view);
/// other shape kinds and shapes that fail to project are skipped and counted.
pub fn features_from_shapefile(path: &Path, transformer: &Transformer) -> Result<Loaded> {
    let items = read_shapefile(path)?;
    let total = items.len();

    let mut loaded = Loaded::default();
    for (shape, record) in items {
        let id = FeatureId(loaded.features.len() as u32);
        match feature_from_shape(id, &shape, record, transformer) {
            Some(feature) => loaded.features.push(feature),
            None => loaded.skipped += 1,
        }
    }

    if loaded.skipped > 0 {
        warn!(path = %path.display(), skipped = loaded.skipped, total, "shapes skipped");
    }
    debug!(path = %path.display(), features = loaded.features.len(), "loaded shapefile");
    Ok(loaded)
}

/// Convert one shape and its dBase record. Returns `None` when the shape is unusable.
pub fn feature_from_shape(id: FeatureId, shape: &Shape, record: Record, transformer: &Transformer) -> Option<FeatureRecord> {
    let geometry = match shape {
        Shape::Polygon(polygon) => transformer.multipolygon(&shp_to_geo(polygon))
            .map(FeatureGeometry::Polygon),
        Shape::PolygonM(polygon) => transformer.multipolygon(&rings_to_geo(polygon.rings(), |p| Coord { x: p.x, y: p.y }))
            .map(FeatureGeometry::Polygon),
        Shape::PolygonZ(polygon) => transformer.multipolygon(&rings_to_geo(polygon.rings(), |p| Coord { x: p.x, y: p.y }))
            .map(FeatureGeometry::Polygon),
        Shape::Point(p) => point(transformer, p.x, p.y),
        Shape::PointM(p) => point(transformer, p.x, p.y),
        Shape::PointZ(p) => point(transformer, p.x, p.y),
        other => {
            debug!(feature = %id, kind = ?other.shapetype(), "unsupported shape kind");
            return None;
        }
    };
    let geometry = match geometry {
        Ok(geometry) => geometry,
        Err(err) => {
            debug!(feature = %id, %err, "shape failed to project");
            return None;
        }
    };

    let mut feature = FeatureRecord::new(id, geometry);
    for (name, value) in record {
        if let Some(value) = field_to_attr(value) {
            feature.attributes.insert(name, value);
        }
    }
    Some(feature)
}

fn point(transformer: &Transformer, x: f64, y: f64) -> Result<FeatureGeometry> {
    transformer.coord(Coord { x, y }).map(|c| FeatureGeometry::Point(Point(c)))
}

/// Map a dBase field onto an attribute; empty fields yield `None`.
pub fn field_to_attr(value: FieldValue) -> Option<AttrValue> {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| AttrValue::Label(s.into()))
        }
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => Some(AttrValue::Number(n)),
        FieldValue::Float(Some(n)) => Some(AttrValue::Number(n as f64)),
        FieldValue::Integer(n) => Some(AttrValue::Number(n as f64)),
        FieldValue::Logical(Some(b)) => Some(AttrValue::Label(if b { "T" } else { "F" }.into())),
        _ => None,
    }
}
