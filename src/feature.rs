use std::{fmt, sync::Arc};

use ahash::AHashMap;
use geo::{MultiPolygon, Point};

/// Identifies a feature within one layer (its row position at load time).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId(pub u32);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Planar geometry of an external observation.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureGeometry {
    Point(Point<f64>),
    Polygon(MultiPolygon<f64>),
}

/// A single attribute value carried by a feature.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Number(f64),
    Label(Arc<str>),
}

impl AttrValue {
    /// Numeric view; labels that parse as numbers count too.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.is_finite().then_some(*n),
            Self::Label(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    /// Text view of the value.
    pub fn as_label(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Label(s) => s.to_string(),
        }
    }
}

/// One external observation to be assigned to grid cells.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureRecord {
    pub id: FeatureId,
    pub geometry: FeatureGeometry,
    pub attributes: AHashMap<String, AttrValue>,
}

impl FeatureRecord {
    pub fn new(id: FeatureId, geometry: FeatureGeometry) -> Self {
        Self { id, geometry, attributes: AHashMap::new() }
    }

    /// Builder-style attribute insertion.
    pub fn with(mut self, name: &str, value: AttrValue) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    #[inline]
    pub fn attr(&self, name: &str) -> Option<&AttrValue> { self.attributes.get(name) }

    #[inline]
    pub fn number(&self, name: &str) -> Option<f64> { self.attr(name).and_then(AttrValue::as_number) }

    #[inline]
    pub fn label(&self, name: &str) -> Option<String> { self.attr(name).map(AttrValue::as_label) }
}

/// Replace labels with numbers through a lookup table (e.g. grade `A` -> 1).
///
/// The number is stored under `target`; labels absent from the table leave the
/// feature without that attribute. Returns how many features were left unmapped.
pub fn recode(features: &mut [FeatureRecord], source: &str, target: &str, table: &AHashMap<String, f64>) -> usize {
    let mut unmapped = 0;
    for feature in features.iter_mut() {
        let code = feature.attr(source)
            .map(AttrValue::as_label)
            .and_then(|label| table.get(label.trim()).copied());
        match code {
            Some(n) => { feature.attributes.insert(target.to_string(), AttrValue::Number(n)); }
            None => unmapped += 1,
        }
    }
    unmapped
}

/// Attribute rows of a keyed table, by normalised key.
pub type AttributeTable = AHashMap<String, Vec<(String, AttrValue)>>;

/// Copy the row whose key matches each feature's `on` attribute onto the feature.
///
/// `key` normalises the feature side the same way the table keys were.
/// Returns how many features found no row.
pub fn merge_attributes(
    features: &mut [FeatureRecord],
    on: &str,
    table: &AttributeTable,
    key: impl Fn(&str) -> String,
) -> usize {
    let mut unmatched = 0;
    for feature in features.iter_mut() {
        match feature.label(on).and_then(|label| table.get(&key(&label))) {
            Some(row) => feature.attributes.extend(row.iter().cloned()),
            None => unmatched += 1,
        }
    }
    unmatched
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_view_parses_labels() {
        assert_eq!(AttrValue::Number(2.5).as_number(), Some(2.5));
        assert_eq!(AttrValue::Label(" 7 ".into()).as_number(), Some(7.0));
        assert_eq!(AttrValue::Label("강남구".into()).as_number(), None);
        assert_eq!(AttrValue::Number(f64::NAN).as_number(), None);
    }

    #[test]
    fn record_accessors() {
        let record = FeatureRecord::new(FeatureId(3), FeatureGeometry::Point(Point::new(1.0, 2.0)))
            .with("risk", AttrValue::Number(4.0))
            .with("district", AttrValue::Label("중구".into()));
        assert_eq!(record.number("risk"), Some(4.0));
        assert_eq!(record.label("district").as_deref(), Some("중구"));
        assert_eq!(record.number("missing"), None);
    }

    #[test]
    fn recode_maps_grades() {
        let table: AHashMap<String, f64> = [("A", 1.0), ("B", 4.0), ("C", 7.0), ("D", 10.0)]
            .into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let mut features = vec![
            FeatureRecord::new(FeatureId(0), FeatureGeometry::Point(Point::new(0.0, 0.0)))
                .with("GRAD", AttrValue::Label("C".into())),
            FeatureRecord::new(FeatureId(1), FeatureGeometry::Point(Point::new(0.0, 0.0)))
                .with("GRAD", AttrValue::Label("Z".into())),
        ];
        assert_eq!(recode(&mut features, "GRAD", "grade", &table), 1);
        assert_eq!(features[0].number("grade"), Some(7.0));
        assert_eq!(features[1].number("grade"), None);
    }

    #[test]
    fn table_rows_merge_by_key() {
        let table: AttributeTable = [("강남구".to_string(), vec![("total".to_string(), AttrValue::Number(120.0))])]
            .into_iter().collect();
        let mut features = vec![
            FeatureRecord::new(FeatureId(0), FeatureGeometry::Point(Point::new(0.0, 0.0)))
                .with("SGG_NM", AttrValue::Label("서울특별시 강남구".into())),
            FeatureRecord::new(FeatureId(1), FeatureGeometry::Point(Point::new(0.0, 0.0)))
                .with("SGG_NM", AttrValue::Label("서울특별시 중구".into())),
            FeatureRecord::new(FeatureId(2), FeatureGeometry::Point(Point::new(0.0, 0.0))),
        ];
        let last_token = |s: &str| s.split_whitespace().last().unwrap_or_default().to_string();
        assert_eq!(merge_attributes(&mut features, "SGG_NM", &table, last_token), 2);
        assert_eq!(features[0].number("total"), Some(120.0));
        assert_eq!(features[1].number("total"), None);
    }
}
