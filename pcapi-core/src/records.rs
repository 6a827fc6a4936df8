use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A field record as stored on the cloud: a GeoJSON `Feature` whose
/// properties carry the form fields.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Record {
    #[serde(rename = "type", default = "feature_type")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Properties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Field {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub val: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    MultiImage,
    Audio,
    Track,
}

impl AssetKind {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "image" => Some(AssetKind::Image),
            "multiimage" => Some(AssetKind::MultiImage),
            "audio" => Some(AssetKind::Audio),
            "track" => Some(AssetKind::Track),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            AssetKind::Image | AssetKind::MultiImage => "image/jpeg",
            AssetKind::Audio => "audio/3gpp",
            AssetKind::Track => "text/xml",
        }
    }
}

fn feature_type() -> String {
    "Feature".to_string()
}

impl Record {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            kind: feature_type(),
            name: name.into(),
            geometry: None,
            properties: Properties::default(),
            extra: Map::new(),
        }
    }

    pub fn with_point(mut self, coordinates: Vec<f64>) -> Self {
        self.geometry = Some(Geometry {
            kind: "Point".to_string(),
            coordinates,
        });
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.properties.fields.push(field);
        self
    }

    pub fn has_location(&self) -> bool {
        self.geometry
            .as_ref()
            .is_some_and(|geometry| !geometry.coordinates.is_empty())
    }

    pub fn assets(&self) -> impl Iterator<Item = (&Field, AssetKind)> {
        self.properties
            .fields
            .iter()
            .filter_map(|field| field.asset_kind().map(|kind| (field, kind)))
    }

    pub fn assets_mut(&mut self) -> impl Iterator<Item = &mut Field> {
        self.properties
            .fields
            .iter_mut()
            .filter(|field| field.asset_kind().is_some())
    }

    /// Copy suitable for the cloud: asset values are reduced to bare file
    /// names since local paths mean nothing remotely.
    pub fn to_remote(&self) -> Self {
        let mut remote = self.clone();
        for field in remote.assets_mut() {
            if let Some(name) = field.asset_file_name().map(str::to_string) {
                field.val = Value::String(name);
            }
        }
        remote
    }
}

impl Field {
    pub fn new(id: impl Into<String>, val: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            label: None,
            val: val.into(),
        }
    }

    /// Field type encoded in ids such as `fieldcontain-image-1`.
    pub fn kind(&self) -> Option<&str> {
        let mut parts = self.id.split('-');
        parts.next()?;
        parts.next().filter(|kind| !kind.is_empty())
    }

    pub fn asset_kind(&self) -> Option<AssetKind> {
        let kind = AssetKind::parse(self.kind()?)?;
        self.asset_value().map(|_| kind)
    }

    pub fn asset_value(&self) -> Option<&str> {
        self.val.as_str().filter(|value| !value.is_empty())
    }

    pub fn asset_file_name(&self) -> Option<&str> {
        let value = self.asset_value()?;
        Some(value.rsplit('/').next().unwrap_or(value))
    }
}

/// Extracts the record name from a server path such as
/// `/records/Tree (1)/record.json`.
pub fn record_name_from_path(path: &str) -> Option<&str> {
    let start = path.get(1..)?.find('/')? + 2;
    let end = path.rfind('/')?;
    if end < start {
        return None;
    }
    Some(&path[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_geojson_record_and_keeps_unknown_keys() {
        let record: Record = serde_json::from_value(json!({
            "type": "Feature",
            "name": "Tree",
            "geometry": {"type": "Point", "coordinates": [-3.2, 55.9]},
            "properties": {
                "editor": "trees.edtr",
                "timestamp": "2014-05-01T10:00:00Z",
                "fields": [
                    {"id": "fieldcontain-text-1", "label": "Name", "val": "Oak"},
                    {"id": "fieldcontain-image-1", "label": "Photo", "val": "oak.jpg"}
                ],
                "custom": true
            },
            "crs": "EPSG:4326"
        }))
        .unwrap();

        assert!(record.has_location());
        assert_eq!(record.properties.fields.len(), 2);
        assert_eq!(record.extra.get("crs"), Some(&json!("EPSG:4326")));
        assert_eq!(record.properties.extra.get("custom"), Some(&json!(true)));
        let assets: Vec<_> = record.assets().map(|(_, kind)| kind).collect();
        assert_eq!(assets, vec![AssetKind::Image]);
    }

    #[test]
    fn empty_asset_value_is_not_an_asset() {
        let field = Field::new("fieldcontain-audio-2", "");
        assert_eq!(field.kind(), Some("audio"));
        assert!(field.asset_kind().is_none());
    }

    #[test]
    fn to_remote_strips_local_directories() {
        let record = Record::new("Pond")
            .with_point(vec![1.0, 2.0])
            .with_field(Field::new(
                "fieldcontain-image-1",
                "/data/assets/Pond/photo.jpg",
            ))
            .with_field(Field::new("fieldcontain-text-1", "a/b"));

        let remote = record.to_remote();
        assert_eq!(remote.properties.fields[0].val, json!("photo.jpg"));
        assert_eq!(remote.properties.fields[1].val, json!("a/b"));
        assert_eq!(
            record.properties.fields[0].val,
            json!("/data/assets/Pond/photo.jpg")
        );
    }

    #[test]
    fn mime_types_follow_asset_kind() {
        assert_eq!(AssetKind::Audio.mime(), "audio/3gpp");
        assert_eq!(AssetKind::Track.mime(), "text/xml");
        assert_eq!(AssetKind::Image.mime(), "image/jpeg");
    }

    #[test]
    fn record_name_from_server_path() {
        assert_eq!(
            record_name_from_path("/records/Tree (1)/record.json"),
            Some("Tree (1)")
        );
        assert_eq!(record_name_from_path("/records/Pond/"), Some("Pond"));
        assert_eq!(record_name_from_path("/records"), None);
    }
}
