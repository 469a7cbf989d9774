//! Manifest validation.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::ManifestError;
use crate::types::{Manifest, MediaType, ResourceKind};

/// Manifest size cap.
pub const MAX_MANIFEST_SIZE: usize = 100 * 1024;
const MAX_ID_LEN: usize = 100;
const MAX_NAME_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 5000;
const MAX_EXTRA_OPTIONS: usize = 100;
const MAX_EXTRA_OPTION_LEN: usize = 200;

static ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]{1,100}$").expect("valid regex"));
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+(\.\d+)?(-[A-Za-z0-9.-]+)?$").expect("valid regex")
});

/// Raw manifest shape as received off the wire, before semantic validation.
///
/// A thin mirror of [`Manifest`] used only to deserialize untrusted bytes;
/// `validate_manifest` is the only path that turns this into a [`Manifest`].
#[derive(serde::Deserialize)]
struct RawManifest {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    author: Option<String>,
    #[serde(default)]
    types: Vec<MediaType>,
    #[serde(default)]
    catalogs: Vec<crate::types::CatalogDescriptor>,
    #[serde(default)]
    resources: Vec<ResourceKind>,
    #[serde(default)]
    id_prefixes: Vec<String>,
    #[serde(default)]
    behavior_hints: crate::types::BehaviorHints,
}

/// Validate raw manifest bytes.
///
/// Pure function: no I/O, never panics, never mutates `bytes`. Either
/// returns a [`Manifest`] whose fields satisfy every invariant, or a
/// structured [`ManifestError`] describing the first failing constraint.
pub fn validate_manifest(bytes: &[u8]) -> Result<Manifest, ManifestError> {
    if bytes.len() > MAX_MANIFEST_SIZE {
        return Err(ManifestError::SizeExceeded { max: MAX_MANIFEST_SIZE });
    }

    let raw: RawManifest =
        serde_json::from_slice(bytes).map_err(|e| ManifestError::InvalidJson(e.to_string()))?;

    let id = raw.id.filter(|s| !s.is_empty()).ok_or(ManifestError::MissingField("id"))?;
    let name = raw.name.filter(|s| !s.is_empty()).ok_or(ManifestError::MissingField("name"))?;
    let version = raw
        .version
        .filter(|s| !s.is_empty())
        .ok_or(ManifestError::MissingField("version"))?;
    let description = raw.description.unwrap_or_default();

    if !ID_RE.is_match(&id) {
        return Err(ManifestError::InvalidId(id));
    }
    if !VERSION_RE.is_match(&version) {
        return Err(ManifestError::InvalidVersion(version));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ManifestError::FieldTooLong { field: "name", max: MAX_NAME_LEN });
    }
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(ManifestError::FieldTooLong {
            field: "description",
            max: MAX_DESCRIPTION_LEN,
        });
    }
    for prefix in &raw.id_prefixes {
        if prefix.len() > 50 {
            return Err(ManifestError::FieldTooLong { field: "id_prefixes[]", max: 50 });
        }
    }

    let has_catalog = raw.resources.contains(&ResourceKind::Catalog);
    let has_stream = raw.resources.contains(&ResourceKind::Stream);
    let has_meta = raw.resources.contains(&ResourceKind::Meta);

    if has_catalog && (raw.catalogs.is_empty() || raw.types.is_empty()) {
        return Err(ManifestError::InconsistentResources(
            "catalog resource requires at least one catalog and one type".to_string(),
        ));
    }
    if (has_stream || has_meta) && raw.types.is_empty() {
        return Err(ManifestError::InconsistentResources(
            "stream/meta resources require at least one media type".to_string(),
        ));
    }
    for catalog in &raw.catalogs {
        validate_catalog_descriptor(catalog)?;
        if !raw.types.contains(&catalog.media_type) {
            return Err(ManifestError::InconsistentResources(format!(
                "catalog `{}` declares type {} not listed in manifest types",
                catalog.id, catalog.media_type
            )));
        }
    }

    Ok(Manifest {
        id,
        name,
        version,
        description,
        author: raw.author,
        types: raw.types,
        catalogs: raw.catalogs,
        resources: raw.resources,
        id_prefixes: raw.id_prefixes,
        behavior_hints: raw.behavior_hints,
    })
}

fn validate_catalog_descriptor(
    catalog: &crate::types::CatalogDescriptor,
) -> Result<(), ManifestError> {
    if catalog.id.is_empty() {
        return Err(ManifestError::MissingField("catalogs[].id"));
    }
    if catalog.id.len() > MAX_ID_LEN {
        return Err(ManifestError::FieldTooLong { field: "catalogs[].id", max: MAX_ID_LEN });
    }
    if catalog.name.is_empty() {
        return Err(ManifestError::MissingField("catalogs[].name"));
    }
    if catalog.name.len() > MAX_NAME_LEN {
        return Err(ManifestError::FieldTooLong { field: "catalogs[].name", max: MAX_NAME_LEN });
    }
    if catalog.extra.len() > MAX_EXTRA_OPTIONS {
        return Err(ManifestError::FieldTooLong {
            field: "catalogs[].extra",
            max: MAX_EXTRA_OPTIONS,
        });
    }
    for extra in &catalog.extra {
        if extra.name.is_empty() {
            return Err(ManifestError::MissingField("catalogs[].extra[].name"));
        }
        if extra.options.len() > MAX_EXTRA_OPTIONS {
            return Err(ManifestError::FieldTooLong {
                field: "catalogs[].extra[].options",
                max: MAX_EXTRA_OPTIONS,
            });
        }
        for option in &extra.options {
            if option.len() > MAX_EXTRA_OPTION_LEN {
                return Err(ManifestError::FieldTooLong {
                    field: "catalogs[].extra[].options[]",
                    max: MAX_EXTRA_OPTION_LEN,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_manifest_json() -> serde_json::Value {
        json!({
            "id": "test-addon",
            "name": "Test Addon",
            "version": "1.0.0",
            "description": "A test addon",
            "types": ["movie", "series"],
            "resources": ["catalog", "meta"],
            "catalogs": [
                {"type": "movie", "id": "top", "name": "Popular"}
            ]
        })
    }

    #[test]
    fn accepts_valid_manifest() {
        let bytes = serde_json::to_vec(&valid_manifest_json()).unwrap();
        let manifest = validate_manifest(&bytes).unwrap();
        assert_eq!(manifest.id, "test-addon");
        assert_eq!(manifest.catalogs.len(), 1);
    }

    #[test]
    fn rejects_oversized_manifest() {
        let bytes = vec![b'a'; MAX_MANIFEST_SIZE + 1];
        assert!(matches!(
            validate_manifest(&bytes),
            Err(ManifestError::SizeExceeded { .. })
        ));
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(
            validate_manifest(b"not json"),
            Err(ManifestError::InvalidJson(_))
        ));
    }

    #[test]
    fn rejects_invalid_version() {
        let mut v = valid_manifest_json();
        v["version"] = json!("abc");
        let bytes = serde_json::to_vec(&v).unwrap();
        assert!(matches!(
            validate_manifest(&bytes),
            Err(ManifestError::InvalidVersion(_))
        ));
    }

    #[test]
    fn rejects_invalid_id() {
        let mut v = valid_manifest_json();
        v["id"] = json!("bad id with spaces!");
        let bytes = serde_json::to_vec(&v).unwrap();
        assert!(matches!(validate_manifest(&bytes), Err(ManifestError::InvalidId(_))));
    }

    #[test]
    fn catalog_resource_requires_catalogs_and_types() {
        let mut v = valid_manifest_json();
        v["catalogs"] = json!([]);
        let bytes = serde_json::to_vec(&v).unwrap();
        assert!(matches!(
            validate_manifest(&bytes),
            Err(ManifestError::InconsistentResources(_))
        ));
    }

    #[test]
    fn catalog_type_must_be_declared_in_types() {
        let mut v = valid_manifest_json();
        v["types"] = json!(["movie"]);
        v["catalogs"] = json!([{"type": "series", "id": "top", "name": "Popular"}]);
        let bytes = serde_json::to_vec(&v).unwrap();
        assert!(matches!(
            validate_manifest(&bytes),
            Err(ManifestError::InconsistentResources(_))
        ));
    }

    #[test]
    fn manifest_round_trips_through_reserialisation() {
        let bytes = serde_json::to_vec(&valid_manifest_json()).unwrap();
        let manifest = validate_manifest(&bytes).unwrap();
        let reserialized = serde_json::to_vec(&manifest).unwrap();
        let reparsed = validate_manifest(&reserialized).unwrap();
        assert_eq!(manifest, reparsed);
    }

    #[test]
    fn never_panics_on_arbitrary_bytes() {
        let samples: &[&[u8]] = &[
            b"",
            b"{}",
            b"null",
            b"[1,2,3]",
            &[0xff, 0xfe, 0x00, 0x01],
            b"{\"id\": 123}",
        ];
        for sample in samples {
            let _ = validate_manifest(sample);
        }
    }
}
