use pcapi_core::record_name_from_path;

/// Record names become remote directory names, so they cannot hold a path
/// separator.
pub fn sanitize_record_name(name: &str) -> String {
    name.replace('/', "-")
}

/// The server answers a record upload with the path it actually used. When a
/// record of the same name already exists it picks a new one, e.g.
/// `/records/Oak (1)/record.json`, which the local copy must adopt.
pub fn detect_rename(requested: &str, created_path: &str) -> Option<String> {
    let stored = record_name_from_path(created_path)?;
    (!stored.is_empty() && stored != requested).then(|| stored.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slashes_become_dashes() {
        assert_eq!(sanitize_record_name("Site 4/North"), "Site 4-North");
        assert_eq!(sanitize_record_name("Oak"), "Oak");
    }

    #[test]
    fn rename_when_server_picks_new_name() {
        assert_eq!(
            detect_rename("Oak", "/records/Oak (1)/record.json"),
            Some("Oak (1)".to_string())
        );
    }

    #[test]
    fn no_rename_for_same_or_unparseable_path() {
        assert_eq!(detect_rename("Oak", "/records/Oak/record.json"), None);
        assert_eq!(detect_rename("Oak", ""), None);
    }
}
