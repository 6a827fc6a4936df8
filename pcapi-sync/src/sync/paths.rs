use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use super::index::EditorGroup;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// On-device layout under the data directory:
///
/// ```text
/// <root>/index.db
/// <root>/editors/<editor>
/// <root>/editors/public/<editor>
/// <root>/assets/<record name>/<file>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join("index.db")
    }

    pub fn editors_dir(&self, group: EditorGroup) -> PathBuf {
        match group {
            EditorGroup::Private => self.root.join("editors"),
            EditorGroup::Public => self.root.join("editors").join("public"),
        }
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join("assets")
    }

    pub fn record_assets_dir(&self, record_name: &str) -> Result<PathBuf, PathError> {
        local_path_for(&self.assets_dir(), record_name)
    }

    pub fn asset_path(&self, record_name: &str, file_name: &str) -> Result<PathBuf, PathError> {
        local_path_for(&self.record_assets_dir(record_name)?, file_name)
    }

    /// Asset values of local records are paths; relative ones live under the
    /// assets directory.
    pub fn resolve_asset(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.assets_dir().join(path)
        }
    }
}

/// Maps a slash separated name under `root`, refusing anything that would
/// escape it.
pub fn local_path_for(root: &Path, name: &str) -> Result<PathBuf, PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = root.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir => continue,
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent(name.to_string()));
            }
        }
    }
    if out == root {
        return Err(PathError::Empty);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_places_editors_and_assets() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.editors_dir(EditorGroup::Private),
            PathBuf::from("/data/editors")
        );
        assert_eq!(
            layout.editors_dir(EditorGroup::Public),
            PathBuf::from("/data/editors/public")
        );
        assert_eq!(
            layout.asset_path("Oak (1)", "photo.jpg").unwrap(),
            PathBuf::from("/data/assets/Oak (1)/photo.jpg")
        );
    }

    #[test]
    fn rejects_parent_dir() {
        let layout = DataLayout::new("/data");
        assert!(matches!(
            layout.asset_path("..", "secret"),
            Err(PathError::UnsupportedComponent(_))
        ));
        assert!(matches!(
            local_path_for(Path::new("/data"), "/"),
            Err(PathError::Empty)
        ));
    }

    #[test]
    fn relative_assets_resolve_under_assets_dir() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.resolve_asset("Oak/photo.jpg"),
            PathBuf::from("/data/assets/Oak/photo.jpg")
        );
        assert_eq!(
            layout.resolve_asset("/sdcard/photo.jpg"),
            PathBuf::from("/sdcard/photo.jpg")
        );
    }
}
