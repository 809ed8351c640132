//! Document identity and URL mapping.
//!
//! A document id is the SHA-256 of the file's path relative to the indexed
//! root, so the same relative path always maps to the same document and an
//! upsert doubles as an update in place.

use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

use crate::error::DocumentError;

/// Derive a document id from a root-relative, `/`-separated path.
#[must_use]
pub fn id_from_relative_path(relative_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(relative_path.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Maps between filesystem paths, relative paths, ids and public URLs.
#[derive(Debug, Clone)]
pub struct PathMapper {
    root: PathBuf,
    url_prefix: String,
}

impl PathMapper {
    /// Create a mapper for `root`, publishing files under `domain`.
    ///
    /// A bare domain is served over https; a domain that already carries a
    /// scheme is used as-is.
    pub fn new(root: impl Into<PathBuf>, domain: &str) -> Self {
        let domain = domain.trim_end_matches('/');
        let url_prefix = if domain.starts_with("http://") || domain.starts_with("https://") {
            format!("{domain}/")
        } else {
            format!("https://{domain}/")
        };
        Self {
            root: root.into(),
            url_prefix,
        }
    }

    /// The indexed root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `file_path` relative to the root, with `/` separators.
    pub fn relative_path(&self, file_path: &Path) -> Result<String, DocumentError> {
        let relative = file_path
            .strip_prefix(&self.root)
            .map_err(|_| DocumentError::OutsideRoot(file_path.to_path_buf()))?;

        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        if parts.is_empty() {
            return Err(DocumentError::OutsideRoot(file_path.to_path_buf()));
        }
        Ok(parts.join("/"))
    }

    /// Document id of a file under the root.
    pub fn id_from_file_path(&self, file_path: &Path) -> Result<String, DocumentError> {
        self.relative_path(file_path)
            .map(|relative| id_from_relative_path(&relative))
    }

    #[must_use]
    pub fn url_from_relative_path(&self, relative_path: &str) -> String {
        format!("{}{}", self.url_prefix, relative_path)
    }

    /// Inverse of [`url_from_relative_path`](Self::url_from_relative_path).
    pub fn relative_path_from_url<'u>(&self, url: &'u str) -> Result<&'u str, DocumentError> {
        match url.strip_prefix(self.url_prefix.as_str()) {
            Some(relative) if !relative.is_empty() => Ok(relative),
            _ => Err(DocumentError::ForeignUrl(url.to_string())),
        }
    }

    /// Filesystem path of the file a document URL points at.
    pub fn file_path_from_url(&self, url: &str) -> Result<PathBuf, DocumentError> {
        let relative = self.relative_path_from_url(url)?;
        Ok(relative
            .split('/')
            .fold(self.root.clone(), |path, part| path.join(part)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> PathMapper {
        PathMapper::new("/data", "files.example.org")
    }

    #[test]
    fn test_id_is_sha256_hex() {
        let id = id_from_relative_path("a.txt");
        assert_eq!(id.len(), 64);
        assert_eq!(
            id_from_relative_path(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_id_is_stable_and_path_sensitive() {
        assert_eq!(id_from_relative_path("dir/a.txt"), id_from_relative_path("dir/a.txt"));
        assert_ne!(id_from_relative_path("dir/a.txt"), id_from_relative_path("dir/b.txt"));
    }

    #[test]
    fn test_relative_path_uses_forward_slashes() {
        let rel = mapper()
            .relative_path(Path::new("/data/music/album/track.mp3"))
            .unwrap();
        assert_eq!(rel, "music/album/track.mp3");
    }

    #[test]
    fn test_relative_path_outside_root() {
        let err = mapper().relative_path(Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, DocumentError::OutsideRoot(_)));
    }

    #[test]
    fn test_relative_path_of_root_itself() {
        assert!(mapper().relative_path(Path::new("/data")).is_err());
    }

    #[test]
    fn test_id_from_file_path_matches_relative_id() {
        let id = mapper().id_from_file_path(Path::new("/data/a.txt")).unwrap();
        assert_eq!(id, id_from_relative_path("a.txt"));
    }

    #[test]
    fn test_url_round_trip() {
        let m = mapper();
        let url = m.url_from_relative_path("docs/report final.pdf");
        assert_eq!(url, "https://files.example.org/docs/report final.pdf");
        assert_eq!(m.relative_path_from_url(&url).unwrap(), "docs/report final.pdf");
        assert_eq!(
            m.file_path_from_url(&url).unwrap(),
            PathBuf::from("/data/docs/report final.pdf")
        );
    }

    #[test]
    fn test_domain_with_scheme_and_trailing_slash() {
        let m = PathMapper::new("/data", "http://localhost:8080/");
        assert_eq!(m.url_from_relative_path("a.txt"), "http://localhost:8080/a.txt");
    }

    #[test]
    fn test_foreign_url_rejected() {
        let m = mapper();
        assert!(m.relative_path_from_url("https://elsewhere.org/a.txt").is_err());
        assert!(m.relative_path_from_url("").is_err());
        assert!(m.relative_path_from_url("https://files.example.org/").is_err());
    }
}
