use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const CACHE_NAME: &str = "vibekit-v3";
pub const ROOT_DOCUMENT: &str = "/index.html";
pub const PRECACHE_MANIFEST: [&str; 7] = [
    "/",
    "/index.html",
    "/style.css",
    "/app.js",
    "/manifest.json",
    "/icon-192.png",
    "/icon-512.png",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Asset {
    pub fn ok(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type,
            body: body.into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: "text/plain; charset=utf-8",
            body: b"not found".to_vec(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("asset origin {} is unavailable: {source}", root.display())]
    Unavailable {
        root: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where uncached assets come from.
pub trait AssetSource {
    fn fetch(&self, path: &str) -> Result<Asset, FetchError>;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Served {
    Cache,
    Network,
    Fallback,
}

/// Versioned cache-first store of static assets.
///
/// Only the cache named [`CACHE_NAME`] survives [`AssetCache::activate`], so bumping the
/// version drops every previously cached entry.
#[derive(Debug, Default)]
pub struct AssetCache {
    caches: BTreeMap<String, HashMap<String, Asset>>,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn cache_names(&self) -> Vec<String> {
        self.caches.keys().cloned().collect()
    }

    pub fn insert_into(&mut self, cache_name: &str, path: &str, asset: Asset) {
        self.caches
            .entry(cache_name.to_string())
            .or_default()
            .insert(path.to_string(), asset);
    }

    /// Pre-caches the manifest. Individual failures are logged and skipped.
    pub fn install(&mut self, source: &dyn AssetSource) -> usize {
        let mut cached = 0;
        for path in PRECACHE_MANIFEST {
            match source.fetch(path) {
                Ok(asset) if asset.status == 200 => {
                    self.insert_into(CACHE_NAME, path, asset);
                    cached += 1;
                }
                Ok(asset) => {
                    tracing::warn!(path, status = asset.status, "precache skipped asset");
                }
                Err(err) => tracing::warn!(path, error = %err, "precache fetch failed"),
            }
        }
        self.caches.entry(CACHE_NAME.to_string()).or_default();
        tracing::info!(cache = CACHE_NAME, cached, "asset cache installed");
        cached
    }

    /// Deletes every cache whose name is not the current version.
    pub fn activate(&mut self) -> Vec<String> {
        let stale = self
            .caches
            .keys()
            .filter(|name| name.as_str() != CACHE_NAME)
            .cloned()
            .collect::<Vec<_>>();
        for name in &stale {
            tracing::info!(cache = %name, "deleting old cache");
            self.caches.remove(name);
        }
        stale
    }

    pub fn lookup(&self, path: &str) -> Option<&Asset> {
        self.caches.values().find_map(|cache| cache.get(path))
    }

    pub fn respond(&mut self, path: &str, source: &dyn AssetSource) -> (Asset, Served) {
        if let Some(asset) = self.lookup(path) {
            return (asset.clone(), Served::Cache);
        }

        match source.fetch(path) {
            Ok(asset) => {
                if asset.status == 200 {
                    self.insert_into(CACHE_NAME, path, asset.clone());
                }
                (asset, Served::Network)
            }
            Err(err) => {
                tracing::warn!(path, error = %err, "network fetch failed; serving root document");
                let fallback = self
                    .lookup(ROOT_DOCUMENT)
                    .cloned()
                    .unwrap_or_else(Asset::not_found);
                (fallback, Served::Fallback)
            }
        }
    }
}

const INDEX_HTML: &str = include_str!("../web/index.html");
const STYLE_CSS: &str = include_str!("../web/style.css");
const APP_JS: &str = include_str!("../web/app.js");
const MANIFEST_JSON: &str = include_str!("../web/manifest.json");

/// Static files compiled into the binary.
pub struct EmbeddedAssets;

impl AssetSource for EmbeddedAssets {
    fn fetch(&self, path: &str) -> Result<Asset, FetchError> {
        let asset = match path {
            "/" | "/index.html" => Asset::ok("text/html; charset=utf-8", INDEX_HTML),
            "/style.css" => Asset::ok("text/css; charset=utf-8", STYLE_CSS),
            "/app.js" => Asset::ok("text/javascript; charset=utf-8", APP_JS),
            "/manifest.json" => Asset::ok("application/manifest+json", MANIFEST_JSON),
            _ => Asset::not_found(),
        };
        Ok(asset)
    }
}

/// Files read from a directory on disk, such as a checkout of `web/`.
pub struct DirAssets {
    root: PathBuf,
}

impl DirAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn unavailable(&self, source: io::Error) -> FetchError {
        FetchError::Unavailable {
            root: self.root.clone(),
            source,
        }
    }
}

impl AssetSource for DirAssets {
    fn fetch(&self, path: &str) -> Result<Asset, FetchError> {
        if !self.root.is_dir() {
            return Err(self.unavailable(io::Error::new(
                io::ErrorKind::NotFound,
                "directory is missing",
            )));
        }

        let relative = match path.trim_start_matches('/') {
            "" => "index.html",
            other => other,
        };
        if relative
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Ok(Asset::not_found());
        }

        let file = self.root.join(relative);
        if !file.is_file() {
            return Ok(Asset::not_found());
        }
        match fs::read(&file) {
            Ok(body) => Ok(Asset::ok(content_type_for(relative), body)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Asset::not_found()),
            Err(err) => Err(self.unavailable(err)),
        }
    }
}

fn content_type_for(relative: &str) -> &'static str {
    if relative == "manifest.json" {
        return "application/manifest+json";
    }
    match Path::new(relative).extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct CountingSource {
        calls: Cell<usize>,
        online: bool,
    }

    impl AssetSource for CountingSource {
        fn fetch(&self, path: &str) -> Result<Asset, FetchError> {
            self.calls.set(self.calls.get() + 1);
            if !self.online {
                return Err(FetchError::Unavailable {
                    root: PathBuf::from("/offline"),
                    source: io::Error::new(io::ErrorKind::NotConnected, "offline"),
                });
            }
            EmbeddedAssets.fetch(path)
        }
    }

    #[test]
    fn install_tolerates_missing_icons() {
        let mut cache = AssetCache::new();
        let cached = cache.install(&EmbeddedAssets);
        assert_eq!(cached, 5);
        assert!(cache.lookup("/icon-192.png").is_none());
        assert!(cache.lookup("/style.css").is_some());
    }

    #[test]
    fn serves_cache_first() {
        let mut cache = AssetCache::new();
        cache.install(&EmbeddedAssets);
        let source = CountingSource {
            calls: Cell::new(0),
            online: true,
        };
        let (asset, served) = cache.respond("/app.js", &source);
        assert_eq!(served, Served::Cache);
        assert_eq!(asset.status, 200);
        assert_eq!(source.calls.get(), 0);
    }

    #[test]
    fn network_results_are_cached_only_when_ok() {
        let mut cache = AssetCache::new();
        let source = CountingSource {
            calls: Cell::new(0),
            online: true,
        };
        let (_, served) = cache.respond("/style.css", &source);
        assert_eq!(served, Served::Network);
        let (_, served) = cache.respond("/style.css", &source);
        assert_eq!(served, Served::Cache);

        let (asset, _) = cache.respond("/missing", &source);
        assert_eq!(asset.status, 404);
        assert!(cache.lookup("/missing").is_none());
    }

    #[test]
    fn offline_requests_fall_back_to_root_document() {
        let mut cache = AssetCache::new();
        cache.install(&EmbeddedAssets);
        let offline = CountingSource {
            calls: Cell::new(0),
            online: false,
        };
        let (asset, served) = cache.respond("/api/unknown", &offline);
        assert_eq!(served, Served::Fallback);
        assert_eq!(asset.content_type, "text/html; charset=utf-8");

        let mut empty = AssetCache::new();
        let (asset, served) = empty.respond("/", &offline);
        assert_eq!(served, Served::Fallback);
        assert_eq!(asset.status, 404);
    }

    #[test]
    fn activate_drops_old_versions() {
        let mut cache = AssetCache::new();
        cache.insert_into("vibekit-v2", "/app.js", Asset::ok("text/javascript", "old"));
        cache.install(&EmbeddedAssets);
        let removed = cache.activate();
        assert_eq!(removed, vec!["vibekit-v2".to_string()]);
        assert_eq!(cache.cache_names(), vec![CACHE_NAME.to_string()]);
        assert_ne!(
            cache.lookup("/app.js").map(|asset| asset.body.clone()),
            Some(b"old".to_vec())
        );
    }

    #[test]
    fn dir_assets_serve_files_with_content_types() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("index.html"), "<h1>local</h1>").expect("write index");
        fs::write(dir.path().join("app.js"), "run()").expect("write js");
        let source = DirAssets::new(dir.path());

        let index = source.fetch("/").expect("index");
        assert_eq!(index.status, 200);
        assert_eq!(index.body, b"<h1>local</h1>".to_vec());
        assert_eq!(index.content_type, "text/html; charset=utf-8");
        let script = source.fetch("/app.js").expect("script");
        assert_eq!(script.content_type, "text/javascript; charset=utf-8");

        assert_eq!(source.fetch("/style.css").expect("missing").status, 404);
        assert_eq!(source.fetch("/../secret").expect("escape").status, 404);
    }

    #[test]
    fn missing_web_dir_falls_back_to_cached_root_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gone = DirAssets::new(dir.path().join("gone"));
        assert!(matches!(
            gone.fetch("/app.js"),
            Err(FetchError::Unavailable { .. })
        ));

        let mut cache = AssetCache::new();
        cache.insert_into(CACHE_NAME, ROOT_DOCUMENT, Asset::ok("text/html", "shell"));
        let (asset, served) = cache.respond("/app.js", &gone);
        assert_eq!(served, Served::Fallback);
        assert_eq!(asset.body, b"shell".to_vec());

        let mut empty = AssetCache::new();
        assert_eq!(empty.install(&gone), 0);
        assert_eq!(empty.respond("/", &gone).0.status, 404);
    }
}
