// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory construction of plugin package archives.

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};

/// Builds a gzip tar plugin package from a manifest and a set of files.
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    manifest: Value,
    files: Vec<(String, Vec<u8>)>,
    nested: Option<String>,
    raw_manifest: Option<Vec<u8>>,
}

impl PackageBuilder {
    /// A minimal manifest that validates without warnings.
    pub fn new(id: &str, version: &str) -> Self {
        Self {
            manifest: json!({
                "id": id,
                "name": id,
                "version": version,
                "description": format!("{id} test plugin"),
                "author": "Plinth Contributors",
                "license": "MIT",
                "category": "utility",
                "permissions": [],
                "routes": [],
                "hooks": [],
                "main": "index.wasm"
            }),
            files: Vec::new(),
            nested: None,
            raw_manifest: None,
        }
    }

    /// `hello-world` 1.0.0 with one unauthenticated `GET /hello` route.
    pub fn hello_world() -> Self {
        Self::new("hello-world", "1.0.0").route("GET", "/hello", "routes/hello.wasm")
    }

    pub fn route(self, method: &str, path: &str, handler: &str) -> Self {
        self.route_decl(json!({ "method": method, "path": path, "handler": handler }))
    }

    /// Appends a full route declaration.
    pub fn route_decl(mut self, decl: Value) -> Self {
        push(&mut self.manifest, "routes", decl);
        self
    }

    pub fn hook(mut self, name: &str, handler: &str, priority: Option<i32>) -> Self {
        let mut decl = json!({ "name": name, "handler": handler });
        if let Some(priority) = priority {
            decl["priority"] = json!(priority);
        }
        push(&mut self.manifest, "hooks", decl);
        self
    }

    pub fn permission(mut self, permission: &str) -> Self {
        push(&mut self.manifest, "permissions", json!(permission));
        self
    }

    /// Sets any top-level manifest field.
    pub fn set(mut self, key: &str, value: Value) -> Self {
        self.manifest[key] = value;
        self
    }

    /// Removes a top-level manifest field.
    pub fn remove(mut self, key: &str) -> Self {
        if let Some(map) = self.manifest.as_object_mut() {
            map.remove(key);
        }
        self
    }

    /// Adds a file at `path` relative to the plugin root.
    pub fn file(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.to_string(), contents.into()));
        self
    }

    /// Places everything under a single top-level directory.
    pub fn nested(mut self, dir: &str) -> Self {
        self.nested = Some(dir.to_string());
        self
    }

    /// Replaces the manifest file with arbitrary bytes.
    pub fn raw_manifest(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.raw_manifest = Some(bytes.into());
        self
    }

    pub fn manifest(&self) -> &Value {
        &self.manifest
    }

    pub fn id(&self) -> String {
        self.manifest["id"].as_str().unwrap_or("plugin").to_string()
    }

    /// Encodes the package as gzip tar bytes.
    pub fn to_bytes(&self) -> std::io::Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut archive = tar::Builder::new(encoder);

        let manifest = match &self.raw_manifest {
            Some(raw) => raw.clone(),
            None => serde_json::to_vec_pretty(&self.manifest)?,
        };
        let mut entries = vec![("plugin.json".to_string(), manifest)];
        entries.extend(self.files.iter().cloned());

        for (path, contents) in entries {
            let full = match &self.nested {
                Some(dir) => format!("{dir}/{path}"),
                None => path,
            };
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            archive.append_data(&mut header, &full, contents.as_slice())?;
        }

        let mut encoder = archive.into_inner()?;
        encoder.flush()?;
        encoder.finish()
    }

    /// Writes `<id>-<version>.tar.gz` into `dir` and returns its path.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let version = self.manifest["version"].as_str().unwrap_or("0.0.0");
        let path = dir.join(format!("{}-{version}.tar.gz", self.id()));
        std::fs::write(&path, self.to_bytes()?)?;
        Ok(path)
    }
}

fn push(manifest: &mut Value, key: &str, item: Value) {
    match manifest.get_mut(key).and_then(Value::as_array_mut) {
        Some(items) => items.push(item),
        None => manifest[key] = json!([item]),
    }
}
