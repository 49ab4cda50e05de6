use std::{
    cell::RefCell,
    collections::HashMap,
    fs,
    io::{Cursor, Read},
    path::PathBuf,
    rc::Rc,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::{EvalError, EvalResult},
    http::HttpClient,
    project::{self, Checksums, Project, ResolvedDependency},
    resolver::{ModuleKey, ModuleKeyFactory, PathElement, ResolveContext, ResolvedModule},
    uri::{ModuleUri, PackageUri},
};

/// The metadata document served at a package's base URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageMetadata {
    package_zip_url: String,
    #[serde(default)]
    package_zip_checksums: Option<Checksums>,
}

/// The unpacked contents of one package archive.
///
/// File paths are keyed with a leading `/`, matching the fragment path
/// of package URIs.
#[derive(Debug, Default)]
pub struct PackageArchive {
    files: IndexMap<String, Vec<u8>>,
}

impl PackageArchive {
    fn parse_zip(bytes: &[u8], label: &str) -> EvalResult<Self> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| EvalError::io(format!("Cannot read package archive for `{label}`: {e}.")))?;
        let mut files = IndexMap::new();
        for index in 0..zip.len() {
            let mut file = zip
                .by_index(index)
                .map_err(|e| EvalError::io(format!("Cannot read package archive for `{label}`: {e}.")))?;
            if file.is_dir() {
                continue;
            }
            let name = format!("/{}", file.name().trim_start_matches('/'));
            let mut contents = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
            file.read_to_end(&mut contents)
                .map_err(|e| EvalError::io(format!("Cannot read package archive for `{label}`: {e}.")))?;
            files.insert(name, contents);
        }
        Ok(Self { files })
    }

    #[must_use]
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    #[must_use]
    pub fn has(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Lists the direct children of a directory path within the archive.
    #[must_use]
    pub fn list(&self, dir: &str) -> Vec<PathElement> {
        let prefix = if dir.ends_with('/') {
            dir.to_owned()
        } else {
            format!("{dir}/")
        };
        let mut out: Vec<PathElement> = Vec::new();
        for path in self.files.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            let element = match rest.split_once('/') {
                Some((head, _)) => PathElement::directory(head),
                None => PathElement::file(rest),
            };
            if !out.iter().any(|e| e.name == element.name) {
                out.push(element);
            }
        }
        out.sort();
        out
    }
}

/// Downloads, verifies, caches, and unpacks package archives.
///
/// Archives are memoized in memory per store and, when a cache
/// directory is configured, kept on disk across processes.
#[derive(Debug)]
pub struct PackageStore {
    http: Rc<HttpClient>,
    cache_dir: Option<PathBuf>,
    archives: RefCell<HashMap<String, Rc<PackageArchive>>>,
}

impl PackageStore {
    #[must_use]
    pub fn new(http: Rc<HttpClient>, cache_dir: Option<PathBuf>) -> Rc<Self> {
        Rc::new(Self {
            http,
            cache_dir,
            archives: RefCell::new(HashMap::new()),
        })
    }

    /// Returns the unpacked archive for `pkg`, fetching it if needed.
    ///
    /// `declared_checksum` comes from the project's dependency manifest;
    /// when present, the fetched bytes must hash to it.
    pub fn archive(
        &self,
        ctx: &ResolveContext<'_>,
        pkg: &PackageUri,
        declared_checksum: Option<&str>,
    ) -> EvalResult<Rc<PackageArchive>> {
        let canonical = pkg.canonical();
        if let Some(archive) = self.archives.borrow().get(&canonical) {
            return Ok(Rc::clone(archive));
        }
        let bytes = self.archive_bytes(ctx, pkg, declared_checksum)?;
        let archive = Rc::new(PackageArchive::parse_zip(&bytes, &canonical)?);
        self.archives.borrow_mut().insert(canonical, Rc::clone(&archive));
        Ok(archive)
    }

    fn archive_bytes(
        &self,
        ctx: &ResolveContext<'_>,
        pkg: &PackageUri,
        declared_checksum: Option<&str>,
    ) -> EvalResult<Vec<u8>> {
        if let Some(path) = self.cached_zip_path(pkg) {
            if let Ok(bytes) = fs::read(&path) {
                if let Some(declared) = declared_checksum {
                    project::verify_checksum(&bytes, declared, &pkg.name)?;
                }
                return Ok(bytes);
            }
        }
        ctx.limits.check_deadline()?;
        let metadata_text = self.http.get_string(&pkg.metadata_url(), ctx.limits.deadline())?;
        let metadata: PackageMetadata = serde_json::from_str(&metadata_text).map_err(|e| {
            EvalError::resolve(format!(
                "Cannot parse package metadata for `{}`: {e}.",
                pkg.canonical()
            ))
        })?;
        ctx.limits.check_deadline()?;
        let bytes = self.http.get_bytes(&metadata.package_zip_url, ctx.limits.deadline())?;
        match (declared_checksum, &metadata.package_zip_checksums) {
            (Some(declared), _) => project::verify_checksum(&bytes, declared, &pkg.name)?,
            (None, Some(checksums)) => project::verify_checksum(&bytes, &checksums.sha256, &pkg.name)?,
            (None, None) => {}
        }
        if let Some(path) = self.cached_zip_path(pkg) {
            // Cache write failures are not fatal; the archive is already
            // verified in memory.
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = fs::write(&path, &bytes);
        }
        Ok(bytes)
    }

    fn cached_zip_path(&self, pkg: &PackageUri) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        Some(
            dir.join(&pkg.host)
                .join(format!("{}@{}.zip", pkg.name.replace('/', "~"), pkg.version)),
        )
    }
}

/// Loads `package:` and `projectpackage:` modules from package archives.
#[derive(Debug)]
pub struct PackageModuleKeyFactory {
    store: Rc<PackageStore>,
    project: Option<Rc<Project>>,
}

impl PackageModuleKeyFactory {
    #[must_use]
    pub fn new(store: Rc<PackageStore>, project: Option<Rc<Project>>) -> Self {
        Self { store, project }
    }
}

impl ModuleKeyFactory for PackageModuleKeyFactory {
    fn create(&self, uri: &ModuleUri) -> Option<Box<dyn ModuleKey>> {
        matches!(uri.scheme(), "package" | "projectpackage").then(|| {
            Box::new(PackageModuleKey {
                uri: uri.clone(),
                store: Rc::clone(&self.store),
                project: self.project.clone(),
            }) as Box<dyn ModuleKey>
        })
    }
}

#[derive(Debug)]
struct PackageModuleKey {
    uri: ModuleUri,
    store: Rc<PackageStore>,
    project: Option<Rc<Project>>,
}

impl PackageModuleKey {
    /// The declared checksum for this package, looked up through the
    /// project for `projectpackage:` URIs.
    fn declared_checksum(&self, pkg: &PackageUri) -> EvalResult<Option<String>> {
        if pkg.scheme != "projectpackage" {
            return Ok(None);
        }
        let Some(project) = &self.project else {
            return Err(EvalError::resolve(format!(
                "Cannot resolve `{}` outside a project.",
                self.uri
            )));
        };
        match project.deps.find(pkg) {
            Some(ResolvedDependency::Remote { checksums, .. }) => Ok(Some(checksums.sha256.clone())),
            Some(ResolvedDependency::Local { .. }) => Err(EvalError::resolve(format!(
                "Package `{}` is declared as a local dependency; its modules resolve as `file:` URIs.",
                pkg.canonical()
            ))),
            None => Err(EvalError::resolve(format!(
                "Cannot find package `{}` in `PklProject.deps.json`.",
                pkg.canonical()
            ))),
        }
    }

    fn archive(&self, ctx: &ResolveContext<'_>, pkg: &PackageUri) -> EvalResult<Rc<PackageArchive>> {
        let declared = self.declared_checksum(pkg)?;
        self.store.archive(ctx, pkg, declared.as_deref())
    }
}

impl ModuleKey for PackageModuleKey {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> EvalResult<Box<dyn ResolvedModule>> {
        ctx.security.check_module(&self.uri)?;
        let pkg = PackageUri::parse(&self.uri)?;
        let archive = self.archive(ctx, &pkg)?;
        if pkg.path.is_empty() || !archive.has(&pkg.path) {
            return Err(EvalError::io(format!(
                "Cannot find module `{}` in package `{}`.",
                self.uri,
                pkg.canonical()
            )));
        }
        // Canonical form uses the `package:` scheme regardless of how
        // the module was reached.
        let canonical = ModuleUri::parse(&format!("{}#{}", pkg.canonical(), pkg.path))?;
        Ok(Box::new(ResolvedPackageModule {
            uri: canonical,
            archive,
            path: pkg.path,
        }))
    }

    fn is_globbable(&self) -> bool {
        true
    }

    fn has_element(&self, ctx: &ResolveContext<'_>, uri: &ModuleUri) -> EvalResult<bool> {
        let pkg = PackageUri::parse(uri)?;
        Ok(self.archive(ctx, &pkg)?.has(&pkg.path))
    }

    fn list_elements(&self, ctx: &ResolveContext<'_>, base: &ModuleUri) -> EvalResult<Vec<PathElement>> {
        ctx.security.check_module(base)?;
        let pkg = PackageUri::parse(base)?;
        let dir = if pkg.path.is_empty() { "/" } else { &pkg.path };
        Ok(self.archive(ctx, &pkg)?.list(dir))
    }
}

#[derive(Debug)]
struct ResolvedPackageModule {
    uri: ModuleUri,
    archive: Rc<PackageArchive>,
    path: String,
}

impl ResolvedModule for ResolvedPackageModule {
    fn uri(&self) -> &ModuleUri {
        &self.uri
    }

    fn load_source(&self, _ctx: &ResolveContext<'_>) -> EvalResult<String> {
        let bytes = self
            .archive
            .file(&self.path)
            .expect("existence checked during resolution");
        String::from_utf8(bytes.to_vec())
            .map_err(|e| EvalError::io(format!("Module `{}` is not UTF-8: {e}.", self.uri)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive_from(entries: &[(&str, &str)]) -> PackageArchive {
        let mut files = IndexMap::new();
        for (path, contents) in entries {
            files.insert((*path).to_owned(), contents.as_bytes().to_vec());
        }
        PackageArchive { files }
    }

    #[test]
    fn listing_distinguishes_files_and_directories() {
        let archive = archive_from(&[
            ("/Bird.pkl", "x = 1"),
            ("/catalog/Ostrich.pkl", "y = 2"),
            ("/catalog/deep/Egg.pkl", "z = 3"),
        ]);
        let elements = archive.list("/");
        assert_eq!(
            elements,
            vec![PathElement::file("Bird.pkl"), PathElement::directory("catalog")]
        );
        let nested = archive.list("/catalog");
        assert_eq!(
            nested,
            vec![PathElement::file("Ostrich.pkl"), PathElement::directory("deep")]
        );
    }

    #[test]
    fn file_lookup_uses_fragment_paths() {
        let archive = archive_from(&[("/Bird.pkl", "x = 1")]);
        assert!(archive.has("/Bird.pkl"));
        assert_eq!(archive.file("/Bird.pkl"), Some("x = 1".as_bytes()));
        assert!(!archive.has("/Missing.pkl"));
    }
}
