use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, EvalResult};

/// An absolute module or resource URI.
///
/// Stores the normalized text plus the scheme boundary. Hierarchical
/// URIs (`scheme://authority/path#fragment`) and opaque URIs
/// (`pkl:base`, `repl:text`) are both supported; path normalization
/// removes `.` and `..` segments at construction time so that cache
/// keys are content-addressed by the normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleUri {
    raw: String,
    scheme_end: usize,
}

impl ModuleUri {
    /// Parses an absolute URI. A missing scheme is the "relative URI at
    /// top level" resolve error.
    pub fn parse(text: &str) -> EvalResult<Self> {
        let Some(scheme_end) = find_scheme_end(text) else {
            return Err(EvalError::resolve(format!(
                "Cannot resolve `{text}`: relative module URIs are only allowed inside a module."
            )));
        };
        let raw = normalize_uri(text, scheme_end);
        Ok(Self { raw, scheme_end })
    }

    /// Builds a normalized `file:` URI from a filesystem path.
    #[must_use]
    pub fn from_file_path(path: &Path) -> Self {
        let mut text = String::from("file://");
        let p = path.to_string_lossy();
        if !p.starts_with('/') {
            text.push('/');
        }
        text.push_str(&p);
        Self::parse(&text).expect("file URIs are absolute")
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.raw[..self.scheme_end]
    }

    /// Everything after the `scheme:` prefix.
    #[must_use]
    pub fn scheme_specific(&self) -> &str {
        &self.raw[self.scheme_end + 1..]
    }

    /// The authority component of a hierarchical URI (`host[:port]`).
    #[must_use]
    pub fn authority(&self) -> Option<&str> {
        let rest = self.scheme_specific();
        let rest = rest.strip_prefix("//")?;
        let end = rest.find(['/', '#']).unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// The path component, excluding authority and fragment.
    #[must_use]
    pub fn path(&self) -> &str {
        let rest = self.scheme_specific();
        let rest = match rest.strip_prefix("//") {
            Some(after) => {
                let offset = after.find(['/', '#']).unwrap_or(after.len());
                &after[offset..]
            }
            None => rest,
        };
        let end = rest.find('#').unwrap_or(rest.len());
        &rest[..end]
    }

    /// The fragment component, without the leading `#`.
    #[must_use]
    pub fn fragment(&self) -> Option<&str> {
        self.raw.split_once('#').map(|(_, f)| f)
    }

    /// Whether the URI carries a hierarchical path that relative
    /// references can resolve against.
    #[must_use]
    pub fn is_hierarchical(&self) -> bool {
        self.scheme_specific().contains('/')
    }

    /// Resolves an import target against this URI.
    ///
    /// Absolute targets parse on their own; targets starting with a
    /// path merge against this URI's directory (with dot-segment
    /// normalization). Opaque base URIs cannot anchor relative targets.
    pub fn resolve_import(&self, target: &str) -> EvalResult<Self> {
        if find_scheme_end(target).is_some() {
            return Self::parse(target);
        }
        if !self.is_hierarchical() {
            return Err(EvalError::resolve(format!(
                "Cannot resolve `{target}` against non-hierarchical URI `{}`.",
                self.raw
            )));
        }
        // Fragment-bearing URIs (packages) resolve within the fragment path.
        if let Some((head, frag)) = self.raw.split_once('#') {
            let base_dir = &frag[..frag.rfind('/').map_or(0, |i| i + 1)];
            let merged = format!("{head}#{}", normalize_path(&merge_path(base_dir, target)));
            return Ok(Self {
                raw: merged,
                scheme_end: self.scheme_end,
            });
        }
        let path = self.path();
        let dir = &path[..path.rfind('/').map_or(0, |i| i + 1)];
        let merged = merge_path(dir, target);
        let mut raw = self.raw[..self.path_start()].to_owned();
        raw.push_str(&merged);
        Self::parse(&raw)
    }

    /// Byte offset where the path component begins.
    fn path_start(&self) -> usize {
        let rest = self.scheme_specific();
        match rest.strip_prefix("//") {
            Some(after) => {
                let offset = after.find(['/', '#']).unwrap_or(after.len());
                self.scheme_end + 3 + offset
            }
            None => self.scheme_end + 1,
        }
    }

    /// The filesystem path of a `file:` URI.
    #[must_use]
    pub fn file_path(&self) -> Option<PathBuf> {
        if self.scheme() != "file" {
            return None;
        }
        let rest = self.scheme_specific();
        let path = rest.strip_prefix("//").unwrap_or(rest);
        Some(PathBuf::from(path))
    }

    /// The final path segment (file name), if any.
    #[must_use]
    pub fn last_segment(&self) -> Option<&str> {
        let path = self.path();
        let name = path.rsplit('/').next()?;
        (!name.is_empty()).then_some(name)
    }
}

impl fmt::Display for ModuleUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Byte offset of the `:` terminating a scheme, if `text` has one.
///
/// A scheme is `ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )`; anything
/// else (including Windows-style drive letters, which are too short) is
/// treated as a relative reference.
fn find_scheme_end(text: &str) -> Option<usize> {
    let colon = text.find(':')?;
    if colon < 2 {
        return None;
    }
    let candidate = &text[..colon];
    let mut chars = candidate.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    chars
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        .then_some(colon)
}

fn normalize_uri(text: &str, scheme_end: usize) -> String {
    let scheme = text[..scheme_end].to_ascii_lowercase();
    let rest = &text[scheme_end + 1..];
    let (main, fragment) = match rest.split_once('#') {
        Some((m, f)) => (m, Some(f)),
        None => (rest, None),
    };
    let main = match main.strip_prefix("//") {
        Some(after) => {
            let split = after.find('/').unwrap_or(after.len());
            format!("//{}{}", &after[..split], normalize_path(&after[split..]))
        }
        None => normalize_path(main),
    };
    match fragment {
        Some(f) => format!("{scheme}:{main}#{}", normalize_path(f)),
        None => format!("{scheme}:{main}"),
    }
}

fn merge_path(base_dir: &str, target: &str) -> String {
    let mut merged = String::from(base_dir);
    merged.push_str(target);
    normalize_path(&merged)
}

/// Removes `.` segments and resolves `..` segments lexically.
fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let absolute = path.starts_with('/');
    // A trailing dot segment denotes the directory itself.
    let trailing_slash =
        path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..") || path == "." || path == "..";
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            s => segments.push(s),
        }
    }
    let mut out = String::new();
    if absolute {
        out.push('/');
    }
    out.push_str(&segments.join("/"));
    if trailing_slash && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// A decomposed `package:` / `projectpackage:` URI.
///
/// `package://host[:port]/name@version#/path`: the part before the
/// fragment identifies the package (the canonical form used as a
/// dependency key); the fragment path is relative to the package root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageUri {
    pub scheme: String,
    pub host: String,
    pub name: String,
    pub version: String,
    /// Fragment path within the package, always starting with `/` (or
    /// empty when the URI names the bare package).
    pub path: String,
}

impl PackageUri {
    pub fn parse(uri: &ModuleUri) -> EvalResult<Self> {
        let scheme = uri.scheme();
        if scheme != "package" && scheme != "projectpackage" {
            return Err(EvalError::resolve(format!(
                "`{uri}` is not a package URI."
            )));
        }
        let host = uri
            .authority()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| EvalError::resolve(format!("Package URI `{uri}` is missing an authority.")))?;
        let path = uri.path();
        let versioned = path.trim_start_matches('/');
        let (name, version) = versioned.rsplit_once('@').ok_or_else(|| {
            EvalError::resolve(format!(
                "Package URI `{uri}` is missing an `@version` suffix."
            ))
        })?;
        if name.is_empty() || version.is_empty() {
            return Err(EvalError::resolve(format!(
                "Package URI `{uri}` is missing a package name or version."
            )));
        }
        Ok(Self {
            scheme: scheme.to_owned(),
            host: host.to_owned(),
            name: name.to_owned(),
            version: version.to_owned(),
            path: uri.fragment().unwrap_or("").to_owned(),
        })
    }

    /// The canonical `package://…` form identifying the package itself,
    /// used as the key into `PklProject.deps.json`.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("package://{}/{}@{}", self.host, self.name, self.version)
    }

    /// The HTTPS URL serving the package metadata document.
    #[must_use]
    pub fn metadata_url(&self) -> String {
        format!("https://{}/{}@{}", self.host, self.name, self.version)
    }

    /// Rewrites this package URI with a different fragment path.
    #[must_use]
    pub fn with_path(&self, path: &str) -> ModuleUri {
        let raw = format!(
            "{}://{}/{}@{}#{}",
            self.scheme, self.host, self.name, self.version, path
        );
        ModuleUri::parse(&raw).expect("package URI with path is absolute")
    }
}

impl fmt::Display for PackageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}@{}", self.scheme, self.host, self.name, self.version)?;
        if !self.path.is_empty() {
            write!(f, "#{}", self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hierarchical_uri() {
        let uri = ModuleUri::parse("https://example.com:8080/a/b.pkl").unwrap();
        assert_eq!(uri.scheme(), "https");
        assert_eq!(uri.authority(), Some("example.com:8080"));
        assert_eq!(uri.path(), "/a/b.pkl");
        assert_eq!(uri.last_segment(), Some("b.pkl"));
    }

    #[test]
    fn parse_opaque_uri() {
        let uri = ModuleUri::parse("pkl:base").unwrap();
        assert_eq!(uri.scheme(), "pkl");
        assert_eq!(uri.scheme_specific(), "base");
        assert!(!uri.is_hierarchical());
    }

    #[test]
    fn relative_uri_is_rejected_at_top_level() {
        let err = ModuleUri::parse("sibling.pkl").unwrap_err();
        assert!(err.message().contains("relative"));
    }

    #[test]
    fn dot_segments_normalize() {
        let uri = ModuleUri::parse("file:///a/./b/../c.pkl").unwrap();
        assert_eq!(uri.as_str(), "file:///a/c.pkl");
    }

    #[test]
    fn resolving_the_dot_segment_yields_the_directory() {
        let base = ModuleUri::parse("file:///dir/mod.pkl").unwrap();
        let dir = base.resolve_import(".").unwrap();
        assert_eq!(dir.as_str(), "file:///dir/");
        assert_eq!(dir.resolve_import("other.pkl").unwrap().as_str(), "file:///dir/other.pkl");
    }

    #[test]
    fn resolve_relative_import() {
        let base = ModuleUri::parse("file:///dir/mod.pkl").unwrap();
        assert_eq!(base.resolve_import("other.pkl").unwrap().as_str(), "file:///dir/other.pkl");
        assert_eq!(
            base.resolve_import("../up.pkl").unwrap().as_str(),
            "file:///up.pkl"
        );
        assert_eq!(
            base.resolve_import("pkl:base").unwrap().as_str(),
            "pkl:base"
        );
    }

    #[test]
    fn resolve_relative_import_inside_package_fragment() {
        let base = ModuleUri::parse("package://example.com/birds@0.5.0#/dir/Bird.pkl").unwrap();
        let resolved = base.resolve_import("Wing.pkl").unwrap();
        assert_eq!(
            resolved.as_str(),
            "package://example.com/birds@0.5.0#/dir/Wing.pkl"
        );
    }

    #[test]
    fn package_uri_decomposition() {
        let uri = ModuleUri::parse("package://example.com/birds@0.5.0#/Bird.pkl").unwrap();
        let pkg = PackageUri::parse(&uri).unwrap();
        assert_eq!(pkg.host, "example.com");
        assert_eq!(pkg.name, "birds");
        assert_eq!(pkg.version, "0.5.0");
        assert_eq!(pkg.path, "/Bird.pkl");
        assert_eq!(pkg.canonical(), "package://example.com/birds@0.5.0");
    }

    #[test]
    fn file_uri_round_trip() {
        let uri = ModuleUri::from_file_path(Path::new("/tmp/x.pkl"));
        assert_eq!(uri.as_str(), "file:///tmp/x.pkl");
        assert_eq!(uri.file_path().unwrap(), PathBuf::from("/tmp/x.pkl"));
    }
}
