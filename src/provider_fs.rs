//! Export-directory source provider.
//!
//! Reads object sources from a tree written by an upstream DDL export job,
//! laid out as `<schema>/<KIND>/<name>.sql`. Kind directories use the
//! underscore spelling (`PACKAGE_BODY`). File modification times stand in
//! for the object's last DDL time.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use sourcewatch_core::cadence::ObjectQuery;
use sourcewatch_core::models::{ObjectId, ObjectKind, TrackedObject};

use crate::config::SourceConfig;
use crate::traits::SourceProvider;

pub struct ExportDirProvider {
    root: PathBuf,
    include_set: GlobSet,
    exclude_set: GlobSet,
}

impl ExportDirProvider {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let mut default_excludes = vec!["**/.git/**".to_string()];
        default_excludes.extend(config.exclude_globs.clone());

        Ok(Self {
            root: config.root.clone(),
            include_set: build_globset(&config.include_globs)?,
            exclude_set: build_globset(&default_excludes)?,
        })
    }

    fn scan(&self, query: &ObjectQuery, now: NaiveDateTime) -> Result<Vec<TrackedObject>> {
        if !self.root.exists() {
            bail!("Source export root does not exist: {}", self.root.display());
        }

        let since = query.modified_since(now);
        let mut objects = Vec::new();

        for entry in WalkDir::new(&self.root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude_set.is_match(&rel_str) || !self.include_set.is_match(&rel_str) {
                continue;
            }

            let Some(id) = parse_object_path(relative) else {
                tracing::debug!("Ignoring file outside the export layout: {}", rel_str);
                continue;
            };

            if !query.matches_name(&id.name) {
                continue;
            }

            let last_modified = modified_time(path)?;
            if let (Some(since), Some(modified)) = (since, last_modified) {
                if modified < since {
                    continue;
                }
            }

            objects.push(TrackedObject { id, last_modified });
        }

        // Dictionary order: schema, kind, name
        objects.sort_by(|a, b| {
            (&a.id.schema, a.id.kind.as_str(), &a.id.name)
                .cmp(&(&b.id.schema, b.id.kind.as_str(), &b.id.name))
        });

        Ok(objects)
    }
}

#[async_trait]
impl SourceProvider for ExportDirProvider {
    fn name(&self) -> String {
        format!("export:{}", self.root.display())
    }

    async fn find_objects(&self, query: &ObjectQuery) -> Result<Vec<TrackedObject>> {
        self.scan(query, Local::now().naive_local())
    }

    async fn fetch_source(&self, id: &ObjectId) -> Result<Option<String>> {
        let path = self.root.join(id.relative_path());
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read source file: {}", path.display()))?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// `<schema>/<KIND>/<name>.sql` → [`ObjectId`]; `None` for any other shape.
///
/// The kind directory must use the exact [`ObjectKind::dir_name`] spelling,
/// since [`ExportDirProvider::fetch_source`] reads from that path.
fn parse_object_path(relative: &Path) -> Option<ObjectId> {
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    let [schema, kind_dir, file] = parts.as_slice() else {
        return None;
    };
    let kind: ObjectKind = kind_dir.parse().ok()?;
    if kind.dir_name() != *kind_dir {
        tracing::warn!(
            "Ignoring {}: kind directory must be spelled '{}'",
            relative.display(),
            kind.dir_name()
        );
        return None;
    }
    let name = Path::new(file).file_stem()?.to_str()?;
    if name.is_empty() {
        return None;
    }
    Some(ObjectId::new(*schema, name, kind))
}

fn modified_time(path: &Path) -> Result<Option<NaiveDateTime>> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat source file: {}", path.display()))?;
    Ok(metadata
        .modified()
        .ok()
        .map(|t| DateTime::<Local>::from(t).naive_local()))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn provider(root: &Path, excludes: &[&str]) -> ExportDirProvider {
        ExportDirProvider::new(&SourceConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.sql".to_string()],
            exclude_globs: excludes.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
    }

    fn full() -> ObjectQuery {
        ObjectQuery {
            name_prefix: String::new(),
            lookback_days: 3,
            full_scan: true,
        }
    }

    #[test]
    fn test_parse_object_path() {
        let id = parse_object_path(Path::new("APP/PACKAGE_BODY/PKG_ORDERS.sql")).unwrap();
        assert_eq!(id, ObjectId::new("APP", "PKG_ORDERS", ObjectKind::PackageBody));
        assert!(parse_object_path(Path::new("APP/TABLE/T.sql")).is_none());
        assert!(parse_object_path(Path::new("APP/P.sql")).is_none());
        assert!(parse_object_path(Path::new("APP/x/PROCEDURE/P.sql")).is_none());
    }

    #[test]
    fn test_parse_rejects_non_canonical_kind_dirs() {
        assert!(parse_object_path(Path::new("APP/procedure/P_LOW.sql")).is_none());
        assert!(parse_object_path(Path::new("APP/PACKAGE BODY/PKG.sql")).is_none());
        assert!(parse_object_path(Path::new("APP/Package_Body/PKG.sql")).is_none());
    }

    #[tokio::test]
    async fn test_every_listed_object_is_fetchable() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "APP/procedure/P_LOW.sql", "procedure p_low");
        write(tmp.path(), "APP/PACKAGE BODY/PKG.sql", "package body pkg");
        write(tmp.path(), "APP/PACKAGE_BODY/PKG_OK.sql", "package body pkg_ok");

        let p = provider(tmp.path(), &[]);
        let objects = p.find_objects(&full()).await.unwrap();
        let ids: Vec<String> = objects.iter().map(|o| o.id.to_string()).collect();
        assert_eq!(ids, vec!["APP.PKG_OK (PACKAGE BODY)"]);
        for object in &objects {
            assert!(p.fetch_source(&object.id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_find_objects_layout_and_order() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "APP/VIEW/V_ORDERS.sql", "view v_orders as select 1 from dual");
        write(tmp.path(), "APP/FUNCTION/F_TOTAL.sql", "function f_total return number");
        write(tmp.path(), "APP/README.txt", "not an object");
        write(tmp.path(), "APP/TABLE/T_ORDERS.sql", "unsupported kind");
        write(tmp.path(), "ARCHIVE/PROCEDURE/P_OLD.sql", "procedure p_old");

        let p = provider(tmp.path(), &["ARCHIVE/**"]);
        let objects = p.find_objects(&full()).await.unwrap();
        let ids: Vec<String> = objects.iter().map(|o| o.id.to_string()).collect();
        assert_eq!(ids, vec!["APP.F_TOTAL (FUNCTION)", "APP.V_ORDERS (VIEW)"]);
        assert!(objects.iter().all(|o| o.last_modified.is_some()));
    }

    #[tokio::test]
    async fn test_name_prefix_filter() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "APP/PROCEDURE/XX_LOAD.sql", "procedure xx_load");
        write(tmp.path(), "APP/PROCEDURE/YY_LOAD.sql", "procedure yy_load");

        let query = ObjectQuery {
            name_prefix: "XX".to_string(),
            ..full()
        };
        let objects = provider(tmp.path(), &[]).find_objects(&query).await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id.name, "XX_LOAD");
    }

    #[test]
    fn test_lookback_excludes_old_files() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "APP/PROCEDURE/P.sql", "procedure p");
        let p = provider(tmp.path(), &[]);

        let recent = ObjectQuery {
            full_scan: false,
            ..full()
        };
        let now = Local::now().naive_local();
        assert_eq!(p.scan(&recent, now).unwrap().len(), 1);

        // Pretend the scan runs well after the file was last touched.
        assert!(p.scan(&recent, now + Duration::days(10)).unwrap().is_empty());
        assert_eq!(p.scan(&full(), now + Duration::days(10)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_source() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "APP/TRIGGER/TRG_AUDIT.sql", "trigger trg_audit\r\nbefore insert");
        let p = provider(tmp.path(), &[]);

        let id = ObjectId::new("APP", "TRG_AUDIT", ObjectKind::Trigger);
        let text = p.fetch_source(&id).await.unwrap().unwrap();
        assert!(text.starts_with("trigger trg_audit"));

        let missing = ObjectId::new("APP", "NOPE", ObjectKind::Trigger);
        assert!(p.fetch_source(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp.path().join("absent"), &[]);
        assert!(p.find_objects(&full()).await.is_err());
    }
}
