//! Shared fixtures: a temporary template directory, a cache directory and a
//! scripted compiler that records every invocation.

#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use quire::{
    application::render::{RenderPipeline, RenderService},
    infra::{
        artifacts::FsArtifactStore, compiler::ProcessCompiler, engine::LatexTemplateEngine,
        templates::FsTemplateResolver,
    },
};
use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
    pub templates: PathBuf,
    pub cache: PathBuf,
    pub compile_log: PathBuf,
    pub store: Arc<FsArtifactStore>,
    pub service: Arc<RenderService>,
}

impl Fixture {
    /// Number of times the fake compiler has been launched.
    pub fn compile_count(&self) -> usize {
        fs::read_to_string(&self.compile_log)
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }

    pub fn cache_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.cache)
            .expect("read cache dir")
            .map(|entry| {
                entry
                    .expect("cache entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        names
    }
}

/// A compiler that copies stdin behind a PDF header, or fails with exit 43
/// when the intermediate text contains `FAIL`.
fn write_fake_compiler(dir: &Path, log: &Path) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
set -eu
echo run >> "{log}"
out=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    -o)
      shift
      out="$1"
      ;;
  esac
  shift
done
input="$(cat)"
case "$input" in
  *FAIL*)
    echo "! LaTeX Error: forced failure" >&2
    exit 43
    ;;
esac
printf '%%PDF-1.7\n%s' "$input" > "$out"
"#,
        log = log.display()
    );
    let path = dir.join("fake-pandoc");
    fs::write(&path, script).expect("write fake compiler");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("set perms");
    path
}

pub fn fixture(templates: &[(&str, &str)]) -> Fixture {
    let dir = TempDir::new().expect("temp dir");
    let template_dir = dir.path().join("templates");
    let cache = dir.path().join("cache");
    let compile_log = dir.path().join("compiles.log");
    fs::create_dir_all(&template_dir).expect("template dir");
    for (id, source) in templates {
        fs::write(template_dir.join(format!("{id}.tex")), source).expect("write template");
    }

    let program = write_fake_compiler(dir.path(), &compile_log);
    let compiler = ProcessCompiler::new(
        program,
        vec![
            "--from=latex".to_string(),
            "--to=pdf".to_string(),
            "-o".to_string(),
            "{output}".to_string(),
        ],
        Duration::from_secs(20),
    )
    .with_signature(Some("%PDF-".to_string()));

    let store = Arc::new(FsArtifactStore::open(&cache, "pdf").expect("open store"));
    let pipeline = RenderPipeline::new(
        Arc::new(FsTemplateResolver::new(&template_dir)),
        Arc::new(LatexTemplateEngine::new(Some(template_dir.clone())).expect("engine")),
        Arc::new(compiler),
        store.clone(),
    );

    Fixture {
        dir,
        templates: template_dir,
        cache,
        compile_log,
        store,
        service: Arc::new(RenderService::new(pipeline)),
    }
}
