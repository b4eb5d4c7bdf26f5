//! Shared fixture: a fake system tree, a package database and a rule tree,
//! all inside one temporary directory.

#![allow(dead_code)]

use camino::Utf8PathBuf;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use tempfile::TempDir;

pub struct Fixture {
    _temp: TempDir,
    /// Scanned system tree
    pub root: Utf8PathBuf,
    /// Installed package database (VDB layout)
    pub vdb: Utf8PathBuf,
    /// Ignore rule tree
    pub rules: Utf8PathBuf,
    /// Cache directory
    pub cache: Utf8PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let base = Utf8PathBuf::try_from(temp.path().canonicalize().unwrap()).unwrap();

        let fixture = Self {
            root: base.join("root"),
            vdb: base.join("vdb"),
            rules: base.join("rules"),
            cache: base.join("cache"),
            _temp: temp,
        };
        for dir in [&fixture.root, &fixture.vdb, &fixture.rules, &fixture.cache] {
            fs::create_dir_all(dir).unwrap();
        }
        fixture
    }

    /// Absolute path of `rel` inside the system tree
    pub fn sys(&self, rel: &str) -> Utf8PathBuf {
        self.root.join(rel)
    }

    /// Create a file (and its parents) in the system tree
    pub fn touch(&self, rel: &str) -> Utf8PathBuf {
        let path = self.sys(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, rel).unwrap();
        path
    }

    /// Register package `category/pf` owning the given system-tree paths;
    /// entries ending in `/` are directories
    pub fn install(&self, package: &str, owned: &[&str]) {
        let dir = self.vdb.join(package);
        fs::create_dir_all(&dir).unwrap();

        let contents: String = owned
            .iter()
            .map(|rel| match rel.strip_suffix('/') {
                Some(d) => format!("dir {}\n", self.sys(d)),
                None => format!("obj {} d41d8cd98f00b204e9800998ecf8427e 0\n", self.sys(rel)),
            })
            .collect();
        fs::write(dir.join("CONTENTS"), contents).unwrap();
    }

    /// Write a plain rule file below the rule tree
    pub fn rule_file(&self, rel: &str, content: &str) -> Utf8PathBuf {
        let path = self.rules.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    /// Write an executable rule generator below the rule tree
    pub fn generator(&self, rel: &str, script: &str) -> Utf8PathBuf {
        let path = self.rule_file(rel, &format!("#!/bin/sh\n{}\n", script));
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Rule anchored at the system tree root: `^<root><suffix>`
    pub fn anchored(&self, suffix: &str) -> String {
        format!("^{}{}", regex::escape(self.root.as_str()), suffix)
    }

    pub fn relative<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(self.root.as_str()).unwrap_or(path)
    }
}
