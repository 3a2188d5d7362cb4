//! Redirect map built from the content repositories' `_redirects.txt` files.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{error, info, warn};

use crate::config::ContentConfig;

use super::locale::VALID_LOCALES;

pub const REDIRECTS_FILE_NAME: &str = "_redirects.txt";

/// Case-insensitive `source -> target` lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectMap {
    entries: HashMap<String, String>,
}

impl RedirectMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries
            .get(&path.to_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add every redirect line of `text`; later sources override earlier ones.
    /// Returns the number of redirect lines read.
    pub fn extend_from_text(&mut self, text: &str) -> usize {
        let mut count = 0;
        for (source, target) in parse_redirect_lines(text) {
            self.entries.insert(source.to_lowercase(), target.to_string());
            count += 1;
        }
        count
    }
}

/// Yield `(source, target)` for lines that start with `/` and contain a tab.
pub fn parse_redirect_lines(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.split('\n')
        .filter(|line| line.starts_with('/'))
        .filter_map(|line| {
            let (source, rest) = line.split_once('\t')?;
            let target = rest.split('\t').next().unwrap_or(rest);
            Some((source, target.trim_end_matches('\r')))
        })
}

/// First existing `_redirects.txt` for `locale` under `base`.
///
/// Tries `base` as given, then resolved against `project_root`.
pub fn find_redirects_file(base: &Path, locale: &str, project_root: &Path) -> Option<PathBuf> {
    let relative = project_root.join(base);
    [
        base.join(locale).join(REDIRECTS_FILE_NAME),
        base.join("files").join(locale).join(REDIRECTS_FILE_NAME),
        relative.join(locale).join(REDIRECTS_FILE_NAME),
        relative.join("files").join(locale).join(REDIRECTS_FILE_NAME),
    ]
    .into_iter()
    .find(|path| path.is_file())
}

/// Build the redirect map from the configured content roots.
///
/// A missing root is logged and skipped; unreadable files are skipped too.
pub fn build_redirects_map(content: &ContentConfig) -> RedirectMap {
    let started = Instant::now();
    let project_root = content
        .project_root
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default();
    let mut map = RedirectMap::new();
    let roots = [
        ("CONTENT_ROOT", content.content_root.as_deref()),
        (
            "CONTENT_TRANSLATED_ROOT",
            content.content_translated_root.as_deref(),
        ),
    ];
    for (name, root) in roots {
        let Some(base) = root else {
            error!("Missing content root: {name}");
            continue;
        };
        info!("{name} = {}", base.display());
        for locale in VALID_LOCALES {
            let locale = locale.to_lowercase();
            let Some(path) = find_redirects_file(base, &locale, &project_root) else {
                continue;
            };
            match fs::read_to_string(&path) {
                Ok(text) => {
                    let count = map.extend_from_text(&text);
                    info!("- {}: {count} redirects", path.display());
                }
                Err(err) => warn!("Skipping {}: {err}", path.display()),
            }
        }
    }
    info!(
        "Built {} redirects in {:?}",
        map.len(),
        started.elapsed()
    );
    map
}
