// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server configuration rendering.
//!
//! Templates carry literal placeholder tokens (`BUCKET_NAME`, `KEY_ID`, ...).
//! Rendering replaces every occurrence of every token with its value and
//! writes the result through a temp file that is renamed over the
//! destination, so readers see either the old file or the new one.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Errors from rendering a configuration template.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The template could not be read.
    #[error("failed to read template {path}: {source}")]
    ReadTemplate {
        /// Template path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A known placeholder appears in the template but has no value.
    #[error("no value supplied for placeholder {0}")]
    MissingValue(String),

    /// The rendered file could not be written.
    #[error("failed to write {path}: {source}")]
    WriteOutput {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A configuration file produced from a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    /// Template the file was rendered from
    pub template_path: PathBuf,
    /// Path of the rendered file
    pub path: PathBuf,
    /// Placeholders that occurred in the template and were replaced
    pub substituted: Vec<String>,
}

/// Renders configuration templates with literal placeholder substitution.
#[derive(Debug, Clone, Default)]
pub struct ConfigRenderer {
    known_placeholders: Vec<String>,
}

impl ConfigRenderer {
    /// Create a renderer that refuses to leave any of `known_placeholders` unresolved.
    pub fn new<I, S>(known_placeholders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_placeholders: known_placeholders.into_iter().map(Into::into).collect(),
        }
    }

    /// Substitute placeholders in `text`.
    ///
    /// Every entry in `substitutions` is replaced wherever it occurs in the
    /// template. Values are inserted verbatim and never substituted again,
    /// so the result does not depend on the order of entries. Fails if a
    /// known placeholder occurs in `text` without a value.
    pub fn render_str(
        &self,
        text: &str,
        substitutions: &BTreeMap<String, String>,
    ) -> Result<(String, Vec<String>), RenderError> {
        if let Some(missing) = self
            .known_placeholders
            .iter()
            .find(|token| !substitutions.contains_key(*token) && text.contains(token.as_str()))
        {
            return Err(RenderError::MissingValue(missing.clone()));
        }

        // Single pass over the template: substituted values are never rescanned.
        let mut rendered = String::with_capacity(text.len());
        let mut used = BTreeSet::new();
        let mut rest = text;
        while let Some((at, token, value)) = next_token(rest, substitutions) {
            rendered.push_str(&rest[..at]);
            rendered.push_str(value);
            used.insert(token.to_string());
            rest = &rest[at + token.len()..];
        }
        rendered.push_str(rest);

        let substituted = used.into_iter().collect();
        Ok((rendered, substituted))
    }

    /// Render `template_path` into `destination`, replacing any existing file.
    pub fn render(
        &self,
        template_path: &Path,
        destination: &Path,
        substitutions: &BTreeMap<String, String>,
    ) -> Result<RenderedConfig, RenderError> {
        let text =
            std::fs::read_to_string(template_path).map_err(|source| RenderError::ReadTemplate {
                path: template_path.to_path_buf(),
                source,
            })?;

        let (rendered, substituted) = self.render_str(&text, substitutions)?;

        write_atomic(destination, rendered.as_bytes()).map_err(|source| {
            RenderError::WriteOutput {
                path: destination.to_path_buf(),
                source,
            }
        })?;

        debug!(
            template = %template_path.display(),
            path = %destination.display(),
            substituted = ?substituted,
            "Rendered configuration"
        );

        Ok(RenderedConfig {
            template_path: template_path.to_path_buf(),
            path: destination.to_path_buf(),
            substituted,
        })
    }
}

/// Earliest token occurrence in `text`; the longest token wins a tie.
fn next_token<'a>(
    text: &str,
    substitutions: &'a BTreeMap<String, String>,
) -> Option<(usize, &'a str, &'a str)> {
    substitutions
        .iter()
        .filter(|(token, _)| !token.is_empty())
        .filter_map(|(token, value)| {
            text.find(token.as_str())
                .map(|at| (at, token.as_str(), value.as_str()))
        })
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.len().cmp(&a.1.len())))
}

fn write_atomic(destination: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(destination).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_replaces_all_placeholders() {
        let temp_dir = TempDir::new().unwrap();
        let template = temp_dir.path().join("vault.hcl.tpl");
        std::fs::write(&template, "key=BUCKET_NAME\nother=KEY_ID").unwrap();
        let output = temp_dir.path().join("out").join("vault.hcl");

        let renderer = ConfigRenderer::new(["BUCKET_NAME", "KEY_ID"]);
        let rendered = renderer
            .render(
                &template,
                &output,
                &values(&[("BUCKET_NAME", "b1"), ("KEY_ID", "k1")]),
            )
            .unwrap();

        assert_eq!(std::fs::read_to_string(&output).unwrap(), "key=b1\nother=k1");
        assert_eq!(rendered.substituted, vec!["BUCKET_NAME", "KEY_ID"]);
    }

    #[test]
    fn test_render_replaces_every_occurrence() {
        let renderer = ConfigRenderer::new(["BUCKET_NAME"]);
        let (text, _) = renderer
            .render_str(
                "storage \"s3\" { bucket = \"BUCKET_NAME\" }\n# BUCKET_NAME\n",
                &values(&[("BUCKET_NAME", "b1")]),
            )
            .unwrap();

        assert_eq!(text, "storage \"s3\" { bucket = \"b1\" }\n# b1\n");
    }

    #[test]
    fn test_values_are_not_substituted_again() {
        let renderer = ConfigRenderer::new(["BUCKET_NAME", "KEY_ID"]);
        let (text, substituted) = renderer
            .render_str(
                "key=BUCKET_NAME\nother=KEY_ID",
                &values(&[("BUCKET_NAME", "team-KEY_ID"), ("KEY_ID", "BUCKET_NAME")]),
            )
            .unwrap();

        assert_eq!(text, "key=team-KEY_ID\nother=BUCKET_NAME");
        assert_eq!(substituted, vec!["BUCKET_NAME", "KEY_ID"]);
    }

    #[test]
    fn test_longest_token_wins_at_same_position() {
        let renderer = ConfigRenderer::new(["KEY", "KEY_ID"]);
        let (text, _) = renderer
            .render_str("id=KEY_ID key=KEY", &values(&[("KEY", "k"), ("KEY_ID", "k1")]))
            .unwrap();

        assert_eq!(text, "id=k1 key=k");
    }

    #[test]
    fn test_missing_value_fails() {
        let renderer = ConfigRenderer::new(["BUCKET_NAME", "KEY_ID"]);
        let err = renderer
            .render_str("key=BUCKET_NAME\nother=KEY_ID", &values(&[("BUCKET_NAME", "b1")]))
            .unwrap_err();

        assert!(matches!(err, RenderError::MissingValue(ref token) if token == "KEY_ID"));
    }

    #[test]
    fn test_unused_known_placeholder_is_fine() {
        let renderer = ConfigRenderer::new(["BUCKET_NAME", "KEY_ID"]);
        let (text, substituted) = renderer
            .render_str("key=BUCKET_NAME", &values(&[("BUCKET_NAME", "b1")]))
            .unwrap();

        assert_eq!(text, "key=b1");
        assert_eq!(substituted, vec!["BUCKET_NAME"]);
    }

    #[test]
    fn test_rerender_overwrites_destination() {
        let temp_dir = TempDir::new().unwrap();
        let template = temp_dir.path().join("template.hcl");
        let output = temp_dir.path().join("vault.hcl");
        std::fs::write(&template, "bucket=BUCKET_NAME").unwrap();
        std::fs::write(&output, "stale contents that are longer than the render").unwrap();

        let renderer = ConfigRenderer::new(["BUCKET_NAME"]);
        renderer
            .render(&template, &output, &values(&[("BUCKET_NAME", "b1")]))
            .unwrap();
        renderer
            .render(&template, &output, &values(&[("BUCKET_NAME", "b2")]))
            .unwrap();

        assert_eq!(std::fs::read_to_string(&output).unwrap(), "bucket=b2");
        let entries = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(entries, 2, "no temp files should be left behind");
    }

    #[test]
    fn test_unreadable_template() {
        let temp_dir = TempDir::new().unwrap();
        let renderer = ConfigRenderer::default();

        let err = renderer
            .render(
                &temp_dir.path().join("absent.hcl"),
                &temp_dir.path().join("vault.hcl"),
                &BTreeMap::new(),
            )
            .unwrap_err();

        assert!(matches!(err, RenderError::ReadTemplate { .. }));
    }
}
