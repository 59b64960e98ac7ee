//! [`PolicyLoader`]: filesystem-backed policy document loading.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use postwarden_core::PolicySettings;
use postwarden_notify::TemplateRenderer;
use serde_yaml::Value;
use tracing::{info, warn};

use super::document::PolicyDocument;
use super::error::{LoadResult, LoadStatus, PolicyError, Result};
use super::extends::{metadata_field, resolve_extends};

/// Scans a directory (recursively) for `*.yml` / `*.yaml` policy documents
/// and keeps the valid ones in memory, keyed by lowercased community.
pub struct PolicyLoader {
    policy_dir: PathBuf,
    renderer: TemplateRenderer,
    documents: Arc<RwLock<HashMap<String, PolicyDocument>>>,
}

/// A parsed but not yet resolved file.
struct RawPolicy {
    path: PathBuf,
    value: Value,
}

impl PolicyLoader {
    /// Create a loader for `policy_dir`, creating the directory if needed.
    pub fn new(policy_dir: PathBuf) -> Self {
        if !policy_dir.exists() {
            if let Err(e) = fs::create_dir_all(&policy_dir) {
                warn!(path = %policy_dir.display(), error = %e, "failed to create policy directory");
            }
        }
        Self {
            policy_dir,
            renderer: TemplateRenderer::new(),
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Reload every document. The in-memory set is replaced wholesale, so a
    /// deleted file drops its community. Per-file failures are reported in
    /// the results and never abort the scan.
    pub fn load_all(&self) -> Result<Vec<LoadResult>> {
        let mut results = Vec::new();
        let mut paths = Vec::new();
        self.scan_dir_recursive(&self.policy_dir, &mut paths, &mut results)?;
        paths.sort();

        let mut raw: HashMap<String, RawPolicy> = HashMap::new();
        for path in paths {
            match read_raw(&path) {
                Ok((community, value)) => {
                    if let Some(existing) = raw.get(&community) {
                        let error = format!(
                            "community '{community}' is already defined in {}",
                            existing.path.display()
                        );
                        warn!(path = %path.display(), error = %error, "duplicate policy document");
                        results.push(LoadResult {
                            path,
                            status: LoadStatus::Failed { error },
                        });
                        continue;
                    }
                    raw.insert(community, RawPolicy { path, value });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read policy file");
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        let values: HashMap<String, Value> =
            raw.iter().map(|(k, r)| (k.clone(), r.value.clone())).collect();
        let mut communities: Vec<&String> = raw.keys().collect();
        communities.sort();

        let mut loaded = HashMap::new();
        for community in communities {
            let path = raw[community].path.clone();
            match self.build_document(community, &values) {
                Ok(doc) => {
                    info!(
                        community = %community,
                        enabled = doc.metadata.enabled,
                        path = %path.display(),
                        "loaded policy"
                    );
                    loaded.insert(community.clone(), doc);
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Loaded {
                            community: community.clone(),
                        },
                    });
                }
                Err(e) => {
                    warn!(community = %community, path = %path.display(), error = %e, "invalid policy");
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        *self.documents.write().expect("documents lock poisoned") = loaded;
        Ok(results)
    }

    fn scan_dir_recursive(
        &self,
        dir: &Path,
        paths: &mut Vec<PathBuf>,
        results: &mut Vec<LoadResult>,
    ) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to read directory");
                return Ok(());
            }
        };

        for entry in entries {
            let path = entry?.path();

            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    if path.is_file() {
                        results.push(LoadResult {
                            path,
                            status: LoadStatus::Skipped {
                                reason: "dotfile".to_string(),
                            },
                        });
                    }
                    continue;
                }
            }

            if path.is_dir() {
                self.scan_dir_recursive(&path, paths, results)?;
                continue;
            }

            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yml" || e == "yaml")
                .unwrap_or(false);

            if !is_yaml {
                results.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped {
                        reason: "not a YAML file".to_string(),
                    },
                });
                continue;
            }

            paths.push(path);
        }

        Ok(())
    }

    fn build_document(
        &self,
        community: &str,
        values: &HashMap<String, Value>,
    ) -> Result<PolicyDocument> {
        let merged = resolve_extends(community, values).map_err(PolicyError::Extends)?;
        let doc: PolicyDocument = serde_yaml::from_value(merged)?;
        let problems = doc.problems(&self.renderer);
        if !problems.is_empty() {
            return Err(PolicyError::Validation(problems.join("; ")));
        }
        Ok(doc)
    }

    /// Parse and validate a single file on its own. `extends` is not
    /// followed.
    pub fn load_file(&self, path: &Path) -> Result<PolicyDocument> {
        let contents = fs::read_to_string(path)?;
        let doc: PolicyDocument = serde_yaml::from_str(&contents)?;
        let problems = doc.problems(&self.renderer);
        if !problems.is_empty() {
            return Err(PolicyError::Validation(problems.join("; ")));
        }
        Ok(doc)
    }

    pub fn policy_dir(&self) -> &Path {
        &self.policy_dir
    }

    pub fn get(&self, community: &str) -> Option<PolicyDocument> {
        self.documents
            .read()
            .expect("documents lock poisoned")
            .get(&community.to_lowercase())
            .cloned()
    }

    pub fn documents(&self) -> HashMap<String, PolicyDocument> {
        self.documents.read().expect("documents lock poisoned").clone()
    }

    /// Settings of every enabled document, keyed by community.
    pub fn enabled_settings(&self) -> HashMap<String, PolicySettings> {
        self.documents
            .read()
            .expect("documents lock poisoned")
            .iter()
            .filter(|(_, doc)| doc.metadata.enabled)
            .map(|(community, doc)| (community.clone(), doc.settings.clone()))
            .collect()
    }

    /// Atomically write a document to `<community>.yml`.
    ///
    /// Writes to a dotted `.tmp` file first (skipped by scans), then renames.
    pub fn write_document(&self, doc: &PolicyDocument) -> Result<PathBuf> {
        let community = doc.community();
        let problems = doc.problems(&self.renderer);
        if !problems.is_empty() {
            return Err(PolicyError::Validation(problems.join("; ")));
        }
        let final_path = self.policy_dir.join(format!("{community}.yml"));
        let tmp_path = self.policy_dir.join(format!(".{community}.tmp"));

        fs::write(&tmp_path, doc.to_yaml()?)?;
        fs::rename(&tmp_path, &final_path)?;

        info!(community = %community, path = %final_path.display(), "wrote policy file");
        self.documents
            .write()
            .expect("documents lock poisoned")
            .insert(community, doc.clone());
        Ok(final_path)
    }
}

/// Read a file into a raw YAML value and its lowercased community.
fn read_raw(path: &Path) -> Result<(String, Value)> {
    let contents = fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&contents)?;
    let community = metadata_field(&value, "community")
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| PolicyError::Validation("metadata.community is required".to_string()))?;
    Ok((community, value))
}
