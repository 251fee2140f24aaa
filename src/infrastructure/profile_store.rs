//! プロファイル/パターン永続化
//!
//! JSONファイルベースの実装と、テスト用のインメモリ実装。
//! ロードした値は必ずrepair()でクランプし、修復後も壊れている
//! レコードはスキップして残りを返す。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{DomainError, DomainResult, Pattern, ProfileRecord, ProfileStorePort};

/// インメモリストア（テスト・デバッグ実行用）
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: HashMap<String, ProfileRecord>,
    patterns: HashMap<String, Pattern>,
}

#[allow(dead_code)]
impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileStorePort for MemoryProfileStore {
    fn load_profile(&self, name: &str) -> DomainResult<Option<ProfileRecord>> {
        Ok(self.profiles.get(name).cloned().map(|mut record| {
            record.repair();
            record
        }))
    }

    fn save_profile(&mut self, profile: &ProfileRecord) -> DomainResult<()> {
        self.profiles
            .insert(profile.name.clone(), profile.clone());
        Ok(())
    }

    fn load_patterns(&self) -> DomainResult<Vec<Pattern>> {
        let mut patterns: Vec<Pattern> = self.patterns.values().cloned().collect();
        patterns.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(patterns)
    }

    fn save_pattern(&mut self, pattern: &Pattern) -> DomainResult<()> {
        self.patterns.insert(pattern.name.clone(), pattern.clone());
        Ok(())
    }

    fn delete_pattern(&mut self, name: &str) -> DomainResult<bool> {
        Ok(self.patterns.remove(name).is_some())
    }
}

/// JSONファイルストア
///
/// `<root>/profiles/<name>.json` と `<root>/patterns/<name>.json` に
/// 1レコード1ファイルで保存する。同名保存は上書き。
pub struct JsonProfileStore {
    profiles_dir: PathBuf,
    patterns_dir: PathBuf,
}

impl JsonProfileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> DomainResult<Self> {
        let root = root.as_ref();
        let profiles_dir = root.join("profiles");
        let patterns_dir = root.join("patterns");
        for dir in [&profiles_dir, &patterns_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                DomainError::ProfileStore(format!(
                    "Failed to create store directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(Self {
            profiles_dir,
            patterns_dir,
        })
    }

    /// レコード名をファイル名として安全な形に変換する
    fn file_name(name: &str) -> String {
        let sanitized: String = name
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}.json", sanitized)
    }

    fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> DomainResult<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| DomainError::ProfileStore(format!("Failed to serialize: {}", e)))?;
        fs::write(path, json).map_err(|e| {
            DomainError::ProfileStore(format!("Failed to write {}: {}", path.display(), e))
        })
    }
}

impl ProfileStorePort for JsonProfileStore {
    fn load_profile(&self, name: &str) -> DomainResult<Option<ProfileRecord>> {
        let path = self.profiles_dir.join(Self::file_name(name));
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| {
            DomainError::ProfileStore(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut record: ProfileRecord = match serde_json::from_str(&content) {
            Ok(record) => record,
            Err(e) => {
                // 壊れたレコードはロード失敗ではなくスキップ扱い
                tracing::warn!("Skipping corrupt profile {}: {}", path.display(), e);
                return Ok(None);
            }
        };
        let repaired = record.repair();
        if repaired > 0 {
            tracing::warn!(
                "Repaired {} out-of-range field(s) in profile '{}'",
                repaired,
                record.name
            );
        }
        Ok(Some(record))
    }

    fn save_profile(&mut self, profile: &ProfileRecord) -> DomainResult<()> {
        let path = self.profiles_dir.join(Self::file_name(&profile.name));
        Self::write_json(&path, profile)
    }

    fn load_patterns(&self) -> DomainResult<Vec<Pattern>> {
        let entries = fs::read_dir(&self.patterns_dir).map_err(|e| {
            DomainError::ProfileStore(format!(
                "Failed to read {}: {}",
                self.patterns_dir.display(),
                e
            ))
        })?;

        let mut patterns = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                tracing::warn!("Skipping unreadable pattern file {}", path.display());
                continue;
            };
            match serde_json::from_str::<Pattern>(&content) {
                Ok(pattern) => patterns.push(pattern),
                Err(e) => {
                    tracing::warn!("Skipping corrupt pattern {}: {}", path.display(), e);
                }
            }
        }
        patterns.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(patterns)
    }

    fn save_pattern(&mut self, pattern: &Pattern) -> DomainResult<()> {
        let path = self.patterns_dir.join(Self::file_name(&pattern.name));
        Self::write_json(&path, pattern)
    }

    fn delete_pattern(&mut self, name: &str) -> DomainResult<bool> {
        let path = self.patterns_dir.join(Self::file_name(name));
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|e| {
            DomainError::ProfileStore(format!("Failed to delete {}: {}", path.display(), e))
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AntiRecoilConfig, PatternSample, StickCurveConfig};
    use tempfile::tempdir;

    fn sample_profile(name: &str) -> ProfileRecord {
        ProfileRecord {
            name: name.to_string(),
            curve: StickCurveConfig::default(),
            anti_recoil: AntiRecoilConfig::default(),
        }
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryProfileStore::new();
        store.save_profile(&sample_profile("default")).unwrap();
        let loaded = store.load_profile("default").unwrap().unwrap();
        assert_eq!(loaded.name, "default");
        assert!(store.load_profile("missing").unwrap().is_none());
    }

    #[test]
    fn test_json_store_profile_roundtrip() {
        let dir = tempdir().unwrap();
        let mut store = JsonProfileStore::new(dir.path()).unwrap();

        let mut profile = sample_profile("aggressive");
        profile.curve.sensitivity = 80.0;
        store.save_profile(&profile).unwrap();

        let loaded = store.load_profile("aggressive").unwrap().unwrap();
        assert_eq!(loaded, profile);
    }

    #[test]
    fn test_json_store_repairs_on_load() {
        let dir = tempdir().unwrap();
        let mut store = JsonProfileStore::new(dir.path()).unwrap();

        let mut profile = sample_profile("broken");
        profile.curve.expo = 5.0;
        store.save_profile(&profile).unwrap();

        let loaded = store.load_profile("broken").unwrap().unwrap();
        assert_eq!(loaded.curve.expo, 1.0);
    }

    #[test]
    fn test_json_store_skips_corrupt_records() {
        let dir = tempdir().unwrap();
        let mut store = JsonProfileStore::new(dir.path()).unwrap();

        store
            .save_pattern(&Pattern::new(
                "good",
                vec![PatternSample { dx: 1.0, dy: 2.0 }],
            ))
            .unwrap();
        fs::write(dir.path().join("patterns").join("bad.json"), "{not json").unwrap();

        let patterns = store.load_patterns().unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].name, "good");
    }

    #[test]
    fn test_pattern_roundtrip_preserves_sample_order() {
        let dir = tempdir().unwrap();
        let mut store = JsonProfileStore::new(dir.path()).unwrap();

        let samples: Vec<PatternSample> = (0..100)
            .map(|i| PatternSample {
                dx: i as f32 * 0.5,
                dy: -(i as f32),
            })
            .collect();
        let pattern = Pattern::new("spray", samples.clone());
        store.save_pattern(&pattern).unwrap();

        let loaded = store.load_patterns().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].samples, samples);
    }

    #[test]
    fn test_delete_pattern() {
        let dir = tempdir().unwrap();
        let mut store = JsonProfileStore::new(dir.path()).unwrap();

        store
            .save_pattern(&Pattern::new("tmp", Vec::new()))
            .unwrap();
        assert!(store.delete_pattern("tmp").unwrap());
        assert!(!store.delete_pattern("tmp").unwrap());
        assert!(store.load_patterns().unwrap().is_empty());
    }

    #[test]
    fn test_save_overwrites_by_name() {
        let dir = tempdir().unwrap();
        let mut store = JsonProfileStore::new(dir.path()).unwrap();

        store
            .save_pattern(&Pattern::new("ak", vec![PatternSample { dx: 0.0, dy: 1.0 }]))
            .unwrap();
        store
            .save_pattern(&Pattern::new(
                "ak",
                vec![
                    PatternSample { dx: 0.0, dy: 2.0 },
                    PatternSample { dx: 0.0, dy: 3.0 },
                ],
            ))
            .unwrap();

        let patterns = store.load_patterns().unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].samples.len(), 2);
    }
}
