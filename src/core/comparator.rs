use crate::core::manifest::{FileKey, Manifest};
use std::fmt;

/// 远程动作，每个动作只被一个 worker 处理一次
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteAction {
    /// 上传本地文件到同名对象
    Upload(FileKey),
    /// 删除远程对象
    Delete(FileKey),
}

impl RemoteAction {
    pub fn key(&self) -> &FileKey {
        match self {
            RemoteAction::Upload(key) | RemoteAction::Delete(key) => key,
        }
    }

    pub fn into_key(self) -> FileKey {
        match self {
            RemoteAction::Upload(key) | RemoteAction::Delete(key) => key,
        }
    }
}

impl fmt::Display for RemoteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteAction::Upload(key) => write!(f, "upload {}", key),
            RemoteAction::Delete(key) => write!(f, "delete {}", key),
        }
    }
}

/// 上传：本地存在而远程缺失，或指纹不同
pub fn plan_uploads<'a>(
    local: &'a Manifest,
    remote: &'a Manifest,
) -> impl Iterator<Item = &'a FileKey> + 'a {
    local.iter().filter_map(move |(key, local_record)| {
        match remote.get(key) {
            Some(remote_record) if local_record.same_content(remote_record) => None,
            _ => Some(key),
        }
    })
}

/// 删除：远程存在而本地缺失，只看键，不比较内容
pub fn plan_deletes<'a>(
    local: &'a Manifest,
    remote: &'a Manifest,
) -> impl Iterator<Item = &'a FileKey> + 'a {
    remote.keys().filter(move |key| !local.contains(key))
}

/// 一次比较的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub uploads: usize,
    pub upload_bytes: u64,
    pub deletes: usize,
    /// 未能提交到队列的动作
    pub rejected: usize,
}

impl DiffSummary {
    pub fn total_actions(&self) -> usize {
        self.uploads + self.deletes
    }

    pub fn merge(&mut self, other: DiffSummary) {
        self.uploads += other.uploads;
        self.upload_bytes += other.upload_bytes;
        self.deletes += other.deletes;
        self.rejected += other.rejected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::FileRecord;
    use std::collections::BTreeSet;

    fn manifest(entries: &[(&str, &str)]) -> Manifest {
        entries
            .iter()
            .map(|(k, fp)| (k.to_string(), FileRecord::new(*fp, 1)))
            .collect()
    }

    fn uploads(local: &Manifest, remote: &Manifest) -> BTreeSet<String> {
        plan_uploads(local, remote).cloned().collect()
    }

    fn deletes(local: &Manifest, remote: &Manifest) -> BTreeSet<String> {
        plan_deletes(local, remote).cloned().collect()
    }

    fn set(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_missing_and_stale_files_are_uploaded() {
        let local = manifest(&[("a", "fp1"), ("b", "fp2")]);
        let remote = manifest(&[("a", "fp1"), ("c", "fp3")]);

        assert_eq!(uploads(&local, &remote), set(&["b"]));
        assert_eq!(deletes(&local, &remote), set(&["c"]));
    }

    #[test]
    fn test_empty_local_deletes_everything() {
        let local = manifest(&[]);
        let remote = manifest(&[("x", "fp1")]);

        assert!(uploads(&local, &remote).is_empty());
        assert_eq!(deletes(&local, &remote), set(&["x"]));
    }

    #[test]
    fn test_changed_fingerprint_is_uploaded_not_deleted() {
        let local = manifest(&[("a", "fp1")]);
        let remote = manifest(&[("a", "fp2")]);

        assert_eq!(uploads(&local, &remote), set(&["a"]));
        assert!(deletes(&local, &remote).is_empty());
    }

    #[test]
    fn test_identical_manifests_need_nothing() {
        let local = manifest(&[("a", "fp1"), ("b/c", "fp2")]);
        let remote = local.clone();

        assert!(uploads(&local, &remote).is_empty());
        assert!(deletes(&local, &remote).is_empty());
    }

    #[test]
    fn test_delete_ignores_remote_content() {
        // 远程记录内容不同也不会触发删除
        let local = manifest(&[("a", "fp1")]);
        let remote = manifest(&[("a", "other"), ("b", "")]);

        assert_eq!(deletes(&local, &remote), set(&["b"]));
    }

    #[test]
    fn test_upload_and_delete_sets_are_disjoint() {
        let local = manifest(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]);
        let remote = manifest(&[("b", "2"), ("c", "x"), ("e", "5"), ("f", "6")]);

        let up = uploads(&local, &remote);
        let del = deletes(&local, &remote);

        assert_eq!(up, set(&["a", "c", "d"]));
        assert_eq!(del, set(&["e", "f"]));
        assert!(up.is_disjoint(&del));
    }

    #[test]
    fn test_action_display() {
        assert_eq!(RemoteAction::Upload("a/b".into()).to_string(), "upload a/b");
        assert_eq!(RemoteAction::Delete("c".into()).to_string(), "delete c");
    }
}
