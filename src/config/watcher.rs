use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// 配置文件变更探测器。
/// 首次调用建立基线（不视为变更），之后以mtime粗筛、
/// sha256内容哈希终判，避免touch等无实质变化触发热加载。
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
    last_hash: Option<[u8; 32]>,
    initialized: bool,
}

impl ConfigWatcher {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            last_mtime: None,
            last_hash: None,
            initialized: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 探测配置文件是否发生了内容变更
    pub fn detect_changes(&mut self) -> bool {
        if !self.initialized {
            self.establish_baseline();
            return false;
        }

        let Ok(metadata) = std::fs::metadata(&self.path) else {
            return false;
        };
        let mtime = metadata.modified().ok();

        if let (Some(current), Some(last)) = (mtime, self.last_mtime) {
            if current <= last {
                return false;
            }
        }

        let Ok(contents) = std::fs::read(&self.path) else {
            warn!(path = %self.path.display(), "failed to read config file during change detection");
            return false;
        };
        let hash: [u8; 32] = Sha256::digest(&contents).into();

        if self.last_hash == Some(hash) {
            // mtime更新但内容未变
            self.last_mtime = mtime;
            return false;
        }

        self.last_mtime = mtime;
        self.last_hash = Some(hash);
        true
    }

    fn establish_baseline(&mut self) {
        match std::fs::read(&self.path) {
            Ok(contents) => {
                self.last_hash = Some(Sha256::digest(&contents).into());
                self.last_mtime = std::fs::metadata(&self.path)
                    .and_then(|m| m.modified())
                    .ok();
                self.initialized = true;
                debug!(path = %self.path.display(), "config file baseline established");
            }
            Err(e) => {
                warn!(path = %self.path.display(), "failed to establish config baseline: {}", e);
            }
        }
    }
}
