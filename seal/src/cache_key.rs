use std::fmt;
use std::path::{Path, PathBuf};

use merkletree::store::StoreConfig;

/// Files written into a sector's cache directory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheKey {
    PAux,
    TAux,
    CommDTree,
    CommCTree,
    CommRLastTree,
    SealedFile,
    CommitPhase1Output,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CacheKey::PAux => write!(f, "p_aux"),
            CacheKey::TAux => write!(f, "t_aux"),
            CacheKey::CommDTree => write!(f, "tree-d"),
            CacheKey::CommCTree => write!(f, "tree-c"),
            CacheKey::CommRLastTree => write!(f, "tree-r-last"),
            CacheKey::SealedFile => write!(f, "sealed-file"),
            CacheKey::CommitPhase1Output => write!(f, "commit-phase1-output"),
        }
    }
}

impl CacheKey {
    #[inline]
    pub fn is_tree(self) -> bool {
        matches!(
            self,
            CacheKey::CommDTree | CacheKey::CommCTree | CacheKey::CommRLastTree
        )
    }

    /// Tree keys resolve to the data file of their store.
    pub fn path(self, cache_path: &Path) -> PathBuf {
        if self.is_tree() {
            StoreConfig::data_path(cache_path, &self.to_string())
        } else {
            cache_path.join(self.to_string())
        }
    }

    /// Store config of a tree key, rooted at `cache_path`. Every level is
    /// kept on disk.
    pub fn store_config(self, cache_path: &Path) -> StoreConfig {
        StoreConfig::new(cache_path, self.to_string(), 0)
    }
}

/// The cache directory PC2 uses for sector `index` of a batch.
pub fn sector_cache_dir(output_dir: &Path, index: usize) -> PathBuf {
    output_dir.join(format!("{:03}", index))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tree_keys_use_store_data_paths() {
        let cache = Path::new("/tmp/cache");
        let config = CacheKey::CommCTree.store_config(cache);
        assert_eq!(
            CacheKey::CommCTree.path(cache),
            StoreConfig::data_path(&config.path, &config.id)
        );
        assert_eq!(CacheKey::PAux.path(cache), cache.join("p_aux"));
        assert!(!CacheKey::SealedFile.is_tree());
    }
}
