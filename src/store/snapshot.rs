//! Whole-store snapshots. The row tables serialize to a single bincode blob;
//! the write goes through a sibling tmp file and a rename so a crash cannot
//! leave a torn snapshot behind.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::store::tables::Tables;
use crate::store::ResourceStore;

pub fn save(store: &ResourceStore, path: &Path) -> Result<()> {
    let bytes = {
        let t = store.tables.read();
        bincode::serialize(&*t).context("serialize store snapshot")?
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("create snapshot dir {}", dir.display()))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &bytes).with_context(|| format!("write snapshot {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("rename snapshot into {}", path.display()))?;
    info!(target: "depot::store", path = %path.display(), bytes = bytes.len(), "saved snapshot");
    Ok(())
}

pub fn load(path: &Path) -> Result<ResourceStore> {
    let bytes = std::fs::read(path).with_context(|| format!("read snapshot {}", path.display()))?;
    let tables: Tables = bincode::deserialize(&bytes).context("decode store snapshot")?;
    info!(target: "depot::store", path = %path.display(), resources = tables.resources.len(), "loaded snapshot");
    Ok(ResourceStore::from_tables(tables))
}
