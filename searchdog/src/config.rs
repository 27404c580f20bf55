//! Process-wide configuration accessor: load once at startup into an
//! `ArcSwap`, hand out cheap `Arc` clones to every task, and swap the
//! whole thing on `SIGHUP` (`sighup.rs`).

use arc_swap::ArcSwap;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use searchdog_config::{Config, Error, General, NodeRole};

static CONFIG: OnceCell<ArcSwap<Config>> = OnceCell::new();
static CONFIG_PATH: OnceCell<PathBuf> = OnceCell::new();

/// Load `path` and install it as the process-wide configuration. Must be
/// called exactly once, before any call to [`config`].
pub fn load(path: &Path) -> Result<(), Error> {
    let loaded = Config::load(path)?;
    CONFIG
        .set(ArcSwap::new(Arc::new(loaded)))
        .unwrap_or_else(|_| panic!("config already loaded"));
    let _ = CONFIG_PATH.set(path.to_path_buf());
    Ok(())
}

/// Re-reads the file [`load`] was given and applies its hot-reloadable
/// subset (SPEC_FULL.md §1.3), used by the `SIGHUP` handler.
pub fn reload_from_disk() -> Result<(), Error> {
    let path = CONFIG_PATH.get().expect("config not loaded");
    let loaded = Config::load(path)?;
    reload(loaded);
    Ok(())
}

/// The current configuration. Panics if [`load`] hasn't run yet — an
/// un-initialized `OnceCell` here is always a startup-ordering bug.
pub fn config() -> Arc<Config> {
    CONFIG
        .get()
        .expect("config not loaded")
        .load_full()
}

/// Swap in a new configuration, applying only the hot-reloadable subset
/// (SPEC_FULL.md §1.3, §2 "Config hot-reload scope"). Used by the `SIGHUP`
/// handler and by tests that need a scoped override.
pub fn reload(new_config: Config) {
    let slot = CONFIG.get().expect("config not loaded");
    let mut next = (**slot.load()).clone();
    next.reload_from(new_config);
    slot.store(Arc::new(next));
}

#[cfg(test)]
pub fn set_for_test(cfg: Config) {
    let _ = CONFIG.set(ArcSwap::new(Arc::new(cfg)));
}
