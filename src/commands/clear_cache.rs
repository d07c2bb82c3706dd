//! The `clear-cache` operation: wipe the dev-stage cache directory and exit.

use crate::cache::CacheStore;

pub fn run() -> anyhow::Result<i32> {
    CacheStore::resolve()?.clear()?;
    println!("cache cleared");
    Ok(0)
}
